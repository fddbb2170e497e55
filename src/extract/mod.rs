//! Title extraction from catalog search payloads.
//!
//! A search payload looks like `{"data":[{"title":"..."}, ...], "total": n}`.
//! Extraction never fails: malformed payloads degrade to an empty list and
//! items without a string `title` are skipped. Both conditions are reported
//! on the returned [`Extraction`] and logged.

use serde_json::Value;
use tracing::warn;

/// Why an extraction came back empty or partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// The payload is not valid JSON.
    Unparsable(String),
    /// The payload has no `data` array.
    MissingData,
    /// This many entries of `data` had no string `title`.
    UntitledItems(usize),
}

/// Titles pulled out of one payload, in upstream order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub titles: Vec<String>,
    pub anomaly: Option<Anomaly>,
}

/// Extracts `data[*].title` from `payload`.
///
/// # Examples
///
/// ```
/// use tunecache::extract::extract_titles;
///
/// let payload = r#"{"data":[{"title":"Imagine"},{"title":"Oh Yoko!"}]}"#;
/// let extraction = extract_titles(payload);
/// assert_eq!(extraction.titles, vec!["Imagine", "Oh Yoko!"]);
/// assert!(extraction.anomaly.is_none());
/// ```
pub fn extract_titles(payload: &str) -> Extraction {
    let root: Value = match serde_json::from_str(payload) {
        Ok(root) => root,
        Err(e) => {
            warn!(error = %e, "search payload is not valid JSON");
            return Extraction {
                titles: Vec::new(),
                anomaly: Some(Anomaly::Unparsable(e.to_string())),
            };
        }
    };

    let Some(items) = root.get("data").and_then(Value::as_array) else {
        warn!("search payload has no data array");
        return Extraction {
            titles: Vec::new(),
            anomaly: Some(Anomaly::MissingData),
        };
    };

    let titles: Vec<String> = items
        .iter()
        .filter_map(|item| item.get("title").and_then(Value::as_str))
        .map(str::to_owned)
        .collect();

    let untitled = items.len() - titles.len();
    let anomaly = if untitled > 0 {
        warn!(untitled, total = items.len(), "search items without a title were skipped");
        Some(Anomaly::UntitledItems(untitled))
    } else {
        None
    };

    Extraction { titles, anomaly }
}
