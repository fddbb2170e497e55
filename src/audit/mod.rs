//! Append-only audit log of completed searches.
//!
//! Each record is a timestamp line, the titles in order, and a separator line:
//!
//! ```text
//! Retrieved at: 2026-10-19 14:03:12
//! Imagine
//! Jealous Guy
//! =======================================
//! ```
//!
//! [`FileAuditLog`] hands records to a single writer task over a channel, so
//! the request path never touches the file and records never interleave.
//! Write failures stay inside the writer task and are only logged.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SEPARATOR: &str = "=======================================";

/// One completed search.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub retrieved_at: DateTime<Local>,
    pub titles: Vec<String>,
}

impl AuditRecord {
    pub fn now(titles: Vec<String>) -> Self {
        Self {
            retrieved_at: Local::now(),
            titles,
        }
    }

    /// Renders the record as it is appended to the log.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Retrieved at: {}\n",
            self.retrieved_at.format("%Y-%m-%d %H:%M:%S")
        );
        for title in &self.titles {
            out.push_str(title);
            out.push('\n');
        }
        out.push_str(SEPARATOR);
        out.push('\n');
        out
    }
}

/// Destination for audit records.
///
/// `record` must return promptly and must not fail the caller; sinks deal
/// with their own errors.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Audit sink that appends rendered records to a file from a background task.
///
/// [`close`](Self::close) works through a shared reference, so the log can be
/// drained while request handlers still hold it.
pub struct FileAuditLog {
    sender: Mutex<Option<mpsc::UnboundedSender<AuditRecord>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl FileAuditLog {
    /// Starts the writer task for `path`. Must be called inside a Tokio runtime.
    ///
    /// The file (and its parent directory) is created on first use. If it
    /// cannot be opened the writer logs the error and discards records.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_records(path, receiver));
        Self {
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Stops accepting records and waits until everything queued is written.
    /// Records submitted afterwards are dropped with a warning. Closing twice
    /// is a no-op.
    pub async fn close(&self) {
        drop(self.sender.lock().take());
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                error!(error = %e, "audit writer task failed");
            }
        }
    }
}

impl AuditSink for FileAuditLog {
    fn record(&self, record: AuditRecord) {
        let sent = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(record).is_ok(),
            None => false,
        };
        if !sent {
            warn!("audit writer has stopped; record dropped");
        }
    }
}

async fn write_records(path: PathBuf, mut receiver: mpsc::UnboundedReceiver<AuditRecord>) {
    let mut file = match open_append(&path).await {
        Ok(file) => file,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to open audit log");
            while receiver.recv().await.is_some() {}
            return;
        }
    };

    info!(path = %path.display(), "audit log writer started");

    while let Some(record) = receiver.recv().await {
        let rendered = record.render();
        let written = async {
            file.write_all(rendered.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "failed to append audit record");
        }
    }
}

async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use chrono::TimeZone;

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("tunecache-test-{}-{nanos}", std::process::id()))
            .join(name)
    }

    #[test]
    fn render_layout() {
        let record = AuditRecord {
            retrieved_at: Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap(),
            titles: vec!["Imagine".into(), "Jealous Guy".into()],
        };
        assert_eq!(
            record.render(),
            "Retrieved at: 2024-03-09 07:05:01\nImagine\nJealous Guy\n=======================================\n"
        );
    }

    #[test]
    fn render_without_titles_keeps_frame() {
        let record = AuditRecord::now(Vec::new());
        let rendered = record.render();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Retrieved at: "));
        assert_eq!(lines[1], SEPARATOR);
    }

    #[tokio::test]
    async fn appends_records_in_order() {
        let path = temp_path("audit.log");
        let log = FileAuditLog::spawn(&path);
        log.record(AuditRecord::now(vec!["first".into()]));
        log.record(AuditRecord::now(vec!["second".into(), "third".into()]));
        log.close().await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let titles: Vec<_> = contents
            .lines()
            .filter(|l| !l.starts_with("Retrieved at: ") && *l != SEPARATOR)
            .collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
        assert_eq!(contents.matches(SEPARATOR).count(), 2);

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }

    #[tokio::test]
    async fn close_drains_while_shared() {
        let path = temp_path("audit.log");
        let log = std::sync::Arc::new(FileAuditLog::spawn(&path));
        let handler_ref = std::sync::Arc::clone(&log);

        handler_ref.record(AuditRecord::now(vec!["queued".into()]));
        log.close().await;
        assert_eq!(std::sync::Arc::strong_count(&log), 2);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("queued\n"));

        // Late records are dropped, not written.
        handler_ref.record(AuditRecord::now(vec!["late".into()]));
        log.close().await;
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!contents.contains("late"));

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }

    #[tokio::test]
    async fn unopenable_path_does_not_fail_callers() {
        // A directory cannot be opened for appending.
        let dir = temp_path("as-dir");
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let log = FileAuditLog::spawn(&dir);
        log.record(AuditRecord::now(vec!["lost".into()]));
        log.close().await;

        let _ = tokio::fs::remove_dir_all(dir.parent().unwrap()).await;
    }
}
