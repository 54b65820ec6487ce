//! Append-only violation audit log

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::ViolationCategory;

/// One line of the audit trail
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub timestamp: DateTime<Utc>,
    pub participant_id: Uuid,
    pub account_id: Uuid,
    pub ip_address: &'a str,
    pub category: ViolationCategory,
    pub count: u32,
    pub details: &'a str,
}

impl AuditEntry<'_> {
    pub fn to_line(&self) -> String {
        format!(
            "{} participant={} account={} ip={} category={} count={} details={}\n",
            self.timestamp.to_rfc3339(),
            self.participant_id,
            self.account_id,
            self.ip_address,
            self.category,
            self.count,
            self.details.replace('\n', " "),
        )
    }
}

/// Handle used on the packet path. Lines are queued for the background
/// `AuditWriter`; nothing here touches the filesystem.
pub struct AuditLog {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl AuditLog {
    /// Create the log and the writer that must be spawned to drain it
    pub fn new(path: impl Into<PathBuf>) -> (Self, AuditWriter) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = AuditWriter {
            path: path.into(),
            rx,
            file: None,
        };
        (Self { tx: Some(tx) }, writer)
    }

    /// A log that accepts and discards every entry
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn append(&self, entry: &AuditEntry<'_>) -> Result<(), AuditError> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        tx.send(entry.to_line()).map_err(|_| AuditError::WriterStopped)
    }
}

/// Background worker appending queued lines to the audit file.
/// The file is opened lazily and reopened after a failed write.
pub struct AuditWriter {
    path: PathBuf,
    rx: mpsc::UnboundedReceiver<String>,
    file: Option<File>,
}

impl AuditWriter {
    pub async fn run(mut self) {
        while let Some(line) = self.rx.recv().await {
            if let Err(e) = self.write_line(&line).await {
                debug!(path = %self.path.display(), error = %e, "Audit log write failed");
            }
        }
        info!("Audit writer stopped");
    }

    async fn write_line(&mut self, line: &str) -> Result<(), AuditError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(AuditError::Open)?;
            self.file = Some(file);
        }

        let result = match self.file.as_mut() {
            Some(file) => match file.write_all(line.as_bytes()).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            },
            None => return Ok(()),
        };

        if let Err(e) = result {
            // Drop the handle so the next line retries the open
            self.file = None;
            return Err(AuditError::Write(e));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to open audit log: {0}")]
    Open(std::io::Error),

    #[error("Failed to write audit log: {0}")]
    Write(std::io::Error),

    #[error("Audit writer stopped")]
    WriterStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> AuditEntry<'static> {
        AuditEntry {
            timestamp: Utc::now(),
            participant_id: Uuid::nil(),
            account_id: Uuid::nil(),
            ip_address: "10.0.0.1",
            category: ViolationCategory::Teleport,
            count: 2,
            details: "moved 80.00 units\nin one sample",
        }
    }

    #[test]
    fn test_line_format_is_single_line() {
        let line = entry().to_line();
        assert!(line.contains("category=teleport"));
        assert!(line.contains("count=2"));
        assert!(line.contains("ip=10.0.0.1"));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[tokio::test]
    async fn test_writer_appends_queued_lines() {
        let path = std::env::temp_dir().join(format!("audit-{}.log", Uuid::new_v4()));
        let (log, writer) = AuditLog::new(&path);
        log.append(&entry()).unwrap();
        log.append(&entry()).unwrap();

        // Dropping the last handle lets the writer drain and stop
        drop(log);
        writer.run().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_open_failure_is_reported_and_retried() {
        let (_log, mut writer) = AuditLog::new(std::env::temp_dir());
        assert!(matches!(writer.write_line("a\n").await, Err(AuditError::Open(_))));
        assert!(writer.file.is_none());
        assert!(matches!(writer.write_line("b\n").await, Err(AuditError::Open(_))));
    }

    #[test]
    fn test_append_after_writer_stopped() {
        let (log, writer) = AuditLog::new(std::env::temp_dir().join("never-written.log"));
        drop(writer);
        assert!(matches!(log.append(&entry()), Err(AuditError::WriterStopped)));
    }

    #[test]
    fn test_disabled_log_accepts_everything() {
        assert!(AuditLog::disabled().append(&entry()).is_ok());
    }
}
