use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::{FaultEntry, Severity};
use crate::writer::{Durability, FaultWriteError, FaultWriter};

/// Channel buffer size used between reporters and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Flush the writer at most every this many seconds when the channel is idle.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// The shared fatal-error channel.
///
/// Every component reports faults through one of these instead of letting an
/// error escape across the interception boundary. `FaultSink` is
/// `Clone + Send + Sync`; clones feed the same destination.
///
/// Reporting is synchronous: interception code runs outside any async
/// context, so entries are queued with `try_send` and a full or closed
/// channel degrades to a `tracing::error!` line.
#[derive(Clone, Debug)]
pub struct FaultSink {
    tx: Option<mpsc::Sender<FaultEntry>>,
}

impl FaultSink {
    /// Spawn the background writer task appending to the JSON-lines file at
    /// `path` and return a `(sink, join_handle)` pair.
    ///
    /// Fatal entries are synced as they arrive. Degraded ones are flushed
    /// after ~1 second of inactivity and once more when the last sink clone
    /// is dropped. I/O errors are logged and the entry is skipped.
    pub async fn start(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), FaultWriteError> {
        let (tx, rx) = mpsc::channel::<FaultEntry>(CHANNEL_BUFFER);

        let mut writer = FaultWriter::open(path).await?;

        let handle = tokio::spawn(async move {
            run_writer_loop(&mut writer, rx).await;
        });

        Ok((Self { tx: Some(tx) }, handle))
    }

    /// A sink whose entries are handed to the returned receiver instead of a
    /// file. Embedders use this to forward faults to their own reporting.
    pub fn channel() -> (Self, mpsc::Receiver<FaultEntry>) {
        let (tx, rx) = mpsc::channel::<FaultEntry>(CHANNEL_BUFFER);
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that only emits tracing events.
    pub fn tracing_only() -> Self {
        Self { tx: None }
    }

    /// Report a fatal fault with an optional cause chain.
    pub fn report(
        &self,
        component: &str,
        message: impl Into<String>,
        cause: Option<&(dyn std::error::Error + 'static)>,
    ) {
        let mut entry = FaultEntry::new(component, message);
        if let Some(cause) = cause {
            entry = entry.with_cause(cause);
        }
        self.submit(entry);
    }

    /// Report a locally-recovered fault (rewriting continued, degraded).
    pub fn report_degraded(
        &self,
        component: &str,
        message: impl Into<String>,
        cause: Option<&(dyn std::error::Error + 'static)>,
    ) {
        let mut entry = FaultEntry::new(component, message).with_severity(Severity::Degraded);
        if let Some(cause) = cause {
            entry = entry.with_cause(cause);
        }
        self.submit(entry);
    }

    /// Queue a fully-built entry.
    pub fn submit(&self, entry: FaultEntry) {
        match entry.severity {
            Severity::Fatal => tracing::error!(
                component = %entry.component,
                causes = ?entry.causes,
                "{}",
                entry.message
            ),
            Severity::Degraded => tracing::warn!(
                component = %entry.component,
                causes = ?entry.causes,
                "{}",
                entry.message
            ),
        }

        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.try_send(entry) {
            let entry = match err {
                mpsc::error::TrySendError::Full(e) | mpsc::error::TrySendError::Closed(e) => e,
            };
            tracing::error!(
                component = %entry.component,
                id = %entry.id,
                "fault sink unavailable; entry dropped"
            );
        }
    }
}

async fn run_writer_loop(writer: &mut FaultWriter, mut rx: mpsc::Receiver<FaultEntry>) {
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);

    loop {
        match tokio::time::timeout(flush_interval, rx.recv()).await {
            Ok(Some(entry)) => match writer.append(&entry).await {
                Ok(Durability::Synced) => {
                    tracing::debug!(id = %entry.id, path = %writer.path().display(), "fatal fault synced")
                }
                Ok(Durability::Buffered) => {}
                Err(err) => tracing::error!(%err, "failed to write fault entry"),
            },
            Ok(None) => {
                if let Err(err) = writer.flush().await {
                    tracing::error!(%err, "failed to flush fault log on shutdown");
                }
                let (fatal, degraded) = writer.counts();
                tracing::debug!(fatal, degraded, "fault writer shutting down");
                return;
            }
            Err(_) => {
                if let Err(err) = writer.flush().await {
                    tracing::error!(%err, "periodic fault log flush failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_report_with_causes() {
        let (sink, mut rx) = FaultSink::channel();
        let cause = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad bytes");
        sink.report("interceptor-registry", "install failed", Some(&cause));

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.component, "interceptor-registry");
        assert_eq!(entry.message, "install failed");
        assert_eq!(entry.causes, vec!["bad bytes"]);
        assert_eq!(entry.severity, Severity::Fatal);
    }

    #[tokio::test]
    async fn degraded_reports_are_tagged() {
        let (sink, mut rx) = FaultSink::channel();
        sink.report_degraded("url-rewrite", "passthrough", None);
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.severity, Severity::Degraded);
        assert!(entry.causes.is_empty());
    }

    #[test]
    fn tracing_only_sink_never_panics() {
        let sink = FaultSink::tracing_only();
        sink.report("csp-policy", "double load", None);
    }

    #[tokio::test]
    async fn closed_channel_drops_entry_quietly() {
        let (sink, rx) = FaultSink::channel();
        drop(rx);
        sink.report("storage-ns", "collision", None);
    }

    #[tokio::test]
    async fn file_sink_persists_entries_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faults.jsonl");

        let (sink, handle) = FaultSink::start(&path).await.unwrap();
        sink.report("proxy-context", "boom", None);
        drop(sink);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"boom\""));
    }

    #[tokio::test]
    async fn file_sink_syncs_fatal_entries_without_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faults.jsonl");

        let (sink, handle) = FaultSink::start(&path).await.unwrap();
        sink.report("csp-policy", "double load", None);

        let mut contents = String::new();
        for _ in 0..50 {
            contents = tokio::fs::read_to_string(&path).await.unwrap();
            if !contents.is_empty() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        }
        assert!(contents.contains("\"double load\""));
        drop(sink);
        handle.await.unwrap();
    }
}
