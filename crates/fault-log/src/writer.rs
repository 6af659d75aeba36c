use std::path::{Path, PathBuf};

use tokio::io::{AsyncWriteExt, BufWriter};

use crate::entry::{FaultEntry, Severity};

#[derive(Debug, thiserror::Error)]
pub enum FaultWriteError {
    #[error("cannot open fault log {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fault {id} is not serialisable: {source}")]
    Encode {
        id: uuid::Uuid,
        #[source]
        source: serde_json::Error,
    },

    #[error("fault log {} I/O failed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where an appended entry ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Held in the write buffer until the next [`FaultWriter::flush`].
    Buffered,
    /// Flushed and synced to disk.
    Synced,
}

/// JSON-lines fault log.
///
/// Degraded entries are buffered. A fatal entry forces everything written so
/// far to disk before [`FaultWriter::append`] returns, since the operation
/// that raised it is about to abort.
pub struct FaultWriter {
    path: PathBuf,
    out: BufWriter<tokio::fs::File>,
    pending: usize,
    fatal: u64,
    degraded: u64,
}

impl FaultWriter {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FaultWriteError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| FaultWriteError::Open {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(open_err)?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_err)?;

        Ok(Self {
            path,
            out: BufWriter::new(file),
            pending: 0,
            fatal: 0,
            degraded: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries written since the last flush.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// `(fatal, degraded)` entries appended over the writer's lifetime.
    pub fn counts(&self) -> (u64, u64) {
        (self.fatal, self.degraded)
    }

    pub async fn append(&mut self, entry: &FaultEntry) -> Result<Durability, FaultWriteError> {
        let mut line = serde_json::to_vec(entry).map_err(|source| FaultWriteError::Encode {
            id: entry.id,
            source,
        })?;
        line.push(b'\n');

        self.out.write_all(&line).await.map_err(|e| self.io(e))?;
        self.pending += 1;

        match entry.severity {
            Severity::Degraded => {
                self.degraded += 1;
                Ok(Durability::Buffered)
            }
            Severity::Fatal => {
                self.fatal += 1;
                self.sync().await?;
                Ok(Durability::Synced)
            }
        }
    }

    pub async fn flush(&mut self) -> Result<(), FaultWriteError> {
        if self.pending == 0 {
            return Ok(());
        }
        self.out.flush().await.map_err(|e| self.io(e))?;
        self.pending = 0;
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), FaultWriteError> {
        self.out.flush().await.map_err(|e| self.io(e))?;
        self.out.get_ref().sync_data().await.map_err(|e| self.io(e))?;
        self.pending = 0;
        Ok(())
    }

    fn io(&self, source: std::io::Error) -> FaultWriteError {
        FaultWriteError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn lines(path: &Path) -> Vec<FaultEntry> {
        tokio::fs::read_to_string(path)
            .await
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn degraded_entries_wait_for_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("faults.jsonl");
        let mut writer = FaultWriter::open(&path).await.unwrap();

        let entry = FaultEntry::new("url-rewrite", "passthrough").with_severity(Severity::Degraded);
        assert_eq!(writer.append(&entry).await.unwrap(), Durability::Buffered);
        assert_eq!(writer.pending(), 1);
        assert!(lines(&path).await.is_empty());

        writer.flush().await.unwrap();
        assert_eq!(writer.pending(), 0);
        assert_eq!(lines(&path).await[0].message, "passthrough");
    }

    #[tokio::test]
    async fn fatal_entry_is_on_disk_when_append_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faults.jsonl");
        let mut writer = FaultWriter::open(&path).await.unwrap();

        let degraded = FaultEntry::new("url-rewrite", "passthrough").with_severity(Severity::Degraded);
        writer.append(&degraded).await.unwrap();
        let fatal = FaultEntry::new("storage-ns", "collision");
        assert_eq!(writer.append(&fatal).await.unwrap(), Durability::Synced);

        let written = lines(&path).await;
        assert_eq!(written.len(), 2);
        assert_eq!(written[1].severity, Severity::Fatal);
        assert_eq!(written[1].component, "storage-ns");
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.counts(), (1, 1));
    }

    #[tokio::test]
    async fn open_fails_with_path_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FaultWriter::open(dir.path()).await.err().unwrap();
        assert!(matches!(err, FaultWriteError::Open { .. }));
        assert!(err.to_string().contains(&dir.path().display().to_string()));
    }
}
