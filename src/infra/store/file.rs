//! File-backed identity store.
//!
//! Records are appended as JSON lines; on open, the last line for each identity
//! wins. A partial final line, as left by a crash during an append, is
//! discarded on open; corruption anywhere else fails the open.
//! [`FileIdentityStore::compact`] rewrites the file with one line per identity.

use std::collections::HashMap;
use std::fs::{create_dir_all, rename, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{IdentityStore, TaskIdentity, TaskPoolError, UnitRecord};

/// One persisted line, as read back.
#[derive(Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct StoredLine<T> {
    identity: TaskIdentity,
    record: UnitRecord<T>,
}

/// Identity store persisted to a JSON lines file, surviving process restarts.
pub struct FileIdentityStore<T> {
    path: PathBuf,
    stream: String,
    records: HashMap<TaskIdentity, UnitRecord<T>>,
}

impl<T> FileIdentityStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open (or create) the store `<path>/<stream>.jsonl`, loading existing records.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::Store`] if the directory cannot be created or a
    /// line other than the last one is unreadable.
    pub fn open(path: impl AsRef<Path>, stream: impl Into<String>) -> Result<Self, TaskPoolError> {
        let path = path.as_ref().to_path_buf();
        let stream = stream.into();
        create_dir_all(&path).map_err(|e| TaskPoolError::Store(e.to_string()))?;
        let mut store = Self {
            path,
            stream,
            records: HashMap::new(),
        };
        store.load_from_disk()?;
        tracing::debug!(
            file = %store.file_path().display(),
            records = store.records.len(),
            "identity store opened"
        );
        Ok(store)
    }

    /// Location of the backing file.
    pub fn file_path(&self) -> PathBuf {
        self.path.join(format!("{}.jsonl", self.stream))
    }

    /// Number of identities with a record.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record has been written.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn load_from_disk(&mut self) -> Result<(), TaskPoolError> {
        let file_path = self.file_path();
        if !file_path.exists() {
            return Ok(());
        }
        let contents =
            std::fs::read_to_string(&file_path).map_err(|e| TaskPoolError::Store(e.to_string()))?;

        let mut offset = 0;
        let mut valid_len = contents.len();
        for line in contents.split_inclusive('\n') {
            let line_start = offset;
            offset += line.len();
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredLine<T>>(line) {
                Ok(stored) => {
                    self.records.insert(stored.identity, stored.record);
                }
                // A crash mid-append leaves at most one partial line, at the end.
                Err(e) if contents[offset..].trim().is_empty() => {
                    tracing::warn!(
                        file = %file_path.display(),
                        offset = line_start,
                        error = %e,
                        "discarding torn record at end of identity store"
                    );
                    valid_len = line_start;
                }
                Err(e) => {
                    return Err(TaskPoolError::Store(format!(
                        "corrupt record at byte {line_start} of {}: {e}",
                        file_path.display()
                    )));
                }
            }
        }

        let needs_newline = valid_len > 0 && !contents[..valid_len].ends_with('\n');
        if valid_len < contents.len() || needs_newline {
            self.repair_tail(valid_len as u64, needs_newline)?;
        }
        Ok(())
    }

    /// Cut the file at `valid_len` and terminate the last kept line, so the
    /// next append starts on a line of its own.
    fn repair_tail(&self, valid_len: u64, needs_newline: bool) -> Result<(), TaskPoolError> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.file_path())
            .map_err(|e| TaskPoolError::Store(e.to_string()))?;
        file.set_len(valid_len)
            .map_err(|e| TaskPoolError::Store(e.to_string()))?;
        if needs_newline {
            file.seek(SeekFrom::End(0))
                .map_err(|e| TaskPoolError::Store(e.to_string()))?;
            file.write_all(b"\n")
                .map_err(|e| TaskPoolError::Store(e.to_string()))?;
        }
        file.sync_all().map_err(|e| TaskPoolError::Store(e.to_string()))
    }

    fn append_to_disk(&self, identity: &TaskIdentity, record: &UnitRecord<T>) -> Result<(), TaskPoolError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path())
            .map_err(|e| TaskPoolError::Store(e.to_string()))?;
        let line = serde_json::to_string(&StoredLineRef { identity, record })
            .map_err(|e| TaskPoolError::Store(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| TaskPoolError::Store(e.to_string()))
    }

    /// Rewrite the backing file with only the latest record per identity.
    ///
    /// The new contents are written to a sibling `.tmp` file, synced, then
    /// renamed over the live file, so a failure leaves the old file intact.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::Store`] on I/O or serialization failure.
    pub fn compact(&self) -> Result<(), TaskPoolError> {
        let live = self.file_path();
        let tmp = self.path.join(format!("{}.jsonl.tmp", self.stream));
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| TaskPoolError::Store(e.to_string()))?;
        for (identity, record) in &self.records {
            let line = serde_json::to_string(&StoredLineRef { identity, record })
                .map_err(|e| TaskPoolError::Store(e.to_string()))?;
            writeln!(file, "{line}").map_err(|e| TaskPoolError::Store(e.to_string()))?;
        }
        file.sync_all().map_err(|e| TaskPoolError::Store(e.to_string()))?;
        drop(file);
        rename(&tmp, &live).map_err(|e| TaskPoolError::Store(e.to_string()))
    }
}

/// Borrowed form of [`StoredLine`] for writing.
#[derive(Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
struct StoredLineRef<'a, T> {
    identity: &'a TaskIdentity,
    record: &'a UnitRecord<T>,
}

impl<T> IdentityStore<T> for FileIdentityStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send,
{
    fn get(&self, identity: &TaskIdentity) -> Result<Option<UnitRecord<T>>, TaskPoolError> {
        Ok(self.records.get(identity).cloned())
    }

    fn put(&mut self, identity: &TaskIdentity, record: UnitRecord<T>) -> Result<(), TaskPoolError> {
        self.append_to_disk(identity, &record)?;
        self.records.insert(identity.clone(), record);
        Ok(())
    }
}
