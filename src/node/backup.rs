//! Crash-recovery backup of the record store.
//!
//! The backup is a full-store textual dump, rewritten in whole after every
//! mutating event (accepted PUT or eviction) and read back once at startup.
//! It is best-effort: a failed save is logged and the in-memory store stays
//! authoritative until the next successful save.

use std::path::{Path, PathBuf};

use crate::node::payload;
use crate::node::store::{RecordStore, WeatherRecord};
use crate::utils::WeathersetError;

use tokio::fs;

/// Handle to the backup target file.
#[derive(Debug, Clone)]
pub struct BackupFile {
    /// Path of the backing file.
    path: PathBuf,
}

impl BackupFile {
    /// Creates a handle to the given backup target path. The file itself is
    /// only touched by `save()`/`load_into()`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        BackupFile { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrites the backup file with one block per current record. Write
    /// failures are logged and swallowed.
    pub async fn save(&self, store: &RecordStore) {
        if let Err(e) = self.try_save(store).await {
            pf_warn!(
                "failed to save backup to '{}': {}",
                self.path.display(),
                e
            );
        }
    }

    async fn try_save(
        &self,
        store: &RecordStore,
    ) -> Result<(), WeathersetError> {
        let mut dump = String::new();
        for (_, record) in store.snapshot() {
            dump.push_str(&format!(
                "BEGIN_ENTRY\ndata = {};\nlamport = {};\nlast_update = {};\nEND_ENTRY\n\n",
                record.payload, record.lamport, record.last_update
            ));
        }

        fs::write(&self.path, dump).await?;
        pf_debug!("saved {} records to backup", store.len());
        Ok(())
    }

    /// Repopulates a store from the backup file. Corrupt individual entries
    /// are dropped with a warning; a missing or unreadable file yields no
    /// records at all. Never fails: startup proceeds with whatever (possibly
    /// zero) records could be recovered. Returns the number of records
    /// loaded.
    pub async fn load_into(&self, store: &RecordStore) -> usize {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                pf_warn!(
                    "no usable backup at '{}': {}",
                    self.path.display(),
                    e
                );
                return 0;
            }
        };

        let mut loaded = 0;
        let mut block = String::new();
        let mut in_entry = false;
        for line in raw.lines() {
            let line = line.trim();
            if line == "BEGIN_ENTRY" {
                in_entry = true;
                block.clear();
            } else if line == "END_ENTRY" {
                in_entry = false;
                match Self::parse_entry(&block) {
                    Ok((id, record)) => {
                        store.put(id, record);
                        loaded += 1;
                    }
                    Err(e) => {
                        pf_warn!("dropping corrupt backup entry: {}", e);
                    }
                }
            } else if in_entry {
                block.push_str(line);
                block.push('\n');
            }
        }

        loaded
    }

    /// Parses one `BEGIN_ENTRY`..`END_ENTRY` block body (lines pre-trimmed
    /// and newline-joined) into a keyed record. An absent/zero/empty `data`,
    /// `lamport`, or `last_update` field makes the entry invalid.
    fn parse_entry(
        block: &str,
    ) -> Result<(String, WeatherRecord), WeathersetError> {
        let mut data = String::new();
        let mut lamport: i64 = 0;
        let mut last_update: i64 = 0;

        for field in block.split(";\n") {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_end_matches(';');
            match key.trim() {
                "data" => data = value.into(),
                "lamport" => lamport = value.parse()?,
                "last_update" => last_update = value.parse()?,
                _ => {}
            }
        }

        if data.is_empty() || lamport == 0 || last_update == 0 {
            return Err(WeathersetError::msg("incomplete backup entry"));
        }

        // line-trimming above loses payload indentation; re-render the
        // parsed fields to recover the canonical form
        let fields = payload::parse(&data)?;
        let id = fields
            .iter()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                WeathersetError::msg("no 'id' field in backup entry payload")
            })?;

        Ok((
            id,
            WeatherRecord {
                payload: payload::render(&fields),
                lamport,
                last_update,
            },
        ))
    }
}
