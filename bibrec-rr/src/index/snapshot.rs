//! Index snapshot persistence
//!
//! A snapshot stores the canonical records together with the SHA-256 of every
//! source file it was built from. It is reused only when the current hashes
//! equal the stored ones exactly; anything else means a rebuild.

use super::{CanonicalIndex, CanonicalRecord};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// On-disk snapshot document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Source file → hex SHA-256 of its content
    #[serde(rename = "fileHashes")]
    pub file_hashes: BTreeMap<String, String>,
    /// Normalized title → record in JSON database form
    pub bibliographies: Map<String, Value>,
}

impl IndexSnapshot {
    pub fn from_index(file_hashes: BTreeMap<String, String>, index: &CanonicalIndex) -> Self {
        let mut entries: Vec<(&String, &CanonicalRecord)> = index.records().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let bibliographies = entries
            .into_iter()
            .map(|(title, record)| (title.clone(), record.to_value()))
            .collect();
        Self {
            file_hashes,
            bibliographies,
        }
    }

    /// Read a snapshot; unreadable or malformed snapshots count as absent
    pub fn read(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No index snapshot");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed index snapshot");
                None
            }
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Decode into an index, skipping records that no longer decode
    pub fn into_index(self) -> CanonicalIndex {
        let records = self
            .bibliographies
            .into_iter()
            .filter_map(|(title, value)| match CanonicalRecord::from_value(&value) {
                Ok(record) => Some((title, record)),
                Err(e) => {
                    warn!(title = %title, error = %e, "Skipping malformed snapshot record");
                    None
                }
            });
        CanonicalIndex::from_records(records)
    }
}

/// Hex SHA-256 of a file's content
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hashes of every source file, keyed by file name
pub fn hash_files(files: &[PathBuf]) -> Result<BTreeMap<String, String>> {
    files
        .iter()
        .map(|file| {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());
            Ok((name, hash_file(file)?))
        })
        .collect()
}
