// SPDX-License-Identifier: Apache-2.0

//! Versioned snapshot schemas.
//!
//! - v0: legacy format, a map keyed by path with no version field
//! - v1: map keyed by "dev:ino" with human-readable metadata and a version field

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::registrar::state::{FileState, FileStateTable};
use crate::stream::Stream;

/// Current schema version for the persisted snapshot
pub const PERSISTED_STATE_VERSION: u64 = 1;

/// Persisted state for all known files (v1).
///
/// The map is ordered so that writing the same table twice produces the same
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedStateV1 {
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default)]
    pub files: BTreeMap<String, PersistedFileEntryV1>,
}

fn default_version() -> u64 {
    PERSISTED_STATE_VERSION
}

impl Default for PersistedStateV1 {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            files: BTreeMap::new(),
        }
    }
}

/// Persisted state for a single file (v1)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedFileEntryV1 {
    // Human-readable metadata
    /// Last known path to the file
    pub path: String,
    /// Last known filename
    pub filename: String,

    // Identity, falling back to the map key when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ino: Option<u64>,

    /// Resume offset
    pub offset: u64,
}

impl PersistedFileEntryV1 {
    /// Identity recorded in the entry itself, if complete.
    pub fn stream(&self) -> Option<Stream> {
        Some(Stream::new(self.dev?, self.ino?))
    }
}

/// Legacy entry (v0), keyed by path in the enclosing map.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistedFileStateV0 {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub offset: u64,
    pub inode: u64,
    pub device: u64,
}

impl PersistedStateV1 {
    pub fn from_table(table: &FileStateTable) -> Self {
        let files = table
            .iter()
            .map(|(stream, state)| {
                let entry = PersistedFileEntryV1 {
                    path: state.source.clone(),
                    filename: state.filename(),
                    dev: Some(stream.dev()),
                    ino: Some(stream.ino()),
                    offset: state.offset,
                };
                (stream.key(), entry)
            })
            .collect();

        Self {
            version: PERSISTED_STATE_VERSION,
            files,
        }
    }

    /// Identity comes from the entry's `dev`/`ino` fields, or from the
    /// "dev:ino" map key when they are missing. Entries with neither are
    /// dropped.
    pub fn into_table(self) -> FileStateTable {
        self.files
            .into_iter()
            .filter_map(|(key, entry)| {
                let stream = match entry.stream() {
                    Some(stream) => stream,
                    None => match key.parse::<Stream>() {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!(
                                key = key.as_str(),
                                path = entry.path.as_str(),
                                error = e.as_str(),
                                "Dropping snapshot entry without a usable identity"
                            );
                            return None;
                        }
                    },
                };
                Some((stream, FileState::new(entry.path, entry.offset)))
            })
            .collect()
    }

    fn from_v0(legacy: BTreeMap<String, PersistedFileStateV0>) -> Self {
        let files = legacy
            .into_iter()
            .map(|(path, entry)| {
                let source = if entry.source.is_empty() {
                    path
                } else {
                    entry.source
                };
                let stream = Stream::new(entry.device, entry.inode);
                let state = FileState::new(source, entry.offset);
                let entry = PersistedFileEntryV1 {
                    filename: state.filename(),
                    path: state.source,
                    dev: Some(stream.dev()),
                    ino: Some(stream.ino()),
                    offset: state.offset,
                };
                (stream.key(), entry)
            })
            .collect();

        Self {
            version: PERSISTED_STATE_VERSION,
            files,
        }
    }
}

/// Decode a snapshot of any supported version into the current schema.
pub fn decode(bytes: &[u8]) -> Result<PersistedStateV1> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(map) = &value else {
        return Err(Error::Persistence(
            "snapshot is not a JSON object".to_string(),
        ));
    };

    match map.get("version") {
        Some(Value::Number(version)) => {
            let version = version.as_u64().unwrap_or(u64::MAX);
            if version > PERSISTED_STATE_VERSION {
                warn!(
                    version,
                    supported = PERSISTED_STATE_VERSION,
                    "Snapshot was written by a newer version, reading it best-effort"
                );
            }
            let mut state: PersistedStateV1 = serde_json::from_value(value)?;
            state.version = PERSISTED_STATE_VERSION;
            Ok(state)
        }
        Some(_) => Err(Error::Persistence(
            "snapshot version is not a number".to_string(),
        )),
        None => {
            let legacy: BTreeMap<String, PersistedFileStateV0> = serde_json::from_value(value)
                .map_err(|e| Error::Persistence(format!("unrecognised snapshot format: {}", e)))?;
            info!(files = legacy.len(), "Migrating legacy snapshot to version 1");
            Ok(PersistedStateV1::from_v0(legacy))
        }
    }
}
