// SPDX-License-Identifier: Apache-2.0

//! Runtime statistics shared between a codec and administrative readers.
//!
//! The worker that owns a codec is the only writer: it computes figures in
//! `Codec::meter` and publishes them here. Readers on other tasks take a
//! point-in-time copy without touching the codec itself.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Point-in-time view of a codec's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    name: String,
    entries: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }
}

/// Cloneable handle to the latest published [`Snapshot`].
#[derive(Debug, Clone, Default)]
pub struct CodecStats {
    inner: Arc<RwLock<Option<Snapshot>>>,
}

impl CodecStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published snapshot. Called from the owning worker only.
    pub fn publish(&self, snapshot: Snapshot) {
        // A poisoned lock leaves readers with no statistics; event flow is unaffected
        if let Ok(mut current) = self.inner.write() {
            *current = Some(snapshot);
        }
    }

    /// Latest published snapshot, or None if nothing was published or the
    /// statistics could not be read.
    pub fn read(&self) -> Option<Snapshot> {
        self.inner.read().ok().and_then(|current| current.clone())
    }
}
