// SPDX-License-Identifier: Apache-2.0

use std::collections::hash_map::Iter;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::stream::Stream;

/// Upper bound on remembered deletions. Oldest tombstones are forgotten first.
const MAX_TOMBSTONES: usize = 4096;

/// Registrar bookkeeping for one known stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    /// Last known path of the file
    pub source: String,
    /// Last offset safe to resume from
    pub offset: u64,
}

impl FileState {
    pub fn new(source: impl Into<String>, offset: u64) -> Self {
        Self {
            source: source.into(),
            offset,
        }
    }

    /// Final path component of `source`, or empty if there is none.
    pub fn filename(&self) -> String {
        Path::new(&self.source)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// The registrar's state: every known stream and its [`FileState`].
///
/// Outside the crate the table is read only. Mutation goes through
/// [`RegistrarEvent::process`](super::RegistrarEvent::process).
#[derive(Debug, Clone, Default)]
pub struct FileStateTable {
    files: HashMap<Stream, FileState>,
    /// Streams removed by a deletion event, kept in memory only
    tombstones: HashSet<Stream>,
    tombstone_order: VecDeque<Stream>,
}

impl FileStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stream: &Stream) -> Option<&FileState> {
        self.files.get(stream)
    }

    pub fn contains(&self, stream: &Stream) -> bool {
        self.files.contains_key(stream)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, Stream, FileState> {
        self.files.iter()
    }

    /// Whether `stream` was deleted during this run and not rediscovered since.
    pub fn is_tombstoned(&self, stream: &Stream) -> bool {
        self.tombstones.contains(stream)
    }

    pub(crate) fn get_mut(&mut self, stream: &Stream) -> Option<&mut FileState> {
        self.files.get_mut(stream)
    }

    pub(crate) fn insert(&mut self, stream: Stream, state: FileState) {
        if self.tombstones.remove(&stream) {
            self.tombstone_order.retain(|s| s != &stream);
        }
        self.files.insert(stream, state);
    }

    pub(crate) fn remove(&mut self, stream: &Stream) -> Option<FileState> {
        let removed = self.files.remove(stream)?;

        if self.tombstones.insert(*stream) {
            self.tombstone_order.push_back(*stream);
            if self.tombstone_order.len() > MAX_TOMBSTONES {
                if let Some(oldest) = self.tombstone_order.pop_front() {
                    self.tombstones.remove(&oldest);
                }
            }
        }

        Some(removed)
    }
}

impl FromIterator<(Stream, FileState)> for FileStateTable {
    fn from_iter<I: IntoIterator<Item = (Stream, FileState)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
            ..Default::default()
        }
    }
}

/// Two tables are equal when they track the same files. Tombstones are
/// transient and not compared.
impl PartialEq for FileStateTable {
    fn eq(&self, other: &Self) -> bool {
        self.files == other.files
    }
}

impl Eq for FileStateTable {}
