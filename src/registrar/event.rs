// SPDX-License-Identifier: Apache-2.0

use tracing::{debug, error, info, warn};

use super::state::{FileState, FileStateTable};
use crate::stream::Stream;

/// A single state transition submitted by a tailing worker.
///
/// Events are applied in the order they are received and each one is
/// consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrarEvent {
    /// A file was opened, reading from `offset`.
    Discovered {
        stream: Stream,
        source: String,
        offset: u64,
    },
    /// Events up to `offset` were delivered downstream.
    Acknowledged { stream: Stream, offset: u64 },
    /// The file now lives at `source`.
    Renamed { stream: Stream, source: String },
    /// The file shrank and is read again from the start.
    Truncated { stream: Stream },
    /// The file is gone and no longer tracked.
    Deleted { stream: Stream },
}

/// What applying an event did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Nothing to do: unknown stream, or a duplicate that would regress.
    Ignored,
    /// The event breaks the offset invariant and was dropped.
    Rejected,
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

impl RegistrarEvent {
    pub fn stream(&self) -> Stream {
        match self {
            RegistrarEvent::Discovered { stream, .. }
            | RegistrarEvent::Acknowledged { stream, .. }
            | RegistrarEvent::Renamed { stream, .. }
            | RegistrarEvent::Truncated { stream }
            | RegistrarEvent::Deleted { stream } => *stream,
        }
    }

    /// Apply this event to `table`.
    ///
    /// Anomalies are logged and absorbed; nothing here can fail, so one odd
    /// stream never stops the registrar from tracking the others.
    pub fn process(self, table: &mut FileStateTable) -> Outcome {
        match self {
            RegistrarEvent::Discovered {
                stream,
                source,
                offset,
            } => discover(table, stream, source, offset),
            RegistrarEvent::Acknowledged { stream, offset } => {
                update_known(table, stream, "acknowledged", |state| {
                    if offset < state.offset {
                        error!(
                            %stream,
                            source = state.source.as_str(),
                            current = state.offset,
                            offset,
                            "Rejecting acknowledgement that would move the offset backwards"
                        );
                        return Outcome::Rejected;
                    }
                    state.offset = offset;
                    Outcome::Applied
                })
            }
            RegistrarEvent::Renamed { stream, source } => {
                update_known(table, stream, "renamed", |state| {
                    debug!(%stream, from = state.source.as_str(), to = source.as_str(), "Stream renamed");
                    state.source = source;
                    Outcome::Applied
                })
            }
            RegistrarEvent::Truncated { stream } => {
                update_known(table, stream, "truncated", |state| {
                    info!(%stream, source = state.source.as_str(), "Stream truncated, resetting offset");
                    state.offset = 0;
                    Outcome::Applied
                })
            }
            RegistrarEvent::Deleted { stream } => match table.remove(&stream) {
                Some(removed) => {
                    debug!(%stream, source = removed.source.as_str(), "Registrar processing deletion");
                    Outcome::Applied
                }
                None => {
                    if table.is_tombstoned(&stream) {
                        debug!(%stream, "Dropping repeated deletion of stream");
                    } else {
                        warn!(%stream, "Registrar received a deletion event for unknown stream");
                    }
                    Outcome::Ignored
                }
            },
        }
    }
}

/// Run `apply` against the stream's state. Events for streams that are not
/// tracked never create an entry.
fn update_known<F>(table: &mut FileStateTable, stream: Stream, kind: &str, apply: F) -> Outcome
where
    F: FnOnce(&mut FileState) -> Outcome,
{
    if let Some(state) = table.get_mut(&stream) {
        return apply(state);
    }

    if table.is_tombstoned(&stream) {
        debug!(%stream, event = kind, "Dropping event for deleted stream");
    } else {
        warn!(%stream, event = kind, "Registrar received an event for unknown stream");
    }
    Outcome::Ignored
}

fn discover(table: &mut FileStateTable, stream: Stream, source: String, offset: u64) -> Outcome {
    if let Some(state) = table.get_mut(&stream) {
        if offset < state.offset {
            warn!(
                %stream,
                source = source.as_str(),
                current = state.offset,
                offset,
                "Ignoring rediscovery that would move the offset backwards"
            );
            return Outcome::Ignored;
        }
        state.source = source;
        state.offset = offset;
        return Outcome::Applied;
    }

    if table.is_tombstoned(&stream) {
        info!(
            %stream,
            source = source.as_str(),
            offset,
            "Stream discovered again after deletion, tracking as a new file"
        );
    } else {
        debug!(%stream, source = source.as_str(), offset, "Stream discovered");
    }
    table.insert(stream, FileState::new(source, offset));
    Outcome::Applied
}
