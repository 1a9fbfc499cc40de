// SPDX-License-Identifier: Apache-2.0

use super::stats::{CodecStats, Snapshot};

/// Receives logical events as `(start_offset, end_offset, text)`.
///
/// Invoked inline from [`Codec::event`] (or [`Codec::meter`] for time based
/// flushes) on the worker's thread, in byte-range order.
pub type EventCallback = Box<dyn FnMut(u64, u64, String) + Send>;

/// One codec instance per tailed file.
///
/// An instance is fed raw lines in file order and emits zero or more logical
/// events through its callback. It tracks the last offset that is safe to
/// resume from: a line only moves that offset once it is part of an emitted
/// event (or deliberately dropped), never while it is still buffered.
pub trait Codec: Send {
    /// Deliver one raw line spanning `[start_offset, end_offset)`.
    fn event(&mut self, start_offset: u64, end_offset: u64, text: String);

    /// Return the last safe resume offset. Buffered lines are not emitted;
    /// they will be read again when the file is reopened at that offset.
    fn teardown(&mut self) -> u64;

    /// The file was truncated: drop all buffered state and behave as if newly
    /// created at offset 0. Never emits.
    fn reset(&mut self);

    /// Periodic housekeeping on the worker thread (statistics, timeouts).
    fn meter(&mut self) {}

    /// Handle for reading statistics from another task.
    fn stats(&self) -> Option<CodecStats> {
        None
    }

    /// Statistics as of the last `meter` call, None for codecs without any.
    fn snapshot(&self) -> Option<Snapshot> {
        self.stats().and_then(|stats| stats.read())
    }
}

/// Builds [`Codec`] instances from validated configuration. Shared by every
/// worker tailing files configured with the same codec.
pub trait CodecFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Construct an instance whose resume offset starts at `offset`.
    fn new_codec(&self, callback: EventCallback, offset: u64) -> Box<dyn Codec>;
}
