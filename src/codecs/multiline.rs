// SPDX-License-Identifier: Apache-2.0

//! Multiline codec: merges consecutive lines into one event.
//!
//! A line "matches" when `pattern.is_match(line) != negate`.
//!
//! - `what = previous`: a matching line belongs to the event before it, so a
//!   non-matching line closes the buffered event and starts a new one.
//! - `what = next`: a matching line is continued by the line after it, so a
//!   non-matching line is the last line of the event.
//!
//! The resume offset only moves when a buffered event is emitted. Buffered
//! lines at teardown are not emitted and will be read again on resume.

use regex::Regex;
use std::time::{Duration, Instant};
use tracing::debug;

use super::stats::{CodecStats, Snapshot};
use super::traits::{Codec, CodecFactory, EventCallback};
use crate::config::OptionMap;
use crate::error::{Error, Result};

pub const MULTILINE_CODEC_NAME: &str = "multiline";

/// Default upper bound on the size of one merged event
pub const DEFAULT_MAX_MULTILINE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MultilineWhat {
    /// Matching lines continue the previous line
    #[default]
    Previous,
    /// Matching lines are continued by the next line
    Next,
}

#[derive(Debug, Clone)]
pub struct MultilineCodecFactory {
    pattern: Regex,
    negate: bool,
    what: MultilineWhat,
    /// Flush a buffered event after this long without new lines (`previous` only)
    previous_timeout: Option<Duration>,
    max_multiline_bytes: usize,
}

impl MultilineCodecFactory {
    pub fn new(pattern: Regex) -> Self {
        Self {
            pattern,
            negate: false,
            what: MultilineWhat::Previous,
            previous_timeout: None,
            max_multiline_bytes: DEFAULT_MAX_MULTILINE_BYTES,
        }
    }

    pub fn with_negate(mut self, negate: bool) -> Self {
        self.negate = negate;
        self
    }

    pub fn with_what(mut self, what: MultilineWhat) -> Self {
        self.what = what;
        self
    }

    pub fn with_previous_timeout(mut self, timeout: Duration) -> Self {
        self.previous_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    pub fn with_max_multiline_bytes(mut self, max: usize) -> Self {
        self.max_multiline_bytes = max;
        self
    }

    pub fn from_options(options: &mut OptionMap) -> Result<Box<dyn CodecFactory>> {
        let pattern = options.take_regex("pattern")?;
        let pattern = options.require("pattern", pattern)?;

        let negate = options.take_bool("negate")?.unwrap_or(false);

        let what = match options.take_string("what")?.as_deref() {
            None | Some("previous") => MultilineWhat::Previous,
            Some("next") => MultilineWhat::Next,
            Some(_) => {
                return Err(Error::Config(format!(
                    "Option {} must be \"previous\" or \"next\"",
                    options.key_path("what")
                )));
            }
        };

        let previous_timeout = options
            .take_duration("previous_timeout")?
            .filter(|t| !t.is_zero());
        if previous_timeout.is_some() && what != MultilineWhat::Previous {
            return Err(Error::Config(format!(
                "Option {} is only valid when what is \"previous\"",
                options.key_path("previous_timeout")
            )));
        }

        let max_multiline_bytes = match options.take_u64("max_multiline_bytes")? {
            None => DEFAULT_MAX_MULTILINE_BYTES,
            Some(0) => {
                return Err(Error::Config(format!(
                    "Option {} must be greater than 0",
                    options.key_path("max_multiline_bytes")
                )));
            }
            Some(max) => usize::try_from(max).unwrap_or(usize::MAX),
        };

        Ok(Box::new(Self {
            pattern,
            negate,
            what,
            previous_timeout,
            max_multiline_bytes,
        }))
    }
}

impl CodecFactory for MultilineCodecFactory {
    fn name(&self) -> &str {
        MULTILINE_CODEC_NAME
    }

    fn new_codec(&self, callback: EventCallback, offset: u64) -> Box<dyn Codec> {
        Box::new(MultilineCodec {
            config: self.clone(),
            callback,
            last_offset: offset,
            buffer: Vec::new(),
            buffer_start: 0,
            buffer_end: 0,
            buffer_bytes: 0,
            last_line_at: None,
            lines_processed: 0,
            events_emitted: 0,
            stats: CodecStats::new(),
        })
    }
}

pub struct MultilineCodec {
    config: MultilineCodecFactory,
    callback: EventCallback,
    /// Resume offset: end of the last emitted event
    last_offset: u64,
    buffer: Vec<String>,
    buffer_start: u64,
    buffer_end: u64,
    /// Size of the buffered lines once joined with newlines
    buffer_bytes: usize,
    last_line_at: Option<Instant>,
    lines_processed: u64,
    events_emitted: u64,
    stats: CodecStats,
}

impl MultilineCodec {
    fn append(&mut self, start_offset: u64, end_offset: u64, text: String) {
        let separator = usize::from(!self.buffer.is_empty());
        if !self.buffer.is_empty()
            && self.buffer_bytes + separator + text.len() > self.config.max_multiline_bytes
        {
            self.flush();
        }

        if self.buffer.is_empty() {
            self.buffer_start = start_offset;
            self.buffer_bytes = text.len();
        } else {
            self.buffer_bytes += 1 + text.len();
        }
        self.buffer_end = end_offset;
        self.buffer.push(text);
        self.last_line_at = Some(Instant::now());

        if self.buffer_bytes >= self.config.max_multiline_bytes {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let text = self.buffer.join("\n");
        self.buffer.clear();
        self.buffer_bytes = 0;
        self.last_line_at = None;
        self.last_offset = self.buffer_end;
        self.events_emitted += 1;

        (self.callback)(self.buffer_start, self.buffer_end, text);
    }
}

impl Codec for MultilineCodec {
    fn event(&mut self, start_offset: u64, end_offset: u64, text: String) {
        self.lines_processed += 1;
        let matched = self.config.pattern.is_match(&text) != self.config.negate;

        match self.config.what {
            MultilineWhat::Previous => {
                if !matched {
                    self.flush();
                }
                self.append(start_offset, end_offset, text);
            }
            MultilineWhat::Next => {
                self.append(start_offset, end_offset, text);
                if !matched {
                    self.flush();
                }
            }
        }
    }

    fn teardown(&mut self) -> u64 {
        self.last_offset
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.buffer_bytes = 0;
        self.last_line_at = None;
        self.last_offset = 0;
    }

    fn meter(&mut self) {
        if let (Some(timeout), Some(last_line_at)) =
            (self.config.previous_timeout, self.last_line_at)
        {
            if last_line_at.elapsed() >= timeout {
                debug!(
                    lines = self.buffer.len(),
                    start = self.buffer_start,
                    "Flushing multiline event after previous_timeout"
                );
                self.flush();
            }
        }

        self.stats.publish(
            Snapshot::new(MULTILINE_CODEC_NAME)
                .with_entry("pending_lines", self.buffer.len() as u64)
                .with_entry("pending_bytes", self.buffer_bytes as u64)
                .with_entry("lines_processed", self.lines_processed)
                .with_entry("events_emitted", self.events_emitted),
        );
    }

    fn stats(&self) -> Option<CodecStats> {
        Some(self.stats.clone())
    }
}
