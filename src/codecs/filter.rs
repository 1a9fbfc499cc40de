// SPDX-License-Identifier: Apache-2.0

//! Filter codec: only lines matching one of the patterns are emitted.
//!
//! Dropped lines are still consumed, so the resume offset advances past
//! every line whether or not it was emitted.

use regex::{Regex, RegexSet};

use super::stats::{CodecStats, Snapshot};
use super::traits::{Codec, CodecFactory, EventCallback};
use crate::config::OptionMap;
use crate::error::{Error, Result};

pub const FILTER_CODEC_NAME: &str = "filter";

#[derive(Debug, Clone)]
pub struct FilterCodecFactory {
    patterns: RegexSet,
    negate: bool,
}

impl FilterCodecFactory {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = RegexSet::new(patterns)
            .map_err(|e| Error::Config(format!("invalid filter pattern: {}", e)))?;
        Ok(Self {
            patterns,
            negate: false,
        })
    }

    pub fn with_negate(mut self, negate: bool) -> Self {
        self.negate = negate;
        self
    }

    pub fn from_options(options: &mut OptionMap) -> Result<Box<dyn CodecFactory>> {
        let patterns = options.take_string_list("patterns")?;
        let patterns = options.require("patterns", patterns)?;
        if patterns.is_empty() {
            return Err(Error::Config(format!(
                "Option {} must contain at least one pattern",
                options.key_path("patterns")
            )));
        }

        // Compile individually so the error names the offending entry
        for (i, pattern) in patterns.iter().enumerate() {
            if let Err(e) = Regex::new(pattern) {
                return Err(Error::Config(format!(
                    "Option {}[{}] is not a valid regular expression: {}",
                    options.key_path("patterns"),
                    i,
                    e
                )));
            }
        }

        let negate = options.take_bool("negate")?.unwrap_or(false);

        Ok(Box::new(Self::new(&patterns)?.with_negate(negate)))
    }
}

impl CodecFactory for FilterCodecFactory {
    fn name(&self) -> &str {
        FILTER_CODEC_NAME
    }

    fn new_codec(&self, callback: EventCallback, offset: u64) -> Box<dyn Codec> {
        Box::new(FilterCodec {
            patterns: self.patterns.clone(),
            negate: self.negate,
            callback,
            last_offset: offset,
            lines_filtered: 0,
            lines_emitted: 0,
            stats: CodecStats::new(),
        })
    }
}

pub struct FilterCodec {
    patterns: RegexSet,
    negate: bool,
    callback: EventCallback,
    last_offset: u64,
    lines_filtered: u64,
    lines_emitted: u64,
    stats: CodecStats,
}

impl Codec for FilterCodec {
    fn event(&mut self, start_offset: u64, end_offset: u64, text: String) {
        self.last_offset = end_offset;

        if self.patterns.is_match(&text) == self.negate {
            self.lines_filtered += 1;
            return;
        }

        self.lines_emitted += 1;
        (self.callback)(start_offset, end_offset, text);
    }

    fn teardown(&mut self) -> u64 {
        self.last_offset
    }

    fn reset(&mut self) {
        self.last_offset = 0;
    }

    fn meter(&mut self) {
        self.stats.publish(
            Snapshot::new(FILTER_CODEC_NAME)
                .with_entry("lines_filtered", self.lines_filtered)
                .with_entry("lines_emitted", self.lines_emitted),
        );
    }

    fn stats(&self) -> Option<CodecStats> {
        Some(self.stats.clone())
    }
}
