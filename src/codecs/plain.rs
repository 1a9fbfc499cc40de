// SPDX-License-Identifier: Apache-2.0

use super::traits::{Codec, CodecFactory, EventCallback};
use crate::config::OptionMap;
use crate::error::Result;

pub const PLAIN_CODEC_NAME: &str = "plain";

/// Pass-through codec: every line is one event.
#[derive(Debug, Default)]
pub struct PlainCodecFactory;

impl PlainCodecFactory {
    /// The plain codec takes no options; anything given is left for the
    /// registry to report as unused.
    pub fn from_options(_options: &mut OptionMap) -> Result<Box<dyn CodecFactory>> {
        Ok(Box::new(Self))
    }
}

impl CodecFactory for PlainCodecFactory {
    fn name(&self) -> &str {
        PLAIN_CODEC_NAME
    }

    fn new_codec(&self, callback: EventCallback, offset: u64) -> Box<dyn Codec> {
        Box::new(PlainCodec {
            last_offset: offset,
            callback,
        })
    }
}

pub struct PlainCodec {
    last_offset: u64,
    callback: EventCallback,
}

impl Codec for PlainCodec {
    fn event(&mut self, start_offset: u64, end_offset: u64, text: String) {
        self.last_offset = end_offset;
        (self.callback)(start_offset, end_offset, text);
    }

    fn teardown(&mut self) -> u64 {
        self.last_offset
    }

    fn reset(&mut self) {
        self.last_offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Emitted = Arc<Mutex<Vec<(u64, u64, String)>>>;

    fn collecting_codec(offset: u64) -> (Box<dyn Codec>, Emitted) {
        let emitted: Emitted = Arc::new(Mutex::new(Vec::new()));
        let sink = emitted.clone();
        let codec = PlainCodecFactory.new_codec(
            Box::new(move |start, end, text| sink.lock().unwrap().push((start, end, text))),
            offset,
        );
        (codec, emitted)
    }

    #[test]
    fn test_two_lines_emit_two_events() {
        let (mut codec, emitted) = collecting_codec(0);

        codec.event(0, 10, "hello".to_string());
        codec.event(10, 21, "world!".to_string());

        assert_eq!(
            *emitted.lock().unwrap(),
            vec![
                (0, 10, "hello".to_string()),
                (10, 21, "world!".to_string())
            ]
        );
        assert_eq!(codec.teardown(), 21);
    }

    #[test]
    fn test_teardown_returns_last_end_offset() {
        let (mut codec, _) = collecting_codec(0);
        let mut start = 0;
        for len in [5u64, 17, 1, 40] {
            codec.event(start, start + len, "x".repeat(len as usize - 1));
            start += len;
        }
        assert_eq!(codec.teardown(), 63);
    }

    #[test]
    fn test_resume_offset_without_events() {
        let (mut codec, emitted) = collecting_codec(4096);
        assert_eq!(codec.teardown(), 4096);
        assert!(emitted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reset_returns_to_zero() {
        let (mut codec, emitted) = collecting_codec(100);
        codec.event(100, 120, "line".to_string());
        codec.reset();

        assert_eq!(codec.teardown(), 0);
        assert_eq!(emitted.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_no_statistics() {
        let (mut codec, _) = collecting_codec(0);
        codec.meter();
        assert!(codec.stats().is_none());
        assert!(codec.snapshot().is_none());
    }
}
