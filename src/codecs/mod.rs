// SPDX-License-Identifier: Apache-2.0

//! Codecs sit between a file tailer and the publisher.
//!
//! A [`CodecFactory`] is built once per configured file group from validated
//! options and creates one [`Codec`] instance per tailed file.

pub mod filter;
pub mod multiline;
pub mod plain;
pub mod registry;
pub mod stats;
pub mod traits;

pub use filter::FilterCodecFactory;
pub use multiline::{MultilineCodecFactory, MultilineWhat};
pub use plain::{PLAIN_CODEC_NAME, PlainCodecFactory};
pub use registry::{CodecRegistry, FactoryConstructor};
pub use stats::{CodecStats, Snapshot};
pub use traits::{Codec, CodecFactory, EventCallback};
