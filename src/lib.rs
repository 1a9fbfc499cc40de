// SPDX-License-Identifier: Apache-2.0

//! Core of a log shipping agent.
//!
//! - [`codecs`] turn raw line notifications from a tailed file into logical
//!   events while tracking the last offset that is safe to resume from.
//! - [`registrar`] owns the per-file state table, applies lifecycle and
//!   acknowledgement events in order, and persists it crash-safely.

pub mod bounded_channel;
pub mod codecs;
pub mod config;
pub mod error;
pub mod init;
pub mod registrar;
pub mod stream;

pub use error::{Error, Result};
pub use stream::Stream;
