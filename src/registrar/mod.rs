// SPDX-License-Identifier: Apache-2.0

//! Registrar: owner of the per-file resume state.
//!
//! Workers report file lifecycle and delivery progress as
//! [`RegistrarEvent`]s through a [`RegistrarHandle`]. The [`Registrar`] task
//! applies them in order and persists the resulting [`FileStateTable`] so
//! tailing can resume where it left off after a restart.

mod event;
pub mod persistence;
mod service;
mod spool;
mod state;

pub use event::{Outcome, RegistrarEvent};
pub use service::{Registrar, RegistrarConfig, RegistrarHandle};
pub use spool::EventSpool;
pub use state::{FileState, FileStateTable};
