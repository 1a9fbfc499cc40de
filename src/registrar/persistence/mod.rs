// SPDX-License-Identifier: Apache-2.0

mod schema;
mod snapshot_file;

pub use schema::{
    PERSISTED_STATE_VERSION, PersistedFileEntryV1, PersistedFileStateV0, PersistedStateV1, decode,
};
pub use snapshot_file::SnapshotFile;
