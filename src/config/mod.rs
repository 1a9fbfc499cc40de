// SPDX-License-Identifier: Apache-2.0

pub mod agent;
pub mod options;

pub use agent::{AgentConfig, CodecConfig, FileGroup, FilesConfig, GeneralConfig};
pub use options::{OptionMap, deser_duration};
