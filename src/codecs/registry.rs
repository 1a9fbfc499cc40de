// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::filter::{FILTER_CODEC_NAME, FilterCodecFactory};
use super::multiline::{MULTILINE_CODEC_NAME, MultilineCodecFactory};
use super::plain::{PLAIN_CODEC_NAME, PlainCodecFactory};
use super::traits::CodecFactory;
use crate::config::OptionMap;
use crate::error::{Error, Result};

/// Validates a codec's options and builds its factory.
pub type FactoryConstructor = fn(&mut OptionMap) -> Result<Box<dyn CodecFactory>>;

/// Name to constructor lookup for codecs.
///
/// Populated once during startup before any configuration is parsed, then
/// only read.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    constructors: HashMap<String, FactoryConstructor>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in codecs.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PLAIN_CODEC_NAME, PlainCodecFactory::from_options);
        registry.register(MULTILINE_CODEC_NAME, MultilineCodecFactory::from_options);
        registry.register(FILTER_CODEC_NAME, FilterCodecFactory::from_options);
        registry
    }

    /// Register a constructor. A later registration under the same name
    /// replaces the earlier one.
    pub fn register(&mut self, name: impl Into<String>, constructor: FactoryConstructor) {
        let name = name.into();
        if self.constructors.insert(name.clone(), constructor).is_some() {
            debug!(codec = name.as_str(), "Replacing registered codec");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a factory for `name`. Every option must be consumed by the
    /// constructor; leftovers are reported as configuration errors.
    pub fn build(&self, name: &str, mut options: OptionMap) -> Result<Arc<dyn CodecFactory>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| Error::UnknownCodec(name.to_string()))?;

        let factory = constructor(&mut options)?;
        options.report_unused()?;

        Ok(Arc::from(factory))
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.names())
            .finish()
    }
}
