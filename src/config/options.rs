// SPDX-License-Identifier: Apache-2.0

//! Consumption-tracked key/value options.
//!
//! Dynamic sections of the configuration (the options of a codec, for
//! example) are only known to the component that consumes them. An
//! [`OptionMap`] hands each key out once; whatever is left afterwards is an
//! option nobody understood and is reported with its full key path, which is
//! how operator typos surface at startup.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct OptionMap {
    /// Key path prefix used in error messages, e.g. "/files[0]/codec/"
    path: String,
    values: Map<String, Value>,
}

impl OptionMap {
    pub fn new(path: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            path: path.into(),
            values,
        }
    }

    pub fn empty(path: impl Into<String>) -> Self {
        Self::new(path, Map::new())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Full key path for a key in this map.
    pub fn key_path(&self, key: &str) -> String {
        format!("{}{}", self.path, key)
    }

    /// Remove and return a raw value.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn take_string(&mut self, key: &str) -> Result<Option<String>> {
        match self.take(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.invalid(key, "must be a string")),
        }
    }

    pub fn take_bool(&mut self, key: &str) -> Result<Option<bool>> {
        match self.take(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(_) => Err(self.invalid(key, "must be true or false")),
        }
    }

    pub fn take_u64(&mut self, key: &str) -> Result<Option<u64>> {
        match self.take(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_u64() {
                    return Ok(Some(v));
                }
                match n.as_f64() {
                    Some(f) if f.fract() != 0.0 => Err(self.invalid(
                        key,
                        "is not a valid integer (float encountered)",
                    )),
                    Some(f) if f >= 0.0 && f <= u64::MAX as f64 => Ok(Some(f as u64)),
                    _ => Err(self.invalid(key, "is not a valid non-negative integer")),
                }
            }
            Some(_) => Err(self.invalid(key, "is not a valid integer")),
        }
    }

    /// Numbers are seconds; strings are humantime durations ("500ms", "1m 30s").
    pub fn take_duration(&mut self, key: &str) -> Result<Option<Duration>> {
        match self.take(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => duration_from_value(&value)
                .map(Some)
                .map_err(|e| self.invalid(key, &format!("was not understood: {}", e))),
        }
    }

    /// A single string is accepted as a one element list.
    pub fn take_string_list(&mut self, key: &str) -> Result<Option<Vec<String>>> {
        match self.take(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s])),
            Some(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::String(s) => Ok(s),
                    _ => Err(self.invalid(&format!("{}[{}]", key, i), "must be a string")),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(_) => Err(self.invalid(key, "must be an array of strings")),
        }
    }

    pub fn take_regex(&mut self, key: &str) -> Result<Option<Regex>> {
        match self.take_string(key)? {
            None => Ok(None),
            Some(pattern) => Regex::new(&pattern)
                .map(Some)
                .map_err(|e| self.invalid(key, &format!("is not a valid regular expression: {}", e))),
        }
    }

    /// Turn a missing option into an error naming the key.
    pub fn require<T>(&self, key: &str, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| self.invalid(key, "is required"))
    }

    /// Error if any option was left unconsumed.
    pub fn report_unused(&self) -> Result<()> {
        // Map iteration is sorted, so the first reported key is deterministic
        match self.values.keys().next() {
            Some(key) => Err(self.invalid(key, "is not available")),
            None => Ok(()),
        }
    }

    fn invalid(&self, key: &str, reason: &str) -> Error {
        Error::Config(format!("Option {} {}", self.key_path(key), reason))
    }
}

fn duration_from_value(value: &Value) -> std::result::Result<Duration, String> {
    match value {
        Value::Number(n) => {
            let secs = n
                .as_f64()
                .ok_or_else(|| "must be a valid numeric or string duration".to_string())?;
            Duration::try_from_secs_f64(secs)
                .map_err(|_| "must be a valid numeric or string duration".to_string())
        }
        Value::String(s) => humantime::parse_duration(s).map_err(|e| e.to_string()),
        _ => Err("must be a valid numeric or string duration".to_string()),
    }
}

/// Serde helper so typed configuration accepts `5`, `"5s"` or `"1m 30s"`.
pub fn deser_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    duration_from_value(&value).map_err(serde::de::Error::custom)
}
