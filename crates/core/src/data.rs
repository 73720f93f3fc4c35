// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed JSON data shared by the state document, changes, and tasks.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors reading or writing keyed data.
#[derive(Debug, Error)]
pub enum DataError {
    /// The key is absent (or holds `null`).
    #[error("no state entry for key {key:?}")]
    NoState { key: String },

    #[error("internal error: could not unmarshal state entry {key:?}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("internal error: could not marshal value for state entry {key:?}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DataError {
    pub fn is_no_state(&self) -> bool {
        matches!(self, DataError::NoState { .. })
    }
}

/// String-keyed map of JSON values with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataBag(BTreeMap<String, Value>);

impl DataBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the value stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, DataError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(DataError::NoState {
                key: key.to_string(),
            }),
            Some(value) => T::deserialize(value).map_err(|source| DataError::Decode {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Store `value` under `key`. Storing a value that encodes to `null`
    /// removes the key.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), DataError> {
        let value = serde_json::to_value(value).map_err(|source| DataError::Encode {
            key: key.to_string(),
            source,
        })?;
        if value.is_null() {
            self.0.remove(key);
        } else {
            self.0.insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Remove `key`, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.0.remove(key).is_some()
    }

    pub fn has(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(v) if !v.is_null())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Move every entry of `other` into this bag, replacing existing keys.
    pub fn extend(&mut self, other: DataBag) {
        self.0.extend(other.0);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[cfg(test)]
#[path = "data_tests.rs"]
mod tests;
