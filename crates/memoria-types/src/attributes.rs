//! Typed string-to-string maps used for embedder labels and memory metadata.
//!
//! Free-form maps are validated once at the system boundary
//! ([`AttributeMap::try_from_map`] / deserialization) and then carried around
//! as a typed value, never as untyped JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Maximum number of entries in a single map.
pub const MAX_ENTRIES: usize = 64;
/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 128;
/// Maximum value length in bytes.
pub const MAX_VALUE_LEN: usize = 4096;

/// Why an attribute map was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeError {
    TooManyEntries(usize),
    EmptyKey,
    KeyTooLong(String),
    InvalidKey(String),
    ValueTooLong(String),
}

impl fmt::Display for AttributeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeError::TooManyEntries(n) => {
                write!(f, "too many entries: {n} (max {MAX_ENTRIES})")
            }
            AttributeError::EmptyKey => write!(f, "keys must not be empty"),
            AttributeError::KeyTooLong(k) => write!(f, "key '{k}' exceeds {MAX_KEY_LEN} bytes"),
            AttributeError::InvalidKey(k) => write!(
                f,
                "key '{k}' may only contain ASCII letters, digits, '.', '_', '-' and '/'"
            ),
            AttributeError::ValueTooLong(k) => {
                write!(f, "value for '{k}' exceeds {MAX_VALUE_LEN} bytes")
            }
        }
    }
}

impl std::error::Error for AttributeError {}

/// Validated, ordered string map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AttributeMap(BTreeMap<String, String>);

/// Labels attached to an embedder.
pub type Labels = AttributeMap;

/// Caller-supplied metadata attached to a memory.
pub type Metadata = AttributeMap;

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and wrap a raw map.
    pub fn try_from_map(map: BTreeMap<String, String>) -> Result<Self, AttributeError> {
        if map.len() > MAX_ENTRIES {
            return Err(AttributeError::TooManyEntries(map.len()));
        }
        for (key, value) in &map {
            validate_key(key)?;
            if value.len() > MAX_VALUE_LEN {
                return Err(AttributeError::ValueTooLong(key.clone()));
            }
        }
        Ok(Self(map))
    }

    /// Parse `key=value` pairs (as given on a command line).
    pub fn parse_pairs<'a>(
        pairs: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, AttributeError> {
        let mut map = BTreeMap::new();
        for pair in pairs {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
        Self::try_from_map(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

fn validate_key(key: &str) -> Result<(), AttributeError> {
    if key.is_empty() {
        return Err(AttributeError::EmptyKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(AttributeError::KeyTooLong(key.to_string()));
    }
    let valid = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
    if !valid {
        return Err(AttributeError::InvalidKey(key.to_string()));
    }
    Ok(())
}

impl<'de> Deserialize<'de> for AttributeMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, String>::deserialize(deserializer)?;
        AttributeMap::try_from_map(map).map_err(serde::de::Error::custom)
    }
}
