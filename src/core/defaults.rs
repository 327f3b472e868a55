// src/core/defaults.rs

use serde::Deserialize;
use std::{collections::HashMap, fmt};
use thiserror::Error;

/// Represents errors that can occur while loading named defaults.
#[derive(Error, Debug)]
pub enum DefaultsError {
    /// The TOML content could not be parsed.
    #[error("Failed to parse defaults: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// A TOML value accepted as a default. Everything is kept as text and parsed by the
/// target's primitive, like a value typed on the command line.
#[derive(Deserialize)]
#[serde(untagged)]
enum TomlDefault {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl fmt::Display for TomlDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::Boolean(value) => write!(f, "{}", value),
        }
    }
}

/// Named values referenced by `=@name` defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    values: HashMap<String, String>,
}

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a flat TOML table of `name = value` pairs.
    pub fn from_toml_str(content: &str) -> Result<Self, DefaultsError> {
        let table: HashMap<String, TomlDefault> = toml::from_str(content)?;
        log::debug!("Loaded {} named default(s)", table.len());
        Ok(table
            .into_iter()
            .map(|(name, value)| (name, value.to_string()))
            .collect())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(name.into(), value.into())
    }

    /// Adds every entry of `other`, replacing existing ones.
    pub fn merge(&mut self, other: Defaults) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<HashMap<String, String>> for Defaults {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Defaults {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

// MARK: --- UNIT TESTS ---
