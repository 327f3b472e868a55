// src/models.rs

use crate::constants::DEFAULT_COMMAND_METHOD;
use crate::errors::DefinitionError;
use std::fmt;

// --- SOURCE MODELS ---
// What a definition declares: the arguments a scope accepts on the command line.

/// How many times a source may occur on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cardinality {
    pub min: usize,
    /// `None` means unbounded ("collect the rest").
    pub max: Option<usize>,
}

impl Cardinality {
    /// A plain positional: exactly one value.
    pub const REQUIRED: Self = Self {
        min: 1,
        max: Some(1),
    };
    /// A plain option: at most one value.
    pub const OPTIONAL: Self = Self {
        min: 0,
        max: Some(1),
    };
    /// A `*` source: any number of values.
    pub const UNBOUNDED: Self = Self { min: 0, max: None };

    pub fn is_unbounded(&self) -> bool {
        self.max.is_none()
    }

    /// True once `count` values fill this source completely.
    pub fn is_full(&self, count: usize) -> bool {
        self.max == Some(count)
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}..*", self.min),
        }
    }
}

/// What a scalar source resolves to when the command line leaves it empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DefaultPolicy {
    /// Positionals without `*`: the cardinality check rejects empty input.
    Required,
    /// No default given: the registry's default value for the target type.
    Undefined,
    /// `=literal`
    Literal(String),
    /// `=@`, `=@name` or `=@name:fallback`, looked up in the caller's defaults.
    Named {
        name: String,
        fallback: Option<String>,
    },
}

/// One declared argument of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceSpec {
    pub name: String,
    pub option: bool,
    pub cardinality: Cardinality,
    pub default: DefaultPolicy,
}

impl SourceSpec {
    /// A required, single-valued positional.
    pub fn positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            option: false,
            cardinality: Cardinality::REQUIRED,
            default: DefaultPolicy::Required,
        }
    }

    /// An optional, single-valued option without default.
    pub fn option(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            option: true,
            cardinality: Cardinality::OPTIONAL,
            default: DefaultPolicy::Undefined,
        }
    }
}

// --- MAPPING MODELS ---
// Where a source ends up. Sources without an entry feed constructor slots.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// `field=source`
    Field(String),
    /// `method(source)`: called once with the whole value.
    Method(String),
    /// `method*(source)`: called once per item.
    IteratedMethod(String),
}

impl Destination {
    pub fn member(&self) -> &str {
        match self {
            Self::Field(name) | Self::Method(name) | Self::IteratedMethod(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingEntry {
    pub source: String,
    pub destination: Destination,
}

/// The mapping clause of a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    entries: Vec<MappingEntry>,
    command: Option<String>,
}

impl Mapping {
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn get(&self, source: &str) -> Option<&Destination> {
        self.entries
            .iter()
            .find(|entry| entry.source == source)
            .map(|entry| &entry.destination)
    }

    pub fn contains(&self, source: &str) -> bool {
        self.get(source).is_some()
    }

    /// The explicit command method override, if any.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn command_or_default(&self) -> &str {
        self.command().unwrap_or(DEFAULT_COMMAND_METHOD)
    }

    pub(crate) fn insert(&mut self, entry: MappingEntry) -> Result<(), DefinitionError> {
        if self.contains(&entry.source) {
            return Err(DefinitionError::InvalidDefinition(format!(
                "duplicate mapping for argument {}",
                entry.source
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub(crate) fn set_command(&mut self, name: &str) -> Result<(), DefinitionError> {
        if let Some(existing) = &self.command {
            return Err(DefinitionError::InvalidDefinition(format!(
                "duplicate command mapping: {} vs {}",
                existing, name
            )));
        }
        self.command = Some(name.to_string());
        Ok(())
    }
}

/// A parsed `"<syntax> { <mapping> }"` definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Definition {
    pub sources: Vec<SourceSpec>,
    pub mapping: Mapping,
}

impl Definition {
    /// Splits the sources into (mapped, unmapped), keeping declaration order in both.
    pub fn partition(&self) -> (Vec<&SourceSpec>, Vec<&SourceSpec>) {
        self.sources
            .iter()
            .partition(|source| self.mapping.contains(&source.name))
    }

    pub fn source(&self, name: &str) -> Option<&SourceSpec> {
        self.sources.iter().find(|source| source.name == name)
    }
}
