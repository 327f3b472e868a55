// src/errors.rs

use thiserror::Error;

/// Errors raised while building the context graph or compiling it.
/// These are programmer errors: the command line definition itself is broken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// The definition string does not follow the grammar.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
    /// No constructor (or factory overload) consumes exactly the available sources.
    #[error("no matching constructor: {type_name}({sources})")]
    NoMatchingConstructor { type_name: String, sources: String },
    #[error("constructor is ambiguous: {type_name}({sources})")]
    AmbiguousConstructor { type_name: String, sources: String },
    /// The same option name is declared twice along a scope chain.
    #[error("duplicate option: {name}")]
    DuplicateOption { name: String },
    /// A mapping names a field or method the producer's type does not register.
    #[error("{kind} not found: {type_name}.{member}")]
    UnknownMappingTarget {
        kind: &'static str,
        type_name: String,
        member: String,
    },
    #[error("unknown primitive: {0}")]
    UnknownPrimitive(String),
    #[error("unknown class: {0}")]
    UnknownClass(String),
    #[error("context not found: {0}")]
    ContextNotFound(String),
    #[error("cannot convert default value of {source_name} to {expected}: '{value}'")]
    InvalidDefault {
        source_name: String,
        expected: String,
        value: String,
    },
    #[error("duplicate command: {0}")]
    DuplicateCommand(String),
    #[error("command method not found: {type_name}.{method}()")]
    CommandMethodNotFound { type_name: String, method: String },
    #[error("end without context")]
    UnbalancedScope,
}

/// Errors caused by the arguments a user typed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("unknown option {0}")]
    UnknownOption(String),
    #[error("missing value for option {0}")]
    MissingValue(String),
    #[error("unknown value(s): {}", .0.join(" "))]
    UnknownValue(Vec<String>),
    #[error("{}", describe_cardinality(.name, .min, .max, .count))]
    Cardinality {
        name: String,
        min: usize,
        max: Option<usize>,
        count: usize,
    },
    #[error("invalid argument {name}: expected {expected}, got '{value}'")]
    InvalidValue {
        name: String,
        expected: String,
        value: String,
    },
    #[error("command not found: {0}")]
    UnknownCommand(String),
    #[error("missing command")]
    MissingCommand,
    /// Raised by user code (factories, setters, commands) to report a usage problem.
    #[error("{0}")]
    Custom(String),
}

impl ArgumentError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

fn describe_cardinality(name: &str, min: &usize, max: &Option<usize>, count: &usize) -> String {
    if count < min {
        if *min == 1 {
            format!("missing value for {}", name)
        } else {
            format!("missing value(s) for {}: expected at least {}, got {}", name, min, count)
        }
    } else {
        format!(
            "too many values for {}: expected at most {}, got {}",
            name,
            max.map_or_else(|| "*".to_string(), |max| max.to_string()),
            count
        )
    }
}

/// Everything `run` can fail with.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    /// Errors from user constructors, factories, setters or commands, passed through unchanged.
    #[error(transparent)]
    Command(#[from] anyhow::Error),
}

impl Error {
    /// The usage error behind this error, if any, including ones raised by user code.
    pub fn as_argument_error(&self) -> Option<&ArgumentError> {
        match self {
            Self::Argument(err) => Some(err),
            Self::Command(err) => err.downcast_ref::<ArgumentError>(),
            Self::Definition(_) => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
