// src/constants.rs

/// Prefix that marks a source as an option, both in definitions and on the command line.
pub const OPTION_PREFIX: char = '-';

/// Suffix that marks a source (or a mapped method) as unbounded / iterated.
pub const UNBOUNDED_MARKER: char = '*';

/// Separates a source name from its default value, and an option from its inline value.
pub const ASSIGN: char = '=';

/// Introduces a named indirection into the caller-supplied defaults.
pub const INDIRECTION_MARKER: char = '@';

/// Separates the indirection name from its literal fallback (`@name:fallback`).
pub const FALLBACK_SEPARATOR: char = ':';

/// Escape introducer inside definitions: `§20` decodes to a space.
pub const ESCAPE_MARKER: char = '§';

/// Opens the mapping clause of a definition.
pub const MAPPING_OPEN: char = '{';

/// Closes the mapping clause of a definition.
pub const MAPPING_CLOSE: char = '}';

/// A standalone token that forces the switch from option mode to positional mode.
pub const MODE_SWITCH_TOKEN: &str = "\\";

/// Name of the command entry point when the mapping does not override it.
pub const DEFAULT_COMMAND_METHOD: &str = "run";

/// Value synthesized for boolean options given without a value.
pub const IMPLICIT_BOOLEAN_VALUE: &str = "true";
