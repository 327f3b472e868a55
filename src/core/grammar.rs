// src/core/grammar.rs

//! Parses one-line definitions of the form `"<syntax> { <mapping> }"`.
//!
//! The syntax clause declares sources (`-option`, `-option=default`, `-option=@name:fallback`,
//! `positional`, `rest*`), the mapping clause says where mapped sources go
//! (`field=source`, `method(source)`, `method*(source)`) and may override the
//! command method with a bare token.

use crate::{
    constants::{
        ESCAPE_MARKER, FALLBACK_SEPARATOR, INDIRECTION_MARKER, MAPPING_CLOSE, MAPPING_OPEN,
        UNBOUNDED_MARKER,
    },
    errors::DefinitionError,
    models::{
        Cardinality, DefaultPolicy, Definition, Destination, Mapping, MappingEntry, SourceSpec,
    },
};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // `-name`, `-name*`, `-name=default`, `name`, `name*`
    static ref SOURCE_TOKEN_RE: Regex =
        Regex::new(r"^(-)?([^-=*][^=*]*)(\*)?(?:=(.*))?$").expect("source token regex");
    // `field=source`
    static ref FIELD_MAPPING_RE: Regex =
        Regex::new(r"^([^=()]+)=([^=()]+)$").expect("field mapping regex");
    // `method(source)`, `method*(source)`
    static ref METHOD_MAPPING_RE: Regex =
        Regex::new(r"^([^=()]+)\(([^=()]+)\)$").expect("method mapping regex");
}

type GrammarResult<T> = Result<T, DefinitionError>;

fn invalid(msg: impl Into<String>) -> DefinitionError {
    DefinitionError::InvalidDefinition(msg.into())
}

/// Parses a complete definition string.
pub fn parse_definition(definition: &str) -> GrammarResult<Definition> {
    let (syntax, mapping) = split_definition(definition)?;
    let sources = parse_sources(syntax)?;
    let mapping = parse_mapping(mapping, &sources)?;
    log::trace!(
        "Parsed definition '{}': {} source(s), {} mapping(s)",
        definition,
        sources.len(),
        mapping.entries().len()
    );
    Ok(Definition { sources, mapping })
}

/// Splits a definition into its syntax clause and its mapping clause (without braces).
pub fn split_definition(definition: &str) -> GrammarResult<(&str, &str)> {
    let Some(open) = definition.find(MAPPING_OPEN) else {
        if definition.contains(MAPPING_CLOSE) {
            return Err(invalid(format!("unbalanced '}}': {}", definition)));
        }
        return Ok((definition.trim(), ""));
    };

    let inner = definition
        .trim_end()
        .strip_suffix(MAPPING_CLOSE)
        .ok_or_else(|| invalid(format!("missing closing '}}': {}", definition)))?;
    let syntax = definition.get(..open).unwrap_or_default();
    let mapping = inner
        .get(open + MAPPING_OPEN.len_utf8()..)
        .ok_or_else(|| invalid(format!("missing closing '}}': {}", definition)))?;

    if mapping.contains(MAPPING_OPEN) || mapping.contains(MAPPING_CLOSE) {
        return Err(invalid(format!("nested braces: {}", definition)));
    }
    Ok((syntax.trim(), mapping.trim()))
}

/// Splits a clause into whitespace separated tokens.
pub fn split_tokens(clause: &str) -> Vec<&str> {
    clause.split_whitespace().collect()
}

/// Decodes `§XX` escapes (two hex digits) into the character they denote.
pub fn decode_escapes(token: &str) -> GrammarResult<String> {
    if !token.contains(ESCAPE_MARKER) {
        return Ok(token.to_string());
    }
    let mut result = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE_MARKER {
            result.push(c);
            continue;
        }
        let hex: String = chars.by_ref().take(2).collect();
        let decoded = (hex.len() == 2)
            .then(|| u32::from_str_radix(&hex, 16).ok())
            .flatten()
            .and_then(char::from_u32)
            .ok_or_else(|| invalid(format!("invalid escape '{}{}' in {}", ESCAPE_MARKER, hex, token)))?;
        result.push(decoded);
    }
    Ok(result)
}

// --- SYNTAX CLAUSE ---

/// Parses the syntax clause into source declarations, in declaration order.
pub fn parse_sources(syntax: &str) -> GrammarResult<Vec<SourceSpec>> {
    let mut sources: Vec<SourceSpec> = Vec::new();
    for token in split_tokens(syntax) {
        let source = parse_source(token)?;
        if sources.iter().any(|s| s.name == source.name) {
            return Err(invalid(format!("duplicate argument: {}", source.name)));
        }
        sources.push(source);
    }

    let mut positionals = sources.iter().filter(|s| !s.option).peekable();
    while let Some(source) = positionals.next() {
        if source.cardinality.is_unbounded() && positionals.peek().is_some() {
            return Err(invalid(format!(
                "only the last positional may be unbounded: {}",
                source.name
            )));
        }
    }
    Ok(sources)
}

/// Parses a single source token such as `-name=@key:fallback` or `rest*`.
pub fn parse_source(token: &str) -> GrammarResult<SourceSpec> {
    let caps = SOURCE_TOKEN_RE
        .captures(token)
        .ok_or_else(|| invalid(format!("invalid argument declaration: {}", token)))?;

    let option = caps.get(1).is_some();
    let name = decode_escapes(caps.get(2).map_or("", |m| m.as_str()))?;
    let unbounded = caps.get(3).is_some();
    let default = caps.get(4).map(|m| m.as_str());

    if name.is_empty() {
        return Err(invalid(format!("missing argument name: {}", token)));
    }

    let cardinality = match (option, unbounded) {
        (_, true) => Cardinality::UNBOUNDED,
        (true, false) => Cardinality::OPTIONAL,
        (false, false) => Cardinality::REQUIRED,
    };

    let default = match default {
        None if option || unbounded => DefaultPolicy::Undefined,
        None => DefaultPolicy::Required,
        Some(_) if !option => {
            return Err(invalid(format!(
                "default values are only allowed for options: {}",
                token
            )));
        }
        Some(_) if unbounded => {
            return Err(invalid(format!(
                "default values are not allowed for repeatable options: {}",
                token
            )));
        }
        Some(raw) => parse_default(&name, raw)?,
    };

    Ok(SourceSpec {
        name,
        option,
        cardinality,
        default,
    })
}

fn parse_default(source_name: &str, raw: &str) -> GrammarResult<DefaultPolicy> {
    let Some(indirection) = raw.strip_prefix(INDIRECTION_MARKER) else {
        return Ok(DefaultPolicy::Literal(decode_escapes(raw)?));
    };

    let (name, fallback) = match indirection.split_once(FALLBACK_SEPARATOR) {
        Some((name, fallback)) => (name, Some(decode_escapes(fallback)?)),
        None => (indirection, None),
    };
    let name = if name.is_empty() {
        source_name.to_string()
    } else {
        decode_escapes(name)?
    };
    Ok(DefaultPolicy::Named { name, fallback })
}

// --- MAPPING CLAUSE ---

/// Parses the mapping clause. Every entry must name one of `sources`.
pub fn parse_mapping(clause: &str, sources: &[SourceSpec]) -> GrammarResult<Mapping> {
    let mut mapping = Mapping::default();
    for token in split_tokens(clause) {
        if let Some(caps) = FIELD_MAPPING_RE.captures(token) {
            let left = caps.get(1).map_or("", |m| m.as_str());
            let right = caps.get(2).map_or("", |m| m.as_str());
            let (source, field) = orient(token, left, right, sources)?;
            mapping.insert(MappingEntry {
                source,
                destination: Destination::Field(field),
            })?;
        } else if let Some(caps) = METHOD_MAPPING_RE.captures(token) {
            let outer = caps.get(1).map_or("", |m| m.as_str());
            let inner = caps.get(2).map_or("", |m| m.as_str());
            let iterated = outer.ends_with(UNBOUNDED_MARKER) || inner.ends_with(UNBOUNDED_MARKER);
            let outer = outer.trim_end_matches(UNBOUNDED_MARKER);
            let inner = inner.trim_end_matches(UNBOUNDED_MARKER);
            let (source, method) = orient(token, outer, inner, sources)?;
            let destination = if iterated {
                Destination::IteratedMethod(method)
            } else {
                Destination::Method(method)
            };
            mapping.insert(MappingEntry {
                source,
                destination,
            })?;
        } else if token.contains(['=', '(', ')']) {
            return Err(invalid(format!("invalid mapping: {}", token)));
        } else {
            mapping.set_command(&decode_escapes(token)?)?;
        }
    }
    Ok(mapping)
}

/// Decides which side of a mapping token names the source; returns (source, member).
/// `member(source)` is tried first, `source(member)` second.
fn orient(
    token: &str,
    member: &str,
    source: &str,
    sources: &[SourceSpec],
) -> GrammarResult<(String, String)> {
    let member = decode_escapes(member)?;
    let source = decode_escapes(source)?;
    let declared = |name: &str| sources.iter().any(|s| s.name == name);
    if member.is_empty() || source.is_empty() {
        Err(invalid(format!("invalid mapping: {}", token)))
    } else if declared(&source) {
        Ok((source, member))
    } else if declared(&member) {
        Ok((member, source))
    } else {
        Err(invalid(format!("mapping for unknown argument: {}", token)))
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;

    // --- `split_definition` Tests ---
    #[test]
    fn test_split_without_mapping() {
        assert_eq!(split_definition(" a b ").unwrap(), ("a b", ""));
        assert_eq!(split_definition("").unwrap(), ("", ""));
    }

    #[test]
    fn test_split_with_mapping() {
        assert_eq!(
            split_definition("a -b { b=b run }").unwrap(),
            ("a -b", "b=b run")
        );
        assert_eq!(split_definition("{}").unwrap(), ("", ""));
    }

    #[test]
    fn test_split_missing_close_fails() {
        let err = split_definition("a { b=b").unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidDefinition(_)));
        assert!(split_definition("a } b").is_err());
        assert!(split_definition("a { { } }").is_err());
    }

    #[test]
    fn test_split_tokens_ignores_extra_whitespace() {
        assert!(split_tokens("").is_empty());
        assert!(split_tokens("  ").is_empty());
        assert_eq!(split_tokens(" 1  2 "), vec!["1", "2"]);
    }

    #[test]
    fn test_decode_escapes() {
        assert_eq!(decode_escapes("plain").unwrap(), "plain");
        assert_eq!(decode_escapes("a§20b").unwrap(), "a b");
        assert_eq!(decode_escapes("§7b§7d").unwrap(), "{}");
        assert!(decode_escapes("bad§2").is_err());
        assert!(decode_escapes("bad§zz").is_err());
    }

    // --- Source Tests ---
    #[test]
    fn test_parse_positional_sources() {
        let sources = parse_sources("first second rest*").unwrap();
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0], SourceSpec::positional("first"));
        assert_eq!(sources[2].cardinality, Cardinality::UNBOUNDED);
        assert!(!sources[2].option);
    }

    #[test]
    fn test_parse_option_defaults() {
        let s = parse_source("-flag").unwrap();
        assert!(s.option);
        assert_eq!(s.cardinality, Cardinality::OPTIONAL);
        assert_eq!(s.default, DefaultPolicy::Undefined);

        let s = parse_source("-number=7").unwrap();
        assert_eq!(s.name, "number");
        assert_eq!(s.default, DefaultPolicy::Literal("7".into()));

        let s = parse_source("-msg=hello§20world").unwrap();
        assert_eq!(s.default, DefaultPolicy::Literal("hello world".into()));

        let s = parse_source("-first=@").unwrap();
        assert_eq!(
            s.default,
            DefaultPolicy::Named {
                name: "first".into(),
                fallback: None
            }
        );

        let s = parse_source("-second=@s:bla").unwrap();
        assert_eq!(
            s.default,
            DefaultPolicy::Named {
                name: "s".into(),
                fallback: Some("bla".into())
            }
        );

        let s = parse_source("-third=@:x").unwrap();
        assert_eq!(
            s.default,
            DefaultPolicy::Named {
                name: "third".into(),
                fallback: Some("x".into())
            }
        );
    }

    #[test]
    fn test_parse_repeatable_option() {
        let s = parse_source("-include*").unwrap();
        assert!(s.option);
        assert_eq!(s.cardinality, Cardinality::UNBOUNDED);
        assert!(parse_source("-include*=x").is_err());
    }

    #[test]
    fn test_source_errors() {
        assert!(parse_source("-").is_err());
        assert!(parse_source("first=1").is_err());
        assert!(parse_sources("a a").is_err());
        assert!(parse_sources("-a a").is_err());
        assert!(parse_sources("rest* last").is_err());
        // options after the unbounded positional are fine
        assert!(parse_sources("rest* -v").is_ok());
    }

    // --- Mapping Tests ---
    #[test]
    fn test_parse_mapping_member_first_orientation() {
        let definition =
            parse_definition("-first=@ -second=@s:bla -third=@ { first=first node(second) }")
                .unwrap();
        assert_eq!(
            definition.mapping.get("second"),
            Some(&Destination::Method("node".into()))
        );
        assert_eq!(
            definition.mapping.get("first"),
            Some(&Destination::Field("first".into()))
        );
        assert!(!definition.mapping.contains("third"));
    }

    #[test]
    fn test_parse_mapping_iterated() {
        let definition = parse_definition(
            "first second third remaining* { second=second third(third) remaining*(remaining) }",
        )
        .unwrap();
        assert_eq!(
            definition.mapping.get("remaining"),
            Some(&Destination::IteratedMethod("remaining".into()))
        );
        assert_eq!(
            definition.mapping.get("third"),
            Some(&Destination::Method("third".into()))
        );

        let definition = parse_definition("items* { items(add*) }").unwrap();
        assert_eq!(
            definition.mapping.get("items"),
            Some(&Destination::IteratedMethod("add".into()))
        );
    }

    #[test]
    fn test_parse_mapping_source_first_orientation() {
        let definition = parse_definition("-v -e { v=verbose setStacktraces(e) }").unwrap();
        assert_eq!(
            definition.mapping.get("v"),
            Some(&Destination::Field("verbose".into()))
        );
        assert_eq!(
            definition.mapping.get("e"),
            Some(&Destination::Method("setStacktraces".into()))
        );
    }

    #[test]
    fn test_parse_mapping_command_override() {
        let definition = parse_definition("a { invoke }").unwrap();
        assert_eq!(definition.mapping.command(), Some("invoke"));
        assert!(parse_definition("a { one two }").is_err());
    }

    #[test]
    fn test_parse_mapping_errors() {
        assert!(parse_definition("a { x=y }").is_err());
        assert!(parse_definition("a { f(a) g(a) }").is_err());
        assert!(parse_definition("a { f(a }").is_err());
    }
}
