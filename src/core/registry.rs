// src/core/registry.rs

use crate::core::class::{AnyBox, Class, TypeInfo};
use crate::errors::DefinitionError;
use std::{collections::HashMap, convert::Infallible, fmt, path::PathBuf, rc::Rc};

type ParseFn = dyn Fn(&str) -> Result<AnyBox, String>;
type DefaultFn = dyn Fn() -> AnyBox;

/// A type that can be parsed from a single command line token.
pub struct Primitive {
    info: TypeInfo,
    expected: String,
    default: Box<DefaultFn>,
    parse: Box<ParseFn>,
}

impl Primitive {
    pub fn new<T, F, E>(expected: impl Into<String>, default: T, parse: F) -> Self
    where
        T: Clone + 'static,
        F: Fn(&str) -> Result<T, E> + 'static,
        E: fmt::Display,
    {
        Self {
            info: TypeInfo::of::<T>(),
            expected: expected.into(),
            default: Box::new(move || Box::new(default.clone()) as AnyBox),
            parse: Box::new(move |text| {
                parse(text)
                    .map(|value| Box::new(value) as AnyBox)
                    .map_err(|e| e.to_string())
            }),
        }
    }

    pub fn type_info(&self) -> TypeInfo {
        self.info
    }

    /// Human readable description of the accepted input, used in error messages.
    pub fn expected(&self) -> &str {
        &self.expected
    }

    pub fn default_value(&self) -> AnyBox {
        (self.default)()
    }

    pub fn parse(&self, text: &str) -> Result<AnyBox, String> {
        (self.parse)(text)
    }

    pub fn is_boolean(&self) -> bool {
        self.info == TypeInfo::of::<bool>()
    }
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primitive")
            .field("type", &self.info)
            .field("expected", &self.expected)
            .finish()
    }
}

/// Lowercases and replaces `_` with `-`, the spelling enum values are matched in.
pub fn normalize_enum_name(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

/// `'a'`, `'a' or 'b'`, `'a', 'b' or 'c'`
fn enum_expected(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|name| format!("'{}'", name)).collect();
    match quoted.split_last() {
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} or {}", rest.join(", "), last),
        None => String::new(),
    }
}

fn parse_bool(text: &str) -> Result<bool, String> {
    if text.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if text.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(format!("not a boolean: {}", text))
    }
}

fn parse_char(text: &str) -> Result<char, String> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(format!("not a single character: {}", text)),
    }
}

/// The type registry: primitives by type, plus the classes that produce scope instances.
#[derive(Debug)]
pub struct Repository {
    primitives: HashMap<TypeInfo, Rc<Primitive>>,
    classes: HashMap<TypeInfo, Rc<Class>>,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    /// A repository with the built-in primitives.
    pub fn new() -> Self {
        let mut repository = Self::empty();
        repository
            .register("string", String::new(), |s| Ok::<_, Infallible>(s.to_string()))
            .register("integer", 0_i32, |s| s.parse::<i32>())
            .register("long integer", 0_i64, |s| s.parse::<i64>())
            .register("unsigned integer", 0_u32, |s| s.parse::<u32>())
            .register("unsigned integer", 0_u64, |s| s.parse::<u64>())
            .register("unsigned integer", 0_usize, |s| s.parse::<usize>())
            .register("float number", 0_f32, |s| s.parse::<f32>())
            .register("double", 0_f64, |s| s.parse::<f64>())
            .register("'true' or 'false'", false, parse_bool)
            .register("single character", ' ', parse_char)
            .register("file name", PathBuf::from("."), |s| {
                Ok::<_, Infallible>(PathBuf::from(s))
            });
        repository
    }

    /// A repository without any primitive.
    pub fn empty() -> Self {
        Self {
            primitives: HashMap::new(),
            classes: HashMap::new(),
        }
    }

    /// Registers (or replaces) the primitive for `T`.
    pub fn register<T, F, E>(
        &mut self,
        expected: impl Into<String>,
        default: T,
        parse: F,
    ) -> &mut Self
    where
        T: Clone + 'static,
        F: Fn(&str) -> Result<T, E> + 'static,
        E: fmt::Display,
    {
        let primitive = Primitive::new(expected, default, parse);
        log::trace!("Registered primitive {:?}", primitive.type_info());
        self.primitives
            .insert(primitive.type_info(), Rc::new(primitive));
        self
    }

    /// Registers an enumeration given as `(name, value)` pairs. Names are matched
    /// case-insensitively with `_` spelled as `-`; the first value is the default.
    pub fn register_enum<T>(&mut self, variants: &[(&str, T)]) -> Result<&mut Self, DefinitionError>
    where
        T: Clone + 'static,
    {
        let Some((_, first)) = variants.first() else {
            return Err(DefinitionError::InvalidDefinition(format!(
                "enumeration {} without values",
                TypeInfo::of::<T>().short_name()
            )));
        };
        let table: Vec<(String, T)> = variants
            .iter()
            .map(|(name, value)| (normalize_enum_name(name), value.clone()))
            .collect();
        let names: Vec<String> = table.iter().map(|(name, _)| name.clone()).collect();
        let expected = enum_expected(&names);
        let parse = move |text: &str| -> Result<T, String> {
            let wanted = normalize_enum_name(text);
            table
                .iter()
                .find(|(name, _)| *name == wanted)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| format!("unknown value: {}", text))
        };
        Ok(self.register(expected, first.clone(), parse))
    }

    pub fn primitive(&self, info: TypeInfo) -> Result<Rc<Primitive>, DefinitionError> {
        self.primitives
            .get(&info)
            .cloned()
            .ok_or_else(|| DefinitionError::UnknownPrimitive(info.name().to_string()))
    }

    pub fn has_primitive(&self, info: TypeInfo) -> bool {
        self.primitives.contains_key(&info)
    }

    /// Registers (or replaces) a class.
    pub fn add_class(&mut self, class: Class) -> &mut Self {
        log::trace!("Registered class {}", class.name());
        self.classes.insert(class.type_info(), Rc::new(class));
        self
    }

    pub fn class(&self, info: TypeInfo) -> Option<Rc<Class>> {
        self.classes.get(&info).cloned()
    }

    pub fn require_class(&self, info: TypeInfo) -> Result<Rc<Class>, DefinitionError> {
        self.class(info)
            .ok_or_else(|| DefinitionError::UnknownClass(info.name().to_string()))
    }
}

// MARK: --- UNIT TESTS ---
