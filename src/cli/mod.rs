// src/cli/mod.rs

//! The `Cli` facade: registers types, builds the scope tree with `begin`/`end`, declares
//! commands and dispatches a command line to one of them.

pub mod command;

use crate::{
    constants::{MAPPING_CLOSE, MAPPING_OPEN},
    core::{
        binder::is_option,
        class::Class,
        context::{Context, Handle},
        defaults::Defaults,
        grammar::{parse_definition, split_definition},
        registry::Repository,
    },
    errors::{ArgumentError, DefinitionError, Result},
};
use command::Command;
use std::{fmt, rc::Rc};

type DefinitionResult<T> = Result<T, DefinitionError>;

/// Syntax and mapping shared by every scope declared after it.
#[derive(Debug)]
struct Base {
    parent: Option<Rc<Base>>,
    syntax: String,
    mapping: String,
}

/// Command line front end.
pub struct Cli {
    repository: Repository,
    defaults: Defaults,
    scopes: Vec<Rc<Context>>,
    base: Option<Rc<Base>>,
    commands: Vec<Command>,
    default_command: Option<usize>,
}

impl Default for Cli {
    fn default() -> Self {
        Self::new()
    }
}

impl Cli {
    /// A front end with the built-in primitives registered.
    pub fn new() -> Self {
        Self::with_repository(Repository::new())
    }

    pub fn with_repository(repository: Repository) -> Self {
        Self {
            repository,
            defaults: Defaults::new(),
            scopes: Vec::new(),
            base: None,
            commands: Vec::new(),
            default_command: None,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn repository_mut(&mut self) -> &mut Repository {
        &mut self.repository
    }

    // --- REGISTRATION ---

    pub fn primitive<T, F, E>(&mut self, expected: impl Into<String>, default: T, parse: F) -> &mut Self
    where
        T: Clone + 'static,
        F: Fn(&str) -> std::result::Result<T, E> + 'static,
        E: fmt::Display,
    {
        self.repository.register(expected, default, parse);
        self
    }

    pub fn enumeration<T: Clone + 'static>(&mut self, variants: &[(&str, T)]) -> DefinitionResult<&mut Self> {
        self.repository.register_enum(variants)?;
        Ok(self)
    }

    pub fn class(&mut self, class: Class) -> &mut Self {
        self.repository.add_class(class);
        self
    }

    /// Merges named values for `=@name` defaults.
    pub fn defaults(&mut self, defaults: impl Into<Defaults>) -> &mut Self {
        self.defaults.merge(defaults.into());
        self
    }

    /// Prepends `definition` to every scope declared from here on, on top of the bases
    /// already in effect.
    pub fn base(&mut self, definition: &str) -> DefinitionResult<&mut Self> {
        parse_definition(&self.with_base(definition)?)?;
        let (syntax, mapping) = split_definition(definition)?;
        self.base = Some(Rc::new(Base {
            parent: self.base.take(),
            syntax: syntax.trim().to_string(),
            mapping: mapping.trim().to_string(),
        }));
        Ok(self)
    }

    // --- SCOPES AND COMMANDS ---

    /// Opens a scope named after the produced type.
    pub fn begin(&mut self, handle: Handle, definition: &str) -> DefinitionResult<&mut Self> {
        self.open(None, handle, definition)
    }

    pub fn begin_named(&mut self, name: &str, handle: Handle, definition: &str) -> DefinitionResult<&mut Self> {
        self.open(Some(name), handle, definition)
    }

    fn open(&mut self, name: Option<&str>, handle: Handle, definition: &str) -> DefinitionResult<&mut Self> {
        let context = self.create_context(name, handle, definition)?;
        self.scopes.push(context);
        Ok(self)
    }

    /// Closes the innermost scope. Bases stay in effect.
    pub fn end(&mut self) -> DefinitionResult<&mut Self> {
        let context = self.scopes.pop().ok_or(DefinitionError::UnbalancedScope)?;
        log::trace!("Closed scope '{}'", context.name());
        Ok(self)
    }

    /// Declares a command: `"<name> <definition>"`.
    pub fn add(&mut self, handle: Handle, definition: &str) -> DefinitionResult<&mut Self> {
        self.add_command(handle, definition)?;
        Ok(self)
    }

    /// Declares the command run when the command line names none.
    pub fn add_default(&mut self, handle: Handle, definition: &str) -> DefinitionResult<&mut Self> {
        let index = self.add_command(handle, definition)?;
        self.default_command = Some(index);
        Ok(self)
    }

    fn add_command(&mut self, handle: Handle, definition: &str) -> DefinitionResult<usize> {
        let definition = definition.trim_start();
        let (name, rest) = definition
            .split_once(char::is_whitespace)
            .unwrap_or((definition, ""));
        if name.is_empty() || name.starts_with(MAPPING_OPEN) {
            return Err(DefinitionError::InvalidDefinition(format!(
                "missing command name: {}",
                definition
            )));
        }
        if self.lookup(name).is_some() {
            return Err(DefinitionError::DuplicateCommand(name.to_string()));
        }
        let context = self.create_context(Some(name), handle, rest)?;
        let command = Command::create(name, context, &self.repository)?;
        log::debug!("Added command '{}'", name);
        self.commands.push(command);
        Ok(self.commands.len() - 1)
    }

    fn create_context(
        &self,
        name: Option<&str>,
        handle: Handle,
        definition: &str,
    ) -> DefinitionResult<Rc<Context>> {
        let definition = self.with_base(definition)?;
        let parent = self.scopes.last().cloned();
        Context::create(parent, &self.repository, name, handle, &definition)
    }

    /// `definition` with the bases in effect prepended, outermost first.
    fn with_base(&self, definition: &str) -> DefinitionResult<String> {
        if self.base.is_none() {
            return Ok(definition.to_string());
        }
        let (syntax, mapping) = split_definition(definition)?;
        let mut bases: Vec<&Base> =
            std::iter::successors(self.base.as_deref(), |base| base.parent.as_deref()).collect();
        bases.reverse();

        let syntax = bases
            .iter()
            .map(|base| base.syntax.as_str())
            .chain([syntax.trim()])
            .filter(|clause| !clause.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let mapping = bases
            .iter()
            .map(|base| base.mapping.as_str())
            .chain([mapping.trim()])
            .filter(|clause| !clause.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(format!("{} {} {} {}", syntax, MAPPING_OPEN, mapping, MAPPING_CLOSE))
    }

    // --- DISPATCH ---

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn lookup(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|command| command.name() == name)
    }

    pub fn get(&self, name: &str) -> Result<&Command, ArgumentError> {
        self.lookup(name)
            .ok_or_else(|| ArgumentError::UnknownCommand(name.to_string()))
    }

    /// Picks the command and runs it with the remaining arguments.
    ///
    /// With a single command no name is consumed. Otherwise the first token that is
    /// not an option names the command; without one the default command runs.
    pub fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<i32> {
        let mut args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let command = match self.commands.as_slice() {
            [only] => only,
            _ => match eat_command(&mut args) {
                Some(name) => self.get(name)?,
                None => self
                    .default_command
                    .and_then(|index| self.commands.get(index))
                    .ok_or(ArgumentError::MissingCommand)?,
            },
        };
        log::debug!("Dispatching to command '{}'", command.name());
        command.run(&self.defaults, &args)
    }
}

impl fmt::Debug for Cli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cli")
            .field("commands", &self.commands)
            .field("open_scopes", &self.scopes.len())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Removes and returns the first token that is not an option.
fn eat_command<'a>(args: &mut Vec<&'a str>) -> Option<&'a str> {
    let index = args.iter().position(|arg| !is_option(arg))?;
    Some(args.remove(index))
}

// MARK: --- UNIT TESTS ---
