// src/core/binder.rs

//! # Binder
//!
//! Runs a [`CompiledPlan`] against a command line: splits the tokens into option values
//! and positional values, checks every argument's cardinality, resolves values and
//! defaults, then instantiates the scope chain from the root down.

use crate::{
    constants::{ASSIGN, IMPLICIT_BOOLEAN_VALUE, MODE_SWITCH_TOKEN, OPTION_PREFIX},
    core::{
        class::{AnyBox, Shared, Slot, Slots, Value},
        compiler::{ArgRef, Argument, CompiledPlan, Invocation, SlotSource, TargetKind},
        defaults::Defaults,
    },
    errors::{ArgumentError, DefinitionError, Error, Result},
    models::DefaultPolicy,
};
use anyhow::anyhow;
use std::{collections::HashMap, rc::Rc};

/// True for tokens that name an option: a `-` followed by at least one character.
pub fn is_option(token: &str) -> bool {
    token.len() > OPTION_PREFIX.len_utf8() && token.starts_with(OPTION_PREFIX)
}

/// Raw values collected per argument, plus the caller's named defaults.
#[derive(Debug)]
pub struct Actuals<'d> {
    raw: HashMap<ArgRef, Vec<String>>,
    defaults: &'d Defaults,
}

impl<'d> Actuals<'d> {
    pub fn new(defaults: &'d Defaults) -> Self {
        Self {
            raw: HashMap::new(),
            defaults,
        }
    }

    pub fn values(&self, reference: ArgRef) -> &[String] {
        self.raw.get(&reference).map(Vec::as_slice).unwrap_or_default()
    }

    fn add(&mut self, reference: ArgRef, value: String) -> usize {
        let values = self.raw.entry(reference).or_default();
        values.push(value);
        values.len()
    }

    /// Distributes `args` over the plan's options and positionals.
    ///
    /// Options are recognized until the first token that is not one. A standalone `\`
    /// ends option mode and is never stored as a value.
    pub fn fill<S: AsRef<str>>(&mut self, plan: &CompiledPlan, args: &[S]) -> Result<(), ArgumentError> {
        let mut tokens = args.iter().map(AsRef::as_ref);
        let mut in_options = true;
        let mut position = 0;

        while let Some(token) = tokens.next() {
            if in_options && is_option(token) {
                let body = token.get(OPTION_PREFIX.len_utf8()..).unwrap_or_default();
                let (name, inline) = match body.split_once(ASSIGN) {
                    Some((name, value)) => (name, Some(value)),
                    None => (body, None),
                };
                let reference = *plan
                    .options()
                    .get(name)
                    .ok_or_else(|| ArgumentError::UnknownOption(name.to_string()))?;
                let boolean = plan
                    .argument(reference)
                    .is_some_and(|argument| argument.target().is_boolean());
                let value = match inline {
                    Some(value) => value,
                    None if boolean => IMPLICIT_BOOLEAN_VALUE,
                    None => tokens
                        .next()
                        .ok_or_else(|| ArgumentError::MissingValue(name.to_string()))?,
                };
                log::trace!("Option '{}' = '{}'", name, value);
                self.add(reference, value.to_string());
                continue;
            }
            in_options = false;
            if token == MODE_SWITCH_TOKEN {
                continue;
            }

            let Some(reference) = plan.positionals().get(position).copied() else {
                let mut unknown = vec![token.to_string()];
                unknown.extend(tokens.by_ref().map(str::to_string));
                return Err(ArgumentError::UnknownValue(unknown));
            };
            let count = self.add(reference, token.to_string());
            let full = plan
                .argument(reference)
                .is_some_and(|argument| argument.source().cardinality.is_full(count));
            if full {
                position += 1;
            }
        }
        Ok(())
    }

    /// Checks every argument of the chain, before anything is instantiated.
    pub fn check_cardinality(&self, plan: &CompiledPlan) -> Result<(), ArgumentError> {
        for scope in plan.chain() {
            for (index, argument) in scope.arguments().iter().enumerate() {
                let count = self
                    .values(ArgRef {
                        level: scope.level(),
                        index,
                    })
                    .len();
                let cardinality = argument.source().cardinality;
                if !cardinality.accepts(count) {
                    return Err(ArgumentError::Cardinality {
                        name: argument.name().to_string(),
                        min: cardinality.min,
                        max: cardinality.max,
                        count,
                    });
                }
            }
        }
        Ok(())
    }

    /// The value delivered to the argument's target: every collected item for list
    /// targets, otherwise the single collected value or the argument's default.
    pub fn resolve(&self, argument: &Argument, reference: ArgRef) -> Result<Value> {
        let raw = self.values(reference);
        if argument.target().is_list() {
            let items = raw
                .iter()
                .map(|text| parse(argument, text))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::List(items));
        }
        match raw.first() {
            Some(text) => Ok(Value::Scalar(parse(argument, text)?)),
            None => self.resolve_default(argument).map(Value::Scalar),
        }
    }

    fn resolve_default(&self, argument: &Argument) -> Result<AnyBox> {
        let primitive = argument.target().primitive();
        match &argument.source().default {
            DefaultPolicy::Literal(literal) => parse_literal(argument, literal),
            DefaultPolicy::Named { name, fallback } => match (self.defaults.get(name), fallback) {
                (Some(value), _) => Ok(parse(argument, value)?),
                (None, Some(literal)) => parse_literal(argument, literal),
                (None, None) => Ok(primitive.default_value()),
            },
            DefaultPolicy::Undefined | DefaultPolicy::Required => Ok(primitive.default_value()),
        }
    }
}

/// Parses a user supplied value.
fn parse(argument: &Argument, text: &str) -> Result<AnyBox, ArgumentError> {
    let primitive = argument.target().primitive();
    primitive.parse(text).map_err(|reason| {
        log::debug!("Argument '{}' rejected '{}': {}", argument.name(), text, reason);
        ArgumentError::InvalidValue {
            name: argument.name().to_string(),
            expected: primitive.expected().to_string(),
            value: text.to_string(),
        }
    })
}

/// Parses a default written into the definition itself.
fn parse_literal(argument: &Argument, literal: &str) -> Result<AnyBox> {
    let primitive = argument.target().primitive();
    primitive.parse(literal).map_err(|_| {
        Error::from(DefinitionError::InvalidDefault {
            source_name: argument.name().to_string(),
            expected: primitive.expected().to_string(),
            value: literal.to_string(),
        })
    })
}

impl CompiledPlan {
    /// Binds `args` and returns the instance of this scope.
    ///
    /// Ancestors are instantiated first, root down, each one fed to the constructor or
    /// factory of its descendants that asks for it.
    pub fn run<S: AsRef<str>>(&self, defaults: &Defaults, args: &[S]) -> Result<AnyBox> {
        log::debug!(
            "Binding {} token(s) to scope '{}'",
            args.len(),
            self.scope()
        );
        let mut actuals = Actuals::new(defaults);
        actuals.fill(self, args)?;
        actuals.check_cardinality(self)?;

        let chain = self.chain();
        let Some((leaf, ancestors)) = chain.split_last() else {
            return Err(anyhow!("empty scope chain").into());
        };
        let mut instances: Vec<Shared> = Vec::with_capacity(ancestors.len());
        for plan in ancestors {
            let instance = instantiate(plan, &actuals, &instances)?;
            instances.push(Rc::from(instance));
        }
        instantiate(leaf, &actuals, &instances)
    }
}

fn instantiate(plan: &CompiledPlan, actuals: &Actuals<'_>, instances: &[Shared]) -> Result<AnyBox> {
    let level = plan.level();
    let mut pending: Vec<Option<Slot>> = plan
        .invocation()
        .slots()
        .iter()
        .map(|source| match source {
            SlotSource::Ancestor(depth) => instances.get(*depth).cloned().map(Slot::Context),
            SlotSource::Value => None,
        })
        .collect();
    for (index, argument) in plan.arguments().iter().enumerate() {
        if let TargetKind::Slot(position) = argument.target().kind() {
            let value = actuals.resolve(argument, ArgRef { level, index })?;
            if let Some(slot) = pending.get_mut(*position) {
                *slot = Some(Slot::Value(value));
            }
        }
    }
    let slots = pending
        .into_iter()
        .enumerate()
        .map(|(position, slot)| {
            slot.ok_or_else(|| anyhow!("argument {} of '{}' was never filled", position, plan.scope()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let slots = Slots::new(slots);

    let mut instance = match plan.invocation() {
        Invocation::Construct { recipe, .. } => recipe.invoke(slots)?,
        Invocation::Instance(make) => make(),
        Invocation::Factory {
            receiver, factory, ..
        } => {
            let receiver = instances
                .get(*receiver)
                .ok_or_else(|| anyhow!("no instance at depth {} for '{}'", receiver, plan.scope()))?;
            factory.invoke(&**receiver, slots)?
        }
    };

    for (index, argument) in plan.arguments().iter().enumerate() {
        if argument.target().is_pre() {
            continue;
        }
        let value = actuals.resolve(argument, ArgRef { level, index })?;
        argument.target().apply(instance.as_mut(), value)?;
    }
    log::trace!("Instantiated scope '{}'", plan.scope());
    Ok(instance)
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        class::{Class, Param},
        context::{Context, Handle},
        registry::Repository,
    };
    use std::path::PathBuf;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Color {
        Yellow,
        Red,
        Blue,
    }

    #[derive(Debug)]
    struct Values {
        first: Color,
        second: Color,
        third: Color,
        remaining: Vec<Color>,
    }

    #[derive(Debug)]
    struct Mixed {
        first: i32,
        second: Color,
        third: String,
        remaining: Vec<String>,
    }

    #[derive(Debug, Clone, Default)]
    struct Empty;

    #[derive(Debug, Clone, Default)]
    struct Options {
        first: String,
        second: i32,
        third: bool,
        fourth: bool,
        path: PathBuf,
        rest: Vec<String>,
    }

    #[derive(Debug, Clone, Default)]
    struct Parent {
        verbose: bool,
    }

    #[derive(Debug)]
    struct Child {
        parent: Rc<Parent>,
        name: String,
    }

    fn repository() -> Repository {
        let mut repository = Repository::new();
        repository
            .register_enum(&[
                ("YELLOW", Color::Yellow),
                ("RED", Color::Red),
                ("BLUE", Color::Blue),
            ])
            .unwrap();
        repository
            .add_class(
                Class::of::<Values>()
                    .constructor([Param::value::<Color>()], |slots| {
                        Ok(Values {
                            first: slots.value()?,
                            second: Color::Yellow,
                            third: Color::Yellow,
                            remaining: Vec::new(),
                        })
                    })
                    .field("second", |v: &mut Values, c: Color| v.second = c)
                    .method("third", |v: &mut Values, c: Color| {
                        v.third = c;
                        Ok(())
                    })
                    .method("remaining", |v: &mut Values, c: Color| {
                        v.remaining.push(c);
                        Ok(())
                    })
                    .build(),
            )
            .add_class(
                Class::of::<Mixed>()
                    .constructor([Param::value::<i32>()], |slots| {
                        Ok(Mixed {
                            first: slots.value()?,
                            second: Color::Yellow,
                            third: String::new(),
                            remaining: Vec::new(),
                        })
                    })
                    .field("second", |m: &mut Mixed, c: Color| m.second = c)
                    .method("third", |m: &mut Mixed, t: String| {
                        m.third = t;
                        Ok(())
                    })
                    .method("remaining", |m: &mut Mixed, r: String| {
                        m.remaining.push(r);
                        Ok(())
                    })
                    .build(),
            )
            .add_class(
                Class::of::<Options>()
                    .field("first", |o: &mut Options, v: String| o.first = v)
                    .field("second", |o: &mut Options, v: i32| o.second = v)
                    .field("third", |o: &mut Options, v: bool| o.third = v)
                    .field("fourth", |o: &mut Options, v: bool| o.fourth = v)
                    .field("path", |o: &mut Options, v: PathBuf| o.path = v)
                    .list_field("rest", |o: &mut Options, v: Vec<String>| o.rest = v)
                    .build(),
            )
            .add_class(Class::of::<Parent>().field("verbose", |p: &mut Parent, v: bool| p.verbose = v).build())
            .add_class(
                Class::of::<Child>()
                    .constructor([Param::context::<Parent>(), Param::value::<String>()], |slots| {
                        Ok(Child {
                            parent: slots.context()?,
                            name: slots.value()?,
                        })
                    })
                    .build(),
            );
        repository
    }

    fn values_plan(repository: &Repository) -> Rc<CompiledPlan> {
        Context::create(
            None,
            repository,
            None,
            Handle::class::<Values>(),
            "first second third remaining* { second=second third(third) remaining*(remaining) }",
        )
        .unwrap()
        .compile(repository)
        .unwrap()
    }

    fn options_plan(repository: &Repository, definition: &str) -> Rc<CompiledPlan> {
        Context::create(None, repository, None, Handle::instance(Options::default()), definition)
            .unwrap()
            .compile(repository)
            .unwrap()
    }

    fn run<T: 'static>(plan: &CompiledPlan, defaults: &Defaults, args: &[&str]) -> Result<T> {
        plan.run(defaults, args)
            .map(|instance| *instance.downcast::<T>().unwrap())
    }

    const OPTIONS: &str = "-first=@ -second=@:7 -third -fourth=true -path=@dir rest* \
                           { first=first second=second third=third fourth=fourth path=path rest=rest }";

    #[test]
    fn test_values_bound_to_constructor_field_method_and_iterated_method() {
        // --- Setup ---
        let repository = repository();
        let plan = values_plan(&repository);

        // --- Execute ---
        let values: Values =
            run(&plan, &Defaults::new(), &["red", "blue", "RED", "yellow", "blue"]).unwrap();

        // --- Verify ---
        assert_eq!(values.first, Color::Red);
        assert_eq!(values.second, Color::Blue);
        assert_eq!(values.third, Color::Red);
        assert_eq!(values.remaining, vec![Color::Yellow, Color::Blue]);
    }

    #[test]
    fn test_mixed_types_and_remaining_accumulation() {
        // --- Setup ---
        let repository = repository();
        let plan = Context::create(
            None,
            &repository,
            None,
            Handle::class::<Mixed>(),
            "first second third remaining* { second=second third(third) remaining*(remaining) }",
        )
        .unwrap()
        .compile(&repository)
        .unwrap();

        // --- Execute ---
        let exact: Mixed = run(&plan, &Defaults::new(), &["1", "red", "third"]).unwrap();
        let more: Mixed =
            run(&plan, &Defaults::new(), &["1", "red", "third", "forth", "fifth"]).unwrap();

        // --- Verify ---
        assert_eq!(exact.first, 1);
        assert_eq!(exact.second, Color::Red);
        assert_eq!(exact.third, "third");
        assert!(exact.remaining.is_empty());
        assert_eq!(more.remaining, vec!["forth".to_string(), "fifth".to_string()]);
    }

    #[test]
    fn test_missing_positional_is_reported() {
        let repository = repository();
        let plan = values_plan(&repository);
        let err = run::<Values>(&plan, &Defaults::new(), &["red", "blue"]).unwrap_err();
        assert_eq!(err.to_string(), "missing value for third");
    }

    #[test]
    fn test_invalid_enum_value() {
        let repository = repository();
        let plan = values_plan(&repository);
        let err = run::<Values>(&plan, &Defaults::new(), &["red", "green", "blue"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid argument second: expected 'yellow', 'red' or 'blue', got 'green'"
        );
    }

    #[test]
    fn test_options_with_named_defaults() {
        // --- Setup ---
        let repository = repository();
        let plan = options_plan(&repository, OPTIONS);
        let defaults: Defaults = [("first", "from-defaults"), ("dir", "/tmp")].into_iter().collect();

        // --- Execute ---
        let options: Options = run(&plan, &defaults, &[]).unwrap();

        // --- Verify ---
        assert_eq!(options.first, "from-defaults");
        assert_eq!(options.second, 7);
        assert!(!options.third);
        assert!(options.fourth);
        assert_eq!(options.path, PathBuf::from("/tmp"));
        assert!(options.rest.is_empty());
    }

    #[test]
    fn test_options_given_on_the_command_line() {
        let repository = repository();
        let plan = options_plan(&repository, OPTIONS);
        let options: Options = run(
            &plan,
            &Defaults::new(),
            &["-first", "a", "-second=3", "-third", "-fourth=false", "x", "-y"],
        )
        .unwrap();

        assert_eq!(options.first, "a");
        assert_eq!(options.second, 3);
        assert!(options.third);
        assert!(!options.fourth);
        assert_eq!(options.path, PathBuf::from("."));
        assert_eq!(options.rest, vec!["x".to_string(), "-y".to_string()]);
    }

    #[test]
    fn test_mode_switch_token() {
        let repository = repository();
        let plan = options_plan(&repository, OPTIONS);
        let options: Options =
            run(&plan, &Defaults::new(), &["-third", "\\", "-first", "\\", "x"]).unwrap();
        assert!(options.third);
        assert_eq!(options.first, "");
        assert_eq!(options.rest, vec!["-first".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_mode_switch_token_is_dropped_among_positionals() {
        let repository = repository();
        let plan = options_plan(&repository, OPTIONS);
        let options: Options = run(&plan, &Defaults::new(), &["a", "\\", "b", "\\"]).unwrap();
        assert_eq!(options.rest, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_option_errors() {
        let repository = repository();
        let plan = options_plan(&repository, OPTIONS);
        let defaults = Defaults::new();

        let err = run::<Options>(&plan, &defaults, &["-nope"]).unwrap_err();
        assert_eq!(err.to_string(), "unknown option nope");

        let err = run::<Options>(&plan, &defaults, &["-first"]).unwrap_err();
        assert_eq!(err.to_string(), "missing value for option first");

        let err = run::<Options>(&plan, &defaults, &["-second", "x"]).unwrap_err();
        assert_eq!(err.to_string(), "invalid argument second: expected integer, got 'x'");

        let err = run::<Options>(&plan, &defaults, &["-third=maybe"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid argument third: expected 'true' or 'false', got 'maybe'"
        );

        let err = run::<Options>(&plan, &defaults, &["-first", "a", "-first", "b"]).unwrap_err();
        assert!(err.to_string().starts_with("too many values for first"));
    }

    #[test]
    fn test_unknown_option_without_sources() {
        let repository = repository();
        let plan = Context::create(None, &repository, None, Handle::instance(Empty), "")
            .unwrap()
            .compile(&repository)
            .unwrap();
        let err = run::<Empty>(&plan, &Defaults::new(), &["-a", "10"]).unwrap_err();
        assert!(err.to_string().contains("unknown option"));
        assert!(matches!(err, Error::Argument(ArgumentError::UnknownOption(_))));
    }

    #[test]
    fn test_lone_dash_is_a_value() {
        let repository = repository();
        let plan = options_plan(&repository, "-first { first=first }");
        let err = run::<Options>(&plan, &Defaults::new(), &["-"]).unwrap_err();
        assert_eq!(err.to_string(), "unknown value(s): -");
    }

    #[test]
    fn test_named_default_without_entry_uses_fallback() {
        let repository = repository();
        let plan = options_plan(&repository, "-first=@s:bla { first=first }");

        let options: Options = run(&plan, &Defaults::new(), &[]).unwrap();
        assert_eq!(options.first, "bla");

        let defaults: Defaults = [("s", "set")].into_iter().collect();
        let options: Options = run(&plan, &defaults, &[]).unwrap();
        assert_eq!(options.first, "set");
    }

    #[test]
    fn test_invalid_literal_default_is_a_definition_error() {
        let repository = repository();
        let plan = options_plan(&repository, "-second=abc { second=second }");
        let err = run::<Options>(&plan, &Defaults::new(), &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::Definition(DefinitionError::InvalidDefault { .. })
        ));
    }

    #[test]
    fn test_ancestor_instance_is_shared_with_descendants() {
        // --- Setup ---
        let repository = repository();
        let parent = Context::create(
            None,
            &repository,
            None,
            Handle::instance(Parent::default()),
            "-v { verbose=v }",
        )
        .unwrap();
        let child = Context::create(Some(parent), &repository, None, Handle::class::<Child>(), "name")
            .unwrap();
        let plan = child.compile(&repository).unwrap();

        // --- Execute ---
        let child: Child = run(&plan, &Defaults::new(), &["-v", "alice"]).unwrap();

        // --- Verify ---
        assert!(child.parent.verbose);
        assert_eq!(child.name, "alice");
    }

    #[test]
    fn test_is_option() {
        assert!(is_option("-a"));
        assert!(is_option("--"));
        assert!(!is_option("-"));
        assert!(!is_option("a-"));
    }
}
