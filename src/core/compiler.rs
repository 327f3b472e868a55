// src/core/compiler.rs

//! # Compiler
//!
//! Turns a [`Context`] into a [`CompiledPlan`]: the chosen constructor or factory overload,
//! one [`Argument`] per declared source with the [`Target`] its value is delivered to, and
//! the option table and positional sequence aggregated over the whole scope chain.
//!
//! Plans are compiled once per context and shared afterwards; compiling a context compiles
//! its ancestors first.

use crate::{
    core::{
        class::{AnyBox, Factory, Member, Param, Recipe, Shape, Value},
        context::{Context, Producer},
        registry::{Primitive, Repository},
    },
    errors::DefinitionError,
    models::{Destination, SourceSpec},
};
use anyhow::anyhow;
use std::{any::Any, collections::HashMap, fmt, rc::Rc};

type CompileResult<T> = Result<T, DefinitionError>;

// --- TARGETS ---

/// Where a resolved value is delivered.
#[derive(Clone)]
pub enum TargetKind {
    /// Constructor or factory parameter at this position.
    Slot(usize),
    Field(Rc<Member>),
    Method(Rc<Member>),
    /// One method call per collected item.
    Iterated(Rc<Member>),
}

impl fmt::Debug for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot(position) => write!(f, "Slot({})", position),
            Self::Field(member) => write!(f, "Field({})", member.name()),
            Self::Method(member) => write!(f, "Method({})", member.name()),
            Self::Iterated(member) => write!(f, "Iterated({})", member.name()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Target {
    kind: TargetKind,
    shape: Shape,
    primitive: Rc<Primitive>,
}

impl Target {
    fn new(kind: TargetKind, shape: Shape, repository: &Repository) -> CompileResult<Self> {
        let primitive = repository.primitive(shape.element)?;
        Ok(Self {
            kind,
            shape,
            primitive,
        })
    }

    pub fn kind(&self) -> &TargetKind {
        &self.kind
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn primitive(&self) -> &Primitive {
        &self.primitive
    }

    /// Delivered before the instance exists, as a constructor or factory argument.
    pub fn is_pre(&self) -> bool {
        matches!(self.kind, TargetKind::Slot(_))
    }

    /// Accepts any number of values.
    pub fn is_list(&self) -> bool {
        self.shape.list || matches!(self.kind, TargetKind::Iterated(_))
    }

    /// Boolean options may be given without a value.
    pub fn is_boolean(&self) -> bool {
        !self.is_list() && self.primitive.is_boolean()
    }

    pub(crate) fn apply(&self, instance: &mut dyn Any, value: Value) -> anyhow::Result<()> {
        match &self.kind {
            TargetKind::Slot(position) => Err(anyhow!(
                "constructor argument {} cannot be applied to an instance",
                position
            )),
            TargetKind::Field(member) | TargetKind::Method(member) => {
                member.apply(instance, value)
            }
            TargetKind::Iterated(member) => match value {
                Value::List(items) => {
                    for item in items {
                        member.apply(instance, Value::Scalar(item))?;
                    }
                    Ok(())
                }
                scalar => member.apply(instance, scalar),
            },
        }
    }
}

/// A declared source bound to its target.
#[derive(Debug, Clone)]
pub struct Argument {
    scope: String,
    source: SourceSpec,
    target: Target,
}

impl Argument {
    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// Name of the scope that declared this argument.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn source(&self) -> &SourceSpec {
        &self.source
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_option(&self) -> bool {
        self.source.option
    }
}

// --- PLANS ---

/// Position of an argument within a scope chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArgRef {
    /// Depth of the declaring scope.
    pub level: usize,
    /// Index into that scope's arguments.
    pub index: usize,
}

/// Where a constructor or factory parameter takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSource {
    /// The instance of the ancestor at this depth.
    Ancestor(usize),
    /// The argument whose target is this slot.
    Value,
}

/// How the instance of a scope comes to be.
#[derive(Clone)]
pub enum Invocation {
    Construct {
        recipe: Rc<Recipe>,
        slots: Vec<SlotSource>,
    },
    Instance(Rc<dyn Fn() -> AnyBox>),
    Factory {
        /// Depth of the scope whose instance receives the call.
        receiver: usize,
        factory: Rc<Factory>,
        slots: Vec<SlotSource>,
    },
}

impl Invocation {
    pub fn slots(&self) -> &[SlotSource] {
        match self {
            Self::Construct { slots, .. } | Self::Factory { slots, .. } => slots,
            Self::Instance(_) => &[],
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Construct { recipe, slots } => f
                .debug_struct("Construct")
                .field("params", &recipe.params())
                .field("slots", slots)
                .finish(),
            Self::Instance(_) => f.write_str("Instance"),
            Self::Factory {
                receiver,
                factory,
                slots,
            } => f
                .debug_struct("Factory")
                .field("receiver", receiver)
                .field("factory", &factory.name())
                .field("slots", slots)
                .finish(),
        }
    }
}

/// The compiled form of one scope, linked to the plans of its ancestors.
#[derive(Debug)]
pub struct CompiledPlan {
    scope: String,
    level: usize,
    parent: Option<Rc<CompiledPlan>>,
    invocation: Invocation,
    arguments: Vec<Argument>,
    options: HashMap<String, ArgRef>,
    positionals: Vec<ArgRef>,
}

impl CompiledPlan {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<&Rc<CompiledPlan>> {
        self.parent.as_ref()
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Arguments declared by this scope, in declaration order.
    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// Every option visible in this scope, including those of its ancestors.
    pub fn options(&self) -> &HashMap<String, ArgRef> {
        &self.options
    }

    /// Every positional of the chain: root scope first, declaration order within a scope.
    pub fn positionals(&self) -> &[ArgRef] {
        &self.positionals
    }

    /// Plans of the chain, root first, ending with this one.
    pub fn chain(&self) -> Vec<&CompiledPlan> {
        let mut chain: Vec<&CompiledPlan> =
            std::iter::successors(Some(self), |plan| plan.parent.as_deref()).collect();
        chain.reverse();
        chain
    }

    pub fn plan_at(&self, level: usize) -> Option<&CompiledPlan> {
        std::iter::successors(Some(self), |plan| plan.parent.as_deref())
            .find(|plan| plan.level == level)
    }

    pub fn argument(&self, reference: ArgRef) -> Option<&Argument> {
        self.plan_at(reference.level)?
            .arguments
            .get(reference.index)
    }

    pub fn option(&self, name: &str) -> Option<&Argument> {
        self.argument(*self.options.get(name)?)
    }
}

// --- COMPILATION ---

impl Context {
    /// Compiles this scope, or returns the plan compiled earlier.
    pub fn compile(&self, repository: &Repository) -> CompileResult<Rc<CompiledPlan>> {
        if let Some(plan) = self.plan.get() {
            log::trace!("Plan cache HIT for scope '{}'", self.name());
            return Ok(Rc::clone(plan));
        }
        log::debug!("Plan cache MISS for scope '{}'. Compiling.", self.name());
        let plan = Rc::new(compile_context(self, repository)?);
        Ok(Rc::clone(self.plan.get_or_init(|| plan)))
    }
}

/// A parameter list matched against the available sources and ancestors.
struct Match {
    slots: Vec<SlotSource>,
    arguments: Vec<Argument>,
}

fn compile_context(context: &Context, repository: &Repository) -> CompileResult<CompiledPlan> {
    let parent = context
        .parent()
        .map(|parent| parent.compile(repository))
        .transpose()?;
    let (mapped, unmapped) = context.definition().partition();

    let (invocation, mut arguments) = match context.producer() {
        Producer::Class(class) => {
            let mut matches = Vec::new();
            for recipe in class.constructors() {
                if let Some(found) = match_params(context, repository, recipe.params(), &unmapped)? {
                    matches.push((Rc::clone(recipe), found));
                }
            }
            let (recipe, found) = select(class.name(), &unmapped, matches)?;
            let invocation = Invocation::Construct {
                recipe,
                slots: found.slots,
            };
            (invocation, found.arguments)
        }
        Producer::Instance { make, .. } => {
            if let Some(source) = unmapped.first() {
                return Err(DefinitionError::InvalidDefinition(format!(
                    "cannot apply constructor argument to an instance: {}",
                    source.name
                )));
            }
            (Invocation::Instance(Rc::clone(make)), Vec::new())
        }
        Producer::Factory {
            ancestor, factory, ..
        } => {
            let callee = format!("{}.{}", ancestor.name(), factory.name());
            let matches = match_params(context, repository, factory.params(), &unmapped)?
                .into_iter()
                .map(|found| (Rc::clone(factory), found))
                .collect();
            let (factory, found) = select(&callee, &unmapped, matches)?;
            let invocation = Invocation::Factory {
                receiver: ancestor.depth(),
                factory,
                slots: found.slots,
            };
            (invocation, found.arguments)
        }
    };

    for source in mapped {
        arguments.push(post_argument(context, repository, source)?);
    }
    for argument in &arguments {
        check_fits(argument)?;
    }
    let sources = context.sources();
    arguments.sort_by_key(|argument| {
        sources
            .iter()
            .position(|source| source.name == argument.source.name)
    });

    let (mut options, mut positionals) = match &parent {
        Some(parent) => (parent.options.clone(), parent.positionals.clone()),
        None => (HashMap::new(), Vec::new()),
    };
    let level = context.depth();
    let mut after_rest = parent
        .as_deref()
        .and_then(|parent| parent.positionals.last().and_then(|last| parent.argument(*last)))
        .is_some_and(|last| last.source.cardinality.is_unbounded());
    for (index, argument) in arguments.iter().enumerate() {
        let reference = ArgRef { level, index };
        if argument.is_option() {
            if options.insert(argument.name().to_string(), reference).is_some() {
                return Err(DefinitionError::DuplicateOption {
                    name: argument.name().to_string(),
                });
            }
        } else {
            if after_rest {
                return Err(DefinitionError::InvalidDefinition(format!(
                    "positional {} follows an unbounded positional",
                    argument.name()
                )));
            }
            after_rest = argument.source.cardinality.is_unbounded();
            positionals.push(reference);
        }
    }

    log::debug!(
        "Compiled scope '{}': {} argument(s), {} option(s) and {} positional(s) visible",
        context.name(),
        arguments.len(),
        options.len(),
        positionals.len()
    );
    Ok(CompiledPlan {
        scope: context.name().to_string(),
        level,
        parent,
        invocation,
        arguments,
        options,
        positionals,
    })
}

/// Matches `params` in order: context parameters take the nearest unused ancestor of
/// their type, value parameters take the next unmapped source. Every source must be used.
fn match_params(
    context: &Context,
    repository: &Repository,
    params: &[Param],
    unmapped: &[&SourceSpec],
) -> CompileResult<Option<Match>> {
    let mut pool: Vec<&Rc<Context>> = context.ancestors().collect();
    let mut remaining = unmapped.iter();
    let mut slots = Vec::with_capacity(params.len());
    let mut arguments = Vec::new();

    for (position, param) in params.iter().enumerate() {
        match param {
            Param::Context(info) => {
                let Some(found) = pool
                    .iter()
                    .position(|ancestor| ancestor.producer().type_info() == *info)
                else {
                    return Ok(None);
                };
                let ancestor = pool.remove(found);
                slots.push(SlotSource::Ancestor(ancestor.depth()));
            }
            Param::Value(shape) => {
                let Some(source) = remaining.next() else {
                    return Ok(None);
                };
                let target = Target::new(TargetKind::Slot(position), *shape, repository)?;
                arguments.push(Argument {
                    scope: context.name().to_string(),
                    source: (*source).clone(),
                    target,
                });
                slots.push(SlotSource::Value);
            }
        }
    }
    if remaining.next().is_some() {
        return Ok(None);
    }
    Ok(Some(Match { slots, arguments }))
}

fn select<T>(
    type_name: &str,
    unmapped: &[&SourceSpec],
    mut matches: Vec<(T, Match)>,
) -> CompileResult<(T, Match)> {
    let describe = || {
        unmapped
            .iter()
            .map(|source| source.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    match matches.len() {
        0 => Err(DefinitionError::NoMatchingConstructor {
            type_name: type_name.to_string(),
            sources: describe(),
        }),
        1 => matches.pop().ok_or_else(|| DefinitionError::NoMatchingConstructor {
            type_name: type_name.to_string(),
            sources: describe(),
        }),
        _ => Err(DefinitionError::AmbiguousConstructor {
            type_name: type_name.to_string(),
            sources: describe(),
        }),
    }
}

fn post_argument(
    context: &Context,
    repository: &Repository,
    source: &SourceSpec,
) -> CompileResult<Argument> {
    let class = context.producer().class();
    let Some(destination) = context.mapping().get(&source.name) else {
        return Err(DefinitionError::InvalidDefinition(format!(
            "argument {} is not mapped",
            source.name
        )));
    };
    let unknown = |kind: &'static str| DefinitionError::UnknownMappingTarget {
        kind,
        type_name: class.name().to_string(),
        member: destination.member().to_string(),
    };
    let target = match destination {
        Destination::Field(name) => {
            let member = class.field(name).ok_or_else(|| unknown("field"))?;
            Target::new(TargetKind::Field(Rc::clone(member)), member.shape(), repository)?
        }
        Destination::Method(name) => {
            let member = class.method(name).ok_or_else(|| unknown("method"))?;
            Target::new(TargetKind::Method(Rc::clone(member)), member.shape(), repository)?
        }
        Destination::IteratedMethod(name) => {
            let member = class.method(name).ok_or_else(|| unknown("method"))?;
            if member.shape().list {
                return Err(DefinitionError::InvalidDefinition(format!(
                    "iterated method {}.{} must take a single item",
                    class.name(),
                    name
                )));
            }
            Target::new(TargetKind::Iterated(Rc::clone(member)), member.shape(), repository)?
        }
    };
    Ok(Argument {
        scope: context.name().to_string(),
        source: source.clone(),
        target,
    })
}

/// A source that may collect several values needs a target that takes several.
fn check_fits(argument: &Argument) -> CompileResult<()> {
    let collects = argument
        .source
        .cardinality
        .max
        .is_none_or(|max| max > 1);
    if collects && !argument.target.is_list() {
        return Err(DefinitionError::InvalidDefinition(format!(
            "argument {} collects several values but its target takes a single one",
            argument.name()
        )));
    }
    Ok(())
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::class::Class;
    use crate::core::context::Handle;

    #[derive(Debug, Clone, Default)]
    struct Root {
        verbose: bool,
    }

    #[derive(Debug)]
    struct Pair {
        left: String,
        right: i32,
        extra: Vec<String>,
    }

    fn repository() -> Repository {
        let mut repository = Repository::new();
        repository
            .add_class(
                Class::of::<Root>()
                    .field("verbose", |r: &mut Root, v: bool| r.verbose = v)
                    .build(),
            )
            .add_class(
                Class::of::<Pair>()
                    .constructor(
                        [Param::value::<String>(), Param::value::<i32>()],
                        |slots| {
                            Ok(Pair {
                                left: slots.value()?,
                                right: slots.value()?,
                                extra: Vec::new(),
                            })
                        },
                    )
                    .constructor(
                        [Param::context::<Root>(), Param::value::<String>()],
                        |slots| {
                            let root = slots.context::<Root>()?;
                            Ok(Pair {
                                left: slots.value()?,
                                right: i32::from(root.verbose),
                                extra: Vec::new(),
                            })
                        },
                    )
                    .method("extra", |p: &mut Pair, e: String| {
                        p.extra.push(e);
                        Ok(())
                    })
                    .list_field("all", |p: &mut Pair, all: Vec<String>| p.extra = all)
                    .build(),
            );
        repository
    }

    fn root(repository: &Repository, definition: &str) -> Rc<Context> {
        Context::create(None, repository, Some("root"), Handle::instance(Root::default()), definition)
            .unwrap()
    }

    fn child(repository: &Repository, parent: &Rc<Context>, definition: &str) -> Rc<Context> {
        Context::create(
            Some(Rc::clone(parent)),
            repository,
            None,
            Handle::class::<Pair>(),
            definition,
        )
        .unwrap()
    }

    #[test]
    fn test_overload_selected_by_source_count() {
        // --- Setup ---
        let repository = repository();
        let root = root(&repository, "-v { verbose=v }");

        // --- Execute ---
        let two = child(&repository, &root, "a b").compile(&repository).unwrap();
        let one = child(&repository, &root, "a").compile(&repository).unwrap();

        // --- Verify ---
        assert_eq!(two.invocation().slots(), &[SlotSource::Value, SlotSource::Value]);
        assert_eq!(
            one.invocation().slots(),
            &[SlotSource::Ancestor(0), SlotSource::Value]
        );
        assert!(two.options().contains_key("v"));
        assert_eq!(two.positionals().len(), 2);
        assert_eq!(two.option("v").unwrap().scope(), "root");
    }

    #[test]
    fn test_no_matching_constructor() {
        let repository = repository();
        let root = root(&repository, "");
        let err = child(&repository, &root, "a b c")
            .compile(&repository)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "no matching constructor: Pair(a, b, c)"
        );
    }

    #[test]
    fn test_ambiguous_constructor() {
        let mut repository = Repository::new();
        repository.add_class(
            Class::of::<Pair>()
                .constructor([Param::value::<String>()], |slots| {
                    Ok(Pair {
                        left: slots.value()?,
                        right: 0,
                        extra: Vec::new(),
                    })
                })
                .constructor([Param::value::<i32>()], |slots| {
                    Ok(Pair {
                        left: String::new(),
                        right: slots.value()?,
                        extra: Vec::new(),
                    })
                })
                .build(),
        );
        let context =
            Context::create(None, &repository, None, Handle::class::<Pair>(), "a").unwrap();
        let err = context.compile(&repository).unwrap_err();
        assert!(matches!(err, DefinitionError::AmbiguousConstructor { .. }));
    }

    #[test]
    fn test_compile_is_memoized() {
        let repository = repository();
        let root = root(&repository, "");
        let context = child(&repository, &root, "a b");
        assert!(!context.is_compiled());

        let first = context.compile(&repository).unwrap();
        let second = context.compile(&repository).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(root.is_compiled());
        assert!(Rc::ptr_eq(first.parent().unwrap(), &root.compile(&repository).unwrap()));
    }

    #[test]
    fn test_mapped_sources_become_post_targets() {
        // --- Setup ---
        let repository = repository();
        let root = root(&repository, "");

        // --- Execute ---
        let plan = child(&repository, &root, "a -more* b { extra*(more) }")
            .compile(&repository)
            .unwrap();

        // --- Verify ---
        let names: Vec<_> = plan.arguments().iter().map(Argument::name).collect();
        assert_eq!(names, vec!["a", "more", "b"]);
        let more = &plan.arguments()[1];
        assert!(!more.target().is_pre());
        assert!(more.target().is_list());
        assert!(matches!(more.target().kind(), TargetKind::Iterated(_)));
    }

    #[test]
    fn test_unknown_mapping_target() {
        let repository = repository();
        let root = root(&repository, "");
        let err = child(&repository, &root, "a b -c { nothing=c }")
            .compile(&repository)
            .unwrap_err();
        assert_eq!(err.to_string(), "field not found: Pair.nothing");
    }

    #[test]
    fn test_duplicate_option_across_scopes() {
        let repository = repository();
        let root = root(&repository, "-v { verbose=v }");
        root.compile(&repository).unwrap();
        let err = child(&repository, &root, "a b -v* { all=v }")
            .compile(&repository)
            .unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateOption { name: "v".into() });
    }

    #[test]
    fn test_instance_rejects_unmapped_sources() {
        let repository = repository();
        let err = root(&repository, "-x").compile(&repository).unwrap_err();
        assert!(err.to_string().contains("cannot apply constructor argument to an instance"));
    }

    #[test]
    fn test_unbounded_source_needs_list_target() {
        let repository = repository();
        let root = root(&repository, "");
        let err = child(&repository, &root, "a b more* { extra(more) }")
            .compile(&repository)
            .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidDefinition(_)));
    }
}
