// src/core/context.rs

use crate::core::class::{AnyBox, Class, Factory, TypeInfo};
use crate::core::compiler::CompiledPlan;
use crate::core::grammar::parse_definition;
use crate::core::registry::Repository;
use crate::errors::DefinitionError;
use crate::models::{Definition, Mapping, SourceSpec};
use std::{cell::OnceCell, fmt, iter, rc::Rc};

type MakeFn = dyn Fn() -> AnyBox;

/// Names what produces the instance of a scope, before it is resolved against a repository.
#[derive(Clone)]
pub enum Handle {
    /// Construct a registered class.
    Class(TypeInfo),
    /// Hand out a fresh copy of a prebuilt value on every run.
    Instance { info: TypeInfo, make: Rc<MakeFn> },
    /// Call a factory method on an ancestor scope's instance: `"<scope>.<method>"`.
    Factory(String),
}

impl Handle {
    pub fn class<T: 'static>() -> Self {
        Self::Class(TypeInfo::of::<T>())
    }

    pub fn instance<T: Clone + 'static>(value: T) -> Self {
        Self::Instance {
            info: TypeInfo::of::<T>(),
            make: Rc::new(move || Box::new(value.clone()) as AnyBox),
        }
    }

    pub fn factory(path: impl Into<String>) -> Self {
        Self::Factory(path.into())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(info) => f.debug_tuple("Class").field(info).finish(),
            Self::Instance { info, .. } => f.debug_tuple("Instance").field(info).finish(),
            Self::Factory(path) => f.debug_tuple("Factory").field(path).finish(),
        }
    }
}

/// A resolved [`Handle`].
#[derive(Clone)]
pub enum Producer {
    Class(Rc<Class>),
    Instance {
        class: Rc<Class>,
        make: Rc<MakeFn>,
    },
    Factory {
        ancestor: Rc<Context>,
        factory: Rc<Factory>,
        /// The produced type; bare when it was never registered.
        class: Rc<Class>,
    },
}

impl Producer {
    /// The class of the produced instance, where mapped fields and methods are looked up.
    pub fn class(&self) -> &Rc<Class> {
        match self {
            Self::Class(class)
            | Self::Instance { class, .. }
            | Self::Factory { class, .. } => class,
        }
    }

    pub fn type_info(&self) -> TypeInfo {
        self.class().type_info()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(class) => write!(f, "Class({})", class.name()),
            Self::Instance { class, .. } => write!(f, "Instance({})", class.name()),
            Self::Factory {
                ancestor, factory, ..
            } => write!(f, "Factory({}.{})", ancestor.name(), factory.name()),
        }
    }
}

/// A node of the scope tree: what to produce, how to fill it, and the enclosing scope.
pub struct Context {
    parent: Option<Rc<Context>>,
    name: String,
    depth: usize,
    producer: Producer,
    definition: Definition,
    pub(crate) plan: OnceCell<Rc<CompiledPlan>>,
}

impl Context {
    /// Parses `definition`, resolves `handle` and links the new scope below `parent`.
    /// Without an explicit name the scope is named after the produced type.
    pub fn create(
        parent: Option<Rc<Context>>,
        repository: &Repository,
        name: Option<&str>,
        handle: Handle,
        definition: &str,
    ) -> Result<Rc<Self>, DefinitionError> {
        let definition = parse_definition(definition)?;
        let producer = resolve(parent.as_ref(), repository, handle)?;
        let name = name.map_or_else(|| producer.class().name().to_string(), str::to_string);
        log::debug!("Created scope '{}' producing {:?}", name, producer);
        Ok(Self::new(parent, name, producer, definition))
    }

    pub fn new(
        parent: Option<Rc<Context>>,
        name: impl Into<String>,
        producer: Producer,
        definition: Definition,
    ) -> Rc<Self> {
        let depth = parent.as_ref().map_or(0, |parent| parent.depth + 1);
        Rc::new(Self {
            parent,
            name: name.into(),
            depth,
            producer,
            definition,
            plan: OnceCell::new(),
        })
    }

    pub fn parent(&self) -> Option<&Rc<Context>> {
        self.parent.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distance from the root scope, which has depth 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.definition.sources
    }

    pub fn mapping(&self) -> &Mapping {
        &self.definition.mapping
    }

    /// Enclosing scopes, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Rc<Context>> + '_ {
        iter::successors(self.parent.as_ref(), |context| context.parent.as_ref())
    }

    pub fn is_compiled(&self) -> bool {
        self.plan.get().is_some()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("depth", &self.depth)
            .field("producer", &self.producer)
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

fn resolve(
    parent: Option<&Rc<Context>>,
    repository: &Repository,
    handle: Handle,
) -> Result<Producer, DefinitionError> {
    match handle {
        Handle::Class(info) => repository.require_class(info).map(Producer::Class),
        Handle::Instance { info, make } => {
            let class = repository
                .class(info)
                .unwrap_or_else(|| Rc::new(Class::bare(info)));
            Ok(Producer::Instance { class, make })
        }
        Handle::Factory(path) => resolve_factory(parent, repository, &path),
    }
}

fn resolve_factory(
    parent: Option<&Rc<Context>>,
    repository: &Repository,
    path: &str,
) -> Result<Producer, DefinitionError> {
    let Some((scope, method)) = path.split_once('.') else {
        return Err(DefinitionError::InvalidDefinition(format!(
            "factory must be given as <scope>.<method>: {}",
            path
        )));
    };
    let ancestor = iter::successors(parent, |context| context.parent.as_ref())
        .find(|context| context.name == scope)
        .cloned()
        .ok_or_else(|| DefinitionError::ContextNotFound(scope.to_string()))?;

    let class = Rc::clone(ancestor.producer.class());
    let mut candidates = class.factories(method);
    let factory = match (candidates.next(), candidates.next()) {
        (Some(factory), None) => Rc::clone(factory),
        (None, _) => {
            return Err(DefinitionError::UnknownMappingTarget {
                kind: "factory method",
                type_name: class.name().to_string(),
                member: method.to_string(),
            });
        }
        (Some(_), Some(_)) => {
            return Err(DefinitionError::InvalidDefinition(format!(
                "factory method is ambiguous: {}.{}",
                class.name(),
                method
            )));
        }
    };

    let produced = repository
        .class(factory.produced())
        .unwrap_or_else(|| Rc::new(Class::bare(factory.produced())));
    Ok(Producer::Factory {
        ancestor,
        factory,
        class: produced,
    })
}

// MARK: --- UNIT TESTS ---
