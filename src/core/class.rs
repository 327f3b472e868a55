// src/core/class.rs

//! Declarative producer registration.
//!
//! A [`Class`] lists everything the binder may do with a type: the constructors it can
//! call, the fields and methods a mapping may write to, the factory methods descendant
//! scopes may invoke and the command entry points. Overload resolution works on these
//! lists, so nothing is looked up at run time by anything but name and `TypeId`.

use anyhow::{Result, anyhow};
use std::{
    any::{Any, TypeId, type_name},
    fmt,
    marker::PhantomData,
    rc::Rc,
};

/// An owned value of some registered type.
pub type AnyBox = Box<dyn Any>;

/// An instance shared with descendant scopes.
pub type Shared = Rc<dyn Any>;

/// Runtime identity of a type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
}

impl TypeInfo {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The last path segment of the type name, without generic arguments.
    pub fn short_name(&self) -> &'static str {
        let plain = self.name.split('<').next().unwrap_or(self.name);
        plain.rsplit("::").next().unwrap_or(plain)
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// --- VALUES AND SHAPES ---

/// A parsed argument value on its way into a slot, field or method.
pub enum Value {
    Scalar(AnyBox),
    List(Vec<AnyBox>),
}

impl Value {
    pub fn into_scalar<V: 'static>(self) -> Result<V> {
        match self {
            Self::Scalar(value) => downcast(value),
            Self::List(_) => Err(anyhow!(
                "expected a single {}, got a list",
                type_name::<V>()
            )),
        }
    }

    pub fn into_list<V: 'static>(self) -> Result<Vec<V>> {
        match self {
            Self::List(items) => items.into_iter().map(downcast).collect(),
            Self::Scalar(_) => Err(anyhow!(
                "expected a list of {}, got a single value",
                type_name::<V>()
            )),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(_) => f.write_str("Scalar(..)"),
            Self::List(items) => write!(f, "List({} item(s))", items.len()),
        }
    }
}

fn downcast<V: 'static>(value: AnyBox) -> Result<V> {
    value
        .downcast::<V>()
        .map(|value| *value)
        .map_err(|_| anyhow!("expected a value of type {}", type_name::<V>()))
}

/// What a slot or member accepts: an element type, single or repeated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    pub element: TypeInfo,
    pub list: bool,
}

impl Shape {
    pub fn scalar<V: 'static>() -> Self {
        Self {
            element: TypeInfo::of::<V>(),
            list: false,
        }
    }

    pub fn list<V: 'static>() -> Self {
        Self {
            element: TypeInfo::of::<V>(),
            list: true,
        }
    }
}

/// A formal parameter of a constructor or factory method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Param {
    /// Filled from the next unmapped source.
    Value(Shape),
    /// Filled with the instance of an ancestor scope producing this type.
    Context(TypeInfo),
}

impl Param {
    pub fn value<V: 'static>() -> Self {
        Self::Value(Shape::scalar::<V>())
    }

    pub fn list<V: 'static>() -> Self {
        Self::Value(Shape::list::<V>())
    }

    pub fn context<C: 'static>() -> Self {
        Self::Context(TypeInfo::of::<C>())
    }
}

// --- SLOTS ---

pub(crate) enum Slot {
    Value(Value),
    Context(Shared),
}

/// The actual arguments of one constructor or factory call, in formal parameter order.
/// Built once all slots are filled and handed over by value.
pub struct Slots {
    items: std::vec::IntoIter<Slot>,
    position: usize,
}

impl Slots {
    pub(crate) fn new(items: Vec<Slot>) -> Self {
        Self {
            items: items.into_iter(),
            position: 0,
        }
    }

    fn next_slot(&mut self) -> Result<Slot> {
        self.position += 1;
        self.items
            .next()
            .ok_or_else(|| anyhow!("no argument at position {}", self.position))
    }

    /// Takes the next slot as a single value.
    pub fn value<V: 'static>(&mut self) -> Result<V> {
        match self.next_slot()? {
            Slot::Value(value) => value.into_scalar(),
            Slot::Context(_) => Err(anyhow!(
                "argument {} is a context, not a value",
                self.position
            )),
        }
    }

    /// Takes the next slot as a list of values.
    pub fn list<V: 'static>(&mut self) -> Result<Vec<V>> {
        match self.next_slot()? {
            Slot::Value(value) => value.into_list(),
            Slot::Context(_) => Err(anyhow!(
                "argument {} is a context, not a list",
                self.position
            )),
        }
    }

    /// Takes the next slot as the instance of an ancestor scope.
    pub fn context<C: 'static>(&mut self) -> Result<Rc<C>> {
        match self.next_slot()? {
            Slot::Context(instance) => instance
                .downcast::<C>()
                .map_err(|_| anyhow!("expected context of type {}", type_name::<C>())),
            Slot::Value(_) => Err(anyhow!(
                "argument {} is a value, not a context",
                self.position
            )),
        }
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl fmt::Debug for Slots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slots")
            .field("position", &self.position)
            .field("remaining", &self.remaining())
            .finish()
    }
}

// --- MEMBERS ---

type BuildFn = dyn Fn(Slots) -> Result<AnyBox>;
type ApplyFn = dyn Fn(&mut dyn Any, Value) -> Result<()>;
type FactoryFn = dyn Fn(&dyn Any, Slots) -> Result<AnyBox>;
type CommandFn = dyn Fn(&mut dyn Any) -> Result<i32>;

/// One way to construct a type.
pub struct Recipe {
    params: Vec<Param>,
    build: Box<BuildFn>,
}

impl Recipe {
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub(crate) fn invoke(&self, slots: Slots) -> Result<AnyBox> {
        (self.build)(slots)
    }
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe").field("params", &self.params).finish()
    }
}

/// A field or method a mapping can write to after construction.
pub struct Member {
    name: String,
    shape: Shape,
    apply: Box<ApplyFn>,
}

impl Member {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub(crate) fn apply(&self, instance: &mut dyn Any, value: Value) -> Result<()> {
        (self.apply)(instance, value)
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish()
    }
}

/// A method on an instance that produces the instance of a nested scope.
pub struct Factory {
    name: String,
    params: Vec<Param>,
    produced: TypeInfo,
    invoke: Box<FactoryFn>,
}

impl Factory {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn produced(&self) -> TypeInfo {
        self.produced
    }

    pub(crate) fn invoke(&self, receiver: &dyn Any, slots: Slots) -> Result<AnyBox> {
        (self.invoke)(receiver, slots)
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("produced", &self.produced)
            .finish()
    }
}

/// A command entry point: takes no arguments, returns nothing or an exit code.
pub struct CommandMethod {
    name: String,
    invoke: Box<CommandFn>,
}

impl CommandMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, instance: &mut dyn Any) -> Result<i32> {
        (self.invoke)(instance)
    }
}

impl fmt::Debug for CommandMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandMethod")
            .field("name", &self.name)
            .finish()
    }
}

/// Return types allowed for command methods.
pub trait ExitStatus {
    fn code(self) -> i32;
}

impl ExitStatus for () {
    fn code(self) -> i32 {
        0
    }
}

impl ExitStatus for i32 {
    fn code(self) -> i32 {
        self
    }
}

// --- CLASS ---

/// Everything the binder knows about one type.
#[derive(Debug)]
pub struct Class {
    info: TypeInfo,
    name: String,
    constructors: Vec<Rc<Recipe>>,
    fields: Vec<Rc<Member>>,
    methods: Vec<Rc<Member>>,
    factories: Vec<Rc<Factory>>,
    commands: Vec<Rc<CommandMethod>>,
}

impl Class {
    /// Starts the registration of `T`.
    pub fn of<T: 'static>() -> ClassBuilder<T> {
        ClassBuilder {
            class: Self::bare(TypeInfo::of::<T>()),
            _marker: PhantomData,
        }
    }

    /// A class without any registered constructor or member.
    pub fn bare(info: TypeInfo) -> Self {
        Self {
            info,
            name: info.short_name().to_string(),
            constructors: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            factories: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn type_info(&self) -> TypeInfo {
        self.info
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constructors(&self) -> &[Rc<Recipe>] {
        &self.constructors
    }

    pub fn field(&self, name: &str) -> Option<&Rc<Member>> {
        self.fields.iter().find(|member| member.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&Rc<Member>> {
        self.methods.iter().find(|member| member.name == name)
    }

    pub fn factories<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Rc<Factory>> + 'a {
        self.factories
            .iter()
            .filter(move |factory| factory.name == name)
    }

    pub fn command(&self, name: &str) -> Option<&Rc<CommandMethod>> {
        self.commands.iter().find(|command| command.name == name)
    }
}

/// Typed builder for a [`Class`]; every closure receives `T` itself.
pub struct ClassBuilder<T> {
    class: Class,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for ClassBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBuilder")
            .field("class", &self.class)
            .finish()
    }
}

fn instance_mismatch<T>() -> anyhow::Error {
    anyhow!("instance is not a {}", type_name::<T>())
}

impl<T: 'static> ClassBuilder<T> {
    /// Overrides the name used when a scope's name is inferred from this class.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.class.name = name.into();
        self
    }

    pub fn constructor<F>(mut self, params: impl IntoIterator<Item = Param>, build: F) -> Self
    where
        F: Fn(&mut Slots) -> Result<T> + 'static,
    {
        let build = move |mut slots: Slots| -> Result<AnyBox> {
            build(&mut slots).map(|instance| Box::new(instance) as AnyBox)
        };
        self.class.constructors.push(Rc::new(Recipe {
            params: params.into_iter().collect(),
            build: Box::new(build),
        }));
        self
    }

    pub fn field<V, F>(mut self, name: impl Into<String>, set: F) -> Self
    where
        V: 'static,
        F: Fn(&mut T, V) + 'static,
    {
        let apply = move |instance: &mut dyn Any, value: Value| -> Result<()> {
            let instance = instance.downcast_mut::<T>().ok_or_else(instance_mismatch::<T>)?;
            set(instance, value.into_scalar()?);
            Ok(())
        };
        self.class.fields.push(member(name, Shape::scalar::<V>(), apply));
        self
    }

    pub fn list_field<V, F>(mut self, name: impl Into<String>, set: F) -> Self
    where
        V: 'static,
        F: Fn(&mut T, Vec<V>) + 'static,
    {
        let apply = move |instance: &mut dyn Any, value: Value| -> Result<()> {
            let instance = instance.downcast_mut::<T>().ok_or_else(instance_mismatch::<T>)?;
            set(instance, value.into_list()?);
            Ok(())
        };
        self.class.fields.push(member(name, Shape::list::<V>(), apply));
        self
    }

    /// A one-argument method. Mapped with `method*(source)` it is called once per item.
    pub fn method<V, F>(mut self, name: impl Into<String>, call: F) -> Self
    where
        V: 'static,
        F: Fn(&mut T, V) -> Result<()> + 'static,
    {
        let apply = move |instance: &mut dyn Any, value: Value| -> Result<()> {
            let instance = instance.downcast_mut::<T>().ok_or_else(instance_mismatch::<T>)?;
            call(instance, value.into_scalar()?)
        };
        self.class.methods.push(member(name, Shape::scalar::<V>(), apply));
        self
    }

    pub fn list_method<V, F>(mut self, name: impl Into<String>, call: F) -> Self
    where
        V: 'static,
        F: Fn(&mut T, Vec<V>) -> Result<()> + 'static,
    {
        let apply = move |instance: &mut dyn Any, value: Value| -> Result<()> {
            let instance = instance.downcast_mut::<T>().ok_or_else(instance_mismatch::<T>)?;
            call(instance, value.into_list()?)
        };
        self.class.methods.push(member(name, Shape::list::<V>(), apply));
        self
    }

    /// A method producing the instance of a nested scope, referenced as `"<scope>.<name>"`.
    pub fn factory<R, F>(
        mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = Param>,
        produce: F,
    ) -> Self
    where
        R: 'static,
        F: Fn(&T, &mut Slots) -> Result<R> + 'static,
    {
        let invoke = move |receiver: &dyn Any, mut slots: Slots| -> Result<AnyBox> {
            let receiver = receiver.downcast_ref::<T>().ok_or_else(instance_mismatch::<T>)?;
            produce(receiver, &mut slots).map(|instance| Box::new(instance) as AnyBox)
        };
        self.class.factories.push(Rc::new(Factory {
            name: name.into(),
            params: params.into_iter().collect(),
            produced: TypeInfo::of::<R>(),
            invoke: Box::new(invoke),
        }));
        self
    }

    pub fn command<R, F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        R: ExitStatus,
        F: Fn(&mut T) -> Result<R> + 'static,
    {
        let invoke = move |instance: &mut dyn Any| -> Result<i32> {
            let instance = instance.downcast_mut::<T>().ok_or_else(instance_mismatch::<T>)?;
            run(instance).map(ExitStatus::code)
        };
        self.class.commands.push(Rc::new(CommandMethod {
            name: name.into(),
            invoke: Box::new(invoke),
        }));
        self
    }

    pub fn build(self) -> Class {
        self.class
    }
}

fn member(
    name: impl Into<String>,
    shape: Shape,
    apply: impl Fn(&mut dyn Any, Value) -> Result<()> + 'static,
) -> Rc<Member> {
    Rc::new(Member {
        name: name.into(),
        shape,
        apply: Box::new(apply),
    })
}
