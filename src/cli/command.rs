// src/cli/command.rs

use crate::{
    core::{
        class::{AnyBox, CommandMethod},
        compiler::CompiledPlan,
        context::Context,
        defaults::Defaults,
        registry::Repository,
    },
    errors::{DefinitionError, Result},
};
use std::{fmt, rc::Rc};

/// A named, compiled scope with a located entry point.
pub struct Command {
    name: String,
    context: Rc<Context>,
    plan: Rc<CompiledPlan>,
    method: Rc<CommandMethod>,
}

impl Command {
    /// Compiles `context` and locates its entry point: the mapping's command override,
    /// or `run`.
    pub fn create(
        name: impl Into<String>,
        context: Rc<Context>,
        repository: &Repository,
    ) -> Result<Self, DefinitionError> {
        let plan = context.compile(repository)?;
        let class = context.producer().class();
        let method_name = context.mapping().command_or_default();
        let method = class.command(method_name).cloned().ok_or_else(|| {
            DefinitionError::CommandMethodNotFound {
                type_name: class.name().to_string(),
                method: method_name.to_string(),
            }
        })?;
        Ok(Self {
            name: name.into(),
            context,
            plan,
            method,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Rc<Context> {
        &self.context
    }

    pub fn plan(&self) -> &Rc<CompiledPlan> {
        &self.plan
    }

    /// Binds `args` and returns the command's instance without running it.
    pub fn instantiate<S: AsRef<str>>(&self, defaults: &Defaults, args: &[S]) -> Result<AnyBox> {
        self.plan.run(defaults, args)
    }

    pub fn invoke(&self, instance: &mut AnyBox) -> Result<i32> {
        log::debug!("Invoking {}.{}()", self.name, self.method.name());
        Ok(self.method.invoke(instance.as_mut())?)
    }

    /// Binds `args`, then calls the entry point and returns its exit code.
    pub fn run<S: AsRef<str>>(&self, defaults: &Defaults, args: &[S]) -> Result<i32> {
        let mut instance = self.instantiate(defaults, args)?;
        self.invoke(&mut instance)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("scope", &self.context.name())
            .field("method", &self.method.name())
            .finish()
    }
}

// MARK: --- UNIT TESTS ---
