// src/core/mod.rs

pub mod binder;
pub mod class;
pub mod compiler;
pub mod context;
pub mod defaults;
pub mod grammar;
pub mod registry;
