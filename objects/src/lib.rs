// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

mod core;
mod nodes;
mod types;

#[cfg(test)]
mod context_tests;

pub use crate::core::{throw, Args, Failure, Value, ValueLike};
pub use crate::nodes::{Binding, NodeChange, NodeKey};
pub use crate::types::{
    DelegateFn, MethodDescriptor, MethodFlags, MethodFn, Object, ObjectId, ObjectType,
    ObjectTypeBuilder,
};

///
/// The Graph type of the object model: entries are keyed by (object, method, arguments).
///
pub type ObjectGraph = graph::Graph<NodeKey>;
