// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use log::trace;

use graph::{Graph, Node};

use crate::core::{Args, Failure, Value};
use crate::types::{MethodDescriptor, Object};

///
/// The identity of one node in the object model: an object, one of its methods, and the
/// arguments of the call. Two keys with the same object identity, method ordinal, and argument
/// values resolve to the same graph entry.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NodeKey {
    object: Object,
    method: usize,
    args: Args,
}

impl NodeKey {
    pub(crate) fn new(object: Object, method: usize, args: Args) -> NodeKey {
        NodeKey {
            object,
            method,
            args,
        }
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        self.object.ty().method(self.method)
    }

    pub fn args(&self) -> &Args {
        &self.args
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}{}", self.object, self.descriptor().name(), self.args)
    }
}

impl Node for NodeKey {
    type Value = Value;
    type Error = Failure;

    fn run(&self, graph: &Graph<NodeKey>) -> Result<Value, Failure> {
        let callable = self.descriptor().callable().clone();
        callable.as_ref()(graph, &self.object, self.args.values())
    }

    fn settable(&self) -> bool {
        self.descriptor().is_settable()
    }
}

///
/// A graph method bound to an instance: the interface between a user object and the graph.
/// Calling it evaluates the underlying node; `set` and `overlay` write it, subject to the usual
/// guards.
///
#[derive(Clone)]
pub struct Binding {
    object: Object,
    method: usize,
}

impl Binding {
    pub(crate) fn new(object: Object, method: usize) -> Binding {
        Binding { object, method }
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn name(&self) -> &str {
        self.descriptor().name()
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        self.object.ty().method(self.method)
    }

    ///
    /// The node underlying this binding as called with the given arguments.
    ///
    pub fn node(&self, args: &[Value]) -> NodeKey {
        NodeKey::new(self.object.clone(), self.method, Args::from(args))
    }

    ///
    /// Evaluates the binding: returns the node's current value, computing it if necessary.
    ///
    pub fn get(&self, graph: &Graph<NodeKey>, args: &[Value]) -> Result<Value, Failure> {
        graph.get(self.node(args))
    }

    ///
    /// Assigns the node a value. If the method declares a write delegate, the write is rewritten
    /// into the delegate's list of target writes instead of touching this node.
    ///
    pub fn set(&self, graph: &Graph<NodeKey>, value: Value, args: &[Value]) -> Result<(), Failure> {
        if let Some(delegate) = self.descriptor().write_delegate().cloned() {
            let changes = delegate.as_ref()(graph, &self.object, &value, args)?;
            trace!(
                "Delegating write of {}.{} to {} target write(s)",
                self.object,
                self.name(),
                changes.len()
            );
            for change in changes {
                graph.set(change.node(), change.value)?;
            }
            return Ok(());
        }
        graph.set(self.node(args), value)
    }

    pub fn clear_set(&self, graph: &Graph<NodeKey>, args: &[Value]) -> Result<(), Failure> {
        graph.clear_set(self.node(args))
    }

    pub fn overlay(
        &self,
        graph: &Graph<NodeKey>,
        value: Value,
        args: &[Value],
    ) -> Result<(), Failure> {
        graph.overlay(self.node(args), value)
    }

    pub fn clear_overlay(&self, graph: &Graph<NodeKey>, args: &[Value]) -> Result<(), Failure> {
        graph.clear_overlay(self.node(args))
    }

    ///
    /// A pending write against this binding, for returning from a write delegate.
    ///
    pub fn change(&self, value: Value, args: &[Value]) -> NodeChange {
        NodeChange {
            object: self.object.clone(),
            method: self.method,
            args: Args::from(args),
            value,
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Binding({}.{})", self.object, self.name())
    }
}

///
/// A pending change to a node, as returned by a write delegate.
///
#[derive(Clone, Debug)]
pub struct NodeChange {
    object: Object,
    method: usize,
    args: Args,
    pub value: Value,
}

impl NodeChange {
    ///
    /// The node this change targets.
    ///
    pub fn node(&self) -> NodeKey {
        NodeKey::new(self.object.clone(), self.method, self.args.clone())
    }
}
