// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt::{Debug, Display};
use std::hash::Hash;

use crate::Graph;

///
/// A unique identifier for an Entry in the Graph's arena. Entries are never removed, so an
/// EntryId is valid for the lifetime of its Graph.
///
pub type EntryId = petgraph::graph::NodeIndex<u32>;

///
/// A Node in the Graph: a uniquely keyed computation whose value is memoized, and whose
/// dependencies are recorded as it runs.
///
/// The identity of a Node (its Eq/Hash impls) determines which Entry it is interned to: two
/// Nodes that compare equal share one set of values and edges.
///
pub trait Node: Clone + Debug + Display + Eq + Hash + Send + 'static {
    type Value: Clone + Debug + PartialEq + Send;
    type Error: NodeError;

    ///
    /// Computes the value of this Node. Nested reads must go back through `Graph::get`, which is
    /// how the Graph observes the dependency edges of the computation.
    ///
    /// Must be pure with respect to graph state: recomputing on equal inputs must yield an equal
    /// value.
    ///
    fn run(&self, graph: &Graph<Self>) -> Result<Self::Value, Self::Error>;

    ///
    /// Whether a user may assign this Node a value directly. Nodes that are not settable reject
    /// `set`/`clear_set` with a read-only error.
    ///
    fn settable(&self) -> bool;
}

///
/// Errors that the Graph needs to be able to produce in terms of the Node's own error type.
///
pub trait NodeError: Clone + Debug + Send {
    /// A write against a Node for which `settable` returns false.
    fn read_only(node: String) -> Self;
    /// A set, clear-set, overlay, or clear-overlay issued while any Node is being computed.
    fn mutation_during_computation(node: String) -> Self;
    /// An overlay operation issued while no Context is active on the Graph.
    fn no_active_context(node: String) -> Self;
    /// An overlay read against a Node that is not overlaid.
    fn not_overlaid(node: String) -> Self;
    /// A computation re-entered a Node that is already on the active evaluation chain.
    fn cyclic(path: Vec<String>) -> Self;
}
