// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

// Make the entry module public so that consumers can introspect node state.
pub mod context;
pub mod entry;
mod node;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::hash::BuildHasherDefault;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use fnv::FnvHasher;
use log::{debug, trace};
use parking_lot::Mutex;
use petgraph::graph::DiGraph;
use petgraph::Direction;

pub use crate::context::{Context, ContextGuard};
pub use crate::entry::Entry;
pub use crate::node::{EntryId, Node, NodeError};

pub(crate) type FNV = BuildHasherDefault<FnvHasher>;

type PGraph<N> = DiGraph<Entry<N>, (), u32>;

///
/// The result of invalidating a node: how many caches were cleared, split into the node itself
/// and its transitive dependents.
///
#[derive(Debug, Eq, PartialEq)]
pub struct InvalidationResult {
    pub cleared: usize,
    pub dirtied: usize,
}

pub(crate) struct InnerGraph<N: Node> {
    nodes: HashMap<N, EntryId, FNV>,
    pg: PGraph<N>,
    /// The chain of entries currently being computed, outermost first.
    running: Vec<EntryId>,
    active_context: Option<Arc<Context<N>>>,
}

impl<N: Node> InnerGraph<N> {
    fn entry_id(&self, node: &N) -> Option<&EntryId> {
        self.nodes.get(node)
    }

    pub(crate) fn ensure_entry(&mut self, node: N) -> EntryId {
        if let Some(&id) = self.nodes.get(&node) {
            return id;
        }

        // New entry.
        let id = self.pg.add_node(Entry::new(node.clone()));
        self.nodes.insert(node, id);
        id
    }

    pub(crate) fn entry(&self, id: EntryId) -> &Entry<N> {
        self.pg
            .node_weight(id)
            .expect("Entries are never removed from the graph")
    }

    fn entry_mut(&mut self, id: EntryId) -> &mut Entry<N> {
        self.pg
            .node_weight_mut(id)
            .expect("Entries are never removed from the graph")
    }

    ///
    /// Records that src read dst during its computation. Edges are deduped, and accrue across
    /// computations: they are not pruned when a later computation no longer reads dst, which
    /// can cause spurious (conservative) invalidation.
    ///
    fn add_edge(&mut self, src: EntryId, dst: EntryId) {
        self.pg.update_edge(src, dst, ());
    }

    ///
    /// Clears the caches of the transitive dependents of the given entry, leaving the entry
    /// itself untouched. Returns the number of caches cleared.
    ///
    /// Set and overlay values are never cleared by invalidation: only computed values depend on
    /// other nodes.
    ///
    fn invalidate_outputs(&mut self, id: EntryId) -> usize {
        let roots: VecDeque<EntryId> = self.pg.neighbors_directed(id, Direction::Incoming).collect();
        let mut walked: HashSet<EntryId, FNV> = HashSet::default();
        let mut deque = roots;
        let mut cleared = 0;
        while let Some(id) = deque.pop_front() {
            if !walked.insert(id) {
                continue;
            }
            if self.entry_mut(id).invalidate_cache() {
                cleared += 1;
            }
            deque.extend(self.pg.neighbors_directed(id, Direction::Incoming));
        }
        cleared
    }

    fn write_set(&mut self, id: EntryId, value: N::Value) -> Result<(), N::Error> {
        if !self.entry(id).node().settable() {
            return Err(N::Error::read_only(self.entry(id).node().to_string()));
        }
        let dirtied = self.invalidate_outputs(id);
        trace!(
            "Set value of {} (dirtied {} dependents)",
            self.entry(id).node(),
            dirtied
        );
        self.entry_mut(id).write_set(value);
        Ok(())
    }

    fn clear_set(&mut self, id: EntryId) -> Result<(), N::Error> {
        if !self.entry(id).node().settable() {
            return Err(N::Error::read_only(self.entry(id).node().to_string()));
        }
        if !self.entry(id).is_set() {
            return Ok(());
        }
        let dirtied = self.invalidate_outputs(id);
        trace!(
            "Cleared set value of {} (dirtied {} dependents)",
            self.entry(id).node(),
            dirtied
        );
        self.entry_mut(id).clear_set();
        Ok(())
    }

    pub(crate) fn write_overlay(&mut self, id: EntryId, value: N::Value) {
        let dirtied = self.invalidate_outputs(id);
        trace!(
            "Overlaid {} (dirtied {} dependents)",
            self.entry(id).node(),
            dirtied
        );
        self.entry_mut(id).write_overlay(value);
    }

    pub(crate) fn clear_overlay(&mut self, id: EntryId) {
        if !self.entry(id).is_overlaid() {
            return;
        }
        let dirtied = self.invalidate_outputs(id);
        trace!(
            "Cleared overlay of {} (dirtied {} dependents)",
            self.entry(id).node(),
            dirtied
        );
        self.entry_mut(id).clear_overlay();
    }

    ///
    /// Begins a Walk from the given roots. The Walk will iterate over all entries reachable from
    /// the roots in the given direction, but not necessarily in topological order.
    ///
    fn walk(&self, roots: VecDeque<EntryId>, direction: Direction) -> Walk<'_, N> {
        Walk {
            graph: self,
            direction,
            deque: roots,
            walked: HashSet::default(),
        }
    }

    fn visualize(&self, roots: &[N], path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut f = BufWriter::new(file);

        f.write_all(b"digraph nodes {\n")?;
        f.write_all(b"  concentrate=true;\n")?;
        f.write_all(b"  rankdir=TB;\n")?;

        let root_ids = roots
            .iter()
            .filter_map(|node| self.entry_id(node))
            .cloned()
            .collect();

        for id in self.walk(root_ids, Direction::Outgoing) {
            let entry = self.entry(id);
            let fill = if entry.is_overlaid() {
                "lightblue"
            } else if entry.is_set() {
                "darkseagreen"
            } else if entry.is_cached() {
                "gray85"
            } else {
                "white"
            };

            // Write the node header.
            f.write_fmt(format_args!(
                "  \"{}\" [style=filled, fillcolor={}];\n",
                entry.node(),
                fill
            ))?;

            for dep_id in self.pg.neighbors(id) {
                // Write an entry per edge.
                f.write_fmt(format_args!(
                    "    \"{}\" -> \"{}\"\n",
                    entry.node(),
                    self.entry(dep_id).node()
                ))?;
            }
        }

        f.write_all(b"}\n")?;
        Ok(())
    }
}

///
/// A registry of uniquely interned Nodes, with the machinery to compute their values while
/// recording dependency edges, to propagate invalidation across those edges, and to apply
/// scoped overlays via Contexts.
///
/// Mutation (set, clear, overlay) is rejected while any Node is being computed: user
/// computations may freely read other Nodes, but never write them.
///
pub struct Graph<N: Node> {
    inner: Mutex<InnerGraph<N>>,
}

impl<N: Node> Graph<N> {
    pub fn new() -> Graph<N> {
        let inner = InnerGraph {
            nodes: HashMap::default(),
            pg: DiGraph::new(),
            running: Vec::new(),
            active_context: None,
        };
        Graph {
            inner: Mutex::new(inner),
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.nodes.len()
    }

    ///
    /// Whether a Node is currently being computed. While computing, all mutation is rejected.
    ///
    pub fn is_computing(&self) -> bool {
        let inner = self.inner.lock();
        !inner.running.is_empty()
    }

    ///
    /// Returns the value of the given Node, computing it if no overlay, set value, or cache is
    /// present.
    ///
    /// If a Node is currently being computed, an edge is recorded from it to the requested Node
    /// before the requested Node produces a value: edges bind to the reader, and survive even if
    /// the read fails (no cached state exists for a failed Node, so the edge is refreshed on
    /// retry).
    ///
    pub fn get(&self, node: N) -> Result<N::Value, N::Error> {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.ensure_entry(node.clone());
            if let Some(position) = inner.running.iter().position(|&running| running == id) {
                let mut path: Vec<String> = inner.running[position..]
                    .iter()
                    .map(|&running| inner.entry(running).node().to_string())
                    .collect();
                path.push(node.to_string());
                return Err(N::Error::cyclic(path));
            }
            if let Some(&src_id) = inner.running.last() {
                trace!(
                    "Adding dependency from {} to {}",
                    inner.entry(src_id).node(),
                    node
                );
                inner.add_edge(src_id, id);
            }
            if let Some(value) = inner.entry(id).current_value().cloned() {
                return Ok(value);
            }
            inner.running.push(id);
            id
        };

        // Run the computation without the lock held, so that nested reads can re-enter the
        // graph. The guard restores the running chain on all exit paths, including panics in
        // user code.
        let result = {
            let _running = RunningGuard { graph: self };
            node.run(self)
        };
        let value = result?;
        let mut inner = self.inner.lock();
        inner.entry_mut(id).complete(value.clone());
        Ok(value)
    }

    ///
    /// Assigns the Node an explicit value, invalidating the caches of its transitive dependents.
    /// The assigned value survives context entry and exit.
    ///
    pub fn set(&self, node: N, value: N::Value) -> Result<(), N::Error> {
        let mut inner = self.inner.lock();
        if !inner.running.is_empty() {
            return Err(N::Error::mutation_during_computation(node.to_string()));
        }
        let id = inner.ensure_entry(node);
        inner.write_set(id, value)
    }

    ///
    /// Clears a previously assigned value, if any, invalidating dependents.
    ///
    pub fn clear_set(&self, node: N) -> Result<(), N::Error> {
        let mut inner = self.inner.lock();
        if !inner.running.is_empty() {
            return Err(N::Error::mutation_during_computation(node.to_string()));
        }
        let id = inner.ensure_entry(node);
        inner.clear_set(id)
    }

    ///
    /// Overlays the Node's value within the active Context. Fails if no Context is active.
    ///
    pub fn overlay(&self, node: N, value: N::Value) -> Result<(), N::Error> {
        let mut inner = self.inner.lock();
        if !inner.running.is_empty() {
            return Err(N::Error::mutation_during_computation(node.to_string()));
        }
        match inner.active_context.clone() {
            Some(context) => {
                context.overlay_value(&mut inner, node, value);
                Ok(())
            }
            None => Err(N::Error::no_active_context(node.to_string())),
        }
    }

    ///
    /// Withdraws the overlay the active Context asserted on the Node, if any.
    ///
    pub fn clear_overlay(&self, node: N) -> Result<(), N::Error> {
        let mut inner = self.inner.lock();
        if !inner.running.is_empty() {
            return Err(N::Error::mutation_during_computation(node.to_string()));
        }
        match inner.active_context.clone() {
            Some(context) => {
                context.clear_overlay(&mut inner, &node);
                Ok(())
            }
            None => Err(N::Error::no_active_context(node.to_string())),
        }
    }

    ///
    /// Returns the Node's current overlay value, failing if it is not overlaid.
    ///
    pub fn get_overlay(&self, node: N) -> Result<N::Value, N::Error> {
        let inner = self.inner.lock();
        inner
            .entry_id(&node)
            .and_then(|&id| inner.entry(id).overlay_value().cloned())
            .ok_or_else(|| N::Error::not_overlaid(node.to_string()))
    }

    ///
    /// Clears the Node's own cache and the caches of its transitive dependents.
    ///
    pub fn invalidate(&self, node: &N) -> InvalidationResult {
        let mut inner = self.inner.lock();
        match inner.entry_id(node).cloned() {
            Some(id) => {
                let cleared = usize::from(inner.entry_mut(id).invalidate_cache());
                let dirtied = inner.invalidate_outputs(id);
                debug!("Invalidated {node}: cleared {cleared}, dirtied {dirtied}");
                InvalidationResult { cleared, dirtied }
            }
            None => InvalidationResult {
                cleared: 0,
                dirtied: 0,
            },
        }
    }

    pub fn is_set(&self, node: &N) -> bool {
        self.peek(node, Entry::is_set)
    }

    pub fn is_overlaid(&self, node: &N) -> bool {
        self.peek(node, Entry::is_overlaid)
    }

    pub fn is_cached(&self, node: &N) -> bool {
        self.peek(node, Entry::is_cached)
    }

    pub fn is_valid(&self, node: &N) -> bool {
        self.peek(node, Entry::is_valid)
    }

    fn peek(&self, node: &N, f: impl Fn(&Entry<N>) -> bool) -> bool {
        let inner = self.inner.lock();
        inner.entry_id(node).is_some_and(|&id| f(inner.entry(id)))
    }

    ///
    /// The Nodes read by the last computation of the given Node.
    ///
    pub fn inputs(&self, node: &N) -> Vec<N> {
        self.neighbors(node, Direction::Outgoing)
    }

    ///
    /// The Nodes whose last computation read the given Node.
    ///
    pub fn outputs(&self, node: &N) -> Vec<N> {
        self.neighbors(node, Direction::Incoming)
    }

    fn neighbors(&self, node: &N, direction: Direction) -> Vec<N> {
        let inner = self.inner.lock();
        inner
            .entry_id(node)
            .map(|&id| {
                inner
                    .pg
                    .neighbors_directed(id, direction)
                    .map(|dep_id| inner.entry(dep_id).node().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    ///
    /// All Nodes transitively read by the given roots, including the roots themselves.
    ///
    pub fn walk_inputs(&self, roots: &[N]) -> Vec<N> {
        self.walk_from(roots, Direction::Outgoing)
    }

    ///
    /// All Nodes transitively depending on the given roots, including the roots themselves.
    ///
    pub fn walk_outputs(&self, roots: &[N]) -> Vec<N> {
        self.walk_from(roots, Direction::Incoming)
    }

    fn walk_from(&self, roots: &[N], direction: Direction) -> Vec<N> {
        let inner = self.inner.lock();
        let root_ids = roots
            .iter()
            .filter_map(|node| inner.entry_id(node))
            .cloned()
            .collect();
        inner
            .walk(root_ids, direction)
            .map(|id| inner.entry(id).node().clone())
            .collect::<Vec<_>>()
    }

    ///
    /// Enters the given Context: makes it the active Context and applies all of its overlays
    /// (including inherited ones). The returned guard withdraws them and restores the previously
    /// active Context when dropped.
    ///
    pub fn enter_context(&self, context: Arc<Context<N>>) -> ContextGuard<'_, N> {
        let mut inner = self.inner.lock();
        let prev = inner.active_context.replace(context.clone());
        trace!("Entering context");
        for node in context.all_overlays(true).keys() {
            context.apply_overlay(&mut inner, node);
        }
        ContextGuard {
            graph: self,
            context,
            prev,
        }
    }

    pub(crate) fn exit_context(&self, context: &Arc<Context<N>>, prev: Option<Arc<Context<N>>>) {
        let mut inner = self.inner.lock();
        trace!("Exiting context");
        for node in context.all_overlays(true).keys() {
            context.clear_overlay(&mut inner, node);
        }
        inner.active_context = prev;
    }

    pub fn active_context(&self) -> Option<Arc<Context<N>>> {
        let inner = self.inner.lock();
        inner.active_context.clone()
    }

    ///
    /// Writes the subgraph reachable from the given roots in DOT format, colored by entry state.
    ///
    pub fn visualize(&self, roots: &[N], path: &Path) -> io::Result<()> {
        let inner = self.inner.lock();
        inner.visualize(roots, path)
    }
}

///
/// Restores the running chain when a computation finishes, on all exit paths.
///
struct RunningGuard<'g, N: Node> {
    graph: &'g Graph<N>,
}

impl<N: Node> Drop for RunningGuard<'_, N> {
    fn drop(&mut self) {
        self.graph.inner.lock().running.pop();
    }
}

///
/// Represents the state of a particular walk through a Graph. Implements Iterator and has the
/// same lifetime as the Graph itself.
///
struct Walk<'a, N: Node> {
    graph: &'a InnerGraph<N>,
    direction: Direction,
    deque: VecDeque<EntryId>,
    walked: HashSet<EntryId, FNV>,
}

impl<N: Node> Iterator for Walk<'_, N> {
    type Item = EntryId;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.deque.pop_front() {
            if !self.walked.insert(id) {
                continue;
            }
            self.deque
                .extend(self.graph.pg.neighbors_directed(id, self.direction));
            return Some(id);
        }
        None
    }
}
