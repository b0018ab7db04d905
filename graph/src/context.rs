// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::node::Node;
use crate::{Graph, InnerGraph, FNV};

///
/// A Context is a scope holding a set of overlays: temporary node values that are applied when
/// the Context is entered and withdrawn when it exits, without disturbing the nodes' set values
/// or the overlays of enclosing scopes.
///
/// A Context may be given a parent at construction time, in which case the parent's overlays are
/// inherited (and applied on entry) unless shadowed by this Context's own. Independently of that
/// chain, entering a Context while another is active shadows the outer Context's applied
/// overlays per node, saving the prior values so that exit can reassert them.
///
/// Contexts may be re-entered any number of times, but a Context instance must not be entered
/// again while it is already active: the saved prior values are keyed per node, not per entry.
///
pub struct Context<N: Node> {
    parent: Option<Arc<Context<N>>>,
    state: Mutex<State<N>>,
}

struct State<N: Node> {
    /// Overlay values contributed by this Context, by node.
    overlays: HashMap<N, N::Value, FNV>,
    /// Prior overlay values (from outer scopes) that this Context has shadowed, by node.
    saved: HashMap<N, N::Value, FNV>,
    /// Nodes whose current overlay was asserted by this Context.
    applied: HashSet<N, FNV>,
}

impl<N: Node> Context<N> {
    pub fn new() -> Arc<Context<N>> {
        Arc::new(Context {
            parent: None,
            state: Mutex::new(State {
                overlays: HashMap::default(),
                saved: HashMap::default(),
                applied: HashSet::default(),
            }),
        })
    }

    ///
    /// Creates a child of this Context, which inherits (and may shadow) its overlays.
    ///
    pub fn child(self: &Arc<Self>) -> Arc<Context<N>> {
        Arc::new(Context {
            parent: Some(self.clone()),
            state: Mutex::new(State {
                overlays: HashMap::default(),
                saved: HashMap::default(),
                applied: HashSet::default(),
            }),
        })
    }

    pub fn parent(&self) -> Option<&Arc<Context<N>>> {
        self.parent.as_ref()
    }

    ///
    /// Records an overlay in this Context without applying it to the node. It will be applied
    /// the next time the Context is entered.
    ///
    pub fn add_overlay(&self, node: N, value: N::Value) {
        self.state.lock().overlays.insert(node, value);
    }

    ///
    /// Erases an overlay from this Context without un-applying it from the node.
    ///
    pub fn remove_overlay(&self, node: &N) {
        self.state.lock().overlays.remove(node);
    }

    ///
    /// Whether this Context (or, optionally, any of its ancestors) records an overlay for the
    /// node.
    ///
    pub fn has_overlay(&self, node: &N, include_parent: bool) -> bool {
        if self.state.lock().overlays.contains_key(node) {
            return true;
        }
        include_parent
            && self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.has_overlay(node, true))
    }

    ///
    /// The overlay value for the node as seen from this Context: its own if recorded, otherwise
    /// the nearest ancestor's.
    ///
    pub fn effective_overlay(&self, node: &N, include_parent: bool) -> Option<N::Value> {
        if let Some(value) = self.state.lock().overlays.get(node) {
            return Some(value.clone());
        }
        if include_parent {
            self.parent
                .as_ref()
                .and_then(|parent| parent.effective_overlay(node, true))
        } else {
            None
        }
    }

    ///
    /// All overlays visible from this Context, with local entries shadowing inherited ones.
    ///
    pub fn all_overlays(&self, include_parent: bool) -> HashMap<N, N::Value, FNV> {
        let mut overlays = if include_parent {
            self.parent
                .as_ref()
                .map(|parent| parent.all_overlays(true))
                .unwrap_or_default()
        } else {
            HashMap::default()
        };
        for (node, value) in self.state.lock().overlays.iter() {
            overlays.insert(node.clone(), value.clone());
        }
        overlays
    }

    ///
    /// Records an overlay and immediately asserts it on the node.
    ///
    pub(crate) fn overlay_value(&self, inner: &mut InnerGraph<N>, node: N, value: N::Value) {
        let mut state = self.state.lock();
        state.overlays.insert(node.clone(), value);
        self.apply_overlay_locked(inner, &mut state, &node);
    }

    pub(crate) fn apply_overlay(&self, inner: &mut InnerGraph<N>, node: &N) {
        let mut state = self.state.lock();
        self.apply_overlay_locked(inner, &mut state, node);
    }

    ///
    /// Asserts the effective overlay for the node, stashing away any overlay asserted by an
    /// outer scope so it can be reasserted when this Context withdraws.
    ///
    fn apply_overlay_locked(&self, inner: &mut InnerGraph<N>, state: &mut State<N>, node: &N) {
        let value = match state.overlays.get(node) {
            Some(value) => value.clone(),
            None => match self
                .parent
                .as_ref()
                .and_then(|parent| parent.effective_overlay(node, true))
            {
                Some(value) => value,
                None => return,
            },
        };
        let id = inner.ensure_entry(node.clone());
        if !state.applied.contains(node) {
            // If an outer scope's overlay is being shadowed, save it for reassertion on exit.
            if let Some(prior) = inner.entry(id).overlay_value().cloned() {
                trace!("Context shadowing existing overlay of {node}");
                state.saved.insert(node.clone(), prior);
            }
        }
        inner.write_overlay(id, value);
        state.applied.insert(node.clone());
    }

    ///
    /// Withdraws the overlay this Context asserted on the node, if any, reasserting the value
    /// saved from an outer scope when one was shadowed.
    ///
    pub(crate) fn clear_overlay(&self, inner: &mut InnerGraph<N>, node: &N) {
        let mut state = self.state.lock();
        let known = state.overlays.contains_key(node)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.has_overlay(node, true));
        if !known || !state.applied.contains(node) {
            return;
        }
        let id = inner.ensure_entry(node.clone());
        match state.saved.remove(node) {
            Some(prior) => {
                // NB: Reasserting the outer scope's overlay re-invalidates dependents of the
                // node, exactly as the original application did.
                inner.write_overlay(id, prior);
            }
            None => {
                inner.clear_overlay(id);
            }
        }
        state.applied.remove(node);
    }
}

///
/// An entered Context. Dropping the guard withdraws every overlay the Context applied and
/// restores the previously active Context, on all exit paths.
///
#[must_use = "dropping the guard exits the context"]
pub struct ContextGuard<'g, N: Node> {
    pub(crate) graph: &'g Graph<N>,
    pub(crate) context: Arc<Context<N>>,
    pub(crate) prev: Option<Arc<Context<N>>>,
}

impl<N: Node> ContextGuard<'_, N> {
    pub fn context(&self) -> &Arc<Context<N>> {
        &self.context
    }
}

impl<N: Node> Drop for ContextGuard<'_, N> {
    fn drop(&mut self) {
        self.graph.exit_context(&self.context, self.prev.take());
    }
}
