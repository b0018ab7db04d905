// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::node::Node;

///
/// An Entry holds the stored state for one Node: an explicitly assigned value (which survives
/// across contexts), a context-scoped overlay value (which shadows it), and the most recently
/// computed value.
///
/// At most one of the three is consulted per read, in overlay, set, cache precedence order. The
/// input/output edges of the Entry live in the Graph's arena rather than here.
///
pub struct Entry<N: Node> {
    node: N,
    set: Option<N::Value>,
    overlay: Option<N::Value>,
    cached: Option<N::Value>,
}

impl<N: Node> Entry<N> {
    pub(crate) fn new(node: N) -> Entry<N> {
        Entry {
            node,
            set: None,
            overlay: None,
            cached: None,
        }
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    ///
    /// The value a read of this Entry observes without recomputation, if any.
    ///
    pub fn current_value(&self) -> Option<&N::Value> {
        self.overlay
            .as_ref()
            .or(self.set.as_ref())
            .or(self.cached.as_ref())
    }

    pub fn is_overlaid(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn is_set(&self) -> bool {
        self.set.is_some()
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    ///
    /// A valid Entry is one that a read would not recompute.
    ///
    pub fn is_valid(&self) -> bool {
        self.is_overlaid() || self.is_set() || self.is_cached()
    }

    pub(crate) fn overlay_value(&self) -> Option<&N::Value> {
        self.overlay.as_ref()
    }

    // NB: Writes do not touch the cached value: a set or overlay supersedes the cache in
    // precedence, but the cache stays valid for when the write is cleared again.

    pub(crate) fn write_set(&mut self, value: N::Value) {
        self.set = Some(value);
    }

    pub(crate) fn clear_set(&mut self) {
        self.set = None;
    }

    pub(crate) fn write_overlay(&mut self, value: N::Value) {
        self.overlay = Some(value);
    }

    pub(crate) fn clear_overlay(&mut self) {
        self.overlay = None;
    }

    pub(crate) fn complete(&mut self, value: N::Value) {
        self.cached = Some(value);
    }

    ///
    /// Drops the cached value, returning true if there was one to drop.
    ///
    pub(crate) fn invalidate_cache(&mut self) -> bool {
        self.cached.take().is_some()
    }
}
