// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::any::Any;
use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::sync::Arc;

use fnv::FnvHasher;
use smallvec::SmallVec;

use graph::NodeError;

pub(crate) type FNV = BuildHasherDefault<FnvHasher>;

///
/// The object-safe face of a dynamically typed value: anything equatable, hashable, and
/// printable can be stored for a node. Implemented blanketly; user code should not need to
/// implement it by hand.
///
pub trait ValueLike: Any + fmt::Debug + Send + Sync {
    fn eq_value(&self, other: &dyn ValueLike) -> bool;
    fn hash_value(&self) -> u64;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Eq + Hash + Send + Sync> ValueLike for T {
    fn eq_value(&self, other: &dyn ValueLike) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn hash_value(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        // NB: Two values of different types never compare equal, so the type is folded into the
        // hash to keep Eq and Hash consistent.
        self.type_id().hash(&mut hasher);
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

///
/// A dynamically typed, shareable value: what a node stores, what a method returns, and what an
/// argument tuple is made of.
///
#[derive(Clone)]
pub struct Value(Arc<dyn ValueLike>);

impl Value {
    pub fn new<T: ValueLike>(value: T) -> Value {
        Value(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.0.eq_value(other.0.as_ref())
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash_value());
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::new(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::new(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::new(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Value {
        Value::new(value)
    }
}

impl From<()> for Value {
    fn from(value: ()) -> Value {
        Value::new(value)
    }
}

///
/// The argument tuple of a node: differentiates calls of one method on one object. Stored
/// inline for the common zero-to-two argument cases.
///
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Args(SmallVec<[Value; 2]>);

impl Args {
    pub fn new<I: IntoIterator<Item = Value>>(args: I) -> Args {
        Args(args.into_iter().collect())
    }

    pub fn empty() -> Args {
        Args(SmallVec::new())
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[Value]> for Args {
    fn from(args: &[Value]) -> Args {
        Args(args.iter().cloned().collect())
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let items: Vec<String> = self.0.iter().map(|value| value.to_string()).collect();
        write!(f, "({})", items.join(", "))
    }
}

///
/// The single error type of the object model. Engine-level failures are structured; user
/// computation failures are carried as `Throw`.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Failure {
    /// A write against a node whose method does not carry the Settable flag.
    ReadOnly(String),
    /// A set, clear-set, overlay, or clear-overlay issued while the graph is computing.
    MutationDuringComputation(String),
    /// An overlay operation issued while no context is active.
    NoActiveContext(String),
    /// An overlay read against a node that is not overlaid.
    NotOverlaid(String),
    /// A computation re-entered a node already on the active evaluation chain.
    Cycle { path: Vec<String> },
    /// An object was instantiated with initial state that its type does not declare.
    InvalidInitializer(String),
    /// A user computation failed.
    Throw(String),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Failure::ReadOnly(node) => {
                write!(f, "Node {node} is read-only and cannot be set.")
            }
            Failure::MutationDuringComputation(node) => {
                write!(f, "Node {node} cannot be mutated while the graph is computing.")
            }
            Failure::NoActiveContext(node) => {
                write!(f, "Node {node} cannot be overlaid outside of a context.")
            }
            Failure::NotOverlaid(node) => write!(f, "Node {node} is not overlaid."),
            Failure::Cycle { path } => {
                write!(f, "Dependency cycle detected: {}", path.join(" -> "))
            }
            Failure::InvalidInitializer(msg) => write!(f, "Invalid initializer: {msg}"),
            Failure::Throw(msg) => write!(f, "{msg}"),
        }
    }
}

impl NodeError for Failure {
    fn read_only(node: String) -> Failure {
        Failure::ReadOnly(node)
    }

    fn mutation_during_computation(node: String) -> Failure {
        Failure::MutationDuringComputation(node)
    }

    fn no_active_context(node: String) -> Failure {
        Failure::NoActiveContext(node)
    }

    fn not_overlaid(node: String) -> Failure {
        Failure::NotOverlaid(node)
    }

    fn cyclic(path: Vec<String>) -> Failure {
        Failure::Cycle { path }
    }
}

impl From<String> for Failure {
    fn from(err: String) -> Failure {
        throw(err)
    }
}

pub fn throw(msg: String) -> Failure {
    Failure::Throw(msg)
}
