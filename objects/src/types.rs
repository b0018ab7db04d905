// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use indexmap::IndexMap;
use log::trace;

use graph::Graph;

use crate::core::{Failure, Value, FNV};
use crate::nodes::{Binding, NodeChange, NodeKey};

bitflags! {
    ///
    /// Declaration-time flags of a graph method.
    ///
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct MethodFlags: u32 {
        /// The node may be written directly by a user.
        const SETTABLE = 0x1;
        /// The node participates in saved-state extraction.
        const SERIALIZABLE = 0x2;
        /// Settable and Serializable: the node is part of the object's saved state.
        const SAVED = Self::SETTABLE.bits() | Self::SERIALIZABLE.bits();
    }
}

///
/// The computation of a graph method: receives the graph (through which nested reads are
/// tracked), the object the method is bound to, and the call arguments.
///
pub type MethodFn =
    Arc<dyn Fn(&Graph<NodeKey>, &Object, &[Value]) -> Result<Value, Failure> + Send + Sync>;

///
/// A write delegate: rewrites a requested set into a list of target writes on other nodes.
///
pub type DelegateFn = Arc<
    dyn Fn(&Graph<NodeKey>, &Object, &Value, &[Value]) -> Result<Vec<NodeChange>, Failure>
        + Send
        + Sync,
>;

///
/// Immutable metadata for one registered computation on an ObjectType.
///
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    flags: MethodFlags,
    callable: MethodFn,
    write_delegate: Option<DelegateFn>,
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    pub fn is_settable(&self) -> bool {
        self.flags.contains(MethodFlags::SETTABLE)
    }

    pub fn is_serializable(&self) -> bool {
        self.flags.contains(MethodFlags::SERIALIZABLE)
    }

    ///
    /// Whether the method is part of the object's saved state. Purely computed values are never
    /// saved, so this requires Settable as well as Serializable.
    ///
    pub fn is_saved(&self) -> bool {
        self.flags.contains(MethodFlags::SAVED)
    }

    pub fn delegates_writes(&self) -> bool {
        self.write_delegate.is_some()
    }

    pub(crate) fn callable(&self) -> &MethodFn {
        &self.callable
    }

    pub(crate) fn write_delegate(&self) -> Option<&DelegateFn> {
        self.write_delegate.as_ref()
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

///
/// A type of graph object: an ordered collection of method descriptors. Constructed once via
/// the builder; instances are produced with `instantiate`.
///
/// Instantiation is closed: there is no user-overridable initializer, only the optional initial
/// values accepted by `instantiate_with` (which are applied through the normal set path).
///
pub struct ObjectType {
    name: String,
    methods: Vec<MethodDescriptor>,
    by_name: HashMap<String, usize, FNV>,
}

impl ObjectType {
    pub fn builder(name: &str) -> ObjectTypeBuilder {
        ObjectTypeBuilder {
            name: name.to_owned(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    ///
    /// All registered methods, in declaration order. Ordinals index into this slice.
    ///
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn method(&self, ordinal: usize) -> &MethodDescriptor {
        &self.methods[ordinal]
    }

    pub fn method_named(&self, name: &str) -> Option<(usize, &MethodDescriptor)> {
        self.by_name
            .get(name)
            .map(|&ordinal| (ordinal, &self.methods[ordinal]))
    }

    ///
    /// The subset of methods participating in saved-state extraction, with their ordinals.
    ///
    pub fn saved_methods(&self) -> impl Iterator<Item = (usize, &MethodDescriptor)> + '_ {
        self.methods
            .iter()
            .enumerate()
            .filter(|(_, method)| method.is_saved())
    }

    pub fn instantiate(self: &Arc<Self>) -> Object {
        Object::new(self.clone())
    }

    ///
    /// Instantiates an object with initial values for some of its settable methods, applied
    /// through the normal (zero-argument) set path, so write delegates are honored.
    ///
    pub fn instantiate_with<S, I>(
        self: &Arc<Self>,
        graph: &Graph<NodeKey>,
        values: I,
    ) -> Result<Object, Failure>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = (S, Value)>,
    {
        let object = self.instantiate();
        for (name, value) in values {
            let name = name.as_ref();
            let (ordinal, _) = self.method_named(name).ok_or_else(|| {
                Failure::InvalidInitializer(format!(
                    "{name} is not a graph method of {}",
                    self.name
                ))
            })?;
            object.binding_at(ordinal).set(graph, value, &[])?;
        }
        Ok(object)
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ObjectType")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .finish()
    }
}

///
/// Collects method declarations for an ObjectType. Declaration order determines method
/// ordinals.
///
pub struct ObjectTypeBuilder {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl ObjectTypeBuilder {
    ///
    /// Declares a read-only computed method.
    ///
    pub fn method<F>(self, name: &str, callable: F) -> ObjectTypeBuilder
    where
        F: Fn(&Graph<NodeKey>, &Object, &[Value]) -> Result<Value, Failure>
            + Send
            + Sync
            + 'static,
    {
        self.method_with(name, MethodFlags::empty(), callable)
    }

    pub fn method_with<F>(
        mut self,
        name: &str,
        flags: MethodFlags,
        callable: F,
    ) -> ObjectTypeBuilder
    where
        F: Fn(&Graph<NodeKey>, &Object, &[Value]) -> Result<Value, Failure>
            + Send
            + Sync
            + 'static,
    {
        self.methods.push(MethodDescriptor {
            name: name.to_owned(),
            flags,
            callable: Arc::new(callable),
            write_delegate: None,
        });
        self
    }

    ///
    /// Declares a method whose set operations are rewritten by the given delegate into writes
    /// against other nodes.
    ///
    pub fn delegated<F, D>(
        mut self,
        name: &str,
        flags: MethodFlags,
        callable: F,
        delegate: D,
    ) -> ObjectTypeBuilder
    where
        F: Fn(&Graph<NodeKey>, &Object, &[Value]) -> Result<Value, Failure>
            + Send
            + Sync
            + 'static,
        D: Fn(&Graph<NodeKey>, &Object, &Value, &[Value]) -> Result<Vec<NodeChange>, Failure>
            + Send
            + Sync
            + 'static,
    {
        self.methods.push(MethodDescriptor {
            name: name.to_owned(),
            flags,
            callable: Arc::new(callable),
            write_delegate: Some(Arc::new(delegate)),
        });
        self
    }

    pub fn build(self) -> Result<Arc<ObjectType>, Failure> {
        let mut by_name: HashMap<String, usize, FNV> = HashMap::default();
        for (ordinal, method) in self.methods.iter().enumerate() {
            if by_name.insert(method.name.clone(), ordinal).is_some() {
                return Err(Failure::InvalidInitializer(format!(
                    "{} declares method {} more than once",
                    self.name, method.name
                )));
            }
        }
        Ok(Arc::new(ObjectType {
            name: self.name,
            methods: self.methods,
            by_name,
        }))
    }
}

///
/// The identity of an Object: stable for the life of the process, independent of any graph.
///
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectId(u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

struct ObjectInner {
    id: ObjectId,
    ty: Arc<ObjectType>,
}

///
/// An instance of an ObjectType: an identity-bearing handle. Cloning shares the identity, and
/// equality and hashing follow it, so one instance always resolves to the same nodes.
///
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

impl Object {
    pub(crate) fn new(ty: Arc<ObjectType>) -> Object {
        let id = ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed));
        trace!("Instantiated {}@{id}", ty.name());
        Object(Arc::new(ObjectInner { id, ty }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn ty(&self) -> &Arc<ObjectType> {
        &self.0.ty
    }

    ///
    /// The binding of the named method to this instance.
    ///
    pub fn binding(&self, name: &str) -> Result<Binding, Failure> {
        match self.ty().method_named(name) {
            Some((ordinal, _)) => Ok(self.binding_at(ordinal)),
            None => Err(crate::core::throw(format!(
                "{self} has no graph method named {name}"
            ))),
        }
    }

    pub fn binding_at(&self, ordinal: usize) -> Binding {
        Binding::new(self.clone(), ordinal)
    }

    ///
    /// One binding per registered method, in declaration order.
    ///
    pub fn bindings(&self) -> Vec<Binding> {
        (0..self.ty().methods().len())
            .map(|ordinal| self.binding_at(ordinal))
            .collect()
    }

    ///
    /// Shorthand for evaluating the named method.
    ///
    pub fn read(&self, graph: &Graph<NodeKey>, name: &str, args: &[Value]) -> Result<Value, Failure> {
        self.binding(name)?.get(graph, args)
    }

    ///
    /// Shorthand for assigning the named method's zero-argument node, the equivalent of
    /// attribute assignment.
    ///
    pub fn set(&self, graph: &Graph<NodeKey>, name: &str, value: Value) -> Result<(), Failure> {
        self.binding(name)?.set(graph, value, &[])
    }

    ///
    /// Extracts the object's saved state: a name → value mapping over the saved methods,
    /// computed through the normal read path (and thus honoring active overlays).
    ///
    pub fn to_dict(&self, graph: &Graph<NodeKey>) -> Result<IndexMap<String, Value>, Failure> {
        let mut dict = IndexMap::new();
        for (ordinal, method) in self.ty().saved_methods() {
            let value = self.binding_at(ordinal).get(graph, &[])?;
            dict.insert(method.name().to_owned(), value);
        }
        Ok(dict)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Object {}

impl std::hash::Hash for Object {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.0.ty.name(), self.0.id)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
