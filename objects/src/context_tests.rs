// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use graph::Context;

use crate::{Failure, MethodFlags, Object, ObjectGraph, ObjectType, Value};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn string(value: &Value) -> String {
    value.downcast_ref::<String>().cloned().unwrap()
}

fn read(graph: &ObjectGraph, object: &Object, name: &str) -> String {
    string(&object.read(graph, name, &[]).unwrap())
}

///
/// A = "A" + B + C, B = "B", C = "C" + D, D = "D"; all settable.
///
fn word_type() -> Arc<ObjectType> {
    word_type_with(MethodFlags::SETTABLE)
}

fn word_type_with(flags: MethodFlags) -> Arc<ObjectType> {
    ObjectType::builder("Word")
        .method_with("A", flags, |graph, object, _| {
            let b = string(&object.read(graph, "B", &[])?);
            let c = string(&object.read(graph, "C", &[])?);
            Ok(Value::from(format!("A{b}{c}")))
        })
        .method_with("B", flags, |_, _, _| Ok(Value::from("B")))
        .method_with("C", flags, |graph, object, _| {
            Ok(Value::from(format!(
                "C{}",
                string(&object.read(graph, "D", &[])?)
            )))
        })
        .method_with("D", flags, |_, _, _| Ok(Value::from("D")))
        .build()
        .unwrap()
}

#[test]
fn overlay_scoped_to_context() {
    init_logging();
    let graph = ObjectGraph::new();
    let object = word_type().instantiate();

    let context = Context::new();
    {
        let _ctx = graph.enter_context(context.clone());
        object
            .binding("A")
            .unwrap()
            .overlay(&graph, Value::from("abcd"), &[])
            .unwrap();
        assert_eq!("abcd", read(&graph, &object, "A"));
        assert_eq!("B", read(&graph, &object, "B"));
        assert_eq!("CD", read(&graph, &object, "C"));
        assert_eq!("D", read(&graph, &object, "D"));
    }
    assert_eq!("ABCD", read(&graph, &object, "A"));
    assert_eq!("B", read(&graph, &object, "B"));
    assert_eq!("CD", read(&graph, &object, "C"));
    assert_eq!("D", read(&graph, &object, "D"));
}

#[test]
fn overlays_withdrawn_and_reasserted() {
    let graph = ObjectGraph::new();
    let object = word_type().instantiate();
    let binding = |name: &str| object.binding(name).unwrap();

    let context = Context::new();
    let _ctx = graph.enter_context(context.clone());

    binding("B").overlay(&graph, Value::from("b"), &[]).unwrap();
    assert_eq!("b", read(&graph, &object, "B"));
    assert_eq!("AbCD", read(&graph, &object, "A"));
    assert_eq!("CD", read(&graph, &object, "C"));

    binding("C").overlay(&graph, Value::from("c"), &[]).unwrap();
    assert_eq!("c", read(&graph, &object, "C"));
    assert_eq!("Abc", read(&graph, &object, "A"));

    binding("A").overlay(&graph, Value::from("a"), &[]).unwrap();
    assert_eq!("a", read(&graph, &object, "A"));

    binding("A").clear_overlay(&graph, &[]).unwrap();
    assert_eq!("Abc", read(&graph, &object, "A"));
    binding("B").clear_overlay(&graph, &[]).unwrap();
    assert_eq!("ABc", read(&graph, &object, "A"));
    binding("C").clear_overlay(&graph, &[]).unwrap();
    assert_eq!("ABCD", read(&graph, &object, "A"));

    binding("C").overlay(&graph, Value::from("c"), &[]).unwrap();
    binding("D").overlay(&graph, Value::from("d"), &[]).unwrap();
    assert_eq!("ABc", read(&graph, &object, "A"));
    binding("C").clear_overlay(&graph, &[]).unwrap();
    assert_eq!("ABCd", read(&graph, &object, "A"));
}

#[test]
fn nested_context_shadowing() {
    let graph = ObjectGraph::new();
    let object = word_type().instantiate();
    let b = object.binding("B").unwrap();

    assert_eq!("ABCD", read(&graph, &object, "A"));

    let c1 = Context::new();
    let outer = graph.enter_context(c1.clone());
    b.overlay(&graph, Value::from("b"), &[]).unwrap();
    assert_eq!("AbCD", read(&graph, &object, "A"));

    let c2 = Context::new();
    {
        let _inner = graph.enter_context(c2.clone());
        b.overlay(&graph, Value::from("3"), &[]).unwrap();
        assert_eq!("A3CD", read(&graph, &object, "A"));
    }

    // The inner context's exit reasserted the outer overlay.
    assert_eq!("AbCD", read(&graph, &object, "A"));
    drop(outer);
    assert_eq!("ABCD", read(&graph, &object, "A"));
}

#[test]
fn overlay_outside_context_rejected() {
    let graph = ObjectGraph::new();
    let object = word_type().instantiate();

    assert!(matches!(
        object
            .binding("A")
            .unwrap()
            .overlay(&graph, Value::from("a"), &[]),
        Err(Failure::NoActiveContext(_))
    ));
    assert!(matches!(
        object.binding("A").unwrap().clear_overlay(&graph, &[]),
        Err(Failure::NoActiveContext(_))
    ));
}

#[test]
fn overlay_read_requires_overlay() {
    let graph = ObjectGraph::new();
    let object = word_type().instantiate();
    let node = object.binding("A").unwrap().node(&[]);

    assert!(matches!(
        graph.get_overlay(node.clone()),
        Err(Failure::NotOverlaid(_))
    ));

    let context = Context::new();
    let _ctx = graph.enter_context(context.clone());
    object
        .binding("A")
        .unwrap()
        .overlay(&graph, Value::from("a"), &[])
        .unwrap();
    assert_eq!(Ok(Value::from("a")), graph.get_overlay(node));
}

#[test]
fn exit_restores_prior_state() {
    let graph = ObjectGraph::new();
    let object = word_type().instantiate();
    let d = object.binding("D").unwrap();

    object.set(&graph, "D", Value::from("q")).unwrap();
    assert_eq!("ABCq", read(&graph, &object, "A"));

    let context = Context::new();
    {
        let _ctx = graph.enter_context(context.clone());
        d.overlay(&graph, Value::from("d"), &[]).unwrap();
        assert_eq!("ABCd", read(&graph, &object, "A"));
        assert!(graph.is_overlaid(&d.node(&[])));
        // The overlay shadows the set value without clearing it.
        assert!(graph.is_set(&d.node(&[])));
    }

    assert!(!graph.is_overlaid(&d.node(&[])));
    assert!(graph.is_set(&d.node(&[])));
    assert_eq!("ABCq", read(&graph, &object, "A"));
}

#[test]
fn to_dict_honors_overlays() {
    let graph = ObjectGraph::new();
    let object = word_type_with(MethodFlags::SAVED).instantiate();

    let context = Context::new();
    {
        let _ctx = graph.enter_context(context.clone());
        object
            .binding("B")
            .unwrap()
            .overlay(&graph, Value::from("b"), &[])
            .unwrap();
        let dict = object.to_dict(&graph).unwrap();
        assert_eq!(Some(&Value::from("AbCD")), dict.get("A"));
        assert_eq!(Some(&Value::from("b")), dict.get("B"));
    }

    let dict = object.to_dict(&graph).unwrap();
    assert_eq!(Some(&Value::from("ABCD")), dict.get("A"));
    assert_eq!(Some(&Value::from("B")), dict.get("B"));
}
