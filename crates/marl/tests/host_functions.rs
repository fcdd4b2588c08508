//! The host interop bridge: native free functions, native types and
//! methods, argument passing, and callback failure.

use std::{cell::RefCell, rc::Rc};

use marl::{CollectSink, Engine, EngineError, ErrorKind, RegisterTypeOptions};
use pretty_assertions::assert_eq;

fn build_and_run(engine: &mut Engine, code: &str) -> Result<(), marl::Diagnostic> {
    engine.new_module("test").unwrap();
    engine.add_section("test", code).unwrap();
    engine.build_with("test", &mut CollectSink::new())?;
    engine.run_with("test", &mut CollectSink::new())
}

#[test]
fn native_function_computes_a_result() {
    let mut engine = Engine::new();
    let int = engine.type_by_name("int").unwrap();
    let got = Rc::new(RefCell::new(0i64));
    let got_in = Rc::clone(&got);

    engine
        .register_function("Add", &[(int, "a"), (int, "b")], int, |frame, args| {
            let sum = frame.as_i64(&args[0])? + frame.as_i64(&args[1])?;
            Ok(frame.long_value(sum))
        })
        .unwrap();
    let void = engine.type_by_name("void").unwrap();
    engine
        .register_function("Record", &[(int, "value")], void, move |frame, args| {
            *got_in.borrow_mut() = frame.as_i64(&args[0])?;
            Ok(frame.void_value())
        })
        .unwrap();

    build_and_run(&mut engine, "int main() { Record(Add(2, 3) * 4); return 0; }").unwrap();
    assert_eq!(*got.borrow(), 20);
}

#[test]
fn native_arguments_keep_their_evaluated_types() {
    let mut engine = Engine::new();
    let int = engine.type_by_name("int").unwrap();
    let void = engine.type_by_name("void").unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_in = Rc::clone(&seen);

    // The declared parameter type is `int`, but the bridge hands the
    // callback whatever the expression evaluated to.
    engine
        .register_function("Inspect", &[(int, "value")], void, move |frame, args| {
            seen_in.borrow_mut().push(frame.type_of(&args[0])?.name().to_owned());
            Ok(frame.void_value())
        })
        .unwrap();

    build_and_run(
        &mut engine,
        "int main() { double d = 2.0; Inspect(1); Inspect(1.5); Inspect(1 / d); return 0; }",
    )
    .unwrap();
    assert_eq!(seen.borrow().clone(), vec!["int", "float", "double"]);
}

#[test]
fn arity_mismatch_is_an_argument_error() {
    let mut engine = Engine::new();
    let int = engine.type_by_name("int").unwrap();
    let void = engine.type_by_name("void").unwrap();
    engine
        .register_function("One", &[(int, "value")], void, |frame, _| Ok(frame.void_value()))
        .unwrap();
    let err = build_and_run(&mut engine, "int main() { One(1, 2); return 0; }").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ArgumentError);
}

#[test]
fn void_result_cannot_be_used_as_a_value() {
    let mut engine = Engine::new();
    let int = engine.type_by_name("int").unwrap();
    let void = engine.type_by_name("void").unwrap();
    engine
        .register_function("Nop", &[(int, "value")], void, |frame, _| Ok(frame.void_value()))
        .unwrap();
    let err = build_and_run(&mut engine, "int main() { int x = Nop(1); return 0; }").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::RuntimeError | ErrorKind::TypeError));
}

#[test]
fn callback_errors_abort_the_run() {
    let mut engine = Engine::new();
    let int = engine.type_by_name("int").unwrap();
    engine
        .register_function("Fail", &[], int, |_, _| Err(EngineError::host("told to fail")))
        .unwrap();
    let err = build_and_run(&mut engine, "int main() { Fail(); return 0; }").unwrap_err();
    assert_eq!(err.kind, ErrorKind::HostError);
}

#[test]
fn registered_class_with_native_method() {
    let mut engine = Engine::new();
    let int = engine.type_by_name("int").unwrap();
    let counter = engine
        .register_type(
            "Counter",
            0,
            RegisterTypeOptions {
                is_class: true,
                ..RegisterTypeOptions::default()
            },
        )
        .unwrap();
    engine
        .register_type(
            "value",
            4,
            RegisterTypeOptions {
                parent: Some(counter),
                offset: 0,
                is_class: false,
            },
        )
        .unwrap();
    engine
        .register_method(counter, "Doubled", int, true, &[], |frame, _| {
            let value = frame.as_i64(&frame.receiver_field("value")?)?;
            Ok(frame.long_value(value * 2))
        })
        .unwrap();

    let got = Rc::new(RefCell::new(0i64));
    let got_in = Rc::clone(&got);
    let void = engine.type_by_name("void").unwrap();
    engine
        .register_function("Record", &[(int, "value")], void, move |frame, args| {
            *got_in.borrow_mut() = frame.as_i64(&args[0])?;
            Ok(frame.void_value())
        })
        .unwrap();

    build_and_run(
        &mut engine,
        "int main() { Counter c; c.value = 21; Record(c.Doubled()); return 0; }",
    )
    .unwrap();
    assert_eq!(*got.borrow(), 42);
}

#[test]
fn native_method_can_write_receiver_fields() {
    let mut engine = Engine::new();
    let counter = engine
        .register_type(
            "Counter",
            0,
            RegisterTypeOptions {
                is_class: true,
                ..RegisterTypeOptions::default()
            },
        )
        .unwrap();
    engine
        .register_type(
            "value",
            4,
            RegisterTypeOptions {
                parent: Some(counter),
                offset: 0,
                is_class: false,
            },
        )
        .unwrap();
    let void = engine.type_by_name("void").unwrap();
    engine
        .register_method(counter, "Bump", void, false, &[], |frame, _| {
            let current = frame.as_i64(&frame.receiver_field("value")?)?;
            let next = frame.long_value(current + 1);
            frame.set_receiver_field("value", &next)?;
            Ok(frame.void_value())
        })
        .unwrap();

    let got = Rc::new(RefCell::new(0i64));
    let got_in = Rc::clone(&got);
    let int = engine.type_by_name("int").unwrap();
    engine
        .register_function("Record", &[(int, "value")], void, move |frame, args| {
            *got_in.borrow_mut() = frame.as_i64(&args[0])?;
            Ok(frame.void_value())
        })
        .unwrap();

    build_and_run(
        &mut engine,
        "int main() { Counter c; c.value = 0; c.Bump(); c.Bump(); Record(c.value); return 0; }",
    )
    .unwrap();
    assert_eq!(*got.borrow(), 2);
}

#[test]
fn native_method_builds_values_from_literal_text() {
    let mut engine = Engine::new();
    let counter = engine
        .register_type(
            "Counter",
            0,
            RegisterTypeOptions {
                is_class: true,
                ..RegisterTypeOptions::default()
            },
        )
        .unwrap();
    engine
        .register_type(
            "value",
            4,
            RegisterTypeOptions {
                parent: Some(counter),
                offset: 0,
                is_class: false,
            },
        )
        .unwrap();
    let void = engine.type_by_name("void").unwrap();
    engine
        .register_method(counter, "Reset", void, false, &[], |frame, _| {
            let twelve = frame.value_from_literal("12")?;
            frame.set_receiver_field("value", &twelve)?;
            Ok(frame.void_value())
        })
        .unwrap();

    let got = Rc::new(RefCell::new(0i64));
    let got_in = Rc::clone(&got);
    let int = engine.type_by_name("int").unwrap();
    engine
        .register_function("Record", &[(int, "value")], void, move |frame, args| {
            *got_in.borrow_mut() = frame.as_i64(&args[0])?;
            Ok(frame.void_value())
        })
        .unwrap();

    build_and_run(
        &mut engine,
        "int main() { Counter c; c.value = 99; c.Reset(); Record(c.value); return 0; }",
    )
    .unwrap();
    assert_eq!(*got.borrow(), 12);
}

#[test]
fn duplicate_registrations_are_rejected() {
    let mut engine = Engine::new();
    let int = engine.type_by_name("int").unwrap();
    let void = engine.type_by_name("void").unwrap();
    engine
        .register_function("F", &[(int, "value")], void, |frame, _| Ok(frame.void_value()))
        .unwrap();
    assert!(engine
        .register_function("F", &[(int, "value")], void, |frame, _| Ok(frame.void_value()))
        .is_err());
    assert!(engine.register_type("int", 4, RegisterTypeOptions::default()).is_err());
}

#[test]
fn type_lookups_round_trip() {
    let mut engine = Engine::new();
    let id = engine
        .register_type(
            "Vec2",
            0,
            RegisterTypeOptions {
                is_class: true,
                ..RegisterTypeOptions::default()
            },
        )
        .unwrap();
    assert_eq!(engine.type_by_name("Vec2"), Some(id));
    let info = engine.type_by_id(id).unwrap();
    assert_eq!(info.name(), "Vec2");
    assert!(info.is_class());
    // Every registered type keeps a unique id.
    assert_ne!(engine.type_by_name("int"), engine.type_by_name("unsigned int"));

    let int = engine.type_by_name("int").unwrap();
    engine
        .register_method(id, "Norm", int, true, &[], |frame, _| Ok(frame.int_value(0)))
        .unwrap();
    let method = engine.method_of(id, "Norm").unwrap();
    assert_eq!(method.name(), "Norm");
    assert_eq!(method.param_count(), 0);
    assert_eq!(method.return_type(), int);
    assert!(method.is_const_method());
    assert!(method.is_native());
    assert_eq!(method.visibility(), marl::Visibility::Public);
    assert!(engine.method_of(id, "Missing").is_none());
}
