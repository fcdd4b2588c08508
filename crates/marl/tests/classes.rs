//! Script-declared classes: field layout, instance copies, methods, const
//! methods, and nested class members.

use std::{cell::RefCell, rc::Rc};

use marl::{CollectSink, Diagnostic, Engine, ErrorKind};
use pretty_assertions::assert_eq;

fn run_script(code: &str) -> Result<Vec<String>, Diagnostic> {
    let mut engine = Engine::new();
    let lines = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&lines);
    let int = engine.type_by_name("int").unwrap();
    let void = engine.type_by_name("void").unwrap();
    engine
        .register_function("Print", &[(int, "value")], void, move |frame, args| {
            sink.borrow_mut().push(frame.display(&args[0]));
            Ok(frame.void_value())
        })
        .unwrap();
    engine.new_module("test").unwrap();
    engine.add_section("test", code).unwrap();
    engine.build_with("test", &mut CollectSink::new())?;
    engine.run_with("test", &mut CollectSink::new())?;
    let out = lines.borrow().clone();
    Ok(out)
}

#[test]
fn fields_hold_independent_values() {
    let out = run_script(
        "class Pair { public: int a; int b; }; \
         int main() { Pair p; p.a = 7; p.b = 9; Print(p.a); Print(p.b); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["7", "9"]);
}

#[test]
fn mixed_width_fields_lay_out_in_order() {
    let out = run_script(
        "class M { public: char c; int i; }; \
         int main() { M m; m.c = 1; m.i = 70000; Print(m.c); Print(m.i); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["1", "70000"]);
}

#[test]
fn instance_assignment_deep_copies() {
    let out = run_script(
        "class P { public: int v; }; \
         int main() { P a; a.v = 5; P b; b = a; b.v = 7; Print(a.v); Print(b.v); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["5", "7"]);
}

#[test]
fn instance_initializer_copies_directly() {
    let out = run_script(
        "class P { public: int v; }; \
         int main() { P a; a.v = 6; P b = a; a.v = 1; Print(b.v); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["6"]);
}

#[test]
fn methods_read_and_write_their_receiver() {
    let out = run_script(
        "class Counter { public: int n; void Step() { n = n + 1; } int Value() const { return n; } }; \
         int main() { Counter c; c.n = 0; c.Step(); c.Step(); c.Step(); Print(c.Value()); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["3"]);
}

#[test]
fn methods_take_arguments() {
    let out = run_script(
        "class Acc { public: int base; int Plus(int x) const { return base + x; } }; \
         int main() { Acc a; a.base = 40; Print(a.Plus(2)); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["42"]);
}

#[test]
fn const_method_cannot_write_its_receiver() {
    let err = run_script(
        "class P { public: int v; void Reset() const { v = 0; } }; \
         int main() { P p; p.v = 1; p.Reset(); return 0; }",
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn const_method_may_write_locals() {
    let out = run_script(
        "class P { public: int v; int Doubled() const { int t = v * 2; return t; } }; \
         int main() { P p; p.v = 21; Print(p.Doubled()); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["42"]);
}

#[test]
fn nested_class_members_alias_one_buffer() {
    let out = run_script(
        "class Inner { public: int x; }; \
         class Outer { public: Inner inner; int y; }; \
         int main() { Outer o; o.inner.x = 3; o.y = 4; Print(o.inner.x + o.y); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["7"]);
}

#[test]
fn double_colon_paths_behave_like_dots() {
    let out = run_script(
        "class P { public: int v; }; \
         int main() { P p; p::v = 12; Print(p::v); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["12"]);
}

#[test]
fn class_values_pass_into_and_out_of_functions() {
    let out = run_script(
        "class P { public: int v; }; \
         P make(int v) { P p; p.v = v; return p; } \
         int read(P p) { return p.v; } \
         int main() { P q = make(9); Print(read(q)); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["9"]);
}

#[test]
fn copies_between_unrelated_classes_fail() {
    let err = run_script(
        "class A { public: int x; }; \
         class B { public: int y; }; \
         int main() { A a; B b; b = a; return 0; }",
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn visibility_labels_parse_in_any_order() {
    let out = run_script(
        "class P { private: int hidden; public: int open; protected: int shared_; }; \
         int main() { P p; p.open = 5; Print(p.open); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["5"]);
}
