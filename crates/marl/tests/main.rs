//! End-to-end scripts driven through the public embedding surface.
//!
//! Each test registers a `Print` callback that records one line per call,
//! feeds a script into a module, builds, runs, and checks the captured
//! output.

use std::{cell::RefCell, rc::Rc};

use marl::{CollectSink, Diagnostic, Engine, EngineLimits, ErrorKind};
use pretty_assertions::assert_eq;

/// Builds an engine with a `Print(value)` native that records its argument
/// on its own line.
fn engine_with_print() -> (Engine, Rc<RefCell<Vec<String>>>) {
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
    (engine, lines)
}

fn run_script(code: &str) -> Result<Vec<String>, Diagnostic> {
    let (mut engine, lines) = engine_with_print();
    engine.new_module("test").unwrap();
    engine.add_section("test", code).unwrap();
    engine.build_with("test", &mut CollectSink::new())?;
    engine.run_with("test", &mut CollectSink::new())?;
    let out = lines.borrow().clone();
    Ok(out)
}

// === Arithmetic and promotion ===

#[test]
fn arithmetic_respects_precedence() {
    let out = run_script("int main() { int a = 3; int b = 4; Print(a + b * 2); return 0; }").unwrap();
    assert_eq!(out, vec!["11"]);
}

#[test]
fn int_widens_to_double_before_division() {
    let out = run_script("int main() { int a = 5; double b = 2.5; Print(a / b); return 0; }").unwrap();
    assert_eq!(out, vec!["2"]);
}

// === Control flow ===

#[test]
fn while_loop_with_break() {
    let out = run_script(
        "int main() { int i = 0; int s = 0; \
         while (i < 10) { s = s + i; i = i + 1; if (i >= 5) break; } \
         Print(s); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["10"]);
}

#[test]
fn if_else_takes_the_right_arm() {
    let out = run_script(
        "int main() { int x = 3; \
         if (x > 5) { Print(1); } else if (x > 2) { Print(2); } else { Print(3); } \
         return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["2"]);
}

#[test]
fn for_loop_shares_its_scope_with_the_body() {
    let out = run_script(
        "int main() { int s = 0; for (int i = 1; i <= 4; i += 1) { s += i; } Print(s); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["10"]);
}

#[test]
fn for_loop_break_exits_early() {
    let out = run_script(
        "int main() { int s = 0; \
         for (int i = 0; i < 100; i += 1) { if (i == 3) break; s += 1; } \
         Print(s); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["3"]);
}

// === Functions ===

#[test]
fn user_function_with_return() {
    let out = run_script("int add(int x, int y) { return x + y; } int main() { Print(add(7, 8)); return 0; }")
        .unwrap();
    assert_eq!(out, vec!["15"]);
}

#[test]
fn nested_user_function_calls() {
    let out = run_script(
        "int twice(int x) { return x * 2; } \
         int main() { Print(twice(twice(3)) + 1); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["13"]);
}

#[test]
fn recursive_function_keeps_frames_separate() {
    let out = run_script(
        "int fib(int n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } \
         int main() { Print(fib(10)); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["55"]);
}

#[test]
fn return_propagates_out_of_a_loop() {
    let out = run_script(
        "int find(int limit) { for (int i = 0; i < limit; i += 1) { if (i * i > 20) return i; } return 0; } \
         int main() { Print(find(100)); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["5"]);
}

// === Classes ===

#[test]
fn class_with_const_method() {
    let out = run_script(
        "class P { public: int v; int Get() const { return v; } }; \
         int main() { P p; p.v = 42; Print(p.Get()); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["42"]);
}

// === Negative: const violation ===

#[test]
fn assignment_to_const_fails_without_output() {
    let err = run_script("int main() { const int x = 1; x = 2; return 0; }").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

// === Run protocol ===

#[test]
fn module_level_statements_run_before_main() {
    let out = run_script("int g = 3; int main() { Print(g); return 0; }").unwrap();
    assert_eq!(out, vec!["3"]);
}

#[test]
fn empty_source_builds_but_does_not_run() {
    let (mut engine, _) = engine_with_print();
    engine.new_module("test").unwrap();
    engine.add_section("test", "").unwrap();
    engine.build_with("test", &mut CollectSink::new()).unwrap();
    let err = engine.run_with("test", &mut CollectSink::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RuntimeError);
}

#[test]
fn module_without_main_fails_to_run() {
    let err = run_script("int helper() { return 1; }").unwrap_err();
    assert_eq!(err.kind, ErrorKind::RuntimeError);
}

#[test]
fn runaway_recursion_hits_the_call_depth_limit() {
    let mut engine = Engine::with_limits(EngineLimits {
        max_call_depth: 16,
        ..EngineLimits::default()
    });
    engine.new_module("test").unwrap();
    engine
        .add_section("test", "int down(int n) { return down(n + 1); } int main() { return down(0); }")
        .unwrap();
    engine.build_with("test", &mut CollectSink::new()).unwrap();
    let err = engine.run_with("test", &mut CollectSink::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RuntimeError);
}

// === Scoping ===

#[test]
fn inner_declaration_shadows_outer() {
    let out = run_script(
        "int main() { int x = 1; if (1) { int x = 2; Print(x); } Print(x); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["2", "1"]);
}

#[test]
fn loop_body_locals_reset_each_iteration() {
    let out = run_script(
        "int main() { int i = 0; int s = 0; \
         while (i < 3) { int t = i * 10; s = s + t; i = i + 1; } \
         Print(s); return 0; }",
    )
    .unwrap();
    assert_eq!(out, vec!["30"]);
}

#[test]
fn runs_release_everything_they_allocate() {
    let (mut engine, lines) = engine_with_print();
    engine.new_module("test").unwrap();
    engine
        .add_section(
            "test",
            "class P { public: int v; }; \
             P make(int v) { P p; p.v = v; return p; } \
             int fib(int n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } \
             int main() { P q = make(3); int f = fib(8); Print(q.v + f); return 0; }",
        )
        .unwrap();
    engine.build_with("test", &mut CollectSink::new()).unwrap();
    // Parameters interned at build time are part of the baseline.
    let before = engine.object_stats();
    engine.run_with("test", &mut CollectSink::new()).unwrap();
    let after = engine.object_stats();
    assert_eq!(lines.borrow().clone(), vec!["24"]);
    assert_eq!(after.live_objects, before.live_objects);
}

// === Sections ===

#[test]
fn sections_concatenate_before_build() {
    let (mut engine, lines) = engine_with_print();
    engine.new_module("test").unwrap();
    engine.add_section("test", "int half() { return 21; }").unwrap();
    engine
        .add_section("test", " int main() { Print(half() * 2); return 0; }")
        .unwrap();
    engine.build_with("test", &mut CollectSink::new()).unwrap();
    engine.run_with("test", &mut CollectSink::new()).unwrap();
    assert_eq!(lines.borrow().clone(), vec!["42"]);
}

#[test]
fn sections_added_after_a_build_extend_the_module() {
    let (mut engine, lines) = engine_with_print();
    engine.new_module("test").unwrap();
    engine.add_section("test", "int seed() { return 4; }").unwrap();
    engine.build_with("test", &mut CollectSink::new()).unwrap();
    engine
        .add_section("test", " int main() { Print(seed() + 1); return 0; }")
        .unwrap();
    engine.build_with("test", &mut CollectSink::new()).unwrap();
    engine.run_with("test", &mut CollectSink::new()).unwrap();
    assert_eq!(lines.borrow().clone(), vec!["5"]);
}

#[test]
fn engine_stays_usable_after_a_failed_run() {
    let (mut engine, lines) = engine_with_print();
    engine.new_module("bad").unwrap();
    engine.add_section("bad", "int main() { const int x = 1; x = 2; return 0; }").unwrap();
    engine.build_with("bad", &mut CollectSink::new()).unwrap();
    assert!(engine.run_with("bad", &mut CollectSink::new()).is_err());

    engine.new_module("good").unwrap();
    engine.add_section("good", "int main() { Print(7); return 0; }").unwrap();
    engine.build_with("good", &mut CollectSink::new()).unwrap();
    engine.run_with("good", &mut CollectSink::new()).unwrap();
    assert_eq!(lines.borrow().clone(), vec!["7"]);
}
