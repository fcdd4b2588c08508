//! Build-time failure modes: lexer rejections, grammar violations, and
//! the diagnostics they produce.

use marl::{CollectSink, Diagnostic, Engine, ErrorKind};

/// Builds `code` in a fresh engine and returns the failure.
fn build_err(code: &str) -> Diagnostic {
    let mut engine = Engine::new();
    engine.new_module("test").unwrap();
    engine.add_section("test", code).unwrap();
    engine
        .build_with("test", &mut CollectSink::new())
        .expect_err("build should fail")
}

#[test]
fn unknown_byte_is_a_lex_error() {
    let err = build_err("int main() { int a = 1 @ 2; return 0; }");
    assert_eq!(err.kind, ErrorKind::LexError);
    assert!(err.loc.is_some());
}

#[test]
fn missing_semicolon() {
    let err = build_err("int main() { int a = 1 return 0; }");
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[test]
fn unknown_type_is_a_type_error() {
    let err = build_err("int main() { Widget w; return 0; }");
    // `Widget` does not resolve as a type, so the statement parses as a
    // malformed assignment instead.
    assert!(matches!(err.kind, ErrorKind::ParseError | ErrorKind::TypeError));
}

#[test]
fn unknown_return_type_is_a_type_error() {
    let err = build_err("Widget make() { return 0; }");
    assert!(matches!(err.kind, ErrorKind::ParseError | ErrorKind::TypeError));
}

#[test]
fn break_outside_a_loop() {
    let err = build_err("int main() { break; return 0; }");
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[test]
fn return_outside_a_function() {
    let err = build_err("return 1;");
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[test]
fn uninitialized_const_scalar() {
    let err = build_err("int main() { const int x; return 0; }");
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[test]
fn class_body_requires_trailing_semicolon() {
    let err = build_err("class P { public: int v; } int main() { return 0; }");
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[test]
fn duplicate_class_field() {
    let err = build_err("class P { public: int v; int v; }; int main() { return 0; }");
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[test]
fn const_on_a_free_function_is_rejected() {
    let err = build_err("int f() const { return 1; } int main() { return 0; }");
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[test]
fn unsigned_requires_an_integer_base() {
    let err = build_err("int main() { unsigned float f = 1.0; return 0; }");
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[test]
fn diagnostics_carry_positions() {
    let err = build_err("int main() {\n  int a = ;\n  return 0; }");
    let loc = err.loc.expect("parse errors carry a location");
    assert_eq!(loc.row, 2);
}

#[test]
fn failed_build_marks_the_module() {
    let mut engine = Engine::new();
    engine.new_module("test").unwrap();
    engine.add_section("test", "int main() { int a = ; return 0; }").unwrap();
    assert!(engine.build_with("test", &mut CollectSink::new()).is_err());
    // The error flag blocks both running and rebuilding until cleared.
    assert!(engine.run_with("test", &mut CollectSink::new()).is_err());
    assert!(engine.build_with("test", &mut CollectSink::new()).is_err());
    engine.clear_error("test").unwrap();
}

#[test]
fn sink_receives_the_same_diagnostic() {
    let mut engine = Engine::new();
    engine.new_module("test").unwrap();
    engine.add_section("test", "int main() { int a = ; return 0; }").unwrap();
    let mut sink = CollectSink::new();
    let err = engine.build_with("test", &mut sink).unwrap_err();
    assert_eq!(sink.diagnostics().to_vec(), vec![err]);
}
