//! End-to-end program tests
//!
//! Each case compiles and runs a complete program through a fresh engine
//! and asserts on captured print output or on the error outcome.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use ember_runtime::{Engine, EngineConfig, InterpretError};

#[derive(Clone, Default)]
struct Sink(Rc<RefCell<Vec<u8>>>);

impl Sink {
    fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("print output is utf-8")
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run(source: &str) -> String {
    run_with_config(source, EngineConfig::new()).expect("program should run")
}

fn run_with_config(source: &str, config: EngineConfig) -> Result<String, InterpretError> {
    let sink = Sink::default();
    let mut engine = Engine::with_output(config, Box::new(sink.clone()));
    engine.interpret(source)?;
    Ok(sink.text())
}

fn runtime_message(source: &str) -> String {
    match run_with_config(source, EngineConfig::new()) {
        Err(InterpretError::Runtime(e)) => e.message,
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn test_closure_counter() {
    let output = run(
        "fun makeCounter() { var c = 0; fun inc() { c = c + 1; return c; } return inc; } \
         var f = makeCounter(); print f(); print f(); print f();",
    );
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn test_counters_are_independent() {
    let output = run(
        "fun makeCounter() { var c = 0; fun inc() { c = c + 1; return c; } return inc; } \
         var a = makeCounter(); var b = makeCounter(); \
         print a(); print a(); print b();",
    );
    assert_eq!(output, "1\n2\n1\n");
}

#[test]
fn test_fibonacci_recursion() {
    let output = run("fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);");
    assert_eq!(output, "55\n");
}

#[test]
fn test_list_append_and_index() {
    let output = run("var xs = [1, 2, 3]; append(xs, 4); xs[0] = 9; print xs; print xs[3];");
    assert_eq!(output, "[9, 2, 3, 4]\n4\n");
}

#[test]
fn test_list_delete() {
    let output = run("var xs = [1, 2, 3]; delete(xs, 1); print xs;");
    assert_eq!(output, "[1, 3]\n");
}

#[test]
fn test_string_concat_interning() {
    let output = run("var a = \"foo\"; var b = \"f\" + \"oo\"; print a == b;");
    assert_eq!(output, "true\n");
}

#[test]
fn test_undefined_global() {
    assert_eq!(runtime_message("print xyz;"), "Undefined symbol 'xyz'.");
}

#[test]
fn test_for_loop_shadowing_with_closures() {
    let output = run("for (var i = 0; i < 3; i = i + 1) { fun p() { print i; } p(); }");
    assert_eq!(output, "0\n1\n2\n");
}

#[test]
fn test_upvalue_closes_with_value_at_scope_exit() {
    // Each closure captures its own iteration variable; writes through the
    // closed upvalue stay private to the closure.
    let output = run(
        "var fs = [0, 0]; \
         { var i = 10; fun get() { return i; } fun bump() { i = i + 1; return i; } \
           fs[0] = get; fs[1] = bump; } \
         var get = fs[0]; var bump = fs[1]; \
         print bump(); print bump(); print get();",
    );
    assert_eq!(output, "11\n12\n12\n");
}

#[test]
fn test_method_and_this() {
    let output = run(
        "class C { init(x) { this.x = x; } get() { return this.x; } } \
         var c = C(3); print c.get();",
    );
    assert_eq!(output, "3\n");
}

#[test]
fn test_inheritance_and_super() {
    let output = run(
        "class A { m() { return \"A\"; } } \
         class B < A { m() { return \"B\" + super.m(); } } \
         print B().m();",
    );
    assert_eq!(output, "BA\n");
}

#[test]
fn test_bound_method_extraction() {
    let output = run(
        "class C { m() { return this.v; } } \
         var c = C(); c.v = 7; var f = c.m; print f();",
    );
    assert_eq!(output, "7\n");
}

#[test]
fn test_inherited_method_dispatch() {
    let output = run(
        "class A { hello() { return \"hi\"; } } \
         class B < A {} \
         print B().hello();",
    );
    assert_eq!(output, "hi\n");
}

#[test]
fn test_initializer_returns_receiver() {
    let output = run("class C { init() { this.x = 1; } } print C();");
    assert_eq!(output, "C instance\n");
}

#[test]
fn test_fields_shadow_methods_on_invoke() {
    let output = run(
        "class C { m() { return \"method\"; } } \
         fun f() { return \"field\"; } \
         var c = C(); c.m = f; print c.m();",
    );
    assert_eq!(output, "field\n");
}

#[test]
fn test_undefined_property() {
    assert_eq!(
        runtime_message("class C {} var c = C(); print c.missing;"),
        "Undefined property 'missing'."
    );
}

#[test]
fn test_property_on_non_instance() {
    assert_eq!(runtime_message("print 4.x;"), "Only instances have properties.");
    assert_eq!(runtime_message("4.x = 1;"), "Only instances have fields.");
}

#[test]
fn test_superclass_must_be_a_class() {
    assert_eq!(runtime_message("var NotAClass = 1; class B < NotAClass {}"), "Superclass must be a class.");
}

#[test]
fn test_class_arity() {
    assert_eq!(runtime_message("class C {} C(1);"), "Expected 0 arguments but got 1.");
    assert_eq!(
        runtime_message("class C { init(a) {} } C();"),
        "Expected 1 arguments but got 0."
    );
}

#[test]
fn test_stack_conserved_across_statements() {
    let sink = Sink::default();
    let mut engine = Engine::with_output(EngineConfig::new(), Box::new(sink.clone()));
    for source in ["var a = 1;", "a = a + 1;", "print a;", "{ var b = 2; print a + b; }"] {
        engine.interpret(source).expect("statement should run");
        assert_eq!(engine.stack_depth(), 0, "stack leaked after {source:?}");
    }
    assert_eq!(sink.text(), "2\n4\n");
}

#[test]
fn test_gc_stress_matches_default_output() {
    // Property: forcing a collection before every allocation must not
    // change the observable behavior of a deterministic program.
    let source = "\
        fun makeAdder(n) { fun add(m) { return n + m; } return add; } \
        var add3 = makeAdder(3); \
        var parts = [\"con\", \"cat\"]; \
        var text = parts[0] + parts[1]; \
        class Box { init(v) { this.v = v; } get() { return this.v; } } \
        var box = Box(add3(4)); \
        for (var i = 0; i < 5; i = i + 1) { text = text + \"!\"; } \
        print add3(1); print box.get(); print text;";
    let plain = run_with_config(source, EngineConfig::new()).expect("plain run");
    let stressed =
        run_with_config(source, EngineConfig::new().with_stress_gc(true)).expect("stressed run");
    assert_eq!(plain, stressed);
    assert_eq!(plain, "4\n7\nconcat!!!!!\n");
}

#[test]
fn test_deep_but_bounded_recursion_is_fine() {
    let output = run("fun down(n) { if (n == 0) return 0; return down(n - 1); } print down(60);");
    assert_eq!(output, "0\n");
}

#[test]
fn test_repl_style_session_keeps_globals() {
    let sink = Sink::default();
    let mut engine = Engine::with_output(EngineConfig::new(), Box::new(sink.clone()));
    engine.interpret("var counter = 0;").unwrap();
    engine.interpret("fun tick() { counter = counter + 1; return counter; }").unwrap();
    engine.interpret("tick(); tick();").unwrap();
    engine.interpret("print tick();").unwrap();
    assert_eq!(sink.text(), "3\n");
}

#[test]
fn test_compile_error_reports_all_diagnostics() {
    let result = run_with_config("var 1; var 2;", EngineConfig::new());
    match result {
        Err(InterpretError::Compile(e)) => assert_eq!(e.diagnostics.len(), 2),
        other => panic!("expected compile error, got {other:?}"),
    }
}

#[test]
fn test_multiline_strings() {
    let output = run("print \"line one\nline two\";");
    assert_eq!(output, "line one\nline two\n");
}

#[test]
fn test_clock_is_bound() {
    let output = run("print clock() > 0;");
    assert_eq!(output, "true\n");
}
