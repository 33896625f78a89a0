use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use quill::vm::{InterpretResult, VM};

#[derive(Clone)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    fn new() -> Self {
        SharedBuffer(Rc::new(RefCell::new(Vec::new())))
    }

    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("program output must be UTF-8")
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct ProgramRun {
    result: InterpretResult,
    output: String,
    error: Option<String>,
    stack_depth: usize,
}

fn run_program(source: &str) -> ProgramRun {
    run_program_with_stress(source, false)
}

fn run_program_with_stress(source: &str, gc_stress: bool) -> ProgramRun {
    let buffer = SharedBuffer::new();
    let mut vm = VM::with_output(Box::new(buffer.clone()));
    vm.set_gc_stress(gc_stress);
    let result = vm.interpret(source);
    ProgramRun {
        result,
        output: buffer.contents(),
        error: vm.last_error().map(str::to_string),
        stack_depth: vm.stack_depth(),
    }
}

fn assert_prints(source: &str, expected: &str) {
    let run = run_program(source);
    assert_eq!(run.result, InterpretResult::InterpretOk, "program failed: {:?}", run.error);
    assert_eq!(run.output, expected);
    assert_eq!(run.stack_depth, 0, "value stack must be balanced after a run");
}

#[test]
fn adds_numbers() {
    assert_prints("print 1 + 2;", "3\n");
}

#[test]
fn concatenates_string_with_number() {
    assert_prints("var a = \"hi \"; var b = 42; print a + b;", "hi 42\n");
}

#[test]
fn number_concatenated_on_the_left() {
    assert_prints("print 1 + \" of them\";", "1 of them\n");
}

#[test]
fn recursive_fibonacci() {
    assert_prints(
        "fun f(n) { if (n < 2) return n; return f(n - 1) + f(n - 2); } print f(10);",
        "55\n",
    );
}

#[test]
fn closure_counter_increments_shared_state() {
    assert_prints(
        "fun make() {
            var x = 0;
            fun inc() { x = x + 1; return x; }
            return inc;
        }
        var g = make();
        print g();
        print g();
        print g();",
        "1\n2\n3\n",
    );
}

#[test]
fn class_initializer_stores_fields() {
    assert_prints(
        "class C {
            init(v) { this.v = v; }
            get() { return this.v; }
        }
        print C(7).get();",
        "7\n",
    );
}

#[test]
fn for_loop_builds_string() {
    assert_prints(
        "var s = \"\"; for (var i = 0; i < 3; i = i + 1) s = s + i; print s;",
        "012\n",
    );
}

#[test]
fn sibling_closures_observe_one_storage() {
    assert_prints(
        "fun outer() {
            var x = 1;
            fun set() { x = 2; }
            fun get() { return x; }
            set();
            return get();
        }
        print outer();",
        "2\n",
    );
}

#[test]
fn block_scoped_capture_survives_scope_exit() {
    assert_prints(
        "var get;
        {
            var captured = \"inside\";
            fun read() { return captured; }
            get = read;
        }
        print get();",
        "inside\n",
    );
}

#[test]
fn control_flow_with_logic_operators() {
    assert_prints(
        "print nil or \"fallback\";
        print false and 1;
        print 1 and 2;
        if (1 < 2 or false) print \"taken\"; else print \"not taken\";",
        "fallback\nfalse\n2\ntaken\n",
    );
}

#[test]
fn while_loop_counts() {
    assert_prints(
        "var i = 0; var total = 0; while (i < 5) { total = total + i; i = i + 1; } print total;",
        "10\n",
    );
}

#[test]
fn methods_bound_to_receiver_can_be_stored() {
    assert_prints(
        "class Counter {
            init() { this.count = 0; }
            bump() { this.count = this.count + 1; return this.count; }
        }
        var c = Counter();
        var bump = c.bump;
        bump();
        bump();
        print c.count;",
        "2\n",
    );
}

#[test]
fn fields_shadow_methods_on_invoke() {
    assert_prints(
        "class Box { label() { return \"method\"; } }
        fun replacement() { return \"field\"; }
        var b = Box();
        b.label = replacement;
        print b.label();",
        "field\n",
    );
}

#[test]
fn class_without_initializer_rejects_arguments() {
    let run = run_program("class Empty {} Empty(1);");
    assert_eq!(run.result, InterpretResult::InterpretRuntimeError);
    assert_eq!(run.error.as_deref(), Some("Expected 0 arguments but got 1."));
}

#[test]
fn printing_distinguished_object_forms() {
    assert_prints(
        "class C {}
        fun f() {}
        var i = C();
        print C;
        print f;
        print i;
        print clock;",
        "C\n<fn f>\nC instance\n<native fn>\n",
    );
}

#[test]
fn negating_a_string_is_a_runtime_error() {
    let run = run_program("-\"x\";");
    assert_eq!(run.result, InterpretResult::InterpretRuntimeError);
    let message = run.error.expect("error message must be recorded");
    assert!(
        message.contains("must be a number"),
        "unexpected message: {}",
        message
    );
}

#[test]
fn arity_mismatch_reports_expected_and_actual() {
    let run = run_program("fun f(a, b) {} f(1);");
    assert_eq!(run.result, InterpretResult::InterpretRuntimeError);
    assert_eq!(run.error.as_deref(), Some("Expected 2 arguments but got 1."));
}

#[test]
fn runaway_recursion_overflows_the_frame_stack() {
    let run = run_program("fun f() { f(); } f();");
    assert_eq!(run.result, InterpretResult::InterpretRuntimeError);
    assert_eq!(run.error.as_deref(), Some("Stack overflow."));
}

#[test]
fn calling_a_non_callable_fails() {
    let run = run_program("var a = 1; a();");
    assert_eq!(run.result, InterpretResult::InterpretRuntimeError);
    assert_eq!(run.error.as_deref(), Some("Can only call functions and classes."));
}

#[test]
fn property_access_requires_an_instance() {
    let run = run_program("var a = 1; print a.b;");
    assert_eq!(run.result, InterpretResult::InterpretRuntimeError);
    assert_eq!(run.error.as_deref(), Some("Only instances have properties."));
}

#[test]
fn undefined_property_reports_its_name() {
    let run = run_program("class C {} print C().missing;");
    assert_eq!(run.result, InterpretResult::InterpretRuntimeError);
    assert_eq!(run.error.as_deref(), Some("Undefined property 'missing'."));
}

#[test]
fn mixed_operands_for_plus_fail() {
    let run = run_program("print 1 + nil;");
    assert_eq!(run.result, InterpretResult::InterpretRuntimeError);
    assert_eq!(run.error.as_deref(), Some("Operands must be numbers or strings."));
}

#[test]
fn native_length_builtins() {
    // "héllo" is five codepoints across six bytes.
    assert_prints("print len(\"héllo\"); print blen(\"héllo\");", "5\n6\n");
}

#[test]
fn native_clock_returns_a_number() {
    assert_prints("print clock() >= 0;", "true\n");
}

#[test]
fn interned_strings_compare_equal_by_identity() {
    assert_prints(
        "var a = \"con\" + \"cat\";
        var b = \"concat\";
        print a == b;",
        "true\n",
    );
}

#[test]
fn gc_stress_mode_is_output_equivalent() {
    let source = "
        class Node {
            init(value) { this.value = value; }
        }
        fun describe(node) { return \"node-\" + node.value; }
        var text = \"\";
        for (var i = 0; i < 20; i = i + 1) {
            var node = Node(i);
            text = describe(node) + \" \" + i;
        }
        print text;
        fun make() {
            var hidden = \"payload\";
            fun reveal() { return hidden; }
            return reveal;
        }
        print make()();
    ";

    let plain = run_program_with_stress(source, false);
    let stressed = run_program_with_stress(source, true);

    assert_eq!(plain.result, InterpretResult::InterpretOk, "plain run failed: {:?}", plain.error);
    assert_eq!(
        stressed.result,
        InterpretResult::InterpretOk,
        "stressed run failed: {:?}",
        stressed.error
    );
    assert_eq!(plain.output, stressed.output);
    assert_eq!(stressed.stack_depth, 0);
}

#[test]
fn deep_expression_nesting_stays_balanced() {
    let mut source = String::from("var total = 0;");
    for index in 0..50 {
        source.push_str(&format!("total = total + {};", index));
    }
    source.push_str("print total;");

    let run = run_program(&source);
    assert_eq!(run.result, InterpretResult::InterpretOk);
    assert_eq!(run.output, "1225\n");
    assert_eq!(run.stack_depth, 0);
}
