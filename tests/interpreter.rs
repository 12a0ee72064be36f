use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use pretty_assertions::assert_eq;

use rox::error::ExitCode;
use rox::lox::{exit_code, Lox};
use rox::value::Value;

/// `print` sink the test keeps a handle to.
#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn take(&self) -> String {
        String::from_utf8(self.0.take()).expect("Output should be valid UTF-8")
    }
}

fn session() -> (Lox, SharedBuffer) {
    let output = SharedBuffer::default();
    (Lox::with_output(Box::new(output.clone())), output)
}

fn test_valid_program(source: &str, expected_output: &str) {
    let (mut lox, output) = session();

    if let Err(errors) = lox.run(source.as_bytes()) {
        panic!("program failed: {:?}", errors);
    }

    assert_eq!(output.take(), expected_output);
}

/// Runs a failing program; returns what it printed first and the rendered
/// diagnostics.
fn test_failing_program(source: &str, expected_code: ExitCode) -> (String, Vec<String>) {
    let (mut lox, output) = session();

    let errors = lox
        .run(source.as_bytes())
        .expect_err("program should fail");
    assert_eq!(exit_code(&errors), expected_code);

    (
        output.take(),
        errors.iter().map(|e| e.to_string()).collect(),
    )
}

#[test]
fn test_print_of_a_sum() {
    test_valid_program("print 1 + 2;", "3\n");
}

#[test]
fn test_fib() {
    let source = r#"
    fun fib(n) {
        if (n <= 1) return n;
        return fib(n - 1) + fib(n - 2);
    }

    for (var i = 0; i < 10; i = i + 1) {
        print fib(i);
    }
    "#;
    test_valid_program(source, "0\n1\n1\n2\n3\n5\n8\n13\n21\n34\n");
}

#[test]
fn test_closure_captures_the_environment() {
    let source = r#"
    fun make() {
        var i = 0;
        fun inc() {
            i = i + 1;
            return i;
        }
        return inc;
    }

    var f = make();
    f();
    print f();
    "#;
    test_valid_program(source, "2\n");
}

#[test]
fn test_functions_cant_break_scope() {
    let source = r#"
    var a = "global";
    {
        fun showA() {
            print a;
        }
        showA();
        var a = "block";
        showA();
        print a;
    }
    "#;
    test_valid_program(source, "global\nglobal\nblock\n");
}

#[test]
fn test_value_stringification() {
    let source = r#"
    print nil;
    print true;
    print 3.0;
    print 0.5;
    print -7;
    print "text";
    print clock;
    class K {}
    print K;
    print K();
    fun named() {}
    print named;
    "#;
    test_valid_program(
        source,
        "nil\ntrue\n3\n0.5\n-7\ntext\n<native fn clock>\nK\nK instance\n<fn named>\n",
    );
}

#[test]
fn test_plus_concatenates_when_either_side_is_a_string() {
    let source = r#"
    print "a" + 1;
    print 1 + "a";
    print "x" + nil;
    print 2.5 + "";
    print "con" + "cat";
    "#;
    test_valid_program(source, "a1\n1a\nxnil\n2.5\nconcat\n");
}

#[test]
fn test_equality_and_truthiness() {
    let source = r#"
    print 1 == "1";
    print nil == false;
    print "a" == "a";
    print !0;
    print !"";
    print !nil;
    print nil or "default";
    print 0 and "second";
    "#;
    test_valid_program(
        source,
        "false\nfalse\ntrue\nfalse\nfalse\ntrue\ndefault\nsecond\n",
    );
}

#[test]
fn test_division_by_zero_is_a_runtime_error() {
    let (output, errors) = test_failing_program("print 1;\nprint 1 / 0;", ExitCode::Software);

    assert_eq!(output, "1\n");
    assert_eq!(errors, vec!["Division by zero.\n[line 2]"]);
}

#[test]
fn test_init_always_yields_the_instance() {
    let source = r#"
    class C {
        init() {
            return;
        }
    }
    print C();
    var c = C();
    print c.init();
    "#;
    test_valid_program(source, "C instance\nC instance\n");
}

#[test]
fn test_initializer_arguments_and_fields() {
    let source = r#"
    class Point {
        init(x, y) {
            this.x = x;
            this.y = y;
        }
        sum() {
            return this.x + this.y;
        }
    }
    var p = Point(3, 4);
    print p.sum();
    p.x = 10;
    print p.sum();
    "#;
    test_valid_program(source, "7\n14\n");
}

#[test]
fn test_bound_methods_remember_their_instance() {
    let source = r#"
    class Counter {
        init() { this.n = 0; }
        inc() {
            this.n = this.n + 1;
            return this.n;
        }
    }
    var inc = Counter().inc;
    inc();
    print inc();
    "#;
    test_valid_program(source, "2\n");
}

#[test]
fn test_fields_shadow_methods() {
    let source = r#"
    class A {
        m() { return "method"; }
    }
    var a = A();
    print a.m();
    a.m = "field";
    print a.m;
    "#;
    test_valid_program(source, "method\nfield\n");
}

#[test]
fn test_super_dispatch_through_many_subclasses() {
    let source = r#"
    class A { m() { return "A"; } }
    class B < A { m() { return "B" + super.m(); } }
    class C < B {}
    class D < C { m() { return "D" + super.m(); } }
    print D().m();
    "#;
    test_valid_program(source, "DBA\n");
}

#[test]
fn test_class_methods_live_on_the_metaclass() {
    let source = r#"
    class Math {
        class square(n) { return n * n; }
    }
    class Sub < Math {}
    print Math.square(3);
    print Sub.square(4);
    "#;
    test_valid_program(source, "9\n16\n");
}

#[test]
fn test_super_in_a_class_method() {
    let source = r#"
    class A {
        class make() { return "A.make"; }
    }
    class B < A {
        class make() { return "B>" + super.make(); }
    }
    print B.make();
    "#;
    test_valid_program(source, "B>A.make\n");
}

#[test]
fn test_class_level_fields() {
    let source = r#"
    class Config {}
    Config.debug = true;
    print Config.debug;
    "#;
    test_valid_program(source, "true\n");
}

#[test]
fn test_traits_are_flattened_into_the_class() {
    let source = r#"
    trait Named {
        describe() { return "I am " + this.name; }
    }
    trait Greets with Named {
        greet() { return "hi " + this.name; }
    }
    class Person with Greets {
        init(name) { this.name = name; }
    }
    var p = Person("bo");
    print p.greet();
    print p.describe();
    "#;
    test_valid_program(source, "hi bo\nI am bo\n");
}

#[test]
fn test_init_provided_by_a_trait_yields_the_instance() {
    let source = r#"
    trait Starts {
        init() { this.x = 1; }
    }
    class C with Starts {}
    var c = C();
    print c;
    print c.init();
    print c.x;
    "#;
    test_valid_program(source, "C instance\nC instance\n1\n");
}

#[test]
fn test_trait_conflict_is_reported_before_running() {
    let (output, errors) = test_failing_program(
        "print 1;\ntrait A { m() {} }\ntrait B { m() {} }\nclass C with A, B {}",
        ExitCode::DataError,
    );

    assert_eq!(output, "");
    assert_eq!(
        errors,
        vec!["[line 4] Error at 'B': A previous trait declares a method named 'm'."]
    );
}

#[test]
fn test_trait_conflict_through_an_alias_fails_at_declaration() {
    let (_, errors) = test_failing_program(
        "trait A { m() {} }\ntrait B { m() {} }\nvar Alias = B;\nclass C with A, Alias {}",
        ExitCode::Software,
    );

    assert_eq!(
        errors,
        vec!["A previous trait declares a method named 'm'.\n[line 4]"]
    );
}

#[test]
fn test_reading_a_local_in_its_own_initializer() {
    let (output, errors) = test_failing_program("{ var a = a; print a; }", ExitCode::DataError);

    assert_eq!(output, "");
    assert_eq!(
        errors,
        vec!["[line 1] Error at 'a': Can't read local variable in its own initializer."]
    );
}

#[test]
fn test_break_leaves_only_the_innermost_loop() {
    let source = r#"
    for (var i = 0; i < 3; i = i + 1) {
        var j = 0;
        while (true) {
            if (j == i) break;
            j = j + 1;
        }
        print j;
    }
    "#;
    test_valid_program(source, "0\n1\n2\n");
}

#[test]
fn test_return_unwinds_nested_loops() {
    let source = r#"
    fun find() {
        for (var i = 0; i < 10; i = i + 1) {
            while (true) {
                if (i == 2) return i;
                break;
            }
        }
        return -1;
    }
    print find();
    "#;
    test_valid_program(source, "2\n");
}

#[test]
fn test_conditional_and_comma_operators() {
    let source = r#"
    print true ? "yes" : "no";
    print nil ? 1 : false ? 2 : 3;
    print (1, 2);
    "#;
    test_valid_program(source, "yes\n3\n2\n");
}

#[test]
fn test_anonymous_functions() {
    let source = r#"
    var add = fun (a, b) { return a + b; };
    print add(1, 2);
    print add;
    fun apply(f, x) { return f(x); }
    print apply(fun (n) { return n * 10; }, 4);
    "#;
    test_valid_program(source, "3\n<fn anonymous>\n40\n");
}

#[test]
fn test_arrays() {
    let source = r#"
    var a = Array(3);
    a.set(0, "x");
    a.set(1, 2);
    print a;
    print a.length;
    print a.get(1);
    print Array(0);
    "#;
    test_valid_program(source, "[ 'x' , 2 , nil ]\n3\n2\n[  ]\n");
}

#[test]
fn test_array_errors() {
    let (_, errors) = test_failing_program("var a = Array(2);\nprint a.get(2);", ExitCode::Software);
    assert_eq!(errors, vec!["Invalid array index.\n[line 2]"]);

    let (_, errors) = test_failing_program("var a = Array(2);\na.get(-1);", ExitCode::Software);
    assert_eq!(errors, vec!["Array index can't be negative.\n[line 2]"]);

    let (_, errors) = test_failing_program("var a = Array(2);\na.size = 3;", ExitCode::Software);
    assert_eq!(errors, vec!["Can't add properties to arrays.\n[line 2]"]);

    let (_, errors) = test_failing_program(
        "var a = Array(100000000000000000000);\nprint a.length;",
        ExitCode::Software,
    );
    assert_eq!(errors, vec!["Array size too large.\n[line 1]"]);
}

#[test]
fn test_runtime_error_messages() {
    let cases: &[(&str, &str)] = &[
        ("print nope;", "Undefined variable 'nope'.\n[line 1]"),
        ("nope = 1;", "Undefined variable 'nope'.\n[line 1]"),
        ("var a = a;", "Undefined variable 'a'.\n[line 1]"),
        ("fun f(a) {}\nf();", "Expected 1 arguments but got 0.\n[line 2]"),
        ("\"str\"();", "Can only call functions and classes.\n[line 1]"),
        ("print 1.x;", "Only instances have properties.\n[line 1]"),
        ("var n = 1;\nn.x = 2;", "Only instances have fields.\n[line 2]"),
        ("class A {}\nprint A().missing;", "Undefined property 'missing'.\n[line 2]"),
        ("print -\"x\";", "Operand must be a number.\n[line 1]"),
        ("print 1 < \"2\";", "Operands must be numbers.\n[line 1]"),
        ("print nil + 1;", "Operands must be two numbers or at least one string.\n[line 1]"),
        ("var NotClass = 1;\nclass A < NotClass {}", "Superclass must be a class.\n[line 2]"),
        ("var NotTrait = 1;\nclass A with NotTrait {}", "'NotTrait' is not a trait.\n[line 2]"),
    ];

    for (source, expected) in cases {
        let (_, errors) = test_failing_program(source, ExitCode::Software);
        assert_eq!(errors, vec![expected.to_string()], "source: {}", source);
    }
}

#[test]
fn test_session_survives_runtime_errors() {
    let (mut lox, output) = session();

    assert!(lox.run(b"var x = 1;").is_ok());
    assert!(lox.run(b"{ var y = 2; print y / 0; }").is_err());
    assert!(lox.run(b"print x;").is_ok());
    assert!(lox.run(b"{ var z = 3; print z; }").is_ok());

    assert_eq!(output.take(), "1\n3\n");
}

#[test]
fn test_repl_lines() {
    let (mut lox, output) = session();

    assert!(matches!(lox.run_line("var x = 2;"), Ok(None)));
    assert!(matches!(lox.run_line("fun twice(n) { return n * 2; }"), Err(_)));
    assert!(matches!(lox.run_line("var twice = fun (n) { return n * 2; };"), Ok(None)));
    assert!(matches!(lox.run_line("twice(x)"), Ok(Some(Value::Number(n))) if n == 4.0));
    assert!(matches!(lox.run_line("x / 0"), Err(errors) if errors.len() == 1));
    assert!(matches!(lox.run_line("\"still \" + x"), Ok(Some(Value::String(s))) if s == "still 2"));

    assert_eq!(output.take(), "");
}

#[test]
fn test_repl_loop_prints_values_and_keeps_going() {
    let (mut lox, output) = session();
    let mut prompts: Vec<u8> = Vec::new();

    lox.repl(&b"var a = 20;\na + 1\nprint a;\nundefinedThing\na\n"[..], &mut prompts)
        .expect("repl runs");

    assert_eq!(output.take(), "21\n20\n20\n");
    assert_eq!(String::from_utf8(prompts).expect("utf8"), "> > > > > > \n");
}
