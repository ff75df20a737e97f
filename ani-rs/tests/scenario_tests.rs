//! End-to-end scripts: compile with the standard registry, run on a thread,
//! inspect the globals.

use std::rc::Rc;

use ani::error::CompileError;
use ani::sched::Scheduler;
use ani::script::registry::Output;
use ani::script::{compile, ExprValue, ScriptThread, SimpleRegistry, SwitchPolicy};

fn thread(src: &str, switch: SwitchPolicy) -> ScriptThread {
    let mut reg = SimpleRegistry::new();
    let program = compile(src, &mut reg).unwrap_or_else(|e| panic!("{e:?}"));
    ScriptThread::new("scenario", Rc::new(program), Rc::new(reg), switch)
}

fn run(src: &str) -> ScriptThread {
    let mut t = thread(src, SwitchPolicy::never());
    t.run_to_end();
    t
}

fn diagnostics(src: &str) -> Vec<String> {
    let mut reg = SimpleRegistry::new();
    match compile(src, &mut reg) {
        Err(CompileError::Diagnostics(d)) => d.iter().map(|d| d.message.clone()).collect(),
        Err(other) => panic!("unexpected {other}"),
        Ok(_) => Vec::new(),
    }
}

// -- Reference and copy semantics -------------------------------------------

#[test]
fn arrays_are_shared_by_assignment() {
    let t = run("int[] a = {1, 2, 3}; int[] b = a; b[0] = 9; int x = a[0];");
    assert_eq!(t.global("x"), Some(ExprValue::integer(9)));
    assert_eq!(t.global("a").unwrap().to_string(), "{9, 2, 3}");
}

#[test]
fn pod_values_are_copied() {
    let t = run("vector<2> u = <1, 2>; vector<2> w = u; w[0] = 5; scalar y = u[0];");
    assert_eq!(t.global("y"), Some(ExprValue::scalar(1.0)));
    assert_eq!(t.global("w"), Some(ExprValue::vector(vec![5.0, 2.0])));
}

#[test]
fn objects_are_shared_by_assignment() {
    let t = run(
        "object Ball { vector<3> pos; scalar r; }\n\
         Ball a = new Ball(r: 1);\n\
         Ball b = a;\n\
         b.r = 4;\n\
         b.pos.y = 2;\n\
         scalar r = a.r + a.pos.y;",
    );
    assert_eq!(t.global("r"), Some(ExprValue::scalar(6.0)));
}

#[test]
#[should_panic(expected = "null scope dereference")]
fn null_object_member_panics() {
    run("object Ball { scalar r; } Ball b; scalar r = b.r;");
}

// -- Expressions --------------------------------------------------------------

#[test]
fn postfix_increment_is_observed_after_the_expression() {
    let t = run("int i = 1; int j = i++ + i;");
    assert_eq!(t.global("j"), Some(ExprValue::integer(2)));
    assert_eq!(t.global("i"), Some(ExprValue::integer(2)));
}

#[test]
fn compound_assignment() {
    let t = run("int a = 7; a -= 2; a *= 3; a /= 4; a %= 3; scalar s = 1; s += a; s /= 4;");
    assert_eq!(t.global("a"), Some(ExprValue::integer(0)));
    assert_eq!(t.global("s"), Some(ExprValue::scalar(0.25)));
}

#[test]
fn integer_division_by_zero_yields_zero() {
    let t = run("int z = 0; int q = 5 / z; int r = 5 % z; scalar inf = 1.0 / z;");
    assert_eq!(t.global("q"), Some(ExprValue::integer(0)));
    assert_eq!(t.global("r"), Some(ExprValue::integer(0)));
    assert_eq!(t.global("inf"), Some(ExprValue::scalar(f64::INFINITY)));
}

#[test]
fn named_arguments() {
    let t = run("scalar t = atan2(x: 1, y: 0); scalar p = pow(y: 3, x: 2);");
    assert_eq!(t.global("t"), Some(ExprValue::scalar(0.0)));
    assert_eq!(t.global("p"), Some(ExprValue::scalar(8.0)));
}

#[test]
fn members_of_values() {
    let t = run(
        "vector<2> v = <3, 4>; scalar l = v.length; int d = v.dim;\n\
         string s = \"hello\"; int n = s.length;\n\
         int[] a = new int[6]; int k = a.size;",
    );
    assert_eq!(t.global("l"), Some(ExprValue::scalar(5.0)));
    assert_eq!(t.global("d"), Some(ExprValue::integer(2)));
    assert_eq!(t.global("n"), Some(ExprValue::integer(5)));
    assert_eq!(t.global("k"), Some(ExprValue::integer(6)));
}

#[test]
#[should_panic(expected = "matrix row index 2 out of range for size 2")]
fn matrix_row_out_of_range_at_runtime() {
    run("matrix<2,2> m; int i = 2; vector<2> r = m[i];");
}

#[test]
fn constant_out_of_range_index_is_a_compile_error() {
    assert_eq!(diagnostics("scalar x = <1, 2>[2];"), vec!["index 2 out of range for vector<2>".to_string()]);
}

#[test]
fn string_element_writes_keep_the_length() {
    let t = run("string s = \"abc\"; s[1] = \"z\"; int n = s.length;");
    assert_eq!(t.global("s"), Some(ExprValue::string("azc")));
    assert_eq!(t.global("n"), Some(ExprValue::integer(3)));
}

#[test]
fn string_element_literal_must_be_one_character() {
    assert_eq!(
        diagnostics("string s = \"abc\"; s[0] = \"xyz\";"),
        vec!["string element needs exactly one character, found 3".to_string()]
    );
    assert_eq!(
        diagnostics("string t = \"abc\"; t[1] = \"\";"),
        vec!["string element needs exactly one character, found 0".to_string()]
    );
}

#[test]
#[should_panic(expected = "string element 1 needs exactly one character, found 2")]
fn string_element_runtime_value_must_be_one_character() {
    run("string s = \"abc\"; string w = \"xy\"; s[1] = w;");
}

// -- Malformed object declarations --------------------------------------------

#[test]
fn unknown_member_type_is_a_single_diagnostic() {
    assert_eq!(
        diagnostics("object A { Foo f; scalar r; } A a = new A();"),
        vec!["unknown type `Foo`".to_string()]
    );
}

#[test]
fn non_constant_member_dimension_is_a_single_diagnostic() {
    let errs = diagnostics("int n = 3; object A { vector<n> v; } A a = new A();");
    assert_eq!(errs.len(), 1, "{errs:?}");
    assert!(errs[0].starts_with("unknown identifier `n`"), "{errs:?}");

    let errs = diagnostics("object A { vector<0> v; } A a = new A();");
    assert_eq!(errs.len(), 1, "{errs:?}");
    assert!(errs[0].starts_with("incomplete type"), "{errs:?}");
}

#[test]
fn constructor_arguments_after_a_member_error_are_not_reported() {
    let errs = diagnostics("object A { Foo f; scalar r; } A a = new A(r: 2, f: 1); scalar x = a.r;");
    assert_eq!(errs, vec!["unknown type `Foo`".to_string()]);
}

// -- Statements ---------------------------------------------------------------

#[test]
fn pruned_loop_never_runs() {
    let t = run("int n = 0; for (;0;) n = 1; while (0) n = 2;");
    assert_eq!(t.global("n"), Some(ExprValue::integer(0)));

    let mut reg = SimpleRegistry::new();
    let output = reg.output();
    let program = compile("for (;0;) { print(\"unreachable\"); } print(\"after\");", &mut reg).unwrap();
    ScriptThread::new("pruned", Rc::new(program), Rc::new(reg), SwitchPolicy::every_leaf()).run_to_end();
    assert_eq!(*output.borrow(), vec!["after"]);
}

#[test]
fn discarded_postfix_increments_once() {
    let t = run("int i; i++;");
    assert_eq!(t.global("i"), Some(ExprValue::integer(1)));
}

#[test]
fn declarations_without_initialiser_reset_each_time() {
    let t = run("int s = 0; for (int i = 0; i < 3; i++) { int t; t += i; s += t; }");
    assert_eq!(t.global("s"), Some(ExprValue::integer(3)));
}

#[test]
fn inner_blocks_shadow_outer_names() {
    let t = run("int x = 1; int y = 0; { int x = 10; y = x; } y += x;");
    assert_eq!(t.global("y"), Some(ExprValue::integer(11)));
}

#[test]
fn all_compile_errors_are_reported_at_once() {
    let errs = diagnostics("int a = bogus; string s = 3; break;");
    assert_eq!(errs.len(), 3, "{errs:?}");
    assert!(errs[0].starts_with("unknown identifier `bogus`"));
}

// -- Threads ------------------------------------------------------------------

#[test]
fn suspended_thread_matches_uninterrupted_run() {
    let src = "matrix<3,3> m; for (int i = 0; i < 3; i++) for (int j = 0; j < 3; j++) m[i][j] = i * 3 + j; \
               vector<3> v = m * <1, 1, 1>;";
    let plain = run(src);
    let mut sliced = thread(src, SwitchPolicy::every_leaf());
    let mut slices = 0;
    while !sliced.exec().is_finished() {
        slices += 1;
    }
    assert!(slices > 20);
    assert_eq!(plain.global("v"), Some(ExprValue::vector(vec![3.0, 12.0, 21.0])));
    assert_eq!(plain.global("v"), sliced.global("v"));
    assert_eq!(plain.global("m"), sliced.global("m"));
}

#[test]
fn scheduler_runs_scripts_side_by_side() {
    let out = Output::default();
    let mut sched = Scheduler::new();
    for (name, src) in [
        ("up", "for (int i = 0; i < 3; i++) print(\"up \" + i);"),
        ("down", "for (int i = 3; i > 0; i--) print(\"down \" + i); return 7;"),
    ] {
        let mut reg = SimpleRegistry::with_output(Rc::clone(&out));
        let program = compile(src, &mut reg).unwrap();
        sched.spawn(ScriptThread::new(name, Rc::new(program), Rc::new(reg), SwitchPolicy::slice(4)));
    }
    assert!(sched.run_until_idle(Some(1000)));

    let lines = out.borrow();
    assert_eq!(lines.len(), 6);
    let ups: Vec<_> = lines.iter().filter(|l| l.starts_with("up")).collect();
    assert_eq!(ups, ["up 0", "up 1", "up 2"]);
    assert_ne!(lines[0..3], ["up 0", "up 1", "up 2"]);

    let down = sched.finished().iter().find(|f| f.name == "down").unwrap();
    assert_eq!(down.result, Some(ExprValue::integer(7)));
}
