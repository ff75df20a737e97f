use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;

use ani::script::ops::{lookup_op, OpId};
use ani::script::types::{can_assign_type, AssignKind};
use ani::script::value::{ArrayRef, ValueNotifier};
use ani::script::{compile, ExprValue, ExprValueType, ScriptThread, SimpleRegistry, SwitchPolicy};

// ── Suspension transparency ───────────────────────────────────────────────────

/// Scripts paired with every global they declare.
const PROGRAMS: &[(&str, &[&str])] = &[
    (
        "int s = 0; for (int i = 0; i < 20; i++) { if (i % 3 == 0) s -= 1; else s += i * i; }",
        &["s"],
    ),
    (
        "int i = 1; int j = 0; while (i < 50) { j = i++ + i; i = i * 2; }",
        &["i", "j"],
    ),
    (
        "matrix<2,2> m; scalar t = 0; \
         for (int k = 0; k < 4; k++) { m[k % 2][k / 2] = k; t += m[k % 2][k / 2]; }",
        &["m", "t"],
    ),
    (
        "string s = \"\"; vector<3> v = <1, 2, 3>; \
         for (int i = 0; i < 3; i++) { s = s + i; v = v * 2.0; print(s); } \
         scalar l = v.x + length(v);",
        &["s", "v", "l"],
    ),
    (
        "int[] a = new int[5]; int t = 0; \
         for (int i = 0; i < 5; i++) a[i] = i * i; for (int i = 0; i < 5; i++) t = t + a[i];",
        &["a", "t"],
    ),
    (
        "int n = 0; int c = 0; \
         for (int i = 0; i < 10; i++) { if (i > 2 && (n = n + 1) > 3 || i == 0) c++; } \
         int m = n > 3 ? n : -n;",
        &["n", "c", "m"],
    ),
    (
        "object P { vector<2> at; scalar w; } scalar w = 0; P p = new P(w: 1); P q = p; \
         do { q.w = q.w * 3; p.at.x += 1; } while (p.w < 100); w = q.w + p.at.x;",
        &["w", "p", "q"],
    ),
];

/// Every notification of a run, interleaved in firing order.
type Log = Rc<RefCell<Vec<String>>>;

struct Watch {
    name: String,
    log: Log,
    /// Arrays this global has held; each gets its own watch once.
    arrays: RefCell<Vec<ArrayRef>>,
}

impl Watch {
    fn new(name: impl Into<String>, log: &Log) -> Rc<Self> {
        Rc::new(Self { name: name.into(), log: Rc::clone(log), arrays: RefCell::new(Vec::new()) })
    }
}

impl ValueNotifier for Watch {
    fn value_changed(&self, value: &ExprValue) {
        self.log.borrow_mut().push(format!("{} = {value}", self.name));
        if let ExprValue::Array(a) = value {
            if !a.is_null() && !self.arrays.borrow().contains(a) {
                a.install_notifier(Watch::new(format!("{}[]", self.name), &self.log));
                self.arrays.borrow_mut().push(a.clone());
            }
        }
    }

    fn value_deleted(&self) {
        self.log.borrow_mut().push(format!("{} deleted", self.name));
    }
}

struct Outcome {
    globals: Vec<String>,
    notified: Vec<String>,
    printed: Vec<String>,
    slices: usize,
}

fn run(src: &str, names: &[&str], switch: SwitchPolicy) -> Outcome {
    let mut reg = SimpleRegistry::new();
    let program = compile(src, &mut reg).unwrap_or_else(|e| panic!("{src}: {e:?}"));
    let output = reg.output();
    let mut thread = ScriptThread::new("prop", Rc::new(program), Rc::new(reg), switch);

    let log = Log::default();
    for name in names {
        thread.global_cell(name).unwrap().install_notifier(Watch::new(*name, &log));
    }

    let mut slices = 1;
    while !thread.exec().is_finished() {
        slices += 1;
    }
    assert_eq!(thread.continuation_depth(), 0);

    let globals = names.iter().map(|n| thread.global(n).unwrap().to_string()).collect();
    let notified = log.borrow().clone();
    let printed = output.borrow().clone();
    Outcome { globals, notified, printed, slices }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Switching at random leaves must not change what a script computes or
    /// the order in which observers see writes to any global or array.
    #[test]
    fn random_switches_are_invisible(
        which in 0..PROGRAMS.len(),
        probability in 0.05f64..1.0,
        seed in any::<u64>(),
    ) {
        let (src, names) = PROGRAMS[which];
        let plain = run(src, names, SwitchPolicy::never());
        let stressed = run(src, names, SwitchPolicy::never().with_stress(probability, seed));
        prop_assert_eq!(plain.slices, 1);
        prop_assert_eq!(&plain.globals, &stressed.globals);
        prop_assert_eq!(&plain.notified, &stressed.notified);
        prop_assert_eq!(&plain.printed, &stressed.printed);
    }

    /// Fixed slice budgets behave the same way.
    #[test]
    fn slice_budgets_are_invisible(which in 0..PROGRAMS.len(), budget in 0u32..16) {
        let (src, names) = PROGRAMS[which];
        let plain = run(src, names, SwitchPolicy::never());
        let sliced = run(src, names, SwitchPolicy::slice(budget));
        prop_assert!(sliced.slices > 1);
        prop_assert_eq!(&plain.globals, &sliced.globals);
        prop_assert_eq!(&plain.notified, &sliced.notified);
    }
}

// ── Type lattice ──────────────────────────────────────────────────────────────

fn complete_type() -> impl Strategy<Value = ExprValueType> {
    let leaf = prop_oneof![
        Just(ExprValueType::integer()),
        Just(ExprValueType::scalar()),
        Just(ExprValueType::range()),
        Just(ExprValueType::string()),
        (2usize..=4).prop_map(ExprValueType::vector),
        (1usize..=4, 1usize..=4).prop_map(|(r, c)| ExprValueType::matrix(r, c)),
    ];
    leaf.prop_recursive(2, 8, 1, |inner| inner.prop_map(ExprValueType::array))
}

proptest! {
    #[test]
    fn complete_types_assign_to_themselves_exactly(t in complete_type()) {
        prop_assert_eq!(&t, &t.clone());
        prop_assert_eq!(can_assign_type(&t, &t), AssignKind::Exact);
    }

    #[test]
    fn widening_is_never_symmetric(a in complete_type(), b in complete_type()) {
        if can_assign_type(&a, &b) == AssignKind::Widen {
            prop_assert_eq!(can_assign_type(&b, &a), AssignKind::None);
        }
    }

    #[test]
    fn exact_assignment_means_equal_types(a in complete_type(), b in complete_type()) {
        prop_assert_eq!(can_assign_type(&a, &b) == AssignKind::Exact, a == b);
    }
}

// ── Integer arithmetic ────────────────────────────────────────────────────────

fn int_op(op: OpId, a: i32, b: i32) -> ExprValue {
    let int = ExprValueType::integer();
    let m = lookup_op(op, &[int.clone(), int.clone()]).unwrap();
    assert_eq!(m.result, int);
    (m.compute)(&[a.into(), b.into()])
}

proptest! {
    #[test]
    fn integer_ops_wrap(a in any::<i32>(), b in any::<i32>()) {
        prop_assert_eq!(int_op(OpId::Add, a, b), ExprValue::integer(a.wrapping_add(b)));
        prop_assert_eq!(int_op(OpId::Sub, a, b), ExprValue::integer(a.wrapping_sub(b)));
        prop_assert_eq!(int_op(OpId::Mul, a, b), ExprValue::integer(a.wrapping_mul(b)));
    }

    #[test]
    fn integer_division_never_panics(a in any::<i32>(), b in any::<i32>()) {
        let q = int_op(OpId::Div, a, b);
        let r = int_op(OpId::Mod, a, b);
        if b == 0 {
            prop_assert_eq!(q, ExprValue::integer(0));
            prop_assert_eq!(r, ExprValue::integer(0));
        } else {
            prop_assert_eq!(q, ExprValue::integer(a.wrapping_div(b)));
            prop_assert_eq!(r, ExprValue::integer(a.wrapping_rem(b)));
        }
    }
}
