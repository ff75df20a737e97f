//! Built-in constants and native functions.
//!
//! Everything here is registered into a [`SimpleRegistry`] by [`install`].
//! Argument conversion happens before a body runs, so each body can rely on
//! the exact parameter types it was declared with.

use std::f64::consts::PI;

use super::pod::Pod;
use super::registry::{NativeFn, Param, SimpleRegistry};
use super::types::ExprValueType;
use super::value::ExprValue;

fn scalar_fn(name: &str, f: fn(f64) -> f64) -> NativeFn {
    NativeFn::new(name, vec![Param::new("x", ExprValueType::scalar())], ExprValueType::scalar(), move |a| {
        ExprValue::scalar(f(a[0].as_scalar()))
    })
}

fn scalar_fn2(name: &str, p: [&str; 2], f: fn(f64, f64) -> f64) -> NativeFn {
    let s = ExprValueType::scalar;
    NativeFn::new(name, vec![Param::new(p[0], s()), Param::new(p[1], s())], s(), move |a| {
        ExprValue::scalar(f(a[0].as_scalar(), a[1].as_scalar()))
    })
}

fn int_fn2(name: &str, f: fn(i32, i32) -> i32) -> NativeFn {
    let i = ExprValueType::integer;
    NativeFn::new(name, vec![Param::new("a", i()), Param::new("b", i())], i(), move |a| {
        ExprValue::integer(f(a[0].as_integer(), a[1].as_integer()))
    })
}

fn components(v: &ExprValue) -> &[f64] {
    match v.as_pod() {
        Pod::Vector(xs) => xs,
        other => panic!("expected a vector, found {}", other.pod_type()),
    }
}

fn norm(xs: &[f64]) -> f64 {
    xs.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Register the standard library into `reg`.
pub fn install(reg: &mut SimpleRegistry) {
    // ── Constants ────────────────────────────────────────────────────────────
    reg.define_constant("pi", ExprValue::scalar(PI));
    reg.define_constant("true", ExprValue::bool(true));
    reg.define_constant("false", ExprValue::bool(false));

    // ── Math ─────────────────────────────────────────────────────────────────
    reg.define_function(scalar_fn("sin", f64::sin));
    reg.define_function(scalar_fn("cos", f64::cos));
    reg.define_function(scalar_fn("tan", f64::tan));
    reg.define_function(scalar_fn("sqrt", f64::sqrt));
    reg.define_function(scalar_fn("floor", f64::floor));
    reg.define_function(scalar_fn("ceil", f64::ceil));
    reg.define_function(scalar_fn("abs", f64::abs));
    reg.define_function(NativeFn::new(
        "abs",
        vec![Param::new("x", ExprValueType::integer())],
        ExprValueType::integer(),
        |a| ExprValue::integer(a[0].as_integer().wrapping_abs()),
    ));
    reg.define_function(scalar_fn2("min", ["a", "b"], f64::min));
    reg.define_function(scalar_fn2("max", ["a", "b"], f64::max));
    reg.define_function(int_fn2("min", i32::min));
    reg.define_function(int_fn2("max", i32::max));
    reg.define_function(scalar_fn2("pow", ["x", "y"], f64::powf));
    reg.define_function(scalar_fn2("atan2", ["y", "x"], f64::atan2));

    // ── Constructors ─────────────────────────────────────────────────────────
    let s = ExprValueType::scalar;
    reg.define_function(NativeFn::new(
        "range",
        vec![Param::new("lo", s()), Param::new("hi", s())],
        ExprValueType::range(),
        |a| ExprValue::range(a[0].as_scalar(), a[1].as_scalar()),
    ));
    for (n, names) in [(2, &["x", "y"][..]), (3, &["x", "y", "z"][..]), (4, &["x", "y", "z", "w"][..])] {
        let params = names.iter().map(|p| Param::new(p, ExprValueType::scalar())).collect();
        reg.define_function(NativeFn::new("vector", params, ExprValueType::vector(n), |a| {
            ExprValue::vector(a.iter().map(ExprValue::as_scalar).collect())
        }));
    }

    // ── Vectors ──────────────────────────────────────────────────────────────
    for n in 2..=4 {
        let v = || ExprValueType::vector(n);
        reg.define_function(NativeFn::new("length", vec![Param::new("v", v())], ExprValueType::scalar(), |a| {
            ExprValue::scalar(norm(components(&a[0])))
        }));
        reg.define_function(NativeFn::new("normalize", vec![Param::new("v", v())], v(), |a| {
            let xs = components(&a[0]);
            let len = norm(xs);
            ExprValue::vector(xs.iter().map(|x| x / len).collect())
        }));
        reg.define_function(NativeFn::new(
            "dot",
            vec![Param::new("a", v()), Param::new("b", v())],
            ExprValueType::scalar(),
            |a| ExprValue::scalar(components(&a[0]).iter().zip(components(&a[1])).map(|(x, y)| x * y).sum()),
        ));
    }
    let v3 = || ExprValueType::vector(3);
    reg.define_function(NativeFn::new("cross", vec![Param::new("a", v3()), Param::new("b", v3())], v3(), |a| {
        let (u, v) = (components(&a[0]), components(&a[1]));
        ExprValue::vector(vec![u[1] * v[2] - u[2] * v[1], u[2] * v[0] - u[0] * v[2], u[0] * v[1] - u[1] * v[0]])
    }));

    // ── Strings and output ───────────────────────────────────────────────────
    reg.define_function(NativeFn::new("str", vec![Param::any("value")], ExprValueType::string(), |a| {
        ExprValue::string(a[0].to_string())
    }));
    let out = reg.output();
    reg.define_function(
        NativeFn::new("print", vec![Param::any("value")], ExprValueType::void(), move |a| {
            out.borrow_mut().push(a[0].to_string());
            ExprValue::Void
        })
        .impure(),
    );
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::script::registry::{CallArg, ScopeRegistry, SimpleRegistry};
    use crate::script::types::ExprValueType;
    use crate::script::value::ExprValue;

    fn call(reg: &SimpleRegistry, name: &str, args: &[ExprValue]) -> ExprValue {
        let types: Vec<CallArg> = args.iter().map(|a| CallArg { name: None, ty: a.value_type() }).collect();
        reg.lookup_function(name, &types).unwrap().call(args)
    }

    #[test]
    fn math_functions() {
        let reg = SimpleRegistry::new();
        assert_eq!(call(&reg, "sqrt", &[ExprValue::scalar(16.0)]), ExprValue::scalar(4.0));
        assert_eq!(call(&reg, "abs", &[ExprValue::integer(-3)]), ExprValue::integer(3));
        assert_eq!(call(&reg, "max", &[ExprValue::integer(2), ExprValue::integer(7)]), ExprValue::integer(7));
        assert_eq!(call(&reg, "max", &[ExprValue::integer(2), ExprValue::scalar(1.5)]), ExprValue::scalar(2.0));
        assert_eq!(call(&reg, "pow", &[ExprValue::integer(2), ExprValue::integer(10)]), ExprValue::scalar(1024.0));
    }

    #[test]
    fn vector_functions() {
        let reg = SimpleRegistry::new();
        let v = call(&reg, "vector", &[ExprValue::scalar(3.0), ExprValue::integer(4)]);
        assert_eq!(v.value_type(), ExprValueType::vector(2));
        assert_eq!(call(&reg, "length", &[v.clone()]), ExprValue::scalar(5.0));
        assert_eq!(call(&reg, "normalize", &[v]), ExprValue::vector(vec![0.6, 0.8]));
        let x = ExprValue::vector(vec![1.0, 0.0, 0.0]);
        let y = ExprValue::vector(vec![0.0, 1.0, 0.0]);
        assert_eq!(call(&reg, "cross", &[x.clone(), y.clone()]), ExprValue::vector(vec![0.0, 0.0, 1.0]));
        assert_eq!(call(&reg, "dot", &[x, y]), ExprValue::scalar(0.0));
    }

    #[test]
    fn range_and_str() {
        let reg = SimpleRegistry::new();
        assert_eq!(call(&reg, "range", &[ExprValue::integer(1), ExprValue::scalar(2.5)]), ExprValue::range(1.0, 2.5));
        assert_eq!(call(&reg, "str", &[ExprValue::vector(vec![1.0, 2.0])]), ExprValue::string("<1.0, 2.0>"));
    }

    #[test]
    fn print_collects_output() {
        let reg = SimpleRegistry::new();
        let m = reg.lookup_function("print", &[CallArg { name: None, ty: ExprValueType::string() }]).unwrap();
        assert!(!m.func.pure);
        m.call(&[ExprValue::string("hello")]);
        assert_eq!(reg.take_output(), vec!["hello".to_string()]);
    }
}
