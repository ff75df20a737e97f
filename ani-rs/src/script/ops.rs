//! Operator registry.
//!
//! A static table maps each [`OpId`] to an optional matcher.  A matcher
//! looks at the operand types and returns the result type plus a plain
//! compute function, trying its concrete signatures in a fixed order and
//! taking the first that fits.  There is no numeric tower: every accepted
//! signature is spelled out, including which operand widens.
//!
//! `&&`, `||`, `?:`, subscript, member-select, call and `new` have entries
//! but no matcher.  The type-fixup pass handles them structurally because
//! evaluating one operand can make the other unnecessary.

use std::fmt;

use tracing::warn;

use super::pod::{Matrix, Pod};
use super::types::{can_bool_convert, ExprValueType, PodType, TypeKind};
use super::value::ExprValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpId {
    Neg,
    Pos,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    LogicalAnd,
    LogicalOr,
    Conditional,
    Subscript,
    Member,
    Call,
    New,
}

impl OpId {
    pub fn symbol(self) -> &'static str {
        match self {
            OpId::Neg | OpId::Sub => "-",
            OpId::Pos | OpId::Add => "+",
            OpId::Not => "!",
            OpId::Mul => "*",
            OpId::Div => "/",
            OpId::Mod => "%",
            OpId::Lt => "<",
            OpId::Le => "<=",
            OpId::Gt => ">",
            OpId::Ge => ">=",
            OpId::Eq => "==",
            OpId::Ne => "!=",
            OpId::LogicalAnd => "&&",
            OpId::LogicalOr => "||",
            OpId::Conditional => "?:",
            OpId::Subscript => "[]",
            OpId::Member => ".",
            OpId::Call => "()",
            OpId::New => "new",
        }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Computes an operator over already-evaluated operands.
pub type OpFn = fn(&[ExprValue]) -> ExprValue;

/// A resolved operator application.
#[derive(Debug, Clone)]
pub struct OpMatch {
    pub result: ExprValueType,
    pub compute: OpFn,
}

type Matcher = fn(&[ExprValueType]) -> Option<OpMatch>;

static OPERATORS: &[(OpId, Option<Matcher>)] = &[
    (OpId::Neg, Some(match_neg)),
    (OpId::Pos, Some(match_pos)),
    (OpId::Not, Some(match_not)),
    (OpId::Add, Some(match_add)),
    (OpId::Sub, Some(match_sub)),
    (OpId::Mul, Some(match_mul)),
    (OpId::Div, Some(match_div)),
    (OpId::Mod, Some(match_mod)),
    (OpId::Lt, Some(match_lt)),
    (OpId::Le, Some(match_le)),
    (OpId::Gt, Some(match_gt)),
    (OpId::Ge, Some(match_ge)),
    (OpId::Eq, Some(match_eq)),
    (OpId::Ne, Some(match_ne)),
    (OpId::LogicalAnd, None),
    (OpId::LogicalOr, None),
    (OpId::Conditional, None),
    (OpId::Subscript, None),
    (OpId::Member, None),
    (OpId::Call, None),
    (OpId::New, None),
];

/// Resolve `op` applied to operands of the given types.
pub fn lookup_op(op: OpId, args: &[ExprValueType]) -> Option<OpMatch> {
    let (_, matcher) = OPERATORS.iter().find(|(id, _)| *id == op)?;
    (*matcher)?(args)
}

fn ok(result: ExprValueType, compute: OpFn) -> Option<OpMatch> {
    Some(OpMatch { result, compute })
}

fn unary_pod(args: &[ExprValueType]) -> Option<PodType> {
    match args {
        [a] => a.as_pod(),
        _ => None,
    }
}

fn binary_pods(args: &[ExprValueType]) -> Option<(PodType, PodType)> {
    match args {
        [a, b] => Some((a.as_pod()?, b.as_pod()?)),
        _ => None,
    }
}

// ── Numeric families ──────────────────────────────────────────────────────────

/// The four numeric signatures of one binary operator.
struct Family {
    ii: OpFn,
    /// Left side widens.
    is: OpFn,
    /// Right side widens.
    si: OpFn,
    ss: OpFn,
    /// Result of the mixed and scalar cases: Scalar for arithmetic, Integer
    /// for comparisons.
    mixed_is_integer: bool,
}

fn match_family(f: &Family, args: &[ExprValueType]) -> Option<OpMatch> {
    let mixed = if f.mixed_is_integer { ExprValueType::integer() } else { ExprValueType::scalar() };
    match binary_pods(args)? {
        (PodType::Integer, PodType::Integer) => ok(ExprValueType::integer(), f.ii),
        (PodType::Integer, PodType::Scalar) => ok(mixed, f.is),
        (PodType::Scalar, PodType::Integer) => ok(mixed, f.si),
        (PodType::Scalar, PodType::Scalar) => ok(mixed, f.ss),
        _ => None,
    }
}

macro_rules! family {
    (cmp $fam:ident, |$x:ident, $y:ident| $body:expr) => {
        static $fam: Family = Family {
            ii: |a| {
                let ($x, $y) = (a[0].as_integer(), a[1].as_integer());
                ExprValue::bool($body)
            },
            is: |a| {
                let ($x, $y) = (a[0].as_integer() as f64, a[1].as_scalar());
                ExprValue::bool($body)
            },
            si: |a| {
                let ($x, $y) = (a[0].as_scalar(), a[1].as_integer() as f64);
                ExprValue::bool($body)
            },
            ss: |a| {
                let ($x, $y) = (a[0].as_scalar(), a[1].as_scalar());
                ExprValue::bool($body)
            },
            mixed_is_integer: true,
        };
    };
    ($fam:ident, $wrap:path, |$x:ident, $y:ident| $body:expr, ii = $ii:expr) => {
        static $fam: Family = Family {
            ii: $ii,
            is: |a| {
                let ($x, $y) = (a[0].as_integer() as f64, a[1].as_scalar());
                $wrap($body)
            },
            si: |a| {
                let ($x, $y) = (a[0].as_scalar(), a[1].as_integer() as f64);
                $wrap($body)
            },
            ss: |a| {
                let ($x, $y) = (a[0].as_scalar(), a[1].as_scalar());
                $wrap($body)
            },
            mixed_is_integer: false,
        };
    };
}

fn ints(a: &[ExprValue]) -> (i32, i32) {
    (a[0].as_integer(), a[1].as_integer())
}

family!(ADD, ExprValue::scalar, |x, y| x + y, ii = |a| {
    let (x, y) = ints(a);
    ExprValue::integer(x.wrapping_add(y))
});
family!(SUB, ExprValue::scalar, |x, y| x - y, ii = |a| {
    let (x, y) = ints(a);
    ExprValue::integer(x.wrapping_sub(y))
});
family!(MUL, ExprValue::scalar, |x, y| x * y, ii = |a| {
    let (x, y) = ints(a);
    ExprValue::integer(x.wrapping_mul(y))
});
family!(DIV, ExprValue::scalar, |x, y| x / y, ii = |a| {
    let (x, y) = ints(a);
    if y == 0 {
        warn!(dividend = x, "integer division by zero, result is 0");
        return ExprValue::integer(0);
    }
    ExprValue::integer(x.wrapping_div(y))
});
family!(MOD, ExprValue::scalar, |x, y| x % y, ii = |a| {
    let (x, y) = ints(a);
    if y == 0 {
        warn!(dividend = x, "integer remainder by zero, result is 0");
        return ExprValue::integer(0);
    }
    ExprValue::integer(x.wrapping_rem(y))
});
family!(cmp LT, |x, y| x < y);
family!(cmp LE, |x, y| x <= y);
family!(cmp GT, |x, y| x > y);
family!(cmp GE, |x, y| x >= y);
family!(cmp EQ, |x, y| x == y);
family!(cmp NE, |x, y| x != y);

// ── Element-wise helpers ──────────────────────────────────────────────────────

fn vec_zip(a: &ExprValue, b: &ExprValue, f: impl Fn(f64, f64) -> f64) -> ExprValue {
    match (a.as_pod(), b.as_pod()) {
        (Pod::Vector(x), Pod::Vector(y)) => {
            ExprValue::vector(x.iter().zip(y).map(|(p, q)| f(*p, *q)).collect())
        }
        (l, r) => panic!("vector operands expected, found {} and {}", l.pod_type(), r.pod_type()),
    }
}

fn as_vector(v: &ExprValue) -> &[f64] {
    match v.as_pod() {
        Pod::Vector(x) => x,
        other => panic!("expected vector, found {}", other.pod_type()),
    }
}

fn as_matrix(v: &ExprValue) -> &Matrix {
    match v.as_pod() {
        Pod::Matrix(m) => m,
        other => panic!("expected matrix, found {}", other.pod_type()),
    }
}

fn as_range(v: &ExprValue) -> (f64, f64) {
    match v.as_pod() {
        Pod::Range(a, b) => (*a, *b),
        other => panic!("expected range, found {}", other.pod_type()),
    }
}

fn scale_vec(v: &[f64], k: f64) -> ExprValue {
    ExprValue::vector(v.iter().map(|x| x * k).collect())
}

/// Same-shape vector, matrix and range cases shared by `+` and `-`.
fn match_additive(args: &[ExprValueType], vv: OpFn, mm: OpFn, rr: OpFn) -> Option<OpMatch> {
    match binary_pods(args)? {
        (PodType::Vector(Some(n)), PodType::Vector(Some(m))) if n == m => ok(ExprValueType::vector(n), vv),
        (PodType::Matrix(Some(r), Some(c)), PodType::Matrix(Some(r2), Some(c2))) if r == r2 && c == c2 => {
            ok(ExprValueType::matrix(r, c), mm)
        }
        (PodType::Range, PodType::Range) => ok(ExprValueType::range(), rr),
        _ => None,
    }
}

fn is_number(p: PodType) -> bool {
    p.is_numeric()
}

// ── Binary matchers ───────────────────────────────────────────────────────────

fn match_add(args: &[ExprValueType]) -> Option<OpMatch> {
    match_family(&ADD, args)
        .or_else(|| {
            match_additive(
                args,
                |a| vec_zip(&a[0], &a[1], |x, y| x + y),
                |a| ExprValue::matrix(as_matrix(&a[0]).zip(as_matrix(&a[1]), |x, y| x + y)),
                |a| {
                    let ((a0, b0), (a1, b1)) = (as_range(&a[0]), as_range(&a[1]));
                    ExprValue::range(a0 + a1, b0 + b1)
                },
            )
        })
        .or_else(|| match binary_pods(args)? {
            (PodType::String, PodType::String | PodType::Integer | PodType::Scalar) => {
                ok(ExprValueType::string(), |a| ExprValue::string(format!("{}{}", a[0].as_str(), a[1])))
            }
            _ => None,
        })
}

fn match_sub(args: &[ExprValueType]) -> Option<OpMatch> {
    match_family(&SUB, args).or_else(|| {
        match_additive(
            args,
            |a| vec_zip(&a[0], &a[1], |x, y| x - y),
            |a| ExprValue::matrix(as_matrix(&a[0]).zip(as_matrix(&a[1]), |x, y| x - y)),
            |a| {
                let ((a0, b0), (a1, b1)) = (as_range(&a[0]), as_range(&a[1]));
                ExprValue::range(a0 - a1, b0 - b1)
            },
        )
    })
}

fn match_mul(args: &[ExprValueType]) -> Option<OpMatch> {
    if let Some(m) = match_family(&MUL, args) {
        return Some(m);
    }
    match binary_pods(args)? {
        (k, PodType::Vector(Some(n))) if is_number(k) => {
            ok(ExprValueType::vector(n), |a| scale_vec(as_vector(&a[1]), a[0].as_number()))
        }
        (PodType::Vector(Some(n)), k) if is_number(k) => {
            ok(ExprValueType::vector(n), |a| scale_vec(as_vector(&a[0]), a[1].as_number()))
        }
        (k, PodType::Matrix(Some(r), Some(c))) if is_number(k) => ok(ExprValueType::matrix(r, c), |a| {
            let k = a[0].as_number();
            ExprValue::matrix(as_matrix(&a[1]).map(|x| x * k))
        }),
        (PodType::Matrix(Some(r), Some(c)), k) if is_number(k) => ok(ExprValueType::matrix(r, c), |a| {
            let k = a[1].as_number();
            ExprValue::matrix(as_matrix(&a[0]).map(|x| x * k))
        }),
        (PodType::Matrix(Some(r), Some(c)), PodType::Matrix(Some(c2), Some(k))) if c == c2 => {
            ok(ExprValueType::matrix(r, k), |a| ExprValue::matrix(as_matrix(&a[0]).mul(as_matrix(&a[1]))))
        }
        (PodType::Matrix(Some(r), Some(c)), PodType::Vector(Some(n))) if c == n => {
            ok(ExprValueType::vector(r), |a| ExprValue::vector(as_matrix(&a[0]).mul_vec(as_vector(&a[1]))))
        }
        _ => None,
    }
}

fn match_div(args: &[ExprValueType]) -> Option<OpMatch> {
    if let Some(m) = match_family(&DIV, args) {
        return Some(m);
    }
    match binary_pods(args)? {
        (PodType::Vector(Some(n)), k) if is_number(k) => ok(ExprValueType::vector(n), |a| {
            let k = a[1].as_number();
            ExprValue::vector(as_vector(&a[0]).iter().map(|x| x / k).collect())
        }),
        (PodType::Matrix(Some(r), Some(c)), k) if is_number(k) => ok(ExprValueType::matrix(r, c), |a| {
            let k = a[1].as_number();
            ExprValue::matrix(as_matrix(&a[0]).map(|x| x / k))
        }),
        _ => None,
    }
}

fn match_mod(args: &[ExprValueType]) -> Option<OpMatch> {
    match_family(&MOD, args)
}

fn match_relational(fam: &Family, args: &[ExprValueType], strcmp: OpFn) -> Option<OpMatch> {
    match_family(fam, args).or_else(|| match binary_pods(args)? {
        (PodType::String, PodType::String) => ok(ExprValueType::integer(), strcmp),
        _ => None,
    })
}

fn match_lt(args: &[ExprValueType]) -> Option<OpMatch> {
    match_relational(&LT, args, |a| ExprValue::bool(a[0].as_str() < a[1].as_str()))
}

fn match_le(args: &[ExprValueType]) -> Option<OpMatch> {
    match_relational(&LE, args, |a| ExprValue::bool(a[0].as_str() <= a[1].as_str()))
}

fn match_gt(args: &[ExprValueType]) -> Option<OpMatch> {
    match_relational(&GT, args, |a| ExprValue::bool(a[0].as_str() > a[1].as_str()))
}

fn match_ge(args: &[ExprValueType]) -> Option<OpMatch> {
    match_relational(&GE, args, |a| ExprValue::bool(a[0].as_str() >= a[1].as_str()))
}

/// Non-numeric equality: same-shape PODs compare by value, references by
/// identity, and the null placeholder against any reference type.
fn equality_case(args: &[ExprValueType]) -> bool {
    let [a, b] = args else {
        return false;
    };
    match (a.kind(), b.kind()) {
        (TypeKind::Pod(p), TypeKind::Pod(q)) => match (p, q) {
            (PodType::Vector(Some(n)), PodType::Vector(Some(m))) => n == m,
            (PodType::Matrix(Some(r), Some(c)), PodType::Matrix(Some(r2), Some(c2))) => r == r2 && c == c2,
            (PodType::Range, PodType::Range) | (PodType::String, PodType::String) => true,
            _ => false,
        },
        (TypeKind::Scope(_), TypeKind::Scope(_)) => a.is_equal_to(b) || a.is_null_scope() || b.is_null_scope(),
        (TypeKind::Array(_), TypeKind::Array(_)) => a.is_equal_to(b),
        (TypeKind::Array(_), TypeKind::Scope(_)) => b.is_null_scope(),
        (TypeKind::Scope(_), TypeKind::Array(_)) => a.is_null_scope(),
        _ => false,
    }
}

fn match_eq(args: &[ExprValueType]) -> Option<OpMatch> {
    match_family(&EQ, args).or_else(|| {
        equality_case(args).then(|| OpMatch {
            result: ExprValueType::integer(),
            compute: |a| ExprValue::bool(a[0] == a[1]),
        })
    })
}

fn match_ne(args: &[ExprValueType]) -> Option<OpMatch> {
    match_family(&NE, args).or_else(|| {
        equality_case(args).then(|| OpMatch {
            result: ExprValueType::integer(),
            compute: |a| ExprValue::bool(a[0] != a[1]),
        })
    })
}

// ── Unary matchers ────────────────────────────────────────────────────────────

fn match_neg(args: &[ExprValueType]) -> Option<OpMatch> {
    let ty = args.first()?.clone();
    let compute: OpFn = match unary_pod(args)? {
        PodType::Integer => |a| ExprValue::integer(a[0].as_integer().wrapping_neg()),
        PodType::Scalar => |a| ExprValue::scalar(-a[0].as_scalar()),
        PodType::Range => |a| {
            let (x, y) = as_range(&a[0]);
            ExprValue::range(-x, -y)
        },
        PodType::Vector(Some(_)) => |a| scale_vec(as_vector(&a[0]), -1.0),
        PodType::Matrix(Some(_), Some(_)) => |a| ExprValue::matrix(as_matrix(&a[0]).map(|x| -x)),
        _ => return None,
    };
    ok(ty, compute)
}

fn match_pos(args: &[ExprValueType]) -> Option<OpMatch> {
    match unary_pod(args)? {
        PodType::Integer
        | PodType::Scalar
        | PodType::Range
        | PodType::Vector(Some(_))
        | PodType::Matrix(Some(_), Some(_)) => ok(args[0].clone(), |a| a[0].clone()),
        _ => None,
    }
}

fn match_not(args: &[ExprValueType]) -> Option<OpMatch> {
    match args {
        [t] if can_bool_convert(t) => ok(ExprValueType::integer(), |a| ExprValue::bool(a[0].is_null())),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
