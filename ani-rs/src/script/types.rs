//! Static expression types.
//!
//! Every tree node carries an [`ExprValueType`] once the type-fixup pass has
//! visited it.  Types are immutable, `Arc`-shared descriptions; the plain
//! primitive types are process-wide singletons so that typing a large tree
//! allocates only for composite shapes.

use std::fmt;
use std::sync::{Arc, LazyLock};

use super::value::{ArrayRef, ExprValue};

/// A vector dimension or matrix extent; `None` until constant folding has
/// resolved it.
pub type Dim = Option<usize>;

// ── PodType ───────────────────────────────────────────────────────────────────

/// The primitive ("plain old data") kinds, with their shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodType {
    Integer,
    Scalar,
    Range,
    Vector(Dim),
    Matrix(Dim, Dim),
    String,
}

impl PodType {
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            PodType::Vector(None) | PodType::Matrix(None, _) | PodType::Matrix(_, None)
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, PodType::Integer | PodType::Scalar)
    }
}

impl fmt::Display for PodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn dim(d: &Dim) -> String {
            d.map_or_else(|| "?".to_owned(), |n| n.to_string())
        }
        match self {
            PodType::Integer => write!(f, "int"),
            PodType::Scalar => write!(f, "scalar"),
            PodType::Range => write!(f, "range"),
            PodType::Vector(n) => write!(f, "vector<{}>", dim(n)),
            PodType::Matrix(r, c) => write!(f, "matrix<{},{}>", dim(r), dim(c)),
            PodType::String => write!(f, "string"),
        }
    }
}

// ── ScopeHandle ───────────────────────────────────────────────────────────────

/// Opaque handle for an entity owned by the scope registry (an object type,
/// a setting, an animation).  Only the id takes part in equality.
#[derive(Debug, Clone)]
pub struct ScopeHandle {
    id: u32,
    name: Arc<str>,
}

impl ScopeHandle {
    /// Reserved id of the `null` placeholder.
    pub const NULL_ID: u32 = 0;

    pub fn new(id: u32, name: impl Into<Arc<str>>) -> Self {
        assert!(id != Self::NULL_ID, "scope id 0 is reserved for null");
        Self { id, name: name.into() }
    }

    pub fn null() -> Self {
        Self { id: Self::NULL_ID, name: Arc::from("null") }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_null(&self) -> bool {
        self.id == Self::NULL_ID
    }
}

impl PartialEq for ScopeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ScopeHandle {}

// ── ExprValueType ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum TypeKind {
    Unknown,
    Void,
    Pod(PodType),
    Scope(ScopeHandle),
    Array(ExprValueType),
}

/// Shared, immutable static type of an expression.
#[derive(Debug, Clone)]
pub struct ExprValueType(Arc<TypeKind>);

static UNKNOWN: LazyLock<ExprValueType> = LazyLock::new(|| ExprValueType::from_kind(TypeKind::Unknown));
static VOID: LazyLock<ExprValueType> = LazyLock::new(|| ExprValueType::from_kind(TypeKind::Void));
static INTEGER: LazyLock<ExprValueType> =
    LazyLock::new(|| ExprValueType::from_kind(TypeKind::Pod(PodType::Integer)));
static SCALAR: LazyLock<ExprValueType> =
    LazyLock::new(|| ExprValueType::from_kind(TypeKind::Pod(PodType::Scalar)));
static RANGE: LazyLock<ExprValueType> =
    LazyLock::new(|| ExprValueType::from_kind(TypeKind::Pod(PodType::Range)));
static STRING: LazyLock<ExprValueType> =
    LazyLock::new(|| ExprValueType::from_kind(TypeKind::Pod(PodType::String)));
static NULL_SCOPE: LazyLock<ExprValueType> =
    LazyLock::new(|| ExprValueType::from_kind(TypeKind::Scope(ScopeHandle::null())));

impl Default for ExprValueType {
    fn default() -> Self {
        Self::unknown()
    }
}

impl ExprValueType {
    fn from_kind(kind: TypeKind) -> Self {
        Self(Arc::new(kind))
    }

    pub fn unknown() -> Self {
        UNKNOWN.clone()
    }

    pub fn void() -> Self {
        VOID.clone()
    }

    pub fn integer() -> Self {
        INTEGER.clone()
    }

    pub fn scalar() -> Self {
        SCALAR.clone()
    }

    pub fn range() -> Self {
        RANGE.clone()
    }

    pub fn string() -> Self {
        STRING.clone()
    }

    /// Type of the `null` literal.
    pub fn null_scope() -> Self {
        NULL_SCOPE.clone()
    }

    pub fn vector(n: usize) -> Self {
        Self::from_kind(TypeKind::Pod(PodType::Vector(Some(n))))
    }

    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self::from_kind(TypeKind::Pod(PodType::Matrix(Some(rows), Some(cols))))
    }

    /// Wrap a POD kind, reusing the singleton where one exists.
    pub fn pod(pod: PodType) -> Self {
        match pod {
            PodType::Integer => Self::integer(),
            PodType::Scalar => Self::scalar(),
            PodType::Range => Self::range(),
            PodType::String => Self::string(),
            other => Self::from_kind(TypeKind::Pod(other)),
        }
    }

    pub fn scope(handle: ScopeHandle) -> Self {
        if handle.is_null() {
            return Self::null_scope();
        }
        Self::from_kind(TypeKind::Scope(handle))
    }

    pub fn array(elem: ExprValueType) -> Self {
        Self::from_kind(TypeKind::Array(elem))
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0
    }

    // ── In-place rebinding ───────────────────────────────────────────────────

    fn rebind(&mut self, kind: TypeKind) {
        match Arc::get_mut(&mut self.0) {
            Some(slot) => *slot = kind,
            None => self.0 = Arc::new(kind),
        }
    }

    pub fn set_pod(&mut self, pod: PodType) {
        self.rebind(TypeKind::Pod(pod));
    }

    pub fn set_array(&mut self, elem: ExprValueType) {
        self.rebind(TypeKind::Array(elem));
    }

    pub fn set_scope(&mut self, handle: ScopeHandle) {
        self.rebind(TypeKind::Scope(handle));
    }

    pub fn set_void(&mut self) {
        *self = Self::void();
    }

    pub fn set_unknown(&mut self) {
        *self = Self::unknown();
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn is_unknown(&self) -> bool {
        matches!(*self.0, TypeKind::Unknown)
    }

    pub fn is_void(&self) -> bool {
        matches!(*self.0, TypeKind::Void)
    }

    pub fn is_array(&self) -> bool {
        matches!(*self.0, TypeKind::Array(_))
    }

    pub fn is_scope(&self) -> bool {
        matches!(*self.0, TypeKind::Scope(_))
    }

    pub fn is_null_scope(&self) -> bool {
        matches!(&*self.0, TypeKind::Scope(h) if h.is_null())
    }

    pub fn as_pod(&self) -> Option<PodType> {
        match &*self.0 {
            TypeKind::Pod(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_scope(&self) -> Option<&ScopeHandle> {
        match &*self.0 {
            TypeKind::Scope(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ExprValueType> {
        match &*self.0 {
            TypeKind::Array(e) => Some(e),
            _ => None,
        }
    }

    /// The POD payload.  Panics on any other variant.
    pub fn pod_type(&self) -> PodType {
        self.as_pod()
            .unwrap_or_else(|| panic!("pod_type() on non-POD type {self}"))
    }

    /// The array element type.  Panics on any other variant.
    pub fn element_type(&self) -> &ExprValueType {
        self.as_array()
            .unwrap_or_else(|| panic!("element_type() on non-array type {self}"))
    }

    /// The external scope handle.  Panics on any other variant.
    pub fn scope_handle(&self) -> &ScopeHandle {
        self.as_scope()
            .unwrap_or_else(|| panic!("scope_handle() on non-scope type {self}"))
    }

    /// A type is incomplete while any shape inside it is unresolved.
    pub fn is_incomplete(&self) -> bool {
        match &*self.0 {
            TypeKind::Pod(p) => p.is_incomplete(),
            TypeKind::Array(e) => e.is_incomplete() || e.is_unknown(),
            _ => false,
        }
    }

    /// Exact structural equality.  Unknown is never equal to anything,
    /// not even to another Unknown.
    pub fn is_equal_to(&self, other: &ExprValueType) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return !self.is_unknown();
        }
        match (&*self.0, &*other.0) {
            (TypeKind::Void, TypeKind::Void) => true,
            (TypeKind::Pod(a), TypeKind::Pod(b)) => a == b,
            (TypeKind::Scope(a), TypeKind::Scope(b)) => a == b,
            (TypeKind::Array(a), TypeKind::Array(b)) => a.is_equal_to(b),
            _ => false,
        }
    }
}

impl PartialEq for ExprValueType {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal_to(other)
    }
}

impl fmt::Display for ExprValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            TypeKind::Unknown => write!(f, "<unknown>"),
            TypeKind::Void => write!(f, "void"),
            TypeKind::Pod(p) => write!(f, "{p}"),
            TypeKind::Scope(h) => write!(f, "{}", h.name()),
            TypeKind::Array(e) => write!(f, "{e}[]"),
        }
    }
}

// ── Assignment compatibility ──────────────────────────────────────────────────

/// Outcome of [`can_assign_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssignKind {
    None,
    Widen,
    Exact,
}

/// Can a value of type `src` be stored into a location of type `dst`?
///
/// Widening is directional: `can_assign_type(scalar, int)` is `Widen` while
/// the reverse is `None`.
pub fn can_assign_type(dst: &ExprValueType, src: &ExprValueType) -> AssignKind {
    if dst.is_equal_to(src) && !dst.is_incomplete() && !dst.is_void() {
        return AssignKind::Exact;
    }
    match (dst.kind(), src.kind()) {
        (TypeKind::Pod(PodType::Scalar), TypeKind::Pod(PodType::Integer)) => AssignKind::Widen,
        (TypeKind::Scope(d), TypeKind::Scope(s)) if s.is_null() && !d.is_null() => AssignKind::Widen,
        (TypeKind::Array(e), TypeKind::Scope(s)) if s.is_null() && !e.is_incomplete() => {
            AssignKind::Widen
        }
        _ => AssignKind::None,
    }
}

/// The concrete assignment strategy between two types, if one is legal.
pub fn assignment_func(dst: &ExprValueType, src: &ExprValueType) -> Option<AssignmentFunc> {
    match can_assign_type(dst, src) {
        AssignKind::None => None,
        AssignKind::Exact => match dst.kind() {
            TypeKind::Pod(_) => Some(AssignmentFunc::Copy),
            TypeKind::Scope(_) | TypeKind::Array(_) => Some(AssignmentFunc::Rebind),
            TypeKind::Unknown | TypeKind::Void => None,
        },
        AssignKind::Widen => match (dst.kind(), src.kind()) {
            (TypeKind::Pod(PodType::Scalar), _) => Some(AssignmentFunc::IntegerToScalar),
            (TypeKind::Scope(_), _) => Some(AssignmentFunc::NullToScope),
            (TypeKind::Array(_), _) => Some(AssignmentFunc::NullToArray),
            _ => None,
        },
    }
}

/// Whether a value of this type can be tested for truth.
pub fn can_bool_convert(ty: &ExprValueType) -> bool {
    match ty.kind() {
        TypeKind::Pod(p) => p.is_numeric(),
        TypeKind::Scope(_) | TypeKind::Array(_) => true,
        TypeKind::Unknown | TypeKind::Void => false,
    }
}

// ── AssignmentFunc ────────────────────────────────────────────────────────────

/// One legal store between two fixed types, chosen during type-fixup and
/// reused at every evaluation of the node that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentFunc {
    /// Same POD type: copy the value.
    Copy,
    /// Same reference type: re-bind the handle.
    Rebind,
    IntegerToScalar,
    NullToScope,
    NullToArray,
}

impl AssignmentFunc {
    /// Convert `value` to the destination representation.
    pub fn convert(self, value: ExprValue) -> ExprValue {
        match self {
            AssignmentFunc::Copy | AssignmentFunc::Rebind | AssignmentFunc::NullToScope => value,
            AssignmentFunc::IntegerToScalar => ExprValue::scalar(value.as_integer() as f64),
            AssignmentFunc::NullToArray => {
                assert!(value.is_null(), "NullToArray applied to a non-null value");
                ExprValue::Array(ArrayRef::null())
            }
        }
    }
}

// ── IncDecFunc ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecOp {
    Inc,
    Dec,
}

/// Increment/decrement strategy for one fixed type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecFunc {
    IncInteger,
    DecInteger,
    IncScalar,
    DecScalar,
}

impl IncDecFunc {
    /// The updated value; the caller stores it.
    pub fn apply(self, value: &ExprValue) -> ExprValue {
        match self {
            IncDecFunc::IncInteger => ExprValue::integer(value.as_integer().wrapping_add(1)),
            IncDecFunc::DecInteger => ExprValue::integer(value.as_integer().wrapping_sub(1)),
            IncDecFunc::IncScalar => ExprValue::scalar(value.as_scalar() + 1.0),
            IncDecFunc::DecScalar => ExprValue::scalar(value.as_scalar() - 1.0),
        }
    }
}

pub fn lookup_incdec(ty: &ExprValueType, op: IncDecOp) -> Option<IncDecFunc> {
    match (ty.as_pod()?, op) {
        (PodType::Integer, IncDecOp::Inc) => Some(IncDecFunc::IncInteger),
        (PodType::Integer, IncDecOp::Dec) => Some(IncDecFunc::DecInteger),
        (PodType::Scalar, IncDecOp::Inc) => Some(IncDecFunc::IncScalar),
        (PodType::Scalar, IncDecOp::Dec) => Some(IncDecFunc::DecScalar),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
