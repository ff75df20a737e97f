//! Runtime values for the ani scripting language.
//!
//! PODs are value types and are copied on every assignment.  Arrays and
//! scope instances are `Rc` handles: assigning one re-binds the handle, so
//! two variables can alias the same array.  Storage locations ([`ValueCell`],
//! array slots) carry a notifier list so that host code can follow a value
//! live.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::pod::{Matrix, Pod, PodIndex};
use super::types::{ExprValueType, ScopeHandle, TypeKind};

// ── Notifiers ─────────────────────────────────────────────────────────────────

/// Observer attached to a cell or array.
pub trait ValueNotifier {
    fn value_changed(&self, value: &ExprValue);
    fn value_deleted(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifierId(u32);

#[derive(Default)]
pub struct Notifiers {
    next_id: Cell<u32>,
    list: RefCell<Vec<(NotifierId, Rc<dyn ValueNotifier>)>>,
}

impl Notifiers {
    pub fn install(&self, n: Rc<dyn ValueNotifier>) -> NotifierId {
        let id = NotifierId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.list.borrow_mut().push((id, n));
        id
    }

    pub fn uninstall(&self, id: NotifierId) -> bool {
        let mut list = self.list.borrow_mut();
        let before = list.len();
        list.retain(|(i, _)| *i != id);
        list.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.list.borrow().is_empty()
    }

    // A notifier may install or uninstall while being told, so fire from a
    // snapshot.
    fn snapshot(&self) -> Vec<Rc<dyn ValueNotifier>> {
        self.list.borrow().iter().map(|(_, n)| Rc::clone(n)).collect()
    }

    pub fn changed(&self, value: &ExprValue) {
        if self.is_empty() {
            return;
        }
        for n in self.snapshot() {
            n.value_changed(value);
        }
    }

    pub fn deleted(&self) {
        for n in self.snapshot() {
            n.value_deleted();
        }
    }
}

impl fmt::Debug for Notifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Notifiers({})", self.list.borrow().len())
    }
}

// ── ExprValue ─────────────────────────────────────────────────────────────────

/// A runtime value.
#[derive(Debug, Clone, Default)]
pub enum ExprValue {
    #[default]
    Unknown,
    Void,
    Pod(Pod),
    Scope(ScopeRef),
    Array(ArrayRef),
}

impl ExprValue {
    pub fn integer(n: i32) -> Self {
        ExprValue::Pod(Pod::Integer(n))
    }

    pub fn scalar(x: f64) -> Self {
        ExprValue::Pod(Pod::Scalar(x))
    }

    pub fn range(a: f64, b: f64) -> Self {
        ExprValue::Pod(Pod::Range(a, b))
    }

    pub fn vector(v: Vec<f64>) -> Self {
        ExprValue::Pod(Pod::Vector(v))
    }

    pub fn matrix(m: Matrix) -> Self {
        ExprValue::Pod(Pod::Matrix(m))
    }

    pub fn string(s: impl Into<String>) -> Self {
        ExprValue::Pod(Pod::String(s.into()))
    }

    pub fn bool(b: bool) -> Self {
        ExprValue::integer(b as i32)
    }

    pub fn null_scope() -> Self {
        ExprValue::Scope(ScopeRef::null())
    }

    pub fn null_array() -> Self {
        ExprValue::Array(ArrayRef::null())
    }

    /// Zero/identity value of a complete type, used to initialise variables.
    pub fn prototype(ty: &ExprValueType) -> Self {
        match ty.kind() {
            TypeKind::Void => ExprValue::Void,
            TypeKind::Pod(p) => ExprValue::Pod(Pod::prototype(*p)),
            TypeKind::Scope(_) => ExprValue::null_scope(),
            TypeKind::Array(elem) => {
                assert!(!elem.is_incomplete(), "cannot prototype incomplete type {ty}");
                ExprValue::null_array()
            }
            TypeKind::Unknown => panic!("cannot prototype an unknown type"),
        }
    }

    /// Store `value` into `self`.  Both sides must be the same variant and,
    /// for PODs, the same kind and shape.
    pub fn assign(&mut self, value: ExprValue) {
        let compatible = match (&*self, &value) {
            (ExprValue::Pod(a), ExprValue::Pod(b)) => a.pod_type() == b.pod_type(),
            (ExprValue::Scope(_), ExprValue::Scope(_)) => true,
            (ExprValue::Array(_), ExprValue::Array(_)) => true,
            (ExprValue::Void, ExprValue::Void) => true,
            _ => false,
        };
        if !compatible {
            panic!("mismatched assignment: {} <- {}", self.value_type(), value.value_type());
        }
        *self = value;
    }

    /// The dynamic type of this value.  Null handles report the null
    /// placeholder type.
    pub fn value_type(&self) -> ExprValueType {
        match self {
            ExprValue::Unknown => ExprValueType::unknown(),
            ExprValue::Void => ExprValueType::void(),
            ExprValue::Pod(p) => ExprValueType::pod(p.pod_type()),
            ExprValue::Scope(s) => match &s.0 {
                Some(inst) => ExprValueType::scope(inst.handle.clone()),
                None => ExprValueType::null_scope(),
            },
            ExprValue::Array(a) => match &a.0 {
                Some(data) => ExprValueType::array(data.elem.clone()),
                None => ExprValueType::null_scope(),
            },
        }
    }

    /// Inverted truthiness used by `!`, `&&`, `||` and conditions.
    pub fn is_null(&self) -> bool {
        match self {
            ExprValue::Pod(p) => p.is_null(),
            ExprValue::Scope(s) => s.is_null(),
            ExprValue::Array(a) => a.is_null(),
            ExprValue::Unknown | ExprValue::Void => {
                panic!("truth test on a {} value", self.value_type())
            }
        }
    }

    pub fn as_pod(&self) -> &Pod {
        match self {
            ExprValue::Pod(p) => p,
            other => panic!("expected a POD value, found {}", other.value_type()),
        }
    }

    pub fn into_pod(self) -> Pod {
        match self {
            ExprValue::Pod(p) => p,
            other => panic!("expected a POD value, found {}", other.value_type()),
        }
    }

    pub fn as_integer(&self) -> i32 {
        match self {
            ExprValue::Pod(Pod::Integer(n)) => *n,
            other => panic!("expected int, found {}", other.value_type()),
        }
    }

    pub fn as_scalar(&self) -> f64 {
        match self {
            ExprValue::Pod(Pod::Scalar(x)) => *x,
            other => panic!("expected scalar, found {}", other.value_type()),
        }
    }

    /// Integer or scalar, as `f64`.
    pub fn as_number(&self) -> f64 {
        match self {
            ExprValue::Pod(Pod::Integer(n)) => *n as f64,
            ExprValue::Pod(Pod::Scalar(x)) => *x,
            other => panic!("expected a number, found {}", other.value_type()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ExprValue::Pod(Pod::String(s)) => s,
            other => panic!("expected string, found {}", other.value_type()),
        }
    }

    pub fn as_array(&self) -> &ArrayRef {
        match self {
            ExprValue::Array(a) => a,
            other => panic!("expected an array, found {}", other.value_type()),
        }
    }

    pub fn as_scope(&self) -> &ScopeRef {
        match self {
            ExprValue::Scope(s) => s,
            other => panic!("expected a scope reference, found {}", other.value_type()),
        }
    }
}

impl PartialEq for ExprValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ExprValue::Void, ExprValue::Void) => true,
            (ExprValue::Pod(a), ExprValue::Pod(b)) => a == b,
            (ExprValue::Scope(a), ExprValue::Scope(b)) => a == b,
            (ExprValue::Array(a), ExprValue::Array(b)) => a == b,
            // A null scope literal compares equal to a null array handle.
            (ExprValue::Scope(s), ExprValue::Array(a)) | (ExprValue::Array(a), ExprValue::Scope(s)) => {
                s.is_null() && a.is_null()
            }
            _ => false,
        }
    }
}

impl From<i32> for ExprValue {
    fn from(n: i32) -> Self {
        ExprValue::integer(n)
    }
}

impl From<f64> for ExprValue {
    fn from(x: f64) -> Self {
        ExprValue::scalar(x)
    }
}

impl From<&str> for ExprValue {
    fn from(s: &str) -> Self {
        ExprValue::string(s)
    }
}

impl From<Pod> for ExprValue {
    fn from(p: Pod) -> Self {
        ExprValue::Pod(p)
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Unknown => write!(f, "<unknown>"),
            ExprValue::Void => write!(f, "void"),
            ExprValue::Pod(p) => write!(f, "{p}"),
            ExprValue::Scope(s) => match &s.0 {
                Some(inst) => write!(f, "<{}>", inst.handle.name()),
                None => write!(f, "null"),
            },
            ExprValue::Array(a) => match &a.0 {
                Some(data) => {
                    write!(f, "{{")?;
                    for (i, v) in data.items.borrow().iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{v}")?;
                    }
                    write!(f, "}}")
                }
                None => write!(f, "null"),
            },
        }
    }
}

// ── ValueCell ─────────────────────────────────────────────────────────────────

struct CellData {
    value: RefCell<ExprValue>,
    notifiers: Notifiers,
}

impl Drop for CellData {
    fn drop(&mut self) {
        self.notifiers.deleted();
    }
}

/// Shared storage for one variable or object member.
#[derive(Clone)]
pub struct ValueCell(Rc<CellData>);

impl ValueCell {
    pub fn new(value: ExprValue) -> Self {
        Self(Rc::new(CellData { value: RefCell::new(value), notifiers: Notifiers::default() }))
    }

    pub fn get(&self) -> ExprValue {
        self.0.value.borrow().clone()
    }

    /// Store through the cell.  The new value must match the cell's
    /// variant (see [`ExprValue::assign`]).
    pub fn set(&self, value: ExprValue) {
        self.0.value.borrow_mut().assign(value);
        if !self.0.notifiers.is_empty() {
            let now = self.get();
            self.0.notifiers.changed(&now);
        }
    }

    pub fn install_notifier(&self, n: Rc<dyn ValueNotifier>) -> NotifierId {
        self.0.notifiers.install(n)
    }

    pub fn uninstall_notifier(&self, id: NotifierId) -> bool {
        self.0.notifiers.uninstall(id)
    }

    pub fn ptr_eq(&self, other: &ValueCell) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueCell({:?})", self.0.value.borrow())
    }
}

// ── External scopes ───────────────────────────────────────────────────────────

/// One instance of a registry-owned scope type (an `object` instance in
/// the reference registry).
#[derive(Debug)]
pub struct ScopeInstance {
    pub handle: ScopeHandle,
    pub members: Vec<ValueCell>,
}

/// Nullable handle to a scope instance.  Equality is identity.
#[derive(Debug, Clone, Default)]
pub struct ScopeRef(Option<Rc<ScopeInstance>>);

impl ScopeRef {
    pub fn new(inst: ScopeInstance) -> Self {
        Self(Some(Rc::new(inst)))
    }

    pub fn null() -> Self {
        Self(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// The instance.  Dereferencing null panics.
    pub fn instance(&self) -> &ScopeInstance {
        self.0.as_deref().unwrap_or_else(|| panic!("null scope dereference"))
    }

    pub fn member(&self, slot: usize) -> &ValueCell {
        let inst = self.instance();
        inst.members.get(slot).unwrap_or_else(|| {
            panic!("member slot {slot} out of range for {}", inst.handle.name())
        })
    }
}

impl PartialEq for ScopeRef {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

// ── Arrays ────────────────────────────────────────────────────────────────────

/// Fixed-size, homogeneous array storage.
pub struct ArrayData {
    elem: ExprValueType,
    items: RefCell<Vec<ExprValue>>,
    notifiers: Notifiers,
}

impl ArrayData {
    /// `n` prototype-initialised elements.
    pub fn new(elem: ExprValueType, n: usize) -> Self {
        let proto = ExprValue::prototype(&elem);
        Self { items: RefCell::new(vec![proto; n]), elem, notifiers: Notifiers::default() }
    }

    pub fn from_values(elem: ExprValueType, items: Vec<ExprValue>) -> Self {
        Self { elem, items: RefCell::new(items), notifiers: Notifiers::default() }
    }

    pub fn elem_type(&self) -> &ExprValueType {
        &self.elem
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> ExprValue {
        match self.items.borrow().get(i) {
            Some(v) => v.clone(),
            None => panic!("array index {i} out of range for size {}", self.len()),
        }
    }

    pub fn set(&self, i: usize, value: ExprValue) {
        {
            let mut items = self.items.borrow_mut();
            let len = items.len();
            match items.get_mut(i) {
                Some(slot) => slot.assign(value),
                None => panic!("array index {i} out of range for size {len}"),
            }
        }
        if !self.notifiers.is_empty() {
            let now = self.get(i);
            self.notifiers.changed(&now);
        }
    }

    pub fn values(&self) -> Vec<ExprValue> {
        self.items.borrow().clone()
    }
}

impl Drop for ArrayData {
    fn drop(&mut self) {
        self.notifiers.deleted();
    }
}

/// Nullable handle to an array.  Equality is identity.
#[derive(Clone, Default)]
pub struct ArrayRef(Option<Rc<ArrayData>>);

impl ArrayRef {
    pub fn new(data: ArrayData) -> Self {
        Self(Some(Rc::new(data)))
    }

    pub fn null() -> Self {
        Self(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// The array data.  Dereferencing null panics.
    pub fn data(&self) -> &ArrayData {
        self.0.as_deref().unwrap_or_else(|| panic!("null array dereference"))
    }

    pub fn install_notifier(&self, n: Rc<dyn ValueNotifier>) -> NotifierId {
        self.data().notifiers.install(n)
    }

    pub fn uninstall_notifier(&self, id: NotifierId) -> bool {
        self.data().notifiers.uninstall(id)
    }
}

impl PartialEq for ArrayRef {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(d) => write!(f, "ArrayRef({}[{}])", d.elem, d.len()),
            None => write!(f, "ArrayRef(null)"),
        }
    }
}

// ── Places and index handles ──────────────────────────────────────────────────

/// An lvalue: somewhere a value can be read from and written to.
#[derive(Debug, Clone)]
pub enum Place {
    Cell(ValueCell),
    Index(Rc<IndexHandle>),
}

impl Place {
    pub fn read(&self) -> ExprValue {
        match self {
            Place::Cell(c) => c.get(),
            Place::Index(h) => h.read(),
        }
    }

    pub fn write(&self, value: ExprValue) {
        match self {
            Place::Cell(c) => c.set(value),
            Place::Index(h) => h.write(value),
        }
    }

    /// A detached place holding an rvalue, so that temporaries can be
    /// indexed the same way as variables.
    pub fn temporary(value: ExprValue) -> Self {
        Place::Cell(ValueCell::new(value))
    }
}

#[derive(Debug)]
pub enum IndexOwner {
    Array(ArrayRef),
    Pod(Place),
}

/// Deferred locator for `owner[key]`.
///
/// Reads go straight through to the owner.  Writes into a POD owner read
/// the whole POD, patch the element and write the whole POD back, so the
/// owner's notifiers see one change per element write.
#[derive(Debug)]
pub struct IndexHandle {
    owner: IndexOwner,
    key: PodIndex,
}

fn checked_index(i: i32, len: usize, what: &str) -> usize {
    match usize::try_from(i) {
        Ok(u) if u < len => u,
        _ => panic!("{what} index {i} out of range for size {len}"),
    }
}

impl IndexHandle {
    pub fn index_array(array: ArrayRef, i: i32) -> Self {
        let i = checked_index(i, array.data().len(), "array");
        Self { owner: IndexOwner::Array(array), key: PodIndex::Component(i) }
    }

    fn index_pod(owner: Place, i: i32, what: &str) -> Self {
        let len = owner.read().as_pod().component_count();
        let i = checked_index(i, len, what);
        Self { owner: IndexOwner::Pod(owner), key: PodIndex::Component(i) }
    }

    pub fn index_vector(owner: Place, i: i32) -> Self {
        Self::index_pod(owner, i, "vector")
    }

    pub fn index_matrix_row(owner: Place, r: i32) -> Self {
        Self::index_pod(owner, r, "matrix row")
    }

    pub fn index_matrix_cell(owner: Place, r: i32, c: i32) -> Self {
        let (rows, cols) = match owner.read().as_pod() {
            Pod::Matrix(m) => (m.rows(), m.cols()),
            other => panic!("cell index into {}", other.pod_type()),
        };
        let r = checked_index(r, rows, "matrix row");
        let c = checked_index(c, cols, "matrix column");
        Self { owner: IndexOwner::Pod(owner), key: PodIndex::Cell(r, c) }
    }

    pub fn index_range(owner: Place, i: i32) -> Self {
        Self::index_pod(owner, i, "range")
    }

    pub fn index_string(owner: Place, i: i32) -> Self {
        Self::index_pod(owner, i, "string")
    }

    /// Dispatch on the owner's current value.
    pub fn index_place(owner: Place, i: i32) -> Self {
        let pod_kind = match owner.read() {
            ExprValue::Array(a) => return Self::index_array(a, i),
            ExprValue::Pod(p) => p,
            other => panic!("cannot index {}", other.value_type()),
        };
        match pod_kind {
            Pod::Vector(_) => Self::index_vector(owner, i),
            Pod::Matrix(_) => Self::index_matrix_row(owner, i),
            Pod::Range(..) => Self::index_range(owner, i),
            Pod::String(_) => Self::index_string(owner, i),
            other => panic!("{} is not indexable", other.pod_type()),
        }
    }

    pub fn read(&self) -> ExprValue {
        match (&self.owner, self.key) {
            (IndexOwner::Array(a), PodIndex::Component(i)) => a.data().get(i),
            (IndexOwner::Pod(p), key) => ExprValue::Pod(p.read().as_pod().element(key)),
            (IndexOwner::Array(_), key) => panic!("array indexed with {key:?}"),
        }
    }

    pub fn write(&self, value: ExprValue) {
        match (&self.owner, self.key) {
            (IndexOwner::Array(a), PodIndex::Component(i)) => a.data().set(i, value),
            (IndexOwner::Pod(p), key) => {
                let mut pod = p.read().into_pod();
                pod.set_element(key, value.into_pod());
                p.write(ExprValue::Pod(pod));
            }
            (IndexOwner::Array(_), key) => panic!("array indexed with {key:?}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
