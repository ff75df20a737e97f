//! Suspendable execution engine.
//!
//! Evaluation is ordinary recursion over the tree, but no paused state ever
//! lives on the host stack.  When a leaf decides to yield, every node on the
//! way back up records where it was in a [`SavedState`] and returns
//! `Err(Suspended)`.  The next run walks down the same path: each node pops
//! its own frame and continues at the recorded step, handing the remaining
//! frames to the child it was waiting on.
//!
//! Frames are pushed innermost first, so the root's frame is on top of the
//! stack when a thread resumes.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use super::ast::{Block, Decl, Expr, ExprKind, LogicalOp, MemberAccess, Program, Stmt, StmtKind};
use super::pod::{Pod, PodIndex};
use super::registry::{Binding, BlockId, ScopeCursor, ScopeRegistry, VarRef};
use super::types::{AssignmentFunc, IncDecFunc};
use super::value::{ArrayData, ArrayRef, ExprValue, IndexHandle, Place, ValueCell};

/// Outcome of a node that gave up control.  The state needed to continue
/// is on the thread's [`Continuation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suspended;

/// How a statement finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Next,
    Break,
    Return(Option<ExprValue>),
}

/// One node's paused position.
#[derive(Debug, Clone, Default)]
pub struct SavedState {
    pub step: u8,
    /// Child index for nodes that walk a list.
    pub pos: usize,
    /// Intermediate results computed before the suspension.
    pub values: Vec<ExprValue>,
    pub place: Option<Place>,
}

impl SavedState {
    pub fn at(step: u8) -> Self {
        Self { step, ..Self::default() }
    }

    pub fn pos(step: u8, pos: usize) -> Self {
        Self { step, pos, ..Self::default() }
    }

    pub fn value(mut self, v: ExprValue) -> Self {
        self.values.push(v);
        self
    }

    pub fn values(mut self, vs: Vec<ExprValue>) -> Self {
        self.values = vs;
        self
    }

    pub fn place(mut self, p: Place) -> Self {
        self.place = Some(p);
        self
    }

    fn take(&mut self, i: usize) -> ExprValue {
        std::mem::take(&mut self.values[i])
    }

    fn take_place(&mut self) -> Place {
        self.place.take().unwrap_or_else(|| panic!("saved state has no place"))
    }
}

/// LIFO of saved node states.
#[derive(Debug, Default)]
pub struct Continuation {
    stack: Vec<SavedState>,
}

impl Continuation {
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// The calling node's frame, if the thread is resuming.
    pub fn resume(&mut self) -> Option<SavedState> {
        self.stack.pop()
    }

    /// Record a frame and produce the suspension marker.
    pub fn suspend(&mut self, state: SavedState) -> Suspended {
        self.stack.push(state);
        Suspended
    }
}

// ── Switch policy ─────────────────────────────────────────────────────────────

static SWITCH_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Ask the next thread that checks to yield at its next leaf.
pub fn request_switch() {
    SWITCH_REQUESTED.store(true, Ordering::SeqCst);
}

/// Seeded xorshift64 deciding random yields.
#[derive(Debug)]
struct StressHook {
    state: u64,
    probability: f64,
}

impl StressHook {
    fn new(seed: u64, probability: f64) -> Self {
        // xorshift64 requires a non-zero state.
        let state = if seed == 0 { 0x517c_c1b7_2722_0a95 } else { seed };
        Self { state, probability }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn fire(&mut self) -> bool {
        // Top 53 bits as a uniform draw in [0, 1).
        let draw = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        draw < self.probability
    }
}

/// Decides, at every leaf, whether the thread should yield.
#[derive(Debug)]
pub struct SwitchPolicy {
    slice: Option<u32>,
    used: u32,
    stress: Option<StressHook>,
}

impl SwitchPolicy {
    /// Run to completion.  Switch requests are ignored.
    pub fn never() -> Self {
        Self { slice: None, used: 0, stress: None }
    }

    /// Yield after `leaves` leaves per slice.
    pub fn slice(leaves: u32) -> Self {
        Self { slice: Some(leaves), used: 0, stress: None }
    }

    /// Yield at every leaf.
    pub fn every_leaf() -> Self {
        Self::slice(0)
    }

    /// Also yield at random with the given per-leaf probability.
    pub fn with_stress(mut self, probability: f64, seed: u64) -> Self {
        let probability = probability.clamp(0.0, 1.0);
        self.stress = Some(StressHook::new(seed, probability));
        self
    }

    pub fn begin_slice(&mut self) {
        self.used = 0;
    }

    pub fn should_switch(&mut self) -> bool {
        if self.slice.is_none() && self.stress.is_none() {
            return false;
        }
        if SWITCH_REQUESTED.swap(false, Ordering::AcqRel) {
            return true;
        }
        if let Some(limit) = self.slice {
            self.used += 1;
            if self.used > limit {
                return true;
            }
        }
        match &mut self.stress {
            Some(s) => s.fire(),
            None => false,
        }
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Frame {
    block: BlockId,
    cells: Vec<ValueCell>,
}

/// Storage for the automatic variables of every entered block.
#[derive(Debug, Default)]
pub struct Frames {
    stack: Vec<Frame>,
}

impl Frames {
    pub fn push(&mut self, block: BlockId, cells: Vec<ValueCell>) {
        self.stack.push(Frame { block, cells });
    }

    pub fn pop(&mut self, block: BlockId) {
        let top = self.stack.pop().map(|f| f.block);
        assert_eq!(top, Some(block), "scope exit does not match scope entry");
    }

    pub fn cell(&self, var: VarRef) -> &ValueCell {
        self.stack
            .iter()
            .rev()
            .find(|f| f.block == var.block)
            .and_then(|f| f.cells.get(var.index))
            .unwrap_or_else(|| panic!("variable {var:?} has no storage"))
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

// ── Thread state ──────────────────────────────────────────────────────────────

/// A postfix update waiting for the end of its full expression.
#[derive(Debug)]
pub struct DelayedOp {
    place: Place,
    func: IncDecFunc,
}

/// Everything a script thread carries between slices.
#[derive(Debug)]
pub struct ThreadState {
    pub frames: Frames,
    pub cont: Continuation,
    pub delayed: Vec<DelayedOp>,
    pub switch: SwitchPolicy,
    detached: bool,
}

impl ThreadState {
    pub fn new(switch: SwitchPolicy) -> Self {
        Self { frames: Frames::default(), cont: Continuation::default(), delayed: Vec::new(), switch, detached: false }
    }

    /// State with no thread behind it, used for constant folding.  Touching
    /// a variable or calling an impure function fails.
    pub fn detached() -> Self {
        Self { detached: true, ..Self::new(SwitchPolicy::never()) }
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

pub struct ExecContext<'a> {
    pub registry: &'a dyn ScopeRegistry,
    pub st: &'a mut ThreadState,
}

macro_rules! run {
    ($ctx:expr, $call:expr, $save:expr) => {
        match $call {
            Ok(v) => v,
            Err(Suspended) => return Err($ctx.st.cont.suspend($save)),
        }
    };
}

fn unresolved(expr: &Expr) -> ! {
    panic!("line {}: node was not resolved by type fixup: {:?}", expr.line, expr.kind)
}

/// Leaf check: resuming leaves go on, fresh ones may yield.
fn leaf(ctx: &mut ExecContext<'_>) -> Result<(), Suspended> {
    if ctx.st.cont.resume().is_some() {
        return Ok(());
    }
    if ctx.st.switch.should_switch() {
        return Err(ctx.st.cont.suspend(SavedState::default()));
    }
    Ok(())
}

fn resumed(ctx: &mut ExecContext<'_>) -> SavedState {
    ctx.st.cont.resume().unwrap_or_default()
}

fn no_context(ctx: &ExecContext<'_>) -> Result<(), Suspended> {
    if ctx.st.detached {
        Err(Suspended)
    } else {
        Ok(())
    }
}

/// Apply every queued postfix update.
pub fn flush_delayed(ctx: &mut ExecContext<'_>) {
    for op in std::mem::take(&mut ctx.st.delayed) {
        let v = op.func.apply(&op.place.read());
        op.place.write(v);
    }
}

/// Evaluate a full expression: the value, then the delayed updates.
pub fn eval_full(expr: &Expr, ctx: &mut ExecContext<'_>) -> Result<ExprValue, Suspended> {
    let v = eval_expr(expr, ctx)?;
    flush_delayed(ctx);
    Ok(v)
}

fn convert(conv: Option<AssignmentFunc>, v: ExprValue) -> ExprValue {
    match conv {
        Some(f) => f.convert(v),
        None => v,
    }
}

fn member_value(base: &ExprValue, access: MemberAccess) -> ExprValue {
    match access {
        MemberAccess::Component(i) => ExprValue::Pod(base.as_pod().element(PodIndex::Component(i))),
        MemberAccess::Length => match base.as_pod() {
            Pod::Vector(xs) => ExprValue::scalar(xs.iter().map(|x| x * x).sum::<f64>().sqrt()),
            other => panic!("length of {}", other.pod_type()),
        },
        MemberAccess::StringLength => ExprValue::integer(base.as_str().chars().count() as i32),
        MemberAccess::Dim | MemberAccess::Rows => ExprValue::integer(base.as_pod().component_count() as i32),
        MemberAccess::Cols => match base.as_pod() {
            Pod::Matrix(m) => ExprValue::integer(m.cols() as i32),
            other => panic!("cols of {}", other.pod_type()),
        },
        MemberAccess::ArraySize => ExprValue::integer(base.as_array().data().len() as i32),
        MemberAccess::Scope { slot } => base.as_scope().member(slot).get(),
    }
}

/// Evaluate `expr` to a value.
pub fn eval_expr(expr: &Expr, ctx: &mut ExecContext<'_>) -> Result<ExprValue, Suspended> {
    match &expr.kind {
        ExprKind::Literal(v) => {
            leaf(ctx)?;
            Ok(v.clone())
        }
        ExprKind::Ident(id) => match &id.binding {
            Some(Binding::Variable { var, .. }) => {
                no_context(ctx)?;
                leaf(ctx)?;
                Ok(ctx.st.frames.cell(*var).get())
            }
            Some(Binding::Constant(v)) => {
                leaf(ctx)?;
                Ok(v.clone())
            }
            Some(Binding::Function(name)) => panic!("function `{name}` used as a value"),
            None => unresolved(expr),
        },
        ExprKind::Vector { elems } => {
            let s = resumed(ctx);
            let mut vals = s.values;
            for (i, e) in elems.iter().enumerate().skip(s.pos) {
                let v = run!(ctx, eval_expr(e, ctx), SavedState::pos(0, i).values(vals.clone()));
                vals.push(v);
            }
            Ok(ExprValue::vector(vals.iter().map(ExprValue::as_number).collect()))
        }
        ExprKind::Array { elems, convs } => {
            let s = resumed(ctx);
            let mut vals = s.values;
            for (i, e) in elems.iter().enumerate().skip(s.pos) {
                let v = run!(ctx, eval_expr(e, ctx), SavedState::pos(0, i).values(vals.clone()));
                vals.push(convert(convs.get(i).copied().flatten(), v));
            }
            let elem = expr.ty.element_type().clone();
            Ok(ExprValue::Array(ArrayRef::new(ArrayData::from_values(elem, vals))))
        }
        ExprKind::Unary { operand, compute, .. } => {
            let compute = compute.unwrap_or_else(|| unresolved(expr));
            resumed(ctx);
            let v = run!(ctx, eval_expr(operand, ctx), SavedState::at(0));
            Ok(compute(&[v]))
        }
        ExprKind::Binary { lhs, rhs, compute, .. } => {
            let compute = compute.unwrap_or_else(|| unresolved(expr));
            let mut s = resumed(ctx);
            let l = match s.step {
                0 => run!(ctx, eval_expr(lhs, ctx), SavedState::at(0)),
                _ => s.take(0),
            };
            let r = run!(ctx, eval_expr(rhs, ctx), SavedState::at(1).value(l.clone()));
            Ok(compute(&[l, r]))
        }
        ExprKind::Logical { op, lhs, rhs } => {
            let s = resumed(ctx);
            if s.step == 0 {
                let l = run!(ctx, eval_expr(lhs, ctx), SavedState::at(0));
                match (op, l.is_null()) {
                    (LogicalOp::And, true) => return Ok(ExprValue::bool(false)),
                    (LogicalOp::Or, false) => return Ok(ExprValue::bool(true)),
                    _ => {}
                }
            }
            let r = run!(ctx, eval_expr(rhs, ctx), SavedState::at(1));
            Ok(ExprValue::bool(!r.is_null()))
        }
        ExprKind::Conditional { cond, then, otherwise, convs } => {
            let s = resumed(ctx);
            let branch = match s.step {
                0 => {
                    let c = run!(ctx, eval_expr(cond, ctx), SavedState::at(0));
                    if c.is_null() {
                        2
                    } else {
                        1
                    }
                }
                step => step,
            };
            let (e, conv) = if branch == 1 { (then, convs[0]) } else { (otherwise, convs[1]) };
            let v = run!(ctx, eval_expr(e, ctx), SavedState::at(branch));
            Ok(convert(conv, v))
        }
        ExprKind::Assign { op, target, value, compute, assign } => {
            let assign = assign.unwrap_or_else(|| unresolved(expr));
            let mut s = resumed(ctx);
            let v = match s.step {
                0 => run!(ctx, eval_expr(value, ctx), SavedState::at(0)),
                _ => s.take(0),
            };
            let place = run!(ctx, eval_place(target, ctx), SavedState::at(1).value(v.clone()));
            let stored = match op {
                None => assign.convert(v),
                Some(_) => {
                    let compute = compute.unwrap_or_else(|| unresolved(expr));
                    assign.convert(compute(&[place.read(), v]))
                }
            };
            place.write(stored.clone());
            Ok(stored)
        }
        ExprKind::IncDec { prefix, target, func, .. } => {
            let func = func.unwrap_or_else(|| unresolved(expr));
            resumed(ctx);
            let place = run!(ctx, eval_place(target, ctx), SavedState::at(0));
            let old = place.read();
            if *prefix {
                let new = func.apply(&old);
                place.write(new.clone());
                Ok(new)
            } else {
                ctx.st.delayed.push(DelayedOp { place, func });
                Ok(old)
            }
        }
        ExprKind::Subscript { base, index } => {
            let mut s = resumed(ctx);
            let b = match s.step {
                0 => run!(ctx, eval_expr(base, ctx), SavedState::at(0)),
                _ => s.take(0),
            };
            let i = run!(ctx, eval_expr(index, ctx), SavedState::at(1).value(b.clone()));
            Ok(IndexHandle::index_place(Place::temporary(b), i.as_integer()).read())
        }
        ExprKind::Member { base, access, .. } => {
            let access = access.unwrap_or_else(|| unresolved(expr));
            resumed(ctx);
            let b = run!(ctx, eval_expr(base, ctx), SavedState::at(0));
            Ok(member_value(&b, access))
        }
        ExprKind::Call { args, resolved, .. } | ExprKind::NewObject { args, resolved, .. } => {
            let m = resolved.as_ref().unwrap_or_else(|| unresolved(expr));
            if !m.func.pure {
                no_context(ctx)?;
            }
            let s = resumed(ctx);
            let mut vals = s.values;
            for (i, a) in args.iter().enumerate().skip(s.pos) {
                let v = run!(ctx, eval_expr(&a.value, ctx), SavedState::pos(0, i).values(vals.clone()));
                vals.push(v);
            }
            Ok(m.call(&vals))
        }
        ExprKind::NewArray { size, elem_ty, .. } => {
            no_context(ctx)?;
            resumed(ctx);
            let n = run!(ctx, eval_expr(size, ctx), SavedState::at(0)).as_integer();
            let n = usize::try_from(n).unwrap_or_else(|_| panic!("line {}: negative array size {n}", expr.line));
            Ok(ExprValue::Array(ArrayRef::new(ArrayData::new(elem_ty.clone(), n))))
        }
    }
}

/// Evaluate `expr` to somewhere that can be stored into.
pub fn eval_place(expr: &Expr, ctx: &mut ExecContext<'_>) -> Result<Place, Suspended> {
    match &expr.kind {
        ExprKind::Ident(id) => match &id.binding {
            Some(Binding::Variable { var, .. }) => {
                no_context(ctx)?;
                leaf(ctx)?;
                Ok(Place::Cell(ctx.st.frames.cell(*var).clone()))
            }
            _ => panic!("line {}: `{}` is not assignable", expr.line, id.name),
        },
        ExprKind::Subscript { base, index } => {
            let mut s = resumed(ctx);
            let owner = match s.step {
                0 => run!(ctx, eval_place(base, ctx), SavedState::at(0)),
                _ => s.take_place(),
            };
            let i = run!(ctx, eval_expr(index, ctx), SavedState::at(1).place(owner.clone()));
            Ok(Place::Index(Rc::new(IndexHandle::index_place(owner, i.as_integer()))))
        }
        ExprKind::Member { base, access, .. } => match access.unwrap_or_else(|| unresolved(expr)) {
            MemberAccess::Scope { slot } => {
                resumed(ctx);
                let b = run!(ctx, eval_expr(base, ctx), SavedState::at(0));
                Ok(Place::Cell(b.as_scope().member(slot).clone()))
            }
            MemberAccess::Component(i) => {
                resumed(ctx);
                let owner = run!(ctx, eval_place(base, ctx), SavedState::at(0));
                Ok(Place::Index(Rc::new(IndexHandle::index_place(owner, i as i32))))
            }
            other => panic!("line {}: {other:?} is not assignable", expr.line),
        },
        _ => panic!("line {}: expression is not assignable", expr.line),
    }
}

// ── Statements ────────────────────────────────────────────────────────────────

const LOOP_INIT: u8 = 0;
const LOOP_COND: u8 = 1;
const LOOP_BODY: u8 = 2;
const LOOP_STEP: u8 = 3;

/// Run `block`.  `scoped` blocks enter and leave their registry scope.
pub fn exec_block(block: &Block, ctx: &mut ExecContext<'_>, scoped: bool) -> Result<Flow, Suspended> {
    let id = block.id.unwrap_or_else(|| panic!("block was not registered"));
    let s = resumed(ctx);
    if scoped && s.step == 0 {
        ctx.registry.enter_scope(&mut ctx.st.frames, id);
    }
    for (i, stmt) in block.stmts.iter().enumerate().skip(s.pos) {
        let flow = run!(ctx, exec_stmt(stmt, ctx), SavedState::pos(1, i));
        if flow != Flow::Next {
            if scoped {
                ctx.registry.leave_scope(&mut ctx.st.frames, id);
            }
            return Ok(flow);
        }
    }
    if scoped {
        ctx.registry.leave_scope(&mut ctx.st.frames, id);
    }
    Ok(Flow::Next)
}

fn exec_decl(decl: &Decl, ctx: &mut ExecContext<'_>) -> Result<Flow, Suspended> {
    let s = resumed(ctx);
    for (i, d) in decl.vars.iter().enumerate().skip(s.pos) {
        let var = d.var.unwrap_or_else(|| panic!("line {}: `{}` was not registered", d.line, d.name));
        let v = match &d.init {
            Some(init) => {
                let v = run!(ctx, eval_full(init, ctx), SavedState::pos(0, i));
                d.assign.unwrap_or_else(|| panic!("line {}: unresolved initialiser", d.line)).convert(v)
            }
            None => ExprValue::prototype(&decl.ty),
        };
        ctx.st.frames.cell(var).set(v);
    }
    Ok(Flow::Next)
}

/// Loop body outcome: `Some` ends the loop with that flow.
fn loop_exit(flow: Flow) -> Option<Flow> {
    match flow {
        Flow::Next => None,
        Flow::Break => Some(Flow::Next),
        ret @ Flow::Return(_) => Some(ret),
    }
}

/// Execute one statement.
pub fn exec_stmt(stmt: &Stmt, ctx: &mut ExecContext<'_>) -> Result<Flow, Suspended> {
    match &stmt.kind {
        StmtKind::Empty => Ok(Flow::Next),
        StmtKind::Break => Ok(Flow::Break),
        StmtKind::Block(b) => exec_block(b, ctx, true),
        StmtKind::Decl(d) => exec_decl(d, ctx),
        StmtKind::Expr(e) => {
            resumed(ctx);
            run!(ctx, eval_full(e, ctx), SavedState::at(0));
            Ok(Flow::Next)
        }
        StmtKind::Return(e) => match e {
            None => Ok(Flow::Return(None)),
            Some(e) => {
                resumed(ctx);
                let v = run!(ctx, eval_full(e, ctx), SavedState::at(0));
                Ok(Flow::Return(Some(v)))
            }
        },
        StmtKind::If { cond, then, otherwise } => {
            let s = resumed(ctx);
            let branch = match s.step {
                0 => {
                    let c = run!(ctx, eval_full(cond, ctx), SavedState::at(0));
                    if c.is_null() {
                        2
                    } else {
                        1
                    }
                }
                step => step,
            };
            match (branch, otherwise) {
                (1, _) => Ok(run!(ctx, exec_stmt(then, ctx), SavedState::at(1))),
                (_, Some(o)) => Ok(run!(ctx, exec_stmt(o, ctx), SavedState::at(2))),
                (_, None) => Ok(Flow::Next),
            }
        }
        StmtKind::While { cond, body } => {
            let mut step = resumed(ctx).step;
            loop {
                if step == 0 {
                    let c = run!(ctx, eval_full(cond, ctx), SavedState::at(0));
                    if c.is_null() {
                        return Ok(Flow::Next);
                    }
                }
                step = 0;
                let flow = run!(ctx, exec_stmt(body, ctx), SavedState::at(1));
                if let Some(out) = loop_exit(flow) {
                    return Ok(out);
                }
            }
        }
        StmtKind::DoWhile { body, cond } => {
            let mut step = resumed(ctx).step;
            loop {
                if step == 0 {
                    let flow = run!(ctx, exec_stmt(body, ctx), SavedState::at(0));
                    if let Some(out) = loop_exit(flow) {
                        return Ok(out);
                    }
                }
                step = 0;
                let c = run!(ctx, eval_full(cond, ctx), SavedState::at(1));
                if c.is_null() {
                    return Ok(Flow::Next);
                }
            }
        }
        StmtKind::For { init, cond, step: incr, body } => {
            let mut step = resumed(ctx).step;
            if step == LOOP_INIT {
                if let Some(e) = init {
                    run!(ctx, eval_full(e, ctx), SavedState::at(LOOP_INIT));
                }
                step = LOOP_COND;
            }
            loop {
                if step == LOOP_COND {
                    if let Some(c) = cond {
                        let v = run!(ctx, eval_full(c, ctx), SavedState::at(LOOP_COND));
                        if v.is_null() {
                            return Ok(Flow::Next);
                        }
                    }
                    step = LOOP_BODY;
                }
                if step == LOOP_BODY {
                    let flow = run!(ctx, exec_stmt(body, ctx), SavedState::at(LOOP_BODY));
                    if let Some(out) = loop_exit(flow) {
                        return Ok(out);
                    }
                }
                if let Some(e) = incr {
                    run!(ctx, eval_full(e, ctx), SavedState::at(LOOP_STEP));
                }
                step = LOOP_COND;
            }
        }
    }
}

/// Evaluate `expr` with no thread behind it.  Returns `None` when the
/// expression needs per-thread state.
pub fn try_ieval(expr: &Expr, registry: &dyn ScopeRegistry) -> Option<ExprValue> {
    if let ExprKind::Literal(v) = &expr.kind {
        return Some(v.clone());
    }
    let mut st = ThreadState::detached();
    let mut ctx = ExecContext { registry, st: &mut st };
    let v = eval_expr(expr, &mut ctx).ok()?;
    st.delayed.is_empty().then_some(v)
}

// ── Script threads ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ThreadStatus {
    Ready,
    Suspended,
    Finished(Option<ExprValue>),
}

impl ThreadStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, ThreadStatus::Finished(_))
    }
}

/// One logical thread running a type-fixed program.
pub struct ScriptThread {
    name: String,
    program: Rc<Program>,
    registry: Rc<dyn ScopeRegistry>,
    st: ThreadState,
    status: ThreadStatus,
}

impl ScriptThread {
    pub fn new(
        name: impl Into<String>,
        program: Rc<Program>,
        registry: Rc<dyn ScopeRegistry>,
        switch: SwitchPolicy,
    ) -> Self {
        let mut st = ThreadState::new(switch);
        let root = program.body.id.unwrap_or_else(|| panic!("program was not registered"));
        registry.enter_scope(&mut st.frames, root);
        Self { name: name.into(), program, registry, st, status: ThreadStatus::Ready }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &ThreadStatus {
        &self.status
    }

    /// Saved frames waiting for the next slice.
    pub fn continuation_depth(&self) -> usize {
        self.st.cont.depth()
    }

    /// Run one slice.
    pub fn exec(&mut self) -> ThreadStatus {
        if self.status.is_finished() {
            return self.status.clone();
        }
        self.st.switch.begin_slice();
        let mut ctx = ExecContext { registry: &*self.registry, st: &mut self.st };
        self.status = match exec_block(&self.program.body, &mut ctx, false) {
            Ok(Flow::Return(v)) => ThreadStatus::Finished(v),
            Ok(_) => ThreadStatus::Finished(None),
            Err(Suspended) => {
                trace!(thread = %self.name, depth = self.st.cont.depth(), "suspended");
                ThreadStatus::Suspended
            }
        };
        if self.status.is_finished() {
            debug_assert!(self.st.cont.is_empty(), "finished thread left saved frames");
        }
        self.status.clone()
    }

    /// Run slices until the thread finishes.
    pub fn run_to_end(&mut self) -> Option<ExprValue> {
        loop {
            if let ThreadStatus::Finished(v) = self.exec() {
                return v;
            }
        }
    }

    /// Storage of a variable declared at the top level.
    pub fn global_cell(&self, name: &str) -> Option<ValueCell> {
        let block = self.program.body.id?;
        let cursor = ScopeCursor { block, visible: usize::MAX };
        match self.registry.lookup_identifier(name, Some(cursor))? {
            Binding::Variable { var, .. } => Some(self.st.frames.cell(var).clone()),
            _ => None,
        }
    }

    pub fn global(&self, name: &str) -> Option<ExprValue> {
        self.global_cell(name).map(|c| c.get())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{compile, SimpleRegistry};

    fn thread(src: &str, switch: SwitchPolicy) -> ScriptThread {
        let mut reg = SimpleRegistry::new();
        let program = compile(src, &mut reg).unwrap();
        ScriptThread::new("test", Rc::new(program), Rc::new(reg), switch)
    }

    fn run(src: &str) -> ScriptThread {
        let mut t = thread(src, SwitchPolicy::never());
        assert!(t.exec().is_finished());
        t
    }

    #[test]
    fn straight_line_program() {
        let t = run("int a = 2; int b = a * 3 + 1; scalar c = b / 2.0;");
        assert_eq!(t.global("b"), Some(ExprValue::integer(7)));
        assert_eq!(t.global("c"), Some(ExprValue::scalar(3.5)));
    }

    #[test]
    fn loops_and_break() {
        let t = run("int s = 0; for (int i = 0; i < 10; i++) { if (i == 5) break; s += i; }");
        assert_eq!(t.global("s"), Some(ExprValue::integer(10)));
        let t = run("int n = 0; do { n++; } while (n < 3);");
        assert_eq!(t.global("n"), Some(ExprValue::integer(3)));
        let t = run("int n = 10; while (n > 0) n -= 3;");
        assert_eq!(t.global("n"), Some(ExprValue::integer(-2)));
    }

    #[test]
    fn return_value_ends_the_thread() {
        let mut t = thread("int a = 1; return a + 1; a = 5;", SwitchPolicy::never());
        assert_eq!(t.exec(), ThreadStatus::Finished(Some(ExprValue::integer(2))));
        assert_eq!(t.global("a"), Some(ExprValue::integer(1)));
    }

    #[test]
    fn short_circuit_skips_the_right_side() {
        let t = run("int n = 0; int r = 0 && (n = 1); int q = 1 || (n = 2);");
        assert_eq!(t.global("n"), Some(ExprValue::integer(0)));
        assert_eq!(t.global("r"), Some(ExprValue::integer(0)));
        assert_eq!(t.global("q"), Some(ExprValue::integer(1)));
    }

    #[test]
    fn postfix_sees_old_value_until_flush() {
        let t = run("int i = 1; int j = i++ + i;");
        assert_eq!(t.global("j"), Some(ExprValue::integer(2)));
        assert_eq!(t.global("i"), Some(ExprValue::integer(2)));
    }

    #[test]
    fn every_leaf_suspends_and_resumes() {
        let src = "int s = 0; for (int i = 0; i < 4; i++) s += i * 2;";
        let mut t = thread(src, SwitchPolicy::every_leaf());
        let mut slices = 0;
        while !t.exec().is_finished() {
            assert!(t.continuation_depth() > 0);
            slices += 1;
        }
        assert!(slices > 10);
        assert_eq!(t.continuation_depth(), 0);
        assert_eq!(t.global("s"), Some(ExprValue::integer(12)));
    }

    #[test]
    fn matrix_rows_and_cells_are_places() {
        let t = run("matrix<2,2> m; m[0][1] = 5; m[1] = <7, 8>; scalar x = m[0][1];");
        let m = t.global("m").unwrap();
        assert_eq!(m.to_string(), "[<1.0, 5.0>, <7.0, 8.0>]");
        assert_eq!(t.global("x"), Some(ExprValue::scalar(5.0)));
    }

    #[test]
    #[should_panic(expected = "matrix row index 2 out of range")]
    fn matrix_row_out_of_range_panics() {
        run("matrix<2,2> m; vector<2> r = m[2];");
    }

    #[test]
    fn try_ieval_folds_constants_only() {
        let reg = SimpleRegistry::new();
        let lit = Expr::literal(ExprValue::integer(4), 1);
        assert_eq!(try_ieval(&lit, &reg), Some(ExprValue::integer(4)));
        let mut program = crate::script::parser::parse_program("int a; a + 1;").unwrap();
        let mut reg = SimpleRegistry::new();
        let mut diags = Vec::new();
        crate::script::registry::register_all(&mut reg, &mut program, &mut diags);
        crate::script::fixup::do_expr_tf(&mut program, &mut reg, &mut diags);
        match &program.body.stmts[1].kind {
            StmtKind::Expr(e) => assert_eq!(try_ieval(e, &reg), None),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn switch_policy_slices() {
        let mut p = SwitchPolicy::slice(2);
        p.begin_slice();
        assert!(!p.should_switch());
        assert!(!p.should_switch());
        assert!(p.should_switch());
        p.begin_slice();
        assert!(!p.should_switch());
        assert!(!SwitchPolicy::never().should_switch());
    }

    #[test]
    fn stress_hook_is_deterministic_per_seed() {
        let draw = |seed| {
            let mut p = SwitchPolicy::never().with_stress(0.5, seed);
            (0..64).map(|_| p.should_switch()).collect::<Vec<_>>()
        };
        assert_eq!(draw(7), draw(7));
        assert!(draw(7).iter().any(|b| *b));
    }
}
