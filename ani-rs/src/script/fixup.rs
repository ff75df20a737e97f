//! Type fixup and constant folding.
//!
//! One recursive walk over a registered program.  Every expression node
//! gets its static type, its operator or call target, and the assignment
//! strategy it will use at run time.  Foldable subtrees are evaluated on the
//! spot and replaced by literals, and control statements whose condition
//! folded to a constant lose their dead branches.
//!
//! Errors are collected, not propagated.  A node that failed to type gets
//! `Unknown`, and operands of unknown type never produce a second error.

use tracing::debug;

use super::ast::{Arg, Block, Decl, Expr, ExprKind, MemberAccess, ObjectDecl, Program, Stmt, StmtKind, TypeSpec};
use super::exec::try_ieval;
use super::ops::lookup_op;
use super::pod::Pod;
use super::registry::{Binding, CallArg, FunctionMatch, ScopeCursor, ScopeRegistry};
use super::types::{
    assignment_func, can_assign_type, can_bool_convert, lookup_incdec, AssignKind, AssignmentFunc, ExprValueType,
    PodType, TypeKind,
};
use super::value::ExprValue;
use crate::error::Diagnostic;

/// What the walk learned about one expression.
#[derive(Debug, Clone)]
pub(crate) struct TfInfo {
    pub ty: ExprValueType,
    /// Names storage that can be written through.
    pub lvalue: bool,
    /// Const-qualified: never a valid assignment target.
    pub konst: bool,
    /// Evaluating it writes somewhere or allocates.
    pub effect: bool,
    /// Evaluating it needs no thread state.
    pub may_fold: bool,
}

impl TfInfo {
    fn unknown() -> Self {
        Self { ty: ExprValueType::unknown(), lvalue: false, konst: false, effect: false, may_fold: false }
    }

    fn rvalue(ty: ExprValueType) -> Self {
        Self { ty, lvalue: false, konst: false, effect: false, may_fold: true }
    }

    fn with_effect(mut self) -> Self {
        self.effect = true;
        self.may_fold = false;
        self
    }

    /// Combine operand flags into a fresh rvalue.
    fn derived(ty: ExprValueType, parts: &[&TfInfo]) -> Self {
        Self {
            ty,
            lvalue: false,
            konst: false,
            effect: parts.iter().any(|p| p.effect),
            may_fold: parts.iter().all(|p| p.may_fold && !p.effect),
        }
    }
}

/// Type-fix `program` in place.  Returns the number of errors added to
/// `diags`.
pub fn do_expr_tf(program: &mut Program, registry: &mut dyn ScopeRegistry, diags: &mut Vec<Diagnostic>) -> usize {
    let before = diags.len();
    let mut tf = Fixup {
        reg: registry,
        diags,
        registry_broken: before > 0,
        broken_objects: Vec::new(),
        loop_depth: 0,
        folded: 0,
        pruned: 0,
    };
    tf.fix_objects(&mut program.objects);
    tf.fix_block(&mut program.body);
    let (folded, pruned) = (tf.folded, tf.pruned);
    let errors = diags.len() - before;
    debug!(errors, folded, pruned, "type fixup done");
    errors
}

struct Fixup<'a> {
    reg: &'a mut dyn ScopeRegistry,
    diags: &'a mut Vec<Diagnostic>,
    /// Registration already failed, so missing names are expected.
    registry_broken: bool,
    /// Object types with a member whose type did not resolve.
    broken_objects: Vec<String>,
    loop_depth: u32,
    folded: usize,
    pruned: usize,
}

fn is_string_element(target: &Expr) -> bool {
    matches!(&target.kind, ExprKind::Subscript { base, .. } if base.ty == ExprValueType::string())
}

fn literal_char_count(e: &Expr) -> Option<usize> {
    match &e.kind {
        ExprKind::Literal(ExprValue::Pod(Pod::String(s))) => Some(s.chars().count()),
        _ => None,
    }
}

/// Unify two types in either widening direction.
fn unify(a: &ExprValueType, b: &ExprValueType) -> Option<ExprValueType> {
    if can_assign_type(a, b) != AssignKind::None {
        Some(a.clone())
    } else if can_assign_type(b, a) != AssignKind::None {
        Some(b.clone())
    } else {
        None
    }
}

/// The conversion a widening store needs; `None` when it is exact.
fn widening(dst: &ExprValueType, src: &ExprValueType) -> Option<AssignmentFunc> {
    match can_assign_type(dst, src) {
        AssignKind::Widen => assignment_func(dst, src),
        _ => None,
    }
}

fn literal_int(e: &Expr) -> Option<i32> {
    match &e.kind {
        ExprKind::Literal(ExprValue::Pod(Pod::Integer(n))) => Some(*n),
        _ => None,
    }
}

fn literal_is_false(e: &Expr) -> Option<bool> {
    match &e.kind {
        ExprKind::Literal(v) => Some(v.is_null()),
        _ => None,
    }
}

/// Discarded postfix results behave exactly like prefix ones.
fn postfix_to_prefix(e: &mut Expr) {
    if let ExprKind::IncDec { prefix, .. } = &mut e.kind {
        *prefix = true;
    }
}

impl Fixup<'_> {
    fn error(&mut self, line: u32, message: impl Into<String>) {
        self.diags.push(Diagnostic::new(line, message));
    }

    fn unknown_identifier(&mut self, line: u32, name: &str, scope: Option<ScopeCursor>) {
        if self.registry_broken {
            return;
        }
        let message = match self.reg.suggest_identifier(name, scope) {
            Some(s) => format!("unknown identifier `{name}`; did you mean `{s}`?"),
            None => format!("unknown identifier `{name}`"),
        };
        self.error(line, message);
    }

    fn check_bool(&mut self, info: &TfInfo, line: u32, what: &str) {
        if !info.ty.is_unknown() && !can_bool_convert(&info.ty) {
            self.error(line, format!("{what} of type {} is not a truth value", info.ty));
        }
    }

    // ── Expressions ──────────────────────────────────────────────────────────

    fn fix_expr(&mut self, e: &mut Expr) -> TfInfo {
        let info = self.fix_node(e);
        e.ty = info.ty.clone();
        if info.may_fold && !info.effect && !e.is_literal() && !info.ty.is_unknown() && !info.ty.is_void() {
            if let Some(v) = try_ieval(e, &*self.reg) {
                e.kind = ExprKind::Literal(v);
                self.folded += 1;
            }
        }
        info
    }

    fn fix_node(&mut self, e: &mut Expr) -> TfInfo {
        let line = e.line;
        match &mut e.kind {
            ExprKind::Literal(v) => TfInfo::rvalue(v.value_type()),
            ExprKind::Ident(id) => {
                let binding = self.reg.lookup_identifier(&id.name, id.scope);
                let info = match &binding {
                    Some(Binding::Variable { ty, .. }) if ty.is_unknown() => TfInfo::unknown(),
                    Some(Binding::Variable { ty, .. }) => {
                        TfInfo { ty: ty.clone(), lvalue: true, konst: false, effect: false, may_fold: false }
                    }
                    Some(Binding::Constant(v)) => TfInfo { konst: true, ..TfInfo::rvalue(v.value_type()) },
                    Some(Binding::Function(name)) => {
                        self.error(line, format!("function `{name}` used as a value"));
                        TfInfo::unknown()
                    }
                    None => {
                        self.unknown_identifier(line, &id.name, id.scope);
                        TfInfo::unknown()
                    }
                };
                id.binding = binding;
                info
            }
            ExprKind::Vector { elems } => {
                if elems.is_empty() {
                    self.error(line, "empty vector literal");
                    return TfInfo::unknown();
                }
                let infos: Vec<TfInfo> = elems.iter_mut().map(|x| self.fix_expr(x)).collect();
                for (x, info) in elems.iter().zip(&infos) {
                    if !info.ty.is_unknown() && !matches!(info.ty.as_pod(), Some(PodType::Integer | PodType::Scalar)) {
                        self.error(x.line, format!("vector element must be int or scalar, found {}", info.ty));
                        return TfInfo::unknown();
                    }
                }
                if infos.iter().any(|i| i.ty.is_unknown()) {
                    return TfInfo::unknown();
                }
                TfInfo::derived(ExprValueType::vector(elems.len()), &infos.iter().collect::<Vec<_>>())
            }
            ExprKind::Array { elems, convs } => {
                let infos: Vec<TfInfo> = elems.iter_mut().map(|x| self.fix_expr(x)).collect();
                let Some(first) = infos.first() else {
                    self.error(line, "empty array literal");
                    return TfInfo::unknown();
                };
                if infos.iter().any(|i| i.ty.is_unknown()) {
                    return TfInfo::unknown();
                }
                let mut running = first.ty.clone();
                for info in &infos[1..] {
                    match unify(&running, &info.ty) {
                        Some(t) => running = t,
                        None => {
                            self.error(line, format!("array element of type {} does not match {running}", info.ty));
                            return TfInfo::unknown();
                        }
                    }
                }
                if running.is_null_scope() {
                    self.error(line, "cannot infer the element type of an array of nulls");
                    return TfInfo::unknown();
                }
                *convs = infos.iter().map(|i| widening(&running, &i.ty)).collect();
                let effect = infos.iter().any(|i| i.effect);
                TfInfo { effect, may_fold: false, ..TfInfo::rvalue(ExprValueType::array(running)) }
            }
            ExprKind::Unary { op, operand, compute } => {
                let o = self.fix_expr(operand);
                if o.ty.is_unknown() {
                    return TfInfo::unknown();
                }
                match lookup_op(*op, &[o.ty.clone()]) {
                    Some(m) => {
                        *compute = Some(m.compute);
                        TfInfo::derived(m.result, &[&o])
                    }
                    None => {
                        self.error(line, format!("operator `{op}` cannot be applied to {}", o.ty));
                        TfInfo::unknown()
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs, compute } => {
                let l = self.fix_expr(lhs);
                let r = self.fix_expr(rhs);
                if l.ty.is_unknown() || r.ty.is_unknown() {
                    return TfInfo::unknown();
                }
                match lookup_op(*op, &[l.ty.clone(), r.ty.clone()]) {
                    Some(m) => {
                        *compute = Some(m.compute);
                        TfInfo::derived(m.result, &[&l, &r])
                    }
                    None => {
                        self.error(line, format!("operator `{op}` cannot be applied to {} and {}", l.ty, r.ty));
                        TfInfo::unknown()
                    }
                }
            }
            ExprKind::Logical { lhs, rhs, .. } => {
                let l = self.fix_expr(lhs);
                let r = self.fix_expr(rhs);
                self.check_bool(&l, line, "operand");
                self.check_bool(&r, line, "operand");
                TfInfo::derived(ExprValueType::integer(), &[&l, &r])
            }
            ExprKind::Conditional { cond, then, otherwise, convs } => {
                let c = self.fix_expr(cond);
                let t = self.fix_expr(then);
                let o = self.fix_expr(otherwise);
                self.check_bool(&c, line, "condition");
                if t.ty.is_unknown() || o.ty.is_unknown() {
                    return TfInfo::unknown();
                }
                let Some(ty) = unify(&t.ty, &o.ty) else {
                    self.error(line, format!("conditional branches have incompatible types {} and {}", t.ty, o.ty));
                    return TfInfo::unknown();
                };
                *convs = [widening(&ty, &t.ty), widening(&ty, &o.ty)];
                TfInfo::derived(ty, &[&c, &t, &o])
            }
            ExprKind::Assign { op, target, value, compute, assign } => {
                let v = self.fix_expr(value);
                let t = self.fix_expr(target);
                if !self.check_target(&t, line) || v.ty.is_unknown() {
                    return TfInfo::unknown().with_effect();
                }
                let stored = match op {
                    None => v.ty.clone(),
                    Some(op) => match lookup_op(*op, &[t.ty.clone(), v.ty.clone()]) {
                        Some(m) => {
                            *compute = Some(m.compute);
                            m.result
                        }
                        None => {
                            self.error(line, format!("operator `{op}=` cannot be applied to {} and {}", t.ty, v.ty));
                            return TfInfo::unknown().with_effect();
                        }
                    },
                };
                match assignment_func(&t.ty, &stored) {
                    Some(f) => *assign = Some(f),
                    None => {
                        self.error(line, format!("cannot assign {stored} to {}", t.ty));
                        return TfInfo::unknown().with_effect();
                    }
                }
                if op.is_none() && is_string_element(target) {
                    if let Some(n) = literal_char_count(value).filter(|n| *n != 1) {
                        self.error(line, format!("string element needs exactly one character, found {n}"));
                        return TfInfo::unknown().with_effect();
                    }
                }
                TfInfo::rvalue(t.ty).with_effect()
            }
            ExprKind::IncDec { op, target, func, .. } => {
                let t = self.fix_expr(target);
                if !self.check_target(&t, line) {
                    return TfInfo::unknown().with_effect();
                }
                match lookup_incdec(&t.ty, *op) {
                    Some(f) => *func = Some(f),
                    None => {
                        self.error(line, format!("cannot increment or decrement {}", t.ty));
                        return TfInfo::unknown().with_effect();
                    }
                }
                TfInfo::rvalue(t.ty).with_effect()
            }
            ExprKind::Subscript { base, index } => self.fix_subscript(base, index, line),
            ExprKind::Member { base, name, access } => {
                let b = self.fix_expr(base);
                if b.ty.is_unknown() {
                    return TfInfo::unknown();
                }
                match self.member_access(&b.ty, name) {
                    Ok((acc, ty)) => {
                        *access = Some(acc);
                        match acc {
                            MemberAccess::Scope { .. } => {
                                TfInfo { ty, lvalue: true, konst: false, effect: b.effect, may_fold: false }
                            }
                            MemberAccess::Component(_) => {
                                TfInfo { lvalue: b.lvalue, konst: b.konst, ..TfInfo::derived(ty, &[&b]) }
                            }
                            MemberAccess::ArraySize => TfInfo { may_fold: false, ..TfInfo::derived(ty, &[&b]) },
                            _ => TfInfo::derived(ty, &[&b]),
                        }
                    }
                    Err(msg) => {
                        self.error(line, msg);
                        TfInfo::unknown()
                    }
                }
            }
            ExprKind::Call { callee, args, resolved } => {
                let infos = self.fix_args(args);
                let ExprKind::Ident(id) = &mut callee.kind else {
                    self.error(line, "only named functions can be called");
                    return TfInfo::unknown();
                };
                let name = match self.reg.lookup_identifier(&id.name, id.scope) {
                    Some(Binding::Function(name)) => name,
                    Some(_) => {
                        self.error(line, format!("`{}` is not a function", id.name));
                        return TfInfo::unknown();
                    }
                    None => {
                        self.unknown_identifier(line, &id.name, id.scope);
                        return TfInfo::unknown();
                    }
                };
                id.binding = Some(Binding::Function(name.clone()));
                let Some(call_args) = Self::call_args(args, &infos) else { return TfInfo::unknown() };
                match self.reg.lookup_function(&name, &call_args) {
                    Ok(m) => self.resolved_call(m, &infos, resolved, false),
                    Err(msg) => {
                        self.error(line, msg);
                        TfInfo::unknown()
                    }
                }
            }
            ExprKind::NewObject { name, args, resolved } => {
                let infos = self.fix_args(args);
                let Some(call_args) = Self::call_args(args, &infos) else { return TfInfo::unknown() };
                if self.broken_objects.contains(name) {
                    return TfInfo::unknown();
                }
                match self.reg.lookup_constructor(name, &call_args) {
                    Ok(m) => self.resolved_call(m, &infos, resolved, true),
                    Err(msg) => {
                        self.error(line, msg);
                        TfInfo::unknown()
                    }
                }
            }
            ExprKind::NewArray { elem, size, elem_ty } => {
                let ty = self.resolve_type_spec(elem, line);
                let n = self.fix_expr(size);
                let Some(ty) = ty else { return TfInfo::unknown() };
                if !n.ty.is_unknown() && n.ty != ExprValueType::integer() {
                    self.error(line, format!("array size must be int, found {}", n.ty));
                    return TfInfo::unknown();
                }
                *elem_ty = ty.clone();
                TfInfo::rvalue(ExprValueType::array(ty)).with_effect()
            }
        }
    }

    /// The target of an assignment or increment must be writable.
    fn check_target(&mut self, t: &TfInfo, line: u32) -> bool {
        if t.ty.is_unknown() {
            return false;
        }
        if t.konst {
            self.error(line, "cannot assign to a constant");
            return false;
        }
        if !t.lvalue {
            self.error(line, "left side is not assignable");
            return false;
        }
        true
    }

    fn fix_args(&mut self, args: &mut [Arg]) -> Vec<TfInfo> {
        args.iter_mut().map(|a| self.fix_expr(&mut a.value)).collect()
    }

    fn call_args(args: &[Arg], infos: &[TfInfo]) -> Option<Vec<CallArg>> {
        if infos.iter().any(|i| i.ty.is_unknown()) {
            return None;
        }
        Some(args.iter().zip(infos).map(|(a, i)| CallArg { name: a.name.clone(), ty: i.ty.clone() }).collect())
    }

    fn resolved_call(
        &mut self,
        m: FunctionMatch,
        infos: &[TfInfo],
        slot: &mut Option<FunctionMatch>,
        allocates: bool,
    ) -> TfInfo {
        let pure = m.func.pure && !allocates;
        let parts: Vec<&TfInfo> = infos.iter().collect();
        let mut info = TfInfo::derived(self.reg.return_type(&m.func), &parts);
        if !pure {
            info = info.with_effect();
        }
        *slot = Some(m);
        info
    }

    fn member_access(&self, ty: &ExprValueType, name: &str) -> Result<(MemberAccess, ExprValueType), String> {
        let missing = || format!("{ty} has no member `{name}`");
        match ty.kind() {
            TypeKind::Scope(h) if h.is_null() => Err(format!("member `{name}` of null")),
            TypeKind::Scope(h) => {
                let m = self.reg.lookup_member(h, name).ok_or_else(missing)?;
                Ok((MemberAccess::Scope { slot: m.slot }, m.ty))
            }
            TypeKind::Array(_) if name == "size" => Ok((MemberAccess::ArraySize, ExprValueType::integer())),
            TypeKind::Pod(pod) => {
                let int = ExprValueType::integer;
                let access = match (pod, name) {
                    (PodType::Vector(Some(n)), "x" | "y" | "z") => {
                        let i = "xyz".find(name).unwrap_or(0);
                        if i >= *n {
                            return Err(format!("{ty} has no component `{name}`"));
                        }
                        (MemberAccess::Component(i), ExprValueType::scalar())
                    }
                    (PodType::Vector(_), "length") => (MemberAccess::Length, ExprValueType::scalar()),
                    (PodType::Vector(_), "dim") => (MemberAccess::Dim, int()),
                    (PodType::Range, "a") => (MemberAccess::Component(0), ExprValueType::scalar()),
                    (PodType::Range, "b") => (MemberAccess::Component(1), ExprValueType::scalar()),
                    (PodType::Matrix(..), "rows") => (MemberAccess::Rows, int()),
                    (PodType::Matrix(..), "cols") => (MemberAccess::Cols, int()),
                    (PodType::String, "length") => (MemberAccess::StringLength, int()),
                    _ => return Err(missing()),
                };
                Ok(access)
            }
            _ => Err(missing()),
        }
    }

    fn fix_subscript(&mut self, base: &mut Expr, index: &mut Expr, line: u32) -> TfInfo {
        let b = self.fix_expr(base);
        let i = self.fix_expr(index);
        if b.ty.is_unknown() || i.ty.is_unknown() {
            return TfInfo::unknown();
        }
        if i.ty != ExprValueType::integer() {
            self.error(line, format!("index must be int, found {}", i.ty));
            return TfInfo::unknown();
        }
        let ty = match b.ty.kind() {
            TypeKind::Array(elem) => {
                return TfInfo {
                    ty: elem.clone(),
                    lvalue: b.lvalue,
                    konst: b.konst,
                    effect: b.effect || i.effect,
                    may_fold: false,
                }
            }
            TypeKind::Pod(PodType::Vector(_) | PodType::Range) => ExprValueType::scalar(),
            TypeKind::Pod(PodType::Matrix(_, Some(c))) => ExprValueType::vector(*c),
            TypeKind::Pod(PodType::String) => ExprValueType::string(),
            _ => {
                self.error(line, format!("{} cannot be indexed", b.ty));
                return TfInfo::unknown();
            }
        };
        // A foldable base with a constant index would fold right away, so
        // catch a bad index here rather than in the evaluator.
        if let (true, Some(k)) = (b.may_fold && !b.effect, literal_int(index)) {
            if let Some(v) = try_ieval(base, &*self.reg) {
                let len = v.as_pod().component_count();
                if usize::try_from(k).map_or(true, |k| k >= len) {
                    self.error(line, format!("index {k} out of range for {}", b.ty));
                    return TfInfo::unknown();
                }
            }
        }
        TfInfo { lvalue: b.lvalue, konst: b.konst, ..TfInfo::derived(ty, &[&b, &i]) }
    }

    // ── Types ────────────────────────────────────────────────────────────────

    fn fold_dim(&mut self, e: &mut Expr) -> Option<usize> {
        let info = self.fix_expr(e);
        match literal_int(e) {
            Some(n) if n > 0 => Some(n as usize),
            _ => {
                if !info.ty.is_unknown() {
                    self.error(e.line, "incomplete type: dimension must be a positive constant int");
                }
                None
            }
        }
    }

    fn resolve_type_spec(&mut self, spec: &mut TypeSpec, line: u32) -> Option<ExprValueType> {
        Some(match spec {
            TypeSpec::Integer => ExprValueType::integer(),
            TypeSpec::Scalar => ExprValueType::scalar(),
            TypeSpec::Range => ExprValueType::range(),
            TypeSpec::String => ExprValueType::string(),
            TypeSpec::Vector(n) => ExprValueType::vector(self.fold_dim(n)?),
            TypeSpec::Matrix(r, c) => {
                let r = self.fold_dim(r);
                let c = self.fold_dim(c);
                ExprValueType::matrix(r?, c?)
            }
            TypeSpec::Named(name) => match self.reg.lookup_scope_type(name) {
                Some(t) => t,
                None => {
                    self.error(line, format!("unknown type `{name}`"));
                    return None;
                }
            },
            TypeSpec::Array(inner) => ExprValueType::array(self.resolve_type_spec(inner, line)?),
        })
    }

    fn fix_objects(&mut self, objects: &mut [ObjectDecl]) {
        for obj in objects {
            let Some(handle) = obj.handle.clone() else { continue };
            for member in &mut obj.members {
                let Some(ty) = self.resolve_type_spec(&mut member.spec, member.line) else {
                    if !self.broken_objects.contains(&obj.name) {
                        self.broken_objects.push(obj.name.clone());
                    }
                    continue;
                };
                for name in &member.names {
                    self.reg.set_member_type(&handle, name, ty.clone());
                }
            }
        }
    }

    // ── Statements ───────────────────────────────────────────────────────────

    fn fix_block(&mut self, block: &mut Block) {
        for stmt in &mut block.stmts {
            self.fix_stmt(stmt);
        }
    }

    fn fix_decl(&mut self, decl: &mut Decl, line: u32) {
        let ty = self.resolve_type_spec(&mut decl.spec, line);
        if let Some(t) = &ty {
            decl.ty = t.clone();
        }
        for d in &mut decl.vars {
            if let (Some(var), Some(t)) = (d.var, &ty) {
                self.reg.set_variable_type(var, t.clone());
            }
            let Some(init) = &mut d.init else { continue };
            let v = self.fix_expr(init);
            let Some(t) = &ty else { continue };
            if v.ty.is_unknown() {
                continue;
            }
            match assignment_func(t, &v.ty) {
                Some(f) => d.assign = Some(f),
                None => self.error(d.line, format!("cannot initialise {t} `{}` with {}", d.name, v.ty)),
            }
        }
    }

    fn fix_loop_body(&mut self, body: &mut Stmt) {
        self.loop_depth += 1;
        self.fix_stmt(body);
        self.loop_depth -= 1;
    }

    fn fix_cond(&mut self, cond: &mut Expr) {
        let c = self.fix_expr(cond);
        self.check_bool(&c, cond.line, "condition");
    }

    fn fix_stmt(&mut self, stmt: &mut Stmt) {
        let line = stmt.line;
        let replacement = match &mut stmt.kind {
            StmtKind::Empty => None,
            StmtKind::Expr(e) => {
                postfix_to_prefix(e);
                self.fix_expr(e);
                None
            }
            StmtKind::Decl(d) => {
                self.fix_decl(d, line);
                None
            }
            StmtKind::Block(b) => {
                self.fix_block(b);
                None
            }
            StmtKind::If { cond, then, otherwise } => {
                self.fix_cond(cond);
                self.fix_stmt(then);
                if let Some(o) = otherwise {
                    self.fix_stmt(o);
                }
                match literal_is_false(cond) {
                    Some(false) => Some(std::mem::replace(&mut **then, Stmt::new(StmtKind::Empty, line))),
                    Some(true) => Some(match otherwise.take() {
                        Some(o) => *o,
                        None => Stmt::new(StmtKind::Empty, line),
                    }),
                    None => None,
                }
            }
            StmtKind::While { cond, body } => {
                self.fix_cond(cond);
                self.fix_loop_body(body);
                (literal_is_false(cond) == Some(true)).then(|| Stmt::new(StmtKind::Empty, line))
            }
            StmtKind::DoWhile { body, cond } => {
                self.fix_loop_body(body);
                self.fix_cond(cond);
                None
            }
            StmtKind::For { init, cond, step, body } => {
                if let Some(e) = init {
                    self.fix_expr(e);
                }
                if let Some(c) = cond {
                    self.fix_cond(c);
                }
                if let Some(s) = step {
                    postfix_to_prefix(s);
                    self.fix_expr(s);
                }
                self.fix_loop_body(body);
                match cond.as_ref().and_then(literal_is_false) {
                    Some(true) => Some(match init.take() {
                        Some(e) => Stmt::new(StmtKind::Expr(e), line),
                        None => Stmt::new(StmtKind::Empty, line),
                    }),
                    _ => None,
                }
            }
            StmtKind::Return(e) => {
                if let Some(e) = e {
                    self.fix_expr(e);
                }
                None
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.error(line, "break outside of a loop");
                }
                None
            }
        };
        if let Some(r) = replacement {
            self.pruned += 1;
            *stmt = r;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;
    use crate::script::registry::{register_all, SimpleRegistry};

    fn fixed(src: &str) -> (Program, Vec<Diagnostic>) {
        let mut reg = SimpleRegistry::new();
        let mut program = parse_program(src).unwrap();
        let mut diags = Vec::new();
        register_all(&mut reg, &mut program, &mut diags);
        do_expr_tf(&mut program, &mut reg, &mut diags);
        (program, diags)
    }

    fn messages(src: &str) -> Vec<String> {
        fixed(src).1.into_iter().map(|d| d.message).collect()
    }

    fn expr_stmt(p: &Program, i: usize) -> &Expr {
        match &p.body.stmts[i].kind {
            StmtKind::Expr(e) => e,
            other => panic!("statement {i} is {other:?}"),
        }
    }

    fn init(p: &Program, i: usize) -> &Expr {
        match &p.body.stmts[i].kind {
            StmtKind::Decl(d) => d.vars[0].init.as_ref().unwrap(),
            other => panic!("statement {i} is {other:?}"),
        }
    }

    #[test]
    fn array_literal_widens() {
        let (p, diags) = fixed("({1, 2.5});");
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(expr_stmt(&p, 0).ty.to_string(), "scalar[]");
        match &expr_stmt(&p, 0).kind {
            ExprKind::Array { convs, .. } => {
                assert_eq!(convs, &vec![Some(AssignmentFunc::IntegerToScalar), None]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let errs = messages("({1, 2.5, <1, 0, 0>});");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("does not match"));
        assert!(messages("({null, null});")[0].contains("array of nulls"));
    }

    #[test]
    fn constants_fold() {
        let (p, diags) = fixed("int a = 2 * 3 + 1; scalar b = sqrt(16) + pi * 0; string s = \"n=\" + 4;");
        assert!(diags.is_empty(), "{diags:?}");
        assert!(matches!(&init(&p, 0).kind, ExprKind::Literal(v) if *v == ExprValue::integer(7)));
        assert!(matches!(&init(&p, 1).kind, ExprKind::Literal(v) if *v == ExprValue::scalar(4.0)));
        assert!(matches!(&init(&p, 2).kind, ExprKind::Literal(v) if *v == ExprValue::string("n=4")));
    }

    #[test]
    fn impure_and_variable_expressions_stay() {
        let (p, diags) = fixed("int a = 1; int b = a + 1; print(2);");
        assert!(diags.is_empty(), "{diags:?}");
        assert!(!init(&p, 1).is_literal());
        assert!(matches!(expr_stmt(&p, 2).kind, ExprKind::Call { .. }));
    }

    #[test]
    fn discarded_postfix_becomes_prefix() {
        let (p, diags) = fixed("int i; i++; for (i = 0; i < 3; i--) {}");
        assert!(diags.is_empty(), "{diags:?}");
        assert!(matches!(expr_stmt(&p, 1).kind, ExprKind::IncDec { prefix: true, .. }));
        match &p.body.stmts[2].kind {
            StmtKind::For { step: Some(s), .. } => assert!(matches!(s.kind, ExprKind::IncDec { prefix: true, .. })),
            other => panic!("unexpected {other:?}"),
        }
        let (p, _) = fixed("int i; int j = i++;");
        assert!(matches!(init(&p, 1).kind, ExprKind::IncDec { prefix: false, .. }));
    }

    #[test]
    fn constant_conditions_prune() {
        let (p, diags) = fixed("int a; for (a = 5; 0; ) { print(1); } while (false) a = 2; if (1) a = 3; else a = 4;");
        assert!(diags.is_empty(), "{diags:?}");
        assert!(matches!(p.body.stmts[1].kind, StmtKind::Expr(ref e) if matches!(e.kind, ExprKind::Assign { .. })));
        assert!(matches!(p.body.stmts[2].kind, StmtKind::Empty));
        match &expr_stmt(&p, 3).kind {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(&value.kind, ExprKind::Literal(v) if *v == ExprValue::integer(3)))
            }
            other => panic!("unexpected {other:?}"),
        }
        let (p, _) = fixed("int a; do { a++; } while (0);");
        assert!(matches!(p.body.stmts[1].kind, StmtKind::DoWhile { .. }));
    }

    #[test]
    fn matrix_subscripts_are_lvalues() {
        let (p, diags) = fixed("matrix<2,2> m; m[0]; m[0][1]; m[0] = <1, 2>; m[0][1] = 3;");
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(expr_stmt(&p, 1).ty, ExprValueType::vector(2));
        assert_eq!(expr_stmt(&p, 2).ty, ExprValueType::scalar());
    }

    #[test]
    fn constant_index_is_checked() {
        let errs = messages("scalar x = <1, 2, 3>[3];");
        assert_eq!(errs, vec!["index 3 out of range for vector<3>".to_string()]);
        let (p, diags) = fixed("scalar x = <1, 2, 3>[1];");
        assert!(diags.is_empty());
        assert!(matches!(&init(&p, 0).kind, ExprKind::Literal(v) if *v == ExprValue::scalar(2.0)));
    }

    #[test]
    fn unknown_identifiers_suggest() {
        let errs = messages("scalar r = pj;");
        assert_eq!(errs, vec!["unknown identifier `pj`; did you mean `pi`?".to_string()]);
        // No follow-on error for the operator applied to the unknown operand.
        assert_eq!(messages("int a = zzzzzz + 1;").len(), 1);
    }

    #[test]
    fn assignment_errors() {
        assert!(messages("int a; a += 1.5;")[0].contains("cannot assign scalar to int"));
        assert!(messages("pi = 3;")[0].contains("constant"));
        assert!(messages("1 = 2;")[0].contains("not assignable"));
        assert!(messages("sqrt;")[0].contains("used as a value"));
        assert!(messages("break;")[0].contains("break outside of a loop"));
        assert!(messages("string s = 1;")[0].contains("cannot initialise string `s` with int"));
    }

    #[test]
    fn dimensions_must_be_constant() {
        let errs = messages("int n = 3; vector<n> v;");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("incomplete type"));
        assert!(messages("vector<1 + 2> v; v.z;").is_empty());
        assert!(messages("vector<2> v; v.z;")[0].contains("no component `z`"));
    }

    #[test]
    fn objects_calls_and_members() {
        let src = "object Ball { vector<3> pos; scalar r; }\n\
                   Ball b = new Ball(r: 2);\n\
                   b.r = b.r * 2;\n\
                   b.pos.x = 1;";
        let (p, diags) = fixed(src);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(expr_stmt(&p, 1).ty, ExprValueType::scalar());
        assert!(messages("object Ball { scalar r; } Ball b; b.q;")[0].contains("has no member `q`"));
        assert!(messages("scalar x = atan2(1, 2, 3);")[0].contains("too many arguments"));
    }
}
