//! Scope registry: identifier resolution, storage layout and object
//! construction.
//!
//! The type-fixup pass and the execution engine only talk to the
//! [`ScopeRegistry`] trait.  [`SimpleRegistry`] is the reference
//! implementation: block-scoped automatic variables, `object` types with
//! member variables, named constants and overloaded native functions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::ast::{Block, Program, Stmt, StmtKind};
use super::builtins;
use super::exec::Frames;
use super::types::{assignment_func, can_assign_type, AssignKind, AssignmentFunc, ExprValueType, ScopeHandle};
use super::value::{ExprValue, ScopeInstance, ScopeRef, ValueCell};
use crate::error::Diagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Position in the scope tree: inside `block`, after its first `visible`
/// variables have been declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeCursor {
    pub block: BlockId,
    pub visible: usize,
}

/// Storage slot of an automatic variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarRef {
    pub block: BlockId,
    pub index: usize,
}

/// What an identifier denotes.
#[derive(Debug, Clone)]
pub enum Binding {
    Variable { var: VarRef, ty: ExprValueType },
    Constant(ExprValue),
    /// Placeholder for a function name; the enclosing call resolves the
    /// overload once its argument types are known.
    Function(String),
}

/// Argument as seen by overload resolution.
#[derive(Debug, Clone)]
pub struct CallArg {
    pub name: Option<String>,
    pub ty: ExprValueType,
}

pub type NativeBody = Rc<dyn Fn(&[ExprValue]) -> ExprValue>;

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// `None` accepts any type unchanged.
    pub ty: Option<ExprValueType>,
    pub default: Option<ExprValue>,
}

impl Param {
    pub fn new(name: &str, ty: ExprValueType) -> Self {
        Self { name: name.to_owned(), ty: Some(ty), default: None }
    }

    pub fn any(name: &str) -> Self {
        Self { name: name.to_owned(), ty: None, default: None }
    }
}

/// A host function callable from scripts.
pub struct NativeFn {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: ExprValueType,
    /// Pure functions may be folded at type-fixup time.
    pub pure: bool,
    body: NativeBody,
}

impl NativeFn {
    pub fn new(
        name: &str,
        params: Vec<Param>,
        ret: ExprValueType,
        body: impl Fn(&[ExprValue]) -> ExprValue + 'static,
    ) -> Self {
        Self { name: name.to_owned(), params, ret, pure: true, body: Rc::new(body) }
    }

    pub fn impure(mut self) -> Self {
        self.pure = false;
        self
    }

    pub fn call(&self, args: &[ExprValue]) -> ExprValue {
        (self.body)(args)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| match &p.ty {
                Some(t) => format!("{}: {t}", p.name),
                None => p.name.clone(),
            })
            .collect();
        write!(f, "{}({}) -> {}", self.name, params.join(", "), self.ret)
    }
}

/// Where each parameter's value comes from.
#[derive(Debug, Clone)]
pub enum ArgSlot {
    Arg { index: usize, conv: AssignmentFunc },
    Default(ExprValue),
}

/// A resolved call: the target, its return type and how the source-order
/// arguments map onto parameters.
#[derive(Debug, Clone)]
pub struct FunctionMatch {
    pub func: Rc<NativeFn>,
    pub ret: ExprValueType,
    pub slots: Vec<ArgSlot>,
}

impl FunctionMatch {
    /// Call with arguments in source order.
    pub fn call(&self, args: &[ExprValue]) -> ExprValue {
        let bound: Vec<ExprValue> = self
            .slots
            .iter()
            .map(|slot| match slot {
                ArgSlot::Arg { index, conv } => conv.convert(args[*index].clone()),
                ArgSlot::Default(v) => v.clone(),
            })
            .collect();
        self.func.call(&bound)
    }
}

#[derive(Debug, Clone)]
pub struct MemberMatch {
    pub slot: usize,
    pub ty: ExprValueType,
}

/// Registration runs once per pass, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPass {
    Objects,
    MemberVars,
    AutoVars,
    Identifiers,
}

impl RegistrationPass {
    pub const ALL: [RegistrationPass; 4] = [
        RegistrationPass::Objects,
        RegistrationPass::MemberVars,
        RegistrationPass::AutoVars,
        RegistrationPass::Identifiers,
    ];
}

/// Capabilities the core needs from its scope collaborator.
pub trait ScopeRegistry {
    fn register(&mut self, program: &mut Program, pass: RegistrationPass, diags: &mut Vec<Diagnostic>);

    fn lookup_identifier(&self, name: &str, scope: Option<ScopeCursor>) -> Option<Binding>;

    /// A close match for an unknown identifier.
    fn suggest_identifier(&self, name: &str, scope: Option<ScopeCursor>) -> Option<String>;

    fn lookup_function(&self, name: &str, args: &[CallArg]) -> Result<FunctionMatch, String>;

    fn lookup_constructor(&self, name: &str, args: &[CallArg]) -> Result<FunctionMatch, String>;

    fn lookup_member(&self, scope: &ScopeHandle, name: &str) -> Option<MemberMatch>;

    fn lookup_scope_type(&self, name: &str) -> Option<ExprValueType>;

    fn variable_type(&self, var: VarRef) -> ExprValueType;

    fn set_variable_type(&mut self, var: VarRef, ty: ExprValueType);

    fn set_member_type(&mut self, scope: &ScopeHandle, member: &str, ty: ExprValueType);

    fn return_type(&self, func: &NativeFn) -> ExprValueType {
        func.ret.clone()
    }

    /// Push storage for `block`'s variables.
    fn enter_scope(&self, frames: &mut Frames, block: BlockId);

    fn leave_scope(&self, frames: &mut Frames, block: BlockId);
}

/// Register `program` with every pass in order.
pub fn register_all(registry: &mut dyn ScopeRegistry, program: &mut Program, diags: &mut Vec<Diagnostic>) {
    for pass in RegistrationPass::ALL {
        registry.register(program, pass, diags);
    }
}

// ── Edit distance ─────────────────────────────────────────────────────────────

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut cur = vec![i; b.len() + 1];
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        prev = cur;
    }
    prev[b.len()]
}

/// Closest candidate within edit distance 2.
pub fn suggest_closest<'a>(typo: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    candidates
        .into_iter()
        .filter_map(|c| {
            let d = levenshtein(typo, c);
            (d > 0 && d <= 2).then_some((d, c))
        })
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.to_owned())
}

// ── SimpleRegistry ────────────────────────────────────────────────────────────

/// Shared sink for `print`.
pub type Output = Rc<RefCell<Vec<String>>>;

#[derive(Debug)]
struct VarInfo {
    name: String,
    ty: ExprValueType,
}

#[derive(Debug)]
struct BlockInfo {
    parent: Option<ScopeCursor>,
    vars: Vec<VarInfo>,
}

#[derive(Debug)]
struct ObjectInfo {
    handle: ScopeHandle,
    members: Vec<(String, ExprValueType)>,
}

pub struct SimpleRegistry {
    blocks: Vec<BlockInfo>,
    objects: Vec<ObjectInfo>,
    constants: HashMap<String, ExprValue>,
    functions: HashMap<String, Vec<Rc<NativeFn>>>,
    output: Output,
}

impl Default for SimpleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleRegistry {
    /// A registry with the standard constants and native functions.
    pub fn new() -> Self {
        let mut reg = Self::empty();
        builtins::install(&mut reg);
        reg
    }

    /// A registry with nothing defined.
    pub fn empty() -> Self {
        Self {
            blocks: Vec::new(),
            objects: Vec::new(),
            constants: HashMap::new(),
            functions: HashMap::new(),
            output: Output::default(),
        }
    }

    /// A standard registry whose `print` writes into `output`.
    pub fn with_output(output: Output) -> Self {
        let mut reg = Self { output, ..Self::empty() };
        builtins::install(&mut reg);
        reg
    }

    pub fn output(&self) -> Output {
        Rc::clone(&self.output)
    }

    /// Drain everything printed so far.
    pub fn take_output(&self) -> Vec<String> {
        std::mem::take(&mut *self.output.borrow_mut())
    }

    pub fn define_constant(&mut self, name: &str, value: ExprValue) {
        self.constants.insert(name.to_owned(), value);
    }

    /// Add a function; repeated names become overloads.
    pub fn define_function(&mut self, f: NativeFn) {
        self.functions.entry(f.name.clone()).or_default().push(Rc::new(f));
    }

    fn object_by_handle(&self, h: &ScopeHandle) -> Option<&ObjectInfo> {
        self.objects.iter().find(|o| o.handle == *h)
    }

    // ── Registration passes ──────────────────────────────────────────────────

    fn register_objects(&mut self, program: &mut Program, diags: &mut Vec<Diagnostic>) {
        for obj in &mut program.objects {
            if self.objects.iter().any(|o| o.handle.name() == obj.name) {
                diags.push(Diagnostic::new(obj.line, format!("object `{}` is already defined", obj.name)));
                continue;
            }
            let handle = ScopeHandle::new(self.objects.len() as u32 + 1, obj.name.as_str());
            obj.handle = Some(handle.clone());
            self.objects.push(ObjectInfo { handle, members: Vec::new() });
        }
    }

    fn register_members(&mut self, program: &mut Program, diags: &mut Vec<Diagnostic>) {
        for obj in &program.objects {
            let Some(handle) = &obj.handle else { continue };
            let Some(info) = self.objects.iter_mut().find(|o| o.handle == *handle) else { continue };
            for member in &obj.members {
                for name in &member.names {
                    if info.members.iter().any(|(n, _)| n == name) {
                        diags.push(Diagnostic::new(
                            member.line,
                            format!("duplicate member `{name}` in object `{}`", obj.name),
                        ));
                        continue;
                    }
                    info.members.push((name.clone(), ExprValueType::unknown()));
                }
            }
        }
    }

    fn declare_block(&mut self, block: &mut Block, parent: Option<ScopeCursor>, diags: &mut Vec<Diagnostic>) {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockInfo { parent, vars: Vec::new() });
        block.id = Some(id);
        for stmt in &mut block.stmts {
            self.declare_stmt(stmt, id, diags);
        }
    }

    fn declare_stmt(&mut self, stmt: &mut Stmt, block: BlockId, diags: &mut Vec<Diagnostic>) {
        match &mut stmt.kind {
            StmtKind::Decl(decl) => {
                for d in &mut decl.vars {
                    let vars = &mut self.blocks[block.index()].vars;
                    if vars.iter().any(|v| v.name == d.name) {
                        diags.push(Diagnostic::new(d.line, format!("redeclaration of `{}`", d.name)));
                        continue;
                    }
                    d.var = Some(VarRef { block, index: vars.len() });
                    vars.push(VarInfo { name: d.name.clone(), ty: ExprValueType::unknown() });
                }
            }
            StmtKind::Block(b) => {
                let visible = self.blocks[block.index()].vars.len();
                self.declare_block(b, Some(ScopeCursor { block, visible }), diags);
            }
            StmtKind::If { then, otherwise, .. } => {
                self.declare_stmt(then, block, diags);
                if let Some(o) = otherwise {
                    self.declare_stmt(o, block, diags);
                }
            }
            StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } | StmtKind::For { body, .. } => {
                self.declare_stmt(body, block, diags)
            }
            StmtKind::Empty | StmtKind::Expr(_) | StmtKind::Return(_) | StmtKind::Break => {}
        }
    }

    fn bind_block(block: &mut Block) {
        let Some(id) = block.id else { return };
        let mut visible = 0;
        for stmt in &mut block.stmts {
            Self::bind_stmt(stmt, id, &mut visible);
        }
    }

    fn bind_stmt(stmt: &mut Stmt, block: BlockId, visible: &mut usize) {
        let at = |e: &mut super::ast::Expr, visible: usize| {
            let cursor = ScopeCursor { block, visible };
            e.walk_mut(&mut |x| {
                if let super::ast::ExprKind::Ident(id) = &mut x.kind {
                    id.scope = Some(cursor);
                }
            });
        };
        match &mut stmt.kind {
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) => at(e, *visible),
            StmtKind::Decl(decl) => {
                decl.spec.exprs_mut(&mut |e| at(e, *visible));
                for d in &mut decl.vars {
                    if let Some(init) = &mut d.init {
                        at(init, *visible);
                    }
                    if let Some(var) = d.var {
                        *visible = var.index + 1;
                    }
                }
            }
            StmtKind::Block(b) => Self::bind_block(b),
            StmtKind::If { cond, then, otherwise } => {
                at(cond, *visible);
                Self::bind_stmt(then, block, visible);
                if let Some(o) = otherwise {
                    Self::bind_stmt(o, block, visible);
                }
            }
            StmtKind::While { cond, body } | StmtKind::DoWhile { body, cond } => {
                at(cond, *visible);
                Self::bind_stmt(body, block, visible);
            }
            StmtKind::For { init, cond, step, body } => {
                for e in [init, cond, step].into_iter().flatten() {
                    at(e, *visible);
                }
                Self::bind_stmt(body, block, visible);
            }
            StmtKind::Empty | StmtKind::Return(None) | StmtKind::Break => {}
        }
    }

    fn bind_objects(program: &mut Program, root: BlockId) {
        for obj in &mut program.objects {
            for member in &mut obj.members {
                member.spec.exprs_mut(&mut |e| {
                    e.walk_mut(&mut |x| {
                        if let super::ast::ExprKind::Ident(id) = &mut x.kind {
                            id.scope = Some(ScopeCursor { block: root, visible: 0 });
                        }
                    })
                });
            }
        }
    }

    fn visible_names(&self, scope: Option<ScopeCursor>) -> Vec<&str> {
        let mut names = Vec::new();
        let mut cur = scope;
        while let Some(c) = cur {
            let Some(b) = self.blocks.get(c.block.index()) else { break };
            names.extend(b.vars.iter().take(c.visible).map(|v| v.name.as_str()));
            cur = b.parent;
        }
        names.extend(self.constants.keys().map(String::as_str));
        names.extend(self.functions.keys().map(String::as_str));
        names
    }

    fn bind_args(name: &str, params: &[Param], args: &[CallArg]) -> Result<(Vec<ArgSlot>, bool), String> {
        let mut slots: Vec<Option<ArgSlot>> = vec![None; params.len()];
        let mut exact = true;
        for (i, arg) in args.iter().enumerate() {
            let p = match &arg.name {
                None if i < params.len() => i,
                None => return Err(format!("too many arguments to `{name}`: expected {}", params.len())),
                Some(n) => params
                    .iter()
                    .position(|p| p.name == *n)
                    .ok_or_else(|| format!("`{name}` has no parameter named `{n}`"))?,
            };
            if slots[p].is_some() {
                return Err(format!("parameter `{}` of `{name}` is given twice", params[p].name));
            }
            let conv = match &params[p].ty {
                None => AssignmentFunc::Copy,
                Some(ty) => {
                    if can_assign_type(ty, &arg.ty) == AssignKind::Widen {
                        exact = false;
                    }
                    assignment_func(ty, &arg.ty).ok_or_else(|| {
                        format!("argument `{}` of `{name}` expects {ty}, found {}", params[p].name, arg.ty)
                    })?
                }
            };
            slots[p] = Some(ArgSlot::Arg { index: i, conv });
        }
        let slots = slots
            .into_iter()
            .zip(params)
            .map(|(slot, p)| match (slot, &p.default) {
                (Some(s), _) => Ok(s),
                (None, Some(d)) => Ok(ArgSlot::Default(d.clone())),
                (None, None) => Err(format!("missing argument `{}` in call to `{name}`", p.name)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((slots, exact))
    }
}

fn describe_args(args: &[CallArg]) -> String {
    args.iter()
        .map(|a| match &a.name {
            Some(n) => format!("{n}: {}", a.ty),
            None => a.ty.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl ScopeRegistry for SimpleRegistry {
    fn register(&mut self, program: &mut Program, pass: RegistrationPass, diags: &mut Vec<Diagnostic>) {
        match pass {
            RegistrationPass::Objects => self.register_objects(program, diags),
            RegistrationPass::MemberVars => self.register_members(program, diags),
            RegistrationPass::AutoVars => self.declare_block(&mut program.body, None, diags),
            RegistrationPass::Identifiers => {
                Self::bind_block(&mut program.body);
                if let Some(root) = program.body.id {
                    Self::bind_objects(program, root);
                }
            }
        }
        debug!(?pass, blocks = self.blocks.len(), objects = self.objects.len(), "registration pass done");
    }

    fn lookup_identifier(&self, name: &str, scope: Option<ScopeCursor>) -> Option<Binding> {
        let mut cur = scope;
        while let Some(c) = cur {
            let b = self.blocks.get(c.block.index())?;
            let visible = c.visible.min(b.vars.len());
            if let Some(index) = b.vars[..visible].iter().rposition(|v| v.name == name) {
                return Some(Binding::Variable {
                    var: VarRef { block: c.block, index },
                    ty: b.vars[index].ty.clone(),
                });
            }
            cur = b.parent;
        }
        if let Some(v) = self.constants.get(name) {
            return Some(Binding::Constant(v.clone()));
        }
        self.functions.contains_key(name).then(|| Binding::Function(name.to_owned()))
    }

    fn suggest_identifier(&self, name: &str, scope: Option<ScopeCursor>) -> Option<String> {
        suggest_closest(name, self.visible_names(scope))
    }

    fn lookup_function(&self, name: &str, args: &[CallArg]) -> Result<FunctionMatch, String> {
        let candidates = self.functions.get(name).ok_or_else(|| format!("unknown function `{name}`"))?;
        let mut exact = Vec::new();
        let mut widened = Vec::new();
        let mut last_err = String::new();
        for f in candidates {
            match Self::bind_args(name, &f.params, args) {
                Ok((slots, true)) => exact.push((f, slots)),
                Ok((slots, false)) => widened.push((f, slots)),
                Err(e) => last_err = e,
            }
        }
        let pick = if exact.is_empty() { widened } else { exact };
        match pick.len() {
            1 => {
                let (f, slots) = pick.into_iter().next().ok_or_else(String::new)?;
                Ok(FunctionMatch { func: Rc::clone(f), ret: self.return_type(f), slots })
            }
            0 if candidates.len() == 1 => Err(last_err),
            0 => Err(format!("no overload of `{name}` accepts ({})", describe_args(args))),
            _ => Err(format!("ambiguous call to `{name}` with ({})", describe_args(args))),
        }
    }

    fn lookup_constructor(&self, name: &str, args: &[CallArg]) -> Result<FunctionMatch, String> {
        let info = self
            .objects
            .iter()
            .find(|o| o.handle.name() == name)
            .ok_or_else(|| format!("unknown object type `{name}`"))?;
        let params: Vec<Param> = info
            .members
            .iter()
            .map(|(n, ty)| {
                // A member whose type failed to resolve has no prototype.
                let complete = !ty.is_unknown() && !ty.is_incomplete();
                let default = complete.then(|| ExprValue::prototype(ty));
                Param { name: n.clone(), ty: Some(ty.clone()), default }
            })
            .collect();
        let (slots, _) = Self::bind_args(name, &params, args)?;
        let ty = ExprValueType::scope(info.handle.clone());
        let handle = info.handle.clone();
        let ctor = NativeFn::new(name, params, ty.clone(), move |vals| {
            let members = vals.iter().cloned().map(ValueCell::new).collect();
            ExprValue::Scope(ScopeRef::new(ScopeInstance { handle: handle.clone(), members }))
        })
        .impure();
        Ok(FunctionMatch { func: Rc::new(ctor), ret: ty, slots })
    }

    fn lookup_member(&self, scope: &ScopeHandle, name: &str) -> Option<MemberMatch> {
        let info = self.object_by_handle(scope)?;
        let slot = info.members.iter().position(|(n, _)| n == name)?;
        Some(MemberMatch { slot, ty: info.members[slot].1.clone() })
    }

    fn lookup_scope_type(&self, name: &str) -> Option<ExprValueType> {
        self.objects
            .iter()
            .find(|o| o.handle.name() == name)
            .map(|o| ExprValueType::scope(o.handle.clone()))
    }

    fn variable_type(&self, var: VarRef) -> ExprValueType {
        self.blocks[var.block.index()].vars[var.index].ty.clone()
    }

    fn set_variable_type(&mut self, var: VarRef, ty: ExprValueType) {
        self.blocks[var.block.index()].vars[var.index].ty = ty;
    }

    fn set_member_type(&mut self, scope: &ScopeHandle, member: &str, ty: ExprValueType) {
        if let Some(info) = self.objects.iter_mut().find(|o| o.handle == *scope) {
            if let Some(slot) = info.members.iter_mut().find(|(n, _)| n == member) {
                slot.1 = ty;
            }
        }
    }

    fn enter_scope(&self, frames: &mut Frames, block: BlockId) {
        let cells = self.blocks[block.index()]
            .vars
            .iter()
            .map(|v| ValueCell::new(ExprValue::prototype(&v.ty)))
            .collect();
        frames.push(block, cells);
    }

    fn leave_scope(&self, frames: &mut Frames, block: BlockId) {
        frames.pop(block);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::ExprKind;
    use crate::script::parser::parse_program;
    use crate::script::types::PodType;

    fn registered(src: &str) -> (SimpleRegistry, Program, Vec<Diagnostic>) {
        let mut reg = SimpleRegistry::new();
        let mut program = parse_program(src).unwrap();
        let mut diags = Vec::new();
        register_all(&mut reg, &mut program, &mut diags);
        (reg, program, diags)
    }

    fn arg(ty: ExprValueType) -> CallArg {
        CallArg { name: None, ty }
    }

    fn first_ident_scope(stmt: &mut Stmt) -> Option<ScopeCursor> {
        let mut found = None;
        if let StmtKind::Expr(e) = &mut stmt.kind {
            e.walk_mut(&mut |x| {
                if let ExprKind::Ident(id) = &x.kind {
                    found = found.or(id.scope);
                }
            });
        }
        found
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(suggest_closest("sqr", ["sqrt", "cos"]), Some("sqrt".into()));
        assert_eq!(suggest_closest("xyzzy", ["sqrt"]), None);
    }

    #[test]
    fn block_scoping_and_shadowing() {
        let (reg, mut program, diags) = registered("int a; { x; scalar a; a; } a;");
        assert!(diags.is_empty());
        let inner = match &mut program.body.stmts[1].kind {
            StmtKind::Block(b) => b,
            other => panic!("unexpected {other:?}"),
        };
        let before = first_ident_scope(&mut inner.stmts[0]);
        let after = first_ident_scope(&mut inner.stmts[2]);
        // `x` is not declared anywhere.
        assert!(reg.lookup_identifier("x", before).is_none());
        match reg.lookup_identifier("a", after) {
            Some(Binding::Variable { var, .. }) => assert_eq!(var.block, inner.id.unwrap()),
            other => panic!("unexpected {other:?}"),
        }
        match reg.lookup_identifier("a", before) {
            Some(Binding::Variable { var, .. }) => assert_eq!(var.block, program.body.id.unwrap()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn use_before_declaration_is_not_visible() {
        let (reg, mut program, _) = registered("y; int y;");
        let scope = first_ident_scope(&mut program.body.stmts[0]);
        assert!(reg.lookup_identifier("y", scope).is_none());
        assert_eq!(reg.suggest_identifier("pj", scope), Some("pi".into()));
    }

    #[test]
    fn redeclaration_is_reported() {
        let (_, _, diags) = registered("int a; scalar a;");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("redeclaration of `a`"));
    }

    #[test]
    fn overloads_prefer_exact() {
        let reg = SimpleRegistry::new();
        let m = reg.lookup_function("abs", &[arg(ExprValueType::integer())]).unwrap();
        assert_eq!(m.ret, ExprValueType::integer());
        let m = reg.lookup_function("sqrt", &[arg(ExprValueType::integer())]).unwrap();
        assert_eq!(m.ret, ExprValueType::scalar());
        assert!(matches!(m.slots[0], ArgSlot::Arg { conv: AssignmentFunc::IntegerToScalar, .. }));
        assert_eq!(m.call(&[ExprValue::integer(9)]), ExprValue::scalar(3.0));
    }

    #[test]
    fn ambiguous_overloads_are_rejected() {
        let mut reg = SimpleRegistry::empty();
        let (s, i) = (ExprValueType::scalar, ExprValueType::integer);
        reg.define_function(NativeFn::new("f", vec![Param::new("a", s()), Param::new("b", i())], s(), |_| {
            ExprValue::scalar(0.0)
        }));
        reg.define_function(NativeFn::new("f", vec![Param::new("a", i()), Param::new("b", s())], s(), |_| {
            ExprValue::scalar(1.0)
        }));
        let err = reg
            .lookup_function("f", &[arg(ExprValueType::integer()), arg(ExprValueType::integer())])
            .unwrap_err();
        assert!(err.contains("ambiguous"));
    }

    #[test]
    fn named_arguments_bind_by_name() {
        let reg = SimpleRegistry::new();
        let args = [
            CallArg { name: Some("x".into()), ty: ExprValueType::scalar() },
            CallArg { name: Some("y".into()), ty: ExprValueType::scalar() },
        ];
        let m = reg.lookup_function("atan2", &args).unwrap();
        // atan2(y, x): the call site's order is reversed.
        assert!(matches!(m.slots[0], ArgSlot::Arg { index: 1, .. }));
        let err = reg
            .lookup_function("atan2", &[CallArg { name: Some("z".into()), ty: ExprValueType::scalar() }])
            .unwrap_err();
        assert!(err.contains("no parameter named `z`"));
    }

    #[test]
    fn objects_members_and_constructors() {
        let (mut reg, _, diags) = registered("object Ball { vector<3> pos; scalar r; }");
        assert!(diags.is_empty());
        let ball = reg.lookup_scope_type("Ball").unwrap();
        let handle = ball.scope_handle().clone();
        reg.set_member_type(&handle, "pos", ExprValueType::vector(3));
        reg.set_member_type(&handle, "r", ExprValueType::scalar());
        assert_eq!(reg.lookup_member(&handle, "r").unwrap().slot, 1);
        assert!(reg.lookup_member(&handle, "q").is_none());

        let ctor = reg
            .lookup_constructor("Ball", &[CallArg { name: Some("r".into()), ty: ExprValueType::integer() }])
            .unwrap();
        let inst = ctor.call(&[ExprValue::integer(2)]);
        let scope = inst.as_scope();
        assert_eq!(scope.member(1).get(), ExprValue::scalar(2.0));
        assert_eq!(scope.member(0).get(), ExprValue::vector(vec![0.0; 3]));
    }

    #[test]
    fn unresolved_member_has_no_default() {
        let (mut reg, _, _) = registered("object A { Foo f; scalar r; }");
        let handle = reg.lookup_scope_type("A").unwrap().scope_handle().clone();
        reg.set_member_type(&handle, "r", ExprValueType::scalar());
        let err = reg.lookup_constructor("A", &[]).unwrap_err();
        assert_eq!(err, "missing argument `f` in call to `A`");
        reg.set_member_type(&handle, "f", ExprValueType::pod(PodType::Vector(None)));
        assert!(reg.lookup_constructor("A", &[]).is_err());
    }

    #[test]
    fn frames_follow_enter_and_leave() {
        let (mut reg, program, _) = registered("int a; scalar b;");
        let root = program.body.id.unwrap();
        reg.set_variable_type(VarRef { block: root, index: 0 }, ExprValueType::integer());
        reg.set_variable_type(VarRef { block: root, index: 1 }, ExprValueType::scalar());
        let mut frames = Frames::default();
        reg.enter_scope(&mut frames, root);
        assert_eq!(frames.cell(VarRef { block: root, index: 1 }).get(), ExprValue::scalar(0.0));
        reg.leave_scope(&mut frames, root);
        assert_eq!(frames.depth(), 0);
    }
}
