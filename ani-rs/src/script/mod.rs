//! The ani scripting core.
//!
//! - [`types`], [`pod`], [`value`]: the static type model and runtime values
//! - [`ops`]: the operator table
//! - [`lexer`], [`parser`], [`ast`]: source text to tree
//! - [`registry`], [`builtins`]: scopes, variables, objects and native functions
//! - [`fixup`]: static typing, constant folding and dead-branch pruning
//! - [`exec`]: the suspendable evaluator and [`ScriptThread`]
//!
//! # Quick start
//!
//! ```rust
//! use std::rc::Rc;
//! use ani::script::{compile, ScriptThread, SimpleRegistry, SwitchPolicy};
//!
//! let mut reg = SimpleRegistry::new();
//! let program = compile("int x = 6; print(x * 7);", &mut reg).unwrap();
//! let output = reg.output();
//! let mut thread = ScriptThread::new("main", Rc::new(program), Rc::new(reg), SwitchPolicy::never());
//! thread.run_to_end();
//! assert_eq!(*output.borrow(), vec!["42"]);
//! ```

pub mod ast;
pub mod builtins;
pub mod exec;
pub mod fixup;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod pod;
pub mod registry;
pub mod types;
pub mod value;

use tracing::debug;

use crate::error::{CompileError, Diagnostic};

// Re-exports for convenience.
pub use ast::Program;
pub use exec::{request_switch, ScriptThread, SwitchPolicy, ThreadStatus};
pub use fixup::do_expr_tf;
pub use registry::{ScopeRegistry, SimpleRegistry};
pub use types::ExprValueType;
pub use value::ExprValue;

/// Parse, register and type-fix `src`.
pub fn compile(src: &str, registry: &mut dyn ScopeRegistry) -> Result<Program, CompileError> {
    let mut program = parser::parse_program(src)?;
    let mut diags: Vec<Diagnostic> = Vec::new();
    registry::register_all(registry, &mut program, &mut diags);
    do_expr_tf(&mut program, registry, &mut diags);
    if !diags.is_empty() {
        return Err(CompileError::Diagnostics(diags));
    }
    debug!(statements = program.body.stmts.len(), objects = program.objects.len(), "compiled");
    Ok(program)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_reports_all_diagnostics() {
        let mut reg = SimpleRegistry::new();
        match compile("int a = b; string s = 1;", &mut reg) {
            Err(CompileError::Diagnostics(d)) => {
                assert_eq!(d.len(), 2);
                assert!(d[0].to_string().starts_with("line 1: unknown identifier `b`"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn compile_fails_fast_on_syntax() {
        let mut reg = SimpleRegistry::new();
        assert!(matches!(compile("int a = ;", &mut reg), Err(CompileError::Parse(_))));
    }
}
