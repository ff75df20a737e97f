//! Ani: the scripting core behind procedural animation descriptions.
//!
//! The interesting parts live in [`script`]: the typed value model, the
//! type-fixup pass and the suspendable execution engine. [`sched`] drives
//! many script threads cooperatively; [`config`] and [`cli`] are the thin
//! layers used by the `ani` binary.

pub mod cli;
pub mod config;
pub mod error;
pub mod sched;
pub mod script;
