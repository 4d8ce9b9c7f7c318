//! Observable state cells and condition expressions
//!
//! This crate provides the reactive core of the runtime:
//!
//! - [`State`] - a named, typed mutable cell that notifies broadcast
//!   signals for its three event classes (`changed`, `received_update`,
//!   `received_command`)
//! - [`ValueExpr`] / [`CondExpr`] - immutable, lazily-evaluated expression
//!   trees combining one or more states through arithmetic and comparison
//!   nodes, carrying the union of the signals they must listen to
//!
//! Expressions never cache: `value()` and `check()` recompute from the
//! live operand states on every access.

mod expr;
mod state;

pub use expr::{ArithOp, CondExpr, ValueExpr};
pub use state::{SharedState, State, StateEvent, StateInput, StateOps};
