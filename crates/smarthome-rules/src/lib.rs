//! Rule engine for the smarthome runtime
//!
//! A [`Rule`] binds a condition - a [`CondExpr`], a plain signal set, or a
//! time [`Schedule`] - to an async handler. Starting the rule spawns a
//! background loop that waits on the condition's signal set, re-evaluates
//! the check on every wake, and runs the handler only when it holds.
//! Handler failures are logged, never propagated: one failing rule cannot
//! take its siblings down.
//!
//! [`RuleSet`] collects rule handles so owners (things, the app) can start
//! and tear them down together.
//!
//! [`CondExpr`]: smarthome_state::CondExpr

mod counter;
mod rule;
mod schedule;

pub use counter::Counter;
pub use rule::{CheckFn, Rule, RuleSet, RuleSource, RuleState, SharedRule};
pub use schedule::Schedule;
