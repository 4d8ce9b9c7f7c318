//! Lazily-evaluated expression trees over states
//!
//! Expressions are immutable value objects: every combinator returns a new
//! node and never mutates its operands. A [`ValueExpr`] computes a value,
//! a [`CondExpr`] computes a boolean check; the split makes boolean
//! composition (`&`, `|`, `!`) of non-boolean nodes a compile error
//! instead of a runtime one.

use std::fmt;
use std::ops;
use std::sync::Arc;

use smarthome_core::{CmpOp, Value, ValueError};
use smarthome_signal::SharedSignal;
use tracing::warn;

use crate::SharedState;

type MapFn = dyn Fn(Value) -> Value + Send + Sync;
type CheckFn = dyn Fn() -> bool + Send + Sync;

/// Arithmetic operators usable in value expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn apply(self, lhs: &Value, rhs: &Value) -> Result<Value, ValueError> {
        match self {
            ArithOp::Add => lhs.try_add(rhs),
            ArithOp::Sub => lhs.try_sub(rhs),
            ArithOp::Mul => lhs.try_mul(rhs),
            ArithOp::Div => lhs.try_div(rhs),
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone)]
enum ValueNode {
    Source(SharedState),
    Const(Value),
    Arith {
        op: ArithOp,
        lhs: Box<ValueExpr>,
        rhs: Box<ValueExpr>,
    },
    Map {
        source: Box<ValueExpr>,
        f: Arc<MapFn>,
    },
}

/// A value-producing expression node
///
/// `value()` is recomputed from the live operand states on every access,
/// never cached, so an expression always reflects current state.
#[derive(Clone)]
pub struct ValueExpr {
    node: ValueNode,
}

impl ValueExpr {
    fn new(node: ValueNode) -> Self {
        Self { node }
    }

    fn arith(op: ArithOp, lhs: ValueExpr, rhs: ValueExpr) -> Self {
        Self::new(ValueNode::Arith {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    /// Evaluate the expression against current state values
    pub fn value(&self) -> Result<Value, ValueError> {
        match &self.node {
            ValueNode::Source(state) => Ok(state.value()),
            ValueNode::Const(value) => Ok(value.clone()),
            ValueNode::Arith { op, lhs, rhs } => op.apply(&lhs.value()?, &rhs.value()?),
            ValueNode::Map { source, f } => Ok(f(source.value()?)),
        }
    }

    /// Derive an expression applying a pure function to this one's value
    pub fn map(self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> ValueExpr {
        Self::new(ValueNode::Map {
            source: Box::new(self),
            f: Arc::new(f),
        })
    }

    pub fn eq(self, rhs: impl Into<ValueExpr>) -> CondExpr {
        CondExpr::compare(CmpOp::Eq, self, rhs.into())
    }

    pub fn ne(self, rhs: impl Into<ValueExpr>) -> CondExpr {
        CondExpr::compare(CmpOp::Ne, self, rhs.into())
    }

    pub fn le(self, rhs: impl Into<ValueExpr>) -> CondExpr {
        CondExpr::compare(CmpOp::Le, self, rhs.into())
    }

    pub fn lt(self, rhs: impl Into<ValueExpr>) -> CondExpr {
        CondExpr::compare(CmpOp::Lt, self, rhs.into())
    }

    pub fn ge(self, rhs: impl Into<ValueExpr>) -> CondExpr {
        CondExpr::compare(CmpOp::Ge, self, rhs.into())
    }

    pub fn gt(self, rhs: impl Into<ValueExpr>) -> CondExpr {
        CondExpr::compare(CmpOp::Gt, self, rhs.into())
    }

    /// Changed-signals of every source state in this subtree, deduplicated
    pub fn signals(&self) -> Vec<SharedSignal> {
        let mut out = Vec::new();
        self.collect_signals(&mut out);
        out
    }

    fn collect_signals(&self, out: &mut Vec<SharedSignal>) {
        match &self.node {
            ValueNode::Source(state) => push_unique(out, state.changed()),
            ValueNode::Const(_) => {}
            ValueNode::Arith { lhs, rhs, .. } => {
                lhs.collect_signals(out);
                rhs.collect_signals(out);
            }
            ValueNode::Map { source, .. } => source.collect_signals(out),
        }
    }
}

impl fmt::Debug for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            ValueNode::Source(state) => write!(f, "{}", state.path()),
            ValueNode::Const(value) => write!(f, "{value}"),
            ValueNode::Arith { op, lhs, rhs } => write!(f, "({lhs:?} {op} {rhs:?})"),
            ValueNode::Map { source, .. } => write!(f, "map({source:?})"),
        }
    }
}

impl From<Value> for ValueExpr {
    fn from(value: Value) -> Self {
        Self::new(ValueNode::Const(value))
    }
}

impl From<SharedState> for ValueExpr {
    fn from(state: SharedState) -> Self {
        Self::new(ValueNode::Source(state))
    }
}

impl From<&SharedState> for ValueExpr {
    fn from(state: &SharedState) -> Self {
        Self::new(ValueNode::Source(state.clone()))
    }
}

macro_rules! value_expr_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ValueExpr {
            fn from(v: $ty) -> Self {
                ValueExpr::from(Value::from(v))
            }
        })*
    };
}

value_expr_from!(bool, i32, i64, f64, &str, String);

impl<R: Into<ValueExpr>> ops::Add<R> for ValueExpr {
    type Output = ValueExpr;

    fn add(self, rhs: R) -> ValueExpr {
        ValueExpr::arith(ArithOp::Add, self, rhs.into())
    }
}

impl<R: Into<ValueExpr>> ops::Sub<R> for ValueExpr {
    type Output = ValueExpr;

    fn sub(self, rhs: R) -> ValueExpr {
        ValueExpr::arith(ArithOp::Sub, self, rhs.into())
    }
}

impl<R: Into<ValueExpr>> ops::Mul<R> for ValueExpr {
    type Output = ValueExpr;

    fn mul(self, rhs: R) -> ValueExpr {
        ValueExpr::arith(ArithOp::Mul, self, rhs.into())
    }
}

impl<R: Into<ValueExpr>> ops::Div<R> for ValueExpr {
    type Output = ValueExpr;

    fn div(self, rhs: R) -> ValueExpr {
        ValueExpr::arith(ArithOp::Div, self, rhs.into())
    }
}

#[derive(Clone)]
enum CondNode {
    Compare {
        op: CmpOp,
        lhs: ValueExpr,
        rhs: ValueExpr,
    },
    All(Box<CondExpr>, Box<CondExpr>),
    Any(Box<CondExpr>, Box<CondExpr>),
    Not(Box<CondExpr>),
    Predicate {
        signals: Vec<SharedSignal>,
        check: Arc<CheckFn>,
    },
}

/// A boolean check over live state values
///
/// `check()` has no side effects; evaluation failures (incomparable
/// kinds, arithmetic on the wrong kinds) are logged and gate to `false`
/// so a bad expression never takes a rule loop down.
#[derive(Clone)]
pub struct CondExpr {
    node: CondNode,
}

impl CondExpr {
    fn new(node: CondNode) -> Self {
        Self { node }
    }

    pub(crate) fn compare(op: CmpOp, lhs: ValueExpr, rhs: ValueExpr) -> Self {
        Self::new(CondNode::Compare { op, lhs, rhs })
    }

    /// Raw escape hatch: an explicit signal set with a custom check
    pub fn predicate(
        signals: Vec<SharedSignal>,
        check: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(CondNode::Predicate {
            signals,
            check: Arc::new(check),
        })
    }

    /// Evaluate the check against current state values
    pub fn check(&self) -> bool {
        match &self.node {
            CondNode::Compare { op, lhs, rhs } => {
                let result = lhs
                    .value()
                    .and_then(|l| rhs.value().and_then(|r| l.compare(*op, &r)));
                match result {
                    Ok(ok) => ok,
                    Err(err) => {
                        warn!(%err, cond = ?self, "condition evaluation failed, treating as false");
                        false
                    }
                }
            }
            CondNode::All(lhs, rhs) => lhs.check() && rhs.check(),
            CondNode::Any(lhs, rhs) => lhs.check() || rhs.check(),
            CondNode::Not(inner) => !inner.check(),
            CondNode::Predicate { check, .. } => check(),
        }
    }

    /// Union of all contributing signals, deduplicated by identity
    ///
    /// Registering the same underlying state twice in an expression must
    /// not produce duplicate wakeups.
    pub fn signals(&self) -> Vec<SharedSignal> {
        let mut out = Vec::new();
        self.collect_signals(&mut out);
        out
    }

    fn collect_signals(&self, out: &mut Vec<SharedSignal>) {
        match &self.node {
            CondNode::Compare { lhs, rhs, .. } => {
                lhs.collect_signals(out);
                rhs.collect_signals(out);
            }
            CondNode::All(lhs, rhs) | CondNode::Any(lhs, rhs) => {
                lhs.collect_signals(out);
                rhs.collect_signals(out);
            }
            CondNode::Not(inner) => inner.collect_signals(out),
            CondNode::Predicate { signals, .. } => {
                for signal in signals {
                    push_unique(out, signal);
                }
            }
        }
    }
}

impl fmt::Debug for CondExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            CondNode::Compare { op, lhs, rhs } => write!(f, "({lhs:?} {op} {rhs:?})"),
            CondNode::All(lhs, rhs) => write!(f, "({lhs:?} & {rhs:?})"),
            CondNode::Any(lhs, rhs) => write!(f, "({lhs:?} | {rhs:?})"),
            CondNode::Not(inner) => write!(f, "!{inner:?}"),
            CondNode::Predicate { signals, .. } => write!(f, "predicate[{}]", signals.len()),
        }
    }
}

impl ops::BitAnd for CondExpr {
    type Output = CondExpr;

    fn bitand(self, rhs: CondExpr) -> CondExpr {
        CondExpr::new(CondNode::All(Box::new(self), Box::new(rhs)))
    }
}

impl ops::BitOr for CondExpr {
    type Output = CondExpr;

    fn bitor(self, rhs: CondExpr) -> CondExpr {
        CondExpr::new(CondNode::Any(Box::new(self), Box::new(rhs)))
    }
}

impl ops::Not for CondExpr {
    type Output = CondExpr;

    fn not(self) -> CondExpr {
        CondExpr::new(CondNode::Not(Box::new(self)))
    }
}

fn push_unique(out: &mut Vec<SharedSignal>, signal: &SharedSignal) {
    if !out.iter().any(|s| Arc::ptr_eq(s, signal)) {
        out.push(signal.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{State, StateOps};
    use smarthome_core::Converter;

    #[test]
    fn test_equal_initial_values_check_true() {
        let a = State::new("a", Converter::Int, 0);
        let b = State::new("b", Converter::Int, 0);
        assert!(a.eq(b.expr()).check());
    }

    #[test]
    fn test_sum_recomputes_on_access() {
        let a = State::new("a", Converter::Int, 1);
        let b = State::new("b", Converter::Int, 1);
        let cond = (a.expr() + b.expr()).eq(4);

        assert!(!cond.check());
        a.change(2).unwrap();
        assert!(!cond.check());
        b.change(2).unwrap();
        assert!(cond.check());
    }

    #[test]
    fn test_value_expr_arithmetic_against_scalars() {
        let a = State::new("a", Converter::Float, 10.0);
        let halved = a.expr() / 2.0;
        assert_eq!(halved.value().unwrap(), Value::Float(5.0));

        a.change(30.0).unwrap();
        assert_eq!(halved.value().unwrap(), Value::Float(15.0));
    }

    #[test]
    fn test_map_applies_pure_function() {
        let a = State::new("a", Converter::Int, 3);
        let doubled = a.expr().map(|v| v.try_mul(&Value::Int(2)).unwrap_or(v));
        assert_eq!(doubled.value().unwrap(), Value::Int(6));
        assert!(doubled.eq(6).check());
    }

    #[test]
    fn test_composition_matches_plain_logic() {
        let a = State::new("a", Converter::Int, 1);
        let b = State::new("b", Converter::Int, 1);
        let c = State::new("c", Converter::Int, 0);
        let d = State::new("d", Converter::Int, 0);

        let cond = a.eq(b.expr()) & c.eq(d.expr());
        assert!(cond.check());

        c.change(5).unwrap();
        assert!(!cond.check());
        assert!((a.eq(b.expr()) | c.eq(d.expr())).check());
    }

    #[test]
    fn test_signal_union_deduplicates() {
        let a = State::new("a", Converter::Int, 0);
        let b = State::new("b", Converter::Int, 0);

        // `a` contributes twice but must register once
        let cond = a.eq(b.expr()) & a.gt(0);
        assert_eq!(cond.signals().len(), 2);
    }

    #[test]
    fn test_incomparable_kinds_gate_to_false() {
        let a = State::new("a", Converter::Bool, true);
        let cond = a.gt(0);
        assert!(!cond.check());
    }

    #[test]
    fn test_building_does_not_mutate_operands() {
        let a = State::new("a", Converter::Int, 1);
        let _sum = a.expr() + 1;
        let _cmp = a.gt(0);
        assert_eq!(a.value(), Value::Int(1));
        assert_eq!(a.expr().signals().len(), 1);
    }

    #[test]
    fn test_predicate_condition() {
        let a = State::new("a", Converter::Int, 0);
        let state = a.clone();
        let cond = CondExpr::predicate(vec![a.changed().clone()], move || {
            state.value() == Value::Int(7)
        });
        assert!(!cond.check());
        a.change(7).unwrap();
        assert!(cond.check());
        assert_eq!(cond.signals().len(), 1);
    }
}
