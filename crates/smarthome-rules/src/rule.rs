//! Rule tasks and their lifecycle

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use smarthome_signal::{AnySignal, SharedSignal};
use smarthome_state::{CondExpr, ValueExpr};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::Schedule;

type Handler = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Shared check callable for [`Rule::on_signals`]
pub type CheckFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Thread-safe shared handle to a rule
pub type SharedRule = Arc<Rule>;

/// What a rule waits on
#[derive(Clone)]
pub enum RuleSource {
    /// A condition expression: wake on its signal union, gate on `check()`
    Cond(CondExpr),
    /// Plain signals: run on every wake
    Changed(Vec<SharedSignal>),
    /// Explicit signal list with a separate check callable
    Signals {
        signals: Vec<SharedSignal>,
        check: Option<CheckFn>,
    },
    /// One-shot: fire once when the schedule elapses, then finish
    At(Schedule),
}

impl fmt::Debug for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSource::Cond(cond) => write!(f, "cond {cond:?}"),
            RuleSource::Changed(signals) => write!(f, "changed[{}]", signals.len()),
            RuleSource::Signals { signals, check } => write!(
                f,
                "signals[{}]{}",
                signals.len(),
                if check.is_some() { " with check" } else { "" }
            ),
            RuleSource::At(schedule) => write!(f, "at {}", schedule.when()),
        }
    }
}

/// Observable lifecycle of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    /// Built, not yet started
    Created,
    /// Background task running, awaiting its signal set
    Started,
    /// One-shot rule ran to completion
    Finished,
    /// Cancelled; terminal
    Closed,
}

struct RuleInner {
    state: RuleState,
    task: Option<JoinHandle<()>>,
}

/// A condition-driven background task
///
/// Lifecycle: `Created → Started → (Finished | Closed)`. `start()` is
/// idempotent and `close()` on a never-started rule is a warning, not an
/// error.
pub struct Rule {
    name: String,
    source: RuleSource,
    handler: Handler,
    inner: Mutex<RuleInner>,
}

impl Rule {
    fn build<F, Fut>(name: impl Into<String>, source: RuleSource, handler: F) -> SharedRule
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            source,
            handler: Arc::new(move || Box::pin(handler()) as BoxFuture<'static, _>),
            inner: Mutex::new(RuleInner {
                state: RuleState::Created,
                task: None,
            }),
        })
    }

    /// Rule gated by a condition expression
    pub fn when<F, Fut>(name: impl Into<String>, cond: CondExpr, handler: F) -> SharedRule
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::build(name, RuleSource::Cond(cond), handler)
    }

    /// Rule firing on every change of the given value expression's sources
    pub fn on_change<F, Fut>(
        name: impl Into<String>,
        expr: impl Into<ValueExpr>,
        handler: F,
    ) -> SharedRule
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::build(name, RuleSource::Changed(expr.into().signals()), handler)
    }

    /// Rule firing on every notification of a single signal
    pub fn on_signal<F, Fut>(name: impl Into<String>, signal: SharedSignal, handler: F) -> SharedRule
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::build(name, RuleSource::Changed(vec![signal]), handler)
    }

    /// Rule over an explicit signal list with an optional separate check
    pub fn on_signals<F, Fut>(
        name: impl Into<String>,
        signals: Vec<SharedSignal>,
        check: Option<CheckFn>,
        handler: F,
    ) -> SharedRule
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::build(name, RuleSource::Signals { signals, check }, handler)
    }

    /// One-shot rule firing when the schedule elapses
    pub fn at<F, Fut>(name: impl Into<String>, schedule: Schedule, handler: F) -> SharedRule
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::build(name, RuleSource::At(schedule), handler)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> RuleState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == RuleState::Started
    }

    /// Start the rule's background task
    ///
    /// Idempotent: a second start on a running rule warns and keeps the
    /// existing task. Listeners are subscribed synchronously before this
    /// returns, so a change made right after `start()` is never missed.
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut inner = self.lock();
        match inner.state {
            RuleState::Started => {
                warn!(rule = %self.name, "rule already started");
                return;
            }
            RuleState::Finished | RuleState::Closed => {
                warn!(rule = %self.name, state = ?inner.state, "cannot restart a finished rule");
                return;
            }
            RuleState::Created => {}
        }

        debug!(rule = %self.name, source = ?self.source, "starting rule");
        inner.state = RuleState::Started;
        inner.task = Some(match &self.source {
            RuleSource::At(schedule) => self.spawn_oneshot(*schedule),
            RuleSource::Cond(cond) => {
                let check = cond.clone();
                self.spawn_loop(AnySignal::new(cond.signals()), move || check.check())
            }
            RuleSource::Changed(signals) => {
                self.spawn_loop(AnySignal::new(signals.clone()), || true)
            }
            RuleSource::Signals { signals, check } => {
                let check = check.clone();
                self.spawn_loop(AnySignal::new(signals.clone()), move || {
                    check.as_ref().map_or(true, |c| c())
                })
            }
        });
    }

    /// Cancel the rule's background task
    ///
    /// Aborting the task drops its signal aggregation, which stops every
    /// forwarder it spawned: no background loop survives. Closing a rule
    /// that never started warns and is otherwise a no-op.
    pub fn close(&self) {
        let mut inner = self.lock();
        match inner.state {
            RuleState::Created => {
                warn!(rule = %self.name, "closing a rule that was never started");
                inner.state = RuleState::Closed;
            }
            RuleState::Started => {
                debug!(rule = %self.name, "closing rule");
                if let Some(task) = inner.task.take() {
                    task.abort();
                }
                inner.state = RuleState::Closed;
            }
            RuleState::Finished | RuleState::Closed => {
                trace!(rule = %self.name, "rule already stopped");
            }
        }
    }

    fn spawn_loop(
        self: &Arc<Self>,
        mut signals: AnySignal,
        check: impl Fn() -> bool + Send + 'static,
    ) -> JoinHandle<()> {
        let rule = self.clone();
        tokio::spawn(async move {
            while signals.wait().await {
                if !check() {
                    trace!(rule = %rule.name, "woke but check is false, skipping");
                    continue;
                }
                trace!(rule = %rule.name, "triggered");
                if let Err(err) = (rule.handler)().await {
                    warn!(rule = %rule.name, %err, "rule handler failed");
                }
            }
            debug!(rule = %rule.name, "signal sources gone, rule loop ending");
            rule.finish();
        })
    }

    fn spawn_oneshot(self: &Arc<Self>, schedule: Schedule) -> JoinHandle<()> {
        let rule = self.clone();
        tokio::spawn(async move {
            schedule.wait().await;
            trace!(rule = %rule.name, "schedule elapsed");
            if let Err(err) = (rule.handler)().await {
                warn!(rule = %rule.name, %err, "rule handler failed");
            }
            rule.finish();
        })
    }

    fn finish(&self) {
        let mut inner = self.lock();
        if inner.state == RuleState::Started {
            inner.state = RuleState::Finished;
            inner.task = None;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RuleInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("state", &self.state())
            .finish()
    }
}

/// Owned registry of rule handles
///
/// Each thing keeps its push rules here and the app keeps user rules;
/// `close_all` on stop tears every spawned task down, so no process-wide
/// task list exists.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Mutex<Vec<SharedRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule without starting it
    pub fn add(&self, rule: SharedRule) {
        self.rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(rule);
    }

    /// Add and immediately start a rule
    pub fn spawn(&self, rule: SharedRule) {
        rule.start();
        self.add(rule);
    }

    /// Start every rule that has not been started yet
    pub fn start_all(&self) {
        for rule in self.snapshot() {
            if rule.state() == RuleState::Created {
                rule.start();
            }
        }
    }

    /// Close every rule
    pub fn close_all(&self) {
        for rule in self.snapshot() {
            if rule.state() == RuleState::Started {
                rule.close();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<SharedRule> {
        self.rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
