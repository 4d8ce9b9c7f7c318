//! Broadcast wake/notify primitive for the smarthome runtime
//!
//! A [`Signal`] is the waitable trigger every state event class is built
//! on: any number of listeners can wait on it, one `notify()` wakes them
//! all, and notifications that arrive while a listener is busy are
//! buffered instead of lost. [`AnySignal`] aggregates several signals
//! into a single await point that resumes as soon as any member fires.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Default buffer depth for signal listeners
///
/// Deep enough that a listener processing one wake does not lag behind a
/// burst of notifications; a lagged listener still wakes and re-checks.
const DEFAULT_CAPACITY: usize = 64;

/// A broadcast wake/notify object
///
/// Semantically a condition variable with buffered broadcast wakeups:
/// `notify()` releases every current listener and never blocks; waiters
/// are expected to re-check their predicate after waking.
#[derive(Debug)]
pub struct Signal {
    tx: broadcast::Sender<()>,
}

/// Thread-safe shared handle to a signal
pub type SharedSignal = Arc<Signal>;

impl Signal {
    /// Create a new signal with the default listener buffer depth
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new signal with an explicit listener buffer depth
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Wake all current listeners
    ///
    /// Fire-and-forget: does not wait for listeners to resume. Notifying
    /// with no listeners subscribed is a no-op.
    pub fn notify(&self) {
        // Send errors just mean no active listeners
        let _ = self.tx.send(());
    }

    /// Register a listener for subsequent notifications
    ///
    /// Only notifications sent after `subscribe()` are observed, so
    /// subscribe before publishing anything you must not miss.
    pub fn subscribe(&self) -> SignalListener {
        SignalListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Suspend until the next notification
    ///
    /// One-shot convenience over [`Signal::subscribe`]; long-lived
    /// consumers should hold their own listener instead so that bursts
    /// are buffered between waits.
    pub async fn wait(&self) {
        let mut listener = self.subscribe();
        listener.wait().await;
    }

    /// Number of currently subscribed listeners
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered waiter on a [`Signal`]
#[derive(Debug)]
pub struct SignalListener {
    rx: broadcast::Receiver<()>,
}

impl SignalListener {
    /// Suspend until the signal is next notified
    ///
    /// Returns `false` once the signal itself has been dropped. A lagged
    /// listener (buffer overrun) is treated as a single wake: callers
    /// re-check their predicate anyway, so coalescing is safe.
    ///
    /// Cancel-safe: aborting a pending wait leaves nothing locked and the
    /// listener usable.
    pub async fn wait(&mut self) -> bool {
        match self.rx.recv().await {
            Ok(()) => true,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "signal listener lagged, coalescing wakes");
                true
            }
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }

    /// Non-blocking poll for a pending notification
    pub fn try_wait(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                warn!(missed, "signal listener lagged, coalescing wakes");
                true
            }
            Err(_) => false,
        }
    }
}

/// Await point over several independent signals
///
/// One lightweight forwarder task listens on each member signal and
/// re-notifies a single aggregate signal, which is what [`AnySignal::wait`]
/// awaits. Every forwarder re-arms after each wake for the lifetime of the
/// aggregation, so notifications on other members are not lost while the
/// first is being processed. Dropping the aggregation aborts all
/// forwarders.
#[derive(Debug)]
pub struct AnySignal {
    listener: SignalListener,
    forwarders: Vec<JoinHandle<()>>,
}

impl AnySignal {
    /// Aggregate the given signals into one await point
    ///
    /// Member listeners and the aggregate listener are subscribed here,
    /// synchronously, before any forwarder runs: a notification arriving
    /// between construction and the first `wait()` is buffered, not lost.
    pub fn new<I>(signals: I) -> Self
    where
        I: IntoIterator<Item = SharedSignal>,
    {
        let aggregate = Arc::new(Signal::new());
        let listener = aggregate.subscribe();

        let forwarders = signals
            .into_iter()
            .map(|signal| {
                let mut member = signal.subscribe();
                let aggregate = aggregate.clone();
                tokio::spawn(async move {
                    while member.wait().await {
                        trace!("forwarding member signal to aggregate");
                        aggregate.notify();
                    }
                })
            })
            .collect();

        Self {
            listener,
            forwarders,
        }
    }

    /// Suspend until any member signal is notified
    ///
    /// Returns `false` only if the aggregation has no live members left.
    pub async fn wait(&mut self) -> bool {
        self.listener.wait().await
    }
}

impl Drop for AnySignal {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_notify_wakes_all_listeners() {
        let signal = Arc::new(Signal::new());
        let mut handles = Vec::new();
        for _ in 0..3 {
            let mut listener = signal.subscribe();
            handles.push(tokio::spawn(async move { listener.wait().await }));
        }

        signal.notify();

        for handle in handles {
            assert!(timeout(Duration::from_secs(1), handle).await.unwrap().unwrap());
        }
    }

    #[tokio::test]
    async fn test_notifications_buffered_between_waits() {
        let signal = Signal::new();
        let mut listener = signal.subscribe();

        signal.notify();
        signal.notify();

        assert!(listener.wait().await);
        assert!(listener.wait().await);
        assert!(!listener.try_wait());
    }

    #[tokio::test]
    async fn test_one_shot_wait_resumes_on_notify() {
        let signal = Arc::new(Signal::new());
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.wait().await });

        // Give the waiter time to subscribe before notifying
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.notify();
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_false_after_signal_dropped() {
        let signal = Signal::new();
        let mut listener = signal.subscribe();
        drop(signal);
        assert!(!listener.wait().await);
    }

    #[tokio::test]
    async fn test_any_signal_wakes_on_each_member() {
        let a = Arc::new(Signal::new());
        let b = Arc::new(Signal::new());
        let mut any = AnySignal::new([a.clone(), b.clone()]);

        a.notify();
        assert!(timeout(Duration::from_secs(1), any.wait()).await.unwrap());

        b.notify();
        assert!(timeout(Duration::from_secs(1), any.wait()).await.unwrap());
    }

    #[tokio::test]
    async fn test_any_signal_does_not_lose_concurrent_members() {
        let a = Arc::new(Signal::new());
        let b = Arc::new(Signal::new());
        let mut any = AnySignal::new([a.clone(), b.clone()]);

        // Both members fire before the caller gets to wait once
        a.notify();
        b.notify();
        tokio::task::yield_now().await;

        assert!(timeout(Duration::from_secs(1), any.wait()).await.unwrap());
        assert!(timeout(Duration::from_secs(1), any.wait()).await.unwrap());
    }

    #[tokio::test]
    async fn test_any_signal_drop_stops_forwarders() {
        let a = Arc::new(Signal::new());
        let any = AnySignal::new([a.clone()]);
        tokio::task::yield_now().await;
        assert_eq!(a.listener_count(), 1);

        drop(any);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.listener_count(), 0);
    }
}
