//! Resources a plugin acquires in `load` and must give back in `unload`

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::domain::entities::Subscription;

/// Handle to a subscription or timer owned by a plugin context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisposableId(u64);

impl fmt::Display for DisposableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// When a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Once(Duration),
    Every(Duration),
}

/// Counts plugin timers whose task is still alive
#[derive(Debug, Clone, Default)]
pub struct TimerTracker {
    outstanding: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
}

impl TimerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn total_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn guard(&self) -> TimerGuard {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        TimerGuard(self.outstanding.clone())
    }
}

struct TimerGuard(Arc<AtomicUsize>);

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A spawned timer task
pub struct TimerTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TimerTask {
    pub fn spawn<F, Fut>(tracker: &TimerTracker, schedule: Schedule, span: tracing::Span, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let guard = tracker.guard();
        let cancelled = token.clone();

        let handle = tokio::spawn(
            async move {
                let _guard = guard;
                let (period, repeat) = match schedule {
                    Schedule::Once(delay) => (delay, false),
                    Schedule::Every(period) => (period, true),
                };
                loop {
                    tokio::select! {
                        _ = cancelled.cancelled() => break,
                        _ = tokio::time::sleep(period) => {}
                    }
                    tokio::select! {
                        _ = cancelled.cancelled() => break,
                        _ = tick() => {}
                    }
                    if !repeat {
                        break;
                    }
                }
            }
            .instrument(span),
        );

        Self { token, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel and wait until the task has actually stopped
    pub async fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
        let _ = self.handle.await;
    }
}

enum Disposable {
    Subscription(Subscription),
    Timer(TimerTask),
}

/// What was still held when a plugin finished unloading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeakReport {
    pub timers: usize,
    pub subscriptions: usize,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.timers == 0 && self.subscriptions == 0
    }
}

/// Everything a plugin acquired through its context, keyed by id
#[derive(Default)]
pub struct DisposableSet {
    next_id: u64,
    items: BTreeMap<DisposableId, Disposable>,
}

impl DisposableSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, item: Disposable) -> DisposableId {
        self.next_id += 1;
        let id = DisposableId(self.next_id);
        self.items.insert(id, item);
        id
    }

    pub fn add_subscription(&mut self, subscription: Subscription) -> DisposableId {
        self.insert(Disposable::Subscription(subscription))
    }

    pub fn add_timer(&mut self, timer: TimerTask) -> DisposableId {
        self.insert(Disposable::Timer(timer))
    }

    /// Release one resource; `false` if the id is unknown or already released
    pub async fn release(&mut self, id: DisposableId) -> bool {
        match self.items.remove(&id) {
            Some(Disposable::Subscription(sub)) => {
                sub.unsubscribe();
                true
            }
            Some(Disposable::Timer(timer)) => {
                timer.cancel().await;
                true
            }
            None => false,
        }
    }

    /// Live resources. Timers that already fired once and stopped do not count.
    pub fn outstanding(&self) -> LeakReport {
        let mut report = LeakReport::default();
        for item in self.items.values() {
            match item {
                Disposable::Subscription(_) => report.subscriptions += 1,
                Disposable::Timer(timer) if timer.is_running() => report.timers += 1,
                Disposable::Timer(_) => {}
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Release everything, returning how many resources were held
    pub async fn release_all(&mut self) -> usize {
        let items = std::mem::take(&mut self.items);
        let count = items.len();
        for (_, item) in items {
            match item {
                Disposable::Subscription(sub) => sub.unsubscribe(),
                Disposable::Timer(timer) => timer.cancel().await,
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::EventKind;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_tracker_counts_until_cancelled() {
        let tracker = TimerTracker::new();
        let mut set = DisposableSet::new();
        let id = set.add_timer(TimerTask::spawn(
            &tracker,
            Schedule::Every(Duration::from_millis(5)),
            tracing::Span::none(),
            || async {},
        ));

        assert_eq!(tracker.outstanding(), 1);
        assert_eq!(set.outstanding().timers, 1);

        assert!(set.release(id).await);
        assert_eq!(tracker.outstanding(), 0);
        assert!(!set.release(id).await);
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let tracker = TimerTracker::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = TimerTask::spawn(
            &tracker,
            Schedule::Once(Duration::from_millis(50)),
            tracing::Span::none(),
            move || {
                let flag = flag.clone();
                async move { flag.store(true, Ordering::SeqCst) }
            },
        );

        timer.cancel().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_release_all_detaches_subscriptions() {
        let detached = Arc::new(AtomicUsize::new(0));
        let mut set = DisposableSet::new();
        for id in 0..3 {
            let detached = detached.clone();
            set.add_subscription(Subscription::new(id, EventKind::Ready, move || {
                detached.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(set.outstanding().subscriptions, 3);
        assert_eq!(set.release_all().await, 3);
        assert_eq!(detached.load(Ordering::SeqCst), 3);
        assert!(set.is_empty());
    }
}
