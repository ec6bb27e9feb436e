// ── Serialized profile switching ──
//
// At most one switch runs at a time and at most one waits behind it.
// A new request while one is waiting replaces the waiting one: only the
// latest desired profile matters. Progress is broadcast as events.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::lock;

const EVENT_CAPACITY: usize = 64;

type RunFuture = BoxFuture<'static, Result<(), CoreError>>;
type RunFn = Box<dyn FnOnce() -> RunFuture + Send>;

// ── Task and events ──────────────────────────────────────────────

/// Identity of a switch task as it appears in events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMeta {
    pub profile_id: String,
    pub notify_on_success: bool,
}

/// A profile switch waiting to run.
pub struct SwitchTask {
    meta: TaskMeta,
    run: RunFn,
}

impl SwitchTask {
    pub fn new<F, Fut>(profile_id: impl Into<String>, notify_on_success: bool, run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        Self {
            meta: TaskMeta {
                profile_id: profile_id.into(),
                notify_on_success,
            },
            run: Box::new(move || Box::pin(run())),
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.meta.profile_id
    }

    pub fn notify_on_success(&self) -> bool {
        self.meta.notify_on_success
    }

    /// Invoke `run`, turning a panic while building the future into an
    /// immediately failing one.
    fn start(self) -> (TaskMeta, RunFuture) {
        let run = self.run;
        let future = match std::panic::catch_unwind(AssertUnwindSafe(run)) {
            Ok(future) => future,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                Box::pin(async move { Err(CoreError::TaskFailed { message }) })
            }
        };
        (self.meta, future)
    }
}

impl fmt::Debug for SwitchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchTask")
            .field("profile_id", &self.meta.profile_id)
            .field("notify_on_success", &self.meta.notify_on_success)
            .finish_non_exhaustive()
    }
}

/// Progress of the switch queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchEvent {
    /// The task began running.
    Start(TaskMeta),
    /// The task is waiting behind the running one.
    Queued(TaskMeta),
    Success(TaskMeta),
    Error { task: TaskMeta, message: String },
    /// Nothing running, nothing waiting.
    Idle,
}

impl SwitchEvent {
    pub fn task(&self) -> Option<&TaskMeta> {
        match self {
            Self::Start(task) | Self::Queued(task) | Self::Success(task) => Some(task),
            Self::Error { task, .. } => Some(task),
            Self::Idle => None,
        }
    }
}

impl fmt::Display for SwitchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(task) => write!(f, "start {}", task.profile_id),
            Self::Queued(task) => write!(f, "queued {}", task.profile_id),
            Self::Success(task) => write!(f, "success {}", task.profile_id),
            Self::Error { task, message } => write!(f, "error {}: {message}", task.profile_id),
            Self::Idle => f.write_str("idle"),
        }
    }
}

// ── Two-slot state machine ───────────────────────────────────────

#[derive(Default)]
struct Slots {
    current: Option<TaskMeta>,
    pending: Option<SwitchTask>,
}

enum Admission {
    Run(SwitchTask),
    Queued {
        meta: TaskMeta,
        replaced: Option<TaskMeta>,
    },
}

impl Slots {
    fn admit(&mut self, task: SwitchTask) -> Admission {
        if self.current.is_none() {
            self.current = Some(task.meta.clone());
            return Admission::Run(task);
        }
        let meta = task.meta.clone();
        let replaced = self.pending.replace(task).map(|t| t.meta);
        Admission::Queued { meta, replaced }
    }

    /// The running task finished: promote the pending one, or go idle.
    fn advance(&mut self) -> Option<SwitchTask> {
        let next = self.pending.take();
        self.current = next.as_ref().map(|t| t.meta.clone());
        next
    }
}

#[derive(Default)]
struct QueueState {
    slots: Slots,
    /// Events in transition order, not yet delivered.
    outbox: VecDeque<SwitchEvent>,
    delivering: bool,
}

type ObserverFn = Arc<dyn Fn(&SwitchEvent) + Send + Sync>;

struct Observer {
    callback: ObserverFn,
    active: Arc<AtomicBool>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    observers: Mutex<IndexMap<u64, Observer>>,
    next_observer: AtomicU64,
    events: broadcast::Sender<SwitchEvent>,
}

// ── SwitchQueue ──────────────────────────────────────────────────

/// Latest-wins queue of profile switches.
#[derive(Clone)]
pub struct SwitchQueue {
    inner: Arc<QueueInner>,
}

impl Default for SwitchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchQueue {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                observers: Mutex::new(IndexMap::new()),
                next_observer: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// Submit a switch. Runs now if idle, otherwise becomes the single
    /// pending task, silently replacing any earlier pending one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, task: SwitchTask) {
        let started = {
            let mut state = lock(&self.inner.state);
            match state.slots.admit(task) {
                Admission::Run(task) => {
                    state.outbox.push_back(SwitchEvent::Start(task.meta.clone()));
                    Some(task)
                }
                Admission::Queued { meta, replaced } => {
                    if let Some(replaced) = replaced {
                        debug!(
                            dropped = %replaced.profile_id,
                            by = %meta.profile_id,
                            "pending switch replaced"
                        );
                    }
                    state.outbox.push_back(SwitchEvent::Queued(meta));
                    None
                }
            }
        };

        if let Some(task) = started {
            let (meta, future) = task.start();
            tokio::spawn(drive(Arc::clone(&self.inner), meta, future));
        }
        self.inner.flush();
    }

    /// Observe every event synchronously, in emission order.
    pub fn subscribe<F>(&self, callback: F) -> SwitchObserver
    where
        F: Fn(&SwitchEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_observer.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        lock(&self.inner.observers).insert(
            id,
            Observer {
                callback: Arc::new(callback),
                active: Arc::clone(&active),
            },
        );
        SwitchObserver {
            queue: Arc::downgrade(&self.inner),
            id,
            active,
        }
    }

    /// Broadcast receiver for consumers that prefer to await events.
    pub fn events(&self) -> broadcast::Receiver<SwitchEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.state).slots.current.is_some()
    }

    pub fn current(&self) -> Option<TaskMeta> {
        lock(&self.inner.state).slots.current.clone()
    }

    pub fn pending(&self) -> Option<TaskMeta> {
        lock(&self.inner.state)
            .slots
            .pending
            .as_ref()
            .map(|t| t.meta.clone())
    }
}

impl fmt::Debug for SwitchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchQueue")
            .field("current", &self.current())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Runs the current task, then each promoted pending task, until idle.
async fn drive(inner: Arc<QueueInner>, meta: TaskMeta, future: RunFuture) {
    let mut running = Some((meta, future));

    while let Some((meta, future)) = running.take() {
        let outcome = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result.map_err(|e| e.message()),
            Err(panic) => {
                error!(profile = %meta.profile_id, "switch task panicked");
                Err(panic_message(panic.as_ref()))
            }
        };

        let next = {
            let mut state = lock(&inner.state);
            match outcome {
                Ok(()) => {
                    info!(profile = %meta.profile_id, "profile switch succeeded");
                    state.outbox.push_back(SwitchEvent::Success(meta));
                }
                Err(message) => {
                    warn!(profile = %meta.profile_id, error = %message, "profile switch failed");
                    state.outbox.push_back(SwitchEvent::Error {
                        task: meta,
                        message,
                    });
                }
            }
            let next = state.slots.advance();
            match &next {
                Some(task) => state.outbox.push_back(SwitchEvent::Start(task.meta.clone())),
                None => state.outbox.push_back(SwitchEvent::Idle),
            }
            next
        };
        inner.flush();

        if let Some(task) = next {
            tokio::task::yield_now().await;
            running = Some(task.start());
        }
    }
}

impl QueueInner {
    /// Deliver queued events in order. Re-entrant calls (an observer
    /// enqueueing a switch) leave their events to the outer delivery.
    fn flush(&self) {
        {
            let mut state = lock(&self.state);
            if state.delivering {
                return;
            }
            state.delivering = true;
        }
        let guard = DeliveryGuard(self);

        loop {
            let event = {
                let mut state = lock(&self.state);
                let Some(event) = state.outbox.pop_front() else {
                    // Emptiness and the flag must change under one lock, or a
                    // concurrent push can land after the check and be skipped.
                    state.delivering = false;
                    drop(state);
                    guard.disarm();
                    return;
                };
                event
            };
            self.deliver(&event);
        }
    }

    fn deliver(&self, event: &SwitchEvent) {
        debug!(%event, "switch event");
        let observers: Vec<(ObserverFn, Arc<AtomicBool>)> = lock(&self.observers)
            .values()
            .map(|o| (Arc::clone(&o.callback), Arc::clone(&o.active)))
            .collect();
        for (callback, active) in observers {
            if active.load(Ordering::Acquire) {
                callback(event);
            }
        }
        let _ = self.events.send(event.clone());
    }
}

/// Clears the delivering flag if an observer panics mid-delivery.
struct DeliveryGuard<'a>(&'a QueueInner);

impl DeliveryGuard<'_> {
    /// The flag was already cleared together with the empty check.
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        lock(&self.0.state).delivering = false;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "switch task panicked".to_owned()
    }
}

// ── SwitchObserver ───────────────────────────────────────────────

/// Handle for one observer. Dropping it stops delivery.
pub struct SwitchObserver {
    queue: Weak<QueueInner>,
    id: u64,
    active: Arc<AtomicBool>,
}

impl Drop for SwitchObserver {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(queue) = self.queue.upgrade() {
            lock(&queue.observers).shift_remove(&self.id);
        }
    }
}

impl fmt::Debug for SwitchObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchObserver")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;

    use super::*;

    fn record(queue: &SwitchQueue) -> (Arc<Mutex<Vec<String>>>, SwitchObserver) {
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&log);
        let observer = queue.subscribe(move |event| lock(&sink).push(event.to_string()));
        (log, observer)
    }

    fn instant(id: &str) -> SwitchTask {
        SwitchTask::new(id, true, || async { Ok(()) })
    }

    fn gated(id: &str) -> (SwitchTask, oneshot::Sender<Result<(), CoreError>>) {
        let (tx, rx) = oneshot::channel();
        let task = SwitchTask::new(id, false, move || async move {
            rx.await
                .unwrap_or_else(|_| Err(CoreError::Internal("gate dropped".into())))
        });
        (task, tx)
    }

    fn explode() -> Result<(), CoreError> {
        panic!("engine exploded")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn single_task_runs_to_idle() {
        let queue = SwitchQueue::new();
        let (log, _obs) = record(&queue);

        queue.enqueue(instant("p1"));
        assert!(queue.is_running());
        settle().await;

        assert_eq!(*lock(&log), vec!["start p1", "success p1", "idle"]);
        assert!(!queue.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_task_runs_after_current() {
        let queue = SwitchQueue::new();
        let (log, _obs) = record(&queue);

        let (a, release_a) = gated("p1");
        queue.enqueue(a);
        queue.enqueue(instant("p2"));
        assert_eq!(queue.current().unwrap().profile_id, "p1");
        assert_eq!(queue.pending().unwrap().profile_id, "p2");

        release_a.send(Ok(())).unwrap();
        settle().await;

        assert_eq!(
            *lock(&log),
            vec!["start p1", "queued p2", "success p1", "start p2", "success p2", "idle"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_enqueues_keep_first_and_last() {
        let queue = SwitchQueue::new();
        let (log, _obs) = record(&queue);
        let ran: Arc<Mutex<Vec<String>>> = Arc::default();

        let (first, release) = gated("p1");
        queue.enqueue(first);
        for id in ["p2", "p3", "p4"] {
            let ran = Arc::clone(&ran);
            queue.enqueue(SwitchTask::new(id, false, move || async move {
                lock(&ran).push(id.to_owned());
                Ok(())
            }));
        }

        release.send(Ok(())).unwrap();
        settle().await;

        assert_eq!(*lock(&ran), vec!["p4"]);
        let starts: Vec<String> = lock(&log)
            .iter()
            .filter(|e| e.starts_with("start"))
            .cloned()
            .collect();
        assert_eq!(starts, vec!["start p1", "start p4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reports_message_and_pending_still_runs() {
        let queue = SwitchQueue::new();
        let (log, _obs) = record(&queue);

        let (a, release_a) = gated("p1");
        queue.enqueue(a);
        queue.enqueue(instant("p2"));
        release_a
            .send(Err(CoreError::TaskFailed {
                message: "config rejected".into(),
            }))
            .unwrap();
        settle().await;

        assert_eq!(
            *lock(&log),
            vec![
                "start p1",
                "queued p2",
                "error p1: config rejected",
                "start p2",
                "success p2",
                "idle"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_becomes_error_event() {
        let queue = SwitchQueue::new();
        let (log, _obs) = record(&queue);

        queue.enqueue(SwitchTask::new("p1", false, || async { explode() }));
        settle().await;

        assert_eq!(*lock(&log), vec!["start p1", "error p1: engine exploded", "idle"]);
        assert!(!queue.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn observer_may_enqueue_reentrantly() {
        let queue = SwitchQueue::new();
        let (log, _obs) = record(&queue);
        let chained = Arc::new(AtomicBool::new(false));

        let reentrant = queue.clone();
        let flag = Arc::clone(&chained);
        let _chain = queue.subscribe(move |event| {
            if matches!(event, SwitchEvent::Success(t) if t.profile_id == "p1")
                && !flag.swap(true, Ordering::SeqCst)
            {
                reentrant.enqueue(instant("p2"));
            }
        });

        queue.enqueue(instant("p1"));
        settle().await;

        assert_eq!(
            *lock(&log),
            vec!["start p1", "success p1", "idle", "start p2", "success p2", "idle"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_receiver_sees_events() {
        let queue = SwitchQueue::new();
        let mut rx = queue.events();

        queue.enqueue(instant("p1"));
        assert_eq!(rx.recv().await.unwrap().to_string(), "start p1");
        let success = rx.recv().await.unwrap();
        assert!(success.task().unwrap().notify_on_success);
        assert_eq!(rx.recv().await.unwrap(), SwitchEvent::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_observer_is_not_called() {
        let queue = SwitchQueue::new();
        let (log, obs) = record(&queue);
        drop(obs);

        queue.enqueue(instant("p1"));
        settle().await;
        assert!(lock(&log).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_enqueues_deliver_every_event() {
        use std::sync::Barrier;
        use std::sync::atomic::AtomicUsize;

        let handle = tokio::runtime::Handle::current();
        for round in 0..2_000 {
            let queue = SwitchQueue::new();
            let seen = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&seen);
            let _obs = queue.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            let barrier = Barrier::new(2);

            std::thread::scope(|scope| {
                for id in ["p1", "p2"] {
                    let (queue, barrier, handle) = (&queue, &barrier, &handle);
                    scope.spawn(move || {
                        let _rt = handle.enter();
                        barrier.wait();
                        queue.enqueue(SwitchTask::new(id, false, || {
                            std::future::pending::<Result<(), CoreError>>()
                        }));
                    });
                }
            });

            // One start and one queued, both delivered once enqueue returns.
            assert_eq!(seen.load(Ordering::SeqCst), 2, "round {round}");
        }
    }
}
