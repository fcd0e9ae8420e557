//! Priority scheduler for thumbnail requests
//!
//! Requests wait in a binary heap ordered by priority, then by submission order.
//! A table keyed by [`CacheKey`] holds the one authoritative pending request per
//! key, so duplicates coalesce and a higher-priority ask can replace a lower one.
//! A higher-priority ask for a key that is already being worked on queues a fresh
//! pass instead. Heap entries that no longer match the table are stale and get skipped.
//!
//! A single worker thread drains the heap. It is spawned on demand by `submit` and
//! exits once the heap is empty, pausing briefly between items so that a burst of
//! requests during fast scrolling doesn't monopolise the machine.

use crate::dispatch::Dispatcher;
use crate::{CacheKey, Completion, Priority, Thumbnail};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Does the actual work for a dequeued request
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &ThumbnailRequest) -> Option<Thumbnail>;
}

/// One outstanding ask for a thumbnail
#[derive(Debug, Clone)]
pub struct ThumbnailRequest {
    id: u64,
    path: PathBuf,
    key: CacheKey,
    priority: Priority,
    created_at: Instant,
}

impl ThumbnailRequest {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// What `submit` did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new request was queued, either for an unknown key or behind lower-priority in-flight work
    Queued,
    /// A lower-priority pending request was replaced
    Replaced,
    /// An equal-or-higher priority request is already pending or in flight
    Coalesced,
}

/// Heap entry. Ids double as submission order since they only ever increase.
#[derive(Debug, Clone)]
struct QueueItem {
    priority: Priority,
    id: u64,
    key: CacheKey,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueueItem {}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then the earlier submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct PendingEntry {
    request: ThumbnailRequest,
    waiters: Vec<Completion>,
}

struct InFlightEntry {
    priority: Priority,
    waiters: Vec<Completion>,
}

/// A key can be in flight and have a higher-priority successor pending at the same time
#[derive(Default)]
struct SchedulerState {
    pending: HashMap<CacheKey, PendingEntry>,
    in_flight: HashMap<CacheKey, InFlightEntry>,
    queue: BinaryHeap<QueueItem>,
    processing: bool,
    next_id: u64,
}

impl SchedulerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_current(&self, item: &QueueItem) -> bool {
        matches!(self.pending.get(&item.key), Some(entry) if entry.request.id == item.id)
    }

    /// Pop heap entries until one still matches its pending entry, and mark it in flight
    fn take_next(&mut self) -> Option<ThumbnailRequest> {
        while let Some(item) = self.queue.pop() {
            if !self.is_current(&item) {
                trace!(key = %item.key, "Skipping stale request");
                continue;
            }

            if let Some(PendingEntry { request, waiters }) = self.pending.remove(&item.key) {
                let priority = request.priority;
                self.in_flight.insert(item.key, InFlightEntry { priority, waiters });
                return Some(request);
            }
        }
        None
    }

    /// Waiters of the finished in-flight request. A pending successor stays queued.
    fn finish(&mut self, key: &CacheKey) -> Vec<Completion> {
        self.in_flight
            .remove(key)
            .map(|entry| entry.waiters)
            .unwrap_or_default()
    }

    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    idle: Condvar,
    handler: Arc<dyn RequestHandler>,
    dispatcher: Arc<dyn Dispatcher>,
    throttle: Duration,
    notify_superseded: bool,
}

/// Coalescing priority scheduler with an on-demand worker
pub struct RequestScheduler {
    shared: Arc<Shared>,
}

impl RequestScheduler {
    pub fn new(
        handler: Arc<dyn RequestHandler>,
        dispatcher: Arc<dyn Dispatcher>,
        throttle: Duration,
        notify_superseded: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                idle: Condvar::new(),
                handler,
                dispatcher,
                throttle,
                notify_superseded,
            }),
        }
    }

    /// Queue a request for `key`, coalescing with any request already known for it.
    ///
    /// Unless superseded-notification is enabled, the completion of a coalesced
    /// request and of a replaced lower-priority request is dropped without being called.
    pub fn submit(
        &self,
        path: PathBuf,
        key: CacheKey,
        priority: Priority,
        completion: Completion,
    ) -> SubmitOutcome {
        let chain = self.shared.notify_superseded;
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        let (outcome, mut waiters) = match state.pending.get_mut(&key) {
            Some(entry) if entry.request.priority >= priority => {
                if chain {
                    entry.waiters.push(completion);
                }
                trace!(key = %key, %priority, existing = %entry.request.priority, "Coalesced with pending request");
                return SubmitOutcome::Coalesced;
            }
            Some(entry) => {
                debug!(key = %key, from = %entry.request.priority, to = %priority, "Raising request priority");
                let orphaned = std::mem::take(&mut entry.waiters);
                (SubmitOutcome::Replaced, if chain { orphaned } else { Vec::new() })
            }
            None => match state.in_flight.get_mut(&key) {
                Some(entry) if entry.priority >= priority => {
                    if chain {
                        entry.waiters.push(completion);
                    }
                    trace!(key = %key, %priority, existing = %entry.priority, "Coalesced with in-flight request");
                    return SubmitOutcome::Coalesced;
                }
                Some(entry) => {
                    // Runs again once the current pass finishes; that pass's callers keep their result
                    debug!(key = %key, from = %entry.priority, to = %priority, "Queued successor to in-flight request");
                    (SubmitOutcome::Queued, Vec::new())
                }
                None => (SubmitOutcome::Queued, Vec::new()),
            },
        };
        waiters.push(completion);

        let id = state.next_id();
        let request = ThumbnailRequest {
            id,
            path,
            key: key.clone(),
            priority,
            created_at: Instant::now(),
        };
        state.queue.push(QueueItem {
            priority,
            id,
            key: key.clone(),
        });
        state.pending.insert(key, PendingEntry { request, waiters });

        if !state.processing {
            state.processing = true;
            drop(guard);
            self.spawn_worker();
        }

        outcome
    }

    /// Drop pending requests for `keys`. In-flight work still completes.
    pub fn cancel<'a>(&self, keys: impl IntoIterator<Item = &'a CacheKey>) -> usize {
        let mut state = self.shared.state.lock();
        let mut cancelled = 0;

        for key in keys {
            if state.pending.remove(key).is_some() {
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            let SchedulerState { pending, queue, .. } = &mut *state;
            queue.retain(|item| matches!(pending.get(&item.key), Some(entry) if entry.request.id == item.id));
            debug!(cancelled, remaining = queue.len(), "Cancelled pending requests");
        }

        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending_count()
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.shared.state.lock().pending.contains_key(key)
    }

    /// True when nothing is queued or being processed
    pub fn is_idle(&self) -> bool {
        !self.shared.state.lock().processing
    }

    /// Block until the worker has drained the queue; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.processing {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return !state.processing;
            }
        }
        true
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("thumbs-worker".to_string())
            .spawn(move || run_worker(shared));

        if let Err(e) = spawned {
            // Requests stay queued; the next submit tries again
            error!(error = %e, "Failed to spawn thumbnail worker");
            self.shared.state.lock().processing = false;
            self.shared.idle.notify_all();
        }
    }
}

fn run_worker(shared: Arc<Shared>) {
    trace!("Thumbnail worker started");
    loop {
        let request = {
            let mut state = shared.state.lock();
            match state.take_next() {
                Some(request) => request,
                None => {
                    state.processing = false;
                    shared.idle.notify_all();
                    break;
                }
            }
        };

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| shared.handler.handle(&request)))
            .unwrap_or_else(|_| {
                error!(path = %request.path.display(), "Thumbnail handler panicked");
                None
            });
        debug!(
            key = %request.key,
            priority = %request.priority,
            found = result.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Serviced thumbnail request"
        );

        let waiters = shared.state.lock().finish(&request.key);
        for waiter in waiters {
            let image = result.clone();
            let job = Box::new(move || waiter(image));
            // Inline completions run on this thread and must not take the worker down
            if panic::catch_unwind(AssertUnwindSafe(|| shared.dispatcher.dispatch(job))).is_err() {
                error!(key = %request.key, "Thumbnail completion panicked");
            }
        }

        if !shared.throttle.is_zero() {
            thread::sleep(shared.throttle);
        }
    }
    trace!("Thumbnail worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{main_thread_queue, InlineDispatcher};
    use image::DynamicImage;
    use std::sync::mpsc::{self, Receiver, Sender};

    const TIMEOUT: Duration = Duration::from_secs(10);

    /// Records the order of handled files; the file named "gate" blocks until released
    #[derive(Default)]
    struct RecordingHandler {
        handled: Mutex<Vec<String>>,
        gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
        failing: Vec<String>,
    }

    impl RecordingHandler {
        fn gated() -> (Arc<Self>, Receiver<()>, Sender<()>) {
            let (started_tx, started_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let handler = Arc::new(Self {
                gate: Mutex::new(Some((started_tx, release_rx))),
                ..Self::default()
            });
            (handler, started_rx, release_tx)
        }

        fn handled(&self) -> Vec<String> {
            self.handled.lock().clone()
        }
    }

    impl RequestHandler for RecordingHandler {
        fn handle(&self, request: &ThumbnailRequest) -> Option<Thumbnail> {
            let name = request.key().file_name().to_string();
            if name == "gate" {
                if let Some((started, release)) = self.gate.lock().take() {
                    let _ = started.send(());
                    let _ = release.recv_timeout(TIMEOUT);
                }
            }
            if name == "panic" {
                panic!("decoder blew up");
            }
            self.handled.lock().push(name.clone());
            if self.failing.contains(&name) {
                None
            } else {
                Some(Arc::new(DynamicImage::new_rgb8(4, 4)))
            }
        }
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::from_path(&path(name))
    }

    fn path(name: &str) -> PathBuf {
        Path::new("/shoot").join(name)
    }

    fn scheduler(handler: Arc<RecordingHandler>, notify_superseded: bool) -> RequestScheduler {
        RequestScheduler::new(handler, Arc::new(InlineDispatcher), Duration::ZERO, notify_superseded)
    }

    /// Completion that records `label` with whether an image arrived
    fn recorder(log: &Arc<Mutex<Vec<(String, bool)>>>, label: &str) -> Completion {
        let log = Arc::clone(log);
        let label = label.to_string();
        Box::new(move |image: Option<Thumbnail>| log.lock().push((label, image.is_some())))
    }

    fn ignore() -> Completion {
        Box::new(|_: Option<Thumbnail>| {})
    }

    fn submit(scheduler: &RequestScheduler, name: &str, priority: Priority, completion: Completion) -> SubmitOutcome {
        scheduler.submit(path(name), key(name), priority, completion)
    }

    /// Submit the gate request and wait until the worker is blocked inside it
    fn hold_worker(scheduler: &RequestScheduler, started: &Receiver<()>) {
        submit(scheduler, "gate", Priority::High, ignore());
        started.recv_timeout(TIMEOUT).expect("worker picked up gate");
    }

    #[test]
    fn test_priority_then_fifo_order() {
        let (handler, started, release) = RecordingHandler::gated();
        let scheduler = scheduler(Arc::clone(&handler), false);
        hold_worker(&scheduler, &started);

        let log = Arc::new(Mutex::new(Vec::new()));
        submit(&scheduler, "low1", Priority::Low, recorder(&log, "low1"));
        submit(&scheduler, "med1", Priority::Medium, recorder(&log, "med1"));
        submit(&scheduler, "high1", Priority::High, recorder(&log, "high1"));
        submit(&scheduler, "med2", Priority::Medium, recorder(&log, "med2"));
        submit(&scheduler, "high2", Priority::High, recorder(&log, "high2"));
        submit(&scheduler, "low2", Priority::Low, recorder(&log, "low2"));

        release.send(()).unwrap();
        assert!(scheduler.wait_idle(TIMEOUT));

        assert_eq!(
            handler.handled(),
            vec!["gate", "high1", "high2", "med1", "med2", "low1", "low2"]
        );
        assert_eq!(log.lock().len(), 6);
    }

    #[test]
    fn test_duplicate_requests_coalesce() {
        let (handler, started, release) = RecordingHandler::gated();
        let scheduler = scheduler(Arc::clone(&handler), false);
        hold_worker(&scheduler, &started);

        let log = Arc::new(Mutex::new(Vec::new()));
        assert_eq!(submit(&scheduler, "a.jpg", Priority::Medium, recorder(&log, "first")), SubmitOutcome::Queued);
        assert_eq!(submit(&scheduler, "a.jpg", Priority::Medium, recorder(&log, "second")), SubmitOutcome::Coalesced);
        assert_eq!(submit(&scheduler, "a.jpg", Priority::Low, recorder(&log, "third")), SubmitOutcome::Coalesced);
        assert_eq!(scheduler.pending_count(), 1);

        release.send(()).unwrap();
        assert!(scheduler.wait_idle(TIMEOUT));

        assert_eq!(handler.handled(), vec!["gate", "a.jpg"]);
        assert_eq!(*log.lock(), vec![("first".to_string(), true)]);
    }

    #[test]
    fn test_coalesced_callers_notified_when_enabled() {
        let (handler, started, release) = RecordingHandler::gated();
        let scheduler = scheduler(Arc::clone(&handler), true);
        hold_worker(&scheduler, &started);

        let log = Arc::new(Mutex::new(Vec::new()));
        submit(&scheduler, "a.jpg", Priority::Medium, recorder(&log, "first"));
        submit(&scheduler, "a.jpg", Priority::Medium, recorder(&log, "second"));

        release.send(()).unwrap();
        assert!(scheduler.wait_idle(TIMEOUT));

        assert_eq!(handler.handled(), vec!["gate", "a.jpg"]);
        assert_eq!(
            *log.lock(),
            vec![("first".to_string(), true), ("second".to_string(), true)]
        );
    }

    #[test]
    fn test_higher_priority_preempts_pending() {
        let (handler, started, release) = RecordingHandler::gated();
        let scheduler = scheduler(Arc::clone(&handler), false);
        hold_worker(&scheduler, &started);

        let log = Arc::new(Mutex::new(Vec::new()));
        submit(&scheduler, "m.jpg", Priority::Medium, recorder(&log, "m"));
        submit(&scheduler, "k.jpg", Priority::Low, recorder(&log, "k-low"));
        assert_eq!(
            submit(&scheduler, "k.jpg", Priority::High, recorder(&log, "k-high")),
            SubmitOutcome::Replaced
        );
        assert_eq!(scheduler.pending_count(), 2);

        release.send(()).unwrap();
        assert!(scheduler.wait_idle(TIMEOUT));

        // K jumps ahead of the medium request and runs exactly once
        assert_eq!(handler.handled(), vec!["gate", "k.jpg", "m.jpg"]);
        assert_eq!(
            *log.lock(),
            vec![("k-high".to_string(), true), ("m".to_string(), true)]
        );
    }

    #[test]
    fn test_preempted_caller_notified_when_enabled() {
        let (handler, started, release) = RecordingHandler::gated();
        let scheduler = scheduler(Arc::clone(&handler), true);
        hold_worker(&scheduler, &started);

        let log = Arc::new(Mutex::new(Vec::new()));
        submit(&scheduler, "k.jpg", Priority::Low, recorder(&log, "k-low"));
        submit(&scheduler, "k.jpg", Priority::High, recorder(&log, "k-high"));

        release.send(()).unwrap();
        assert!(scheduler.wait_idle(TIMEOUT));

        assert_eq!(handler.handled(), vec!["gate", "k.jpg"]);
        assert_eq!(
            *log.lock(),
            vec![("k-low".to_string(), true), ("k-high".to_string(), true)]
        );
    }

    #[test]
    fn test_cancel_pending_request() {
        let (handler, started, release) = RecordingHandler::gated();
        let scheduler = scheduler(Arc::clone(&handler), false);
        hold_worker(&scheduler, &started);

        let log = Arc::new(Mutex::new(Vec::new()));
        submit(&scheduler, "keep.jpg", Priority::Low, recorder(&log, "keep"));
        submit(&scheduler, "drop.jpg", Priority::High, recorder(&log, "drop"));
        assert!(scheduler.is_pending(&key("drop.jpg")));

        assert_eq!(scheduler.cancel([&key("drop.jpg"), &key("unknown.jpg")]), 1);
        assert!(!scheduler.is_pending(&key("drop.jpg")));

        release.send(()).unwrap();
        assert!(scheduler.wait_idle(TIMEOUT));

        assert_eq!(handler.handled(), vec!["gate", "keep.jpg"]);
        assert_eq!(*log.lock(), vec![("keep".to_string(), true)]);
    }

    #[test]
    fn test_cancel_does_not_stop_in_flight_work() {
        let (handler, started, release) = RecordingHandler::gated();
        let scheduler = scheduler(Arc::clone(&handler), false);

        let log = Arc::new(Mutex::new(Vec::new()));
        submit(&scheduler, "gate", Priority::High, recorder(&log, "gate"));
        started.recv_timeout(TIMEOUT).unwrap();

        assert_eq!(scheduler.cancel([&key("gate")]), 0);

        // A duplicate of in-flight work doesn't run it again
        assert_eq!(
            submit(&scheduler, "gate", Priority::High, recorder(&log, "again")),
            SubmitOutcome::Coalesced
        );

        release.send(()).unwrap();
        assert!(scheduler.wait_idle(TIMEOUT));

        assert_eq!(handler.handled(), vec!["gate"]);
        assert_eq!(*log.lock(), vec![("gate".to_string(), true)]);
    }

    /// Low prefetch in flight, then the same key becomes visible
    fn higher_priority_over_in_flight(notify_superseded: bool) -> (Vec<String>, Vec<(String, bool)>) {
        let (handler, started, release) = RecordingHandler::gated();
        let scheduler = scheduler(Arc::clone(&handler), notify_superseded);

        let log = Arc::new(Mutex::new(Vec::new()));
        submit(&scheduler, "gate", Priority::Low, recorder(&log, "low"));
        started.recv_timeout(TIMEOUT).expect("worker picked up gate");

        assert_eq!(
            submit(&scheduler, "gate", Priority::High, recorder(&log, "high")),
            SubmitOutcome::Queued
        );
        assert!(scheduler.is_pending(&key("gate")));

        // Further duplicates coalesce with the queued successor
        assert_eq!(
            submit(&scheduler, "gate", Priority::Medium, recorder(&log, "medium")),
            SubmitOutcome::Coalesced
        );
        assert_eq!(scheduler.pending_count(), 1);

        release.send(()).unwrap();
        assert!(scheduler.wait_idle(TIMEOUT));
        assert!(!scheduler.is_pending(&key("gate")));

        let log = log.lock().clone();
        (handler.handled(), log)
    }

    #[test]
    fn test_higher_priority_requeues_behind_in_flight_work() {
        let (handled, log) = higher_priority_over_in_flight(false);

        assert_eq!(handled, vec!["gate", "gate"]);
        assert_eq!(log, vec![("low".to_string(), true), ("high".to_string(), true)]);
    }

    #[test]
    fn test_higher_priority_over_in_flight_with_notification() {
        let (handled, log) = higher_priority_over_in_flight(true);

        assert_eq!(handled, vec!["gate", "gate"]);
        assert_eq!(
            log,
            vec![
                ("low".to_string(), true),
                ("high".to_string(), true),
                ("medium".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_lower_priority_coalesces_with_in_flight_work() {
        let (handler, started, release) = RecordingHandler::gated();
        let scheduler = scheduler(Arc::clone(&handler), true);

        let log = Arc::new(Mutex::new(Vec::new()));
        submit(&scheduler, "gate", Priority::Medium, recorder(&log, "medium"));
        started.recv_timeout(TIMEOUT).expect("worker picked up gate");

        assert_eq!(
            submit(&scheduler, "gate", Priority::Low, recorder(&log, "low")),
            SubmitOutcome::Coalesced
        );
        assert!(!scheduler.is_pending(&key("gate")));

        release.send(()).unwrap();
        assert!(scheduler.wait_idle(TIMEOUT));

        assert_eq!(handler.handled(), vec!["gate"]);
        assert_eq!(
            *log.lock(),
            vec![("medium".to_string(), true), ("low".to_string(), true)]
        );
    }

    #[test]
    fn test_failures_are_delivered_and_not_remembered() {
        let handler = Arc::new(RecordingHandler {
            failing: vec!["bad.CR2".to_string()],
            ..RecordingHandler::default()
        });
        let scheduler = scheduler(Arc::clone(&handler), false);
        let log = Arc::new(Mutex::new(Vec::new()));

        submit(&scheduler, "bad.CR2", Priority::High, recorder(&log, "try1"));
        assert!(scheduler.wait_idle(TIMEOUT));
        submit(&scheduler, "bad.CR2", Priority::High, recorder(&log, "try2"));
        assert!(scheduler.wait_idle(TIMEOUT));

        assert_eq!(handler.handled(), vec!["bad.CR2", "bad.CR2"]);
        assert_eq!(
            *log.lock(),
            vec![("try1".to_string(), false), ("try2".to_string(), false)]
        );
    }

    #[test]
    fn test_handler_panic_keeps_worker_alive() {
        let handler = Arc::new(RecordingHandler::default());
        let scheduler = scheduler(Arc::clone(&handler), false);
        let log = Arc::new(Mutex::new(Vec::new()));

        submit(&scheduler, "panic", Priority::High, recorder(&log, "panic"));
        submit(&scheduler, "fine.jpg", Priority::Low, recorder(&log, "fine"));
        assert!(scheduler.wait_idle(TIMEOUT));

        let log = log.lock();
        assert!(log.contains(&("panic".to_string(), false)));
        assert!(log.contains(&("fine".to_string(), true)));
    }

    #[test]
    fn test_worker_restarts_after_going_idle() {
        let handler = Arc::new(RecordingHandler::default());
        let scheduler = scheduler(Arc::clone(&handler), false);

        submit(&scheduler, "1.jpg", Priority::Medium, ignore());
        assert!(scheduler.wait_idle(TIMEOUT));
        assert!(scheduler.is_idle());

        submit(&scheduler, "2.jpg", Priority::Medium, ignore());
        assert!(scheduler.wait_idle(TIMEOUT));

        assert_eq!(handler.handled(), vec!["1.jpg", "2.jpg"]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_completions_delivered_through_dispatcher() {
        let handler = Arc::new(RecordingHandler::default());
        let (dispatcher, queue) = main_thread_queue();
        let scheduler = RequestScheduler::new(handler, Arc::new(dispatcher), Duration::from_millis(1), false);

        let caller = thread::current().id();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        for name in ["1.jpg", "2.jpg"] {
            let delivered = Arc::clone(&delivered);
            submit(&scheduler, name, Priority::High, Box::new(move |image: Option<Thumbnail>| {
                assert_eq!(thread::current().id(), caller);
                delivered.lock().push(image.is_some());
            }));
        }

        assert!(scheduler.wait_idle(TIMEOUT));
        assert!(delivered.lock().is_empty());
        assert_eq!(queue.run_until(2, TIMEOUT), 2);
        assert_eq!(*delivered.lock(), vec![true, true]);
    }

    #[test]
    fn test_queue_item_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(QueueItem { priority: Priority::Low, id: 1, key: key("a") });
        heap.push(QueueItem { priority: Priority::High, id: 3, key: key("b") });
        heap.push(QueueItem { priority: Priority::High, id: 2, key: key("c") });
        heap.push(QueueItem { priority: Priority::Medium, id: 4, key: key("d") });

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|item| item.id)).collect();
        assert_eq!(order, vec![2, 3, 4, 1]);
    }
}
