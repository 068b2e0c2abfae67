//! # Event Service
//!
//! Process-wide dispatcher for storage events.
//!
//! ```text
//!  send() ──► ┌──────────────────────────┐  permit  ┌──────────────────┐
//!             │ run queue (≤ queue_depth) │ ───────► │ dispatch thread  │
//!             └──────────────────────────┘          └────────┬─────────┘
//!                   ▲                                        │ deliver_event()
//!                   │ requeue (MoreProcessingRequired)       ▼
//!             ┌─────┴────────────────────┐          ┌──────────────────┐
//!             │ completion unwinding     │ ◄─────── │   EventTarget    │
//!             └──────────────────────────┘ Complete └──────────────────┘
//! ```
//!
//! Exactly one thread delivers events. Each permit authorizes popping one
//! event; a completion that needs another hop puts the event back on the run
//! queue instead of recursing. The run queue, the permit count and the
//! in-flight slot share one lock.

use parking_lot::{Condvar, Mutex, RwLock};
use shared_types::{EventStatus, ObjectId, ServerId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

use crate::config::EventServiceConfig;
use crate::error::EventServiceError;
use crate::events::{Event, EventState, EventType};
use crate::metrics::{EventServiceMetrics, EventServiceMetricsSnapshot};
use crate::pool::EventPool;
use crate::stack::CompletionStatus;

/// Receiver of dispatched events, one per transport server.
pub trait EventTarget: Send + Sync {
    /// Handle one hop of `event`. Called on the dispatch thread only.
    fn deliver_event(&self, event: &mut Event) -> EventDisposition;
}

/// What the dispatcher does with an event after delivery returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Unwind the stack and run completions.
    Complete,
    /// The event was retargeted; put it back on the run queue.
    Requeue,
}

/// Result of [`EventService::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Rejected and completed inline with this status.
    Completed(EventStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    New,
    Requeue,
}

#[derive(Debug, Default, Clone, Copy)]
struct InFlightSlot {
    server: Option<ServerId>,
    object: Option<ObjectId>,
}

impl InFlightSlot {
    fn occupancy(&self) -> usize {
        usize::from(self.server.is_some())
    }
}

struct RunState {
    queue: VecDeque<Event>,
    permits: usize,
    in_flight: InFlightSlot,
    phase: Phase,
}

struct Shared {
    config: EventServiceConfig,
    run: Mutex<RunState>,
    signal: Condvar,
    targets: RwLock<HashMap<ServerId, Weak<dyn EventTarget>>>,
    pool: EventPool,
    metrics: EventServiceMetrics,
}

/// Single-threaded event dispatcher. Shared by handle with every transport
/// server that raises or receives events.
pub struct EventService {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventService {
    pub fn new(config: EventServiceConfig) -> Result<Self, EventServiceError> {
        config.validate()?;
        let pool = EventPool::new(config.pool_size);
        let queue = VecDeque::with_capacity(config.queue_depth.min(1024));
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                run: Mutex::new(RunState {
                    queue,
                    permits: 0,
                    in_flight: InFlightSlot::default(),
                    phase: Phase::Idle,
                }),
                signal: Condvar::new(),
                targets: RwLock::new(HashMap::new()),
                pool,
                metrics: EventServiceMetrics::new(),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Build, start and share a service in one step.
    pub fn spawn(config: EventServiceConfig) -> Result<Arc<Self>, EventServiceError> {
        let service = Arc::new(Self::new(config)?);
        service.start()?;
        Ok(service)
    }

    /// Spawn the dispatch thread. A service starts once.
    pub fn start(&self) -> Result<(), EventServiceError> {
        {
            let mut run = self.shared.run.lock();
            if run.phase != Phase::Idle {
                return Err(EventServiceError::AlreadyStarted);
            }
            run.phase = Phase::Running;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || run_worker(&shared));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                info!(
                    queue_depth = self.shared.config.queue_depth,
                    "Event service started"
                );
                Ok(())
            }
            Err(e) => {
                self.shared.run.lock().phase = Phase::Idle;
                Err(EventServiceError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Refuse new events, let the dispatch thread drain the run queue, then
    /// join it.
    pub fn stop(&self) -> Result<(), EventServiceError> {
        {
            let mut run = self.shared.run.lock();
            if run.phase != Phase::Running {
                return Err(EventServiceError::NotInitialized);
            }
            run.phase = Phase::Stopping;
        }
        self.shared.signal.notify_all();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            // Stopping from inside a delivery must not join itself.
            if handle.thread().id() != thread::current().id() {
                handle
                    .join()
                    .map_err(|_| EventServiceError::WorkerPanicked)?;
                self.shared.run.lock().phase = Phase::Stopped;
            }
        }
        info!("Event service stopped");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.run.lock().phase == Phase::Running
    }

    /// Submit an event for dispatch.
    ///
    /// Events that cannot be queued are completed inline: their completions
    /// run on the caller's thread before this returns.
    pub fn send(&self, event: Event) -> SendOutcome {
        match self.shared.admit(event, Admission::New) {
            Ok(()) => {
                EventServiceMetrics::bump(&self.shared.metrics.sent);
                SendOutcome::Queued
            }
            Err((mut event, status)) => {
                EventServiceMetrics::bump(&self.shared.metrics.rejected);
                debug!(event = %event.id(), ?status, "Event rejected at send");
                event.set_status(status);
                self.shared.complete(event);
                SendOutcome::Completed(status)
            }
        }
    }

    /// Draw an event from the pool.
    pub fn allocate_event(&self, event_type: EventType) -> Event {
        self.shared.pool.allocate(event_type)
    }

    /// Return an event that was allocated but never sent.
    pub fn release_event(&self, event: Event) {
        self.shared.pool.release(event);
    }

    pub fn register_target(&self, server: ServerId, target: Weak<dyn EventTarget>) {
        self.shared.targets.write().insert(server, target);
        trace!(%server, "Event target registered");
    }

    pub fn unregister_target(&self, server: ServerId) {
        self.shared.targets.write().remove(&server);
        trace!(%server, "Event target unregistered");
    }

    /// Record the client object the in-flight event is being handed to.
    pub fn set_in_flight_object(&self, object: ObjectId) {
        self.shared.run.lock().in_flight.object = Some(object);
    }

    pub fn clear_in_flight_object(&self) {
        self.shared.run.lock().in_flight.object = None;
    }

    /// Events queued for `server`, plus one if it is being serviced now.
    #[must_use]
    pub fn pending_event_count(&self, server: ServerId) -> usize {
        let run = self.shared.run.lock();
        let in_flight = usize::from(run.in_flight.server == Some(server));
        in_flight
            + run
                .queue
                .iter()
                .filter(|event| event.server() == Some(server))
                .count()
    }

    /// Best effort: is an event being delivered to, or queued for, `object`.
    #[must_use]
    pub fn is_object_event_outstanding(&self, object: ObjectId) -> bool {
        let run = self.shared.run.lock();
        run.in_flight.object == Some(object)
            || run.queue.iter().any(|event| event.object_id() == object)
    }

    /// Mark every queued event for `server` canceled. The dispatch thread
    /// completes them without delivery. Returns the number marked.
    pub fn cancel_events_for(&self, server: ServerId) -> usize {
        let mut run = self.shared.run.lock();
        let mut canceled = 0;
        for event in run.queue.iter_mut() {
            if event.server() == Some(server) && event.cancel() {
                canceled += 1;
            }
        }
        drop(run);

        if canceled > 0 {
            self.shared
                .metrics
                .canceled
                .fetch_add(canceled as u64, std::sync::atomic::Ordering::Relaxed);
            debug!(%server, canceled, "Queued events canceled");
        }
        canceled
    }

    /// Events on the run queue, excluding the one in flight.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.run.lock().queue.len()
    }

    #[must_use]
    pub fn config(&self) -> &EventServiceConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn pool(&self) -> &EventPool {
        &self.shared.pool
    }

    #[must_use]
    pub fn metrics(&self) -> EventServiceMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Drop for EventService {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!(error = %e, "Event service stop on drop failed");
            }
        }
    }
}

impl Shared {
    /// Validate and enqueue. Hands the event back with a status on refusal.
    fn admit(&self, mut event: Event, admission: Admission) -> Result<(), (Event, EventStatus)> {
        let mut run = self.run.lock();

        let accepting = match admission {
            Admission::New => run.phase == Phase::Running,
            Admission::Requeue => matches!(run.phase, Phase::Running | Phase::Stopping),
        };
        if !accepting {
            return Err((event, EventStatus::NotInitialized));
        }
        if event.is_malformed() {
            return Err((event, EventStatus::GenericFailure));
        }
        if event.server().is_none() {
            return Err((event, EventStatus::InvalidEvent));
        }

        // A requeued event is the in-flight one and already holds its slot.
        let occupied = match admission {
            Admission::New => run.queue.len() + run.in_flight.occupancy(),
            Admission::Requeue => run.queue.len(),
        };
        if occupied >= self.config.queue_depth {
            return Err((event, EventStatus::Busy));
        }

        event.transition(EventState::Queued);
        run.queue.push_back(event);
        run.permits += 1;
        drop(run);

        self.signal.notify_one();
        Ok(())
    }

    fn lookup(&self, server: ServerId) -> Option<Arc<dyn EventTarget>> {
        self.targets.read().get(&server).and_then(Weak::upgrade)
    }

    fn dispatch(&self, mut event: Event) {
        if event.is_canceled() {
            trace!(event = %event.id(), "Skipping delivery of canceled event");
            self.complete(event);
            return;
        }

        event.transition(EventState::InProgress);
        let Some(target) = event.server().and_then(|server| self.lookup(server)) else {
            warn!(event = %event.id(), server = ?event.server(), "No target for event");
            event.set_status(EventStatus::GenericFailure);
            self.complete(event);
            return;
        };

        EventServiceMetrics::bump(&self.metrics.dispatched);
        match target.deliver_event(&mut event) {
            EventDisposition::Complete => self.complete(event),
            EventDisposition::Requeue => self.requeue(event),
        }
    }

    fn requeue(&self, event: Event) {
        match self.admit(event, Admission::Requeue) {
            Ok(()) => EventServiceMetrics::bump(&self.metrics.requeued),
            Err((mut event, status)) => {
                warn!(event = %event.id(), ?status, "Requeue refused");
                event.set_status(status);
                self.complete(event);
            }
        }
    }

    /// Pop frames and run their completions until one asks for more
    /// processing or the stack is empty.
    fn complete(&self, mut event: Event) {
        while let Some(frame) = event.pop_frame() {
            let Some(completion) = frame.completion() else {
                continue;
            };
            if completion.on_complete(&mut event, &frame) == CompletionStatus::Done {
                continue;
            }
            if event.is_canceled() {
                continue;
            }
            match self.admit(event, Admission::Requeue) {
                Ok(()) => {
                    EventServiceMetrics::bump(&self.metrics.requeued);
                    return;
                }
                Err((returned, status)) => {
                    event = returned;
                    warn!(event = %event.id(), ?status, "Requeue from completion refused");
                    event.set_status(status);
                }
            }
        }

        if !event.is_canceled() {
            event.state = EventState::Completed;
        }
        EventServiceMetrics::bump(&self.metrics.completed);
        trace!(event = %event.id(), status = ?event.status(), "Event finished");
        self.pool.release(event);
    }
}

fn run_worker(shared: &Shared) {
    debug!("Event dispatch thread running");
    loop {
        let event = {
            let mut run = shared.run.lock();
            while run.permits == 0 && run.phase == Phase::Running {
                shared.signal.wait(&mut run);
            }
            if run.permits == 0 {
                break;
            }
            run.permits -= 1;
            let Some(event) = run.queue.pop_front() else {
                continue;
            };
            run.in_flight.server = event.server();
            event
        };

        shared.dispatch(event);

        shared.run.lock().in_flight = InFlightSlot::default();
    }
    debug!("Event dispatch thread exiting");
}
