//! The event queue, priority ordering, callback/handler/tracker tables, and
//! the cooperative dispatch loop. The heart of the core, per spec §4.4.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;

#[cfg(feature = "logging")]
use tracing::trace;

use crate::container::Inner;
use crate::dependency::InterfaceHash;
use crate::envelope::EventEnvelope;
use crate::event::{ContinuationEvent, Event, EventBase, Priority, QuitEvent, TypeTag};
use crate::id::{EventId, IdCounter, ServiceId};

/// What a broadcast [`EventHandler`] reports back.
pub enum HandlerOutcome {
    /// This handler consumed the event; the broadcast stops here.
    Handled,
    /// This handler doesn't apply; try the next subscriber.
    Passed,
    /// Pause: resume this iterator later via a re-posted continuation, per
    /// spec §4.4's cooperative-suspension design. Each `false` pulled from
    /// the iterator is a pause point; a `true` means keep going immediately;
    /// exhaustion (`None`) means the handler is done and counts as Handled.
    Yield(Box<dyn Iterator<Item = bool> + Send>),
}

type CompletionFn = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;
type HandlerFn = Arc<dyn Fn(&EventEnvelope) -> HandlerOutcome + Send + Sync>;
type TrackerFn = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct CallbackKey(ServiceId, TypeTag);

/// Key identifying one registration table entry, used to remove it again
/// when the owning [`Registration`] is dropped.
pub(crate) enum RegistrationKey {
    Completion(ServiceId, TypeTag),
    Error(ServiceId, TypeTag),
    Handler(ServiceId, TypeTag),
    Tracker(ServiceId, InterfaceHash),
    UndoTracker(ServiceId, InterfaceHash),
}

/// A scoped registration record. Dropping it removes the entry it guards;
/// it never touches the service itself (spec §3: "weak back-references").
pub struct Registration {
    pub(crate) inner: Weak<Inner>,
    pub(crate) key: RegistrationKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.dispatcher.deregister(&self.key);
        }
    }
}

struct QueuedEvent {
    envelope: EventEnvelope,
}

impl QueuedEvent {
    fn priority(&self) -> Priority {
        self.envelope.as_base().priority
    }

    fn event_id(&self) -> EventId {
        self.envelope.as_base().event_id
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority() == other.priority() && self.event_id() == other.event_id()
    }
}
impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    /// Reversed so `BinaryHeap` (a max-heap) pops the numerically smallest
    /// priority first, ties broken by smallest `event_id` (FIFO within one
    /// priority), per spec §4.4/§5.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority()
            .cmp(&self.priority())
            .then_with(|| other.event_id().cmp(&self.event_id()))
    }
}

/// The queue, priority selector, and callback/handler/tracker invoker.
pub(crate) struct Dispatcher {
    queue: Mutex<BinaryHeap<QueuedEvent>>,
    event_ids: IdCounter,
    quit: AtomicBool,
    priorities: DashMap<ServiceId, Priority, RandomState>,
    active_flags: DashMap<ServiceId, Arc<AtomicBool>, RandomState>,
    completion: DashMap<CallbackKey, CompletionFn, RandomState>,
    error: DashMap<CallbackKey, ErrorFn, RandomState>,
    handlers: DashMap<TypeTag, Vec<(ServiceId, HandlerFn)>, RandomState>,
    request_trackers: DashMap<InterfaceHash, Vec<(ServiceId, TrackerFn)>, RandomState>,
    undo_trackers: DashMap<InterfaceHash, Vec<(ServiceId, TrackerFn)>, RandomState>,
    continuations: DashMap<(ServiceId, TypeTag), PendingContinuation, RandomState>,
}

struct PendingContinuation {
    envelope: EventEnvelope,
    iterator: Box<dyn Iterator<Item = bool> + Send>,
}

/// Outcome of dispatching a single event, reported back to
/// [`crate::container::Container`] so it can route lifecycle events into
/// the relevant [`crate::lifecycle::LifecycleManager`].
pub(crate) enum PopOutcome {
    Empty,
    Event(EventEnvelope),
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            event_ids: IdCounter::new(),
            quit: AtomicBool::new(false),
            priorities: DashMap::with_hasher(RandomState::new()),
            active_flags: DashMap::with_hasher(RandomState::new()),
            completion: DashMap::with_hasher(RandomState::new()),
            error: DashMap::with_hasher(RandomState::new()),
            handlers: DashMap::with_hasher(RandomState::new()),
            request_trackers: DashMap::with_hasher(RandomState::new()),
            undo_trackers: DashMap::with_hasher(RandomState::new()),
            continuations: DashMap::with_hasher(RandomState::new()),
        }
    }

    #[inline]
    pub fn is_quit(&self) -> bool {
        self.quit.load(AtomicOrdering::Acquire)
    }

    pub fn set_priority(&self, service: ServiceId, priority: Priority) {
        self.priorities.insert(service, priority);
    }

    fn priority_of(&self, service: ServiceId) -> Priority {
        self.priorities
            .get(&service)
            .map(|p| *p)
            .unwrap_or_default()
    }

    /// Get-or-create the advisory, lock-free active flag for `service`.
    /// Producers read this (via `Ordering::Acquire`) to decide whether
    /// posting is worthwhile; the container flips it on lifecycle
    /// transitions into/out of `Active`.
    pub fn active_flag(&self, service: ServiceId) -> Arc<AtomicBool> {
        Arc::clone(
            &self
                .active_flags
                .entry(service)
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }

    pub fn mark_active(&self, service: ServiceId, active: bool) {
        self.active_flag(service).store(active, AtomicOrdering::Release);
    }

    fn is_active(&self, service: ServiceId) -> bool {
        self.active_flags
            .get(&service)
            .map(|f| f.load(AtomicOrdering::Acquire))
            .unwrap_or(false)
    }

    // ---------------------------------------------------------------
    // Posting
    // ---------------------------------------------------------------

    fn enqueue(&self, envelope: EventEnvelope) {
        self.queue.lock().push(QueuedEvent { envelope });
    }

    fn next_event_id(&self) -> EventId {
        EventId(self.event_ids.next().wrapping_add(1))
    }

    /// Post at the originator's own priority (spec §4.4: "default priority
    /// = originator's service priority").
    pub fn push<T: Event>(
        &self,
        originator: ServiceId,
        build: impl FnOnce(EventBase) -> T,
    ) -> EventId {
        let priority = self.priority_of(originator);
        self.push_prioritized(originator, priority, build)
    }

    /// Post at an explicit priority.
    pub fn push_prioritized<T: Event>(
        &self,
        originator: ServiceId,
        priority: Priority,
        build: impl FnOnce(EventBase) -> T,
    ) -> EventId {
        if self.is_quit() {
            return EventId::DROPPED;
        }

        let event_id = self.next_event_id();
        let base = EventBase {
            event_id,
            originating_service: originator,
            priority,
        };
        let payload = build(base);

        #[cfg(feature = "logging")]
        trace!(
            target: "service_container",
            event = T::NAME,
            event_id = event_id.get(),
            originator = originator.get(),
            priority = priority.0,
            "posting event"
        );

        self.enqueue(EventEnvelope::construct(payload));

        if T::TYPE_TAG == QuitEvent::TYPE_TAG {
            self.quit.store(true, AtomicOrdering::Release);
        }

        event_id
    }

    /// Identical semantics to [`push`](Self::push); callable only from the
    /// consumer thread (the dispatch loop). Exists as a distinct entry
    /// point so a service's own event handler can post without incurring
    /// the bookkeeping a producer on another thread would need.
    ///
    /// # Safety-by-convention
    ///
    /// Calling this from any thread other than the one driving
    /// [`Container::run`](crate::Container::run) is a logic error (it is
    /// not memory-unsafe, merely against the single-consumer contract).
    pub fn push_thread_unsafe<T: Event>(
        &self,
        originator: ServiceId,
        build: impl FnOnce(EventBase) -> T,
    ) -> EventId {
        self.push(originator, build)
    }

    // ---------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------

    pub fn register_completion<F>(
        &self,
        container: Weak<Inner>,
        service: ServiceId,
        type_tag: TypeTag,
        f: F,
    ) -> Registration
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.completion.insert(CallbackKey(service, type_tag), Arc::new(f));
        Registration {
            inner: container,
            key: RegistrationKey::Completion(service, type_tag),
        }
    }

    pub fn register_error<F>(
        &self,
        container: Weak<Inner>,
        service: ServiceId,
        type_tag: TypeTag,
        f: F,
    ) -> Registration
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.error.insert(CallbackKey(service, type_tag), Arc::new(f));
        Registration {
            inner: container,
            key: RegistrationKey::Error(service, type_tag),
        }
    }

    /// Register a broadcast handler. A service may appear only once per
    /// event type (spec §4.4).
    pub fn register_handler<F>(
        &self,
        container: Weak<Inner>,
        service: ServiceId,
        type_tag: TypeTag,
        f: F,
    ) -> Registration
    where
        F: Fn(&EventEnvelope) -> HandlerOutcome + Send + Sync + 'static,
    {
        let mut list = self.handlers.entry(type_tag).or_default();
        if !list.iter().any(|(id, _)| *id == service) {
            list.push((service, Arc::new(f)));
        }
        Registration {
            inner: container,
            key: RegistrationKey::Handler(service, type_tag),
        }
    }

    /// Register a dependency tracker for `interface`. `replay` is the set
    /// of synthesized `DependencyRequestEvent`s for outstanding requests the
    /// container built from the current dependency graph; they are
    /// delivered to `on_request` immediately so a late tracker sees already
    /// pending needs (spec §4.4).
    #[allow(clippy::too_many_arguments)]
    pub fn register_dependency_tracker<FReq, FUndo>(
        &self,
        container: Weak<Inner>,
        service: ServiceId,
        interface: InterfaceHash,
        on_request: FReq,
        on_undo_request: FUndo,
        replay: Vec<EventEnvelope>,
    ) -> Registration
    where
        FReq: Fn(&EventEnvelope) + Send + Sync + 'static,
        FUndo: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let on_request: TrackerFn = Arc::new(on_request);
        self.request_trackers
            .entry(interface)
            .or_default()
            .push((service, Arc::clone(&on_request)));
        self.undo_trackers
            .entry(interface)
            .or_default()
            .push((service, Arc::new(on_undo_request)));

        for envelope in &replay {
            on_request(envelope);
        }

        Registration {
            inner: container,
            key: RegistrationKey::Tracker(service, interface),
        }
    }

    fn deregister(&self, key: &RegistrationKey) {
        match key {
            RegistrationKey::Completion(service, tag) => {
                self.completion.remove(&CallbackKey(*service, *tag));
            }
            RegistrationKey::Error(service, tag) => {
                self.error.remove(&CallbackKey(*service, *tag));
            }
            RegistrationKey::Handler(service, tag) => {
                if let Some(mut list) = self.handlers.get_mut(tag) {
                    list.retain(|(id, _)| id != service);
                }
            }
            RegistrationKey::Tracker(service, interface) => {
                if let Some(mut list) = self.request_trackers.get_mut(interface) {
                    list.retain(|(id, _)| id != service);
                }
                if let Some(mut list) = self.undo_trackers.get_mut(interface) {
                    list.retain(|(id, _)| id != service);
                }
            }
            RegistrationKey::UndoTracker(service, interface) => {
                if let Some(mut list) = self.undo_trackers.get_mut(interface) {
                    list.retain(|(id, _)| id != service);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------

    pub fn pop(&self) -> PopOutcome {
        match self.queue.lock().pop() {
            Some(queued) => PopOutcome::Event(queued.envelope),
            None => PopOutcome::Empty,
        }
    }

    /// Deliver `envelope` to dependency trackers registered for
    /// `interface`, in registration order.
    pub fn deliver_to_request_trackers(&self, interface: InterfaceHash, envelope: &EventEnvelope) {
        let snapshot: Vec<TrackerFn> = self
            .request_trackers
            .get(&interface)
            .map(|list| list.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();
        for f in snapshot {
            f(envelope);
        }
    }

    pub fn deliver_to_undo_trackers(&self, interface: InterfaceHash, envelope: &EventEnvelope) {
        let snapshot: Vec<TrackerFn> = self
            .undo_trackers
            .get(&interface)
            .map(|list| list.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();
        for f in snapshot {
            f(envelope);
        }
    }

    /// Broadcast `envelope` to subscribers of its type tag. Stops at the
    /// first handler that reports `Handled`; skips subscribers whose
    /// service isn't currently `Active` (spec §4.4). Fires the
    /// originator's completion callback once resolved, unless a handler
    /// paused the broadcast with [`HandlerOutcome::Yield`] — in that case
    /// completion waits for [`Self::resume_continuation`].
    pub fn broadcast(&self, envelope: EventEnvelope) {
        let tag = envelope.type_tag();
        let snapshot: Vec<(ServiceId, HandlerFn)> = self
            .handlers
            .get(&tag)
            .map(|list| list.iter().map(|(id, f)| (*id, Arc::clone(f))).collect())
            .unwrap_or_default();

        let mut envelope = Some(envelope);
        for (service, handler) in snapshot {
            if !self.is_active(service) {
                continue;
            }
            let outcome = handler(envelope.as_ref().expect("envelope retained until paused"));
            match outcome {
                HandlerOutcome::Handled => break,
                HandlerOutcome::Passed => continue,
                HandlerOutcome::Yield(iter) => {
                    let taken = envelope.take().expect("envelope present for yielding handler");
                    if let Some(resumed) = self.drive_continuation(service, tag, taken, iter) {
                        envelope = Some(resumed);
                    }
                    break;
                }
            }
        }

        if let Some(envelope) = envelope {
            self.deliver_completion(&envelope);
        }
    }

    /// Pull from a freshly yielded iterator until it pauses (`false`) or
    /// exhausts. Returns the envelope back if the sequence ran to
    /// completion without ever pausing; returns `None` once it has stored
    /// a continuation and reposted a [`ContinuationEvent`].
    fn drive_continuation(
        &self,
        service: ServiceId,
        tag: TypeTag,
        envelope: EventEnvelope,
        mut iterator: Box<dyn Iterator<Item = bool> + Send>,
    ) -> Option<EventEnvelope> {
        for cont in iterator.by_ref() {
            if !cont {
                self.continuations
                    .insert((service, tag), PendingContinuation { envelope, iterator });
                self.push_prioritized(service, self.priority_of(service), |base| ContinuationEvent {
                    base,
                    handler_service: service,
                    resumed_event_type: tag,
                });
                return None;
            }
        }
        Some(envelope)
    }

    /// Resume a paused handler. Returns the original envelope once the
    /// handler's sequence has fully exhausted, so the caller can finish
    /// dispatch (trackers/completion) for it.
    pub fn resume_continuation(&self, service: ServiceId, tag: TypeTag) -> Option<EventEnvelope> {
        let Some((_, pending)) = self.continuations.remove(&(service, tag)) else {
            return None;
        };
        let PendingContinuation { envelope, mut iterator } = pending;

        for cont in iterator.by_ref() {
            if !cont {
                self.continuations
                    .insert((service, tag), PendingContinuation { envelope, iterator });
                self.push_prioritized(service, self.priority_of(service), |base| ContinuationEvent {
                    base,
                    handler_service: service,
                    resumed_event_type: tag,
                });
                return None;
            }
        }
        Some(envelope)
    }

    /// Route an error: delivered only to the originator's error callback,
    /// and only while the originator is still `Active` (spec §4.4 step 1).
    pub fn deliver_error(&self, envelope: &EventEnvelope) {
        let base = envelope.as_base();
        if base.originating_service.is_system() {
            return;
        }
        if !self.is_active(base.originating_service) {
            return;
        }
        let key = CallbackKey(base.originating_service, envelope.type_tag());
        if let Some(f) = self.error.get(&key).map(|e| Arc::clone(&e)) {
            f(envelope);
        }
    }

    /// Fire the completion callback registered for `(service, type_tag)`,
    /// bypassing the `Active`-only gate that [`Dispatcher::deliver_completion`]
    /// applies to originator-keyed events.
    ///
    /// Lifecycle transitions are the one case where that gate is wrong: a
    /// `StopService` completion must still reach a callback registered by
    /// the very service the stop just moved *out of* `Active`, and a
    /// `RemoveService` completion fires after the service is gone from the
    /// table entirely. The container uses this for exactly those three
    /// event types, keyed by the transition's target rather than the
    /// event's `originating_service` (spec §8's retry-start property: only
    /// the attempt that actually settles the transition fires once).
    pub fn deliver_lifecycle_completion(
        &self,
        service: ServiceId,
        type_tag: TypeTag,
        envelope: &EventEnvelope,
    ) {
        let key = CallbackKey(service, type_tag);
        if let Some(f) = self.completion.get(&key).map(|c| Arc::clone(&c)) {
            f(envelope);
        }
    }

    /// Fire the completion callback registered by `envelope`'s originator,
    /// unless the originator is no longer `Active` (spec §4.4 step 5).
    pub fn deliver_completion(&self, envelope: &EventEnvelope) {
        let base = envelope.as_base();
        if base.originating_service.is_system() {
            return;
        }
        if !self.is_active(base.originating_service) {
            return;
        }
        let key = CallbackKey(base.originating_service, envelope.type_tag());
        if let Some(f) = self.completion.get(&key).map(|c| Arc::clone(&c)) {
            f(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StartServiceEvent;

    fn make_event(id: u64, priority: u32) -> QueuedEvent {
        let base = EventBase {
            event_id: EventId(id),
            originating_service: ServiceId::SYSTEM,
            priority: Priority(priority),
        };
        QueuedEvent {
            envelope: EventEnvelope::construct(StartServiceEvent {
                base,
                target: ServiceId(1),
            }),
        }
    }

    #[test]
    fn heap_pops_smallest_priority_first() {
        let mut heap = BinaryHeap::new();
        heap.push(make_event(1, 100));
        heap.push(make_event(2, 10));

        let first = heap.pop().unwrap();
        assert_eq!(first.priority(), Priority(10));
    }

    #[test]
    fn heap_breaks_ties_by_event_id() {
        let mut heap = BinaryHeap::new();
        heap.push(make_event(5, 50));
        heap.push(make_event(2, 50));

        let first = heap.pop().unwrap();
        assert_eq!(first.event_id(), EventId(2));
    }

    #[test]
    fn dispatcher_push_allocates_strictly_increasing_ids() {
        let dispatcher = Dispatcher::new();
        let a = dispatcher.push(ServiceId::SYSTEM, |base| StartServiceEvent {
            base,
            target: ServiceId(1),
        });
        let b = dispatcher.push(ServiceId::SYSTEM, |base| StartServiceEvent {
            base,
            target: ServiceId(1),
        });
        assert!(a.get() < b.get());
    }

    #[test]
    fn push_after_quit_is_dropped() {
        let dispatcher = Dispatcher::new();
        dispatcher.push(ServiceId::SYSTEM, |base| QuitEvent { base });
        assert!(dispatcher.is_quit());

        let id = dispatcher.push(ServiceId::SYSTEM, |base| StartServiceEvent {
            base,
            target: ServiceId(1),
        });
        assert!(id.is_dropped());
    }

    #[test]
    fn completion_skipped_when_originator_not_active() {
        let dispatcher = Dispatcher::new();
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let container = Weak::new();
        let _reg = dispatcher.register_completion(
            container,
            ServiceId(1),
            StartServiceEvent::TYPE_TAG,
            move |_| flag.store(true, AtomicOrdering::SeqCst),
        );

        let base = EventBase {
            event_id: EventId(1),
            originating_service: ServiceId(1),
            priority: Priority::default(),
        };
        let envelope = EventEnvelope::construct(StartServiceEvent {
            base,
            target: ServiceId(1),
        });

        // Service 1 was never marked active.
        dispatcher.deliver_completion(&envelope);
        assert!(!called.load(AtomicOrdering::SeqCst));

        dispatcher.mark_active(ServiceId(1), true);
        dispatcher.deliver_completion(&envelope);
        assert!(called.load(AtomicOrdering::SeqCst));
    }
}
