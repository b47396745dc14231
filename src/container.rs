//! The container: owns every service, every lifecycle manager, and the
//! dispatcher, and ties lifecycle events to lifecycle-manager transitions
//! per spec §4.5.

use std::sync::{Arc, Weak};

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;

#[cfg(feature = "logging")]
use tracing::{debug, error, warn};

use crate::channel::CommunicationChannel;
use crate::dependency::{Dependency, DependencyRegistry, InterfaceHash};
use crate::dispatcher::{Dispatcher, HandlerOutcome, PopOutcome, Registration};
use crate::envelope::EventEnvelope;
use crate::event::{
    ContinuationEvent, DependencyRequestEvent, DependencyUndoRequestEvent, Event, EventBase,
    Priority, QuitEvent, RemoveServiceEvent, StartServiceEvent, StopServiceEvent, TypeTag,
    UnrecoverableErrorEvent,
};
use crate::id::{ContainerId, EventId, IdCounter, ServiceId};
use crate::lifecycle::{LifecycleAction, LifecycleManager, ServiceState, StartStopOutcome};
use crate::properties::Properties;
use crate::service::{ContainerHandle, Service};

/// The container's shared, reference-counted state. `Container` and every
/// [`ContainerHandle`] hold either a strong or weak pointer to this; it is
/// never exposed directly.
pub struct Inner {
    id: ContainerId,
    self_weak: Weak<Inner>,
    service_ids: IdCounter,
    dispatcher: Dispatcher,
    managers: DashMap<ServiceId, Mutex<LifecycleManager>, RandomState>,
    services: DashMap<ServiceId, Mutex<Box<dyn Service>>, RandomState>,
    provides: DashMap<ServiceId, Vec<InterfaceHash>, RandomState>,
    properties: DashMap<ServiceId, Arc<Properties>, RandomState>,
    published: DashMap<InterfaceHash, Vec<ServiceId>, RandomState>,
    channel: Option<Arc<dyn CommunicationChannel>>,
}

/// A dependency-driven lifecycle engine and prioritized event dispatcher
/// hosting a set of [`Service`]s in one process. Cheap to clone: it is a
/// thin handle around an [`Arc`] of the shared state.
#[derive(Clone)]
pub struct Container {
    pub(crate) inner: Arc<Inner>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Self::with_channel(None)
    }

    /// Build a container wired to a [`CommunicationChannel`] for
    /// cross-container routing.
    pub fn with_channel(channel: Option<Arc<dyn CommunicationChannel>>) -> Self {
        let inner = Arc::new_cyclic(|weak| Inner {
            id: ContainerId::next(),
            self_weak: weak.clone(),
            service_ids: IdCounter::new(),
            dispatcher: Dispatcher::new(),
            managers: DashMap::with_hasher(RandomState::new()),
            services: DashMap::with_hasher(RandomState::new()),
            provides: DashMap::with_hasher(RandomState::new()),
            properties: DashMap::with_hasher(RandomState::new()),
            published: DashMap::with_hasher(RandomState::new()),
            channel,
        });
        Self { inner }
    }

    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    /// The attached cross-container transport, if any.
    pub fn channel(&self) -> Option<&Arc<dyn CommunicationChannel>> {
        self.inner.channel.as_ref()
    }

    fn handle(&self, owner: ServiceId) -> ContainerHandle {
        ContainerHandle {
            inner: Weak::clone(&self.inner.self_weak),
            owner,
        }
    }

    // -----------------------------------------------------------------
    // Registration (spec §4.5's service factory sequence)
    // -----------------------------------------------------------------

    /// Register a service. `provides` lists the interfaces it offers once
    /// `Active`; `dependencies` lists what it needs. Implements the five
    /// steps from spec §4.5:
    ///
    /// 1. allocate a [`ServiceId`]
    /// 2. construct the [`LifecycleManager`] and the service
    /// 3. synchronously offer it every currently-`Active` provider that
    ///    passes its filter
    /// 4. post one `DependencyRequestEvent` per still-outstanding
    ///    dependency (optional slots first, then required)
    /// 5. post `StartServiceEvent`
    pub fn register<T: Service>(
        &self,
        properties: Properties,
        provides: Vec<InterfaceHash>,
        dependencies: Vec<Dependency>,
    ) -> ServiceId {
        let id = ServiceId(self.inner.service_ids.next());

        let mut registry = DependencyRegistry::new();
        for dep in &dependencies {
            registry.declare(dep.interface, dep.interface_version, dep.required);
        }

        let properties = Arc::new(properties);

        // Step 3: synchronous offers from already-active providers.
        let mut accepted: Vec<(InterfaceHash, ServiceId)> = Vec::new();
        for dep in &dependencies {
            let Some(candidates) = self.inner.published.get(&dep.interface) else {
                continue;
            };
            for provider in candidates.iter().copied() {
                let Some(provider_props) = self.inner.properties.get(&provider) else {
                    continue;
                };
                if registry.offer(dep.interface, provider, &provider_props, &properties) {
                    accepted.push((dep.interface, provider));
                }
            }
        }

        let handle = self.handle(id);
        let service = T::new(registry.clone(), (*properties).clone(), handle);

        self.inner.dispatcher.set_priority(id, Priority::INTERNAL);
        self.inner.properties.insert(id, Arc::clone(&properties));
        self.inner.provides.insert(id, provides);
        self.inner
            .services
            .insert(id, Mutex::new(Box::new(service) as Box<dyn Service>));

        for (interface, provider) in &accepted {
            if let Some(svc) = self.inner.services.get(&id) {
                let provider_props = self.inner.properties.get(provider);
                if let Some(provider_props) = provider_props {
                    svc.lock().on_dependency_added(*interface, *provider, &provider_props);
                }
            }
        }

        let manager = LifecycleManager::new(id, registry);
        let outstanding: Vec<Dependency> = manager.registry().declared().to_vec();
        self.inner.managers.insert(id, Mutex::new(manager));

        // Step 4: post a DependencyRequestEvent per outstanding slot,
        // optional first, then required (spec §4.4 ordering note).
        let mut optional: Vec<&Dependency> = outstanding.iter().filter(|d| !d.required).collect();
        let mut required: Vec<&Dependency> = outstanding.iter().filter(|d| d.required).collect();
        optional.retain(|d| !self.has_manager_provider(id, d.interface));
        required.retain(|d| !self.has_manager_provider(id, d.interface));
        for dep in optional.into_iter().chain(required) {
            let dep = *dep;
            let requester_properties = (*properties).clone();
            self.inner.dispatcher.push(id, move |base| DependencyRequestEvent {
                base,
                requester: id,
                dependency: dep,
                requester_properties,
            });
        }

        // Step 5: kick off starting if already satisfied.
        if self.manager_state(id) == Some(ServiceState::Resolved) {
            self.inner
                .dispatcher
                .push(ServiceId::SYSTEM, |base| StartServiceEvent { base, target: id });
        }

        #[cfg(feature = "logging")]
        debug!(target: "service_container", service = id.get(), "registered");

        id
    }

    fn has_manager_provider(&self, service: ServiceId, interface: InterfaceHash) -> bool {
        self.inner
            .managers
            .get(&service)
            .is_some_and(|m| m.lock().registry().has_provider(interface))
    }

    fn manager_state(&self, service: ServiceId) -> Option<ServiceState> {
        self.inner.managers.get(&service).map(|m| m.lock().state())
    }

    /// The current lifecycle state of `service`, or `None` if it was never
    /// registered or has since been removed (spec §3's `UNKNOWN`/absent
    /// distinction collapses to `None` here since a removed service carries
    /// no further identity worth exposing).
    pub fn state_of(&self, service: ServiceId) -> Option<ServiceState> {
        self.manager_state(service)
    }

    // -----------------------------------------------------------------
    // Posting
    // -----------------------------------------------------------------

    pub fn post<T: Event>(&self, originator: ServiceId, build: impl FnOnce(EventBase) -> T) -> EventId {
        self.inner.dispatcher.push(originator, build)
    }

    pub fn post_prioritized<T: Event>(
        &self,
        originator: ServiceId,
        priority: Priority,
        build: impl FnOnce(EventBase) -> T,
    ) -> EventId {
        self.inner.dispatcher.push_prioritized(originator, priority, build)
    }

    // -----------------------------------------------------------------
    // Registration of callbacks, handlers, trackers
    // -----------------------------------------------------------------

    pub fn register_completion<F>(&self, service: ServiceId, type_tag: TypeTag, f: F) -> Registration
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.inner
            .dispatcher
            .register_completion(Weak::clone(&self.inner.self_weak), service, type_tag, f)
    }

    pub fn register_error<F>(&self, service: ServiceId, type_tag: TypeTag, f: F) -> Registration
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.inner
            .dispatcher
            .register_error(Weak::clone(&self.inner.self_weak), service, type_tag, f)
    }

    pub fn register_handler<F>(&self, service: ServiceId, type_tag: TypeTag, f: F) -> Registration
    where
        F: Fn(&EventEnvelope) -> HandlerOutcome + Send + Sync + 'static,
    {
        self.inner
            .dispatcher
            .register_handler(Weak::clone(&self.inner.self_weak), service, type_tag, f)
    }

    /// Register a dependency tracker, replaying synthesized
    /// `DependencyRequestEvent`s for every currently-outstanding request on
    /// `interface` (spec §4.4's late-tracker replay).
    pub fn register_dependency_tracker<FReq, FUndo>(
        &self,
        service: ServiceId,
        interface: InterfaceHash,
        on_request: FReq,
        on_undo_request: FUndo,
    ) -> Registration
    where
        FReq: Fn(&EventEnvelope) + Send + Sync + 'static,
        FUndo: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let replay = self.outstanding_dependency_requests(interface);
        self.inner.dispatcher.register_dependency_tracker(
            Weak::clone(&self.inner.self_weak),
            service,
            interface,
            on_request,
            on_undo_request,
            replay,
        )
    }

    fn outstanding_dependency_requests(&self, interface: InterfaceHash) -> Vec<EventEnvelope> {
        let mut synthesized = Vec::new();
        for entry in self.inner.managers.iter() {
            let requester = *entry.key();
            let manager = entry.value().lock();
            let Some(dep) = manager
                .registry()
                .declared()
                .iter()
                .find(|d| d.interface == interface)
            else {
                continue;
            };
            if manager.registry().has_provider(interface) {
                continue;
            }
            let requester_properties = self
                .inner
                .properties
                .get(&requester)
                .map(|p| (**p).clone())
                .unwrap_or_default();
            let dep = *dep;
            synthesized.push(EventEnvelope::construct(DependencyRequestEvent {
                base: EventBase {
                    event_id: EventId::DROPPED,
                    originating_service: requester,
                    priority: Priority::INTERNAL,
                },
                requester,
                dependency: dep,
                requester_properties,
            }));
        }
        synthesized
    }

    // -----------------------------------------------------------------
    // Dispatch loop
    // -----------------------------------------------------------------

    /// Drain the queue until the first `QuitEvent` is processed, then
    /// return (spec §5/§8's quit-drain property).
    pub fn run_until_quit(&self) {
        loop {
            match self.inner.dispatcher.pop() {
                PopOutcome::Empty => {
                    if self.inner.dispatcher.is_quit() {
                        break;
                    }
                    std::thread::yield_now();
                }
                PopOutcome::Event(envelope) => {
                    let is_quit = envelope.type_tag() == QuitEvent::TYPE_TAG;
                    self.dispatch_one(envelope);
                    if is_quit {
                        break;
                    }
                }
            }
        }
    }

    /// Pop and dispatch exactly one pending event, if any. Returns whether
    /// an event was processed. For callers that want to drive the loop
    /// deterministically (tests, or an embedding application with its own
    /// scheduling) instead of calling [`Container::run_until_quit`].
    pub fn step(&self) -> bool {
        match self.inner.dispatcher.pop() {
            PopOutcome::Empty => false,
            PopOutcome::Event(envelope) => {
                self.dispatch_one(envelope);
                true
            }
        }
    }

    /// Dispatch exactly one already-popped event. Exposed for tests that
    /// want to drive the loop deterministically.
    pub fn dispatch_one(&self, envelope: EventEnvelope) {
        let tag = envelope.type_tag();

        if tag == UnrecoverableErrorEvent::TYPE_TAG {
            self.inner.dispatcher.deliver_error(&envelope);
            if let Some(ev) = envelope.as_typed::<UnrecoverableErrorEvent>() {
                #[cfg(feature = "logging")]
                error!(target: "service_container", reporter = ev.reporter.get(), message = %ev.message, "unrecoverable error");
                #[cfg(not(feature = "logging"))]
                let _ = ev;
            }
            self.inner.dispatcher.push(ServiceId::SYSTEM, |base| QuitEvent { base });
            return;
        }

        if tag == StartServiceEvent::TYPE_TAG {
            if let Some(ev) = envelope.as_typed::<StartServiceEvent>() {
                if self.handle_start(ev.target) {
                    self.inner
                        .dispatcher
                        .deliver_lifecycle_completion(ev.target, StartServiceEvent::TYPE_TAG, &envelope);
                }
            }
            return;
        }

        if tag == StopServiceEvent::TYPE_TAG {
            if let Some(ev) = envelope.as_typed::<StopServiceEvent>() {
                if self.handle_stop(ev.target) {
                    self.inner
                        .dispatcher
                        .deliver_lifecycle_completion(ev.target, StopServiceEvent::TYPE_TAG, &envelope);
                }
            }
            return;
        }

        if tag == RemoveServiceEvent::TYPE_TAG {
            if let Some(ev) = envelope.as_typed::<RemoveServiceEvent>() {
                if self.handle_remove(ev.target) {
                    self.inner.dispatcher.deliver_lifecycle_completion(
                        ev.target,
                        RemoveServiceEvent::TYPE_TAG,
                        &envelope,
                    );
                }
            }
            return;
        }

        if tag == DependencyRequestEvent::TYPE_TAG {
            if let Some(ev) = envelope.as_typed::<DependencyRequestEvent>() {
                self.inner
                    .dispatcher
                    .deliver_to_request_trackers(ev.dependency.interface, &envelope);
            }
            self.inner.dispatcher.deliver_completion(&envelope);
            return;
        }

        if tag == DependencyUndoRequestEvent::TYPE_TAG {
            if let Some(ev) = envelope.as_typed::<DependencyUndoRequestEvent>() {
                self.inner
                    .dispatcher
                    .deliver_to_undo_trackers(ev.dependency.interface, &envelope);
            }
            self.inner.dispatcher.deliver_completion(&envelope);
            return;
        }

        if tag == ContinuationEvent::TYPE_TAG {
            if let Some(ev) = envelope.as_typed::<ContinuationEvent>() {
                let handler_service = ev.handler_service;
                let resumed_event_type = ev.resumed_event_type;
                if let Some(resumed) = self
                    .inner
                    .dispatcher
                    .resume_continuation(handler_service, resumed_event_type)
                {
                    self.inner.dispatcher.deliver_completion(&resumed);
                }
            }
            return;
        }

        // General/user event: broadcast to subscribers, then complete.
        self.inner.dispatcher.broadcast(envelope);
    }

    /// Drive one `StartServiceEvent` for `target`. Returns whether this
    /// attempt actually settled the transition (reached `Active`) — the
    /// caller fires the completion callback only then, not on a
    /// retry-requeued attempt (spec §8's retry-start property).
    fn handle_start(&self, target: ServiceId) -> bool {
        let Some(manager_entry) = self.inner.managers.get(&target) else {
            return false;
        };
        {
            let mut manager = manager_entry.lock();
            if manager.state() != ServiceState::Resolved {
                return false;
            }
            manager.begin_starting();
        }
        drop(manager_entry);

        let Some(service_entry) = self.inner.services.get(&target) else {
            return false;
        };
        let outcome = service_entry.lock().start();
        drop(service_entry);

        let action = self
            .inner
            .managers
            .get(&target)
            .map(|m| m.lock().on_start_result(outcome))
            .unwrap_or(LifecycleAction::None);

        let settled = match outcome {
            StartStopOutcome::Succeeded => {
                self.inner.dispatcher.mark_active(target, true);
                self.publish_and_notify(target);
                self.replay_buffered_optional(target);
                #[cfg(feature = "logging")]
                debug!(target: "service_container", service = target.get(), "started");
                true
            }
            StartStopOutcome::FailedNoRetry => {
                #[cfg(feature = "logging")]
                warn!(target: "service_container", service = target.get(), "start failed, no retry");
                false
            }
            StartStopOutcome::FailedRetry => false,
        };

        self.apply_action(target, action);
        settled
    }

    /// Drive one `StopServiceEvent` for `target`. Returns whether this
    /// attempt settled the transition (reached `Resolved`/`Installed`).
    fn handle_stop(&self, target: ServiceId) -> bool {
        let Some(manager_entry) = self.inner.managers.get(&target) else {
            return false;
        };
        {
            let mut manager = manager_entry.lock();
            if !matches!(manager.state(), ServiceState::Active | ServiceState::Stopping) {
                return false;
            }
            manager.begin_stopping();
        }
        drop(manager_entry);

        self.inner.dispatcher.mark_active(target, false);
        self.unpublish_and_notify(target);

        let Some(service_entry) = self.inner.services.get(&target) else {
            return false;
        };
        let outcome = service_entry.lock().stop();
        drop(service_entry);

        let action = self
            .inner
            .managers
            .get(&target)
            .map(|m| m.lock().on_stop_result(outcome))
            .unwrap_or(LifecycleAction::None);

        #[cfg(feature = "logging")]
        debug!(target: "service_container", service = target.get(), "stopped");

        let settled = outcome == StartStopOutcome::Succeeded;
        self.apply_action(target, action);
        settled
    }

    fn handle_remove(&self, target: ServiceId) -> bool {
        let removed = self
            .inner
            .managers
            .get(&target)
            .map(|m| m.lock().remove())
            .unwrap_or(false);

        if !removed {
            #[cfg(feature = "logging")]
            warn!(target: "service_container", service = target.get(), "remove rejected: not installed");
            return false;
        }

        self.inner.managers.remove(&target);
        self.inner.services.remove(&target);
        self.inner.properties.remove(&target);
        self.inner.provides.remove(&target);
        for mut entry in self.inner.published.iter_mut() {
            entry.retain(|id| *id != target);
        }
        true
    }

    fn apply_action(&self, target: ServiceId, action: LifecycleAction) {
        match action {
            LifecycleAction::None => {}
            LifecycleAction::RequeueStart | LifecycleAction::ReadyToStart => {
                self.inner
                    .dispatcher
                    .push(ServiceId::SYSTEM, |base| StartServiceEvent { base, target });
            }
            LifecycleAction::RequeueStop | LifecycleAction::RequiredDependencyLost => {
                self.inner
                    .dispatcher
                    .push(ServiceId::SYSTEM, |base| StopServiceEvent { base, target });
            }
        }
    }

    /// Publish every interface `target` provides and offer it to every
    /// other registered service that declared a (still outstanding)
    /// dependency on it, per spec §4.5.
    fn publish_and_notify(&self, target: ServiceId) {
        let Some(interfaces) = self.inner.provides.get(&target).map(|v| v.clone()) else {
            return;
        };
        let Some(target_props) = self.inner.properties.get(&target).map(|p| Arc::clone(&p)) else {
            return;
        };

        for interface in interfaces {
            self.inner.published.entry(interface).or_default().push(target);

            for entry in self.inner.managers.iter() {
                let consumer = *entry.key();
                if consumer == target {
                    continue;
                }
                let (required, accepted) = {
                    let mut manager = entry.value().lock();
                    let declared = manager
                        .registry()
                        .declared()
                        .iter()
                        .find(|d| d.interface == interface)
                        .copied();
                    let Some(dep) = declared else { continue };
                    let consumer_props = self
                        .inner
                        .properties
                        .get(&consumer)
                        .map(|p| Arc::clone(&p))
                        .unwrap_or_default();
                    let accepted = manager.registry_mut().offer(interface, target, &target_props, &consumer_props);
                    (dep.required, accepted)
                };
                if !accepted {
                    continue;
                }
                if let Some(svc) = self.inner.services.get(&consumer) {
                    svc.lock().on_dependency_added(interface, target, &target_props);
                }
                let action = {
                    let mut manager = entry.value().lock();
                    manager.on_dependency_offered(interface, required, true)
                };
                self.apply_action(consumer, action);
            }
        }
    }

    /// Withdraw every interface `target` provides from every consumer that
    /// had it injected, per spec §4.3's required-slot-lost rule.
    fn unpublish_and_notify(&self, target: ServiceId) {
        let Some(interfaces) = self.inner.provides.get(&target).map(|v| v.clone()) else {
            return;
        };

        for interface in interfaces {
            if let Some(mut providers) = self.inner.published.get_mut(&interface) {
                providers.retain(|id| *id != target);
            }

            for entry in self.inner.managers.iter() {
                let consumer = *entry.key();
                if consumer == target {
                    continue;
                }
                let left_empty = {
                    let mut manager = entry.value().lock();
                    if !manager.registry().has_provider(interface) {
                        continue;
                    }
                    manager.registry_mut().withdraw(interface, target)
                };
                if let Some(svc) = self.inner.services.get(&consumer) {
                    let empty_props = Properties::new();
                    svc.lock().on_dependency_removed(interface, target, &empty_props);
                }
                let action = {
                    let mut manager = entry.value().lock();
                    manager.on_dependency_withdrawn(left_empty)
                };
                self.apply_action(consumer, action);
            }
        }
    }

    /// Replay optional-slot notifications buffered while `target` was
    /// starting or stopping (spec §4.3), using whatever providers are
    /// currently injected for each buffered interface.
    fn replay_buffered_optional(&self, target: ServiceId) {
        let Some(manager_entry) = self.inner.managers.get(&target) else {
            return;
        };
        let buffered = manager_entry.lock().take_buffered_optional();
        drop(manager_entry);

        let Some(manager_entry) = self.inner.managers.get(&target) else {
            return;
        };
        let registry_snapshot = manager_entry.lock().registry().clone();
        drop(manager_entry);

        let Some(svc) = self.inner.services.get(&target) else {
            return;
        };
        for interface in buffered {
            for provider in registry_snapshot.providers(interface) {
                if let Some(provider_props) = self.inner.properties.get(&provider) {
                    svc.lock().on_dependency_added(interface, provider, &provider_props);
                }
            }
        }
    }
}
