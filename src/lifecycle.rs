//! The per-service lifecycle state machine.
//!
//! Drives one service through
//! `Installed -> Resolved -> Starting -> Active -> Stopping -> Installed`,
//! with `RemoveService` taking `Installed` to the terminal `Uninstalled`
//! state, per spec §4.3.

use std::fmt;

use crate::dependency::{DependencyRegistry, InterfaceHash};
use crate::id::ServiceId;

/// Where one service currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Uninstalled,
    Unknown,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Installed => "INSTALLED",
            Self::Resolved => "RESOLVED",
            Self::Starting => "STARTING",
            Self::Active => "ACTIVE",
            Self::Stopping => "STOPPING",
            Self::Uninstalled => "UNINSTALLED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// The outcome a service's own `start`/`stop` implementation reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStopOutcome {
    Succeeded,
    FailedRetry,
    FailedNoRetry,
}

/// What the lifecycle manager decided to do in response to a stimulus;
/// the container turns this into further event pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// No state change; nothing further to do.
    None,
    /// Re-evaluate now — e.g. post `StartServiceEvent` again for a retry.
    RequeueStart,
    RequeueStop,
    /// The service just became satisfied; the caller should post
    /// `StartServiceEvent`.
    ReadyToStart,
    /// A required dependency vanished while active; the caller should post
    /// `StopServiceEvent`.
    RequiredDependencyLost,
}

/// Drives one service's [`ServiceState`] transitions. Owns the service's
/// [`DependencyRegistry`]; does not own the `Service` value itself (that
/// stays with the [`crate::container::Container`], per spec §9's ownership
/// design note).
#[derive(Debug)]
pub struct LifecycleManager {
    service_id: ServiceId,
    state: ServiceState,
    registry: DependencyRegistry,
    /// Optional-slot dependency notifications buffered while
    /// starting/stopping, replayed once Active (spec §4.3).
    buffered_optional: Vec<InterfaceHash>,
}

impl LifecycleManager {
    pub fn new(service_id: ServiceId, registry: DependencyRegistry) -> Self {
        let state = if registry.is_satisfied() {
            ServiceState::Resolved
        } else {
            ServiceState::Installed
        };

        Self {
            service_id,
            state,
            registry,
            buffered_optional: Vec::new(),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn registry(&self) -> &DependencyRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DependencyRegistry {
        &mut self.registry
    }

    /// A service is observable to others as a provider iff it is `Active`
    /// (spec §3).
    pub fn is_active(&self) -> bool {
        self.state == ServiceState::Active
    }

    /// React to a provider arriving for `interface`. While `Starting` or
    /// `Stopping`, required-slot arrivals are deferred by returning
    /// `LifecycleAction::None` with the caller expected to re-post the
    /// event (spec §4.3); optional arrivals are buffered here directly.
    pub fn on_dependency_offered(
        &mut self,
        interface: InterfaceHash,
        required: bool,
        accepted: bool,
    ) -> LifecycleAction {
        if !accepted {
            return LifecycleAction::None;
        }

        match self.state {
            ServiceState::Starting | ServiceState::Stopping if !required => {
                self.buffered_optional.push(interface);
                LifecycleAction::None
            }
            ServiceState::Installed if self.registry.is_satisfied() => {
                self.state = ServiceState::Resolved;
                LifecycleAction::ReadyToStart
            }
            _ => LifecycleAction::None,
        }
    }

    /// React to a provider withdrawing. If the dependent is `Active` and
    /// this emptied a required slot, it must move to `Stopping` before the
    /// dependent's next event handler runs (spec §8 invariant).
    pub fn on_dependency_withdrawn(&mut self, left_required_slot_empty: bool) -> LifecycleAction {
        if left_required_slot_empty && self.state == ServiceState::Active {
            self.state = ServiceState::Stopping;
            return LifecycleAction::RequiredDependencyLost;
        }
        if left_required_slot_empty && self.state == ServiceState::Resolved {
            self.state = ServiceState::Installed;
        }
        LifecycleAction::None
    }

    /// Apply the outcome of invoking the service's `start()`.
    pub fn on_start_result(&mut self, outcome: StartStopOutcome) -> LifecycleAction {
        debug_assert!(matches!(
            self.state,
            ServiceState::Resolved | ServiceState::Starting
        ));
        match outcome {
            StartStopOutcome::Succeeded => {
                self.state = ServiceState::Active;
                self.buffered_optional.clear();
                LifecycleAction::None
            }
            StartStopOutcome::FailedRetry => {
                self.state = ServiceState::Resolved;
                LifecycleAction::RequeueStart
            }
            StartStopOutcome::FailedNoRetry => {
                self.state = ServiceState::Installed;
                LifecycleAction::None
            }
        }
    }

    /// Mark the service as entering its `start()` call.
    pub fn begin_starting(&mut self) {
        debug_assert_eq!(self.state, ServiceState::Resolved);
        self.state = ServiceState::Starting;
    }

    /// Mark the service as entering its `stop()` call.
    pub fn begin_stopping(&mut self) {
        debug_assert!(matches!(
            self.state,
            ServiceState::Active | ServiceState::Stopping
        ));
        self.state = ServiceState::Stopping;
    }

    /// Apply the outcome of invoking the service's `stop()`.
    pub fn on_stop_result(&mut self, outcome: StartStopOutcome) -> LifecycleAction {
        debug_assert_eq!(self.state, ServiceState::Stopping);
        match outcome {
            StartStopOutcome::Succeeded => {
                self.state = if self.registry.is_satisfied() {
                    ServiceState::Resolved
                } else {
                    ServiceState::Installed
                };
                LifecycleAction::None
            }
            StartStopOutcome::FailedRetry => LifecycleAction::RequeueStop,
            StartStopOutcome::FailedNoRetry => {
                self.state = ServiceState::Installed;
                LifecycleAction::None
            }
        }
    }

    /// Drain the optional-slot notifications buffered while starting or
    /// stopping, to be replayed to the service now that it's `Active`.
    pub fn take_buffered_optional(&mut self) -> Vec<InterfaceHash> {
        std::mem::take(&mut self.buffered_optional)
    }

    /// `RemoveService`: only legal from `Installed`, moves to the terminal
    /// `Uninstalled` state.
    pub fn remove(&mut self) -> bool {
        if self.state == ServiceState::Installed {
            self.state = ServiceState::Uninstalled;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::Properties;

    const DB: InterfaceHash = InterfaceHash::of("Database");

    fn manager_with_required_dep() -> LifecycleManager {
        let mut registry = DependencyRegistry::new();
        registry.declare(DB, 1, true);
        LifecycleManager::new(ServiceId(1), registry)
    }

    #[test]
    fn no_deps_starts_resolved() {
        let mgr = LifecycleManager::new(ServiceId(1), DependencyRegistry::new());
        assert_eq!(mgr.state(), ServiceState::Resolved);
    }

    #[test]
    fn full_happy_path_no_deps() {
        let mut mgr = LifecycleManager::new(ServiceId(1), DependencyRegistry::new());
        mgr.begin_starting();
        assert_eq!(mgr.state(), ServiceState::Starting);
        mgr.on_start_result(StartStopOutcome::Succeeded);
        assert_eq!(mgr.state(), ServiceState::Active);
    }

    #[test]
    fn required_dependency_arriving_later_unblocks() {
        let mut mgr = manager_with_required_dep();
        assert_eq!(mgr.state(), ServiceState::Installed);

        let props = Properties::new();
        let accepted = mgr.registry_mut().offer(DB, ServiceId(2), &props, &props);
        let action = mgr.on_dependency_offered(DB, true, accepted);

        assert_eq!(action, LifecycleAction::ReadyToStart);
        assert_eq!(mgr.state(), ServiceState::Resolved);
    }

    #[test]
    fn retry_start_requeues_without_losing_dependency_state() {
        let mut mgr = LifecycleManager::new(ServiceId(1), DependencyRegistry::new());
        mgr.begin_starting();
        let action = mgr.on_start_result(StartStopOutcome::FailedRetry);
        assert_eq!(action, LifecycleAction::RequeueStart);
        assert_eq!(mgr.state(), ServiceState::Resolved);
    }

    #[test]
    fn losing_required_dependency_while_active_forces_stopping() {
        let mut mgr = manager_with_required_dep();
        let props = Properties::new();
        mgr.registry_mut().offer(DB, ServiceId(2), &props, &props);
        mgr.begin_starting();
        mgr.on_start_result(StartStopOutcome::Succeeded);
        assert_eq!(mgr.state(), ServiceState::Active);

        let left_empty = mgr.registry_mut().withdraw(DB, ServiceId(2));
        let action = mgr.on_dependency_withdrawn(left_empty);

        assert_eq!(action, LifecycleAction::RequiredDependencyLost);
        assert_eq!(mgr.state(), ServiceState::Stopping);
    }

    #[test]
    fn remove_only_legal_from_installed() {
        let mut mgr = manager_with_required_dep();
        assert_eq!(mgr.state(), ServiceState::Installed);
        assert!(mgr.remove());
        assert_eq!(mgr.state(), ServiceState::Uninstalled);

        let mut active = LifecycleManager::new(ServiceId(2), DependencyRegistry::new());
        active.begin_starting();
        active.on_start_result(StartStopOutcome::Succeeded);
        assert!(!active.remove());
    }
}
