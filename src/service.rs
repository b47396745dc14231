//! The service contract and the non-owning handle services get back to
//! their container.

use std::sync::Weak;

use crate::container::Inner;
use crate::dependency::{DependencyRegistry, InterfaceHash};
use crate::id::ServiceId;
use crate::lifecycle::StartStopOutcome;
use crate::properties::Properties;

/// Implemented by every service type hosted in a [`crate::Container`].
///
/// The constructor takes the service's (already-declared) dependency
/// registry, its properties, and a handle back to the owning container —
/// the three inputs named in spec §6's service contract. `start`/`stop`
/// report one of the three [`StartStopOutcome`] values; retries are
/// re-scheduled by the container as fresh events rather than looped
/// synchronously (spec §4.3's rationale: this prevents reentrancy storms
/// when a start handler itself publishes a provider that would satisfy
/// siblings).
///
/// `on_dependency_added`/`on_dependency_removed` default to no-ops; a
/// service overrides them for the interfaces it actually cares about
/// tracking injected providers for. Folding these into `Service` itself
/// (rather than a separate per-interface trait) keeps the type
/// object-safe, so the container can store `Box<dyn Service>` directly
/// without a derive macro or a hand-written vtable shim.
pub trait Service: Send + Sync + 'static {
    fn new(registry: DependencyRegistry, properties: Properties, handle: ContainerHandle) -> Self
    where
        Self: Sized;

    fn start(&mut self) -> StartStopOutcome;

    fn stop(&mut self) -> StartStopOutcome;

    #[allow(unused_variables)]
    fn on_dependency_added(
        &mut self,
        interface: InterfaceHash,
        provider: ServiceId,
        provider_properties: &Properties,
    ) {
    }

    #[allow(unused_variables)]
    fn on_dependency_removed(
        &mut self,
        interface: InterfaceHash,
        provider: ServiceId,
        provider_properties: &Properties,
    ) {
    }
}

/// A non-owning handle back to the container that owns a service.
///
/// Services never extend the container's lifetime: the handle holds a
/// [`Weak`] reference, matching spec §9's note on resolving the cyclic
/// reference between container, lifecycle managers, and services by giving
/// the container exclusive ownership.
#[derive(Clone)]
pub struct ContainerHandle {
    pub(crate) inner: Weak<Inner>,
    pub(crate) owner: ServiceId,
}

impl ContainerHandle {
    /// The id of the service this handle was handed to.
    pub fn owner(&self) -> ServiceId {
        self.owner
    }

    /// Run a closure against the live container, if it still exists.
    /// Returns `None` if the container has already been dropped.
    pub fn with_container<R>(&self, f: impl FnOnce(&crate::Container) -> R) -> Option<R> {
        self.inner.upgrade().map(|inner| f(&crate::Container { inner }))
    }
}
