//! # service-container
//!
//! A dependency-driven lifecycle engine and prioritized event dispatcher
//! for in-process service containers: services declare what they need and
//! what they provide, the container wires providers to consumers as they
//! come and go, and a single-consumer priority queue drives every state
//! transition as an event rather than a direct call.
//!
//! ## Features
//!
//! - **Lifecycle-managed services** — `Installed -> Resolved -> Starting ->
//!   Active -> Stopping`, driven entirely by dependency arrival/withdrawal
//! - **Prioritized dispatch** — a `BinaryHeap` orders pending events by
//!   priority, ties broken by arrival order
//! - **Fixed-capacity events** — a 128-byte move-only envelope avoids a
//!   heap allocation per event
//! - **Property-filtered providers** — a dependency can restrict which
//!   candidates satisfy it with an arbitrary predicate
//! - **Cooperative suspension** — a broadcast handler can pause mid-event
//!   and resume on a later turn instead of blocking the dispatch loop
//!
//! ## Quick Start
//!
//! ```rust
//! use service_container::prelude::*;
//!
//! struct Logger;
//!
//! impl Service for Logger {
//!     fn new(_registry: DependencyRegistry, _properties: Properties, _handle: ContainerHandle) -> Self {
//!         Logger
//!     }
//!     fn start(&mut self) -> StartStopOutcome {
//!         StartStopOutcome::Succeeded
//!     }
//!     fn stop(&mut self) -> StartStopOutcome {
//!         StartStopOutcome::Succeeded
//!     }
//! }
//!
//! let container = Container::new();
//! let _logger = container.register::<Logger>(Properties::new(), vec![], vec![]);
//! container.post(ServiceId::SYSTEM, |base| QuitEvent { base });
//! container.run_until_quit();
//! ```
//!
//! ## Declaring dependencies
//!
//! ```rust
//! use service_container::prelude::*;
//!
//! const DATABASE: InterfaceHash = InterfaceHash::of("Database");
//!
//! struct Database;
//! impl Service for Database {
//!     fn new(_r: DependencyRegistry, _p: Properties, _h: ContainerHandle) -> Self { Database }
//!     fn start(&mut self) -> StartStopOutcome { StartStopOutcome::Succeeded }
//!     fn stop(&mut self) -> StartStopOutcome { StartStopOutcome::Succeeded }
//! }
//!
//! struct Users;
//! impl Service for Users {
//!     fn new(_r: DependencyRegistry, _p: Properties, _h: ContainerHandle) -> Self { Users }
//!     fn start(&mut self) -> StartStopOutcome { StartStopOutcome::Succeeded }
//!     fn stop(&mut self) -> StartStopOutcome { StartStopOutcome::Succeeded }
//! }
//!
//! let container = Container::new();
//! // Users needs Database; order of registration doesn't matter.
//! let _users = container.register::<Users>(
//!     Properties::new(),
//!     vec![],
//!     vec![Dependency::required(DATABASE, 1)],
//! );
//! let _db = container.register::<Database>(Properties::new(), vec![DATABASE], vec![]);
//! container.post(ServiceId::SYSTEM, |base| QuitEvent { base });
//! container.run_until_quit();
//! ```

mod channel;
mod container;
mod dependency;
mod dispatcher;
mod envelope;
mod error;
mod event;
mod id;
mod lifecycle;
#[cfg(feature = "logging")]
pub mod logging;
mod properties;
mod service;

pub use channel::CommunicationChannel;
pub use container::Container;
pub use dependency::{Dependency, DependencyRegistry, InterfaceHash};
pub use dispatcher::{HandlerOutcome, Registration};
pub use envelope::{EventEnvelope, ENVELOPE_CAPACITY};
pub use error::{CoreError, Result};
pub use event::{
    ContinuationEvent, DependencyRequestEvent, DependencyUndoRequestEvent, Event, EventBase,
    Priority, QuitEvent, RemoveServiceEvent, StartServiceEvent, StopServiceEvent, TypeTag,
    UnrecoverableErrorEvent,
};
pub use id::{ContainerId, EventId, ServiceId};
pub use lifecycle::{LifecycleAction, LifecycleManager, ServiceState, StartStopOutcome};
pub use properties::{Filter, Properties, PropertyValue, FILTER_KEY};
pub use service::{ContainerHandle, Service};

// Re-export tracing macros for convenience when the logging feature is enabled.
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

/// Convenience re-exports for implementing [`Service`] and wiring up a
/// [`Container`].
pub mod prelude {
    pub use crate::{
        Container, ContainerHandle, CoreError, Dependency, DependencyRegistry, Event, EventBase,
        HandlerOutcome, InterfaceHash, Priority, Properties, QuitEvent, Registration, Result,
        Service, ServiceId, ServiceState, StartStopOutcome,
    };
}
