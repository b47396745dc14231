//! The optional cross-container routing collaborator.

use crate::envelope::EventEnvelope;
use crate::event::TypeTag;

/// A container-to-container transport. Attaching one lets a
/// [`crate::Container`] forward broadcastable events to peer containers
/// (in another thread, process, or machine) instead of only dispatching
/// them locally.
///
/// This is a thin seam: the container decides *what* crosses the boundary
/// (`is_broadcastable`) and the channel decides *how* (`send`/`try_recv`).
/// No implementation ships in this crate; applications that need one
/// provide their own (e.g. backed by a socket or an in-process mpsc pair).
pub trait CommunicationChannel: Send + Sync {
    /// Hand `envelope` to the transport. Errors are logged by the caller;
    /// a failed send never blocks the local dispatch loop.
    fn send(&self, envelope: &EventEnvelope) -> Result<(), String>;

    /// Pull one event that arrived from a peer, if any, without blocking.
    fn try_recv(&self) -> Option<EventEnvelope>;

    /// Whether events of this type are meant to cross the channel at all.
    /// Defaults to excluding the built-in lifecycle event types, which are
    /// local to one container's service graph.
    fn is_broadcastable(&self, type_tag: TypeTag) -> bool {
        use crate::event::{
            ContinuationEvent, DependencyRequestEvent, DependencyUndoRequestEvent, Event,
            QuitEvent, RemoveServiceEvent, StartServiceEvent, StopServiceEvent,
        };

        ![
            DependencyRequestEvent::TYPE_TAG,
            DependencyUndoRequestEvent::TYPE_TAG,
            StartServiceEvent::TYPE_TAG,
            StopServiceEvent::TYPE_TAG,
            RemoveServiceEvent::TYPE_TAG,
            QuitEvent::TYPE_TAG,
            ContinuationEvent::TYPE_TAG,
        ]
        .contains(&type_tag)
    }
}
