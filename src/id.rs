//! Monotonic identifiers.
//!
//! Service ids, event ids, and container ids are process-wide counters that
//! only advance, per the "global monotonic counters" design note: each
//! [`Container`](crate::Container) owns its own counters so containers never
//! block each other, and carries a [`ContainerId`] a caller can fold into a
//! cross-process key if it needs uniqueness beyond one container.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static CONTAINER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifies one service within its owning container. Set at construction,
/// never reused, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(pub(crate) u64);

impl ServiceId {
    /// The reserved id meaning "the system", used as `originating_service`
    /// for events posted by the container itself rather than a service.
    pub const SYSTEM: ServiceId = ServiceId(0);

    /// Raw numeric value.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) fn is_system(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service#{}", self.0)
    }
}

/// Identifies one event within its owning container. Strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub(crate) u64);

impl EventId {
    /// The id returned for pushes that were silently dropped (queue closed).
    pub const DROPPED: EventId = EventId(0);

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_dropped(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event#{}", self.0)
    }
}

/// Identifies a container, for disambiguating ids across a multi-container
/// deployment when a [`crate::channel::CommunicationChannel`] is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(pub(crate) u64);

impl ContainerId {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn next() -> Self {
        Self(CONTAINER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container#{}", self.0)
    }
}

/// A monotonic, never-reused counter starting at 0.
///
/// Each [`Container`](crate::Container) owns one of these for service ids and
/// a second one for event ids, so the two sequences advance independently.
#[derive(Debug, Default)]
pub struct IdCounter(AtomicU64);

impl IdCounter {
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Allocate the next id in the sequence.
    #[inline]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel)
    }

    /// Current value without advancing, for diagnostics.
    #[inline]
    pub fn peek(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_at_zero_and_advances() {
        let counter = IdCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn container_ids_are_unique() {
        let a = ContainerId::next();
        let b = ContainerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn system_service_id_is_zero() {
        assert!(ServiceId::SYSTEM.is_system());
        assert!(!ServiceId(1).is_system());
    }
}
