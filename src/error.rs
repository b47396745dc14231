//! Error types for the service container.

use thiserror::Error;

use crate::dependency::InterfaceHash;
use crate::event::TypeTag;
use crate::id::ServiceId;

/// Errors surfaced by the container's public API and internal dispatch.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// A service declared a required interface that no provider ever
    /// offered, and it was asked to start anyway.
    #[error("service {service} is missing required dependency {interface:?}")]
    MissingRequirement {
        service: ServiceId,
        interface: InterfaceHash,
    },

    /// `start()`/`stop()` returned `FailedNoRetry`.
    #[error("service {service} failed to {action} and will not retry")]
    StartStopFailure { service: ServiceId, action: &'static str },

    /// A broadcast handler could not be driven to completion.
    #[error("handler for {event_type:?} registered by {service} failed: {reason}")]
    HandlerFailure {
        service: ServiceId,
        event_type: TypeTag,
        reason: String,
    },

    /// An `UnrecoverableErrorEvent` was posted; the container should quit.
    #[error("unrecoverable error reported by {reporter}: {message}")]
    Unrecoverable { reporter: ServiceId, message: String },

    /// A push was attempted after the dispatcher latched quit.
    #[error("event queue is closed")]
    QueueClosed,

    /// Internal invariant violation; should never surface outside tests.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    #[inline]
    pub fn missing_requirement(service: ServiceId, interface: InterfaceHash) -> Self {
        Self::MissingRequirement { service, interface }
    }

    #[inline]
    pub fn start_stop_failure(service: ServiceId, action: &'static str) -> Self {
        Self::StartStopFailure { service, action }
    }

    #[inline]
    pub fn handler_failure(service: ServiceId, event_type: TypeTag, reason: impl Into<String>) -> Self {
        Self::HandlerFailure {
            service,
            event_type,
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn unrecoverable(reporter: ServiceId, message: impl Into<String>) -> Self {
        Self::Unrecoverable {
            reporter,
            message: message.into(),
        }
    }
}

/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_requirement_formats_with_service_and_interface() {
        let err = CoreError::missing_requirement(ServiceId::SYSTEM, InterfaceHash::of("Database"));
        assert!(err.to_string().contains("missing required dependency"));
    }
}
