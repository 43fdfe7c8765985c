//! Unified error handling for the round-planner library.
//!
//! One error type covers every planner operation. Variants map to how the
//! caller should react: validation and state violations are caller bugs,
//! `UpstreamUnavailable` is retry-safe, `NotFound` is not.

use thiserror::Error;

/// Unified error type for planner operations.
#[derive(Debug, Clone, Error)]
pub enum PlannerError {
    /// Malformed input (bad polygon, missing required fields). Rejected
    /// before any partial processing happens.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// A referenced record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// An upstream collaborator (street extraction, matrix or directions
    /// oracle) failed at the transport level or timed out. Safe to retry.
    #[error("upstream {service} unavailable: {message}")]
    UpstreamUnavailable {
        service: &'static str,
        message: String,
        status_code: Option<u16>,
    },

    /// The optimization request cannot produce a route: empty input, or a
    /// single request exceeding the oracle size limit.
    #[error("optimization infeasible: {message}")]
    OptimizationInfeasible { message: String },

    /// A mutating call reached a session in a state that forbids it. The
    /// session is left unchanged.
    #[error("session state violation: {message}")]
    SessionStateViolation { message: String },

    /// Persistence collaborator error.
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl PlannerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn upstream_status(
        service: &'static str,
        message: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self::UpstreamUnavailable {
            service,
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn infeasible(message: impl Into<String>) -> Self {
        Self::OptimizationInfeasible {
            message: message.into(),
        }
    }

    pub fn session_state(message: impl Into<String>) -> Self {
        Self::SessionStateViolation {
            message: message.into(),
        }
    }
}

/// Result type alias for planner operations.
pub type Result<T> = std::result::Result<T, PlannerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlannerError::not_found("zone", "z-42");
        assert!(err.to_string().contains("zone"));
        assert!(err.to_string().contains("z-42"));

        let err = PlannerError::upstream_status("matrix", "HTTP 503", 503);
        assert!(err.to_string().contains("matrix"));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_session_state_variant() {
        let err = PlannerError::session_state("session has ended");
        assert!(matches!(err, PlannerError::SessionStateViolation { .. }));
    }
}
