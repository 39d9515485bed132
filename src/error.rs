//! # Realtime Errors
//!
//! Error types for the cache-coherence subsystem.

use thiserror::Error;

/// Result type for realtime operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Realtime errors
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    // ==================
    // Scope Errors
    // ==================
    /// Scope lookup failed; realtime sync stays disabled until it succeeds
    #[error("Scope resolution failed for user {user_id}: {reason}")]
    ScopeUnavailable { user_id: String, reason: String },

    // ==================
    // Channel Errors
    // ==================
    /// Channel not found
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    // ==================
    // Internal Errors
    // ==================
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RealtimeError::ScopeUnavailable {
            user_id: "U1".to_string(),
            reason: "role row missing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Scope resolution failed for user U1: role row missing"
        );

        let err = RealtimeError::ChannelNotFound("student-S1".to_string());
        assert_eq!(err.to_string(), "Channel not found: student-S1");
    }
}
