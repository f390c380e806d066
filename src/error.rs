//! Error types for Switchyard gateway operations.

use thiserror::Error;

/// Main error type for Switchyard operations
#[derive(Error, Debug)]
pub enum SwitchyardError {
    /// Malformed server, capability, group or qualified name
    #[error("invalid name '{0}': {1}")]
    InvalidName(String, String),

    /// A server, capability, client or group does not exist
    #[error("{0} '{1}' not found")]
    NotFound(String, String),

    /// A record with the same identity already exists
    #[error("{0} '{1}' already exists")]
    AlreadyExists(String, String),

    /// Opening a session to the upstream server failed
    #[error("upstream server '{0}' unreachable: {1}")]
    UpstreamUnreachable(String, String),

    /// The calling client may not reach the server
    #[error("client '{0}' is not authorized to access server '{1}'")]
    Forbidden(String, String),

    /// The session opened but the remote call itself failed
    #[error("call to upstream server '{0}' failed: {1}")]
    UpstreamCallFailed(String, String),

    /// A multi-record mutation could not complete atomically
    #[error("{0} aborted, catalog left unchanged: {1}")]
    ConsistencyFailure(String, String),

    /// Invalid configuration for a named entry
    #[error("invalid config for '{0}': {1}")]
    InvalidConfig(String, String),

    /// Catalog store failure, detail is logged rather than returned
    #[error("catalog store failure during {0}")]
    Store(String),

    /// The gateway has not been initialized with a mode yet
    #[error("gateway is not initialized")]
    NotInitialized,

    /// The gateway was already initialized in another mode
    #[error("gateway already initialized in {0} mode")]
    AlreadyInitialized(String),

    /// The operation is only available in a specific mode
    #[error("'{0}' is only available in {1} mode")]
    RequiresMode(String, String),

    /// Call to a named server timed out
    #[error("call timeout for server '{0}'")]
    CallTimeout(String),

    /// The caller went away before the upstream call completed
    #[error("call to server '{0}' cancelled")]
    Cancelled(String),
}

/// Result type alias for Switchyard operations
pub type Result<T> = std::result::Result<T, SwitchyardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = SwitchyardError::NotFound("server".to_string(), "gh".to_string());
        assert_eq!(err.to_string(), "server 'gh' not found");
    }

    #[test]
    fn test_forbidden_display() {
        let err = SwitchyardError::Forbidden("cursor".to_string(), "billing".to_string());
        assert_eq!(
            err.to_string(),
            "client 'cursor' is not authorized to access server 'billing'"
        );
    }

    #[test]
    fn test_consistency_failure_display() {
        let err = SwitchyardError::ConsistencyFailure(
            "deregistration of 'gh'".to_string(),
            "store fault".to_string(),
        );
        assert_eq!(
            err.to_string(),
            "deregistration of 'gh' aborted, catalog left unchanged: store fault"
        );
    }

    #[test]
    fn test_call_timeout_display() {
        let err = SwitchyardError::CallTimeout("gh".to_string());
        assert_eq!(err.to_string(), "call timeout for server 'gh'");
    }
}
