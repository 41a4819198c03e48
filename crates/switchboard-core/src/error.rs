// ABOUTME: Error types shared by the switchboard coordinator and endpoint clients.
// ABOUTME: Covers selector resolution, identifier conflicts, timeouts and remote handler failures.

use std::time::Duration;

use thiserror::Error;

use crate::endpoint::EndpointId;

/// Errors that can occur while brokering channels or exchanging messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwitchboardError {
    /// The identifier is already bound to a different endpoint.
    #[error("identifier '{identifier}' is already bound to endpoint {owner}")]
    Conflict {
        identifier: String,
        owner: EndpointId,
    },

    /// The selector matched no endpoint.
    #[error("no endpoint matches selector {0}")]
    NotFound(String),

    /// The selector matched more than one endpoint for a single-target operation.
    #[error("selector {selector} matches {count} endpoints")]
    Ambiguous { selector: String, count: usize },

    /// A channel request or invoke exceeded its deadline.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// The remote side has no handler for the invoked channel.
    #[error("No handler registered for channel '{channel}'")]
    HandlerMissing { channel: String },

    /// The worker handshake was never confirmed.
    #[error("registration of '{identifier}' was not confirmed")]
    RegistrationTimeout { identifier: String },

    /// The identifier is empty or otherwise unusable.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The selector cannot be used for this operation.
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// The calling endpoint has not subscribed or registered yet.
    #[error("endpoint {0} is not registered")]
    NotRegistered(EndpointId),

    /// The coordinator is gone or stopped answering.
    #[error("coordinator unavailable")]
    CoordinatorUnavailable,

    /// The channel to a peer was closed.
    #[error("channel to endpoint {0} is closed")]
    ChannelClosed(EndpointId),

    /// The remote handler failed; carries the error message sent over the wire.
    #[error("{0}")]
    Remote(String),
}

impl SwitchboardError {
    /// Build a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SwitchboardError::Conflict {
            identifier: "output".to_string(),
            owner: EndpointId::new(3),
        };
        assert_eq!(
            err.to_string(),
            "identifier 'output' is already bound to endpoint 3"
        );

        let err = SwitchboardError::timeout("invoke 'add'", Duration::from_millis(250));
        assert_eq!(err.to_string(), "invoke 'add' timed out after 250ms");
    }

    #[test]
    fn test_handler_missing_message() {
        let err = SwitchboardError::HandlerMissing {
            channel: "add".to_string(),
        };
        assert!(err.to_string().contains("No handler registered"));
        assert!(err.to_string().contains("'add'"));
    }

    #[test]
    fn test_remote_error_is_transparent() {
        let err = SwitchboardError::Remote("division by zero".to_string());
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn test_ambiguous_display() {
        let err = SwitchboardError::Ambiguous {
            selector: "pattern:^out".to_string(),
            count: 2,
        };
        assert!(err.to_string().contains("pattern:^out"));
        assert!(err.to_string().contains('2'));
    }
}
