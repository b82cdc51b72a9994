//! Error types for westfield-core.

use thiserror::Error;

/// Main error type for all connection operations.
///
/// The first five variants are the fatal wire errors: hitting any of them
/// while dispatching closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Declared size exceeds the batch, or an argument overruns its message.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Object id not present in the registry.
    #[error("Unknown object: {0}")]
    UnknownObject(u32),

    /// Handle argument requested but the batch's handle list is exhausted.
    #[error("Missing handle")]
    MissingHandle,

    /// The opcode handler itself failed.
    #[error("Handler failure on object {object_id} opcode {opcode}: {message}")]
    HandlerFailure {
        /// Target object of the failing message.
        object_id: u32,
        /// Opcode of the failing message.
        opcode: u16,
        /// Failure description.
        message: String,
    },

    /// Explicit `error` event raised by the peer.
    #[error("Protocol error on object {object_id} (code {code}): {message}")]
    ProtocolError {
        /// Object the error refers to.
        object_id: u32,
        /// Interface specific error code.
        code: u32,
        /// Human readable description.
        message: String,
    },

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Id already occupied in the object table.
    #[error("Object id {0} already registered")]
    DuplicateObject(u32),

    /// Id outside the expected range, or beyond the arena bound.
    #[error("Invalid object id: {0}")]
    InvalidId(u32),

    /// No ids left in the local range.
    #[error("Object id space exhausted")]
    IdSpaceExhausted,

    /// Encoded message does not fit the 16-bit size field.
    #[error("Message of {0} bytes exceeds the maximum message size")]
    MessageTooLarge(usize),

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(String),
}

impl WireError {
    /// Shorthand for a [`WireError::MalformedMessage`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        WireError::MalformedMessage(reason.into())
    }

    /// Whether hitting this error while dispatching must close the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WireError::MalformedMessage(_)
                | WireError::UnknownObject(_)
                | WireError::MissingHandle
                | WireError::HandlerFailure { .. }
                | WireError::ProtocolError { .. }
        )
    }

    /// Failure raised by application handler logic.
    ///
    /// The dispatch engine fills in the object id and opcode.
    pub fn handler(message: impl Into<String>) -> Self {
        WireError::HandlerFailure {
            object_id: 0,
            opcode: 0,
            message: message.into(),
        }
    }

    /// Attribute an error raised while handling a message to that message.
    ///
    /// Wire errors (decode failures, unknown objects) pass through unchanged,
    /// everything else becomes a [`WireError::HandlerFailure`].
    pub(crate) fn into_dispatch_error(self, object_id: u32, opcode: u16) -> Self {
        match self {
            WireError::HandlerFailure { message, .. } => WireError::HandlerFailure {
                object_id,
                opcode,
                message,
            },
            e if e.is_fatal() => e,
            e => WireError::HandlerFailure {
                object_id,
                opcode,
                message: e.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Config(e.to_string())
    }
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(WireError::malformed("short").is_fatal());
        assert!(WireError::UnknownObject(7).is_fatal());
        assert!(WireError::MissingHandle.is_fatal());
        assert!(!WireError::ConnectionClosed.is_fatal());
        assert!(!WireError::DuplicateObject(2).is_fatal());
    }

    #[test]
    fn test_dispatch_error_wrapping() {
        let wrapped = WireError::DuplicateObject(9).into_dispatch_error(3, 1);
        assert_eq!(
            wrapped,
            WireError::HandlerFailure {
                object_id: 3,
                opcode: 1,
                message: "Object id 9 already registered".to_string(),
            }
        );

        let passthrough = WireError::MissingHandle.into_dispatch_error(3, 1);
        assert_eq!(passthrough, WireError::MissingHandle);

        let attributed = WireError::handler("bad surface").into_dispatch_error(12, 4);
        assert_eq!(
            attributed,
            WireError::HandlerFailure {
                object_id: 12,
                opcode: 4,
                message: "bad surface".to_string(),
            }
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let err: WireError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, WireError::Config(_)));
    }
}
