//! Error types for iproto-client.
//!
//! Every failure surfaced by a [`Connection`](crate::Connection) belongs to
//! exactly one [`ErrorKind`]:
//!
//! - **Connection**: socket, write, read or parse failure. Retryable by
//!   reconnecting. Carries a `timeout` flag.
//! - **Context**: the request deadline expired before a reply arrived.
//! - **Query**: the server rejected the request, or the request itself could
//!   not be encoded. Never retried by reconnecting.

use thiserror::Error;

/// Coarse classification used by retry/reconnect policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient connection failure.
    Connection,
    /// Deadline or cancellation.
    Context,
    /// Application-level query failure.
    Query,
}

/// Main error type for all connection operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Socket-level failure, or a reply stream that can no longer be trusted.
    #[error("{message}, remote: {remote}")]
    Connection {
        message: String,
        remote: String,
        /// Set when the failure was a timeout rather than a broken link.
        timeout: bool,
    },

    /// The caller's deadline elapsed before the reply was routed.
    #[error("{message}, remote: {remote}")]
    Context { message: String, remote: String },

    /// The server executed the request and reported an error.
    #[error("server error {code}: {message}")]
    Server { code: u32, message: String },

    /// The request could not be packed (unknown space, oversized value...).
    #[error("invalid query: {0}")]
    Definition(#[from] CodecError),
}

impl Error {
    /// Build a connection error for the given remote.
    pub fn connection(remote: &str, message: impl Into<String>, timeout: bool) -> Self {
        Self::Connection {
            message: message.into(),
            remote: remote.to_string(),
            timeout,
        }
    }

    /// Build a context (deadline) error for the given remote.
    pub fn context(remote: &str, message: impl Into<String>) -> Self {
        Self::Context {
            message: message.into(),
            remote: remote.to_string(),
        }
    }

    /// Error returned to callers of a connection that is no longer open.
    ///
    /// When the connection died because of `cause`, the cause is folded into
    /// the message.
    pub fn closed(remote: &str, cause: Option<&Error>) -> Self {
        let message = match cause {
            Some(err) => format!("Connection error: {}", err),
            None => "Connection closed".to_string(),
        };
        Self::connection(remote, message, false)
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection { .. } => ErrorKind::Connection,
            Error::Context { .. } => ErrorKind::Context,
            Error::Server { .. } | Error::Definition(_) => ErrorKind::Query,
        }
    }

    /// Is the error connection related (and therefore worth a reconnect)?
    #[inline]
    pub fn is_connection(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    /// Did a connection-level operation time out?
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Connection { timeout: true, .. })
    }
}

/// Errors raised by the value and frame codecs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Not enough bytes buffered yet to hold the declared frame.
    #[error("incomplete frame: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// The bytes do not form a valid frame or value.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The schema lookup has no space with this name.
    #[error("unknown space '{0}'")]
    UnknownSpace(String),

    /// The schema lookup has no such index on the space.
    #[error("unknown index '{index}' in space {space}")]
    UnknownIndex { space: u32, index: String },

    /// A value could not be written.
    #[error("encode error: {0}")]
    Encode(String),

    /// Declared body length exceeds the configured maximum.
    #[error("body size {size} exceeds maximum {max}")]
    BodyTooLarge { size: u32, max: u32 },
}

impl CodecError {
    /// Shorthand for [`CodecError::Malformed`].
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Is this the "read more" condition rather than a corrupt stream?
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Incomplete { .. })
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            Error::connection("h:1", "boom", false).kind(),
            ErrorKind::Connection
        );
        assert_eq!(Error::context("h:1", "late").kind(), ErrorKind::Context);
        assert_eq!(
            Error::Server {
                code: 33,
                message: "no such proc".into()
            }
            .kind(),
            ErrorKind::Query
        );
        assert_eq!(
            Error::from(CodecError::UnknownSpace("x".into())).kind(),
            ErrorKind::Query
        );
    }

    #[test]
    fn test_connection_flag_and_timeout() {
        let timed_out = Error::connection("h:1", "read timeout", true);
        assert!(timed_out.is_connection());
        assert!(timed_out.is_timeout());

        let broken = Error::connection("h:1", "reset", false);
        assert!(broken.is_connection());
        assert!(!broken.is_timeout());

        let late = Error::context("h:1", "deadline");
        assert!(!late.is_connection());
        assert!(!late.is_timeout());
    }

    #[test]
    fn test_closed_message_includes_cause() {
        let plain = Error::closed("db:3301", None);
        assert_eq!(plain.to_string(), "Connection closed, remote: db:3301");

        let cause = Error::connection("db:3301", "reset by peer", false);
        let wrapped = Error::closed("db:3301", Some(&cause));
        assert!(wrapped.to_string().starts_with("Connection error: reset by peer"));
        assert!(wrapped.is_connection());
    }

    #[test]
    fn test_codec_incomplete() {
        assert!(CodecError::Incomplete { needed: 1 }.is_incomplete());
        assert!(!CodecError::malformed("bad").is_incomplete());
    }
}
