//! Uniform internal error type for the RPC engine.
//!
//! This is distinct from [`crate::result::RpcResult`], which is what callers
//! of an RPC see. `RpcError` is used internally (malformed frames, transport
//! failures, dispatch-time problems) and is also the thing `RpcResult::get`
//! surfaces when a call did not come back `Valid`.

use std::fmt;

/// Broad classification of an [`RpcError`], mirroring the error kinds listed
/// in the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// A frame, header, or payload violated the wire protocol (bad
    /// correlation key, truncated read, oversized method table, ...).
    /// Always fatal to the connection.
    Protocol,
    /// The underlying transport failed (connect refused, peer reset, local
    /// shutdown).
    Transport,
    /// Writing or reading a value through the `Stream` codec failed.
    Serialization,
    /// A request referenced a method ordinal with no entry in the table.
    UnknownMethod,
    /// Something the crate itself should never observe at runtime (an
    /// invariant violated internally, not by a peer).
    IllegalState,
    /// Any other failure, generally surfaced as a remote exception string.
    Other,
}

/// Generic serializable error with a description and optional cause,
/// used to carry a `std::error::Error` chain across the wire as plain text.
#[derive(Debug, Clone)]
pub struct GenericSerializableError {
    description: String,
    cause: Option<Box<GenericSerializableError>>,
}

impl GenericSerializableError {
    pub fn new(e: &(dyn std::error::Error + 'static)) -> Self {
        let cause = e.source().map(|c| Box::new(GenericSerializableError::new(c)));
        GenericSerializableError {
            description: e.to_string(),
            cause,
        }
    }
}

impl fmt::Display for GenericSerializableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(e) => write!(f, "{} caused by:\n {}", self.description, e),
            None => write!(f, "{}", self.description),
        }
    }
}

impl std::error::Error for GenericSerializableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as _)
    }
}

/// The crate's internal error type. All functions in `duplexrpc` that can
/// fail return `Result<T, RpcError>`.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub kind: RpcErrorKind,
    msg: String,
    cause: Option<Box<GenericSerializableError>>,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, msg: impl Into<String>) -> Self {
        RpcError {
            kind,
            msg: msg.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        kind: RpcErrorKind,
        msg: impl Into<String>,
        cause: &(dyn std::error::Error + 'static),
    ) -> Self {
        RpcError {
            kind,
            msg: msg.into(),
            cause: Some(Box::new(GenericSerializableError::new(cause))),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Protocol, msg)
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Transport, msg)
    }

    pub fn kind(&self) -> RpcErrorKind {
        self.kind
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(e) => write!(f, "{} caused by:\n {}", self.msg, e),
            None => write!(f, "{}", self.msg),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as _)
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        RpcError::with_cause(RpcErrorKind::Transport, "i/o error", &e)
    }
}
