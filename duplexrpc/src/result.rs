//! The three-state outcome of an RPC call: `Valid`, `Exception`, or
//! `Aborted`. This is what a caller actually sees -- distinct from the
//! crate-internal [`crate::error::RpcError`].

use crate::error::{RpcError, RpcErrorKind};

/// Outcome of an outbound RPC call.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResult<T> {
    /// The call completed and the target returned a value.
    Valid(T),
    /// The target's method returned an error, or dispatch failed in a way
    /// attributable to the remote side. Carries the error message verbatim.
    Exception(String),
    /// The connection was closed (or was already closed) before a reply
    /// arrived.
    Aborted,
}

impl<T> RpcResult<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, RpcResult::Valid(_))
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, RpcResult::Exception(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RpcResult::Aborted)
    }

    /// Surface the value, or fail with the stored exception / the fixed
    /// "RPC reply was aborted" message -- the Rust stand-in for the
    /// original's `Result::get()`, which throws.
    pub fn get(self) -> Result<T, RpcError> {
        match self {
            RpcResult::Valid(v) => Ok(v),
            RpcResult::Exception(msg) => Err(RpcError::new(RpcErrorKind::Other, msg)),
            RpcResult::Aborted => Err(RpcError::new(
                RpcErrorKind::Transport,
                "RPC reply was aborted",
            )),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RpcResult<U> {
        match self {
            RpcResult::Valid(v) => RpcResult::Valid(f(v)),
            RpcResult::Exception(e) => RpcResult::Exception(e),
            RpcResult::Aborted => RpcResult::Aborted,
        }
    }
}
