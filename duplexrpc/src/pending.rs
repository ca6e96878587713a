//! The outbound-side pending-call registry: correlation key -> continuation
//! awaiting a matching reply.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{RpcError, RpcErrorKind};

/// What an outbound call's continuation is eventually handed, decoded from
/// the reply frame.
#[derive(Debug)]
pub enum PendingOutcome {
    /// `success = 1`: raw serialized return value bytes, still to be
    /// decoded by the typed `Awaiter`.
    Value(Vec<u8>),
    /// `success = 0`: the remote exception message.
    Exception(String),
}

/// Correlation-key -> continuation map. A continuation is simply dropped
/// (never fired) when the connection closes with calls still outstanding;
/// the corresponding `oneshot::Receiver` then resolves to a `RecvError`,
/// which the `Awaiter` maps to `RpcResult::Aborted` -- this is what lets
/// "abort on close" fall out of ordinary `Sender` drop semantics instead of
/// needing an explicit abort message type.
pub struct PendingCalls {
    inner: Mutex<HashMap<u32, oneshot::Sender<PendingOutcome>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        PendingCalls {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a continuation for `key`. Must be called before the request
    /// frame is handed to the transport, so a fast peer can never reply
    /// before the awaiter exists.
    pub fn register(&self, key: u32, tx: oneshot::Sender<PendingOutcome>) {
        let previous = self.inner.lock().insert(key, tx);
        debug_assert!(
            previous.is_none(),
            "RPC correlation key {} collided with an outstanding call",
            key
        );
    }

    /// Withdraw the continuation registered for `key`, if any, without
    /// resolving it -- dropping the returned sender resolves its
    /// `Awaiter` `Aborted`. Used by `call` to reclaim a registration that
    /// raced a concurrent `close`'s `abort_all`.
    pub fn remove(&self, key: u32) -> Option<oneshot::Sender<PendingOutcome>> {
        self.inner.lock().remove(&key)
    }

    /// Deliver `outcome` to the continuation registered for `key`, invoking
    /// it exactly once. Returns a protocol error if no such continuation is
    /// outstanding -- the caller is expected to close the connection.
    pub fn complete(&self, key: u32, outcome: PendingOutcome) -> Result<(), RpcError> {
        let tx = self.inner.lock().remove(&key);
        match tx {
            Some(tx) => {
                // The receiver may already be gone if the caller dropped
                // the Awaiter; that's not a protocol error.
                let _ = tx.send(outcome);
                Ok(())
            }
            None => Err(RpcError::new(
                RpcErrorKind::Protocol,
                format!("received a reply for unknown correlation key {}", key),
            )),
        }
    }

    /// Drop every outstanding continuation. Each corresponding `Awaiter`
    /// resolves `RpcResult::Aborted`.
    pub fn abort_all(&self) {
        self.inner.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_registered_call() {
        let pending = PendingCalls::new();
        let (tx, rx) = oneshot::channel();
        pending.register(1, tx);
        pending.complete(1, PendingOutcome::Exception("x".into())).unwrap();
        match rx.await.unwrap() {
            PendingOutcome::Exception(msg) => assert_eq!(msg, "x"),
            _ => panic!("wrong outcome"),
        }
    }

    #[test]
    fn completing_unknown_key_is_a_protocol_error() {
        let pending = PendingCalls::new();
        assert!(pending
            .complete(42, PendingOutcome::Exception("x".into()))
            .is_err());
    }

    #[tokio::test]
    async fn remove_withdraws_without_completing_and_dropping_it_aborts() {
        let pending = PendingCalls::new();
        let (tx, rx) = oneshot::channel();
        pending.register(1, tx);

        let withdrawn = pending.remove(1);
        assert!(withdrawn.is_some());
        assert_eq!(pending.len(), 0);
        drop(withdrawn);

        assert!(rx.await.is_err());
    }

    #[test]
    fn remove_on_an_absent_key_is_a_harmless_none() {
        let pending = PendingCalls::new();
        assert!(pending.remove(7).is_none());
    }

    #[tokio::test]
    async fn abort_all_resolves_every_outstanding_receiver() {
        let pending = PendingCalls::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.register(1, tx1);
        pending.register(2, tx2);
        assert_eq!(pending.len(), 2);

        pending.abort_all();

        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }
}
