//! `Connection`: the single, bidirectional facade a peer uses both to issue
//! calls and to serve them. One type serves both roles rather than splitting
//! a base connection from a typed local/remote pair -- either side of a wire
//! can expose a target while also calling back into its peer.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::any::Any;
use crate::error::RpcError;
use crate::header::{Header, GENERIC_METHOD_ID, HEADER_LEN};
use crate::object_data::ObjectData;
use crate::pending::{PendingCalls, PendingOutcome};
use crate::result::RpcResult;
use crate::stream::{Stream, WireType};
use crate::transport::frame;

/// What dispatching one inbound request against a target's method table
/// produced.
pub enum DispatchOutcome {
    /// Reply `success = 1` with this serialized return value.
    Value(Vec<u8>),
    /// Reply `success = 1` with an empty payload (the method returns `()`).
    Void,
    /// Reply `success = 0` with this message.
    Error(String),
    /// The method is still running; deliver whichever of the above it
    /// eventually produces.
    Async(Pin<Box<dyn Future<Output = DispatchOutcome> + Send>>),
}

/// Implemented by the `#[rpc_service]`-generated wrapper that binds a user's
/// target object to its interface's compile-time dispatch table. This is the
/// one seam between the engine (this crate) and the generated code.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, method_id: u8, args: Stream) -> DispatchOutcome;
}

/// Inbound handler for a connection with nothing local to serve. Any
/// non-generic request against it fails with a fixed message.
pub struct NullTarget;

#[async_trait]
impl Dispatch for NullTarget {
    async fn dispatch(&self, _method_id: u8, _args: Stream) -> DispatchOutcome {
        DispatchOutcome::Error(
            "Peer doesn't have an object to process RPC calls".to_string(),
        )
    }
}

type GenericHandler =
    Arc<dyn Fn(Vec<Any>) -> Pin<Box<dyn Future<Output = Result<Any, String>> + Send>> + Send + Sync>;

tokio::task_local! {
    static CURRENT_CONNECTION: Connection;
}

struct Inner {
    target: Arc<dyn Dispatch>,
    object_data: ObjectData,
    pending: PendingCalls,
    counter: AtomicU32,
    auth_passed: AtomicBool,
    writer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    closed: AtomicBool,
    generics: RwLock<HashMap<String, GenericHandler>>,
}

/// A live bidirectional RPC connection: outbound calls through `call`/
/// `call_generic`, inbound dispatch driven in the background once `spawn`ed.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Take over `io`, spawning the background tasks that drive inbound
    /// dispatch and outbound writes. `target` serves inbound calls (use
    /// [`NullTarget`] if this side has nothing to expose); `object_data`
    /// identifies the target object for the shared property map / auth
    /// token (see [`ObjectData::for_ptr`]).
    pub fn spawn<IO>(io: IO, target: Arc<dyn Dispatch>, object_data: ObjectData) -> Connection
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let auth_passed = !object_data.requires_auth();

        let inner = Arc::new(Inner {
            target,
            object_data,
            pending: PendingCalls::new(),
            counter: AtomicU32::new(0),
            auth_passed: AtomicBool::new(auth_passed),
            writer: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            generics: RwLock::new(HashMap::new()),
        });
        let conn = Connection { inner };

        let (mut sink, mut stream) = frame(io).split();

        // Single task owns the sink, so at most one write is ever in
        // flight and frames are written in enqueue order.
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if sink.send(bytes).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let read_conn = conn.clone();
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(frame)) => {
                        // Replies are a quick, synchronous pending-map
                        // lookup, so they're handled inline to preserve
                        // wire arrival order. Requests are spawned onto
                        // their own task: a dispatcher may itself issue a
                        // nested call back to this same peer (the
                        // bidirectional case), and that nested call's reply
                        // can only ever arrive through this same read loop
                        // -- awaiting the dispatch here would deadlock it.
                        match read_conn.route_frame(frame.freeze()) {
                            Ok(Some(fut)) => {
                                tokio::spawn(fut);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                log::warn!("closing RPC connection: {}", e);
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("RPC transport read error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            read_conn.close();
        });

        conn
    }

    /// The `Connection` currently dispatching the inbound request on this
    /// task, if any -- lets a target method reply with knowledge of which
    /// peer is calling it (e.g. to call back). Set for the duration of each
    /// non-generic dispatch via [`tokio::task_local`] so it survives
    /// `.await` points on a multi-threaded runtime, unlike a plain
    /// thread-local.
    pub fn current() -> Option<Connection> {
        CURRENT_CONNECTION.try_with(|c| c.clone()).ok()
    }

    /// Register a handler for a user-defined generic RPC, reachable by
    /// peers via [`Connection::call_generic`] under `name`. The three
    /// reserved names (`__auth`, `__getProperty`, `__setProperty`) cannot be
    /// overridden this way.
    pub fn register_generic<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Any>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Any, String>> + Send + 'static,
    {
        let handler: GenericHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.inner.generics.write().insert(name.into(), handler);
    }

    /// Invoke method `method_id` with `args` already serialized into a
    /// [`Stream`]. Generated client code is the intended caller; it knows
    /// each method's ordinal and return type.
    pub fn call<T: WireType<Store = T>>(&self, method_id: u8, args: Stream) -> Awaiter<T> {
        let (tx, rx) = oneshot::channel();

        if self.inner.closed.load(Ordering::SeqCst) {
            drop(tx);
            return Awaiter {
                rx,
                _marker: PhantomData,
            };
        }

        let counter = self.inner.counter.fetch_add(1, Ordering::SeqCst);
        let header = Header::request(counter, method_id, args.written_len() as u32);
        let payload = args.extract_buffer();

        // Register before handing the frame to the transport: a reply can
        // never arrive before its Awaiter exists.
        self.inner.pending.register(header.key(), tx);

        // The closed-check above and this registration aren't atomic with
        // `close`'s own swap + `abort_all`: a `close()` that runs entirely
        // between them sees an empty pending map and aborts nothing, then
        // this registration lands in the map with nothing left to ever
        // resolve it. Re-checking `closed` after registering and
        // withdrawing our own entry if it's now set closes that window --
        // if `close()` instead raced in after this check, its `abort_all`
        // either already dropped this same entry (harmless double removal)
        // or is still to come and will drop it normally.
        if self.inner.closed.load(Ordering::SeqCst) {
            drop(self.inner.pending.remove(header.key()));
            return Awaiter {
                rx,
                _marker: PhantomData,
            };
        }

        self.send_frame(header, payload);

        Awaiter {
            rx,
            _marker: PhantomData,
        }
    }

    /// Issue a dynamically-typed (`Any`-parameter, `Any`-return) call by
    /// name, routed through the reserved generic ordinal.
    pub fn call_generic(&self, name: &str, args: Vec<Any>) -> Awaiter<Any> {
        let mut s = Stream::new();
        String::write(&mut s, &name.to_string());
        Vec::<Any>::write(&mut s, &args);
        self.call::<Any>(GENERIC_METHOD_ID, s)
    }

    /// Request this connection's auth gate be lifted with `token`. Returns
    /// whether the peer accepted it.
    pub async fn authenticate(&self, token: &str) -> RpcResult<bool> {
        self.call_generic("__auth", vec![Any::String(token.to_string())])
            .wait()
            .await
            .map(|v| v.get_as::<bool>().unwrap_or(false))
    }

    /// Close the connection: stop writing new frames and resolve every
    /// outstanding call `Aborted`. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.writer.lock().take();
            self.inner.pending.abort_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn send_frame(&self, header: Header, payload: Vec<u8>) {
        let writer = self.inner.writer.lock();
        if let Some(tx) = writer.as_ref() {
            let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
            let mut hdr_bytes = [0u8; HEADER_LEN];
            header.encode(&mut hdr_bytes);
            buf.extend_from_slice(&hdr_bytes);
            buf.extend_from_slice(&payload);
            let _ = tx.send(Bytes::from(buf));
        }
    }

    /// Decode one inbound frame's header and route it. A reply is handled
    /// immediately (cheap, synchronous pending-map lookup) and this returns
    /// `Ok(None)`; a request is *not* dispatched here -- this returns the
    /// dispatch as a boxed future for the caller to `tokio::spawn`, so the
    /// read loop can keep consuming frames (in particular, any reply a
    /// nested call from within that dispatch is waiting on) while the
    /// dispatch runs.
    fn route_frame(
        &self,
        frame: Bytes,
    ) -> Result<Option<Pin<Box<dyn Future<Output = ()> + Send>>>, RpcError> {
        if frame.len() < HEADER_LEN {
            return Err(RpcError::protocol("frame shorter than its own header"));
        }
        let mut hdr_bytes = [0u8; HEADER_LEN];
        hdr_bytes.copy_from_slice(&frame[0..HEADER_LEN]);
        let header = Header::decode(&hdr_bytes);

        let payload_len = header.payload_len();
        if frame.len() < HEADER_LEN + payload_len {
            return Err(RpcError::protocol(
                "frame shorter than its own header advertises",
            ));
        }
        let payload = frame.slice(HEADER_LEN..HEADER_LEN + payload_len);

        if header.is_reply {
            self.handle_reply(header, payload)?;
            Ok(None)
        } else {
            let conn = self.clone();
            Ok(Some(Box::pin(async move {
                conn.handle_request(header, payload).await;
            })))
        }
    }

    fn handle_reply(&self, header: Header, payload: Bytes) -> Result<(), RpcError> {
        let outcome = if header.success {
            PendingOutcome::Value(payload.to_vec())
        } else {
            let mut s = Stream::from_vec(payload.to_vec());
            let msg = String::read(&mut s)
                .unwrap_or_else(|_| "malformed RPC error payload".to_string());
            PendingOutcome::Exception(msg)
        };
        self.inner.pending.complete(header.key(), outcome)
    }

    async fn handle_request(&self, header: Header, payload: Bytes) {
        let gate_active =
            self.inner.object_data.requires_auth() && !self.inner.auth_passed.load(Ordering::SeqCst);

        if header.method_id == GENERIC_METHOD_ID {
            self.handle_generic_request(header, payload, gate_active).await;
            return;
        }

        if gate_active {
            self.reply_error(header, "Not authenticated".to_string());
            return;
        }

        let target = self.inner.target.clone();
        let args = Stream::from_vec(payload.to_vec());
        let conn = self.clone();

        let outcome = CURRENT_CONNECTION
            .scope(conn, async move {
                match AssertUnwindSafe(target.dispatch(header.method_id, args))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => DispatchOutcome::Error("RPC target panicked".to_string()),
                }
            })
            .await;

        self.finish_dispatch(header, outcome).await;
    }

    async fn handle_generic_request(&self, header: Header, payload: Bytes, gate_active: bool) {
        let mut s = Stream::from_vec(payload.to_vec());
        let (name, args) = match <(String, Vec<Any>)>::read(&mut s) {
            Ok(v) => v,
            Err(e) => {
                self.reply_error(header, format!("malformed generic RPC request: {}", e));
                return;
            }
        };

        if gate_active && name != "__auth" {
            self.reply_error(header, "Not authenticated".to_string());
            return;
        }

        match self.dispatch_generic(&name, args).await {
            Ok(value) => self.reply_value(header, |s| Any::write(s, &value)),
            Err(msg) => self.reply_error(header, msg),
        }
    }

    async fn dispatch_generic(&self, name: &str, mut args: Vec<Any>) -> Result<Any, String> {
        match name {
            "__auth" => {
                if args.len() != 1 {
                    return Err("Invalid parameters for generic RPC".into());
                }
                let token: String = args
                    .remove(0)
                    .get_as()
                    .ok_or("Invalid parameters for generic RPC")?;
                let ok = self.inner.object_data.check_auth_token(&token);
                if ok {
                    self.inner.auth_passed.store(true, Ordering::SeqCst);
                }
                Ok(Any::Bool(ok))
            }
            "__getProperty" => {
                if args.len() != 1 {
                    return Err("Invalid parameters for generic RPC".into());
                }
                let name: String = args
                    .remove(0)
                    .get_as()
                    .ok_or("Invalid parameters for generic RPC")?;
                Ok(self.inner.object_data.get_property(&name))
            }
            "__setProperty" => {
                if args.len() != 2 {
                    return Err("Invalid parameters for generic RPC".into());
                }
                let value = args.remove(1);
                let name: String = args
                    .remove(0)
                    .get_as()
                    .ok_or("Invalid parameters for generic RPC")?;
                // `set_property` reads the prior value and writes the new
                // one under a single lock acquisition, so the reported
                // change can't be stale against a racing `__setProperty`.
                let changed = self.inner.object_data.set_property(name, value, true);
                Ok(Any::Bool(changed))
            }
            other => {
                let handler = self.inner.generics.read().get(other).cloned();
                match handler {
                    Some(f) => f(args).await,
                    None => Err("Generic RPC not found".into()),
                }
            }
        }
    }

    fn finish_dispatch(
        &self,
        header: Header,
        outcome: DispatchOutcome,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match outcome {
                DispatchOutcome::Value(bytes) => self.reply_bytes(header, true, bytes),
                DispatchOutcome::Void => self.reply_bytes(header, true, Vec::new()),
                DispatchOutcome::Error(msg) => self.reply_error(header, msg),
                DispatchOutcome::Async(fut) => {
                    let resolved = fut.await;
                    self.finish_dispatch(header, resolved).await;
                }
            }
        })
    }

    fn reply_bytes(&self, header: Header, success: bool, payload: Vec<u8>) {
        let reply = Header::reply(header.counter, header.method_id, success, payload.len() as u32);
        self.send_frame(reply, payload);
    }

    fn reply_error(&self, header: Header, msg: String) {
        let mut s = Stream::new();
        String::write(&mut s, &msg);
        self.reply_bytes(header, false, s.extract_buffer());
    }

    fn reply_value(&self, header: Header, write: impl FnOnce(&mut Stream)) {
        let mut s = Stream::new();
        write(&mut s);
        self.reply_bytes(header, true, s.extract_buffer());
    }
}

/// A pending outbound call's continuation. Produced by [`Connection::call`],
/// consumed with [`Awaiter::wait`] (or [`Awaiter::then`] /
/// [`Awaiter::blocking_wait`]).
pub struct Awaiter<T> {
    rx: oneshot::Receiver<PendingOutcome>,
    _marker: PhantomData<T>,
}

impl<T> Awaiter<T>
where
    T: WireType<Store = T> + Send + 'static,
{
    /// Await the reply, decoding a successful payload as `T`.
    pub async fn wait(self) -> RpcResult<T> {
        match self.rx.await {
            Ok(PendingOutcome::Value(bytes)) => {
                let mut s = Stream::from_vec(bytes);
                match T::read(&mut s) {
                    Ok(v) => RpcResult::Valid(v),
                    Err(e) => RpcResult::Exception(e.to_string()),
                }
            }
            Ok(PendingOutcome::Exception(msg)) => RpcResult::Exception(msg),
            Err(_) => RpcResult::Aborted,
        }
    }

    /// Run `cb` with the result once it arrives, on a spawned task.
    pub fn then<F>(self, cb: F)
    where
        F: FnOnce(RpcResult<T>) + Send + 'static,
    {
        tokio::spawn(async move {
            let result = self.wait().await;
            cb(result);
        });
    }

    /// Block the current thread for the reply. Requires a multi-threaded
    /// Tokio runtime; panics on a current-thread runtime, matching
    /// `tokio::task::block_in_place`'s own restriction.
    pub fn blocking_wait(self) -> RpcResult<T> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.wait())
        })
    }
}
