//! duplexrpc is a bidirectional binary RPC framework: both ends of a
//! connection can call methods on the other, over a single compact wire
//! format, with calls dispatched through a compile-time method table rather
//! than runtime reflection.
//!
//! The `#[rpc_service]` attribute macro does the heavy lifting. Applied to a
//! trait, it generates a typed async client plus the server-side dispatch
//! glue binding a type implementing that trait into the engine's
//! [`Dispatch`](connection::Dispatch) seam.
//!
//! ```ignore
//! #[duplexrpc::rpc_service]
//! pub trait Calculator {
//!     async fn add(&self, a: i32, b: i32) -> i32;
//! }
//! ```
//!
//! Given some `MyCalculator: Calculator`, a server hands that type to
//! [`Connection::spawn`](connection::Connection::spawn) wrapped as a
//! `CalculatorDispatch`, and a client gets a `CalculatorClient` wrapping a
//! [`Connection`](connection::Connection) with ordinary-looking async
//! methods.
//!
//! Calls are symmetric: either side of a `Connection` can be a client, a
//! server, or both -- a peer can expose a target while also calling back
//! into the other side on the same wire.
//!
//! Beyond typed calls, any connection also exposes a dynamically-typed
//! ([`Any`](any::Any)-parameter, `Any`-return) call path
//! ([`Connection::call_generic`](connection::Connection::call_generic)),
//! used both by user code that doesn't know a method's exact signature
//! ahead of time and by three reserved built-ins: `__auth`,
//! `__getProperty`, `__setProperty`.

#![allow(clippy::type_repetition_in_bounds)]

pub extern crate duplexrpc_macros;
pub use duplexrpc_macros::rpc_service;

/// Re-exported so code generated by `#[rpc_service]` doesn't require
/// downstream crates to separately depend on `async_trait`.
#[doc(hidden)]
pub use async_trait as __async_trait;

/// Re-exported so the dispatcher generated by `#[rpc_service]` can log
/// through the same facade as the rest of the crate without requiring
/// downstream crates to separately depend on `log`.
#[doc(hidden)]
pub use log;

pub mod any;
pub mod connection;
pub mod error;
pub mod header;
pub mod object_data;
pub mod pending;
pub mod result;
pub mod stream;
pub mod transport;

#[cfg(feature = "tcp")]
pub mod net;

pub use any::Any;
pub use connection::{Awaiter, Connection, Dispatch, DispatchOutcome, NullTarget};
pub use error::{RpcError, RpcErrorKind};
pub use header::{Header, GENERIC_METHOD_ID, HEADER_LEN, MAX_METHODS};
pub use object_data::ObjectData;
pub use result::RpcResult;
pub use stream::{Blob, Stream, StreamResult, WireType};
