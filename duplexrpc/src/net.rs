//! TCP convenience helpers, gated behind the `tcp` feature (on by default):
//! "get me a `Connection` over a `TcpStream`", with framing and dispatch
//! living in [`crate::connection`].

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::connection::{Connection, Dispatch};
use crate::error::RpcError;
use crate::object_data::ObjectData;

/// Connect to `addr` and spawn a [`Connection`] over the resulting TCP
/// stream, serving `target` to the peer.
pub async fn connect_tcp<A>(
    addr: A,
    target: Arc<dyn Dispatch>,
    object_data: ObjectData,
) -> Result<Connection, RpcError>
where
    A: ToSocketAddrs,
{
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true).ok();
    Ok(Connection::spawn(stream, target, object_data))
}

/// Accept one inbound TCP connection on `listener` and spawn a [`Connection`]
/// serving `target` over it.
pub async fn accept_tcp(
    listener: &TcpListener,
    target: Arc<dyn Dispatch>,
    object_data: ObjectData,
) -> Result<Connection, RpcError> {
    let (stream, _peer) = listener.accept().await?;
    stream.set_nodelay(true).ok();
    Ok(Connection::spawn(stream, target, object_data))
}
