//! Smoke test for `#[rpc_service]`'s expansion, independent of the fuller
//! scenario coverage in `duplexrpc/tests/rpc.rs`: one trait, one impl, one
//! call over an in-memory duplex pipe.

use std::sync::Arc;

use duplexrpc::{rpc_service, Connection, NullTarget, ObjectData};

#[rpc_service]
pub trait Foo {
    async fn bar(&self, a: String, b: i32) -> Result<String, duplexrpc::RpcError>;
}

struct FooImpl;

#[async_trait::async_trait]
impl Foo for FooImpl {
    async fn bar(&self, a: String, b: i32) -> Result<String, duplexrpc::RpcError> {
        Ok(format!("{} is {}", a, b))
    }
}

#[tokio::test]
async fn basic_rpc() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let _server = Connection::spawn(
        server_io,
        Arc::new(FooDispatch::new(FooImpl)),
        ObjectData::for_ptr(1usize as *const u8),
    );
    let client_conn = Connection::spawn(client_io, Arc::new(NullTarget), ObjectData::for_ptr(2usize as *const u8));
    let client = FooClient::new(client_conn);

    let result = client.bar("the answer".to_string(), 42).await.unwrap();
    assert_eq!("the answer is 42", result);
}
