//! Synchronous request/response client over a single connection.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::{read_frame, write_frame, Reply, Request, Response};
use crate::{Error, Result};

/// One outstanding call at a time; `call` borrows the client mutably.
pub struct RpcClient<S = TcpStream> {
    stream: S,
}

impl<S> RpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Send a request and wait for its response.
    ///
    /// Operation failures come back as `Error::Operation`; anything that
    /// breaks the connection is a transport error.
    pub async fn call(&mut self, request: &Request) -> Result<Reply> {
        debug!("Calling {}", request.method());
        write_frame(&mut self.stream, request).await?;

        let response: Response = read_frame(&mut self.stream)
            .await?
            .ok_or(Error::ConnectionClosed)?;
        response.into_result()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CopyParams;

    #[tokio::test]
    async fn test_call_roundtrip() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let req: Request = read_frame(&mut server_side).await.unwrap().unwrap();
            assert_eq!(req, Request::Paste);
            write_frame(&mut server_side, &Response::ok(Reply::Text("clip".into())))
                .await
                .unwrap();
        });

        let mut rpc = RpcClient::new(client_side);
        assert_eq!(rpc.call(&Request::Paste).await.unwrap(), Reply::Text("clip".into()));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_closes_before_reply() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let _: Option<Request> = read_frame(&mut server_side).await.unwrap();
            drop(server_side);
        });

        let mut rpc = RpcClient::new(client_side);
        let err = rpc
            .call(&Request::Copy(CopyParams { text: "x".into() }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        server.await.unwrap();
    }
}
