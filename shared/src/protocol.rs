//! Wire protocol types and framing for pasteport.
//!
//! Every frame is a 4-byte big-endian length followed by a JSON body.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default agent port
pub const DEFAULT_PORT: u16 = 2489;

/// Request sent from client to agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    Open(OpenParams),
    Copy(CopyParams),
    Paste,
    SendKeys(SendKeysParams),
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::Open(_) => Method::Open,
            Request::Copy(_) => Method::Copy,
            Request::Paste => Method::Paste,
            Request::SendKeys(_) => Method::SendKeys,
        }
    }
}

/// Method names, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Open,
    Copy,
    Paste,
    SendKeys,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Method::Open => "URI.Open",
            Method::Copy => "Clipboard.Copy",
            Method::Paste => "Clipboard.Paste",
            Method::SendKeys => "Tmux.SendKeys",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenParams {
    pub uri: String,
    pub translate_loopback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyParams {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendKeysParams {
    pub target_pane: String,
    pub keys: String,
    pub select_target_pane: bool,
}

/// Method-specific result payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Reply {
    Done,
    Text(String),
}

/// Response from agent; exactly one per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub result: Option<Reply>,
    pub error: Option<String>,
    /// Set only when the agent rejects the connection and is configured to say so
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub denied: bool,
}

impl Response {
    pub fn ok(reply: Reply) -> Self {
        Self {
            result: Some(reply),
            error: None,
            denied: false,
        }
    }

    pub fn err(detail: impl Into<String>) -> Self {
        let mut detail = detail.into();
        if detail.is_empty() {
            detail = "unknown error".to_string();
        }
        Self {
            result: None,
            error: Some(detail),
            denied: false,
        }
    }

    pub fn denied() -> Self {
        Self {
            result: None,
            error: Some("access denied".to_string()),
            denied: true,
        }
    }

    /// Collapse into the caller-facing result
    pub fn into_result(self) -> Result<Reply> {
        if self.denied {
            return Err(Error::Denied);
        }
        match (self.error, self.result) {
            (Some(detail), _) => Err(Error::Operation(detail)),
            (None, Some(reply)) => Ok(reply),
            (None, None) => Err(Error::Protocol("response carries neither result nor error".into())),
        }
    }
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)
        .map_err(|e| Error::Protocol(format!("encode failed: {}", e)))?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(Error::FrameTooLarge(body.len()));
    }

    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
///
/// Returns `Ok(None)` on a clean EOF before the length prefix.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::ConnectionClosed);
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
        _ => Error::Io(e),
    })?;

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("malformed frame: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let req = Request::SendKeys(SendKeysParams {
            target_pane: "main:1.0".into(),
            keys: "ls Enter".into(),
            select_target_pane: true,
        });

        write_frame(&mut a, &req).await.unwrap();
        let got: Request = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(got, req);
        assert_eq!(got.method(), Method::SendKeys);
    }

    #[tokio::test]
    async fn test_clean_eof() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let got: Option<Request> = read_frame(&mut b).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"{\"me").await.unwrap();
        drop(a);
        let err = read_frame::<_, Request>(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_MESSAGE_SIZE as u32) + 1).to_be_bytes()).await.unwrap();
        let err = read_frame::<_, Request>(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge(_)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_garbage_body() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&3u32.to_be_bytes()).await.unwrap();
        a.write_all(b"xyz").await.unwrap();
        let err = read_frame::<_, Request>(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_response_into_result() {
        assert_eq!(
            Response::ok(Reply::Text("hi".into())).into_result().unwrap(),
            Reply::Text("hi".into())
        );
        assert!(matches!(
            Response::err("boom").into_result(),
            Err(Error::Operation(d)) if d == "boom"
        ));
        assert!(matches!(Response::denied().into_result(), Err(Error::Denied)));
        // Empty detail still reaches the caller as a non-empty message
        assert!(matches!(
            Response::err("").into_result(),
            Err(Error::Operation(d)) if !d.is_empty()
        ));
    }
}
