//! Maps requests to capability calls.

use std::net::IpAddr;
use std::sync::Arc;

use pasteport_shared::protocol::{CopyParams, OpenParams, Reply, Request, Response, SendKeysParams};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityError, Capabilities};
use crate::loopback::translate_loopback;

/// Executes requests for every connection of one agent
#[derive(Clone)]
pub struct Dispatcher {
    capabilities: Capabilities,
    /// Admits one multiplexer command at a time across all connections
    send_keys_gate: Arc<Mutex<()>>,
    translate_loopback: bool,
}

impl Dispatcher {
    pub fn new(capabilities: Capabilities, translate_loopback: bool) -> Self {
        Self {
            capabilities,
            send_keys_gate: Arc::new(Mutex::new(())),
            translate_loopback,
        }
    }

    /// Run one request on behalf of `peer`. Never fails the connection.
    pub async fn dispatch(&self, request: Request, peer: IpAddr) -> Response {
        let method = request.method();
        let result = match request {
            Request::Open(params) => self.open(params, peer).await,
            Request::Copy(params) => self.copy(params).await,
            Request::Paste => self.paste().await,
            Request::SendKeys(params) => self.send_keys(params).await,
        };

        match result {
            Ok(reply) => Response::ok(reply),
            Err(detail) => {
                warn!("{} from {} failed: {}", method, peer, detail);
                Response::err(detail)
            }
        }
    }

    async fn open(&self, params: OpenParams, peer: IpAddr) -> Result<Reply, String> {
        let uri = if params.translate_loopback && self.translate_loopback {
            translate_loopback(&params.uri, peer)
        } else {
            params.uri
        };
        info!("Opening {}", uri);

        let opener = self.capabilities.opener.clone();
        blocking(move || opener.open(&uri)).await?;
        Ok(Reply::Done)
    }

    async fn copy(&self, params: CopyParams) -> Result<Reply, String> {
        debug!("Copying {} bytes", params.text.len());
        let clipboard = self.capabilities.clipboard.clone();
        blocking(move || clipboard.copy(&params.text)).await?;
        Ok(Reply::Done)
    }

    async fn paste(&self) -> Result<Reply, String> {
        let clipboard = self.capabilities.clipboard.clone();
        let text = blocking(move || clipboard.paste()).await?;
        debug!("Pasting {} bytes", text.len());
        Ok(Reply::Text(text))
    }

    async fn send_keys(&self, params: SendKeysParams) -> Result<Reply, String> {
        let _turn = self.send_keys_gate.lock().await;
        info!("SendKeys to {}: {:?}", params.target_pane, params.keys);

        let multiplexer = self.capabilities.multiplexer.clone();
        let target = params.target_pane.clone();
        blocking(move || multiplexer.send_keys(&target, &params.keys))
            .await
            .map_err(|e| format!("send-keys failed: {}", e))?;

        if params.select_target_pane {
            let multiplexer = self.capabilities.multiplexer.clone();
            let target = params.target_pane;
            blocking(move || multiplexer.select_pane(&target))
                .await
                .map_err(|e| format!("keys were delivered, but select-pane failed: {}", e))?;
        }

        Ok(Reply::Done)
    }
}

/// Run a capability call on the blocking pool, flattening errors to text
async fn blocking<T, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T, CapabilityError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("capability task failed: {}", e)),
    }
}
