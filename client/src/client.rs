//! Client-side operations: one connection, one call.

use std::net::IpAddr;
use std::path::Path;

use pasteport_shared::protocol::{CopyParams, OpenParams, Reply, Request, SendKeysParams};
use pasteport_shared::{Error, Result, RpcClient};
use tracing::{debug, error, info};

use crate::connection::Connector;
use crate::line_ending::{self, LineEnding};
use crate::tunnel::{self, TunnelConfig};

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Applied to pasted text
    pub line_ending: LineEnding,
    /// Ask the agent to map loopback hosts to our address
    pub trans_loopback: bool,
    /// Serve existing local paths through a tunnel
    pub trans_localfile: bool,
    pub tunnel: TunnelConfig,
}

pub struct Client {
    connector: Connector,
    options: ClientOptions,
}

impl Client {
    pub fn new(connector: Connector, options: ClientOptions) -> Self {
        Self { connector, options }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Open `uri` on the agent's machine.
    ///
    /// An existing local file is served through a tunnel, and this call
    /// returns only after the agent side has fetched it.
    pub async fn open(&mut self, uri: &str) -> Result<()> {
        let mut rpc = self.connector.connect().await?;

        let local_file = self.options.trans_localfile && Path::new(uri).is_file();
        let session = if local_file {
            let config = TunnelConfig {
                bind: tunnel_bind(&rpc)?,
                ..self.options.tunnel.clone()
            };
            Some(tunnel::serve(Path::new(uri), &config).await?)
        } else {
            None
        };

        let target = session
            .as_ref()
            .map(|s| s.url().to_string())
            .unwrap_or_else(|| uri.to_string());
        info!("Opening {}", target);

        expect_done(
            rpc.call(&Request::Open(OpenParams {
                uri: target,
                translate_loopback: self.options.trans_loopback || local_file,
            }))
            .await?,
        )?;

        if let Some(session) = session {
            session.wait().await?;
        }
        Ok(())
    }

    pub async fn copy(&mut self, text: &str) -> Result<()> {
        debug!("Sending: {}", text);
        let mut rpc = self.connector.connect().await?;
        expect_done(
            rpc.call(&Request::Copy(CopyParams {
                text: text.to_string(),
            }))
            .await?,
        )
    }

    /// Agent clipboard, with the configured line-ending conversion
    pub async fn paste(&mut self) -> Result<String> {
        let mut rpc = self.connector.connect().await?;
        match rpc.call(&Request::Paste).await? {
            Reply::Text(text) => Ok(line_ending::convert(&text, self.options.line_ending)),
            other => Err(Error::Protocol(format!("unexpected paste reply: {:?}", other))),
        }
    }

    /// Not idempotent: on error the keys may already have been delivered.
    pub async fn send_keys(&mut self, target: &str, keys: &str, select_target_pane: bool) -> Result<()> {
        debug!("Sending tmux keys to {}: {:?}", target, keys);
        let mut rpc = self.connector.connect().await?;
        let result = rpc
            .call(&Request::SendKeys(SendKeysParams {
                target_pane: target.to_string(),
                keys: keys.to_string(),
                select_target_pane,
            }))
            .await;
        if let Err(e) = &result {
            error!("Tmux.SendKeys failed: {}", e);
        }
        expect_done(result?)
    }

    /// Stop the fallback agent, if one was started
    pub async fn shutdown(self) {
        self.connector.shutdown().await;
    }
}

fn expect_done(reply: Reply) -> Result<()> {
    match reply {
        Reply::Done => Ok(()),
        other => Err(Error::Protocol(format!("unexpected reply: {:?}", other))),
    }
}

/// The address the agent reached us on, so the tunnel is only exposed on
/// that interface and matches the agent's address family
fn tunnel_bind(rpc: &RpcClient) -> Result<IpAddr> {
    Ok(rpc.get_ref().local_addr()?.ip())
}
