//! Dialing the agent, with fallback to an in-process loopback agent.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use pasteport_agent::{Agent, AgentConfig, AgentHandle, Capabilities};
use pasteport_shared::{Error, Result, RpcClient};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Where the client dials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl Endpoint {
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Connect within the endpoint's timeout
pub async fn dial(endpoint: &Endpoint) -> Result<TcpStream> {
    let addr = endpoint.address();
    debug!("Dialing {}", addr);
    match timeout(endpoint.connect_timeout, TcpStream::connect(addr.as_str())).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(source)) => Err(Error::Dial { addr, source }),
        Err(_) => Err(Error::Timeout),
    }
}

/// What to do when the configured agent cannot be reached
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    pub enabled: bool,
    /// Loopback port for the local agent; 0 picks a free port
    pub port: u16,
    /// Suppress the fallback warning
    pub quiet: bool,
    pub tmux_path: PathBuf,
}

/// Loopback agent serving this process, or one already running on the port
pub struct LocalAgent {
    addr: SocketAddr,
    handle: Option<AgentHandle>,
}

impl LocalAgent {
    /// Start an agent on `127.0.0.1:port`, or reuse whoever already listens there
    pub async fn ensure(port: u16, capabilities: Capabilities) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let agent = Agent::from_listener(listener, AgentConfig::loopback(port), capabilities);
                let handle = agent.spawn()?;
                info!("Started local agent on {}", handle.local_addr());
                Ok(Self {
                    addr: handle.local_addr(),
                    handle: Some(handle),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                debug!("Port {} busy, reusing the agent already listening there", port);
                Ok(Self { addr, handle: None })
            }
            Err(e) => Err(Error::Fallback(format!("cannot start local agent on {}: {}", addr, e))),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// True when this process runs the agent
    pub fn is_owned(&self) -> bool {
        self.handle.is_some()
    }

    pub async fn shutdown(self) {
        if let Some(handle) = self.handle {
            handle.shutdown().await;
        }
    }
}

/// Supplies live connections: the configured endpoint, else a local agent
pub struct Connector {
    endpoint: Endpoint,
    fallback: FallbackPolicy,
    capabilities: Option<Capabilities>,
    local: Option<LocalAgent>,
}

impl Connector {
    pub fn new(endpoint: Endpoint, fallback: FallbackPolicy) -> Self {
        Self {
            endpoint,
            fallback,
            capabilities: None,
            local: None,
        }
    }

    /// Capabilities for a fallback agent started by this connector
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The fallback agent, once one has been needed
    pub fn local_agent(&self) -> Option<&LocalAgent> {
        self.local.as_ref()
    }

    pub async fn connect(&mut self) -> Result<RpcClient> {
        let err = match dial(&self.endpoint).await {
            Ok(stream) => return Ok(RpcClient::new(stream)),
            Err(e) => e,
        };
        if !self.fallback.enabled {
            return Err(err);
        }
        if !self.fallback.quiet {
            warn!("{}", err);
            warn!("Falling back to localhost");
        }

        let addr = match &self.local {
            Some(local) => local.local_addr(),
            None => {
                let capabilities = self
                    .capabilities
                    .clone()
                    .unwrap_or_else(|| Capabilities::system(&self.fallback.tmux_path));
                let local = LocalAgent::ensure(self.fallback.port, capabilities).await?;
                let addr = local.local_addr();
                self.local = Some(local);
                addr
            }
        };

        let local_endpoint = Endpoint {
            host: addr.ip().to_string(),
            port: addr.port(),
            connect_timeout: self.endpoint.connect_timeout.max(Duration::from_secs(1)),
        };
        let stream = dial(&local_endpoint)
            .await
            .map_err(|e| Error::Fallback(format!("local agent unreachable: {}", e)))?;
        Ok(RpcClient::new(stream))
    }

    /// Stop the fallback agent if this connector started one
    pub async fn shutdown(mut self) {
        if let Some(local) = self.local.take() {
            local.shutdown().await;
        }
    }
}
