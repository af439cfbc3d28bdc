//! TCP agent: accepts connections, authorizes peers and dispatches requests.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use pasteport_shared::protocol::{read_frame, write_frame, Request, Response, DEFAULT_PORT};
use pasteport_shared::{Error, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::access::{AllowList, RejectPolicy};
use crate::capability::Capabilities;
use crate::dispatcher::Dispatcher;

/// Agent settings, fixed for the agent's lifetime
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen: SocketAddr,
    pub allow: AllowList,
    pub reject: RejectPolicy,
    /// Honour `translate_loopback` on open requests
    pub translate_loopback: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            allow: AllowList::allow_all(),
            reject: RejectPolicy::Silent,
            translate_loopback: true,
        }
    }
}

impl AgentConfig {
    /// Loopback-only agent used as the client's fallback
    pub fn loopback(port: u16) -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            ..Self::default()
        }
    }
}

struct Shared {
    allow: AllowList,
    reject: RejectPolicy,
    dispatcher: Dispatcher,
}

/// A bound agent, ready to serve
pub struct Agent {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Agent {
    pub async fn bind(config: AgentConfig, capabilities: Capabilities) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|e| Error::Config(format!("cannot listen on {}: {}", config.listen, e)))?;
        Ok(Self::from_listener(listener, config, capabilities))
    }

    /// Wrap an already bound listener; `config.listen` is ignored
    pub fn from_listener(listener: TcpListener, config: AgentConfig, capabilities: Capabilities) -> Self {
        let shared = Arc::new(Shared {
            allow: config.allow,
            reject: config.reject,
            dispatcher: Dispatcher::new(capabilities, config.translate_loopback),
        });
        Self { listener, shared }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process exits
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves. Connections already accepted keep running.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!("Agent listening on {} (allow: {})", addr, self.shared.allow);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let shared = self.shared.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, peer, shared).await;
                            });
                        }
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Agent on {} shutting down", addr);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Serve on a background task owned by the returned handle
    pub fn spawn(self) -> Result<AgentHandle> {
        let addr = self.local_addr()?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let stop = async {
                let _ = stop_rx.await;
            };
            if let Err(e) = self.run_until(stop).await {
                warn!("Agent on {} stopped: {}", addr, e);
            }
        });
        Ok(AgentHandle {
            addr,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }
}

/// Running background agent; stops accepting when shut down or dropped
pub struct AgentHandle {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AgentHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Accepted → Authorized → Dispatching → Closed
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    let peer_ip: IpAddr = peer.ip();

    if !shared.allow.is_allowed(peer_ip) {
        warn!("Rejected connection from {}", peer);
        if shared.reject == RejectPolicy::Notify {
            let _ = write_frame(&mut stream, &Response::denied()).await;
        }
        return;
    }
    debug!("Accepted connection from {}", peer);

    match serve_requests(&mut stream, peer_ip, &shared.dispatcher).await {
        Ok(()) => debug!("Connection from {} closed", peer),
        Err(e) => warn!("Connection from {} dropped: {}", peer, e),
    }
}

async fn serve_requests(stream: &mut TcpStream, peer: IpAddr, dispatcher: &Dispatcher) -> Result<()> {
    loop {
        let request: Request = match read_frame(stream).await? {
            Some(request) => request,
            None => return Ok(()),
        };
        debug!("{} from {}", request.method(), peer);

        let method = request.method();
        let response = dispatcher.dispatch(request, peer).await;
        match write_frame(stream, &response).await {
            Err(Error::FrameTooLarge(size)) => {
                warn!("{} reply of {} bytes is too large to send", method, size);
                let detail = format!("{} reply exceeds maximum message size ({} bytes)", method, size);
                write_frame(stream, &Response::err(detail)).await?;
            }
            other => other?,
        }
    }
}
