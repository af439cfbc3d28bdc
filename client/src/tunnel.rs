//! Single-use HTTP endpoint exposing one local file
//!
//! When the agent is asked to open a file that only exists on this machine,
//! the client serves it over HTTP and sends the agent that URL instead. The
//! first GET of the file's path gets its bytes; the session reports
//! completion once the body has been handed to the connection, then drains
//! the listener so the client can exit.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use futures_util::Stream;
use pasteport_shared::{Error, Result};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Largest file served by default (64 MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// How long a session waits for the file to be fetched and delivered
pub const DEFAULT_TUNNEL_TIMEOUT: Duration = Duration::from_secs(60);

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Interface the listener binds; the URL always names 127.0.0.1
    pub bind: IpAddr,
    pub timeout: Duration,
    pub max_file_size: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout: DEFAULT_TUNNEL_TIMEOUT,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Bytes served, or why the fetch failed
type Completion = std::result::Result<u64, String>;

#[derive(Clone)]
struct TunnelState {
    path: Arc<PathBuf>,
    route: Arc<String>,
    max_file_size: u64,
    done: Arc<Mutex<Option<oneshot::Sender<Completion>>>>,
}

/// A listening tunnel; dropping it stops the listener
pub struct TunnelSession {
    url: String,
    timeout: Duration,
    done: Option<oneshot::Receiver<Completion>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Start serving `path` on an ephemeral port
pub async fn serve(path: &Path, config: &TunnelConfig) -> Result<TunnelSession> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::Tunnel(format!("cannot read {}: {}", path.display(), e)))?;
    if !meta.is_file() {
        return Err(Error::Tunnel(format!("{} is not a regular file", path.display())));
    }
    if meta.len() > config.max_file_size {
        return Err(Error::Tunnel(format!(
            "{} is {} bytes, over the {} byte limit",
            path.display(),
            meta.len(),
            config.max_file_size
        )));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Tunnel(format!("{} has no file name", path.display())))?;

    let listener = TcpListener::bind((config.bind, 0)).await?;
    let url = file_url(listener.local_addr()?.port(), &name)?;

    let (done_tx, done_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let state = TunnelState {
        path: Arc::new(path.to_path_buf()),
        route: Arc::new(url.path().to_string()),
        max_file_size: config.max_file_size,
        done: Arc::new(Mutex::new(Some(done_tx))),
    };

    let app = Router::new().fallback(serve_file).with_state(state);
    let task = tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            warn!("Tunnel listener error: {}", e);
        }
    });

    info!("Serving {} at {} (bound to {})", path.display(), url, config.bind);

    Ok(TunnelSession {
        url: url.into(),
        timeout: config.timeout,
        done: Some(done_rx),
        stop: Some(stop_tx),
        task: Some(task),
    })
}

fn file_url(port: u16, name: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("http://127.0.0.1:{}/", port))
        .map_err(|e| Error::Tunnel(format!("invalid tunnel url: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| Error::Tunnel("tunnel url cannot carry a path".to_string()))?
        .pop_if_empty()
        .push(name);
    Ok(url)
}

impl TunnelSession {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait for the single fetch and for its response to drain, both within
    /// the session timeout, then stop the listener.
    pub async fn wait(mut self) -> Result<u64> {
        let deadline = Instant::now() + self.timeout;
        let outcome = match self.done.take() {
            Some(done) => timeout_at(deadline, done).await.map(|r| r.ok()),
            None => Ok(None),
        };

        self.stop_listener();
        let drained = match self.task.take() {
            Some(mut task) => match timeout_at(deadline, &mut task).await {
                Ok(_) => true,
                Err(_) => {
                    task.abort();
                    false
                }
            },
            None => true,
        };

        match outcome {
            Ok(Some(Ok(bytes))) if drained => {
                debug!("Tunnel served {} bytes", bytes);
                Ok(bytes)
            }
            Ok(Some(Ok(bytes))) => Err(Error::Tunnel(format!(
                "{} bytes were not delivered within {}s",
                bytes,
                self.timeout.as_secs_f32()
            ))),
            Ok(Some(Err(reason))) => Err(Error::Tunnel(reason)),
            Ok(None) => Err(Error::Tunnel("listener stopped before the file was fetched".to_string())),
            Err(_) => Err(Error::Tunnel(format!(
                "file was not delivered within {}s",
                self.timeout.as_secs_f32()
            ))),
        }
    }

    fn stop_listener(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

/// Response body that signals completion when the connection takes its
/// end of stream, and failure if it is dropped before that.
struct DeliveryBody {
    data: Bytes,
    offset: usize,
    done: Option<oneshot::Sender<Completion>>,
}

impl Stream for DeliveryBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.offset < self.data.len() {
            let end = (self.offset + CHUNK_SIZE).min(self.data.len());
            let chunk = self.data.slice(self.offset..end);
            self.offset = end;
            return Poll::Ready(Some(Ok(chunk)));
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(Ok(self.data.len() as u64));
        }
        Poll::Ready(None)
    }
}

impl Drop for DeliveryBody {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Err(format!(
                "connection closed after {} of {} bytes",
                self.offset,
                self.data.len()
            )));
        }
    }
}

async fn serve_file(State(state): State<TunnelState>, method: Method, uri: Uri) -> Response {
    if uri.path() != state.route.as_str() {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    if method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "only GET is served").into_response();
    }

    let Some(done) = state.done.lock().await.take() else {
        warn!("Tunnel fetched again after completion");
        return (StatusCode::GONE, "already fetched").into_response();
    };

    let bytes = match tokio::fs::read(state.path.as_path()).await {
        Ok(bytes) if bytes.len() as u64 > state.max_file_size => {
            let reason = format!("{} grew past the size limit", state.path.display());
            let _ = done.send(Err(reason.clone()));
            return (StatusCode::PAYLOAD_TOO_LARGE, reason).into_response();
        }
        Ok(bytes) => bytes,
        Err(e) => {
            let reason = format!("cannot read {}: {}", state.path.display(), e);
            let _ = done.send(Err(reason.clone()));
            return (StatusCode::INTERNAL_SERVER_ERROR, reason).into_response();
        }
    };

    let body = DeliveryBody {
        data: Bytes::from(bytes),
        offset: 0,
        done: Some(done),
    };
    (
        [(header::CONTENT_TYPE, content_type(&state.path))],
        Body::from_stream(body),
    )
        .into_response()
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" | "md" | "log" => "text/plain; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
