use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pasteport::cli::Options;
use pasteport::connection::{Endpoint, FallbackPolicy};
use pasteport::line_ending::LineEnding;
use pasteport::tunnel::TunnelConfig;
use pasteport::{Client, ClientOptions, Connector, FileConfig, Settings};
use pasteport_agent::capability::{CapabilityError, CapabilityResult, Clipboard, Multiplexer, Opener};
use pasteport_agent::{Agent, AgentConfig, Capabilities};
use pasteport_shared::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// In-memory agent side: clipboard buffer, recorded opens and keys
struct FakeDesktop {
    clipboard: Mutex<String>,
    opened: mpsc::UnboundedSender<String>,
    keys: Mutex<Vec<(String, String)>>,
    fail_open: bool,
}

impl Opener for FakeDesktop {
    fn open(&self, uri: &str) -> CapabilityResult<()> {
        if self.fail_open {
            return Err(CapabilityError::Failed {
                command: format!("xdg-open {}", uri),
                status: "exit status: 4".into(),
                output: "no handler".into(),
            });
        }
        let _ = self.opened.send(uri.to_string());
        Ok(())
    }
}

impl Clipboard for FakeDesktop {
    fn copy(&self, text: &str) -> CapabilityResult<()> {
        *self.clipboard.lock().unwrap() = text.to_string();
        Ok(())
    }

    fn paste(&self) -> CapabilityResult<String> {
        Ok(self.clipboard.lock().unwrap().clone())
    }
}

impl Multiplexer for FakeDesktop {
    fn send_keys(&self, target: &str, keys: &str) -> CapabilityResult<String> {
        self.keys.lock().unwrap().push((target.to_string(), keys.to_string()));
        Ok(String::new())
    }

    fn select_pane(&self, _target: &str) -> CapabilityResult<()> {
        Ok(())
    }
}

fn desktop(fail_open: bool) -> (Arc<FakeDesktop>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let desktop = Arc::new(FakeDesktop {
        clipboard: Mutex::new(String::new()),
        opened: tx,
        keys: Mutex::new(Vec::new()),
        fail_open,
    });
    (desktop, rx)
}

fn capabilities(desktop: &Arc<FakeDesktop>) -> Capabilities {
    Capabilities {
        opener: desktop.clone(),
        clipboard: desktop.clone(),
        multiplexer: desktop.clone(),
    }
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Client whose configured agent is unreachable, so every call falls back
async fn fallback_client(desktop: &Arc<FakeDesktop>, options: ClientOptions) -> Client {
    let endpoint = Endpoint {
        host: "127.0.0.1".into(),
        port: closed_port().await,
        connect_timeout: Duration::from_millis(200),
    };
    let fallback = FallbackPolicy {
        enabled: true,
        port: 0,
        quiet: true,
        tmux_path: "tmux".into(),
    };
    let connector = Connector::new(endpoint, fallback).with_capabilities(capabilities(desktop));
    Client::new(connector, options)
}

#[tokio::test]
async fn test_copy_then_paste_through_fallback() {
    let (desktop, _opened) = desktop(false);
    let mut client = fallback_client(&desktop, ClientOptions::default()).await;

    client.copy("hello").await.unwrap();
    assert_eq!(client.paste().await.unwrap(), "hello");

    let local = client.connector().local_agent().expect("fallback agent started");
    assert!(local.is_owned());
    assert!(local.local_addr().ip().is_loopback());

    client.shutdown().await;
}

#[tokio::test]
async fn test_paste_applies_line_ending() {
    let (desktop, _opened) = desktop(false);
    *desktop.clipboard.lock().unwrap() = "one\ntwo\r\nthree".into();

    let options = ClientOptions {
        line_ending: LineEnding::Crlf,
        ..ClientOptions::default()
    };
    let mut client = fallback_client(&desktop, options).await;
    assert_eq!(client.paste().await.unwrap(), "one\r\ntwo\r\nthree");
    client.shutdown().await;
}

#[tokio::test]
async fn test_open_local_file_through_tunnel() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"shared notes\n").unwrap();

    let (desktop, mut opened) = desktop(false);
    let options = ClientOptions {
        trans_localfile: true,
        tunnel: TunnelConfig {
            timeout: Duration::from_secs(10),
            ..TunnelConfig::default()
        },
        ..ClientOptions::default()
    };
    let mut client = fallback_client(&desktop, options).await;

    let target = path.to_string_lossy().into_owned();
    let open = tokio::spawn(async move {
        let result = client.open(&target).await;
        (client, result)
    });

    let url = tokio::time::timeout(Duration::from_secs(5), opened.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(url.starts_with("http://127.0.0.1:"), "{}", url);
    assert!(url.ends_with("/notes.txt"), "{}", url);

    let body = reqwest::get(&url).await.unwrap().bytes().await.unwrap();
    assert_eq!(body.as_ref(), b"shared notes\n");

    let (client, result) = open.await.unwrap();
    result.unwrap();
    client.shutdown().await;
}

#[tokio::test]
async fn test_open_plain_uri_is_forwarded() {
    let (desktop, mut opened) = desktop(false);
    let options = ClientOptions {
        trans_localfile: true,
        ..ClientOptions::default()
    };
    let mut client = fallback_client(&desktop, options).await;

    client.open("https://example.com/a?b=c").await.unwrap();
    assert_eq!(opened.recv().await.unwrap(), "https://example.com/a?b=c");
    client.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_host_falls_back_quickly() {
    let (desktop, _opened) = desktop(false);
    let endpoint = Endpoint {
        // TEST-NET-1, never routed
        host: "192.0.2.1".into(),
        port: 2489,
        connect_timeout: Duration::from_millis(200),
    };
    let fallback = FallbackPolicy {
        enabled: true,
        port: 0,
        quiet: true,
        tmux_path: "tmux".into(),
    };
    let connector = Connector::new(endpoint, fallback).with_capabilities(capabilities(&desktop));
    let mut client = Client::new(connector, ClientOptions::default());

    let started = Instant::now();
    client.copy("x").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(*desktop.clipboard.lock().unwrap(), "x");
    client.shutdown().await;
}

#[tokio::test]
async fn test_reachable_agent_is_used_directly() {
    let (desktop, _opened) = desktop(false);
    let agent = Agent::bind(AgentConfig::loopback(0), capabilities(&desktop))
        .await
        .unwrap()
        .spawn()
        .unwrap();

    let endpoint = Endpoint {
        host: "127.0.0.1".into(),
        port: agent.local_addr().port(),
        connect_timeout: Duration::from_secs(1),
    };
    let fallback = FallbackPolicy {
        enabled: false,
        port: 0,
        quiet: true,
        tmux_path: "tmux".into(),
    };
    let mut client = Client::new(Connector::new(endpoint, fallback), ClientOptions::default());

    client.copy("direct").await.unwrap();
    assert_eq!(client.paste().await.unwrap(), "direct");
    assert!(client.connector().local_agent().is_none());

    client.send_keys("work:1.0", "ls Enter", true).await.unwrap();
    assert_eq!(
        *desktop.keys.lock().unwrap(),
        vec![("work:1.0".to_string(), "ls Enter".to_string())]
    );

    client.shutdown().await;
    agent.shutdown().await;
}

#[tokio::test]
async fn test_operation_failure_carries_detail() {
    let (desktop, _opened) = desktop(true);
    let mut client = fallback_client(&desktop, ClientOptions::default()).await;

    match client.open("https://example.com").await {
        Err(Error::Operation(detail)) => assert!(detail.contains("no handler"), "{}", detail),
        other => panic!("expected an operation error, got {:?}", other),
    }
    client.shutdown().await;
}

#[tokio::test]
async fn test_agent_with_translation_disabled_opens_literal_uri() {
    let (desktop, mut opened) = desktop(false);
    let file = FileConfig {
        agent_trans_loopback: Some(false),
        ..FileConfig::default()
    };
    let settings = Settings::resolve(&Options::default(), file).unwrap();
    let config = AgentConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        ..settings.agent_config()
    };
    let agent = Agent::bind(config, capabilities(&desktop)).await.unwrap().spawn().unwrap();

    let endpoint = Endpoint {
        host: "127.0.0.1".into(),
        port: agent.local_addr().port(),
        connect_timeout: Duration::from_secs(1),
    };
    let fallback = FallbackPolicy {
        enabled: false,
        port: 0,
        quiet: true,
        tmux_path: "tmux".into(),
    };
    let options = ClientOptions {
        trans_loopback: true,
        ..ClientOptions::default()
    };
    let mut client = Client::new(Connector::new(endpoint, fallback), options);

    client.open("http://localhost:8000/").await.unwrap();
    assert_eq!(opened.recv().await.unwrap(), "http://localhost:8000/");

    client.shutdown().await;
    agent.shutdown().await;
}
