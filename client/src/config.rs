//! Configuration file parser for pasteport
//!
//! Settings come from `pasteport.yml`, overridden by command-line options.
//! Anything set in neither place falls back to the built-in defaults.

use anyhow::{Context, Result};
use pasteport_agent::{AgentConfig, AllowList, RejectPolicy};
use pasteport_shared::protocol::DEFAULT_PORT;
use pasteport_shared::Error;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Options;
use crate::client::ClientOptions;
use crate::connection::{Endpoint, FallbackPolicy};
use crate::line_ending::LineEnding;
use crate::tunnel::{TunnelConfig, DEFAULT_MAX_FILE_SIZE, DEFAULT_TUNNEL_TIMEOUT};

/// Default connect timeout before falling back to a local agent
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Contents of `pasteport.yml`; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Agent host to dial
    pub host: Option<String>,
    /// Agent port, also the fallback port
    pub port: Option<u16>,
    /// Connect timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Comma separated CIDR allow list (agent only)
    pub allow: Option<String>,
    /// `lf` or `crlf` conversion applied to pasted text
    pub line_ending: Option<String>,
    #[serde(default)]
    pub no_fallback_messages: bool,
    /// Start a local agent when the configured one is unreachable
    pub fallback: Option<bool>,
    /// Port for the local fallback agent (default: `port`)
    pub fallback_port: Option<u16>,
    pub trans_loopback: Option<bool>,
    pub trans_localfile: Option<bool>,
    /// Whether the agent honours loopback translation requests
    pub agent_trans_loopback: Option<bool>,
    /// tmux binary used by the agent
    pub tmux_path: Option<PathBuf>,
    /// How long an opened local file stays available
    pub tunnel_timeout_secs: Option<u64>,
    /// Largest local file served through the tunnel, in bytes
    pub max_file_size: Option<u64>,
    /// Address the agent listens on
    pub listen: Option<IpAddr>,
    /// `silent` or `notify`
    pub reject: Option<String>,
    pub log_level: Option<String>,
}

impl FileConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: FileConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Search for config file in standard locations
    pub fn find_config() -> Option<PathBuf> {
        let candidates = ["pasteport.yml", "pasteport.yaml", ".pasteport.yml", ".pasteport.yaml"];

        // Check current directory
        for name in &candidates {
            let path = PathBuf::from(name);
            if path.exists() {
                return Some(path);
            }
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            for name in &candidates {
                let path = home.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        dirs::config_dir()
            .map(|dir| dir.join("pasteport.yml"))
            .filter(|path| path.exists())
    }
}

/// Fully resolved settings for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub allow: AllowList,
    pub line_ending: LineEnding,
    pub no_fallback_messages: bool,
    pub fallback: bool,
    pub fallback_port: u16,
    pub trans_loopback: bool,
    pub trans_localfile: bool,
    pub agent_trans_loopback: bool,
    pub tmux_path: PathBuf,
    pub tunnel_timeout: Duration,
    pub max_file_size: u64,
    pub listen: IpAddr,
    pub reject: RejectPolicy,
    pub log_level: Option<String>,
}

impl Settings {
    /// Read the config file named by `--config`, or the first one found
    pub fn load(options: &Options) -> Result<Self> {
        let file = match &options.config {
            Some(path) => FileConfig::load(path)?,
            None => match FileConfig::find_config() {
                Some(path) => FileConfig::load(&path)?,
                None => FileConfig::default(),
            },
        };
        Ok(Self::resolve(options, file)?)
    }

    /// Merge command-line options over the file, then validate
    pub fn resolve(options: &Options, file: FileConfig) -> pasteport_shared::Result<Self> {
        let port = options.port.or(file.port).unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(Error::Config("port must be between 1 and 65535".to_string()));
        }

        let host = options
            .host
            .clone()
            .or(file.host)
            .unwrap_or_else(|| "localhost".to_string());
        if host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }

        let allow = match options.allow.as_deref().or(file.allow.as_deref()) {
            Some(list) => AllowList::parse(list)?,
            None => AllowList::allow_all(),
        };

        let line_ending = match options.line_ending.as_deref().or(file.line_ending.as_deref()) {
            Some(ending) => ending.parse()?,
            None => LineEnding::Keep,
        };

        let reject = match file.reject.as_deref() {
            Some(policy) => policy.parse()?,
            None => RejectPolicy::Silent,
        };

        Ok(Self {
            host,
            port,
            timeout: options
                .timeout_ms
                .or(file.timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TIMEOUT),
            allow,
            line_ending,
            no_fallback_messages: options.no_fallback_messages || file.no_fallback_messages,
            fallback: !options.no_fallback && file.fallback.unwrap_or(true),
            fallback_port: file.fallback_port.unwrap_or(port),
            trans_loopback: options.trans_loopback.or(file.trans_loopback).unwrap_or(true),
            trans_localfile: options.trans_localfile.or(file.trans_localfile).unwrap_or(true),
            agent_trans_loopback: file.agent_trans_loopback.unwrap_or(true),
            tmux_path: file.tmux_path.unwrap_or_else(|| PathBuf::from("tmux")),
            tunnel_timeout: file
                .tunnel_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TUNNEL_TIMEOUT),
            max_file_size: file.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE),
            listen: file.listen.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            reject,
            log_level: options.log_level.clone().or(file.log_level),
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: self.timeout,
        }
    }

    pub fn fallback_policy(&self) -> FallbackPolicy {
        FallbackPolicy {
            enabled: self.fallback,
            port: self.fallback_port,
            quiet: self.no_fallback_messages,
            tmux_path: self.tmux_path.clone(),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            line_ending: self.line_ending,
            trans_loopback: self.trans_loopback,
            trans_localfile: self.trans_localfile,
            tunnel: TunnelConfig {
                timeout: self.tunnel_timeout,
                max_file_size: self.max_file_size,
                ..TunnelConfig::default()
            },
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            listen: SocketAddr::new(self.listen, self.port),
            allow: self.allow.clone(),
            reject: self.reject,
            translate_loopback: self.agent_trans_loopback,
        }
    }
}
