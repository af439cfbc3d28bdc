//! Command-line interface

use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "pasteport")]
#[command(version)]
#[command(about = "Forward clipboard, browser and tmux actions to another machine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub options: Options,
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct Options {
    /// Agent host to connect to
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Agent TCP port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Connect timeout in milliseconds before falling back to a local agent
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Allowed client networks, comma separated CIDR [server only]
    #[arg(long, global = true)]
    pub allow: Option<String>,

    /// Convert line endings of pasted text (lf or crlf)
    #[arg(long, global = true)]
    pub line_ending: Option<String>,

    /// Do not report falling back to a local agent
    #[arg(long, global = true)]
    pub no_fallback_messages: bool,

    /// Fail instead of starting a local agent when the host is unreachable
    #[arg(long, global = true)]
    pub no_fallback: bool,

    /// Translate loopback addresses in opened URIs [open only]
    #[arg(long, global = true, value_name = "BOOL")]
    pub trans_loopback: Option<bool>,

    /// Serve local files to the agent instead of sending their path [open only]
    #[arg(long, global = true, value_name = "BOOL")]
    pub trans_localfile: Option<bool>,

    /// Path to a pasteport.yml config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log filter, e.g. `debug` or `pasteport=trace`
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Open a URI, or a local file, with the agent's default handler
    Open {
        /// URI or path; read from stdin when omitted
        uri: Option<String>,
    },
    /// Copy text to the agent's clipboard
    Copy {
        /// Text to copy; read from stdin when omitted
        text: Option<String>,
    },
    /// Print the agent's clipboard
    Paste,
    /// Run the agent
    Server {
        /// Address to listen on
        #[arg(long)]
        listen: Option<IpAddr>,

        /// How to treat clients outside the allow list (silent or notify)
        #[arg(long)]
        reject: Option<String>,

        /// Honour loopback translation requests from clients
        #[arg(long = "translate-loopback", value_name = "BOOL")]
        translate_loopback: Option<bool>,
    },
    /// Send keys to a tmux pane on the agent's machine
    Tmux {
        /// Target pane: session:window.pane, window.pane or pane
        #[arg(long, visible_alias = "tmux-target")]
        target: String,

        /// Keys to send
        #[arg(long, visible_alias = "tmux-send-keys")]
        keys: String,

        /// Select the target pane after sending keys
        #[arg(long, visible_alias = "tmux-select-target-pane")]
        select_target_pane: bool,
    },
}

impl Commands {
    pub fn is_server(&self) -> bool {
        matches!(self, Commands::Server { .. })
    }
}

/// Subcommand implied by the name the binary was invoked as
fn alias_subcommand(argv0: &Path) -> Option<&'static str> {
    let name = argv0.file_stem()?.to_str()?;
    match name {
        "xdg-open" => Some("open"),
        "pbcopy" => Some("copy"),
        "pbpaste" => Some("paste"),
        _ => None,
    }
}

/// Insert the subcommand when invoked through an `xdg-open`, `pbcopy` or
/// `pbpaste` symlink
pub fn expand_alias<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let sub = args.first().and_then(|argv0| alias_subcommand(Path::new(argv0)));
    if let Some(sub) = sub {
        args.insert(1, OsString::from(sub));
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(expand_alias(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_subcommands() {
        let cli = parse(&["pasteport", "--host", "192.168.0.1", "--port", "1124", "open", "http://example.com"]);
        assert_eq!(
            cli.command,
            Commands::Open {
                uri: Some("http://example.com".into())
            }
        );
        assert_eq!(cli.options.host.as_deref(), Some("192.168.0.1"));
        assert_eq!(cli.options.port, Some(1124));

        let cli = parse(&["pasteport", "copy", "hogefuga", "--line-ending", "crlf"]);
        assert_eq!(
            cli.command,
            Commands::Copy {
                text: Some("hogefuga".into())
            }
        );
        assert_eq!(cli.options.line_ending.as_deref(), Some("crlf"));

        let cli = parse(&["pasteport", "server", "--allow", "10.0.0.0/8", "--reject", "notify"]);
        assert!(cli.command.is_server());

        let cli = parse(&["pasteport", "server", "--translate-loopback", "false"]);
        assert!(matches!(
            cli.command,
            Commands::Server {
                translate_loopback: Some(false),
                ..
            }
        ));
        assert_eq!(cli.options.allow.as_deref(), Some("10.0.0.0/8"));
    }

    #[test]
    fn test_busybox_aliases() {
        let cli = parse(&["/usr/bin/xdg-open", "http://example.com"]);
        assert_eq!(
            cli.command,
            Commands::Open {
                uri: Some("http://example.com".into())
            }
        );

        let cli = parse(&["pbpaste", "--port", "1124"]);
        assert_eq!(cli.command, Commands::Paste);
        assert_eq!(cli.options.port, Some(1124));

        let cli = parse(&["/usr/local/bin/pbcopy"]);
        assert_eq!(cli.command, Commands::Copy { text: None });
    }

    #[test]
    fn test_translation_toggles() {
        let cli = parse(&["pasteport", "open", "--trans-loopback", "false", "--trans-localfile", "true", "x"]);
        assert_eq!(cli.options.trans_loopback, Some(false));
        assert_eq!(cli.options.trans_localfile, Some(true));
    }

    #[test]
    fn test_tmux_options() {
        let cli = parse(&[
            "pasteport",
            "tmux",
            "--tmux-target",
            "work:1.2",
            "--keys",
            "make Enter",
            "--select-target-pane",
        ]);
        assert_eq!(
            cli.command,
            Commands::Tmux {
                target: "work:1.2".into(),
                keys: "make Enter".into(),
                select_target_pane: true,
            }
        );
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Cli::try_parse_from(["pasteport", "--port", "70000", "paste"]).is_err());
    }
}
