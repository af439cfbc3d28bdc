//! OS-level actions the dispatcher invokes
//!
//! The traits are synchronous; the dispatcher runs them on tokio's blocking
//! pool. The `System*` and `Tmux` implementations shell out to the platform
//! tools.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

/// Output kept from a failing command
const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{0} is not available on this system")]
    Unavailable(String),

    #[error("`{command}` exited with {status} (output: {output})")]
    Failed {
        command: String,
        status: String,
        output: String,
    },

    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

/// Open a URI with the default handler
pub trait Opener: Send + Sync {
    fn open(&self, uri: &str) -> CapabilityResult<()>;
}

/// Read and write the system clipboard
pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> CapabilityResult<()>;
    fn paste(&self) -> CapabilityResult<String>;
}

/// Drive a terminal multiplexer
pub trait Multiplexer: Send + Sync {
    /// Returns the command's captured output
    fn send_keys(&self, target: &str, keys: &str) -> CapabilityResult<String>;
    fn select_pane(&self, target: &str) -> CapabilityResult<()>;
}

/// The set of capabilities one agent dispatches to
#[derive(Clone)]
pub struct Capabilities {
    pub opener: Arc<dyn Opener>,
    pub clipboard: Arc<dyn Clipboard>,
    pub multiplexer: Arc<dyn Multiplexer>,
}

impl Capabilities {
    /// Platform tools, with tmux looked up at `tmux_path`
    pub fn system(tmux_path: impl Into<PathBuf>) -> Self {
        Self {
            opener: Arc::new(SystemOpener),
            clipboard: Arc::new(SystemClipboard::detect()),
            multiplexer: Arc::new(Tmux::new(tmux_path)),
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener;

impl Opener for SystemOpener {
    fn open(&self, uri: &str) -> CapabilityResult<()> {
        let mut cmd = if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            cmd.arg(uri);
            cmd
        } else if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", ""]).arg(uri);
            cmd
        } else {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(uri);
            cmd
        };
        let output = run(&mut cmd)?;
        check(&cmd, output).map(|_| ())
    }
}

/// Which clipboard tool the system clipboard talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardTool {
    MacOs,
    PowerShell,
    Wayland,
    Xclip,
    Xsel,
    Missing,
}

#[derive(Debug, Clone)]
pub struct SystemClipboard {
    tool: ClipboardTool,
}

impl SystemClipboard {
    pub fn detect() -> Self {
        let tool = if cfg!(target_os = "macos") {
            ClipboardTool::MacOs
        } else if cfg!(windows) {
            ClipboardTool::PowerShell
        } else if std::env::var_os("WAYLAND_DISPLAY").is_some() && in_path("wl-copy") {
            ClipboardTool::Wayland
        } else if in_path("xclip") {
            ClipboardTool::Xclip
        } else if in_path("xsel") {
            ClipboardTool::Xsel
        } else {
            ClipboardTool::Missing
        };
        debug!("Using clipboard tool {:?}", tool);
        Self { tool }
    }

    pub fn tool(&self) -> ClipboardTool {
        self.tool
    }

    fn copy_command(&self) -> CapabilityResult<Command> {
        let cmd = match self.tool {
            ClipboardTool::MacOs => Command::new("pbcopy"),
            ClipboardTool::PowerShell => {
                let mut cmd = Command::new("powershell");
                cmd.args([
                    "-NoProfile",
                    "-Command",
                    "Set-Clipboard -Value ([Console]::In.ReadToEnd())",
                ]);
                cmd
            }
            ClipboardTool::Wayland => Command::new("wl-copy"),
            ClipboardTool::Xclip => {
                let mut cmd = Command::new("xclip");
                cmd.args(["-selection", "clipboard", "-in"]);
                cmd
            }
            ClipboardTool::Xsel => {
                let mut cmd = Command::new("xsel");
                cmd.args(["--clipboard", "--input"]);
                cmd
            }
            ClipboardTool::Missing => return Err(CapabilityError::Unavailable("clipboard".into())),
        };
        Ok(cmd)
    }

    fn paste_command(&self) -> CapabilityResult<Command> {
        let cmd = match self.tool {
            ClipboardTool::MacOs => Command::new("pbpaste"),
            ClipboardTool::PowerShell => {
                let mut cmd = Command::new("powershell");
                cmd.args(["-NoProfile", "-Command", "Get-Clipboard -Raw"]);
                cmd
            }
            ClipboardTool::Wayland => {
                let mut cmd = Command::new("wl-paste");
                cmd.arg("--no-newline");
                cmd
            }
            ClipboardTool::Xclip => {
                let mut cmd = Command::new("xclip");
                cmd.args(["-selection", "clipboard", "-out"]);
                cmd
            }
            ClipboardTool::Xsel => {
                let mut cmd = Command::new("xsel");
                cmd.args(["--clipboard", "--output"]);
                cmd
            }
            ClipboardTool::Missing => return Err(CapabilityError::Unavailable("clipboard".into())),
        };
        Ok(cmd)
    }
}

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> CapabilityResult<()> {
        let mut cmd = self.copy_command()?;
        // xclip and wl-copy fork a child that keeps serving the selection and
        // inherits our pipes, so stdout/stderr must not be captured here.
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| io_error(&cmd, e))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).map_err(|e| io_error(&cmd, e))?;
        }
        let status = child.wait().map_err(|e| io_error(&cmd, e))?;
        if !status.success() {
            return Err(CapabilityError::Failed {
                command: describe(&cmd),
                status: status.to_string(),
                output: String::new(),
            });
        }
        Ok(())
    }

    fn paste(&self) -> CapabilityResult<String> {
        let mut cmd = self.paste_command()?;
        let output = run(&mut cmd)?;
        let output = check(&cmd, output)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// tmux driven through its command line
#[derive(Debug, Clone)]
pub struct Tmux {
    binary: PathBuf,
}

impl Tmux {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Multiplexer for Tmux {
    fn send_keys(&self, target: &str, keys: &str) -> CapabilityResult<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["send-keys", "-t", target, keys]);
        let output = run(&mut cmd)?;
        let output = check(&cmd, output)?;
        Ok(combined(&output))
    }

    fn select_pane(&self, target: &str) -> CapabilityResult<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["select-pane", "-t", target]);
        let output = run(&mut cmd)?;
        check(&cmd, output).map(|_| ())
    }
}

fn run(cmd: &mut Command) -> CapabilityResult<Output> {
    debug!("Running {}", describe(cmd));
    cmd.stdin(Stdio::null()).output().map_err(|e| io_error(cmd, e))
}

fn check(cmd: &Command, output: Output) -> CapabilityResult<Output> {
    if output.status.success() {
        return Ok(output);
    }
    Err(CapabilityError::Failed {
        command: describe(cmd),
        status: output.status.to_string(),
        output: combined(&output),
    })
}

/// stdout followed by stderr, lossy and capped
fn combined(output: &Output) -> String {
    let mut bytes = output.stdout.clone();
    bytes.extend_from_slice(&output.stderr);
    bytes.truncate(MAX_CAPTURED_OUTPUT);
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn io_error(cmd: &Command, source: std::io::Error) -> CapabilityError {
    if source.kind() == std::io::ErrorKind::NotFound {
        return CapabilityError::Unavailable(cmd.get_program().to_string_lossy().into_owned());
    }
    CapabilityError::Io {
        command: describe(cmd),
        source,
    }
}

fn in_path(program: &str) -> bool {
    which::which(program).is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tmux_is_unavailable() {
        let tmux = Tmux::new("/nonexistent/pasteport-tmux");
        let err = tmux.send_keys("0", "ls").unwrap_err();
        assert!(matches!(err, CapabilityError::Unavailable(_)));
    }

    #[test]
    fn test_failing_command_captures_output() {
        // `sh` stands in for tmux: `sh send-keys ...` fails on the missing script
        let tmux = Tmux::new("sh");
        let err = tmux.send_keys("0", "ls").unwrap_err();
        match err {
            CapabilityError::Failed { command, output, .. } => {
                assert!(command.starts_with("sh send-keys -t 0 ls"));
                assert!(!output.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_in_path() {
        assert!(in_path("sh"));
        assert!(!in_path("pasteport-no-such-tool"));
    }

    #[test]
    fn test_missing_clipboard_tool() {
        let clipboard = SystemClipboard {
            tool: ClipboardTool::Missing,
        };
        assert!(matches!(clipboard.paste(), Err(CapabilityError::Unavailable(_))));
        assert!(matches!(clipboard.copy("x"), Err(CapabilityError::Unavailable(_))));
    }
}
