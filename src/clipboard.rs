//! Clipboard capability: `read()` / `write()` of plain text.
//! The Linux implementation shells out to xclip; availability is probed once.

use std::io::Write;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("required tool not found: {0}")]
    ToolNotAvailable(String),
    #[error("clipboard failed: {0}")]
    Failed(String),
}

/// Platform-agnostic clipboard access. Calls may block briefly.
pub trait Clipboard: Send + Sync {
    fn read(&self) -> Result<String, ClipboardError>;
    fn write(&self, text: &str) -> Result<(), ClipboardError>;
}

/// Clipboard selection via `xclip`. Requires `xclip` on PATH.
pub struct XclipClipboard {
    program: String,
    available: bool,
}

impl Default for XclipClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl XclipClipboard {
    pub fn new() -> Self {
        let available = probe_command("xclip");
        if available {
            info!("clipboard: xclip available");
        } else {
            warn!("xclip not found, clipboard reads will fail");
        }
        Self {
            program: "xclip".into(),
            available,
        }
    }

    fn ensure_available(&self) -> Result<(), ClipboardError> {
        if self.available {
            Ok(())
        } else {
            Err(ClipboardError::ToolNotAvailable(self.program.clone()))
        }
    }
}

impl Clipboard for XclipClipboard {
    fn read(&self) -> Result<String, ClipboardError> {
        self.ensure_available()?;
        let output = Command::new(&self.program)
            .args(["-selection", "clipboard", "-o"])
            .stderr(Stdio::null())
            .output()
            .map_err(|e| ClipboardError::Failed(format!("xclip exec: {e}")))?;

        if !output.status.success() {
            // Empty clipboard returns non-zero; treat as empty
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn write(&self, text: &str) -> Result<(), ClipboardError> {
        self.ensure_available()?;
        let mut child = Command::new(&self.program)
            .args(["-selection", "clipboard", "-i"])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| ClipboardError::Failed(format!("xclip spawn: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| ClipboardError::Failed(format!("xclip write: {e}")))?;
        }

        let status = child
            .wait()
            .map_err(|e| ClipboardError::Failed(format!("xclip wait: {e}")))?;
        if !status.success() {
            return Err(ClipboardError::Failed(format!("xclip exited with {status}")));
        }
        Ok(())
    }
}

/// Probe whether a command is available on PATH.
fn probe_command(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
