//! Headless-browser page rendering.
//!
//! Some publishers front their PDFs with a bot challenge that a plain
//! HTTP GET cannot pass. As a second phase, the affected client renders
//! the landing page through a real browser engine (an external headless
//! Chromium/Chrome binary) and re-extracts the PDF link from the
//! rendered DOM. The renderer is configured, not discovered; when no
//! browser command is configured the fallback is simply unavailable.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// Renders pages through an external headless browser binary.
#[derive(Debug, Clone)]
pub struct BrowserRenderer {
    command: String,
    timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("browser render timed out after {0:?}")]
    Timeout(Duration),

    #[error("browser exited with status {0}")]
    Failed(i32),

    #[error("failed to run browser command: {0}")]
    Spawn(#[from] std::io::Error),
}

impl BrowserRenderer {
    /// `command` is the browser binary (e.g. `chromium`); `timeout` is
    /// the render ceiling, deliberately longer than plain HTTP
    /// timeouts.
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Render `url` and return the post-JavaScript DOM as HTML.
    pub async fn render(&self, url: &str) -> Result<String, BrowserError> {
        debug!(command = %self.command, url, "rendering page in headless browser");

        let mut child = Command::new(&self.command)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--virtual-time-budget=10000")
            .arg("--dump-dom")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child.stdout.take().ok_or_else(|| {
            BrowserError::Spawn(std::io::Error::other("browser stdout not captured"))
        })?;

        let rendered = tokio::time::timeout(self.timeout, async {
            let mut html = String::new();
            stdout.read_to_string(&mut html).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((html, status))
        })
        .await
        .map_err(|_| BrowserError::Timeout(self.timeout))??;

        let (html, status) = rendered;
        if !status.success() {
            return Err(BrowserError::Failed(status.code().unwrap_or(-1)));
        }
        Ok(html)
    }
}
