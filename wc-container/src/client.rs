use crate::archive::extract_single_file;
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Buffered agent output lines between the pipe readers and the consumer.
const LINE_BUFFER: usize = 64;

/// A running container attached interactively.
pub struct AttachedContainer {
    /// Combined stdout/stderr, one line per message; closes when both pipes close
    pub lines: mpsc::Receiver<String>,
    /// The container's stdin
    pub stdin: ChildStdin,
    /// The `docker start -ai` process
    pub child: Child,
}

/// Client for disposable containers via the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerClient {
    bin: String,
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerClient {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Create (but do not start) a container with stdin kept open.
    /// Returns the container id.
    pub async fn create_container(&self, image: &str, args: &[String]) -> Result<String> {
        debug!(image, args = ?args, "Creating container");

        let output = Command::new(&self.bin)
            .args(["create", "-i", image])
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run {} create", self.bin))?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            anyhow::bail!("{} create {image} failed: {}", self.bin, combined.trim());
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            anyhow::bail!("{} create {image} returned no container id", self.bin);
        }

        info!(container = short_id(&id), image, "Container created");
        Ok(id)
    }

    /// Start a container attached to its stdin, stdout and stderr.
    pub async fn attach(&self, id: &str) -> Result<AttachedContainer> {
        info!(container = short_id(id), "Starting container attached");

        let mut child = Command::new(&self.bin)
            .args(["start", "-ai", id])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {} start -ai {id}", self.bin))?;

        let stdin = child.stdin.take().context("container stdin not captured")?;
        let stdout = child.stdout.take().context("container stdout not captured")?;
        let stderr = child.stderr.take().context("container stderr not captured")?;

        let (tx, lines) = mpsc::channel(LINE_BUFFER);
        forward_lines(stdout, tx.clone());
        forward_lines(stderr, tx);

        Ok(AttachedContainer {
            lines,
            stdin,
            child,
        })
    }

    /// Force-remove a container and its volumes. Removing a container that
    /// no longer exists succeeds.
    pub async fn remove_container(&self, id: &str) -> Result<()> {
        info!(container = short_id(id), "Removing container");

        let output = Command::new(&self.bin)
            .args(["rm", "-fv", id])
            .output()
            .await
            .with_context(|| format!("failed to run {} rm", self.bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such container") {
                debug!(container = short_id(id), "Container already gone");
                return Ok(());
            }
            anyhow::bail!("{} rm -fv {id} failed: {}", self.bin, stderr.trim());
        }

        Ok(())
    }

    /// Copy one file out of a container, following symlinks.
    pub async fn copy_file(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        info!(container = short_id(id), path, "Copying file from container");

        let source = format!("{id}:{path}");
        let output = Command::new(&self.bin)
            .args(["cp", "--follow-link", &source, "-"])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run {} cp", self.bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} cp {source} failed: {}", self.bin, stderr.trim());
        }

        extract_single_file(&output.stdout).with_context(|| format!("copying {source}"))
    }
}

/// Shorten a container id for logs
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read container output");
                    break;
                }
            }
        }
    });
}
