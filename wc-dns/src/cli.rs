use crate::types::{DnsError, DnsResult};
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

/// Run a provider CLI command and return its stdout
pub(crate) async fn run(program: &str, args: &[&str]) -> DnsResult<Vec<u8>> {
    debug!(program, args = ?args, "Running DNS provider command");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| DnsError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stderr = if stderr.is_empty() {
            format!("exit status {}", output.status)
        } else {
            stderr
        };
        return Err(DnsError::CommandFailed {
            program: program.to_string(),
            command: args.join(" "),
            stderr,
        });
    }

    Ok(output.stdout)
}

/// Decode a provider JSON payload
pub(crate) fn decode<T: DeserializeOwned>(provider: &'static str, body: &[u8]) -> DnsResult<T> {
    serde_json::from_slice(body).map_err(|source| DnsError::MalformedResponse { provider, source })
}
