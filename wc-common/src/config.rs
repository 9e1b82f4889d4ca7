use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loaded from environment variables (and an optional `.env` file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// DNS provider name ("alidns" or "cloudflare")
    pub dns_provider: String,
    /// Seconds to wait for the last challenge record to propagate
    pub propagation_wait_secs: u64,
    /// Account email handed to certbot
    pub email: String,
    /// ACME directory URL
    pub acme_server: String,
    /// Docker image running the issuance agent
    pub certbot_image: String,
    /// Where `<domain>.cert` / `<domain>.key` are written
    pub output_dir: PathBuf,
    /// Upper bound on waiting for the next agent event, 0 = wait forever
    pub challenge_timeout_secs: u64,
    /// Provider and runtime executables
    pub cloudflare_bin: String,
    pub aliyun_bin: String,
    pub docker_bin: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            dns_provider: "alidns".to_string(),
            propagation_wait_secs: 10,
            email: "a@a.com".to_string(),
            acme_server: "https://acme-v02.api.letsencrypt.org/directory".to_string(),
            certbot_image: "certbot/certbot".to_string(),
            output_dir: PathBuf::from("."),
            challenge_timeout_secs: 600,
            cloudflare_bin: "cloudflare".to_string(),
            aliyun_bin: "aliyun".to_string(),
            docker_bin: "docker".to_string(),
        }
    }
}

impl EnvConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup, starting from defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("WILDCERT_DNS") {
            config.dns_provider = v.to_lowercase();
        }
        if let Some(v) = lookup("WILDCERT_WAIT_SECS") {
            if let Ok(secs) = v.parse() {
                config.propagation_wait_secs = secs;
            }
        }
        if let Some(v) = lookup("WILDCERT_EMAIL") {
            config.email = v;
        }
        if let Some(v) = lookup("WILDCERT_ACME_SERVER") {
            config.acme_server = v;
        }
        if let Some(v) = lookup("WILDCERT_CERTBOT_IMAGE") {
            config.certbot_image = v;
        }
        if let Some(v) = lookup("WILDCERT_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("WILDCERT_CHALLENGE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                config.challenge_timeout_secs = secs;
            }
        }
        if let Some(v) = lookup("CLOUDFLARE_BIN") {
            config.cloudflare_bin = v;
        }
        if let Some(v) = lookup("ALIYUN_BIN") {
            config.aliyun_bin = v;
        }
        if let Some(v) = lookup("DOCKER_BIN") {
            config.docker_bin = v;
        }

        config
    }

    /// Load the `.env` file, then environment variables
    pub fn load(env_file: Option<&Path>) -> Self {
        if let Some(path) = env_file {
            load_dotenv(path);
        } else {
            let candidate = PathBuf::from(".env");
            if candidate.exists() {
                load_dotenv(&candidate);
            }
        }

        Self::from_env()
    }

    /// Reject values that would only fail later inside the agent container
    pub fn validate(&self) -> Result<(), AppError> {
        if self.email.trim().is_empty() {
            return Err(AppError::Config("email must not be empty".into()));
        }
        if self.certbot_image.trim().is_empty() {
            return Err(AppError::Config("certbot image must not be empty".into()));
        }
        if !self.acme_server.starts_with("https://") {
            return Err(AppError::Config(format!(
                "ACME server must be an https URL, got {}",
                self.acme_server
            )));
        }
        Ok(())
    }
}

/// Parse a basic `.env` file (one KEY=VALUE per line)
fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

fn load_dotenv(path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    debug!(path = %path.display(), "Loading .env file");
    for (key, value) in parse_dotenv(&content) {
        if std::env::var(&key).is_err() {
            // SAFETY: called before spawning any threads (single-threaded init)
            unsafe { std::env::set_var(&key, &value) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = EnvConfig::from_lookup(|_| None);
        assert_eq!(config.dns_provider, "alidns");
        assert_eq!(config.propagation_wait_secs, 10);
        assert_eq!(config.challenge_timeout_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("WILDCERT_DNS", "Cloudflare"),
            ("WILDCERT_WAIT_SECS", "30"),
            ("WILDCERT_OUTPUT_DIR", "/tmp/certs"),
            ("WILDCERT_CHALLENGE_TIMEOUT_SECS", "not-a-number"),
            ("DOCKER_BIN", "podman"),
        ]
        .into_iter()
        .collect();

        let config = EnvConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.dns_provider, "cloudflare");
        assert_eq!(config.propagation_wait_secs, 30);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/certs"));
        // unparseable values keep the default
        assert_eq!(config.challenge_timeout_secs, 600);
        assert_eq!(config.docker_bin, "podman");
    }

    #[test]
    fn test_parse_dotenv() {
        let parsed = parse_dotenv(
            "# comment\n\nWILDCERT_EMAIL=\"ops@example.com\"\n  WILDCERT_DNS = alidns \nbroken line\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("WILDCERT_EMAIL".to_string(), "ops@example.com".to_string()),
                ("WILDCERT_DNS".to_string(), "alidns".to_string()),
            ]
        );
    }

    #[test]
    fn test_validate_rejects_plain_http_server() {
        let config = EnvConfig {
            acme_server: "http://localhost:14000/dir".into(),
            ..EnvConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
