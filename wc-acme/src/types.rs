use std::fmt;
use thiserror::Error;
use wc_dns::DnsError;

/// Prefix marking a wildcard request
pub const WILDCARD_PREFIX: &str = "*.";

/// Label under which DNS-01 challenge records are published
pub const CHALLENGE_LABEL: &str = "_acme-challenge";

/// A wildcard certificate request such as `*.example.com`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    raw: String,
}

impl Target {
    /// Validate a wildcard request: exactly one `*`, as the `*.` prefix,
    /// followed by a non-empty dotted name
    pub fn parse(input: &str) -> AcmeResult<Self> {
        let raw = input.trim().trim_end_matches('.').to_ascii_lowercase();

        if raw.matches('*').count() != 1 || !raw.starts_with(WILDCARD_PREFIX) {
            return Err(AcmeError::InvalidTarget(format!(
                "{input}: domain name should contain one *. prefix"
            )));
        }

        let bare = &raw[WILDCARD_PREFIX.len()..];
        if bare.is_empty() || bare.split('.').any(str::is_empty) {
            return Err(AcmeError::InvalidTarget(format!(
                "{input}: empty label after the wildcard"
            )));
        }

        Ok(Self { raw })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The target without its wildcard marker (`example.com`)
    pub fn bare_domain(&self) -> &str {
        &self.raw[WILDCARD_PREFIX.len()..]
    }

    /// Absolute challenge record name (`_acme-challenge.example.com`)
    pub fn challenge_fqdn(&self) -> String {
        format!("{}.{}", CHALLENGE_LABEL, self.bare_domain())
    }

    /// Longest registrar domain the target lives under
    pub fn find_root<'a, I>(&self, domains: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let bare = self.bare_domain();
        domains
            .into_iter()
            .map(|d| d.trim_end_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .filter(|d| bare == d.as_str() || bare.ends_with(&format!(".{d}")))
            .max_by_key(String::len)
    }

    /// Challenge record name relative to `root`
    pub fn challenge_name(&self, root: &str) -> String {
        let fqdn = self.challenge_fqdn();
        fqdn.strip_suffix(root)
            .and_then(|rest| rest.strip_suffix('.'))
            .map(str::to_string)
            .unwrap_or(fqdn)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A target whose root domain is known to the registrar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: Target,
    pub root_domain: String,
    /// Challenge record name relative to `root_domain`
    pub challenge_name: String,
}

impl ResolvedTarget {
    pub fn new(target: Target, root_domain: String) -> Self {
        let challenge_name = target.challenge_name(&root_domain);
        Self {
            target,
            root_domain,
            challenge_name,
        }
    }
}

/// Files certbot produces for an issued certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// fullchain.pem
    Certificate,
    /// privkey.pem
    PrivateKey,
}

impl ArtifactKind {
    /// Extension of the file written for this artifact
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Certificate => "cert",
            Self::PrivateKey => "key",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Certificate => f.write_str("certificate chain"),
            Self::PrivateKey => f.write_str("private key"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AcmeError {
    #[error("Invalid target {0}")]
    InvalidTarget(String),

    #[error("No root domain in the DNS account for {0}")]
    NoRootDomain(String),

    #[error("DNS registrar error: {0}")]
    Registrar(#[from] DnsError),

    #[error("Environment error: {0:#}")]
    Environment(anyhow::Error),

    #[error("certbot did not report a successful issuance for {0}")]
    IssuanceFailed(String),

    #[error("certbot exited with a failure status for {0}")]
    AgentExit(String),

    #[error("certbot never reported the {0} path")]
    ArtifactMissing(ArtifactKind),

    #[error("{path} is empty")]
    EmptyArtifact { path: String },

    #[error("Timed out after {waited_secs}s while {phase}")]
    Timeout { waited_secs: u64, phase: &'static str },

    #[error("Issuance session ended while {0}")]
    SessionClosed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AcmeResult<T> = Result<T, AcmeError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(list: &[&str]) -> Vec<String> {
        list.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_parse_valid_target() {
        let target = Target::parse("*.Example.com").unwrap();
        assert_eq!(target.as_str(), "*.example.com");
        assert_eq!(target.bare_domain(), "example.com");
        assert_eq!(target.challenge_fqdn(), "_acme-challenge.example.com");
    }

    #[test]
    fn test_parse_rejects_malformed_targets() {
        for input in ["example.com", "*example.com", "a.*.example.com", "*.*.example.com", "*.", "*..com", "**.example.com"] {
            assert!(
                matches!(Target::parse(input), Err(AcmeError::InvalidTarget(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_find_root_prefers_longest_suffix() {
        let target = Target::parse("*.dev.shop.example.com").unwrap();
        let list = domains(&["example.com", "shop.example.com", "other.com"]);
        assert_eq!(target.find_root(&list).as_deref(), Some("shop.example.com"));
    }

    #[test]
    fn test_find_root_requires_label_boundary() {
        let target = Target::parse("*.myexample.com").unwrap();
        assert_eq!(target.find_root(&domains(&["example.com"])), None);
    }

    #[test]
    fn test_challenge_name_for_apex_wildcard() {
        let target = Target::parse("*.example.com").unwrap();
        assert_eq!(target.challenge_name("example.com"), "_acme-challenge");
    }

    #[test]
    fn test_challenge_name_reconstructs_fqdn() {
        let cases = [
            ("*.example.com", "example.com"),
            ("*.a.example.com", "example.com"),
            ("*.b.a.example.co.uk", "example.co.uk"),
            ("*.shop.example.com", "shop.example.com"),
        ];
        for (input, root) in cases {
            let target = Target::parse(input).unwrap();
            let name = target.challenge_name(root);
            assert_eq!(
                format!("{name}.{root}"),
                format!("{CHALLENGE_LABEL}.{}", target.bare_domain()),
                "{input} under {root}"
            );
            assert!(!name.ends_with(root), "{name} must not keep the root suffix");
        }
    }

    #[test]
    fn test_resolved_target() {
        let resolved = ResolvedTarget::new(Target::parse("*.a.example.com").unwrap(), "example.com".into());
        assert_eq!(resolved.challenge_name, "_acme-challenge.a");
    }
}
