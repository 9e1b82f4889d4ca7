use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Record type used for ACME DNS-01 challenges
pub const TXT: &str = "TXT";

/// A DNS record as reported by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Provider-assigned id
    pub id: String,
    /// Name relative to the root domain ("@" for the apex)
    pub name: String,
    /// Fully qualified name
    pub full_name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub value: String,
}

impl DnsRecord {
    /// Build a record from its relative name, deriving the absolute name
    pub fn new(
        domain: &str,
        id: impl Into<String>,
        name: impl Into<String>,
        record_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let full_name = if name == "@" || name.is_empty() {
            domain.to_string()
        } else {
            format!("{}.{}", name, domain)
        };
        Self {
            id: id.into(),
            name,
            full_name,
            record_type: record_type.into(),
            value: value.into(),
        }
    }
}

/// Strip `.<domain>` from an absolute record name ("@" for the apex)
pub fn relative_name(full_name: &str, domain: &str) -> String {
    let full_name = full_name.trim_end_matches('.');
    if full_name == domain {
        return "@".to_string();
    }
    full_name
        .strip_suffix(domain)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(full_name)
        .to_string()
}

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("Unknown DNS provider '{0}' (expected alidns or cloudflare)")]
    UnknownProvider(String),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} {command} failed: {stderr}")]
    CommandFailed {
        program: String,
        command: String,
        stderr: String,
    },

    #[error("Malformed {provider} response: {source}")]
    MalformedResponse {
        provider: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Provider did not confirm deletion of record {record_id}: {response}")]
    DeleteNotConfirmed { record_id: String, response: String },

    #[error("Provider returned no record id for {name}")]
    MissingRecordId { name: String },
}

pub type DnsResult<T> = Result<T, DnsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_name() {
        assert_eq!(relative_name("_acme-challenge.example.com", "example.com"), "_acme-challenge");
        assert_eq!(relative_name("_acme-challenge.a.example.com.", "example.com"), "_acme-challenge.a");
        assert_eq!(relative_name("example.com", "example.com"), "@");
        // a name that merely ends with the same characters is not inside the zone
        assert_eq!(relative_name("badexample.com", "example.com"), "badexample.com");
    }

    #[test]
    fn test_record_full_name() {
        let apex = DnsRecord::new("example.com", "1", "@", "A", "10.0.0.1");
        assert_eq!(apex.full_name, "example.com");

        let www = DnsRecord::new("example.com", "2", "www", "A", "10.0.0.2");
        assert_eq!(www.full_name, "www.example.com");
    }
}
