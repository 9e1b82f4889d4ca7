//! Cloudflare DNS records through the `cloudflare` command-line client

use crate::cli::{decode, run};
use crate::registrar::Registrar;
use crate::types::{relative_name, DnsError, DnsRecord, DnsResult};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

const PROVIDER: &str = "cloudflare";

#[derive(Debug, Deserialize)]
struct Zone {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CloudflareRecord {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RecordId {
    id: String,
}

/// Cloudflare registrar backed by `cloudflare --raw ...`
#[derive(Debug, Clone)]
pub struct CloudflareCli {
    bin: String,
}

impl CloudflareCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

fn parse_zones(body: &[u8]) -> DnsResult<Vec<String>> {
    let zones: Vec<Zone> = decode(PROVIDER, body)?;
    Ok(zones.into_iter().map(|z| z.name).collect())
}

fn parse_records(domain: &str, body: &[u8]) -> DnsResult<Vec<DnsRecord>> {
    let records: Vec<CloudflareRecord> = decode(PROVIDER, body)?;
    Ok(records
        .into_iter()
        .map(|r| {
            let name = relative_name(&r.name, domain);
            DnsRecord::new(domain, r.id, name, r.record_type, r.content)
        })
        .collect())
}

fn parse_record_id(body: &[u8]) -> DnsResult<Option<String>> {
    let response: CloudflareResponse<RecordId> = decode(PROVIDER, body)?;
    Ok(response.result.map(|r| r.id).filter(|id| !id.is_empty()))
}

#[async_trait]
impl Registrar for CloudflareCli {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn list_domains(&self) -> DnsResult<Vec<String>> {
        let body = run(&self.bin, &["--raw", "ls"]).await?;
        let zones = parse_zones(&body)?;
        debug!(count = zones.len(), "Listed Cloudflare zones");
        Ok(zones)
    }

    async fn list_records(&self, domain: &str) -> DnsResult<Vec<DnsRecord>> {
        let body = run(&self.bin, &["--raw", "records", domain]).await?;
        parse_records(domain, &body)
    }

    async fn add_record(
        &self,
        domain: &str,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> DnsResult<String> {
        let body = run(
            &self.bin,
            &["--raw", "addrecord", domain, name, record_type, value],
        )
        .await?;

        let record_id = parse_record_id(&body)?.ok_or_else(|| DnsError::MissingRecordId {
            name: format!("{}.{}", name, domain),
        })?;

        info!(domain, name, record_id = %record_id, "Created Cloudflare record");
        Ok(record_id)
    }

    async fn delete_record(&self, domain: &str, record_id: &str) -> DnsResult<()> {
        let body = run(&self.bin, &["--raw", "delrecord", domain, record_id]).await?;

        if parse_record_id(&body)?.as_deref() != Some(record_id) {
            return Err(DnsError::DeleteNotConfirmed {
                record_id: record_id.to_string(),
                response: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        info!(domain, record_id, "Deleted Cloudflare record");
        Ok(())
    }
}
