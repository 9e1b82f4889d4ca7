use crate::alidns::AlidnsCli;
use crate::cloudflare::CloudflareCli;
use crate::types::{DnsError, DnsRecord, DnsResult};
use async_trait::async_trait;

/// Capability set the challenge coordinator needs from a DNS provider
///
/// Implementations are stateless per call; sequencing of record changes is
/// the caller's responsibility.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Provider name (e.g. "cloudflare", "alidns")
    fn name(&self) -> &'static str;

    /// Domains (zones) managed by this account
    async fn list_domains(&self) -> DnsResult<Vec<String>>;

    /// Every record of a domain, names relative to the domain
    async fn list_records(&self, domain: &str) -> DnsResult<Vec<DnsRecord>>;

    /// Ids of records with exactly this relative name and type
    async fn find_record_ids(
        &self,
        domain: &str,
        name: &str,
        record_type: &str,
    ) -> DnsResult<Vec<String>> {
        Ok(self
            .list_records(domain)
            .await?
            .into_iter()
            .filter(|r| r.name == name && r.record_type == record_type)
            .map(|r| r.id)
            .collect())
    }

    /// Create a record and return its id
    async fn add_record(
        &self,
        domain: &str,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> DnsResult<String>;

    /// Delete a record; errors unless the provider confirms the id
    async fn delete_record(&self, domain: &str, record_id: &str) -> DnsResult<()>;
}

/// DNS provider selected at configuration time
#[derive(Debug, Clone)]
pub enum DnsProvider {
    Cloudflare(CloudflareCli),
    Alidns(AlidnsCli),
}

impl DnsProvider {
    /// Build a provider from its name, using the given CLI executables
    pub fn from_name(name: &str, cloudflare_bin: &str, aliyun_bin: &str) -> DnsResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cloudflare" => Ok(Self::Cloudflare(CloudflareCli::new(cloudflare_bin))),
            "alidns" => Ok(Self::Alidns(AlidnsCli::new(aliyun_bin))),
            other => Err(DnsError::UnknownProvider(other.to_string())),
        }
    }

    fn inner(&self) -> &dyn Registrar {
        match self {
            Self::Cloudflare(p) => p,
            Self::Alidns(p) => p,
        }
    }
}

#[async_trait]
impl Registrar for DnsProvider {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    async fn list_domains(&self) -> DnsResult<Vec<String>> {
        self.inner().list_domains().await
    }

    async fn list_records(&self, domain: &str) -> DnsResult<Vec<DnsRecord>> {
        self.inner().list_records(domain).await
    }

    async fn find_record_ids(
        &self,
        domain: &str,
        name: &str,
        record_type: &str,
    ) -> DnsResult<Vec<String>> {
        self.inner().find_record_ids(domain, name, record_type).await
    }

    async fn add_record(
        &self,
        domain: &str,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> DnsResult<String> {
        self.inner().add_record(domain, name, record_type, value).await
    }

    async fn delete_record(&self, domain: &str, record_id: &str) -> DnsResult<()> {
        self.inner().delete_record(domain, record_id).await
    }
}
