//! Alibaba Cloud DNS records through the `aliyun alidns` command-line client

use crate::cli::{decode, run};
use crate::registrar::Registrar;
use crate::types::{DnsError, DnsRecord, DnsResult};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

const PROVIDER: &str = "alidns";
const PAGE_SIZE: u32 = 500;
const DOMAIN_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainsResponse {
    domains: DomainList,
    #[serde(default)]
    total_count: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainList {
    #[serde(default)]
    domain: Vec<Domain>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Domain {
    domain_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeRecordsResponse {
    domain_records: RecordList,
    #[serde(default)]
    total_count: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordList {
    #[serde(default)]
    record: Vec<AliRecord>,
}

#[derive(Debug, Deserialize)]
struct AliRecord {
    #[serde(rename = "RecordId")]
    record_id: String,
    #[serde(rename = "RR")]
    rr: String,
    #[serde(rename = "Type")]
    record_type: String,
    #[serde(rename = "Value", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RecordIdResponse {
    #[serde(rename = "RecordId", default)]
    record_id: String,
}

/// Whether another page follows page `page` (1-based) of `page_size`
/// entries. Counts come from the request, not the response, and an empty
/// page always ends the listing.
fn has_next_page(total_count: u32, page: u32, page_size: u32, received: usize) -> bool {
    received > 0 && page.saturating_mul(page_size) < total_count
}

/// Alibaba Cloud DNS registrar backed by `aliyun alidns ...`
#[derive(Debug, Clone)]
pub struct AlidnsCli {
    bin: String,
}

impl AlidnsCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn describe_records_page(
        &self,
        domain: &str,
        page: u32,
    ) -> DnsResult<DescribeRecordsResponse> {
        let page = page.to_string();
        let size = PAGE_SIZE.to_string();
        let body = run(
            &self.bin,
            &[
                "alidns",
                "DescribeDomainRecords",
                "--DomainName",
                domain,
                "--PageNumber",
                &page,
                "--PageSize",
                &size,
            ],
        )
        .await?;
        decode(PROVIDER, &body)
    }
}

fn records_from_page(domain: &str, page: DescribeRecordsResponse) -> Vec<DnsRecord> {
    page.domain_records
        .record
        .into_iter()
        .map(|r| DnsRecord::new(domain, r.record_id, r.rr, r.record_type, r.value))
        .collect()
}

#[async_trait]
impl Registrar for AlidnsCli {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn list_domains(&self) -> DnsResult<Vec<String>> {
        let size = DOMAIN_PAGE_SIZE.to_string();
        let mut domains = Vec::new();
        let mut page = 1u32;
        loop {
            let page_arg = page.to_string();
            let body = run(
                &self.bin,
                &[
                    "alidns",
                    "DescribeDomains",
                    "--PageNumber",
                    &page_arg,
                    "--PageSize",
                    &size,
                ],
            )
            .await?;
            let response: DescribeDomainsResponse = decode(PROVIDER, &body)?;
            let received = response.domains.domain.len();
            let more = has_next_page(response.total_count, page, DOMAIN_PAGE_SIZE, received);
            domains.extend(response.domains.domain.into_iter().map(|d| d.domain_name));
            if !more {
                break;
            }
            page += 1;
        }
        debug!(count = domains.len(), "Listed Alibaba Cloud DNS domains");
        Ok(domains)
    }

    async fn list_records(&self, domain: &str) -> DnsResult<Vec<DnsRecord>> {
        let mut records = Vec::new();
        let mut page = 1u32;
        loop {
            let response = self.describe_records_page(domain, page).await?;
            let received = response.domain_records.record.len();
            let more = has_next_page(response.total_count, page, PAGE_SIZE, received);
            records.extend(records_from_page(domain, response));
            if !more {
                break;
            }
            page += 1;
        }
        Ok(records)
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
            &[
                "alidns",
                "AddDomainRecord",
                "--DomainName",
                domain,
                "--RR",
                name,
                "--Type",
                record_type,
                "--Value",
                value,
            ],
        )
        .await?;

        let response: RecordIdResponse = decode(PROVIDER, &body)?;
        if response.record_id.is_empty() {
            return Err(DnsError::MissingRecordId {
                name: format!("{}.{}", name, domain),
            });
        }

        info!(domain, name, record_id = %response.record_id, "Created Alibaba Cloud DNS record");
        Ok(response.record_id)
    }

    async fn delete_record(&self, domain: &str, record_id: &str) -> DnsResult<()> {
        let body = run(
            &self.bin,
            &["alidns", "DeleteDomainRecord", "--RecordId", record_id],
        )
        .await?;

        let response: RecordIdResponse = decode(PROVIDER, &body)?;
        if response.record_id != record_id {
            return Err(DnsError::DeleteNotConfirmed {
                record_id: record_id.to_string(),
                response: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        info!(domain, record_id, "Deleted Alibaba Cloud DNS record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_next_page() {
        assert!(!has_next_page(3, 1, 500, 3));
        assert!(!has_next_page(500, 1, 500, 500));
        assert!(has_next_page(501, 1, 500, 500));
        assert!(!has_next_page(501, 2, 500, 1));
        // an empty page ends the listing whatever the total says
        assert!(!has_next_page(10_000, 1, 500, 0));
    }

    #[test]
    fn test_paging_ends_when_provider_repeats_page_number() {
        // Every response claims PageNumber 1 of a huge listing
        let body = br#"{
            "DomainRecords": {"Record": [{"RecordId":"1","RR":"www","Type":"A","Value":"10.0.0.1"}]},
            "TotalCount": 100000, "PageNumber": 1, "PageSize": 500
        }"#;
        let mut page = 1u32;
        loop {
            let response: DescribeRecordsResponse = decode(PROVIDER, body).unwrap();
            let received = response.domain_records.record.len();
            if !has_next_page(response.total_count, page, PAGE_SIZE, received) {
                break;
            }
            page += 1;
            assert!(page <= 200, "paging did not terminate");
        }
        assert_eq!(page, 200);
    }

    #[test]
    fn test_parse_domains() {
        let body = br#"{"Domains":{"Domain":[{"DomainName":"example.com"},{"DomainName":"example.cn"}]},"TotalCount":2,"PageNumber":1,"PageSize":100,"RequestId":"x"}"#;
        let response: DescribeDomainsResponse = decode(PROVIDER, body).unwrap();
        let names: Vec<_> = response.domains.domain.into_iter().map(|d| d.domain_name).collect();
        assert_eq!(names, vec!["example.com", "example.cn"]);
    }

    #[test]
    fn test_parse_records_page() {
        let body = br#"{
            "DomainRecords": {"Record": [
                {"RecordId":"9001","RR":"_acme-challenge","Type":"TXT","Value":"tok","DomainName":"example.com"},
                {"RecordId":"9002","RR":"@","Type":"A","Value":"10.0.0.1","DomainName":"example.com"}
            ]},
            "TotalCount": 2, "PageNumber": 1, "PageSize": 500
        }"#;
        let response: DescribeRecordsResponse = decode(PROVIDER, body).unwrap();
        assert!(!has_next_page(response.total_count, 1, PAGE_SIZE, 2));

        let records = records_from_page("example.com", response);
        assert_eq!(records[0].id, "9001");
        assert_eq!(records[0].name, "_acme-challenge");
        assert_eq!(records[0].full_name, "_acme-challenge.example.com");
        assert_eq!(records[1].full_name, "example.com");
    }

    #[test]
    fn test_parse_record_id_response() {
        let response: RecordIdResponse =
            decode(PROVIDER, br#"{"RequestId":"abc","RecordId":"9001"}"#).unwrap();
        assert_eq!(response.record_id, "9001");

        let response: RecordIdResponse = decode(PROVIDER, br#"{"RequestId":"abc"}"#).unwrap();
        assert!(response.record_id.is_empty());
    }
}
