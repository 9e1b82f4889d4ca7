//! DNS registrar access for ACME DNS-01 challenges
//!
//! Providers are driven through their command-line tools (`cloudflare`,
//! `aliyun`). The orchestrator only sees the [`Registrar`] capability set.

mod alidns;
mod cli;
mod cloudflare;
mod registrar;
pub mod types;

pub use alidns::AlidnsCli;
pub use cloudflare::CloudflareCli;
pub use registrar::{DnsProvider, Registrar};
pub use types::{DnsError, DnsRecord, DnsResult, TXT};
