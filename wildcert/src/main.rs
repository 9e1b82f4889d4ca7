mod check;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use wc_acme::{
    BatchMode, BatchReport, CertbotEnvironment, CertbotOptions, ChallengeCoordinator,
    IssueOptions, Target,
};
use wc_common::EnvConfig;
use wc_container::DockerClient;
use wc_dns::{DnsProvider, Registrar};

/// Wildcard certificates through certbot's manual DNS-01 flow
#[derive(Parser, Debug)]
#[command(name = "wildcert", version)]
struct Cli {
    /// `.env` file to load (defaults to ./.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// DNS provider: alidns or cloudflare
    #[arg(long, global = true)]
    dns: Option<String>,

    /// Verbose logging, including every line certbot prints
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue `*.domain` + `domain` certificates
    Issue(IssueArgs),
    /// Delete leftover `_acme-challenge` TXT records
    Clean(CleanArgs),
    /// Report certificate expiry of every A record served over TLS
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct IssueArgs {
    /// Seconds to wait for DNS records to propagate
    #[arg(long)]
    wait: Option<u64>,

    /// Ask certbot for a dry run; DNS records are still changed
    #[arg(long)]
    dry_run: bool,

    /// Account email for the ACME server
    #[arg(long)]
    email: Option<String>,

    /// Directory for `<domain>.cert` and `<domain>.key`
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Seconds to wait for each certbot step, 0 waits forever
    #[arg(long)]
    challenge_timeout: Option<u64>,

    /// Wildcard domains, e.g. `*.example.com`
    #[arg(required = true, value_name = "DOMAIN")]
    domains: Vec<String>,
}

impl IssueArgs {
    fn apply(&self, config: &mut EnvConfig) {
        if let Some(wait) = self.wait {
            config.propagation_wait_secs = wait;
        }
        if let Some(email) = &self.email {
            config.email = email.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(secs) = self.challenge_timeout {
            config.challenge_timeout_secs = secs;
        }
    }
}

#[derive(Args, Debug)]
struct CleanArgs {
    /// Wildcard domains, e.g. `*.example.com`
    #[arg(required = true, value_name = "DOMAIN")]
    domains: Vec<String>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Only check names containing one of these strings
    #[arg(value_name = "PATTERN")]
    patterns: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The .env file is applied to the process environment, so it has to be
    // read before the runtime starts any threads.
    let mut config = EnvConfig::load(cli.env_file.as_deref());

    init_logging(cli.debug);

    if let Some(dns) = &cli.dns {
        config.dns_provider = dns.to_lowercase();
    }
    if let Command::Issue(args) = &cli.command {
        args.apply(&mut config);
    }
    config.validate()?;

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(run(cli.command, config))
}

/// Filter used when `RUST_LOG` is unset
fn default_directives(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info,wildcert=debug"
    }
}

fn init_logging(debug: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directives(debug))),
        )
        .init();
}

async fn run(command: Command, config: EnvConfig) -> anyhow::Result<()> {
    let registrar = DnsProvider::from_name(
        &config.dns_provider,
        &config.cloudflare_bin,
        &config.aliyun_bin,
    )?;
    info!(dns = registrar.name(), "Using DNS provider");

    match command {
        Command::Issue(args) => {
            let targets = parse_targets(&args.domains)?;
            let coordinator = coordinator(registrar, &config, args.dry_run);
            let report = coordinator.run_batch(&targets, BatchMode::Issue).await;
            summarize(report, targets.len())
        }
        Command::Clean(args) => {
            let targets = parse_targets(&args.domains)?;
            let coordinator = coordinator(registrar, &config, false);
            let report = coordinator.run_batch(&targets, BatchMode::Clean).await;
            summarize(report, targets.len())
        }
        Command::Check(args) => check::run(&registrar, &args.patterns).await,
    }
}

/// Every target is validated before any provider or container call
fn parse_targets(domains: &[String]) -> anyhow::Result<Vec<Target>> {
    domains
        .iter()
        .map(|d| Target::parse(d).map_err(anyhow::Error::from))
        .collect()
}

fn coordinator(
    registrar: DnsProvider,
    config: &EnvConfig,
    dry_run: bool,
) -> ChallengeCoordinator<DnsProvider, CertbotEnvironment> {
    let environment = CertbotEnvironment::new(
        DockerClient::new(config.docker_bin.clone()),
        CertbotOptions {
            image: config.certbot_image.clone(),
            email: config.email.clone(),
            acme_server: config.acme_server.clone(),
        },
    );
    ChallengeCoordinator::new(registrar, environment, issue_options(config, dry_run))
}

fn issue_options(config: &EnvConfig, dry_run: bool) -> IssueOptions {
    IssueOptions {
        dry_run,
        propagation_wait: Duration::from_secs(config.propagation_wait_secs),
        output_dir: config.output_dir.clone(),
        challenge_timeout: match config.challenge_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
    }
}

fn summarize(report: BatchReport, total: usize) -> anyhow::Result<()> {
    for target in &report.succeeded {
        info!(target = %target, "Done");
    }
    for (target, err) in &report.failed {
        error!(target = %target, error = %err, "Failed");
    }
    if !report.is_success() {
        anyhow::bail!("{} of {} targets failed", report.failed.len(), total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_issue() {
        let cli = Cli::parse_from([
            "wildcert",
            "--dns",
            "cloudflare",
            "issue",
            "--wait",
            "30",
            "--dry-run",
            "*.example.com",
            "*.example.org",
        ]);
        assert_eq!(cli.dns.as_deref(), Some("cloudflare"));
        let Command::Issue(args) = cli.command else {
            panic!("expected issue");
        };
        assert!(args.dry_run);
        assert_eq!(args.domains, vec!["*.example.com", "*.example.org"]);

        let mut config = EnvConfig::default();
        args.apply(&mut config);
        assert_eq!(config.propagation_wait_secs, 30);
        assert_eq!(config.email, "a@a.com");
    }

    #[test]
    fn test_default_log_directives() {
        assert_eq!(default_directives(false), "info,wildcert=debug");
        assert_eq!(default_directives(true), "debug");
        for debug in [false, true] {
            assert!(
                default_directives(debug)
                    .parse::<tracing_subscriber::EnvFilter>()
                    .is_ok()
            );
        }
    }

    #[test]
    fn test_issue_requires_domains() {
        assert!(Cli::try_parse_from(["wildcert", "issue"]).is_err());
    }

    #[test]
    fn test_parse_targets_rejects_any_malformed_target() {
        let domains = vec!["*.example.com".to_string(), "example.org".to_string()];
        assert!(parse_targets(&domains).is_err());
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let defaults = issue_options(&EnvConfig::default(), false);
        assert_eq!(defaults.challenge_timeout, Some(Duration::from_secs(600)));
        assert_eq!(defaults.propagation_wait, Duration::from_secs(10));

        let config = EnvConfig {
            challenge_timeout_secs: 0,
            ..EnvConfig::default()
        };
        let options = issue_options(&config, true);
        assert!(options.dry_run);
        assert_eq!(options.challenge_timeout, None);
    }

    #[test]
    fn test_summarize_fails_when_any_target_failed() {
        let mut report = BatchReport::default();
        report.succeeded.push("*.example.com".into());
        assert!(summarize(report, 1).is_ok());

        let mut report = BatchReport::default();
        report.failed.push((
            "*.nowhere.org".into(),
            wc_acme::AcmeError::NoRootDomain("*.nowhere.org".into()),
        ));
        let err = summarize(report, 2).unwrap_err();
        assert_eq!(err.to_string(), "1 of 2 targets failed");
    }
}
