use crate::parser::AgentEvent;
use crate::session::{Environment, IssuanceSession, SessionOutcome};
use crate::types::{AcmeError, AcmeResult, ArtifactKind, ResolvedTarget, Target};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use wc_dns::{Registrar, TXT};

/// Challenge tokens certbot asks for per target: one for `*.<bare>`, one for `<bare>`
pub const EXPECTED_CHALLENGES: usize = 2;

/// Issuance settings shared by every target of a run
#[derive(Debug, Clone)]
pub struct IssueOptions {
    /// Run certbot with `--dry-run`; DNS records are still modified
    pub dry_run: bool,
    /// Wait between publishing the last token and letting certbot validate
    pub propagation_wait: Duration,
    /// Directory receiving `<domain>.cert` and `<domain>.key`
    pub output_dir: PathBuf,
    /// Upper bound on waiting for the next certbot event
    pub challenge_timeout: Option<Duration>,
}

impl Default for IssueOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            propagation_wait: Duration::from_secs(10),
            output_dir: PathBuf::from("."),
            challenge_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Progress through the two-token handshake with certbot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    AwaitingFirst,
    AwaitingSecond,
    Validating,
}

impl Handshake {
    fn published(self) -> usize {
        match self {
            Self::AwaitingFirst => 0,
            Self::AwaitingSecond => 1,
            Self::Validating => EXPECTED_CHALLENGES,
        }
    }

    fn waiting_for(self) -> &'static str {
        match self {
            Self::AwaitingFirst => "waiting for the first challenge",
            Self::AwaitingSecond => "waiting for the second challenge",
            Self::Validating => "waiting for certbot to finish",
        }
    }
}

/// State of one target's issuance
#[derive(Debug, Clone, Default)]
pub struct ChallengeSession {
    pub environment_id: String,
    /// Tokens published, in the order certbot asked for them
    pub tokens: Vec<String>,
    /// Ids of the TXT records created for `tokens`
    pub record_ids: Vec<String>,
    pub completed: bool,
    pub succeeded: bool,
    pub certificate_path: Option<String>,
    pub private_key_path: Option<String>,
}

impl ChallengeSession {
    fn new(environment_id: String) -> Self {
        Self {
            environment_id,
            ..Self::default()
        }
    }

    fn artifact_path(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Certificate => self.certificate_path.as_deref(),
            ArtifactKind::PrivateKey => self.private_key_path.as_deref(),
        }
    }
}

/// Result of a completed issuance
#[derive(Debug, Clone)]
pub struct IssueReport {
    pub target: String,
    pub root_domain: String,
    pub record_ids: Vec<String>,
    /// Written files; empty for dry runs
    pub written: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Issue,
    Clean,
}

/// Outcome of processing several targets in sequence
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, AcmeError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives certbot sessions and keeps the DNS challenge records in step
pub struct ChallengeCoordinator<R, E> {
    registrar: R,
    environment: E,
    options: IssueOptions,
}

impl<R: Registrar, E: Environment> ChallengeCoordinator<R, E> {
    pub fn new(registrar: R, environment: E, options: IssueOptions) -> Self {
        Self {
            registrar,
            environment,
            options,
        }
    }

    pub fn registrar(&self) -> &R {
        &self.registrar
    }

    /// Find the registrar domain the target lives under
    pub async fn resolve(&self, target: &Target) -> AcmeResult<ResolvedTarget> {
        let domains = self.registrar.list_domains().await?;
        let root = target
            .find_root(&domains)
            .ok_or_else(|| AcmeError::NoRootDomain(target.to_string()))?;

        info!(target = %target, root_domain = %root, "Resolved root domain");
        Ok(ResolvedTarget::new(target.clone(), root))
    }

    /// Delete every challenge TXT record for the target without issuing
    pub async fn clean(&self, target: &Target) -> AcmeResult<usize> {
        let resolved = self.resolve(target).await?;
        self.purge_challenge_records(&resolved).await
    }

    /// Issue a certificate for one target and write its files
    pub async fn issue(&self, target: &Target) -> AcmeResult<IssueReport> {
        let resolved = self.resolve(target).await?;

        let environment_id = self
            .environment
            .create(target, self.options.dry_run)
            .await
            .map_err(AcmeError::Environment)?;
        info!(target = %target, environment = %environment_id, "Created issuance environment");

        let mut session = ChallengeSession::new(environment_id);
        let result = self.run_session(&resolved, &mut session).await;

        match (result, self.environment.destroy(&session.environment_id).await) {
            (Ok(report), Ok(())) => {
                info!(environment = %session.environment_id, "Environment destroyed");
                Ok(report)
            }
            (Ok(report), Err(e)) => {
                warn!(
                    environment = %session.environment_id,
                    error = %e,
                    "Failed to destroy environment after successful issuance"
                );
                Ok(report)
            }
            (Err(err), teardown) => {
                if let Err(e) = teardown {
                    warn!(environment = %session.environment_id, error = %e, "Failed to destroy environment");
                }
                Err(err)
            }
        }
    }

    /// Process targets one after another; a failing target does not stop the batch
    pub async fn run_batch(&self, targets: &[Target], mode: BatchMode) -> BatchReport {
        let mut report = BatchReport::default();

        for target in targets {
            let result = match mode {
                BatchMode::Issue => self.issue(target).await.map(|_| ()),
                BatchMode::Clean => self.clean(target).await.map(|_| ()),
            };
            match result {
                Ok(()) => report.succeeded.push(target.to_string()),
                Err(e) => {
                    error!(target = %target, error = %e, "Target failed");
                    report.failed.push((target.to_string(), e));
                }
            }
        }

        report
    }

    async fn purge_challenge_records(&self, resolved: &ResolvedTarget) -> AcmeResult<usize> {
        let name = &resolved.challenge_name;
        info!(name = %name, "Finding TXT records");

        let ids = self
            .registrar
            .find_record_ids(&resolved.root_domain, name, TXT)
            .await?;
        if ids.is_empty() {
            info!(name = %name, "No TXT records yet");
            return Ok(0);
        }

        info!(name = %name, count = ids.len(), "Found TXT records");
        for id in &ids {
            info!(record_id = %id, "Deleting TXT record");
            self.registrar.delete_record(&resolved.root_domain, id).await?;
        }
        Ok(ids.len())
    }

    async fn run_session(
        &self,
        resolved: &ResolvedTarget,
        session: &mut ChallengeSession,
    ) -> AcmeResult<IssueReport> {
        let agent = self
            .environment
            .attach(&session.environment_id)
            .await
            .map_err(AcmeError::Environment)?;

        let (event_tx, mut event_rx) = mpsc::channel(1);
        let (continue_tx, continue_rx) = mpsc::channel(EXPECTED_CHALLENGES);
        let issuance = IssuanceSession::new(agent, resolved.target.challenge_fqdn());
        let task = tokio::spawn(issuance.run(event_tx, continue_rx));

        info!("Waiting for certbot's ACME challenge");
        if let Err(e) = self
            .follow_events(resolved, session, &mut event_rx, &continue_tx)
            .await
        {
            task.abort();
            return Err(e);
        }
        drop(continue_tx);

        let outcome: SessionOutcome = task
            .await
            .map_err(|e| AcmeError::Environment(e.into()))?
            .map_err(AcmeError::Environment)?;
        session.completed = true;

        if !outcome.succeeded {
            return Err(AcmeError::IssuanceFailed(resolved.target.to_string()));
        }
        if !outcome.exited_cleanly {
            return Err(AcmeError::AgentExit(resolved.target.to_string()));
        }
        info!(target = %resolved.target, "Successfully generated certificates");

        let written = if self.options.dry_run {
            debug!("Dry run, no artifacts to retrieve");
            Vec::new()
        } else {
            self.retrieve_artifacts(resolved, session).await?
        };

        Ok(IssueReport {
            target: resolved.target.to_string(),
            root_domain: resolved.root_domain.clone(),
            record_ids: session.record_ids.clone(),
            written,
        })
    }

    async fn follow_events(
        &self,
        resolved: &ResolvedTarget,
        session: &mut ChallengeSession,
        events: &mut mpsc::Receiver<AgentEvent>,
        continues: &mpsc::Sender<()>,
    ) -> AcmeResult<()> {
        let mut handshake = Handshake::AwaitingFirst;

        loop {
            let next = match self.options.challenge_timeout {
                Some(limit) => tokio::time::timeout(limit, events.recv())
                    .await
                    .map_err(|_| AcmeError::Timeout {
                        waited_secs: limit.as_secs(),
                        phase: handshake.waiting_for(),
                    })?,
                None => events.recv().await,
            };
            let Some(event) = next else { break };

            match event {
                AgentEvent::ChallengeRequested => {
                    debug!(published = handshake.published(), "certbot opened a challenge block");
                }
                AgentEvent::ChallengeToken(token) => {
                    info!(token = %token, "Received certbot's ACME challenge");
                    handshake = self
                        .publish(resolved, session, handshake, token, continues)
                        .await?;
                }
                AgentEvent::IssuanceSucceeded => session.succeeded = true,
                AgentEvent::IssuanceFailed => session.succeeded = false,
                AgentEvent::ArtifactPath(kind, path) => {
                    debug!(%kind, path = %path, "certbot reported artifact");
                    match kind {
                        ArtifactKind::Certificate => session.certificate_path = Some(path),
                        ArtifactKind::PrivateKey => session.private_key_path = Some(path),
                    }
                }
            }
        }

        if handshake != Handshake::Validating {
            warn!(
                published = handshake.published(),
                expected = EXPECTED_CHALLENGES,
                "certbot finished before requesting every challenge"
            );
        }
        Ok(())
    }

    /// Publish one token, then let certbot move on. The record always exists
    /// before the continuation is sent.
    async fn publish(
        &self,
        resolved: &ResolvedTarget,
        session: &mut ChallengeSession,
        handshake: Handshake,
        token: String,
        continues: &mpsc::Sender<()>,
    ) -> AcmeResult<Handshake> {
        if handshake == Handshake::Validating {
            warn!(token = %token, "certbot requested more challenges than expected, ignoring");
            return Ok(handshake);
        }
        if handshake == Handshake::AwaitingFirst {
            self.purge_challenge_records(resolved).await?;
        }

        info!(name = %resolved.challenge_name, "Creating new TXT record");
        let record_id = self
            .registrar
            .add_record(&resolved.root_domain, &resolved.challenge_name, TXT, &token)
            .await?;
        info!(record_id = %record_id, "New record has been created");
        session.tokens.push(token);
        session.record_ids.push(record_id);

        let next = match handshake {
            Handshake::AwaitingFirst => Handshake::AwaitingSecond,
            _ => {
                let wait = self.options.propagation_wait;
                info!(wait_secs = wait.as_secs(), "Waiting for DNS records to take effect");
                tokio::time::sleep(wait).await;
                Handshake::Validating
            }
        };

        continues
            .send(())
            .await
            .map_err(|_| AcmeError::SessionClosed(handshake.waiting_for()))?;
        Ok(next)
    }

    async fn retrieve_artifacts(
        &self,
        resolved: &ResolvedTarget,
        session: &ChallengeSession,
    ) -> AcmeResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for kind in [ArtifactKind::Certificate, ArtifactKind::PrivateKey] {
            let path = session
                .artifact_path(kind)
                .ok_or(AcmeError::ArtifactMissing(kind))?;
            info!(path, environment = %session.environment_id, "Copying artifact");
            let content = self
                .environment
                .copy_file(&session.environment_id, path)
                .await
                .map_err(AcmeError::Environment)?;
            if content.is_empty() {
                return Err(AcmeError::EmptyArtifact {
                    path: path.to_string(),
                });
            }
            files.push((kind, content));
        }

        tokio::fs::create_dir_all(&self.options.output_dir).await?;
        let mut written = Vec::new();
        for (kind, content) in files {
            let file = self.options.output_dir.join(format!(
                "{}.{}",
                resolved.target.bare_domain(),
                kind.extension()
            ));
            write_artifact(&file, kind, &content).await?;
            info!(file = %file.display(), "Written file");
            written.push(file);
        }
        Ok(written)
    }
}

async fn write_artifact(path: &Path, kind: ArtifactKind, content: &[u8]) -> AcmeResult<()> {
    tokio::fs::write(path, content).await?;

    #[cfg(unix)]
    if kind == ArtifactKind::PrivateKey {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    let _ = kind;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_counts() {
        assert_eq!(Handshake::AwaitingFirst.published(), 0);
        assert_eq!(Handshake::AwaitingSecond.published(), 1);
        assert_eq!(Handshake::Validating.published(), EXPECTED_CHALLENGES);
    }

    #[test]
    fn test_session_artifact_lookup() {
        let mut session = ChallengeSession::new("abc".into());
        assert_eq!(session.artifact_path(ArtifactKind::Certificate), None);
        session.private_key_path = Some("/etc/letsencrypt/live/example.com/privkey.pem".into());
        assert_eq!(
            session.artifact_path(ArtifactKind::PrivateKey),
            Some("/etc/letsencrypt/live/example.com/privkey.pem")
        );
    }
}
