use crate::parser::{AgentEvent, OutputParser};
use crate::types::Target;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// An interactive issuance agent attached to the caller
pub struct AttachedAgent {
    /// Combined agent output, one line per message; closes when the agent exits
    pub lines: mpsc::Receiver<String>,
    /// Agent stdin
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    /// Resolves to whether the agent process exited successfully
    pub exit: BoxFuture<'static, anyhow::Result<bool>>,
}

/// Disposable execution environment the issuance agent runs in
#[async_trait]
pub trait Environment: Send + Sync {
    /// Allocate a fresh environment requesting the target's wildcard and
    /// bare names. Returns the environment id.
    async fn create(&self, target: &Target, dry_run: bool) -> anyhow::Result<String>;

    /// Start the agent and attach to its input and output
    async fn attach(&self, environment_id: &str) -> anyhow::Result<AttachedAgent>;

    /// Read a file from inside the environment
    async fn copy_file(&self, environment_id: &str, path: &str) -> anyhow::Result<Vec<u8>>;

    /// Tear the environment down; idempotent
    async fn destroy(&self, environment_id: &str) -> anyhow::Result<()>;
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// The agent reported success before its output closed
    pub succeeded: bool,
    /// The agent process exited with a success status
    pub exited_cleanly: bool,
}

/// One run of the issuance agent: parses its output into events and writes
/// continuation keystrokes on request.
pub struct IssuanceSession {
    agent: AttachedAgent,
    parser: OutputParser,
}

impl IssuanceSession {
    pub fn new(agent: AttachedAgent, challenge_fqdn: impl Into<String>) -> Self {
        Self {
            agent,
            parser: OutputParser::new(challenge_fqdn),
        }
    }

    /// Drive the agent until its output closes.
    ///
    /// Every event is handed to `events` and the call returns only once the
    /// receiver has taken it, so the agent is never unblocked ahead of the
    /// consumer. Each message on `continues` writes one newline to the agent,
    /// provided it is waiting on a challenge prompt.
    pub async fn run(
        self,
        events: mpsc::Sender<AgentEvent>,
        mut continues: mpsc::Receiver<()>,
    ) -> anyhow::Result<SessionOutcome> {
        let AttachedAgent {
            mut lines,
            mut input,
            exit,
        } = self.agent;
        let mut parser = self.parser;
        let mut pending_prompts = 0usize;
        let mut continues_open = true;

        loop {
            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line else { break };
                    debug!(line = %line, "certbot");
                    if let Some(event) = parser.feed(&line) {
                        if matches!(event, AgentEvent::ChallengeToken(_)) {
                            pending_prompts += 1;
                        }
                        handoff(&events, event).await;
                    }
                }
                request = continues.recv(), if continues_open => {
                    match request {
                        Some(()) if pending_prompts == 0 => {
                            warn!("Continuation requested while certbot is not waiting on a challenge prompt");
                        }
                        Some(()) => {
                            pending_prompts -= 1;
                            info!("Pressing enter for certbot, waiting for response...");
                            input.write_all(b"\n").await?;
                            input.flush().await?;
                        }
                        None => continues_open = false,
                    }
                }
            }
        }

        if let Some(event) = parser.finish() {
            handoff(&events, event).await;
        }
        drop(events);
        drop(input);

        let exited_cleanly = exit.await?;
        let outcome = SessionOutcome {
            succeeded: parser.succeeded(),
            exited_cleanly,
        };
        if outcome.succeeded {
            info!("certbot reported success");
        }
        debug!(?outcome, "certbot session finished");
        Ok(outcome)
    }
}

/// Unbuffered send: completes once the receiver has taken the event.
async fn handoff(events: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    if events.send(event).await.is_err() {
        debug!("Event receiver dropped, discarding certbot event");
        return;
    }
    // The channel holds one message; a free slot means it was received.
    if events.reserve().await.is_err() {
        debug!("Event receiver dropped before taking the last event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const FQDN: &str = "_acme-challenge.example.com";

    fn agent_from(
        lines: mpsc::Receiver<String>,
        input: tokio::io::DuplexStream,
        exit_ok: bool,
    ) -> AttachedAgent {
        AttachedAgent {
            lines,
            input: Box::new(input),
            exit: Box::pin(async move { Ok(exit_ok) }),
        }
    }

    #[tokio::test]
    async fn test_session_reports_failure_without_success_marker() {
        let (line_tx, line_rx) = mpsc::channel(8);
        let (input, _agent_stdin) = tokio::io::duplex(64);
        let session = IssuanceSession::new(agent_from(line_rx, input, false), FQDN);

        let (event_tx, mut event_rx) = mpsc::channel(1);
        let (_continue_tx, continue_rx) = mpsc::channel(2);
        let task = tokio::spawn(session.run(event_tx, continue_rx));

        line_tx.send("An unexpected error occurred:".to_string()).await.unwrap();
        drop(line_tx);

        assert_eq!(event_rx.recv().await, Some(AgentEvent::IssuanceFailed));
        assert_eq!(event_rx.recv().await, None);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            SessionOutcome {
                succeeded: false,
                exited_cleanly: false
            }
        );
    }

    #[tokio::test]
    async fn test_continue_without_prompt_is_not_written() {
        let (line_tx, line_rx) = mpsc::channel(8);
        let (input, mut agent_stdin) = tokio::io::duplex(64);
        let session = IssuanceSession::new(agent_from(line_rx, input, true), FQDN);

        let (event_tx, mut event_rx) = mpsc::channel(1);
        let (continue_tx, continue_rx) = mpsc::channel(2);
        let task = tokio::spawn(session.run(event_tx, continue_rx));

        continue_tx.send(()).await.unwrap();
        tokio::task::yield_now().await;
        line_tx.send("The dry run was successful.".to_string()).await.unwrap();
        assert_eq!(event_rx.recv().await, Some(AgentEvent::IssuanceSucceeded));
        drop(line_tx);
        assert_eq!(event_rx.recv().await, None);

        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.succeeded && outcome.exited_cleanly);

        let mut written = Vec::new();
        agent_stdin.read_to_end(&mut written).await.unwrap();
        assert!(written.is_empty(), "no keystroke expected, got {written:?}");
    }

    #[tokio::test]
    async fn test_continue_after_token_writes_newline() {
        let (line_tx, line_rx) = mpsc::channel(8);
        let (input, mut agent_stdin) = tokio::io::duplex(64);
        let session = IssuanceSession::new(agent_from(line_rx, input, true), FQDN);

        let (event_tx, mut event_rx) = mpsc::channel(1);
        let (continue_tx, continue_rx) = mpsc::channel(2);
        let task = tokio::spawn(session.run(event_tx, continue_rx));

        for line in [
            "Please deploy a DNS TXT record under the name",
            "_acme-challenge.example.com with the following value:",
            "",
            "TOKEN1",
        ] {
            line_tx.send(line.to_string()).await.unwrap();
        }
        assert_eq!(event_rx.recv().await, Some(AgentEvent::ChallengeRequested));
        assert_eq!(
            event_rx.recv().await,
            Some(AgentEvent::ChallengeToken("TOKEN1".into()))
        );

        continue_tx.send(()).await.unwrap();
        let mut byte = [0u8; 1];
        agent_stdin.read_exact(&mut byte).await.unwrap();
        assert_eq!(&byte, b"\n");

        line_tx.send("Congratulations! Your certificate and chain have been saved at:".into()).await.unwrap();
        drop(line_tx);
        assert_eq!(event_rx.recv().await, Some(AgentEvent::IssuanceSucceeded));
        assert_eq!(event_rx.recv().await, None);
        assert!(task.await.unwrap().unwrap().succeeded);
    }
}
