//! Event extraction from certbot's interactive output
//!
//! certbot's text is not a versioned protocol, so only lines following the
//! expected structural markers are interpreted; everything else is ignored.

use crate::types::ArtifactKind;

/// Instruction that opens a challenge block
pub const DEPLOY_MARKER: &str = "deploy a DNS TXT record";
/// Prompt preceding the token when certbot prints the record name on a line
/// of its own
pub const VALUE_PROMPT: &str = "with the following value";
/// Any of these in a line reports a successful run (or dry run)
pub const SUCCESS_MARKERS: [&str; 3] = ["successful", "Successfully received", "Congratulations"];
pub const CERTIFICATE_MARKER: &str = "fullchain.pem";
pub const PRIVATE_KEY_MARKER: &str = "privkey.pem";

/// Parser position in the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    Idle,
    /// Deploy instruction seen, waiting for the line naming the record
    AwaitingChallengeBlock,
    /// Record name seen, the next non-blank line other than the value
    /// prompt is the token
    CapturingToken,
    /// Token emitted; behaves like `Idle` so a second block can follow
    PostCapture,
}

/// Something meaningful certbot said
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    ChallengeRequested,
    ChallengeToken(String),
    IssuanceSucceeded,
    IssuanceFailed,
    ArtifactPath(ArtifactKind, String),
}

/// Pure transition function: `(state, line) -> (state, event)`
pub fn step(state: ParserState, line: &str, challenge_fqdn: &str) -> (ParserState, Option<AgentEvent>) {
    match state {
        ParserState::AwaitingChallengeBlock => {
            if line.contains(challenge_fqdn) {
                (ParserState::CapturingToken, None)
            } else {
                (state, None)
            }
        }
        ParserState::CapturingToken => {
            let token = line.trim();
            if token.is_empty() || token.contains(VALUE_PROMPT) {
                (state, None)
            } else {
                (
                    ParserState::PostCapture,
                    Some(AgentEvent::ChallengeToken(token.to_string())),
                )
            }
        }
        ParserState::Idle | ParserState::PostCapture => {
            if line.contains(DEPLOY_MARKER) {
                (
                    ParserState::AwaitingChallengeBlock,
                    Some(AgentEvent::ChallengeRequested),
                )
            } else if SUCCESS_MARKERS.iter().any(|m| line.contains(m)) {
                (state, Some(AgentEvent::IssuanceSucceeded))
            } else if let Some(path) = artifact_path(line, CERTIFICATE_MARKER) {
                (state, Some(AgentEvent::ArtifactPath(ArtifactKind::Certificate, path)))
            } else if let Some(path) = artifact_path(line, PRIVATE_KEY_MARKER) {
                (state, Some(AgentEvent::ArtifactPath(ArtifactKind::PrivateKey, path)))
            } else {
                (state, None)
            }
        }
    }
}

/// The whitespace-separated field carrying `marker`, with trailing
/// punctuation removed
fn artifact_path(line: &str, marker: &str) -> Option<String> {
    line.split_whitespace()
        .find(|field| field.contains(marker))
        .map(|field| field.trim_end_matches(['.', ',', ';']).to_string())
}

/// Stateful wrapper over [`step`] for one issuance session
#[derive(Debug, Clone)]
pub struct OutputParser {
    state: ParserState,
    challenge_fqdn: String,
    succeeded: bool,
}

impl OutputParser {
    pub fn new(challenge_fqdn: impl Into<String>) -> Self {
        Self {
            state: ParserState::Idle,
            challenge_fqdn: challenge_fqdn.into(),
            succeeded: false,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Feed one output line
    pub fn feed(&mut self, line: &str) -> Option<AgentEvent> {
        let (next, event) = step(self.state, line, &self.challenge_fqdn);
        self.state = next;
        if event == Some(AgentEvent::IssuanceSucceeded) {
            self.succeeded = true;
        }
        event
    }

    /// Output closed: a session that never reported success has failed
    pub fn finish(&self) -> Option<AgentEvent> {
        (!self.succeeded).then_some(AgentEvent::IssuanceFailed)
    }
}
