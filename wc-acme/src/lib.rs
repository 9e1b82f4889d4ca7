//! Wildcard certificate issuance through certbot's manual DNS-01 flow
//!
//! certbot runs interactively inside a throwaway container. Its text output
//! is turned into events by [`parser::OutputParser`], and the
//! [`ChallengeCoordinator`] publishes each requested challenge token as a TXT
//! record through a [`wc_dns::Registrar`] before letting certbot continue.

mod certbot;
mod coordinator;
pub mod parser;
pub mod session;
pub mod types;

pub use certbot::{CertbotEnvironment, CertbotOptions};
pub use coordinator::{
    BatchMode, BatchReport, ChallengeCoordinator, ChallengeSession, IssueOptions, IssueReport,
    EXPECTED_CHALLENGES,
};
pub use parser::{AgentEvent, OutputParser, ParserState};
pub use session::{AttachedAgent, Environment, IssuanceSession, SessionOutcome};
pub use types::{AcmeError, AcmeResult, ArtifactKind, ResolvedTarget, Target};
