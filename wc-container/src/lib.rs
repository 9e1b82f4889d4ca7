//! Disposable Docker containers for running the issuance agent, and
//! extraction of files copied out of them.

pub mod archive;
pub mod client;

pub use archive::extract_single_file;
pub use client::{short_id, AttachedContainer, DockerClient};
