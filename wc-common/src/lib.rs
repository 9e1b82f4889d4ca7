//! Shared configuration and error types for wildcert.

pub mod config;
pub mod error;

pub use config::EnvConfig;
pub use error::AppError;
