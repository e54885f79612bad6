//! Update Engine Library
//!
//! Self-update engine for desktop applications: compares the installed build
//! against a manifest published on mirrors, downloads and verifies the files
//! that differ, and hands the staged payload to a second-stage process that
//! replaces the installed files once the application has exited.

pub mod codec;
pub mod config;
pub mod downloader;
pub mod fs;
pub mod handoff;
pub mod instance;
pub mod manifest;
pub mod mirror;
pub mod orchestrator;
pub mod planner;
pub mod publish;
pub mod transfer;
pub mod utils;
pub mod verifier;

// Re-export commonly used types
pub use config::Config;
pub use orchestrator::{BuildState, HandoffLauncher, ProcessLauncher, UpdateEvent, UpdateOutcome, Updater};
pub use utils::errors::{TransportError, UpdateError};
pub type Result<T> = std::result::Result<T, UpdateError>;
