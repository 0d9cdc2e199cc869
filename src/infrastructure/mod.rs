//! Infrastructure layer - Runtime concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Adapters: Host implementations
//! - Tasks: Background loops on the tokio runtime

pub mod adapters;
pub mod config;
pub mod tasks;
