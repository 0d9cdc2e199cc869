//! Domain traits - Abstractions for infrastructure implementations

pub mod host;

pub use host::Host;
