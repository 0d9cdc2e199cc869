//! Application layer - Piece registration and lifecycle
//!
//! This layer contains:
//! - Piece: Registry, load/unload engine, hooks
//! - Errors: Piece, host, command and config errors

pub mod errors;
pub mod piece;
