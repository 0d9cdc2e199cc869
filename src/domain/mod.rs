//! Domain layer - Core types with no runtime behavior of their own
//!
//! This layer contains:
//! - Entities: Commands, checks, listeners and their owner links
//! - Traits: The host abstraction pieces attach to

pub mod entities;
pub mod traits;
