//! carik-pieces - attachable bundles of bot commands, listeners, loops and checks
//!
//! A [`Piece`] collects registrations up front and moves them onto any
//! [`Host`] in one `load` call, then removes them again with `unload`.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::errors::{BoxError, CommandError, HostError, PieceError};
pub use application::piece::{
    owner_of, CheckKind, Hook, HookPhase, Piece, PieceBuilder, PieceMetadata,
};
pub use domain::entities::{
    Check, CheckScope, Command, CommandKind, Context, Extras, Listener, Owned,
};
pub use domain::traits::Host;
pub use infrastructure::adapters::console::ConsoleHost;
pub use infrastructure::tasks::TaskLoop;
