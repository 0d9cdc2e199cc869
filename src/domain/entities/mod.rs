//! Domain entities - Commands, checks and listeners a piece registers

pub mod check;
pub mod command;
pub mod context;
pub mod listener;
pub mod owner;

pub use check::{Check, CheckChain, CheckScope};
pub use command::{Command, CommandHandler, CommandKind};
pub use context::Context;
pub use listener::Listener;
pub use owner::{Extras, Owned, Owner};
