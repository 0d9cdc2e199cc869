use async_trait::async_trait;
use uuid::Uuid;

use crate::application::errors::HostError;
use crate::domain::entities::{Check, CheckScope, Command, CommandKind, Listener};

/// Host trait - the runtime a piece attaches its registrations to.
///
/// Every mutation is synchronous. Removals report whether anything was
/// removed and never fail, so detaching something that was never attached is
/// a no-op.
#[async_trait]
pub trait Host: Send + Sync {
    /// Add a command to the table matching `command.kind()`
    fn add_command(&self, command: Command) -> Result<(), HostError>;

    /// Look up a command by qualified name
    fn command(&self, kind: CommandKind, name: &str) -> Option<Command>;

    /// Remove a command by qualified name
    fn remove_command(&self, kind: CommandKind, name: &str) -> Option<Command>;

    /// Add a host-wide check. `call_once` is only meaningful for prefix scope.
    fn add_check(&self, check: Check, scope: CheckScope, call_once: bool) -> Result<(), HostError>;

    fn remove_check(&self, check_id: Uuid, scope: CheckScope, call_once: bool) -> bool;

    fn add_listener(&self, listener: Listener, event: &str) -> Result<(), HostError>;

    fn remove_listener(&self, listener_id: Uuid, event: &str) -> bool;

    /// Request a sync of the externally visible command surface.
    /// Repeated requests before the sync runs are coalesced.
    fn schedule_command_sync(&self);

    /// Resolve once the host is ready
    async fn wait_until_ready(&self);

    /// Host name for logging
    fn name(&self) -> &str;
}
