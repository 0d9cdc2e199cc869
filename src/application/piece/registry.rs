//! Registry - registrations a piece holds until it is loaded

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use super::hooks::{Hook, HookPhase};
use super::Piece;
use crate::application::errors::{BoxError, PieceError};
use crate::domain::entities::{Check, Command, CommandKind, Extras, Listener};
use crate::infrastructure::tasks::TaskLoop;

/// The check lists a piece keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    /// Prepended to this piece's prefix commands
    Command,
    SlashCommand,
    UserCommand,
    MessageCommand,
    /// Added to the host for every prefix command
    GlobalCommand,
    /// Added to the host, evaluated once per prefix invocation
    GlobalCommandOnce,
    /// Added to the host for slash, user and message commands
    GlobalApplicationCommand,
    GlobalSlashCommand,
    GlobalUserCommand,
    GlobalMessageCommand,
}

impl CheckKind {
    /// The local check list applied to commands of `kind`
    pub fn local(kind: CommandKind) -> Self {
        match kind {
            CommandKind::Prefix => CheckKind::Command,
            CommandKind::Slash => CheckKind::SlashCommand,
            CommandKind::User => CheckKind::UserCommand,
            CommandKind::Message => CheckKind::MessageCommand,
        }
    }
}

/// Accumulated registrations. Pure bookkeeping, never touches a host.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    prefix_commands: IndexMap<String, Command>,
    slash_commands: IndexMap<String, Command>,
    user_commands: IndexMap<String, Command>,
    message_commands: IndexMap<String, Command>,
    checks: HashMap<CheckKind, Vec<Check>>,
    listeners: IndexMap<String, Vec<Listener>>,
    loops: Vec<TaskLoop>,
    hooks: HashMap<HookPhase, Vec<Hook>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self, kind: CommandKind) -> &IndexMap<String, Command> {
        match kind {
            CommandKind::Prefix => &self.prefix_commands,
            CommandKind::Slash => &self.slash_commands,
            CommandKind::User => &self.user_commands,
            CommandKind::Message => &self.message_commands,
        }
    }

    fn commands_mut(&mut self, kind: CommandKind) -> &mut IndexMap<String, Command> {
        match kind {
            CommandKind::Prefix => &mut self.prefix_commands,
            CommandKind::Slash => &mut self.slash_commands,
            CommandKind::User => &mut self.user_commands,
            CommandKind::Message => &mut self.message_commands,
        }
    }

    /// Insert by qualified name. An existing entry keeps its position and is
    /// returned.
    pub fn insert_command(&mut self, command: Command) -> Option<Command> {
        self.commands_mut(command.kind())
            .insert(command.qualified_name(), command)
    }

    pub fn checks(&self, kind: CheckKind) -> &[Check] {
        self.checks.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add_check(&mut self, kind: CheckKind, check: Check) {
        self.checks.entry(kind).or_default().push(check);
    }

    pub fn listeners(&self) -> &IndexMap<String, Vec<Listener>> {
        &self.listeners
    }

    pub fn add_listener(&mut self, event: impl Into<String>, listener: Listener) {
        self.listeners.entry(event.into()).or_default().push(listener);
    }

    pub fn loops(&self) -> &[TaskLoop] {
        &self.loops
    }

    pub fn add_loop(&mut self, task_loop: TaskLoop) {
        self.loops.push(task_loop);
    }

    pub fn hooks(&self, phase: HookPhase) -> &[Hook] {
        self.hooks.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add_hook(&mut self, phase: HookPhase, hook: Hook) {
        self.hooks.entry(phase).or_default().push(hook);
    }
}

// Registrars. Each returns what it registered so calls can be chained or the
// entry kept around for later lookups.
impl Piece {
    fn stamp_extras(&self, extras: &mut Extras) {
        extras
            .entry("piece".to_string())
            .or_insert_with(|| serde_json::Value::String(self.name().to_string()));
        extras
            .entry("metadata".to_string())
            .or_insert_with(|| {
                serde_json::to_value(self.metadata()).unwrap_or(serde_json::Value::Null)
            });
    }

    /// Register `command` in the `kind` namespace, replacing any command with
    /// the same qualified name.
    pub fn register_command(
        &self,
        kind: CommandKind,
        mut command: Command,
    ) -> Result<Command, PieceError> {
        command.set_kind(kind);
        command.validate()?;
        command.claim_owner(self.downgrade());
        self.stamp_extras(&mut command.extras);

        let name = command.qualified_name();
        if self.registry().insert_command(command.clone()).is_some() {
            tracing::debug!(piece = %self.name(), %kind, command = %name, "Replaced command");
        }
        Ok(command)
    }

    pub fn command(&self, command: Command) -> Result<Command, PieceError> {
        self.register_command(CommandKind::Prefix, command)
    }

    pub fn slash_command(&self, command: Command) -> Result<Command, PieceError> {
        self.register_command(CommandKind::Slash, command)
    }

    pub fn user_command(&self, command: Command) -> Result<Command, PieceError> {
        self.register_command(CommandKind::User, command)
    }

    pub fn message_command(&self, command: Command) -> Result<Command, PieceError> {
        self.register_command(CommandKind::Message, command)
    }

    /// Register a listener under `event`, or under its own name if `None`
    pub fn add_listener(&self, event: Option<&str>, mut listener: Listener) -> Listener {
        listener.claim_owner(self.downgrade());
        self.stamp_extras(&mut listener.extras);

        let event = event.unwrap_or(listener.name()).to_string();
        self.registry().add_listener(event, listener.clone());
        listener
    }

    pub fn add_listeners(
        &self,
        event: Option<&str>,
        listeners: impl IntoIterator<Item = Listener>,
    ) -> Vec<Listener> {
        listeners
            .into_iter()
            .map(|listener| self.add_listener(event, listener))
            .collect()
    }

    /// Build and register a listener for `event`
    pub fn listener<F, Fut>(&self, event: &str, callback: F) -> Listener
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_listener(Some(event), Listener::new(event, callback))
    }

    /// Register a loop to start on load and stop on unload.
    ///
    /// With `wait_until_ready` a guard is installed that holds the first
    /// iteration until the attached host is ready. Fails with
    /// `DuplicateGuard`, leaving the loop unregistered, if it already has one.
    pub fn register_loop(
        &self,
        task_loop: TaskLoop,
        wait_until_ready: bool,
    ) -> Result<TaskLoop, PieceError> {
        if wait_until_ready {
            let piece = Arc::downgrade(&self.inner);
            task_loop.set_before_loop(move || {
                let piece = piece.clone();
                async move {
                    let dropped = || BoxError::from("piece dropped before its loop started");
                    let piece = Piece::from_weak(&piece).ok_or_else(dropped)?;
                    piece.host()?.wait_until_ready().await;
                    Ok::<(), BoxError>(())
                }
            })?;
        }

        task_loop.claim_owner(self.downgrade());
        self.registry().add_loop(task_loop.clone());
        Ok(task_loop)
    }

    /// Build a loop and register it with a ready guard
    pub fn create_loop<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        body: F,
    ) -> Result<TaskLoop, PieceError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.register_loop(TaskLoop::new(name, interval, body), true)
    }

    pub fn add_check(&self, kind: CheckKind, check: Check) -> Check {
        self.registry().add_check(kind, check.clone());
        check
    }

    /// Add a check to all prefix commands in this piece
    pub fn command_check(&self, check: Check) -> Check {
        self.add_check(CheckKind::Command, check)
    }

    /// Add a check to all slash commands in this piece
    pub fn slash_command_check(&self, check: Check) -> Check {
        self.add_check(CheckKind::SlashCommand, check)
    }

    /// Add a check to all user commands in this piece
    pub fn user_command_check(&self, check: Check) -> Check {
        self.add_check(CheckKind::UserCommand, check)
    }

    /// Add a check to all message commands in this piece
    pub fn message_command_check(&self, check: Check) -> Check {
        self.add_check(CheckKind::MessageCommand, check)
    }

    pub fn global_command_check(&self, check: Check) -> Check {
        self.add_check(CheckKind::GlobalCommand, check)
    }

    pub fn global_command_check_once(&self, check: Check) -> Check {
        self.add_check(CheckKind::GlobalCommandOnce, check)
    }

    /// Add a host check covering slash, user and message commands at once
    pub fn global_application_command_check(&self, check: Check) -> Check {
        self.add_check(CheckKind::GlobalApplicationCommand, check)
    }

    pub fn global_slash_command_check(&self, check: Check) -> Check {
        self.add_check(CheckKind::GlobalSlashCommand, check)
    }

    pub fn global_user_command_check(&self, check: Check) -> Check {
        self.add_check(CheckKind::GlobalUserCommand, check)
    }

    pub fn global_message_command_check(&self, check: Check) -> Check {
        self.add_check(CheckKind::GlobalMessageCommand, check)
    }

    /// Add a pre-load (or post-load) hook
    pub fn load_hook(&self, post: bool, hook: Hook) -> Hook {
        self.registry().add_hook(HookPhase::load(post), hook.clone());
        hook
    }

    /// Add a pre-unload (or post-unload) hook
    pub fn unload_hook(&self, post: bool, hook: Hook) -> Hook {
        self.registry().add_hook(HookPhase::unload(post), hook.clone());
        hook
    }
}
