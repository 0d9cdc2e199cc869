//! Load and unload - transferring a piece's registrations to and from a host

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use super::hooks::{run_hooks, HookPhase};
use super::registry::{CheckKind, Registry};
use super::Piece;
use crate::application::errors::PieceError;
use crate::domain::entities::{Check, CheckScope, CommandKind};
use crate::domain::traits::Host;

// Global checks installed after each command namespace, in load order
const GLOBAL_APPLICATION_CHECKS: [(CommandKind, CheckKind, CheckScope); 3] = [
    (CommandKind::Slash, CheckKind::GlobalSlashCommand, CheckScope::Slash),
    (CommandKind::User, CheckKind::GlobalUserCommand, CheckScope::User),
    (CommandKind::Message, CheckKind::GlobalMessageCommand, CheckScope::Message),
];

/// Identifies a host by the address of its shared allocation
pub(crate) type HostKey = usize;

pub(crate) fn host_key(host: &Arc<dyn Host>) -> HostKey {
    Arc::as_ptr(host) as *const () as usize
}

/// One entry a load put on a host. Unload takes back exactly these.
#[derive(Debug, Clone)]
pub(crate) enum Attachment {
    Command {
        kind: CommandKind,
        name: String,
        id: Uuid,
    },
    Check {
        id: Uuid,
        name: String,
        scope: CheckScope,
        call_once: bool,
    },
    Listener {
        id: Uuid,
        name: String,
        event: String,
    },
}

impl Piece {
    /// Register commands, checks, listeners and loops on `host`, running the
    /// load hooks around the transfer.
    ///
    /// Nothing is rolled back on failure: whatever was attached before the
    /// error stays on the host until [`Piece::unload`] is called.
    pub async fn load(&self, host: Arc<dyn Host>) -> Result<(), PieceError> {
        let span = tracing::info_span!(
            "load",
            piece = %self.name(),
            logger = %self.logger(),
            host = %host.name(),
        );
        self.load_onto(host).instrument(span).await
    }

    async fn load_onto(&self, host: Arc<dyn Host>) -> Result<(), PieceError> {
        self.attach_host(host.clone());
        let registry = self.snapshot();
        let key = host_key(&host);
        let host = host.as_ref();

        run_hooks(HookPhase::PreLoad, registry.hooks(HookPhase::PreLoad)).await?;

        // Record whatever made it onto the host, even if the transfer stops
        // half way, so a later unload can clean it up.
        let mut attached = Vec::new();
        let transfer = attach_all(host, &registry, &mut attached);
        self.attachments().entry(key).or_default().extend(attached);
        transfer?;

        for task_loop in registry.loops() {
            task_loop.start()?;
        }

        run_hooks(HookPhase::PostLoad, registry.hooks(HookPhase::PostLoad)).await?;

        host.schedule_command_sync();

        tracing::info!("Successfully loaded piece `{}`", self.name());
        Ok(())
    }

    /// Remove what the last loads onto `host` attached, stop loops, and run
    /// the unload hooks around it. The attached host is kept.
    ///
    /// Only entries this piece put on `host` are touched, so unloading after
    /// a partial load is safe and a second unload is a no-op.
    pub async fn unload(&self, host: Arc<dyn Host>) -> Result<(), PieceError> {
        let span = tracing::info_span!(
            "unload",
            piece = %self.name(),
            logger = %self.logger(),
            host = %host.name(),
        );
        self.unload_from(host).instrument(span).await
    }

    async fn unload_from(&self, host: Arc<dyn Host>) -> Result<(), PieceError> {
        let registry = self.snapshot();
        let key = host_key(&host);
        let host = host.as_ref();

        run_hooks(HookPhase::PreUnload, registry.hooks(HookPhase::PreUnload)).await?;

        let attached = self.attachments().remove(&key).unwrap_or_default();
        for attachment in attached {
            detach(host, attachment);
        }

        for task_loop in registry.loops() {
            task_loop.cancel();
        }

        run_hooks(HookPhase::PostUnload, registry.hooks(HookPhase::PostUnload)).await?;

        host.schedule_command_sync();

        tracing::info!("Successfully unloaded piece `{}`", self.name());
        Ok(())
    }
}

fn attach_all(
    host: &dyn Host,
    registry: &Registry,
    attached: &mut Vec<Attachment>,
) -> Result<(), PieceError> {
    attach_commands(host, registry, CommandKind::Prefix, attached)?;
    let prefix = registry.checks(CheckKind::GlobalCommand);
    attach_checks(host, prefix, CheckScope::Prefix, false, attached)?;
    let prefix_once = registry.checks(CheckKind::GlobalCommandOnce);
    attach_checks(host, prefix_once, CheckScope::Prefix, true, attached)?;

    attach_checks(
        host,
        registry.checks(CheckKind::GlobalApplicationCommand),
        CheckScope::Application,
        false,
        attached,
    )?;

    for (kind, global, scope) in GLOBAL_APPLICATION_CHECKS {
        attach_commands(host, registry, kind, attached)?;
        attach_checks(host, registry.checks(global), scope, false, attached)?;
    }

    for (event, listeners) in registry.listeners() {
        for listener in listeners {
            tracing::debug!(%event, listener = %listener.name(), "Attaching listener");
            host.add_listener(listener.clone(), event)?;
            attached.push(Attachment::Listener {
                id: listener.id(),
                name: listener.name().to_string(),
                event: event.clone(),
            });
        }
    }
    Ok(())
}

fn attach_commands(
    host: &dyn Host,
    registry: &Registry,
    kind: CommandKind,
    attached: &mut Vec<Attachment>,
) -> Result<(), PieceError> {
    let checks = registry.checks(CheckKind::local(kind));
    for command in registry.commands(kind).values() {
        let name = command.qualified_name();
        tracing::debug!(%kind, command = %name, "Attaching command");
        let bound = command.with_prepended_checks(checks);
        let id = bound.id();
        host.add_command(bound)?;
        attached.push(Attachment::Command { kind, name, id });
    }
    Ok(())
}

fn attach_checks(
    host: &dyn Host,
    checks: &[Check],
    scope: CheckScope,
    call_once: bool,
    attached: &mut Vec<Attachment>,
) -> Result<(), PieceError> {
    for check in checks {
        tracing::debug!(
            scope = %scope.as_str(),
            call_once,
            check = %check.name(),
            "Attaching check"
        );
        host.add_check(check.clone(), scope, call_once)?;
        attached.push(Attachment::Check {
            id: check.id(),
            name: check.name().to_string(),
            scope,
            call_once,
        });
    }
    Ok(())
}

fn detach(host: &dyn Host, attachment: Attachment) {
    match attachment {
        // A command replaced on the host since load is no longer ours
        Attachment::Command { kind, name, id } => match host.command(kind, &name) {
            Some(existing) if existing.id() == id => {
                host.remove_command(kind, &name);
                tracing::debug!(%kind, command = %name, "Detached command");
            }
            Some(_) => {
                tracing::warn!(%kind, command = %name, "Command replaced on host, skipping");
            }
            None => {}
        },
        Attachment::Check {
            id,
            name,
            scope,
            call_once,
        } => {
            if host.remove_check(id, scope, call_once) {
                tracing::debug!(
                    scope = %scope.as_str(),
                    call_once,
                    check = %name,
                    "Detached check"
                );
            }
        }
        Attachment::Listener { id, name, event } => {
            if host.remove_listener(id, &event) {
                tracing::debug!(%event, listener = %name, "Detached listener");
            }
        }
    }
}
