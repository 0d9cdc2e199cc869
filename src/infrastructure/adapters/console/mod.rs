//! Console host - in-memory host for local development and testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::application::errors::{CommandError, HostError};
use crate::domain::entities::{
    Check, CheckChain, CheckScope, Command, CommandKind, Context, Listener,
};
use crate::domain::traits::Host;

struct HostCheck {
    check: Check,
    scope: CheckScope,
    call_once: bool,
}

#[derive(Default)]
struct Tables {
    commands: HashMap<CommandKind, IndexMap<String, Command>>,
    checks: Vec<HostCheck>,
    listeners: IndexMap<String, Vec<Listener>>,
}

/// Sorted view of everything attached to a [`ConsoleHost`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSnapshot {
    pub commands: Vec<String>,
    pub checks: Vec<String>,
    pub listeners: Vec<String>,
}

impl HostSnapshot {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.checks.is_empty() && self.listeners.is_empty()
    }
}

/// In-memory host. Keeps command, check and listener tables, evaluates checks
/// on invocation and dispatches events to listeners.
pub struct ConsoleHost {
    name: String,
    tables: RwLock<Tables>,
    ready: watch::Sender<bool>,
    sync_pending: AtomicBool,
    sync_requests: AtomicUsize,
    syncs: AtomicUsize,
}

impl ConsoleHost {
    pub fn new(name: impl Into<String>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            name: name.into(),
            tables: RwLock::new(Tables::default()),
            ready,
            sync_pending: AtomicBool::new(false),
            sync_requests: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the host ready, releasing everything in `wait_until_ready`
    pub fn set_ready(&self) {
        self.ready.send_replace(true);
        tracing::info!(host = %self.name, "Host ready");
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Number of sync requests received, coalesced or not
    pub fn sync_requests(&self) -> usize {
        self.sync_requests.load(Ordering::SeqCst)
    }

    /// Number of syncs actually performed
    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn sync_pending(&self) -> bool {
        self.sync_pending.load(Ordering::SeqCst)
    }

    /// Perform the pending sync, if any. Returns true if a sync ran.
    pub fn flush_command_sync(&self) -> bool {
        if !self.sync_pending.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.syncs.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.snapshot();
        tracing::info!(host = %self.name, commands = snapshot.commands.len(), "Synced commands");
        true
    }

    pub fn command_names(&self, kind: CommandKind) -> Vec<String> {
        self.read()
            .commands
            .get(&kind)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.read().listeners.get(event).map(Vec::len).unwrap_or(0)
    }

    pub fn check_count(&self, scope: CheckScope) -> usize {
        self.read().checks.iter().filter(|c| c.scope == scope).count()
    }

    pub fn snapshot(&self) -> HostSnapshot {
        let tables = self.read();

        let mut commands: Vec<String> = tables
            .commands
            .iter()
            .flat_map(|(kind, table)| table.keys().map(move |name| format!("{}:{}", kind, name)))
            .collect();
        commands.sort();

        let mut checks: Vec<String> = tables
            .checks
            .iter()
            .map(|c| format!("{}:{}:{}", c.scope.as_str(), c.call_once, c.check.id()))
            .collect();
        checks.sort();

        let mut listeners: Vec<String> = tables
            .listeners
            .iter()
            .flat_map(|(event, list)| list.iter().map(move |l| format!("{}:{}", event, l.id())))
            .collect();
        listeners.sort();

        HostSnapshot { commands, checks, listeners }
    }

    /// Run a command through host checks, its own checks and its handler.
    ///
    /// Prefix commands evaluate call-once checks first, then global prefix
    /// checks. Application commands evaluate every check whose scope covers
    /// their kind, in the order the checks were added.
    pub async fn invoke(
        &self,
        kind: CommandKind,
        name: &str,
        ctx: Context,
    ) -> Result<String, CommandError> {
        let (command, host_checks) = {
            let tables = self.read();
            let command = tables
                .commands
                .get(&kind)
                .and_then(|table| {
                    table
                        .get(name)
                        .or_else(|| table.values().find(|c| c.matches(name)))
                })
                .cloned()
                .ok_or_else(|| CommandError::NotFound(name.to_string()))?;

            let covering = tables.checks.iter().filter(|c| c.scope.covers(kind));
            let chain = CheckChain::new()
                .extend(covering.clone().filter(|c| c.call_once).map(|c| &c.check))
                .extend(covering.filter(|c| !c.call_once).map(|c| &c.check));
            (command, chain)
        };

        host_checks.run(&ctx).await?;
        command.invoke(ctx).await
    }

    /// Invoke a prefix command from a raw line such as `!echo hi`
    pub async fn handle_line(
        &self,
        prefix: &str,
        line: &str,
        ctx: Context,
    ) -> Option<Result<String, CommandError>> {
        let text = line.trim().strip_prefix(prefix)?;
        let mut parts = text.split_whitespace();
        let name = parts.next()?.to_string();
        let ctx = Context {
            command: name.clone(),
            kind: CommandKind::Prefix,
            args: parts.map(str::to_string).collect(),
            ..ctx
        };
        Some(self.invoke(CommandKind::Prefix, &name, ctx).await)
    }

    /// Call every listener of `event` concurrently. Returns how many ran.
    pub async fn dispatch(&self, event: &str, payload: serde_json::Value) -> usize {
        let listeners = self.read().listeners.get(event).cloned().unwrap_or_default();
        let count = listeners.len();
        join_all(listeners.iter().map(|l| l.call(payload.clone()))).await;
        tracing::debug!(host = %self.name, %event, count, "Dispatched event");
        count
    }
}

impl Default for ConsoleHost {
    fn default() -> Self {
        Self::new("console")
    }
}

#[async_trait]
impl Host for ConsoleHost {
    fn add_command(&self, command: Command) -> Result<(), HostError> {
        let kind = command.kind();
        let name = command.qualified_name();
        let mut tables = self.write();
        let table = tables.commands.entry(kind).or_default();
        if table.contains_key(&name) {
            return Err(HostError::DuplicateCommand { kind, name });
        }
        table.insert(name, command);
        Ok(())
    }

    fn command(&self, kind: CommandKind, name: &str) -> Option<Command> {
        self.read().commands.get(&kind)?.get(name).cloned()
    }

    fn remove_command(&self, kind: CommandKind, name: &str) -> Option<Command> {
        self.write().commands.get_mut(&kind)?.shift_remove(name)
    }

    fn add_check(&self, check: Check, scope: CheckScope, call_once: bool) -> Result<(), HostError> {
        if call_once && scope != CheckScope::Prefix {
            return Err(HostError::UnsupportedScope);
        }
        let mut tables = self.write();
        let duplicate = tables
            .checks
            .iter()
            .any(|c| c.check == check && c.scope == scope && c.call_once == call_once);
        if duplicate {
            return Err(HostError::DuplicateCheck(check.name().to_string()));
        }
        tables.checks.push(HostCheck { check, scope, call_once });
        Ok(())
    }

    fn remove_check(&self, check_id: Uuid, scope: CheckScope, call_once: bool) -> bool {
        let mut tables = self.write();
        let before = tables.checks.len();
        tables.checks.retain(|c| {
            !(c.check.id() == check_id && c.scope == scope && c.call_once == call_once)
        });
        tables.checks.len() != before
    }

    fn add_listener(&self, listener: Listener, event: &str) -> Result<(), HostError> {
        self.write()
            .listeners
            .entry(event.to_string())
            .or_default()
            .push(listener);
        Ok(())
    }

    fn remove_listener(&self, listener_id: Uuid, event: &str) -> bool {
        let mut tables = self.write();
        let Some(list) = tables.listeners.get_mut(event) else {
            return false;
        };
        let Some(index) = list.iter().position(|l| l.id() == listener_id) else {
            return false;
        };
        list.remove(index);
        if list.is_empty() {
            tables.listeners.shift_remove(event);
        }
        true
    }

    fn schedule_command_sync(&self) {
        self.sync_requests.fetch_add(1, Ordering::SeqCst);
        if !self.sync_pending.swap(true, Ordering::SeqCst) {
            tracing::debug!(host = %self.name, "Command sync scheduled");
        }
    }

    async fn wait_until_ready(&self) {
        let mut ready = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        if ready.wait_for(|ready| *ready).await.is_err() {
            tracing::warn!(host = %self.name, "Readiness channel closed");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
