use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use uuid::Uuid;

use super::{Check, CheckChain, Context, Extras, Owned, Owner};
use crate::application::errors::{CommandError, PieceError};

static SLASH_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-_a-z0-9]{1,32}$").expect("valid regex"));

/// The four command namespaces a host keeps apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Prefix,
    Slash,
    User,
    Message,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Prefix,
        CommandKind::Slash,
        CommandKind::User,
        CommandKind::Message,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            CommandKind::Prefix => "prefix",
            CommandKind::Slash => "slash",
            CommandKind::User => "user",
            CommandKind::Message => "message",
        }
    }

    pub fn is_application(&self) -> bool {
        *self != CommandKind::Prefix
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command handler function type
pub type CommandHandler =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<String, CommandError>> + Send + Sync>;

/// Represents a bot command of any kind
#[derive(Clone)]
pub struct Command {
    id: Uuid,
    kind: CommandKind,
    pub name: String,
    pub parent: Option<String>,
    pub description: Option<String>,
    pub aliases: Vec<String>,
    pub usage: Option<String>,
    handler: Option<CommandHandler>,
    pub checks: Vec<Check>,
    pub extras: Extras,
    owner: Owner,
}

impl Command {
    /// A prefix (text) command
    pub fn new(name: impl Into<String>) -> Self {
        Self::of_kind(CommandKind::Prefix, name)
    }

    pub fn slash(name: impl Into<String>) -> Self {
        Self::of_kind(CommandKind::Slash, name)
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self::of_kind(CommandKind::User, name)
    }

    pub fn message(name: impl Into<String>) -> Self {
        Self::of_kind(CommandKind::Message, name)
    }

    pub fn of_kind(kind: CommandKind, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            parent: None,
            description: None,
            aliases: Vec::new(),
            usage: None,
            handler: None,
            checks: Vec::new(),
            extras: Extras::new(),
            owner: Owner::default(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    /// Nest this command under a group, e.g. `config set`
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, CommandError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |ctx| handler(ctx).boxed()));
        self
    }

    /// Identity of this command value. Clones share it; every copy made by
    /// [`Command::with_prepended_checks`] gets a fresh one.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: CommandKind) {
        self.kind = kind;
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Full name including the parent group
    pub fn qualified_name(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{} {}", parent, self.name),
            None => self.name.clone(),
        }
    }

    pub fn matches(&self, input: &str) -> bool {
        let input_lower = input.to_lowercase();
        self.qualified_name().to_lowercase() == input_lower ||
            self.aliases.iter().any(|a| a.to_lowercase() == input_lower)
    }

    /// Ensure the command can be registered: it needs an async handler and a
    /// name its namespace accepts.
    pub fn validate(&self) -> Result<(), PieceError> {
        if self.handler.is_none() {
            return Err(PieceError::NotAsync(self.label()));
        }

        let valid = match self.kind {
            CommandKind::Prefix => {
                !self.name.is_empty() && !self.name.chars().any(char::is_whitespace)
            }
            CommandKind::Slash => SLASH_NAME.is_match(&self.name),
            CommandKind::User | CommandKind::Message => {
                let len = self.name.chars().count();
                (1..=32).contains(&len) && self.name.trim() == self.name
            }
        };

        if !valid {
            return Err(PieceError::InvalidName {
                kind: self.kind,
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Copy of this command whose checks are `checks` followed by its own
    pub fn with_prepended_checks(&self, checks: &[Check]) -> Self {
        let mut bound = self.clone();
        bound.id = Uuid::new_v4();
        if !checks.is_empty() {
            bound.checks = checks.iter().chain(self.checks.iter()).cloned().collect();
        }
        bound
    }

    pub fn check_chain(&self) -> CheckChain {
        CheckChain::new().extend(&self.checks)
    }

    /// Run the command's own checks, then its handler
    pub async fn invoke(&self, ctx: Context) -> Result<String, CommandError> {
        self.check_chain().run(&ctx).await?;
        match &self.handler {
            Some(handler) => handler(ctx).await,
            None => Err(CommandError::ExecutionFailed(format!(
                "Command {} not implemented",
                self.qualified_name()
            ))),
        }
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub(crate) fn claim_owner(&mut self, owner: Weak<dyn Any + Send + Sync>) -> bool {
        self.owner.claim(owner)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind)
            .field("name", &self.qualified_name())
            .field("checks", &self.checks)
            .field("owner", &self.owner)
            .finish()
    }
}

impl Owned for Command {
    fn owner_handle(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.owner.upgrade()
    }

    fn label(&self) -> String {
        format!("{} command `{}`", self.kind, self.qualified_name())
    }
}
