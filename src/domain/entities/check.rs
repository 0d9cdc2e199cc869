//! Checks - async predicates gating command invocation

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use uuid::Uuid;

use super::{CommandKind, Context};
use crate::application::errors::CommandError;

/// Predicate function type
pub type CheckFn = Arc<dyn Fn(Context) -> BoxFuture<'static, bool> + Send + Sync>;

/// A named predicate. Identity is the generated id, so two checks built from
/// the same closure are still distinct registrations.
#[derive(Clone)]
pub struct Check {
    id: Uuid,
    name: String,
    predicate: CheckFn,
}

impl Check {
    pub fn new<F, Fut>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            predicate: Arc::new(move |ctx| predicate(ctx).boxed()),
        }
    }

    /// Build a check from a plain synchronous predicate
    pub fn sync<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Self::new(name, move |ctx: Context| {
            let predicate = predicate.clone();
            async move { predicate(&ctx) }
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn evaluate(&self, ctx: &Context) -> bool {
        (self.predicate)(ctx.clone()).await
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl PartialEq for Check {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Check {}

/// Where a host-level check applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckScope {
    Prefix,
    Slash,
    User,
    Message,
    /// Slash, user and message commands at once
    Application,
}

impl CheckScope {
    pub fn covers(&self, kind: CommandKind) -> bool {
        match self {
            CheckScope::Prefix => kind == CommandKind::Prefix,
            CheckScope::Slash => kind == CommandKind::Slash,
            CheckScope::User => kind == CommandKind::User,
            CheckScope::Message => kind == CommandKind::Message,
            CheckScope::Application => kind.is_application(),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CheckScope::Prefix => "prefix",
            CheckScope::Slash => "slash",
            CheckScope::User => "user",
            CheckScope::Message => "message",
            CheckScope::Application => "application",
        }
    }
}

/// Ordered list of checks evaluated one after another.
///
/// Evaluation stops at the first failing check; later checks never run.
#[derive(Debug, Clone, Default)]
pub struct CheckChain {
    checks: Vec<Check>,
}

impl CheckChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend<'a>(mut self, checks: impl IntoIterator<Item = &'a Check>) -> Self {
        self.checks.extend(checks.into_iter().cloned());
        self
    }

    pub async fn run(&self, ctx: &Context) -> Result<(), CommandError> {
        for check in &self.checks {
            if !check.evaluate(ctx).await {
                tracing::debug!(check = %check.name(), command = %ctx.command, "Check failed");
                return Err(CommandError::CheckFailed(check.name().to_string()));
            }
        }
        Ok(())
    }
}
