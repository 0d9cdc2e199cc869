//! Load and unload hooks

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;

use crate::application::errors::{BoxError, PieceError};

/// Hook callback type
pub type HookFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// When a hook runs relative to the host transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    PreLoad,
    PostLoad,
    PreUnload,
    PostUnload,
}

impl HookPhase {
    pub fn load(post: bool) -> Self {
        if post {
            HookPhase::PostLoad
        } else {
            HookPhase::PreLoad
        }
    }

    pub fn unload(post: bool) -> Self {
        if post {
            HookPhase::PostUnload
        } else {
            HookPhase::PreUnload
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HookPhase::PreLoad => "pre-load",
            HookPhase::PostLoad => "post-load",
            HookPhase::PreUnload => "pre-unload",
            HookPhase::PostUnload => "post-unload",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A zero-argument async callable run around load/unload
#[derive(Clone)]
pub struct Hook {
    name: String,
    callback: HookFn,
}

impl Hook {
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(move || callback().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self) -> BoxFuture<'static, Result<(), BoxError>> {
        (self.callback)()
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("name", &self.name).finish()
    }
}

/// Run every hook of a phase concurrently.
///
/// Returns as soon as one hook fails; hooks still in flight at that point are
/// dropped and never resumed.
pub(crate) async fn run_hooks(phase: HookPhase, hooks: &[Hook]) -> Result<(), PieceError> {
    if hooks.is_empty() {
        return Ok(());
    }

    tracing::debug!(%phase, count = hooks.len(), "Running hooks");
    try_join_all(hooks.iter().map(Hook::call))
        .await
        .map(|_| ())
        .map_err(|source| PieceError::Hook { phase, source })
}
