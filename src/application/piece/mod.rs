//! Pieces - bundles of commands, listeners, loops and checks that attach to
//! and detach from a host as a unit
//!
//! A piece is populated through its registrars, then transferred to a host
//! with [`Piece::load`] and taken back off with [`Piece::unload`].

pub mod hooks;
pub mod lifecycle;
pub mod registry;

pub use hooks::{Hook, HookPhase};
pub use registry::{CheckKind, Registry};

use lifecycle::{Attachment, HostKey};

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::application::errors::PieceError;
use crate::domain::entities::{Command, CommandKind, Extras, Owned};
use crate::domain::traits::Host;
use crate::infrastructure::tasks::TaskLoop;

/// Logger name used when a piece is built without one
pub const DEFAULT_LOGGER: &str = "carik_pieces::piece";

/// Represents metadata for a piece
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceMetadata {
    pub name: String,
    #[serde(default)]
    pub extras: Extras,
}

impl PieceMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extras: Extras::new(),
        }
    }
}

pub(crate) struct PieceInner {
    name: String,
    logger: String,
    extras: RwLock<Extras>,
    registry: Mutex<Registry>,
    host: RwLock<Option<Arc<dyn Host>>>,
    attached: Mutex<HashMap<HostKey, Vec<Attachment>>>,
}

/// Shared handle to a piece. Clones refer to the same piece.
#[derive(Clone)]
pub struct Piece {
    inner: Arc<PieceInner>,
}

/// Setup or teardown function returned by [`Piece::extension_handlers`]
pub type ExtensionHandler =
    Box<dyn Fn(Arc<dyn Host>) -> JoinHandle<Result<(), PieceError>> + Send + Sync>;

impl Piece {
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> PieceBuilder {
        PieceBuilder {
            name: name.into(),
            logger: None,
            extras: Extras::new(),
        }
    }

    /// Create a piece from pre-built metadata
    pub fn with_metadata(metadata: PieceMetadata) -> Self {
        Self::builder(metadata.name).extras(metadata.extras).build()
    }

    pub(crate) fn from_weak(weak: &Weak<PieceInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<dyn Any + Send + Sync> {
        let strong: Arc<dyn Any + Send + Sync> = self.inner.clone();
        Arc::downgrade(&strong)
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// What each host currently holds from this piece, in attach order
    pub(crate) fn attachments(&self) -> MutexGuard<'_, HashMap<HostKey, Vec<Attachment>>> {
        self.inner.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current registrations
    pub fn snapshot(&self) -> Registry {
        self.registry().clone()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn logger(&self) -> &str {
        &self.inner.logger
    }

    pub fn metadata(&self) -> PieceMetadata {
        PieceMetadata {
            name: self.inner.name.clone(),
            extras: self.extras(),
        }
    }

    pub fn extras(&self) -> Extras {
        self.inner
            .extras
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_extras(&self, extras: Extras) {
        *self.inner.extras.write().unwrap_or_else(PoisonError::into_inner) = extras;
    }

    /// Mutate extras in place under the write lock
    pub fn update_extras<R>(&self, f: impl FnOnce(&mut Extras) -> R) -> R {
        let mut extras = self.inner.extras.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut extras)
    }

    /// The host this piece was last loaded onto
    pub fn host(&self) -> Result<Arc<dyn Host>, PieceError> {
        self.inner
            .host
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| PieceError::NotAttached(self.inner.name.clone()))
    }

    pub fn is_attached(&self) -> bool {
        self.host().is_ok()
    }

    pub(crate) fn attach_host(&self, host: Arc<dyn Host>) {
        *self.inner.host.write().unwrap_or_else(PoisonError::into_inner) = Some(host);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands_of(CommandKind::Prefix)
    }

    pub fn slash_commands(&self) -> Vec<Command> {
        self.commands_of(CommandKind::Slash)
    }

    pub fn user_commands(&self) -> Vec<Command> {
        self.commands_of(CommandKind::User)
    }

    pub fn message_commands(&self) -> Vec<Command> {
        self.commands_of(CommandKind::Message)
    }

    pub fn commands_of(&self, kind: CommandKind) -> Vec<Command> {
        self.registry().commands(kind).values().cloned().collect()
    }

    pub fn loops(&self) -> Vec<TaskLoop> {
        self.registry().loops().to_vec()
    }

    /// Whether `entry` was registered by this piece
    pub fn owns(&self, entry: &impl Owned) -> bool {
        owner_of(entry).is_ok_and(|owner| owner == *self)
    }

    /// Setup and teardown functions that spawn [`Piece::load`] and
    /// [`Piece::unload`] on the current tokio runtime.
    pub fn extension_handlers(&self) -> (ExtensionHandler, ExtensionHandler) {
        let piece = self.clone();
        let setup: ExtensionHandler = Box::new(move |host| {
            let piece = piece.clone();
            tokio::spawn(async move { piece.load(host).await })
        });

        let piece = self.clone();
        let teardown: ExtensionHandler = Box::new(move |host| {
            let piece = piece.clone();
            tokio::spawn(async move { piece.unload(host).await })
        });

        (setup, teardown)
    }
}

impl PartialEq for Piece {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Piece {}

impl fmt::Debug for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Piece")
            .field("name", &self.inner.name)
            .field("logger", &self.inner.logger)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Builder for [`Piece`]
#[derive(Debug)]
pub struct PieceBuilder {
    name: String,
    logger: Option<String>,
    extras: Extras,
}

impl PieceBuilder {
    pub fn logger(mut self, logger: impl Into<String>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    pub fn extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Piece {
        Piece {
            inner: Arc::new(PieceInner {
                name: self.name,
                logger: self.logger.unwrap_or_else(|| DEFAULT_LOGGER.to_string()),
                extras: RwLock::new(self.extras),
                registry: Mutex::new(Registry::new()),
                host: RwLock::new(None),
                attached: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// Get the piece an entry was registered to
pub fn owner_of(entry: &impl Owned) -> Result<Piece, PieceError> {
    entry
        .owner_handle()
        .and_then(|handle| handle.downcast::<PieceInner>().ok())
        .map(|inner| Piece { inner })
        .ok_or_else(|| PieceError::NotOwned(entry.label()))
}
