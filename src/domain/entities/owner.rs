//! Owner back-references for registered entries

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Free-form metadata attached to pieces and entries
pub type Extras = HashMap<String, serde_json::Value>;

/// Weak reference to whatever registered an entry.
///
/// The domain layer does not know the concrete owner type; the application
/// layer downcasts it back when resolving ownership.
#[derive(Clone, Default)]
pub struct Owner(Option<Weak<dyn Any + Send + Sync>>);

impl Owner {
    /// Whether an owner was ever recorded, alive or not
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Record `owner` unless one is already present. Returns true if recorded.
    pub fn claim(&mut self, owner: Weak<dyn Any + Send + Sync>) -> bool {
        if self.is_set() {
            return false;
        }
        self.0 = Some(owner);
        true
    }

    pub fn upgrade(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.0.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(_) => write!(f, "Owner(alive)"),
            None if self.is_set() => write!(f, "Owner(dropped)"),
            None => write!(f, "Owner(none)"),
        }
    }
}

/// Entries that remember which piece registered them
pub trait Owned {
    /// Upgraded owner handle, if the entry has a live owner
    fn owner_handle(&self) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Short human-readable label used in error messages
    fn label(&self) -> String;
}
