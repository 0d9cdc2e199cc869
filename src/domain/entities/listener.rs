use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use uuid::Uuid;

use super::{Extras, Owned, Owner};

/// Listener callback type; receives the event payload
pub type ListenerFn = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// An async callback subscribed to a named event
#[derive(Clone)]
pub struct Listener {
    id: Uuid,
    name: String,
    callback: ListenerFn,
    pub extras: Extras,
    owner: Owner,
}

impl Listener {
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            callback: Arc::new(move |payload| callback(payload).boxed()),
            extras: Extras::new(),
            owner: Owner::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Callback name; used as the event name when none is given
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, payload: serde_json::Value) {
        (self.callback)(payload).await
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub(crate) fn claim_owner(&mut self, owner: Weak<dyn Any + Send + Sync>) -> bool {
        self.owner.claim(owner)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl Owned for Listener {
    fn owner_handle(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.owner.upgrade()
    }

    fn label(&self) -> String {
        format!("listener `{}`", self.name)
    }
}
