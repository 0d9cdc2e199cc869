//! Background loops - recurring tasks started and stopped with their piece

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::application::errors::{BoxError, PieceError};
use crate::domain::entities::Owned;

/// Loop body and guard function type
pub type LoopFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct LoopState {
    current_loop: u64,
    last_iteration: Option<DateTime<Utc>>,
}

struct LoopInner {
    id: Uuid,
    name: String,
    interval: Duration,
    count: Option<u64>,
    body: LoopFn,
    before_loop: Mutex<Option<LoopFn>>,
    task: Mutex<Option<JoinHandle<()>>>,
    state: Arc<Mutex<LoopState>>,
    owner: OnceLock<Weak<dyn Any + Send + Sync>>,
}

/// Handle to a background loop. Clones share the same task.
#[derive(Clone)]
pub struct TaskLoop {
    inner: Arc<LoopInner>,
}

impl TaskLoop {
    /// A loop that runs `body` every `interval` until cancelled
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::build(name.into(), interval, None, Arc::new(move || body().boxed()))
    }

    /// A loop that stops by itself after `count` iterations
    pub fn counted<F, Fut>(name: impl Into<String>, interval: Duration, count: u64, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::build(name.into(), interval, Some(count), Arc::new(move || body().boxed()))
    }

    fn build(name: String, interval: Duration, count: Option<u64>, body: LoopFn) -> Self {
        Self {
            inner: Arc::new(LoopInner {
                id: Uuid::new_v4(),
                name,
                interval,
                count,
                body,
                before_loop: Mutex::new(None),
                task: Mutex::new(None),
                state: Arc::new(Mutex::new(LoopState::default())),
                owner: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Install a callback awaited before the first iteration.
    /// A loop carries at most one guard.
    pub fn set_before_loop<F, Fut>(&self, guard: F) -> Result<(), PieceError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let mut slot = lock(&self.inner.before_loop);
        if slot.is_some() {
            return Err(PieceError::DuplicateGuard(self.inner.name.clone()));
        }
        *slot = Some(Arc::new(move || guard().boxed()));
        Ok(())
    }

    pub fn has_before_loop(&self) -> bool {
        lock(&self.inner.before_loop).is_some()
    }

    /// Spawn the loop task. Starting a running loop does nothing.
    pub fn start(&self) -> Result<(), PieceError> {
        let mut task = lock(&self.inner.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!(task_loop = %self.inner.name, "Loop already running");
            return Ok(());
        }

        let runtime = Handle::try_current()
            .map_err(|_| PieceError::NoRuntime(self.inner.name.clone()))?;

        {
            let mut state = lock(&self.inner.state);
            *state = LoopState::default();
        }

        let run = run_loop(
            self.inner.name.clone(),
            self.inner.interval,
            self.inner.count,
            lock(&self.inner.before_loop).clone(),
            self.inner.body.clone(),
            self.inner.state.clone(),
        );
        *task = Some(runtime.spawn(run));
        tracing::debug!(task_loop = %self.inner.name, "Loop started");
        Ok(())
    }

    /// Abort the loop task without waiting for it.
    /// Returns false if no task was running.
    pub fn cancel(&self) -> bool {
        match lock(&self.inner.task).take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                tracing::debug!(task_loop = %self.inner.name, "Loop cancelled");
                was_running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of completed iterations since the last start
    pub fn current_loop(&self) -> u64 {
        lock(&self.inner.state).current_loop
    }

    pub fn last_iteration(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.state).last_iteration
    }

    pub(crate) fn claim_owner(&self, owner: Weak<dyn Any + Send + Sync>) -> bool {
        self.inner.owner.set(owner).is_ok()
    }
}

async fn run_loop(
    name: String,
    interval: Duration,
    count: Option<u64>,
    guard: Option<LoopFn>,
    body: LoopFn,
    state: Arc<Mutex<LoopState>>,
) {
    if let Some(guard) = guard {
        if let Err(e) = guard().await {
            tracing::error!(task_loop = %name, "Before-loop guard failed: {}", e);
            return;
        }
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if count.is_some_and(|max| lock(&state).current_loop >= max) {
            break;
        }

        if let Err(e) = body().await {
            tracing::error!(task_loop = %name, "Loop iteration failed: {}", e);
            break;
        }

        let mut state = lock(&state);
        state.current_loop += 1;
        state.last_iteration = Some(Utc::now());
    }

    tracing::debug!(task_loop = %name, "Loop finished");
}

impl PartialEq for TaskLoop {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl fmt::Debug for TaskLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLoop")
            .field("name", &self.inner.name)
            .field("interval", &self.inner.interval)
            .field("count", &self.inner.count)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Owned for TaskLoop {
    fn owner_handle(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.owner.get().and_then(Weak::upgrade)
    }

    fn label(&self) -> String {
        format!("loop `{}`", self.inner.name)
    }
}
