//! Watch-fed work queues and the worker pools that drain them.
//!
//! Each registered [`Reconciler`] gets its own [`Controller`]: a deduplicating
//! queue of resource keys plus `workers` tasks pulling from it. A single
//! dispatcher task fans store change notifications out to every controller
//! through [`Reconciler::related_keys`].
//!
//! A key is never handed to two workers at once. A key enqueued while it is
//! being processed is parked and re-queued once the running pass finishes, so
//! the latest state is always observed by a later pass.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ContactGroupMembershipRemovalSpec, ContactGroupMembershipSpec, ContactGroupSpec, ContactSpec,
    ControllerConfig, EmailSpec, EmailTemplateSpec, Object, ObjectKey, ResourceKind, Spec,
    UserSpec,
};
use crate::domain::ports::{ResourceStore, WatchEvent};

use super::reconcilers::{
    Action, AudienceContactReconciler, ContactGroupReconciler, ContactReconciler, Context,
    EmailReconciler, MembershipReconciler, MembershipRemovalReconciler, Reconciler,
};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    active: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
}

/// Deduplicating FIFO of resource keys with per-key exclusivity.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `key` unless it is already waiting. A key that is currently
    /// being processed is re-queued when its pass finishes.
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.active.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.pending.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Wait for the next key and mark it active.
    pub async fn next(&self) -> ObjectKey {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.pending.pop_front() {
                    state.queued.remove(&key);
                    state.active.insert(key.clone());
                    if !state.pending.is_empty() {
                        self.notify.notify_one();
                    }
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Finish processing `key`, re-queueing it if it changed meanwhile.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.active.remove(key);
        if state.dirty.remove(key) && state.queued.insert(key.clone()) {
            state.pending.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// One reconciler, its queue, and per-key retry state.
pub struct Controller {
    reconciler: Arc<dyn Reconciler>,
    queue: Arc<WorkQueue>,
    backoffs: Mutex<HashMap<ObjectKey, ExponentialBackoff>>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Controller {
    pub fn new(reconciler: Arc<dyn Reconciler>, config: &ControllerConfig) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            backoffs: Mutex::new(HashMap::new()),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    pub fn name(&self) -> &'static str {
        self.reconciler.name()
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    async fn next_backoff(&self, key: &ObjectKey) -> Duration {
        let mut backoffs = self.backoffs.lock().await;
        let backoff = backoffs.entry(key.clone()).or_insert_with(|| {
            ExponentialBackoffBuilder::new()
                .with_initial_interval(self.initial_backoff)
                .with_max_interval(self.max_backoff)
                .with_max_elapsed_time(None)
                .build()
        });
        backoff.next_backoff().unwrap_or(self.max_backoff)
    }

    async fn reset_backoff(&self, key: &ObjectKey) {
        self.backoffs.lock().await.remove(key);
    }

    /// Run one pass for `key` and schedule whatever follows from it.
    pub async fn process(&self, key: &ObjectKey) {
        let span = info_span!(
            "reconcile",
            controller = self.reconciler.name(),
            kind = %self.reconciler.kind(),
            key = %key
        );
        let result = self.reconciler.reconcile(key).instrument(span).await;

        match result {
            Ok(Action::Done) => self.reset_backoff(key).await,
            Ok(Action::RequeueAfter(delay)) => {
                self.reset_backoff(key).await;
                debug!(
                    controller = self.name(),
                    %key,
                    delay_ms = delay.as_millis() as u64,
                    "Requeue requested"
                );
                self.queue.add_after(key.clone(), delay);
            }
            Err(e) => {
                let delay = self.next_backoff(key).await;
                if e.is_waiting() {
                    debug!(
                        controller = self.name(),
                        %key,
                        reason = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Waiting"
                    );
                } else if e.is_retryable() {
                    warn!(
                        controller = self.name(),
                        %key,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Reconcile failed, retrying"
                    );
                } else {
                    error!(
                        controller = self.name(),
                        %key,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Reconcile failed, needs a spec change"
                    );
                }
                self.queue.add_after(key.clone(), delay);
            }
        }
    }

    async fn work(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let key = tokio::select! {
                key = self.queue.next() => key,
                _ = shutdown.changed() => break,
            };
            self.process(&key).await;
            self.queue.done(&key).await;
            if *shutdown.borrow() {
                break;
            }
        }
    }
}

/// Runs every controller over one shared store.
pub struct ControllerManager<St> {
    store: Arc<St>,
    controllers: Vec<Arc<Controller>>,
    config: ControllerConfig,
}

impl<St: ResourceStore + 'static> ControllerManager<St> {
    pub fn new(store: Arc<St>, config: ControllerConfig) -> Self {
        Self {
            store,
            controllers: Vec::new(),
            config,
        }
    }

    /// Manager with the full reconciler set. The audience reconciler is only
    /// registered when the context carries an audience provider.
    pub fn with_reconcilers(ctx: &Arc<Context<St>>) -> Self {
        let mut manager = Self::new(Arc::clone(&ctx.store), ctx.config.controller.clone())
            .register(Arc::new(EmailReconciler::new(Arc::clone(ctx))))
            .register(Arc::new(ContactReconciler::new(Arc::clone(ctx))))
            .register(Arc::new(ContactGroupReconciler::new(Arc::clone(ctx))))
            .register(Arc::new(MembershipReconciler::new(Arc::clone(ctx))))
            .register(Arc::new(MembershipRemovalReconciler::new(Arc::clone(ctx))));
        if let Some(audience) = AudienceContactReconciler::new(Arc::clone(ctx)) {
            manager = manager.register(Arc::new(audience));
        }
        manager
    }

    pub fn register(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.controllers
            .push(Arc::new(Controller::new(reconciler, &self.config)));
        self
    }

    pub fn controllers(&self) -> &[Arc<Controller>] {
        &self.controllers
    }

    /// Enqueue every existing object for every controller.
    pub async fn resync(&self) -> DomainResult<()> {
        for controller in &self.controllers {
            let keys = keys_of_kind(self.store.as_ref(), controller.reconciler.kind()).await?;
            debug!(controller = controller.name(), count = keys.len(), "Resync");
            for key in keys {
                controller.queue.add(key).await;
            }
        }
        Ok(())
    }

    async fn dispatch(&self, event: &WatchEvent) {
        for controller in &self.controllers {
            for key in controller.reconciler.related_keys(event).await {
                controller.queue.add(key).await;
            }
        }
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> DomainResult<()> {
        let mut events = self.store.watch();
        self.resync().await?;

        let mut workers = JoinSet::new();
        for controller in &self.controllers {
            for _ in 0..self.config.workers.max(1) {
                workers.spawn(Arc::clone(controller).work(shutdown.clone()));
            }
        }
        info!(
            controllers = self.controllers.len(),
            workers_per_controller = self.config.workers,
            "Controllers started"
        );

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.dispatch(&event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Watch stream lagged, resyncing");
                        self.resync().await?;
                    }
                    Err(RecvError::Closed) => {
                        info!("Watch stream closed");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Stopping controllers");
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        Ok(())
    }
}

fn keys<S: Spec>(objects: &[Object<S>]) -> Vec<ObjectKey> {
    objects.iter().map(Object::key).collect()
}

async fn keys_of_kind<St: ResourceStore>(
    store: &St,
    kind: ResourceKind,
) -> DomainResult<Vec<ObjectKey>> {
    Ok(match kind {
        ResourceKind::Email => keys(&store.list::<EmailSpec>(None).await?),
        ResourceKind::EmailTemplate => keys(&store.list::<EmailTemplateSpec>(None).await?),
        ResourceKind::User => keys(&store.list::<UserSpec>(None).await?),
        ResourceKind::Contact => keys(&store.list::<ContactSpec>(None).await?),
        ResourceKind::ContactGroup => keys(&store.list::<ContactGroupSpec>(None).await?),
        ResourceKind::ContactGroupMembership => {
            keys(&store.list::<ContactGroupMembershipSpec>(None).await?)
        }
        ResourceKind::ContactGroupMembershipRemoval => {
            keys(&store.list::<ContactGroupMembershipRemovalSpec>(None).await?)
        }
    })
}
