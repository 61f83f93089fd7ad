//! Runs the caches, the work queue and a pool of reconcile workers
use crate::{
    cache::{informer, ObjectKey, Store, Writer},
    cleanup::FunctionEventHandler,
    client::{ClusterApi, KubeClusterApi},
    events::{ObjectEvent, TriggerEventHandler},
    queue::WorkQueue,
    reconciler::{self, reconcile, Action, Context},
};
use cronjob_trigger_core::{ControllerConfig, CronJobTrigger, Function};
use futures::{
    stream::{BoxStream, StreamExt},
    Future, Stream,
};
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Client,
};
use std::{pin::pin, sync::Arc};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Attempts of a failing trigger before it is dropped from the queue
pub const MAX_RETRIES: u32 = 11;

/// Failure to run the controller
#[derive(Debug, Error)]
pub enum Error {
    /// Shutdown was requested before the caches synced
    #[error("shutdown requested before the caches synced")]
    CacheSyncAborted,
    /// A background task panicked
    #[error("{task} task panicked: {source}")]
    TaskFailed {
        task: &'static str,
        #[source]
        source: JoinError,
    },
}

type WatchStream<K> = BoxStream<'static, watcher::Result<watcher::Event<K>>>;
type ErrorSink = Arc<dyn Fn(&ObjectKey, &reconciler::Error) + Send + Sync>;

/// Result of handing one key to the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Processed {
    Reconciled(Action),
    Requeued,
    Dropped,
}

/// The cronjob trigger controller
///
/// Watches triggers and functions, keeps the cron job of every trigger up to date and deletes
/// the triggers of deleted functions. Nothing happens until [`Controller::run`] is awaited.
pub struct Controller<C> {
    ctx: Arc<Context<C>>,
    triggers: Writer<CronJobTrigger>,
    functions: Writer<Function>,
    trigger_events: WatchStream<CronJobTrigger>,
    function_events: WatchStream<Function>,
    workers: usize,
    on_error: ErrorSink,
}

impl Controller<KubeClusterApi> {
    /// Controller watching the namespace from `config`, or every namespace if none is set
    #[must_use]
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        let (triggers, functions) = match config.functions_namespace.as_deref() {
            Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns)),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };
        Self::from_streams(
            KubeClusterApi::new(client),
            config,
            watcher(triggers, watcher::Config::default()).default_backoff(),
            watcher(functions, watcher::Config::default()).default_backoff(),
        )
    }
}

impl<C: ClusterApi> Controller<C> {
    /// Controller fed by arbitrary watch streams, writing through `client`
    pub fn from_streams(
        client: C,
        config: ControllerConfig,
        trigger_events: impl Stream<Item = watcher::Result<watcher::Event<CronJobTrigger>>> + Send + 'static,
        function_events: impl Stream<Item = watcher::Result<watcher::Event<Function>>> + Send + 'static,
    ) -> Self {
        let triggers = Writer::default();
        let functions = Writer::default();
        Self {
            ctx: Arc::new(Context {
                client,
                triggers: triggers.as_reader(),
                functions: functions.as_reader(),
                config: Arc::new(config),
            }),
            triggers,
            functions,
            trigger_events: trigger_events.boxed(),
            function_events: function_events.boxed(),
            workers: 1,
            on_error: Arc::new(|key, err| {
                tracing::error!(%key, error = %err, "dropping trigger out of the queue");
            }),
        }
    }

    /// Number of triggers reconciled concurrently, at least one
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Called with every trigger that is dropped from the queue, because it failed
    /// [`MAX_RETRIES`] times or hit an error that retrying cannot fix
    #[must_use]
    pub fn on_error(mut self, sink: impl Fn(&ObjectKey, &reconciler::Error) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(sink);
        self
    }

    /// The trigger cache
    #[must_use]
    pub fn trigger_store(&self) -> Store<CronJobTrigger> {
        self.ctx.triggers.clone()
    }

    /// Run until `shutdown` resolves
    ///
    /// Workers only start once both caches have synced. On shutdown the watches stop, the
    /// queue stops handing out keys, and every worker finishes the trigger it is working on
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::CacheSyncAborted`] if `shutdown` resolves before the caches synced.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let Self {
            ctx,
            triggers,
            functions,
            trigger_events,
            function_events,
            workers,
            on_error,
        } = self;
        let queue = WorkQueue::new();
        let stop = CancellationToken::new();

        let trigger_handler = TriggerEventHandler::new(queue.clone());
        let trigger_changes = informer(triggers, trigger_events).take_until(stop.clone().cancelled_owned());
        let trigger_informer = tokio::spawn(async move {
            let mut changes = pin!(trigger_changes);
            while let Some(change) = changes.next().await {
                trigger_handler.handle(&change);
            }
        });

        let cleanup_queue = WorkQueue::new();
        let function_handler = FunctionEventHandler::new(ctx.client.clone());
        let function_changes = informer(functions, function_events).take_until(stop.clone().cancelled_owned());
        let function_informer = tokio::spawn({
            let handler = function_handler.clone();
            let cleanup_queue = cleanup_queue.clone();
            async move {
                let mut changes = pin!(function_changes);
                while let Some(change) = changes.next().await {
                    let deleted = match &change {
                        ObjectEvent::Deleted(deleted) => Some(deleted.key()),
                        ObjectEvent::Added(_) | ObjectEvent::Updated { .. } => None,
                    };
                    if let Err(err) = handler.handle(change).await {
                        tracing::warn!(error = %err, "failed to delete triggers of deleted function, retrying");
                        if let Some(key) = deleted {
                            cleanup_queue.add_rate_limited(key);
                        }
                    }
                }
            }
        });

        let mut shutdown = pin!(shutdown);
        let synced = async {
            ctx.triggers.wait_until_ready().await;
            ctx.functions.wait_until_ready().await;
        };
        tokio::select! {
            () = synced => tracing::info!(workers, "caches synced, starting workers"),
            () = &mut shutdown => {
                tracing::warn!("shutdown requested while waiting for caches to sync");
                stop.cancel();
                queue.shut_down();
                cleanup_queue.shut_down();
                join("informer", [trigger_informer, function_informer]).await?;
                return Err(Error::CacheSyncAborted);
            }
        }

        let worker_tasks = (0..workers)
            .map(|id| tokio::spawn(worker(id, queue.clone(), ctx.clone(), on_error.clone())))
            .collect::<Vec<_>>();
        let cleanup_task = tokio::spawn(cleanup_worker(cleanup_queue.clone(), function_handler, ctx.clone()));

        shutdown.await;
        tracing::info!("shutting down");
        stop.cancel();
        queue.shut_down();
        cleanup_queue.shut_down();
        join("worker", worker_tasks).await?;
        join("cleanup", [cleanup_task]).await?;
        join("informer", [trigger_informer, function_informer]).await?;
        Ok(())
    }
}

async fn join(task: &'static str, handles: impl IntoIterator<Item = JoinHandle<()>>) -> Result<(), Error> {
    for handle in handles {
        handle.await.map_err(|source| Error::TaskFailed { task, source })?;
    }
    Ok(())
}

async fn worker<C: ClusterApi>(id: usize, queue: WorkQueue<ObjectKey>, ctx: Arc<Context<C>>, on_error: ErrorSink) {
    tracing::debug!(worker = id, "worker started");
    while process_next_item(&queue, &ctx, &on_error).await.is_some() {}
    tracing::debug!(worker = id, "worker stopped");
}

/// Reconcile the next key of `queue`, returns `None` once the queue shuts down
pub(crate) async fn process_next_item<C: ClusterApi>(
    queue: &WorkQueue<ObjectKey>,
    ctx: &Context<C>,
    on_error: &ErrorSink,
) -> Option<Processed> {
    let key = queue.get().await?;
    let result = reconcile(&key, ctx).await;
    let processed = handle_result(queue, &key, result, on_error);
    queue.done(&key);
    Some(processed)
}

/// Result of retrying the cascade of one deleted function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cascade {
    Finished,
    /// The function exists again, its triggers are kept
    Skipped,
    Requeued,
    Abandoned,
}

async fn cleanup_worker<C: ClusterApi>(
    queue: WorkQueue<ObjectKey>,
    handler: FunctionEventHandler<C>,
    ctx: Arc<Context<C>>,
) {
    while process_next_cascade(&queue, &handler, &ctx.functions).await.is_some() {}
}

/// Retry the cascade of the next deleted function on `queue`, returns `None` once it shuts down
pub(crate) async fn process_next_cascade<C: ClusterApi>(
    queue: &WorkQueue<ObjectKey>,
    handler: &FunctionEventHandler<C>,
    functions: &Store<Function>,
) -> Option<Cascade> {
    let key = queue.get().await?;
    let cascade = if functions.get(&key).is_some() {
        tracing::debug!(function = %key, "function was recreated, keeping its triggers");
        queue.forget(&key);
        Cascade::Skipped
    } else {
        match handler.delete_triggers_of(&key.namespace, &key.name).await {
            Ok(()) => {
                queue.forget(&key);
                Cascade::Finished
            }
            Err(err) if queue.num_requeues(&key) < MAX_RETRIES => {
                tracing::warn!(function = %key, error = %err, "failed to delete triggers of deleted function, retrying");
                queue.add_rate_limited(key.clone());
                Cascade::Requeued
            }
            Err(err) => {
                tracing::error!(function = %key, error = %err, "giving up deleting triggers of deleted function");
                queue.forget(&key);
                Cascade::Abandoned
            }
        }
    };
    queue.done(&key);
    Some(cascade)
}

fn handle_result(
    queue: &WorkQueue<ObjectKey>,
    key: &ObjectKey,
    result: reconciler::Result<Action>,
    on_error: &ErrorSink,
) -> Processed {
    match result {
        Ok(action) => {
            tracing::debug!(%key, ?action, "reconciled");
            queue.forget(key);
            Processed::Reconciled(action)
        }
        Err(err) if err.is_terminal() => {
            queue.forget(key);
            on_error(key, &err);
            Processed::Dropped
        }
        Err(err) if queue.num_requeues(key) < MAX_RETRIES => {
            tracing::warn!(%key, error = %err, "error syncing trigger, retrying");
            queue.add_rate_limited(key.clone());
            Processed::Requeued
        }
        Err(err) => {
            queue.forget(key);
            on_error(key, &err);
            Processed::Dropped
        }
    }
}
