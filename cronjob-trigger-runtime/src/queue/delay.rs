use super::Shared;
use ahash::AHashMap;
use futures::StreamExt;
use std::{collections::hash_map::Entry, hash::Hash, sync::Weak};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::{
    sync::CancellationToken,
    time::delay_queue::{self, DelayQueue},
};

/// A request to add `message` to the queue at a given `Instant` (`run_at`)
#[derive(Debug)]
pub(super) struct ScheduleRequest<T> {
    pub(super) message: T,
    pub(super) run_at: Instant,
}

struct ScheduledEntry {
    run_at: Instant,
    queue_key: delay_queue::Key,
}

/// Holds delayed items until they are due, then adds them to the queue
pub(super) struct Delaying<T> {
    queue: DelayQueue<T>,
    /// Deadline of every waiting item, used to collapse duplicate requests
    scheduled: AHashMap<T, ScheduledEntry>,
}

impl<T: Hash + Eq + Clone + Send + Sync + 'static> Delaying<T> {
    pub(super) fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            scheduled: AHashMap::new(),
        }
    }

    /// Schedule a message, the earlier `run_at` wins if it is already waiting
    fn schedule_message(&mut self, request: ScheduleRequest<T>) {
        match self.scheduled.entry(request.message) {
            Entry::Occupied(mut old_entry) if old_entry.get().run_at > request.run_at => {
                let entry = old_entry.get_mut();
                self.queue.reset_at(&entry.queue_key, request.run_at);
                entry.run_at = request.run_at;
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(entry) => {
                let message = entry.key().clone();
                entry.insert(ScheduledEntry {
                    run_at: request.run_at,
                    queue_key: self.queue.insert_at(message, request.run_at),
                });
            }
        }
    }

    /// Runs until shutdown or until every handle to the queue is gone
    pub(super) async fn run(
        mut self,
        target: Weak<Shared<T>>,
        mut requests: mpsc::UnboundedReceiver<ScheduleRequest<T>>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => self.schedule_message(request),
                    None => break,
                },
                Some(expired) = self.queue.next(), if !self.queue.is_empty() => {
                    let message = expired.into_inner();
                    self.scheduled.remove(&message);
                    match target.upgrade() {
                        Some(shared) => shared.add(message),
                        None => break,
                    }
                }
            }
        }
        tracing::trace!(pending = self.scheduled.len(), "delaying queue stopped");
    }
}
