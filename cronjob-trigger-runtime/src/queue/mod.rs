//! A deduplicating, rate limited work queue
//!
//! Items are processed by at most one worker at a time: an item that is added again while a
//! worker holds it is parked until the worker calls [`WorkQueue::done`], and then requeued once.
//! Adding an item that is already waiting is a no-op, so a burst of change events for the same
//! key results in a single reconcile.

mod delay;
mod rate_limiter;

pub use rate_limiter::{ItemExponentialBackoff, RateLimiter};

use ahash::AHashSet;
use delay::{Delaying, ScheduleRequest};
use parking_lot::Mutex;
use std::{collections::VecDeque, hash::Hash, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Notify},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

struct State<T> {
    /// Items ready to be handed out, in order
    queue: VecDeque<T>,
    /// Items that need processing, whether queued or parked behind a worker
    dirty: AHashSet<T>,
    /// Items currently held by a worker
    processing: AHashSet<T>,
    shutting_down: bool,
}

pub(crate) struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    rate_limiter: Mutex<Box<dyn RateLimiter<T>>>,
    delayed: mpsc::UnboundedSender<ScheduleRequest<T>>,
    shutdown: CancellationToken,
}

impl<T: Hash + Eq + Clone> Shared<T> {
    fn add(&self, item: T) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }
}

/// A handle to a shared work queue
///
/// Cloning produces another handle to the same queue.
pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Hash + Eq + Clone + Send + Sync + 'static,
{
    /// A queue retrying failed items with [`ItemExponentialBackoff::default`]
    ///
    /// Must be called from within a tokio runtime, since delayed items are driven by a background task.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limiter(ItemExponentialBackoff::default())
    }

    /// A queue retrying failed items according to `rate_limiter`
    #[must_use]
    pub fn with_rate_limiter(rate_limiter: impl RateLimiter<T> + 'static) -> Self {
        let (delayed, requests) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: AHashSet::new(),
                processing: AHashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            rate_limiter: Mutex::new(Box::new(rate_limiter)),
            delayed,
            shutdown: shutdown.clone(),
        });
        tokio::spawn(Delaying::new().run(Arc::downgrade(&shared), requests, shutdown));
        Self { shared }
    }

    /// Mark `item` as needing processing
    ///
    /// Ignored once the queue is shutting down.
    pub fn add(&self, item: T) {
        self.shared.add(item);
    }

    /// Add `item` once `delay` has passed
    ///
    /// If the item is already waiting to be added, the earlier deadline wins.
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let request = ScheduleRequest {
            message: item,
            run_at: Instant::now() + delay,
        };
        if self.shared.delayed.send(request).is_err() {
            tracing::debug!("delaying queue is gone, dropping delayed item");
        }
    }

    /// Add `item` after the delay the rate limiter picks for it
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.shared.rate_limiter.lock().when(&item);
        self.add_after(item, delay);
    }

    /// Stop tracking the failures of `item`
    pub fn forget(&self, item: &T) {
        self.shared.rate_limiter.lock().forget(item);
    }

    /// How many times `item` has been requeued through [`WorkQueue::add_rate_limited`]
    #[must_use]
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.shared.rate_limiter.lock().num_requeues(item)
    }

    /// Wait for the next item to process
    ///
    /// The caller owns the item until it calls [`WorkQueue::done`] with it.
    /// Returns `None` once the queue is shutting down, even if items are still queued.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // register before checking the state so that a concurrent add or shutdown is not missed
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Release `item` after processing it
    ///
    /// Requeues the item if it was added again while it was being processed.
    pub fn done(&self, item: &T) {
        let mut state = self.shared.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Number of items ready to be handed out
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Whether no items are ready to be handed out
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting items and wake every waiting worker
    pub fn shut_down(&self) {
        self.shared.state.lock().shutting_down = true;
        self.shared.shutdown.cancel();
        self.shared.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] has been called
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Hash + Eq + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
