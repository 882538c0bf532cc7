use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::disco::rate_limiter::ExponentialFailureRateLimiter;
use crate::ingress::ResourceKey;

#[derive(Debug)]
struct State {
    queue: VecDeque<ResourceKey>,
    /// keys waiting to be processed, queued or parked behind an in-flight run
    dirty: HashSet<ResourceKey>,
    processing: HashSet<ResourceKey>,
    /// keys sleeping out a backoff, with the instant they become ready
    waiting: HashMap<ResourceKey, Instant>,
    rate_limiter: ExponentialFailureRateLimiter,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// Deduplicating, rate limited work queue of resource keys.
///
/// A key is pending at most once, and handed to at most one worker at a time. A key added while
/// it is in flight is parked and redelivered once the worker calls [`WorkQueue::done`].
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    waiting: HashMap::new(),
                    rate_limiter: ExponentialFailureRateLimiter::new(base_delay, max_delay),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn add(&self, key: ResourceKey) {
        let mut state = self.inner.state.lock();

        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());

        if state.processing.contains(&key) {
            debug!(%key, "key is in flight, park it until done");

            return;
        }

        state.queue.push_back(key);
        drop(state);

        self.inner.notify.notify_one();
    }

    /// Adds `key` once the backoff for its current failure count has passed, and counts one more
    /// failure.
    pub fn add_rate_limited(&self, key: ResourceKey) {
        let delay = {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }

            state.rate_limiter.when(&key)
        };

        self.add_after(key, delay);
    }

    /// Adds `key` after `delay`. A key already waiting keeps the earlier of the two deadlines.
    pub fn add_after(&self, key: ResourceKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);

            return;
        }

        let ready_at = Instant::now() + delay;

        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }

            match state.waiting.get(&key) {
                Some(waiting_until) if *waiting_until <= ready_at => return,
                _ => {
                    state.waiting.insert(key.clone(), ready_at);
                }
            }
        }

        debug!(%key, ?delay, "add key after delay");

        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep_until(ready_at).await;

            let owned = {
                let mut state = queue.inner.state.lock();
                if state.waiting.get(&key) == Some(&ready_at) {
                    state.waiting.remove(&key);

                    true
                } else {
                    false
                }
            };

            // an earlier deadline for the same key has taken over
            if owned {
                queue.add(key);
            }
        });
    }

    /// Waits for the next key and marks it in flight. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ResourceKey> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);

            // registered before the state check, so no wakeup between check and await is lost
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }

                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());

                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Releases the in-flight mark of `key`, requeueing it when it was added meanwhile.
    pub fn done(&self, key: &ResourceKey) {
        let mut state = self.inner.state.lock();

        state.processing.remove(key);

        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);

            self.inner.notify.notify_one();
        }
    }

    pub fn forget(&self, key: &ResourceKey) {
        self.inner.state.lock().rate_limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.inner.state.lock().rate_limiter.num_requeues(key)
    }

    /// Number of keys ready to be handed out.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shut_down(&self) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }

        state.shutting_down = true;
        state.waiting.clear();
        drop(state);

        info!("work queue shut down");

        self.inner.notify.notify_waiters();
    }

    #[cfg(test)]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }
}
