use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::disco::informer::IngressStore;
use crate::disco::queue::WorkQueue;
use crate::disco::stopped;
use crate::ingress::ResourceKey;

/// Periodically pushes every known ingress through the queue again, so a dropped watch event
/// can't leave a host without its record forever.
pub struct Resync<S> {
    store: S,
    queue: WorkQueue,
    period: Duration,
}

impl<S: IngressStore> Resync<S> {
    pub fn new(store: S, queue: WorkQueue, period: Duration) -> Self {
        Self {
            store,
            queue,
            period,
        }
    }

    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = ticker.tick() => {
                    self.requeue_all();

                    info!(period = ?self.period, "requeued all ingresses, next check after period");
                }
            }
        }

        info!("resync stopped");
    }

    /// Goes through the rate limiter, so a sweep never bypasses the backoff of a failing key.
    pub fn requeue_all(&self) -> usize {
        let mut count = 0;

        for ingress in self.store.list() {
            match ResourceKey::from_obj(&ingress) {
                None => error!(namespace = ?ingress.metadata.namespace, "couldn't add ingress"),

                Some(key) => {
                    debug!(%key, "requeue ingress");

                    self.queue.add_rate_limited(key);
                    count += 1;
                }
            }
        }

        count
    }
}
