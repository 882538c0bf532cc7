use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::disco::error_policy::{ErrorSink, RetryPolicy};
use crate::disco::queue::WorkQueue;
use crate::disco::{Error, Reconcile};
use crate::ingress::ResourceKey;

/// Drains the work queue, feeding every outcome back into the queue's rate limiter.
pub struct Worker<R, E> {
    queue: WorkQueue,
    reconciler: R,
    err_sink: E,
    retry: RetryPolicy,
}

impl<R, E> Worker<R, E>
where
    R: Reconcile<Error = Error> + Send + Sync + 'static,
    E: ErrorSink + Send + Sync + 'static,
{
    pub fn new(queue: WorkQueue, reconciler: R, err_sink: E, retry: RetryPolicy) -> Self {
        Self {
            queue,
            reconciler,
            err_sink,
            retry,
        }
    }

    /// Starts `concurrency` workers, they exit once the queue is shut down.
    pub fn spawn(self, concurrency: usize) -> Vec<JoinHandle<()>> {
        let worker = Arc::new(self);

        (0..concurrency)
            .map(|id| {
                let worker = worker.clone();

                tokio::spawn(
                    async move {
                        worker.run().await;

                        info!("worker stopped");
                    }
                    .instrument(info_span!("worker", id)),
                )
            })
            .collect()
    }

    pub async fn run(&self) {
        while self.process_next_work_item().await {}
    }

    /// Handles one key, `false` once there is nothing left to wait for.
    pub async fn process_next_work_item(&self) -> bool {
        let key = match self.queue.get().await {
            None => return false,
            Some(key) => key,
        };

        let result = self
            .reconciler
            .reconcile(&key)
            .instrument(info_span!("reconcile ingress", %key))
            .await;

        self.handle_result(&key, result);

        self.queue.done(&key);

        true
    }

    fn handle_result(&self, key: &ResourceKey, result: Result<(), Error>) {
        let err = match result {
            Ok(()) => {
                self.queue.forget(key);

                return;
            }

            Err(err) => err,
        };

        let requeues = self.queue.num_requeues(key);

        error!(%key, %err, requeues, "sync ingress failed");

        if !self.retry.should_retry(requeues) {
            self.queue.forget(key);
            self.err_sink.report(key, &err);

            warn!(%key, %err, requeues, "dropping ingress out of the queue");

            return;
        }

        if err.needs_attention() {
            self.err_sink.report(key, &err);
        }

        self.queue.add_rate_limited(key.clone());
    }
}
