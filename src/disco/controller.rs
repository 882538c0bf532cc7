use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::Store;
use kube::Api;
use tap::TapFallible;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::disco::error_policy::TracingErrorSink;
use crate::disco::feed::ChangeFeed;
use crate::disco::informer::{self, EventStream, Informer, SyncSignal};
use crate::disco::queue::WorkQueue;
use crate::disco::reconciler::IngressReconciler;
use crate::disco::resync::Resync;
use crate::disco::worker::Worker;
use crate::disco::{Error, RetryPolicy};
use crate::dns::DnsProvider;
use crate::ingress::{RecordSettings, ResourceKey};
use crate::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub record: RecordSettings,
    pub resync_period: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub retry: RetryPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            record: RecordSettings::default(),
            resync_period: Duration::from_secs(5 * 60),
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(600),
            retry: RetryPolicy::GiveUpAfter(5),
        }
    }
}

/// Keeps a record set in the zone for every governed ingress.
///
/// The informer feeds keys into the work queue, the workers drain it and the resync loop
/// requeues everything periodically.
pub struct Controller<D> {
    informer: Informer<ChangeFeed>,
    synced: SyncSignal,
    store: Store<Ingress>,
    queue: WorkQueue,
    reconciler: IngressReconciler<Store<Ingress>, D>,
    resync_period: Duration,
    retry: RetryPolicy,
}

impl<D> Controller<D>
where
    D: DnsProvider + 'static,
{
    pub fn new(api: Api<Ingress>, dns: D, settings: ControllerSettings, metrics: Metrics) -> Self {
        Self::with_events(informer::watch_ingresses(api), dns, settings, metrics)
    }

    /// Builds a controller fed by `events` instead of a live watch.
    pub fn with_events(
        events: EventStream,
        dns: D,
        settings: ControllerSettings,
        metrics: Metrics,
    ) -> Self {
        let queue = WorkQueue::new(settings.backoff_base, settings.backoff_max);

        let (informer, store, synced) = Informer::new(events, ChangeFeed::new(queue.clone()));

        let reconciler = IngressReconciler::new(store.clone(), dns, settings.record, metrics);

        Self {
            informer,
            synced,
            store,
            queue,
            reconciler,
            resync_period: settings.resync_period,
            retry: settings.retry,
        }
    }

    /// Reconciles a single key outside of the queue.
    pub async fn sync_once(&self, key: &ResourceKey) -> Result<(), Error> {
        self.reconciler.sync_once(key).await
    }

    /// Runs until `stop` resolves, then drains the workers and returns.
    ///
    /// No worker starts before the informer has delivered a full listing.
    #[instrument(skip(self, stop))]
    pub async fn start<F>(self, concurrency: usize, stop: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            informer,
            mut synced,
            store,
            queue,
            reconciler,
            resync_period,
            retry,
        } = self;

        futures_util::pin_mut!(stop);

        let (stop_sender, stop_receiver) = watch::channel(false);

        let informer = tokio::spawn(informer.run(stop_receiver.clone()));

        info!("waiting for ingress cache to sync");

        tokio::select! {
            _ = &mut stop => {
                info!("stop before ingress cache synced");

                let _ = stop_sender.send(true);
                queue.shut_down();

                return informer.await.context("join ingress informer failed");
            }

            is_synced = synced.wait() => {
                if !is_synced {
                    error!("ingress informer stopped before cache synced");

                    return Err(anyhow::anyhow!(
                        "ingress informer stopped before cache synced"
                    ));
                }
            }
        }

        info!("ingress cache synced, starting workers");

        let workers =
            Worker::new(queue.clone(), reconciler, TracingErrorSink, retry).spawn(concurrency);

        info!(concurrency, "workers started");

        let resync = tokio::spawn(
            Resync::new(store, queue.clone(), resync_period).run(stop_receiver),
        );

        stop.await;

        info!("shutting down workers");

        let _ = stop_sender.send(true);
        queue.shut_down();

        let mut result: anyhow::Result<()> = Ok(());

        for worker in workers {
            if let Err(err) = worker.await {
                error!(%err, "join worker failed");

                result = Err(err).context("join worker failed");
            }
        }

        let resync = resync
            .await
            .tap_err(|err| error!(%err, "join resync failed"))
            .context("join resync failed");
        let informer = informer
            .await
            .tap_err(|err| error!(%err, "join ingress informer failed"))
            .context("join ingress informer failed");

        info!("controller stopped");

        result.and(resync).and(informer)
    }
}
