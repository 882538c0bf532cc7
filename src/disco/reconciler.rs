use std::sync::Arc;

use async_trait::async_trait;
use tap::TapFallible;
use tracing::{debug, info, instrument};

use crate::disco::informer::IngressStore;
use crate::disco::{Error, Reconcile};
use crate::dns::{self, fqdn, DnsProvider, NewRecordSet};
use crate::ingress::{self, RecordSettings, ResourceKey};
use crate::metrics::Metrics;

/// Makes sure the first host of every governed ingress has a record set in the zone.
///
/// Nothing is remembered between runs, every run reads the mirrored store and lists the zone
/// again.
pub struct IngressReconciler<S, D> {
    store: S,
    dns: D,
    settings: Arc<RecordSettings>,
    metrics: Metrics,
}

impl<S, D> IngressReconciler<S, D>
where
    S: IngressStore,
    D: DnsProvider,
{
    pub fn new(store: S, dns: D, settings: RecordSettings, metrics: Metrics) -> Self {
        Self {
            store,
            dns,
            settings: Arc::new(settings),
            metrics,
        }
    }

    #[instrument(err, skip(self, key), fields(%key))]
    pub async fn sync_once(&self, key: &ResourceKey) -> Result<(), Error> {
        let ingress = match self.store.get_by_key(key)? {
            None => {
                info!(%key, "ingress is deleted, nothing to do");

                return Ok(());
            }

            Some(ingress) => ingress,
        };

        let desired = match ingress::desired_record(&ingress, &self.settings)? {
            None => {
                debug!(
                    %key,
                    annotation = %self.settings.annotation,
                    "ignore ingress, annotation not set or no host"
                );

                return Ok(());
            }

            Some(desired) => desired,
        };

        debug!(%key, host = %desired.name, "checking ingress host");

        self.metrics.init_failures(key, &desired.name);

        self.check_records(key, &desired)
            .await
            .tap_err(|_| self.metrics.record_failure(key, &desired.name))
    }

    /// Creates `desired` unless a record set with its name already exists.
    async fn check_records(&self, key: &ResourceKey, desired: &NewRecordSet) -> Result<(), Error> {
        let zone = dns::resolve_zone(&self.dns, &self.settings.zone_name).await?;

        let record_sets = self
            .dns
            .list_record_sets(&zone.id)
            .await
            .map_err(|err| Error::ListRecordSets {
                zone_id: zone.id.clone(),
                source: err,
            })?;

        if record_sets
            .iter()
            .any(|record_set| fqdn(&record_set.name) == desired.name)
        {
            debug!(
                %key,
                host = %desired.name,
                zone = %zone.name,
                "record set exists, no need update"
            );

            return Ok(());
        }

        let created = self
            .dns
            .create_record_set(&zone.id, desired)
            .await
            .map_err(|err| Error::CreateRecordSet {
                zone_id: zone.id.clone(),
                name: desired.name.clone(),
                source: err,
            })?;

        info!(
            %key,
            name = %created.name,
            kind = %created.kind,
            records = ?created.records,
            ttl = created.ttl,
            zone = %zone.name,
            "create record set success"
        );

        Ok(())
    }
}

#[async_trait]
impl<S, D> Reconcile for IngressReconciler<S, D>
where
    S: IngressStore,
    D: DnsProvider,
{
    type Error = Error;

    async fn reconcile(&self, key: &ResourceKey) -> Result<(), Self::Error> {
        self.sync_once(key).await
    }
}
