use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, instrument};

use crate::disco::Error;

/// An authoritative zone on the DNS service, `name` always ends with a dot.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordSet {
    pub id: String,
    pub name: String,
    pub kind: RecordType,
    pub ttl: u32,
    pub records: Vec<String>,
}

/// The body of a record set creation request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewRecordSet {
    pub name: String,
    pub kind: RecordType,
    pub ttl: u32,
    pub records: Vec<String>,
    pub description: Option<String>,
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    MX,
    NS,
    SOA,
    SRV,
    TXT,
    /// Listed by the DNS service but not decodable, only the name of such a record is known.
    Unknown,
}

impl Display for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_uppercase().as_str() {
            "A" => RecordType::A,
            "AAAA" => RecordType::AAAA,
            "CNAME" => RecordType::CNAME,
            "MX" => RecordType::MX,
            "NS" => RecordType::NS,
            "SOA" => RecordType::SOA,
            "SRV" => RecordType::SRV,
            "TXT" => RecordType::TXT,
            _ => return Err(s.to_string()),
        };

        Ok(kind)
    }
}

/// The DNS authority the controller writes records into.
///
/// Names passed in and returned are fully qualified, with a trailing dot.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn list_zones(&self, name: &str) -> Result<Vec<Zone>>;

    async fn list_record_sets(&self, zone_id: &str) -> Result<Vec<RecordSet>>;

    async fn create_record_set(&self, zone_id: &str, record: &NewRecordSet) -> Result<RecordSet>;
}

#[async_trait]
impl<D> DnsProvider for Arc<D>
where
    D: DnsProvider + ?Sized,
{
    async fn list_zones(&self, name: &str) -> Result<Vec<Zone>> {
        (**self).list_zones(name).await
    }

    async fn list_record_sets(&self, zone_id: &str) -> Result<Vec<RecordSet>> {
        (**self).list_record_sets(zone_id).await
    }

    async fn create_record_set(&self, zone_id: &str, record: &NewRecordSet) -> Result<RecordSet> {
        (**self).create_record_set(zone_id, record).await
    }
}

/// Appends the root label separator when it is missing.
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// Finds the one zone named `name`.
///
/// No zone is retryable, it may not be provisioned yet. More than one means nobody can tell which
/// zone is authoritative.
#[instrument(err, skip(dns))]
pub async fn resolve_zone<D>(dns: &D, name: &str) -> Result<Zone, Error>
where
    D: DnsProvider + ?Sized,
{
    let name = fqdn(name);

    let zones = dns
        .list_zones(&name)
        .await
        .map_err(|err| Error::ListZones {
            name: name.clone(),
            source: err,
        })?;

    let mut zones = zones
        .into_iter()
        .filter(|zone| fqdn(&zone.name) == name)
        .collect::<Vec<_>>();

    match zones.len() {
        0 => {
            error!(%name, "zone is not exist");

            Err(Error::ZoneNotFound(name))
        }

        1 => {
            let zone = zones.remove(0);

            info!(%name, zone_id = %zone.id, "resolve zone done");

            Ok(zone)
        }

        count => {
            error!(%name, count, "zone name is ambiguous");

            Err(Error::AmbiguousZone { name, count })
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, Eq, PartialEq)]
    pub enum Call {
        ListZones(String),
        ListRecordSets(String),
        CreateRecordSet(String, NewRecordSet),
    }

    /// In-memory DNS service recording every call made against it.
    #[derive(Default)]
    pub struct FakeDns {
        pub zones: Mutex<Vec<Zone>>,
        pub record_sets: Mutex<Vec<(String, RecordSet)>>,
        pub calls: Mutex<Vec<Call>>,
        pub fail_list_zones: Mutex<bool>,
    }

    impl FakeDns {
        pub fn with_zone(id: &str, name: &str) -> Self {
            let dns = Self::default();
            dns.add_zone(id, name);

            dns
        }

        pub fn add_zone(&self, id: &str, name: &str) {
            self.zones.lock().push(Zone {
                id: id.to_string(),
                name: name.to_string(),
            });
        }

        pub fn add_record(&self, zone_id: &str, name: &str, kind: RecordType) {
            self.record_sets.lock().push((
                zone_id.to_string(),
                RecordSet {
                    id: format!("rs-{}", name),
                    name: name.to_string(),
                    kind,
                    ttl: 300,
                    records: vec![],
                },
            ));
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn creations(&self) -> Vec<NewRecordSet> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::CreateRecordSet(_, record) => Some(record),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl DnsProvider for FakeDns {
        async fn list_zones(&self, name: &str) -> Result<Vec<Zone>> {
            self.calls.lock().push(Call::ListZones(name.to_string()));

            if *self.fail_list_zones.lock() {
                return Err(anyhow::anyhow!("dns api unreachable"));
            }

            Ok(self.zones.lock().clone())
        }

        async fn list_record_sets(&self, zone_id: &str) -> Result<Vec<RecordSet>> {
            self.calls
                .lock()
                .push(Call::ListRecordSets(zone_id.to_string()));

            Ok(self
                .record_sets
                .lock()
                .iter()
                .filter(|(id, _)| id == zone_id)
                .map(|(_, record_set)| record_set.clone())
                .collect())
        }

        async fn create_record_set(
            &self,
            zone_id: &str,
            record: &NewRecordSet,
        ) -> Result<RecordSet> {
            self.calls
                .lock()
                .push(Call::CreateRecordSet(zone_id.to_string(), record.clone()));

            let record_set = RecordSet {
                id: format!("rs-{}", record.name),
                name: record.name.clone(),
                kind: record.kind,
                ttl: record.ttl,
                records: record.records.clone(),
            };

            self.record_sets
                .lock()
                .push((zone_id.to_string(), record_set.clone()));

            Ok(record_set)
        }
    }
}
