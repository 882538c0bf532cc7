use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cloudflare::endpoints::dns::{
    CreateDnsRecord, CreateDnsRecordParams, DnsContent, DnsRecord, ListDnsRecords,
    ListDnsRecordsParams,
};
use cloudflare::endpoints::zone::{ListZones, ListZonesParams};
use cloudflare::framework::async_api::{ApiClient, Client};
use cloudflare::framework::auth::Credentials;
use cloudflare::framework::{Environment, HttpApiClientConfig};
use futures_util::TryFutureExt;
use tap::TapFallible;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::dns::{fqdn, DnsProvider, NewRecordSet, RecordSet, RecordType, Zone};

const PAGE_SIZE: u32 = 100;

/// Cloudflare backed [`DnsProvider`].
#[derive(Clone)]
pub struct CfDns {
    client: Arc<Client>,
}

impl Debug for CfDns {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CfDns")
            .field("client", &"Client".to_string())
            .finish()
    }
}

impl CfDns {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let client = Client::new(
            credentials,
            HttpApiClientConfig::default(),
            Environment::Production,
        )?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    #[instrument(err)]
    async fn list_dns_records_page(&self, zone_id: &str, page: u32) -> Result<Vec<DnsRecord>> {
        let list_dns_req = ListDnsRecords {
            zone_identifier: zone_id,
            params: ListDnsRecordsParams {
                record_type: None,
                name: None,
                page: Some(page),
                per_page: Some(PAGE_SIZE),
                order: None,
                direction: None,
                search_match: None,
            },
        };

        let list_dns_resp = self
            .client
            .request(&list_dns_req)
            .inspect_err(|err| {
                error!(?list_dns_req, %err, "list dns failed");
            })
            .await?;

        if let Some(api_err) = list_dns_resp.errors.first() {
            error!(%api_err, "list dns failed with response");

            return Err(anyhow::anyhow!("{}", api_err));
        }

        Ok(list_dns_resp.result)
    }
}

#[async_trait]
impl DnsProvider for CfDns {
    #[instrument(err)]
    async fn list_zones(&self, name: &str) -> Result<Vec<Zone>> {
        let list_zones_req = ListZones {
            params: ListZonesParams {
                name: Some(name.trim_end_matches('.').to_string()),
                status: None,
                page: None,
                per_page: None,
                order: None,
                direction: None,
                search_match: None,
            },
        };

        debug!(?list_zones_req, "create list zones request");

        let list_zones_resp = self
            .client
            .request(&list_zones_req)
            .await
            .tap_err(|err| {
                error!(%err, ?list_zones_req, "send list zones request failed");
            })?;

        if let Some(api_err) = list_zones_resp.errors.first() {
            error!(%api_err, "list zones failed with response");

            return Err(anyhow::anyhow!("api error {}", api_err));
        }

        let zones = list_zones_resp
            .result
            .into_iter()
            .map(|zone| Zone {
                id: zone.id,
                name: fqdn(&zone.name),
            })
            .collect::<Vec<_>>();

        info!(name, ?zones, "list zones done");

        Ok(zones)
    }

    #[instrument(err)]
    async fn list_record_sets(&self, zone_id: &str) -> Result<Vec<RecordSet>> {
        let mut record_sets = vec![];

        for page in 1.. {
            let dns_records = self.list_dns_records_page(zone_id, page).await?;
            let last_page = (dns_records.len() as u32) < PAGE_SIZE;

            record_sets.extend(dns_records.into_iter().map(record_set));

            if last_page {
                break;
            }
        }

        info!(zone_id, count = record_sets.len(), "list record sets done");

        Ok(record_sets)
    }

    #[instrument(err)]
    async fn create_record_set(&self, zone_id: &str, record: &NewRecordSet) -> Result<RecordSet> {
        let name = record.name.trim_end_matches('.');

        if let Some(description) = &record.description {
            warn!(
                name,
                %description,
                "cloudflare records carry no description, ignore it"
            );
        }

        let mut ids = vec![];

        for value in &record.records {
            let create_dns_req = CreateDnsRecord {
                zone_identifier: zone_id,
                params: CreateDnsRecordParams {
                    ttl: Some(record.ttl),
                    priority: None,
                    proxied: None,
                    name,
                    content: dns_content(record.kind, value)?,
                },
            };

            let create_dns_resp = self
                .client
                .request(&create_dns_req)
                .instrument(info_span!("create_dns_record"))
                .await
                .tap_err(|err| {
                    error!(
                        name,
                        zone_id,
                        kind = %record.kind,
                        value = %value,
                        %err,
                        "create dns record failed"
                    );
                })?;
            if let Some(api_err) = create_dns_resp.errors.first() {
                return Err(anyhow::anyhow!("{}", api_err));
            }

            info!(?create_dns_req, "create dns record success");

            ids.push(create_dns_resp.result.id);
        }

        Ok(RecordSet {
            id: ids.join(","),
            name: fqdn(name),
            kind: record.kind,
            ttl: record.ttl,
            records: record.records.clone(),
        })
    }
}

/// Cloudflare keeps one value per record, every record becomes a single valued set.
///
/// A record always keeps its name, even when its content can't be decoded, existence is decided
/// by name alone.
fn record_set(dns_record: DnsRecord) -> RecordSet {
    let (kind, records) = match dns_record.content {
        DnsContent::A { content } => (RecordType::A, vec![content.to_string()]),
        DnsContent::AAAA { content } => (RecordType::AAAA, vec![content.to_string()]),
        DnsContent::CNAME { content } => (RecordType::CNAME, vec![content]),
        DnsContent::NS { content } => (RecordType::NS, vec![content]),
        DnsContent::MX { content, .. } => (RecordType::MX, vec![content]),
        DnsContent::TXT { content } => (RecordType::TXT, vec![content]),
        DnsContent::SRV { .. } => (RecordType::SRV, vec![]),

        #[allow(unreachable_patterns)]
        _ => {
            debug!(name = %dns_record.name, "record content is not supported, keep the name only");

            (RecordType::Unknown, vec![])
        }
    };

    RecordSet {
        id: dns_record.id,
        name: fqdn(&dns_record.name),
        kind,
        ttl: dns_record.ttl,
        records,
    }
}

fn dns_content(kind: RecordType, value: &str) -> Result<DnsContent> {
    let content = match kind {
        RecordType::A => DnsContent::A {
            content: value.parse()?,
        },
        RecordType::AAAA => DnsContent::AAAA {
            content: value.parse()?,
        },
        RecordType::CNAME => DnsContent::CNAME {
            content: value.to_string(),
        },
        RecordType::NS => DnsContent::NS {
            content: value.to_string(),
        },
        RecordType::TXT => DnsContent::TXT {
            content: value.to_string(),
        },

        kind => return Err(anyhow::anyhow!("record type {} is not supported", kind)),
    };

    Ok(content)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use serde_json::json;

    use super::*;

    fn dns_record(kind: &str, name: &str, content: &str) -> DnsRecord {
        serde_json::from_value(json!({
            "id": format!("rec-{}", name),
            "type": kind,
            "name": name,
            "content": content,
            "proxiable": false,
            "proxied": false,
            "ttl": 300,
            "locked": false,
            "zone_id": "zone-1",
            "zone_name": "example.com",
            "created_on": "2022-01-01T00:00:00Z",
            "modified_on": "2022-01-01T00:00:00Z",
            "meta": {
                "auto_added": false,
                "source": "primary",
            },
        }))
        .unwrap()
    }

    #[test]
    fn listed_records_keep_their_name() {
        let srv = record_set(dns_record("SRV", "example.com", "10 5 5060 sip.example.com"));
        assert_eq!(srv.name, "example.com.");
        assert_eq!(srv.kind, RecordType::SRV);

        let cname = record_set(dns_record("CNAME", "www.example.com", "ingress.example.com"));
        assert_eq!(cname.name, "www.example.com.");
        assert_eq!(cname.kind, RecordType::CNAME);
        assert_eq!(cname.records, vec!["ingress.example.com".to_string()]);
        assert_eq!(cname.ttl, 300);
    }

    #[test]
    fn content_from_record_type() {
        assert!(matches!(
            dns_content(RecordType::CNAME, "ingress.example.com.").unwrap(),
            DnsContent::CNAME { content } if content == "ingress.example.com."
        ));

        assert!(matches!(
            dns_content(RecordType::A, "10.0.0.1").unwrap(),
            DnsContent::A { content } if content == Ipv4Addr::new(10, 0, 0, 1)
        ));

        assert!(dns_content(RecordType::A, "not-an-ip").is_err());
        assert!(dns_content(RecordType::SOA, "ns.example.com.").is_err());
        assert!(dns_content(RecordType::Unknown, "anything").is_err());
    }
}
