use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use k8s_openapi::api::networking::v1::Ingress;

use crate::disco::Error;
use crate::dns::{fqdn, NewRecordSet, RecordType};

pub const DEFAULT_INGRESS_ANNOTATION: &str = "disco";

/// Overrides the configured record target for one ingress.
pub const ANNOTATION_RECORD: &str = "disco/record";

/// Record type to create, CNAME when absent.
pub const ANNOTATION_RECORD_TYPE: &str = "disco/record-type";

pub const ANNOTATION_RECORD_DESCRIPTION: &str = "disco/record-description";

const ANNOTATION_ENABLED: &str = "true";

/// Identity of a watched ingress, `namespace/name`, or just `name` for cluster scoped objects.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        match namespace {
            Some(namespace) if !namespace.is_empty() => Self(format!("{}/{}", namespace, name)),
            _ => Self(name.to_string()),
        }
    }

    pub fn from_obj(ingress: &Ingress) -> Option<Self> {
        let name = ingress.metadata.name.as_deref()?;

        Some(Self::new(ingress.metadata.namespace.as_deref(), name))
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('/').map(|(namespace, _)| namespace)
    }

    pub fn name(&self) -> &str {
        self.0
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// What a governed ingress wants in the zone.
#[derive(Debug, Clone)]
pub struct RecordSettings {
    pub annotation: String,
    pub zone_name: String,
    pub record: String,
    pub ttl: u32,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            annotation: DEFAULT_INGRESS_ANNOTATION.to_string(),
            zone_name: String::new(),
            record: String::new(),
            ttl: 1800,
        }
    }
}

fn annotation<'a>(ingress: &'a Ingress, key: &str) -> Option<&'a String> {
    ingress
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
}

pub fn is_governed(ingress: &Ingress, key: &str) -> bool {
    annotation(ingress, key)
        .map(|value| value == ANNOTATION_ENABLED)
        .unwrap_or(false)
}

/// All hosts in rule declaration order, empty ones included.
pub fn hosts(ingress: &Ingress) -> Vec<&str> {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .map(|rule| rule.host.as_deref().unwrap_or_default())
        .collect()
}

/// Only the first non-empty host of an ingress gets a record.
pub fn first_host(ingress: &Ingress) -> Option<&str> {
    hosts(ingress).into_iter().find(|host| !host.is_empty())
}

/// An update only matters when the spec or the annotations changed, status and other metadata
/// churn is ignored.
pub fn needs_update(old: &Ingress, new: &Ingress) -> bool {
    fn annotations(ingress: &Ingress) -> Option<&BTreeMap<String, String>> {
        ingress
            .metadata
            .annotations
            .as_ref()
            .filter(|annotations| !annotations.is_empty())
    }

    old.spec != new.spec || annotations(old) != annotations(new)
}

/// Derives the record set a governed ingress needs, `None` when the ingress is not governed or
/// carries no host.
pub fn desired_record(
    ingress: &Ingress,
    settings: &RecordSettings,
) -> Result<Option<NewRecordSet>, Error> {
    if !is_governed(ingress, &settings.annotation) {
        return Ok(None);
    }

    let host = match first_host(ingress) {
        None => return Ok(None),
        Some(host) => host,
    };

    let kind = match annotation(ingress, ANNOTATION_RECORD_TYPE) {
        None => RecordType::CNAME,
        Some(value) => value.parse().map_err(|value| Error::InvalidAnnotation {
            annotation: ANNOTATION_RECORD_TYPE.to_string(),
            value,
        })?,
    };

    let record = annotation(ingress, ANNOTATION_RECORD)
        .filter(|record| !record.is_empty())
        .unwrap_or(&settings.record);

    Ok(Some(NewRecordSet {
        name: fqdn(host),
        kind,
        ttl: settings.ttl,
        records: vec![record.clone()],
        description: annotation(ingress, ANNOTATION_RECORD_DESCRIPTION).cloned(),
    }))
}

#[cfg(test)]
pub(crate) mod fixture {
    use serde_json::json;

    use super::*;

    pub fn ingress(
        namespace: &str,
        name: &str,
        annotations: &[(&str, &str)],
        hosts: &[&str],
    ) -> Ingress {
        let annotations = annotations
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<BTreeMap<_, _>>();

        let rules = hosts
            .iter()
            .map(|host| {
                if host.is_empty() {
                    json!({})
                } else {
                    json!({ "host": host })
                }
            })
            .collect::<Vec<_>>();

        serde_json::from_value(json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {
                "namespace": namespace,
                "name": name,
                "annotations": annotations,
            },
            "spec": {
                "rules": rules,
            },
        }))
        .unwrap()
    }
}
