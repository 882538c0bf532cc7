use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid resource key {0:?}")]
    InvalidKey(String),

    #[error("no zone with name {0} found")]
    ZoneNotFound(String),

    #[error("multiple zones with name {name} found: {count}")]
    AmbiguousZone { name: String, count: usize },

    #[error("invalid value {value:?} for annotation {annotation}")]
    InvalidAnnotation { annotation: String, value: String },

    #[error("list zones with name {name} failed: {source}")]
    ListZones {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("list record sets in zone {zone_id} failed: {source}")]
    ListRecordSets {
        zone_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("create record set {name} in zone {zone_id} failed: {source}")]
    CreateRecordSet {
        zone_id: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    /// Errors that backing off alone will not fix, they have to reach an operator.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            Error::AmbiguousZone { .. } | Error::InvalidAnnotation { .. } | Error::InvalidKey(_)
        )
    }
}
