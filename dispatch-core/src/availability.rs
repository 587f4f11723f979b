//! Persisted availability probe visits and their attributes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A stored synthetic probe visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityVisit {
    /// Store-assigned identifier.
    pub id: i64,
    /// Batch the visit was generated in.
    pub visit_set_id: i64,
    /// Region the visit probes.
    pub service_region_id: i64,
    /// Canonical location of the probe.
    pub location_id: i64,
    /// Service duration of the probe.
    pub service_duration_sec: i64,
}

/// A named attribute known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attribute {
    /// Identifier.
    pub id: i64,
    /// Name, e.g. `service_name:acute`.
    pub name: String,
}

/// The defining shape of a probe visit, without store identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleAvailabilityVisit {
    /// Canonical location.
    pub location_id: i64,
    /// Required attribute ids.
    pub attribute_ids: Vec<i64>,
    /// Service duration.
    pub duration_sec: i64,
}

/// Maps negative probe ids used in problems to stored probe ids.
pub type AvailabilityVisitIdMap = BTreeMap<i64, i64>;

/// Attributes of stored probe visits, keyed by visit id.
pub type AvailabilityVisitAttributes = BTreeMap<i64, Vec<Attribute>>;
