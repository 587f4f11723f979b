//! Live configuration of every run instance.
//!
//! The maps are swapped wholesale on each settings poll. Readers only ever
//! receive cloned [`Arc`]s, never references into the maps.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use dispatch_core::{AvailabilitySettingsConfig, RunInstanceKey, SettingsConfig};

/// Schedule configuration per instance.
pub type ScheduleConfigs = BTreeMap<RunInstanceKey, Arc<SettingsConfig>>;

/// Availability configuration per instance.
pub type AvailabilityConfigs = BTreeMap<RunInstanceKey, Arc<AvailabilitySettingsConfig>>;

#[derive(Debug, Default)]
struct Maps {
    schedule: ScheduleConfigs,
    availability: AvailabilityConfigs,
}

/// Both instance maps behind one lock.
#[derive(Debug, Default)]
pub struct InstanceMaps {
    inner: RwLock<Maps>,
}

impl InstanceMaps {
    /// Current schedule configuration for `key`.
    #[must_use]
    pub fn schedule_config(&self, key: &RunInstanceKey) -> Option<Arc<SettingsConfig>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .schedule
            .get(key)
            .cloned()
    }

    /// Current availability configuration for `key`.
    #[must_use]
    pub fn availability_config(
        &self,
        key: &RunInstanceKey,
    ) -> Option<Arc<AvailabilitySettingsConfig>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .availability
            .get(key)
            .cloned()
    }

    /// Install new maps and return the previous ones.
    pub fn replace(
        &self,
        schedule: ScheduleConfigs,
        availability: AvailabilityConfigs,
    ) -> (ScheduleConfigs, AvailabilityConfigs) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(
            &mut *guard,
            Maps {
                schedule,
                availability,
            },
        );
        (previous.schedule, previous.availability)
    }
}

/// Keys present in `current` but not in `previous`, in key order.
#[must_use]
pub fn new_instance_keys<V>(
    current: &BTreeMap<RunInstanceKey, V>,
    previous: &BTreeMap<RunInstanceKey, V>,
) -> Vec<RunInstanceKey> {
    current
        .keys()
        .filter(|key| !previous.contains_key(key))
        .copied()
        .collect()
}
