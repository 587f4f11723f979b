//! Region availability derived from the latest availability schedule.

use std::collections::{BTreeMap, BTreeSet};

use dispatch_core::{AvailabilityVisit, CheckFeasibilityDiagnostics};

/// Availability of a region for one probe configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityStatus {
    /// Every matching probe was placed.
    Available,
    /// Some matching probes were placed.
    PartiallyAvailable,
    /// No matching probe was placed, or real visits were displaced.
    Unavailable,
}

/// Probe placement read back from one stored availability schedule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceRegionAvailabilityResult {
    /// Probes on a route.
    pub assigned_visits: Vec<AvailabilityVisit>,
    /// Probes left unassigned.
    pub unassigned_visits: Vec<AvailabilityVisit>,
    /// Attribute names of each probe, keyed by stored probe id.
    pub visit_attributes: BTreeMap<i64, BTreeSet<String>>,
    /// Diagnostics of the schedule the probes were solved against.
    pub schedule_diagnostics: Option<CheckFeasibilityDiagnostics>,
}

/// Status of each result, filtered by the required attribute sets.
///
/// With no sets every probe counts. Otherwise a probe counts once for each
/// set whose attributes it carries; probes without attribute data never
/// count.
#[must_use]
pub fn availability_statuses(
    results: &[ServiceRegionAvailabilityResult],
    required_attribute_sets: &[Vec<String>],
) -> Vec<AvailabilityStatus> {
    results
        .iter()
        .map(|result| {
            let assigned = matching_count(
                &result.assigned_visits,
                &result.visit_attributes,
                required_attribute_sets,
            );
            let unassigned = matching_count(
                &result.unassigned_visits,
                &result.visit_attributes,
                required_attribute_sets,
            );
            let displaced_real_visits = result
                .schedule_diagnostics
                .is_some_and(|diagnostics| diagnostics.unassigned_visits_diff > 0);

            if displaced_real_visits {
                AvailabilityStatus::Unavailable
            } else if assigned > 0 && unassigned == 0 {
                AvailabilityStatus::Available
            } else if assigned > 0 && unassigned > 0 {
                AvailabilityStatus::PartiallyAvailable
            } else {
                AvailabilityStatus::Unavailable
            }
        })
        .collect()
}

fn matching_count(
    visits: &[AvailabilityVisit],
    attributes: &BTreeMap<i64, BTreeSet<String>>,
    required_attribute_sets: &[Vec<String>],
) -> usize {
    if required_attribute_sets.is_empty() {
        return visits.len();
    }
    required_attribute_sets
        .iter()
        .map(|required| {
            visits
                .iter()
                .filter(|visit| {
                    attributes.get(&visit.id).is_some_and(|names| {
                        required.iter().all(|name| names.contains(name))
                    })
                })
                .count()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn probe(id: i64) -> AvailabilityVisit {
        AvailabilityVisit {
            id,
            visit_set_id: 1,
            service_region_id: 1,
            location_id: 1,
            service_duration_sec: 1_800,
        }
    }

    fn result(
        assigned: &[i64],
        unassigned: &[i64],
        diff: Option<i64>,
    ) -> ServiceRegionAvailabilityResult {
        let attributes = assigned
            .iter()
            .chain(unassigned)
            .map(|id| {
                let name = if id.rem_euclid(2) == 0 {
                    "service_name:acute"
                } else {
                    "service_name:bridge"
                };
                (*id, BTreeSet::from([name.to_owned()]))
            })
            .collect();
        ServiceRegionAvailabilityResult {
            assigned_visits: assigned.iter().copied().map(probe).collect(),
            unassigned_visits: unassigned.iter().copied().map(probe).collect(),
            visit_attributes: attributes,
            schedule_diagnostics: diff.map(|unassigned_visits_diff| CheckFeasibilityDiagnostics {
                schedule_id: Some(1),
                unassigned_visits_diff,
            }),
        }
    }

    #[rstest]
    #[case::all_assigned(result(&[1, 2], &[], None), AvailabilityStatus::Available)]
    #[case::mixed(result(&[1], &[2], None), AvailabilityStatus::PartiallyAvailable)]
    #[case::none_assigned(result(&[], &[1, 2], None), AvailabilityStatus::Unavailable)]
    #[case::empty(result(&[], &[], None), AvailabilityStatus::Unavailable)]
    #[case::displaced_visits(result(&[1, 2], &[], Some(1)), AvailabilityStatus::Unavailable)]
    #[case::no_displacement(result(&[1, 2], &[], Some(0)), AvailabilityStatus::Available)]
    fn derives_status_without_filter(
        #[case] input: ServiceRegionAvailabilityResult,
        #[case] expected: AvailabilityStatus,
    ) {
        assert_eq!(availability_statuses(&[input], &[]), vec![expected]);
    }

    #[rstest]
    fn filter_counts_only_matching_probes() {
        // Even ids are acute; the unassigned bridge probe is ignored.
        let input = result(&[2, 4], &[3], None);
        let acute = vec![vec!["service_name:acute".to_owned()]];
        assert_eq!(
            availability_statuses(&[input.clone()], &acute),
            vec![AvailabilityStatus::Available]
        );
        let bridge = vec![vec!["service_name:bridge".to_owned()]];
        assert_eq!(
            availability_statuses(&[input], &bridge),
            vec![AvailabilityStatus::Unavailable]
        );
    }

    #[rstest]
    fn probes_without_attributes_are_dropped_by_filters() {
        let mut input = result(&[2], &[], None);
        input.visit_attributes.clear();
        let acute = vec![vec!["service_name:acute".to_owned()]];
        assert_eq!(
            availability_statuses(&[input], &acute),
            vec![AvailabilityStatus::Unavailable]
        );
    }
}
