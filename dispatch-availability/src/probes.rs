//! Probe set synthesis, reuse and injection.
//!
//! A probe set is the cross product of durations, canonical locations and
//! attribute combinations. Stored sets are compared by shape only so that a
//! set whose rows were reordered is still reused.

use std::collections::BTreeSet;

use dispatch_core::{
    AvailabilityVisit, AvailabilityVisitAttributes, AvailabilityVisitIdMap,
    SimpleAvailabilityVisit, TimeWindow, Visit, VisitPriority, VrpProblem,
};

use crate::AvailabilityError;

/// Acuity assigned to probe visits.
pub const DEFAULT_ACUITY_LEVEL: i64 = 2;

/// Highest unassigned priority level a visit may carry.
pub const MAX_UNASSIGNED_PRIORITY_LEVEL: u32 = 9;

/// Build the probe set for the given locations, combinations and durations.
///
/// Iterates durations, then locations, then combinations.
#[must_use]
pub fn generate_simple_availability_visits(
    location_ids: &[i64],
    combinations: &[Vec<i64>],
    durations_sec: &[i64],
) -> Vec<SimpleAvailabilityVisit> {
    durations_sec
        .iter()
        .flat_map(|duration_sec| {
            location_ids.iter().flat_map(move |location_id| {
                combinations
                    .iter()
                    .map(move |attribute_ids| SimpleAvailabilityVisit {
                        location_id: *location_id,
                        attribute_ids: attribute_ids.clone(),
                        duration_sec: *duration_sec,
                    })
            })
        })
        .collect()
}

/// Reduce stored probes to their defining shape.
#[must_use]
pub fn to_simple_availability_visits(
    visits: &[AvailabilityVisit],
    attributes: &AvailabilityVisitAttributes,
) -> Vec<SimpleAvailabilityVisit> {
    visits
        .iter()
        .map(|visit| SimpleAvailabilityVisit {
            location_id: visit.location_id,
            attribute_ids: attributes
                .get(&visit.id)
                .map(|attrs| attrs.iter().map(|attribute| attribute.id).collect())
                .unwrap_or_default(),
            duration_sec: visit.service_duration_sec,
        })
        .collect()
}

#[derive(PartialEq, Eq)]
struct ProbeShape {
    locations: BTreeSet<i64>,
    durations: BTreeSet<i64>,
    attribute_sets: BTreeSet<String>,
}

impl ProbeShape {
    fn of(visits: &[SimpleAvailabilityVisit]) -> Self {
        let mut shape = Self {
            locations: BTreeSet::new(),
            durations: BTreeSet::new(),
            attribute_sets: BTreeSet::new(),
        };
        for visit in visits {
            shape.locations.insert(visit.location_id);
            shape.durations.insert(visit.duration_sec);
            let mut ids = visit.attribute_ids.clone();
            ids.sort_unstable();
            shape.attribute_sets.insert(format!("{ids:?}"));
        }
        shape
    }
}

/// Whether two probe sets describe the same probes.
///
/// The sets must have the same length and the same distinct locations,
/// durations and attribute-id lists. Order is ignored throughout.
#[must_use]
pub fn are_equal_visits(
    left: &[SimpleAvailabilityVisit],
    right: &[SimpleAvailabilityVisit],
) -> bool {
    left.len() == right.len() && ProbeShape::of(left) == ProbeShape::of(right)
}

/// Inputs for [`build_availability_vrp_visits`].
#[derive(Debug, Clone, Copy)]
pub struct AvailabilityProbeParams<'a> {
    /// Stored probes.
    pub visits: &'a [AvailabilityVisit],
    /// Attributes of the stored probes.
    pub attributes: &'a AvailabilityVisitAttributes,
    /// Region open hours; probes may arrive at any time within them.
    pub open_hours: TimeWindow,
    /// Setup time added to every probe.
    pub extra_setup_duration_sec: i64,
    /// Whether the optimizer may drop probes without penalty.
    pub expendable: bool,
}

/// Turn stored probes into problem visits.
///
/// Probe visit ids are the negated stored ids; the returned map resolves
/// them back.
#[must_use]
pub fn build_availability_vrp_visits(
    params: AvailabilityProbeParams<'_>,
) -> (Vec<Visit>, AvailabilityVisitIdMap) {
    let mut id_map = AvailabilityVisitIdMap::new();
    let visits = params
        .visits
        .iter()
        .map(|visit| {
            let probe_id = -visit.id;
            id_map.insert(probe_id, visit.id);
            Visit {
                id: probe_id,
                location_id: visit.location_id,
                arrival_time_window: Some(params.open_hours),
                service_duration_sec: visit.service_duration_sec,
                extra_setup_duration_sec: params.extra_setup_duration_sec,
                required_attributes: params
                    .attributes
                    .get(&visit.id)
                    .map(|attrs| attrs.iter().map(|attribute| attribute.name.clone()).collect())
                    .unwrap_or_default(),
                overlap_set_key: Some(visit.visit_set_id.to_string()),
                is_expendable: params.expendable,
                priority: None,
                acuity_level: Some(DEFAULT_ACUITY_LEVEL),
            }
        })
        .collect();
    (visits, id_map)
}

/// Append probes to a problem, ranking every real visit above them.
///
/// Existing visits have their unassigned priority raised by one, capped at
/// [`MAX_UNASSIGNED_PRIORITY_LEVEL`]; visits without a priority get level 1.
/// Returns the probe ids in insertion order. The problem is left untouched
/// when a visit carries a level above the maximum.
///
/// # Errors
///
/// Returns [`AvailabilityError::InvalidPriority`] for a level above
/// [`MAX_UNASSIGNED_PRIORITY_LEVEL`].
pub fn add_availability_visits_to_problem(
    problem: &mut VrpProblem,
    probes: Vec<Visit>,
) -> Result<Vec<i64>, AvailabilityError> {
    let visits = &mut problem.description.visits;
    if let Some((visit_id, level)) = visits.iter().find_map(|visit| {
        visit
            .priority
            .filter(|priority| priority.unassigned_priority_level > MAX_UNASSIGNED_PRIORITY_LEVEL)
            .map(|priority| (visit.id, priority.unassigned_priority_level))
    }) {
        return Err(AvailabilityError::InvalidPriority { visit_id, level });
    }

    for visit in visits.iter_mut() {
        let level = visit
            .priority
            .map_or(1, |priority| {
                (priority.unassigned_priority_level + 1).min(MAX_UNASSIGNED_PRIORITY_LEVEL)
            });
        visit.priority = Some(VisitPriority {
            unassigned_priority_level: level,
        });
    }

    let probe_ids = probes.iter().map(|probe| probe.id).collect();
    visits.extend(probes);
    Ok(probe_ids)
}
