//! Probe sets and the attributes attached to them.

use std::collections::BTreeMap;

use dispatch_core::{
    Attribute, AvailabilityVisit, AvailabilityVisitAttributes, SimpleAvailabilityVisit,
    StoreError,
};
use rusqlite::{Connection, OptionalExtension, params};

use super::backend;

fn attribute_by_name(connection: &Connection, name: &str) -> Result<Option<Attribute>, StoreError> {
    connection
        .query_row(
            "SELECT id, name FROM attributes WHERE name = ?1",
            [name],
            |row| {
                Ok(Attribute {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(backend("query attribute"))
}

pub(super) fn ensure_attributes(
    connection: &mut Connection,
    names: &[String],
) -> Result<Vec<Attribute>, StoreError> {
    if let Some(blank) = names.iter().find(|name| name.trim().is_empty()) {
        return Err(StoreError::InvalidData {
            message: format!("attribute name {blank:?} is blank"),
        });
    }
    let transaction = connection
        .transaction()
        .map_err(backend("begin attribute transaction"))?;
    let mut attributes = Vec::with_capacity(names.len());
    for name in names {
        transaction
            .execute("INSERT OR IGNORE INTO attributes (name) VALUES (?1)", [name])
            .map_err(backend("insert attribute"))?;
        attributes.extend(attribute_by_name(&transaction, name)?);
    }
    transaction
        .commit()
        .map_err(backend("commit attribute transaction"))?;
    Ok(attributes)
}

pub(super) fn attributes_for_names(
    connection: &mut Connection,
    names: &[String],
) -> Result<Vec<Attribute>, StoreError> {
    let mut attributes = Vec::with_capacity(names.len());
    for name in names {
        attributes.extend(attribute_by_name(connection, name)?);
    }
    Ok(attributes)
}

pub(super) fn latest_availability_visits(
    connection: &mut Connection,
    service_region_id: i64,
) -> Result<Vec<AvailabilityVisit>, StoreError> {
    let mut statement = connection
        .prepare(
            "SELECT id, visit_set_id, service_region_id, location_id, service_duration_sec
                FROM availability_visits
                WHERE visit_set_id = (
                    SELECT MAX(id) FROM availability_visit_sets WHERE service_region_id = ?1
                )
                ORDER BY id",
        )
        .map_err(backend("prepare availability visit query"))?;
    let rows = statement
        .query_map([service_region_id], |row| {
            Ok(AvailabilityVisit {
                id: row.get(0)?,
                visit_set_id: row.get(1)?,
                service_region_id: row.get(2)?,
                location_id: row.get(3)?,
                service_duration_sec: row.get(4)?,
            })
        })
        .map_err(backend("query availability visits"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(backend("read availability visit"))
}

/// Every requested id maps to its attributes, ordered by attribute id; ids with
/// no stored attributes map to an empty list.
pub(super) fn availability_visit_attributes(
    connection: &mut Connection,
    visit_ids: &[i64],
) -> Result<AvailabilityVisitAttributes, StoreError> {
    let mut statement = connection
        .prepare(
            "SELECT a.id, a.name FROM availability_visit_attributes va
                JOIN attributes a ON a.id = va.attribute_id
                WHERE va.availability_visit_id = ?1
                ORDER BY a.id",
        )
        .map_err(backend("prepare visit attribute query"))?;
    let mut attributes = BTreeMap::new();
    for visit_id in visit_ids {
        let rows = statement
            .query_map([visit_id], |row| {
                Ok(Attribute {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(backend("query visit attributes"))?;
        let found = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend("read visit attribute"))?;
        attributes.insert(*visit_id, found);
    }
    Ok(attributes)
}

pub(super) fn add_availability_visits(
    connection: &mut Connection,
    service_region_id: i64,
    visits: &[SimpleAvailabilityVisit],
) -> Result<Vec<AvailabilityVisit>, StoreError> {
    let transaction = connection
        .transaction()
        .map_err(backend("begin availability transaction"))?;
    transaction
        .execute(
            "INSERT INTO availability_visit_sets (service_region_id) VALUES (?1)",
            [service_region_id],
        )
        .map_err(backend("insert availability visit set"))?;
    let visit_set_id = transaction.last_insert_rowid();

    let mut stored = Vec::with_capacity(visits.len());
    for visit in visits {
        transaction
            .execute(
                "INSERT INTO availability_visits (
                    visit_set_id, service_region_id, location_id, service_duration_sec
                ) VALUES (?1, ?2, ?3, ?4)",
                params![
                    visit_set_id,
                    service_region_id,
                    visit.location_id,
                    visit.duration_sec
                ],
            )
            .map_err(backend("insert availability visit"))?;
        let id = transaction.last_insert_rowid();
        for attribute_id in &visit.attribute_ids {
            transaction
                .execute(
                    "INSERT OR IGNORE INTO availability_visit_attributes (
                        availability_visit_id, attribute_id
                    ) VALUES (?1, ?2)",
                    params![id, attribute_id],
                )
                .map_err(backend("link availability visit attribute"))?;
        }
        stored.push(AvailabilityVisit {
            id,
            visit_set_id,
            service_region_id,
            location_id: visit.location_id,
            service_duration_sec: visit.duration_sec,
        });
    }
    transaction
        .commit()
        .map_err(backend("commit availability transaction"))?;
    Ok(stored)
}
