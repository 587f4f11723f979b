//! Attribute names and their cross-category combinations.

use dispatch_core::{Attribute, AvailabilityAttribute};

/// Qualified attribute names, one group per configured category.
///
/// Each variant is rendered as `category:variant`, which is how attributes are
/// named in the store.
#[must_use]
pub fn attribute_names_by_category(categories: &[AvailabilityAttribute]) -> Vec<Vec<String>> {
    categories
        .iter()
        .map(|category| {
            category
                .variants
                .iter()
                .map(|variant| format!("{}:{variant}", category.name))
                .collect()
        })
        .collect()
}

/// Every way of picking one attribute from each group, in group order.
///
/// No groups yields a single empty combination; an empty group yields none.
#[must_use]
pub fn attribute_combinations(groups: &[Vec<Attribute>]) -> Vec<Vec<i64>> {
    groups.iter().fold(vec![Vec::new()], |combinations, group| {
        combinations
            .iter()
            .flat_map(|prefix| {
                group.iter().map(move |attribute| {
                    let mut combination = prefix.clone();
                    combination.push(attribute.id);
                    combination
                })
            })
            .collect()
    })
}
