//! Weighted aggregation of the seed population into control totals

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::PopSynConfig;
use crate::controls::{
    AttributeSource, ControlSchema, ControlTable, ControlTotals, GeoKey, GeographyLevel,
};
use crate::error::{PopSynError, Result};
use crate::seed::SeedPopulation;
use crate::zones::{EmploymentZones, ZoneHierarchy};

#[derive(Debug, Clone)]
pub struct AggregationOptions {
    /// Drop zones with zero person and zero household weight
    pub drop_empty_zones: bool,
    /// Relative tolerance of the roll-up consistency check
    pub tolerance: f64,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            drop_empty_zones: false,
            tolerance: 1e-6,
        }
    }
}

impl AggregationOptions {
    pub fn from_config(config: &PopSynConfig) -> Self {
        Self {
            drop_empty_zones: config.drop_empty_zones,
            tolerance: config.consistency_tolerance,
        }
    }
}

/// Per-zone accumulator: one sum per schema column plus the raw weights
struct ZoneSums {
    values: Vec<f64>,
    person_weight: f64,
    household_weight: f64,
}

/// Sum seed weights per zone for every schema column and roll the result up
/// to the group and region levels.
///
/// Every hierarchy zone gets a row, even when nothing lives there, unless
/// `drop_empty_zones` is set. The returned tables pass `verify`.
pub fn build_control_totals(
    seed: &SeedPopulation,
    hierarchy: &ZoneHierarchy,
    schema: &ControlSchema,
    employment: &EmploymentZones,
    options: &AggregationOptions,
) -> Result<ControlTotals> {
    schema.validate_columns(seed.columns())?;

    let width = schema.len();
    let mut sums: BTreeMap<u32, ZoneSums> = hierarchy
        .zones()
        .into_iter()
        .map(|info| {
            (
                info.zone,
                ZoneSums {
                    values: vec![0.0; width],
                    person_weight: 0.0,
                    household_weight: 0.0,
                },
            )
        })
        .collect();

    let household_attrs: Vec<(usize, _)> = schema
        .attributes()
        .iter()
        .enumerate()
        .filter_map(|(idx, a)| match &a.source {
            AttributeSource::Household(p) => Some((idx, p)),
            AttributeSource::Person(_) => None,
        })
        .collect();
    let person_attrs: Vec<(usize, _)> = schema
        .attributes()
        .iter()
        .enumerate()
        .filter_map(|(idx, a)| match &a.source {
            AttributeSource::Person(p) => Some((idx, p)),
            AttributeSource::Household(_) => None,
        })
        .collect();

    for household in seed.households() {
        let origin = format!("household {}", household.household_id);
        let zone = hierarchy.resolve(household.household_zone, &origin)?.zone;
        let acc = sums.get_mut(&zone).ok_or_else(|| PopSynError::UnknownZone {
            zone,
            origin: origin.clone(),
        })?;
        let weight = household.weight();
        acc.household_weight += weight;
        for (idx, predicate) in &household_attrs {
            if predicate.matches(household) {
                acc.values[*idx] += weight;
            }
        }
    }

    let person_zones = seed.person_zones()?;
    for (person, zone) in seed.persons().iter().zip(person_zones) {
        let info = hierarchy.resolve(zone, &format!("household {}", person.household_id))?;
        let acc = sums.get_mut(&info.zone).ok_or_else(|| PopSynError::UnknownZone {
            zone,
            origin: format!("household {}", person.household_id),
        })?;
        let weight = person.weight();
        acc.person_weight += weight;
        for (idx, predicate) in &person_attrs {
            if predicate.matches(person, employment) {
                acc.values[*idx] += weight;
            }
        }
    }

    let mut table = ControlTable::new(GeographyLevel::Zone, schema.names());
    let mut dropped = 0usize;
    for info in hierarchy.zones() {
        let Some(acc) = sums.remove(&info.zone) else {
            continue;
        };
        if options.drop_empty_zones && acc.person_weight == 0.0 && acc.household_weight == 0.0 {
            dropped += 1;
            continue;
        }
        table.push(GeoKey::zone(hierarchy.region(), info.group, info.zone), acc.values)?;
    }
    if dropped > 0 {
        debug!("Dropped {} empty zones", dropped);
    }

    let totals = ControlTotals::from_zone_table(table);
    totals.verify(options.tolerance)?;

    info!(
        "Built control totals: {} zones, {} groups, {} columns",
        totals.zone.len(),
        totals.group.len(),
        width
    );
    Ok(totals)
}
