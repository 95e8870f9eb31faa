//! Population-vector rebalancing of existing control totals
//!
//! Each zone falls in one of three classes:
//!
//! - A: base population > 0 and forecast > 0. Every column is scaled by
//!   `forecast / base`.
//! - B: base population = 0 and forecast > 0. Total population is copied from
//!   the forecast. Every other column is set to forecast times the group's
//!   mean ratio, computed over class-A zones from base values. If the group
//!   has no class-A zone, the region-wide ratio is used.
//! - C: forecast = 0. Every column is set to zero.
//!
//! Zone values are truncated to non-negative integers, and the group and
//! region tables are rebuilt from them.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::config::PopSynConfig;
use crate::controls::{ControlTable, ControlTotals, GeoKey, GeographyLevel};
use crate::error::{PopSynError, Result};
use crate::zones::ZoneHierarchy;

/// Forecast population by zone. Zones not listed have a forecast of zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationVector {
    targets: BTreeMap<u32, f64>,
}

impl PopulationVector {
    pub fn new(targets: BTreeMap<u32, f64>) -> Result<Self> {
        if let Some((zone, value)) = targets.iter().find(|(_, v)| !v.is_finite() || **v < 0.0) {
            return Err(PopSynError::config(format!(
                "population vector value {value} for zone {zone} is not a non-negative number"
            )));
        }
        Ok(Self { targets })
    }

    /// Build from `(zone, population)` pairs; a repeated zone is an error
    pub fn from_pairs<I: IntoIterator<Item = (u32, f64)>>(pairs: I) -> Result<Self> {
        let mut targets = BTreeMap::new();
        for (zone, population) in pairs {
            if targets.insert(zone, population).is_some() {
                return Err(PopSynError::config(format!(
                    "population vector lists zone {zone} more than once"
                )));
            }
        }
        Self::new(targets)
    }

    pub fn get(&self, zone: u32) -> Option<f64> {
        self.targets.get(&zone).copied()
    }

    pub fn zones(&self) -> impl Iterator<Item = u32> + '_ {
        self.targets.keys().copied()
    }

    pub fn total(&self) -> f64 {
        self.targets.values().sum()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}


/// Columns the rebalancer rescales
#[derive(Debug, Clone)]
pub struct RebalanceColumns {
    pub total_population: String,
    pub total_households: String,
    pub person: Vec<String>,
    pub household: Vec<String>,
}

impl RebalanceColumns {
    pub fn from_config(config: &PopSynConfig) -> Self {
        Self {
            total_population: config.total_population_column_name.clone(),
            total_households: config.total_households_column_name.clone(),
            person: config.person_control_columns(),
            household: config.household_control_columns(),
        }
    }

    /// Person then household columns, without duplicates
    pub fn all(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.person
            .iter()
            .chain(&self.household)
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }
}

/// Zones per class after rebalancing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceSummary {
    pub scaled: usize,
    pub imputed: usize,
    pub zeroed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZoneClass {
    Scaled,
    Imputed,
    Zeroed,
}

/// Running sums over class-A zones for mean-ratio imputation
struct RatioPool {
    columns: Vec<f64>,
    population: f64,
}

impl RatioPool {
    fn new(width: usize) -> Self {
        Self {
            columns: vec![0.0; width],
            population: 0.0,
        }
    }

    fn add(&mut self, values: &[f64], population: f64) {
        for (acc, v) in self.columns.iter_mut().zip(values) {
            *acc += v;
        }
        self.population += population;
    }

    fn ratio(&self, idx: usize) -> f64 {
        self.columns[idx] / self.population
    }
}

/// Rescale base control totals to match a population forecast.
///
/// The result holds only the configured columns, with zone values truncated
/// to non-negative integers and upper levels recomputed from them.
pub fn apply_population_vector(
    base: &ControlTotals,
    hierarchy: &ZoneHierarchy,
    vector: &PopulationVector,
    columns: &RebalanceColumns,
) -> Result<(ControlTotals, RebalanceSummary)> {
    let names = columns.all();
    if !names.contains(&columns.total_population) {
        return Err(PopSynError::config(format!(
            "total population column `{}` must be one of the rebalanced columns",
            columns.total_population
        )));
    }
    if !names.contains(&columns.total_households) {
        warn!(
            "Total households column `{}` is not rebalanced; it is left out of the output",
            columns.total_households
        );
    }
    let base_idx = names
        .iter()
        .map(|name| base.zone.require_column(name))
        .collect::<Result<Vec<usize>>>()?;
    for name in &names {
        base.group.require_column(name)?;
    }
    let pop = names
        .iter()
        .position(|c| c == &columns.total_population)
        .unwrap_or_default();

    // Base values by zone, restricted to the configured columns
    let mut base_rows: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for row in base.zone.rows() {
        let zone = row.key.zone.ok_or_else(|| {
            PopSynError::config(format!("zone control row {} has no zone id", row.key))
        })?;
        hierarchy.resolve(zone, "base control totals")?;
        let values = base_idx.iter().map(|&i| row.values[i]).collect();
        if base_rows.insert(zone, values).is_some() {
            return Err(PopSynError::config(format!(
                "zone {zone} appears more than once in the base control totals"
            )));
        }
    }
    for zone in vector.zones() {
        hierarchy.resolve(zone, "population vector")?;
    }

    let zones: BTreeSet<u32> = base_rows.keys().copied().chain(vector.zones()).collect();
    let zeros = vec![0.0; names.len()];

    let classify = |zone: u32| {
        let base_pop = base_rows.get(&zone).map_or(0.0, |v| v[pop]);
        let forecast = vector.get(zone).unwrap_or(0.0);
        if forecast <= 0.0 {
            ZoneClass::Zeroed
        } else if base_pop > 0.0 {
            ZoneClass::Scaled
        } else {
            ZoneClass::Imputed
        }
    };

    let mut group_pools: BTreeMap<u32, RatioPool> = BTreeMap::new();
    let mut region_pool = RatioPool::new(names.len());
    for &zone in &zones {
        if classify(zone) != ZoneClass::Scaled {
            continue;
        }
        let values = &base_rows[&zone];
        let group = hierarchy.resolve(zone, "population vector")?.group;
        group_pools
            .entry(group)
            .or_insert_with(|| RatioPool::new(names.len()))
            .add(values, values[pop]);
        region_pool.add(values, values[pop]);
    }

    let mut summary = RebalanceSummary::default();
    let mut rows: Vec<(GeoKey, Vec<f64>)> = Vec::with_capacity(zones.len());
    for &zone in &zones {
        let info = hierarchy.resolve(zone, "population vector")?;
        let original = base_rows.get(&zone).unwrap_or(&zeros);
        let forecast = vector.get(zone).unwrap_or(0.0);

        let values = match classify(zone) {
            ZoneClass::Scaled => {
                summary.scaled += 1;
                let ratio = forecast / original[pop];
                original.iter().map(|v| v * ratio).collect()
            }
            ZoneClass::Imputed => {
                summary.imputed += 1;
                let pool = match group_pools.get(&info.group) {
                    Some(pool) => pool,
                    None if region_pool.population > 0.0 => {
                        warn!(
                            "Group {} has no zone with base population; using region-wide ratios for zone {}",
                            info.group, zone
                        );
                        &region_pool
                    }
                    None => {
                        return Err(PopSynError::InsufficientData {
                            column: columns.total_population.clone(),
                            stratum: format!("region {}", hierarchy.region()),
                        })
                    }
                };
                (0..names.len())
                    .map(|idx| {
                        if idx == pop {
                            forecast
                        } else {
                            forecast * pool.ratio(idx)
                        }
                    })
                    .collect()
            }
            ZoneClass::Zeroed => {
                summary.zeroed += 1;
                zeros.clone()
            }
        };
        rows.push((GeoKey::zone(hierarchy.region(), info.group, zone), values));
    }

    rows.sort_by_key(|(key, _)| (key.group, key.zone));
    let mut table = ControlTable::new(GeographyLevel::Zone, names);
    for (key, values) in rows {
        table.push(key, values)?;
    }

    let totals = ControlTotals::from_zone_table(table).into_integral();
    debug!(
        "Rebalanced {} zones into {} groups",
        totals.zone.len(),
        totals.group.len()
    );
    info!(
        "Population vector applied: {} scaled, {} imputed, {} zeroed (forecast total {:.0})",
        summary.scaled,
        summary.imputed,
        summary.zeroed,
        vector.total()
    );
    Ok((totals, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ZoneRecord;
    use crate::zones::{GeographyGroups, ZoneRanges};

    // zones 1-3 in group 1, zones 4-5 in group 2
    fn hierarchy() -> ZoneHierarchy {
        let records: Vec<ZoneRecord> = [(1, 1), (2, 1), (3, 1), (4, 2), (5, 2)]
            .into_iter()
            .map(|(zone, district)| ZoneRecord { zone, district })
            .collect();
        ZoneHierarchy::build(
            &records,
            &GeographyGroups::new(&[[1, 1], [2, 2]]).unwrap(),
            &ZoneRanges::new("ZoneRanges", &[[1, 5999]]).unwrap(),
            1,
        )
        .unwrap()
    }

    fn columns() -> RebalanceColumns {
        RebalanceColumns {
            total_population: "totpop".to_string(),
            total_households: "totalhh".to_string(),
            person: vec!["totpop".to_string(), "male".to_string()],
            household: vec!["totalhh".to_string()],
        }
    }

    /// Base zone table with columns totalhh, totpop, male, extra
    fn base(rows: &[(u32, u32, [f64; 4])]) -> ControlTotals {
        let mut table = ControlTable::new(
            GeographyLevel::Zone,
            ["totalhh", "totpop", "male", "extra"].map(String::from).to_vec(),
        );
        for &(group, zone, values) in rows {
            table.push(GeoKey::zone(1, group, zone), values.to_vec()).unwrap();
        }
        ControlTotals::from_zone_table(table)
    }

    fn vector(pairs: &[(u32, f64)]) -> PopulationVector {
        PopulationVector::from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn test_class_a_scales_by_ratio() {
        let base = base(&[(1, 1, [40.0, 100.0, 48.0, 7.0])]);
        let (out, summary) =
            apply_population_vector(&base, &hierarchy(), &vector(&[(1, 150.0)]), &columns()).unwrap();

        assert_eq!(summary, RebalanceSummary { scaled: 1, imputed: 0, zeroed: 0 });
        assert_eq!(out.zone.columns(), &["totpop", "male", "totalhh"].map(String::from));
        let key = GeoKey::zone(1, 1, 1);
        assert_eq!(out.zone.value(&key, "totpop"), Some(150.0));
        assert_eq!(out.zone.value(&key, "male"), Some(72.0));
        assert_eq!(out.zone.value(&key, "totalhh"), Some(60.0));
        assert_eq!(out.zone.value(&key, "extra"), None);
    }

    #[test]
    fn test_class_a_truncates() {
        let base = base(&[(1, 1, [3.0, 10.0, 5.0, 0.0])]);
        let (out, _) =
            apply_population_vector(&base, &hierarchy(), &vector(&[(1, 13.0)]), &columns()).unwrap();
        let key = GeoKey::zone(1, 1, 1);
        // 3 * 1.3 = 3.9 and 5 * 1.3 = 6.5 truncate toward zero
        assert_eq!(out.zone.value(&key, "totalhh"), Some(3.0));
        assert_eq!(out.zone.value(&key, "male"), Some(6.0));
    }

    #[test]
    fn test_class_c_zeroes_everything() {
        let base = base(&[(1, 1, [40.0, 100.0, 48.0, 7.0]), (1, 2, [10.0, 20.0, 9.0, 1.0])]);
        let (out, summary) =
            apply_population_vector(&base, &hierarchy(), &vector(&[(1, 100.0), (2, 0.0)]), &columns())
                .unwrap();
        assert_eq!(summary.zeroed, 1);
        let row = out.zone.row(&GeoKey::zone(1, 1, 2)).unwrap();
        assert!(row.values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_zone_missing_from_forecast_is_zeroed() {
        let base = base(&[(1, 1, [40.0, 100.0, 48.0, 7.0]), (1, 2, [10.0, 20.0, 9.0, 1.0])]);
        let (out, summary) =
            apply_population_vector(&base, &hierarchy(), &vector(&[(1, 100.0)]), &columns()).unwrap();
        assert_eq!(summary.zeroed, 1);
        assert_eq!(out.zone.value(&GeoKey::zone(1, 1, 2), "totpop"), Some(0.0));
    }

    #[test]
    fn test_class_b_uses_group_mean_ratio() {
        // group 1 class-A zones: totpop 100 + 100, male 40 + 60, totalhh 50 + 30
        let base = base(&[
            (1, 1, [50.0, 100.0, 40.0, 0.0]),
            (1, 2, [30.0, 100.0, 60.0, 0.0]),
            (1, 3, [0.0, 0.0, 0.0, 0.0]),
            (2, 4, [10.0, 100.0, 10.0, 0.0]),
        ]);
        let forecast = vector(&[(1, 100.0), (2, 100.0), (3, 200.0), (4, 100.0)]);
        let (out, summary) = apply_population_vector(&base, &hierarchy(), &forecast, &columns()).unwrap();

        assert_eq!(summary, RebalanceSummary { scaled: 3, imputed: 1, zeroed: 0 });
        let key = GeoKey::zone(1, 1, 3);
        assert_eq!(out.zone.value(&key, "totpop"), Some(200.0));
        assert_eq!(out.zone.value(&key, "male"), Some(100.0)); // 200 * 100/200
        assert_eq!(out.zone.value(&key, "totalhh"), Some(80.0)); // 200 * 80/200
    }

    #[test]
    fn test_forecast_only_zone_is_imputed() {
        // zone 5 is in the hierarchy (group 2) but absent from the base table;
        // group 2 has no class-A zone so the region-wide ratio applies
        let base = base(&[(1, 1, [50.0, 100.0, 40.0, 0.0])]);
        let forecast = vector(&[(1, 100.0), (5, 50.0)]);
        let (out, summary) = apply_population_vector(&base, &hierarchy(), &forecast, &columns()).unwrap();

        assert_eq!(summary.imputed, 1);
        let key = GeoKey::zone(1, 2, 5);
        assert_eq!(out.zone.value(&key, "totpop"), Some(50.0));
        assert_eq!(out.zone.value(&key, "male"), Some(20.0));
        assert_eq!(out.zone.value(&key, "totalhh"), Some(25.0));
    }

    #[test]
    fn test_no_class_a_zone_is_insufficient_data() {
        let base = base(&[(1, 1, [0.0, 0.0, 0.0, 0.0])]);
        let err = apply_population_vector(&base, &hierarchy(), &vector(&[(1, 10.0)]), &columns())
            .unwrap_err();
        assert!(matches!(err, PopSynError::InsufficientData { .. }));
    }

    #[test]
    fn test_unknown_forecast_zone_rejected() {
        let base = base(&[(1, 1, [1.0, 1.0, 1.0, 0.0])]);
        let err = apply_population_vector(&base, &hierarchy(), &vector(&[(99, 10.0)]), &columns())
            .unwrap_err();
        assert!(matches!(err, PopSynError::UnknownZone { zone: 99, .. }));
    }

    #[test]
    fn test_missing_column_fails_before_processing() {
        let base = base(&[(1, 1, [1.0, 1.0, 1.0, 0.0])]);
        let mut cols = columns();
        cols.person.push("female".to_string());
        let err = apply_population_vector(&base, &hierarchy(), &vector(&[(1, 10.0)]), &cols)
            .unwrap_err();
        assert!(matches!(err, PopSynError::Configuration(_)));

        let mut cols = columns();
        cols.person.retain(|c| c != "totpop");
        assert!(apply_population_vector(&base, &hierarchy(), &vector(&[(1, 10.0)]), &cols).is_err());
    }

    #[test]
    fn test_column_missing_from_group_table() {
        let mut base = base(&[(1, 1, [40.0, 100.0, 48.0, 7.0])]);
        let mut group = ControlTable::new(
            GeographyLevel::Group,
            ["totalhh", "totpop", "extra"].map(String::from).to_vec(),
        );
        group.push(GeoKey::group(1, 1), vec![40.0, 100.0, 7.0]).unwrap();
        base.group = group;

        let err = apply_population_vector(&base, &hierarchy(), &vector(&[(1, 150.0)]), &columns())
            .unwrap_err();
        match err {
            PopSynError::Configuration(msg) => assert!(msg.contains("male"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_base_zone_outside_hierarchy_rejected() {
        let base = base(&[(1, 1, [40.0, 100.0, 48.0, 7.0]), (1, 42, [1.0, 2.0, 1.0, 0.0])]);
        let err = apply_population_vector(&base, &hierarchy(), &vector(&[(1, 150.0)]), &columns())
            .unwrap_err();
        assert!(matches!(err, PopSynError::UnknownZone { zone: 42, .. }));
    }

    #[test]
    fn test_population_vector_rejects_bad_values() {
        assert!(matches!(
            PopulationVector::from_pairs([(1, 10.0), (2, -1.0)]),
            Err(PopSynError::Configuration(_))
        ));
        assert!(PopulationVector::from_pairs([(1, f64::NAN)]).is_err());
        assert!(PopulationVector::from_pairs([(1, 10.0), (1, 12.0)]).is_err());

        let vector = PopulationVector::from_pairs([(3, 5.0), (1, 0.0)]).unwrap();
        assert_eq!(vector.len(), 2);
        assert_eq!(vector.total(), 5.0);
        assert_eq!(vector.zones().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_upper_levels_recomputed() {
        let base = base(&[
            (1, 1, [50.0, 100.0, 40.0, 0.0]),
            (1, 2, [30.0, 100.0, 60.0, 0.0]),
            (2, 4, [10.0, 100.0, 10.0, 0.0]),
        ]);
        let forecast = vector(&[(1, 150.0), (2, 50.0), (4, 300.0)]);
        let (out, _) = apply_population_vector(&base, &hierarchy(), &forecast, &columns()).unwrap();

        assert!(out.verify(0.0).is_ok());
        assert_eq!(out.group.value(&GeoKey::group(1, 1), "totpop"), Some(200.0));
        assert_eq!(out.region.value(&GeoKey::region(1), "totpop"), Some(500.0));
    }
}
