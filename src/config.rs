//! Run configuration
//!
//! Read once from a JSON file with PascalCase keys, validated, then handed
//! to each component by reference. Nothing mutates it after `load`.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::controls::ControlSchema;
use crate::error::{PopSynError, Result};
use crate::zones::{EmploymentZones, GeographyGroups, ZoneRanges};

/// Inclusive `[start, end]` pair as written in the config file
pub type RangePair = [u32; 2];

/// Default internal zone range (1..=5999)
pub const INTERNAL_ZONE_RANGE: RangePair = [1, 5999];
/// Default external zone range (6000..=8886)
pub const EXTERNAL_ZONE_RANGE: RangePair = [6000, 8886];
/// Employment zone used for persons without a fixed work place
pub const ROAMING_ZONE_ID: u32 = 8888;

/// Default age bins, inclusive on both ends
pub const AGE_BINS: [RangePair; 9] = [
    [0, 4],
    [5, 10],
    [11, 15],
    [16, 25],
    [26, 35],
    [36, 45],
    [46, 55],
    [56, 64],
    [65, 200],
];

/// Value remapping applied to the processed seed files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CategoryMapping {
    /// Person column name -> (seed value -> output value)
    #[serde(default)]
    pub persons: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PopSynConfig {
    /// Zone geography CSV (`Zone`, `PD`)
    pub zones: PathBuf,
    pub households_seed_file: PathBuf,
    pub persons_seed_file: PathBuf,
    #[serde(default = "default_output_folder")]
    pub output_folder: PathBuf,

    /// District ranges defining the intermediate groups, in group order.
    /// Kept as raw lists so a missing or misshapen entry is reported by
    /// `validate` against this key.
    #[serde(default)]
    pub pd_groups: Vec<Vec<u32>>,
    #[serde(default = "default_zone_ranges")]
    pub zone_ranges: Vec<RangePair>,
    #[serde(default = "default_external_zone_ranges")]
    pub external_zone_ranges: Vec<RangePair>,
    #[serde(default = "default_roaming_zone")]
    pub roaming_zone: u32,
    #[serde(default = "default_region_id")]
    pub region_id: u32,
    #[serde(default = "default_age_bins")]
    pub age_bins: Vec<RangePair>,

    #[serde(default = "default_maz_controls")]
    pub maz_level_controls: String,
    #[serde(default = "default_taz_controls")]
    pub taz_level_controls: String,
    #[serde(default = "default_meta_controls")]
    pub meta_level_controls: String,
    #[serde(default = "default_processed_households")]
    pub processed_households_seed_file: String,
    #[serde(default = "default_processed_persons")]
    pub processed_persons_seed_file: String,

    #[serde(default)]
    pub drop_control_columns: Vec<String>,
    /// Drop zones with neither population nor households from the outputs
    #[serde(default)]
    pub drop_empty_zones: bool,

    #[serde(default = "default_total_population")]
    pub total_population_column_name: String,
    #[serde(default = "default_total_households")]
    pub total_households_column_name: String,
    /// Person columns rescaled by the population vector
    #[serde(default)]
    pub person_control_columns: Option<Vec<String>>,
    /// Household columns rescaled by the population vector
    #[serde(default)]
    pub household_control_columns: Option<Vec<String>>,

    #[serde(default)]
    pub category_mapping: CategoryMapping,
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default = "default_tolerance")]
    pub consistency_tolerance: f64,
}

fn default_output_folder() -> PathBuf {
    PathBuf::from("output")
}
fn default_zone_ranges() -> Vec<RangePair> {
    vec![INTERNAL_ZONE_RANGE]
}
fn default_external_zone_ranges() -> Vec<RangePair> {
    vec![EXTERNAL_ZONE_RANGE]
}
fn default_roaming_zone() -> u32 {
    ROAMING_ZONE_ID
}
fn default_region_id() -> u32 {
    1
}
fn default_age_bins() -> Vec<RangePair> {
    AGE_BINS.to_vec()
}
fn default_maz_controls() -> String {
    "maz_controls.csv".to_string()
}
fn default_taz_controls() -> String {
    "taz_controls.csv".to_string()
}
fn default_meta_controls() -> String {
    "meta_controls.csv".to_string()
}
fn default_processed_households() -> String {
    "households_processed.csv".to_string()
}
fn default_processed_persons() -> String {
    "persons_processed.csv".to_string()
}
fn default_total_population() -> String {
    "totpop".to_string()
}
fn default_total_households() -> String {
    "totalhh".to_string()
}
fn default_tolerance() -> f64 {
    1e-6
}

/// Shape and type errors in the file are configuration errors; syntax and
/// I/O failures stay JSON errors.
fn invalid_config(err: serde_json::Error) -> PopSynError {
    if err.is_data() {
        PopSynError::config(format!("invalid configuration: {err}"))
    } else {
        PopSynError::Json(err)
    }
}

impl PopSynConfig {
    /// Read and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(invalid_config)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(invalid_config)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every structural constraint up front so components can assume
    /// a well-formed configuration.
    pub fn validate(&self) -> Result<()> {
        self.geography_groups()?;
        self.employment_zones()?;

        if self.age_bins.is_empty() {
            return Err(PopSynError::config("AgeBins must not be empty"));
        }
        for [start, end] in &self.age_bins {
            if start > end {
                return Err(PopSynError::config(format!(
                    "age bin [{start}, {end}] has start after end"
                )));
            }
        }
        let mut bins = self.age_bins.clone();
        bins.sort_unstable();
        if let Some(pair) = bins.windows(2).find(|pair| pair[1][0] <= pair[0][1]) {
            return Err(PopSynError::config(format!(
                "age bins [{}, {}] and [{}, {}] overlap",
                pair[0][0], pair[0][1], pair[1][0], pair[1][1]
            )));
        }
        if self.total_population_column_name.trim().is_empty()
            || self.total_households_column_name.trim().is_empty()
        {
            return Err(PopSynError::config("total column names must not be empty"));
        }
        if self.consistency_tolerance.is_nan() || self.consistency_tolerance < 0.0 {
            return Err(PopSynError::config(format!(
                "ConsistencyTolerance must be non-negative, got {}",
                self.consistency_tolerance
            )));
        }
        ControlSchema::from_config(self)?;
        Ok(())
    }

    pub fn geography_groups(&self) -> Result<GeographyGroups> {
        let pairs = self
            .pd_groups
            .iter()
            .enumerate()
            .map(|(idx, range)| match range.as_slice() {
                &[start, end] => Ok([start, end]),
                _ => Err(PopSynError::config(format!(
                    "PdGroups range {} must be a [start, end] pair, got {range:?}",
                    idx + 1
                ))),
            })
            .collect::<Result<Vec<RangePair>>>()?;
        GeographyGroups::new(&pairs)
    }

    pub fn internal_zones(&self) -> Result<ZoneRanges> {
        ZoneRanges::new("ZoneRanges", &self.zone_ranges)
    }

    pub fn employment_zones(&self) -> Result<EmploymentZones> {
        Ok(EmploymentZones::new(
            self.internal_zones()?,
            ZoneRanges::new("ExternalZoneRanges", &self.external_zone_ranges)?,
            self.roaming_zone,
        ))
    }

    /// Person columns subject to population-vector rescaling
    pub fn person_control_columns(&self) -> Vec<String> {
        self.person_control_columns
            .clone()
            .unwrap_or_else(|| vec![self.total_population_column_name.clone()])
    }

    /// Household columns subject to population-vector rescaling
    pub fn household_control_columns(&self) -> Vec<String> {
        self.household_control_columns
            .clone()
            .unwrap_or_else(|| vec![self.total_households_column_name.clone()])
    }

    /// Timestamped run folder, e.g. `output/base_2026-10-16_09-30`
    pub fn run_folder(&self, name: Option<&str>, started: DateTime<Local>) -> PathBuf {
        let prefix = name.map(|n| format!("{n}_")).unwrap_or_default();
        self.output_folder
            .join(format!("{prefix}{}", started.format("%Y-%m-%d_%H-%M")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MINIMAL: &str = r#"{
        "Zones": "data/Zones.csv",
        "HouseholdsSeedFile": "data/Households.csv",
        "PersonsSeedFile": "data/Persons.csv",
        "PdGroups": [[1, 1], [2, 5], [6, 46]]
    }"#;

    #[test]
    fn test_defaults_applied() {
        let config = PopSynConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.zone_ranges, vec![INTERNAL_ZONE_RANGE]);
        assert_eq!(config.roaming_zone, 8888);
        assert_eq!(config.region_id, 1);
        assert_eq!(config.age_bins.len(), 9);
        assert_eq!(config.person_control_columns(), vec!["totpop".to_string()]);
        assert_eq!(config.household_control_columns(), vec!["totalhh".to_string()]);
        assert!(config.random_seed.is_none());
    }

    #[test]
    fn test_overlapping_groups_rejected() {
        let json = MINIMAL.replace("[[1, 1], [2, 5], [6, 46]]", "[[1, 3], [3, 5]]");
        let err = PopSynConfig::from_json(&json).unwrap_err();
        assert!(matches!(err, PopSynError::Configuration(_)));
    }

    #[test]
    fn test_inverted_age_bin_rejected() {
        let json = MINIMAL.replace(
            "\"PdGroups\"",
            "\"AgeBins\": [[10, 4]], \"PdGroups\"",
        );
        assert!(PopSynConfig::from_json(&json).is_err());
    }

    #[test]
    fn test_missing_pd_groups_is_configuration_error() {
        let json = MINIMAL.replace(",\n        \"PdGroups\": [[1, 1], [2, 5], [6, 46]]", "");
        assert!(!json.contains("PdGroups"));
        match PopSynConfig::from_json(&json).unwrap_err() {
            PopSynError::Configuration(msg) => assert!(msg.contains("PdGroups"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_pd_group_pair_is_configuration_error() {
        let json = MINIMAL.replace("[[1, 1], [2, 5], [6, 46]]", "[[1], [2, 5]]");
        match PopSynConfig::from_json(&json).unwrap_err() {
            PopSynError::Configuration(msg) => assert!(msg.contains("PdGroups range 1"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_value_type_is_configuration_error() {
        let json = MINIMAL.replace("\"PdGroups\"", "\"RegionId\": \"north\", \"PdGroups\"");
        assert!(matches!(
            PopSynConfig::from_json(&json),
            Err(PopSynError::Configuration(_))
        ));
        assert!(matches!(
            PopSynConfig::from_json("{ not json"),
            Err(PopSynError::Json(_))
        ));
    }

    #[test]
    fn test_overlapping_age_bins_rejected() {
        let json = MINIMAL.replace(
            "\"PdGroups\"",
            "\"AgeBins\": [[0, 10], [5, 20]], \"PdGroups\"",
        );
        assert!(matches!(
            PopSynConfig::from_json(&json),
            Err(PopSynError::Configuration(_))
        ));

        let json = MINIMAL.replace(
            "\"PdGroups\"",
            "\"AgeBins\": [[0, 4], [0, 4]], \"PdGroups\"",
        );
        assert!(PopSynConfig::from_json(&json).is_err());
    }

    #[test]
    fn test_colliding_total_column_rejected_at_load() {
        let json = MINIMAL.replace(
            "\"PdGroups\"",
            "\"TotalPopulationColumnName\": \"female\", \"PdGroups\"",
        );
        assert!(matches!(
            PopSynConfig::from_json(&json),
            Err(PopSynError::Configuration(_))
        ));
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let mut config = PopSynConfig::from_json(MINIMAL).unwrap();
        config.consistency_tolerance = -1e-6;
        assert!(config.validate().is_err());
        config.consistency_tolerance = f64::NAN;
        assert!(config.validate().is_err());
        config.consistency_tolerance = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_run_folder_naming() {
        let config = PopSynConfig::from_json(MINIMAL).unwrap();
        let started = Local.with_ymd_and_hms(2026, 3, 4, 9, 5, 0).unwrap();
        assert_eq!(
            config.run_folder(Some("base"), started),
            PathBuf::from("output/base_2026-03-04_09-05")
        );
        assert_eq!(
            config.run_folder(None, started),
            PathBuf::from("output/2026-03-04_09-05")
        );
    }
}
