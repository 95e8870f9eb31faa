//! Control-total schema and tables
//!
//! The attribute vocabulary is a fixed, ordered list of typed predicates
//! over household or person records. Tables hold one row per geography key
//! and one `f64` per attribute, in schema order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::{PopSynConfig, RangePair};
use crate::error::{PopSynError, Result};
use crate::models::{HouseholdRecord, PersonRecord};
use crate::seed::SeedColumns;
use crate::zones::{EmploymentZoneClass, EmploymentZones};

/// Person-level attribute predicate
#[derive(Debug, Clone, PartialEq)]
pub enum PersonPredicate {
    All,
    Sex(&'static str),
    License(&'static str),
    EmploymentStatus(&'static str),
    Occupation(&'static str),
    StudentStatus(&'static str),
    /// Inclusive age range
    AgeBetween(u32, u32),
    EmploymentZone(EmploymentZoneClass),
}

impl PersonPredicate {
    /// Seed column the predicate reads, beyond the weight
    pub fn column(&self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Sex(_) => Some("Sex"),
            Self::License(_) => Some("License"),
            Self::EmploymentStatus(_) => Some("EmploymentStatus"),
            Self::Occupation(_) => Some("Occupation"),
            Self::StudentStatus(_) => Some("StudentStatus"),
            Self::AgeBetween(..) => Some("Age"),
            Self::EmploymentZone(_) => Some("EmploymentZone"),
        }
    }

    pub fn matches(&self, person: &PersonRecord, zones: &EmploymentZones) -> bool {
        match self {
            Self::All => true,
            Self::Sex(v) => person.sex == *v,
            Self::License(v) => person.license == *v,
            Self::EmploymentStatus(v) => person.employment_status == *v,
            Self::Occupation(v) => person.occupation == *v,
            Self::StudentStatus(v) => person.student_status == *v,
            Self::AgeBetween(lo, hi) => (*lo..=*hi).contains(&person.age),
            Self::EmploymentZone(class) => zones.classify(person.employment_zone) == *class,
        }
    }
}

/// Household-level attribute predicate
#[derive(Debug, Clone, PartialEq)]
pub enum HouseholdPredicate {
    All,
    IncomeClass(u8),
    /// `NumberOfPersons` in `min..=max`, open-ended when `max` is `None`
    Persons { min: u32, max: Option<u32> },
    /// `Vehicles` in `min..=max`, open-ended when `max` is `None`
    Vehicles { min: u32, max: Option<u32> },
}

impl HouseholdPredicate {
    pub fn column(&self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::IncomeClass(_) => Some("IncomeClass"),
            Self::Persons { .. } => Some("NumberOfPersons"),
            Self::Vehicles { .. } => Some("Vehicles"),
        }
    }

    pub fn matches(&self, household: &HouseholdRecord) -> bool {
        fn within(value: u32, min: u32, max: Option<u32>) -> bool {
            value >= min && max.map_or(true, |max| value <= max)
        }
        match self {
            Self::All => true,
            Self::IncomeClass(c) => household.income_class == *c,
            Self::Persons { min, max } => within(household.number_of_persons, *min, *max),
            Self::Vehicles { min, max } => within(household.vehicles, *min, *max),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeSource {
    Household(HouseholdPredicate),
    Person(PersonPredicate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlAttribute {
    pub name: String,
    pub source: AttributeSource,
}

impl ControlAttribute {
    fn person(name: impl Into<String>, predicate: PersonPredicate) -> Self {
        Self {
            name: name.into(),
            source: AttributeSource::Person(predicate),
        }
    }

    fn household(name: impl Into<String>, predicate: HouseholdPredicate) -> Self {
        Self {
            name: name.into(),
            source: AttributeSource::Household(predicate),
        }
    }
}

/// Ordered attribute vocabulary of the control tables
#[derive(Debug, Clone)]
pub struct ControlSchema {
    attributes: Vec<ControlAttribute>,
}

const HOUSEHOLD_KEY_COLUMNS: [&str; 3] = ["HouseholdId", "HouseholdZone", "ExpansionFactor"];
const PERSON_KEY_COLUMNS: [&str; 2] = ["HouseholdId", "ExpansionFactor"];

impl ControlSchema {
    /// The standard column set written for the synthesis engine
    pub fn standard(total_households: &str, total_population: &str, age_bins: &[RangePair]) -> Self {
        use HouseholdPredicate as H;
        use PersonPredicate as P;

        let mut attributes = vec![
            ControlAttribute::household(total_households, H::All),
            ControlAttribute::person(total_population, P::All),
        ];
        for s in ["O", "S", "P"] {
            attributes.push(ControlAttribute::person(format!("S_{s}"), P::StudentStatus(s)));
        }
        for l in ["Y", "N"] {
            attributes.push(ControlAttribute::person(format!("license_{l}"), P::License(l)));
        }
        for e in ["O", "F", "P", "J", "H"] {
            attributes.push(ControlAttribute::person(format!("E_{e}"), P::EmploymentStatus(e)));
        }
        for o in ["P", "G", "S", "M", "O"] {
            attributes.push(ControlAttribute::person(o, P::Occupation(o)));
        }
        for &[lo, hi] in age_bins {
            attributes.push(ControlAttribute::person(format!("age{lo}_{hi}"), P::AgeBetween(lo, hi)));
        }
        for size in 1..=3 {
            attributes.push(ControlAttribute::household(
                format!("hhsize{size}"),
                H::Persons { min: size, max: Some(size) },
            ));
        }
        attributes.push(ControlAttribute::household("hhsize4p", H::Persons { min: 4, max: None }));
        for count in 1..=2 {
            attributes.push(ControlAttribute::household(
                format!("numv{count}"),
                H::Vehicles { min: count, max: Some(count) },
            ));
        }
        attributes.push(ControlAttribute::household("numv3p", H::Vehicles { min: 3, max: None }));
        for class in 1..=6u8 {
            attributes.push(ControlAttribute::household(
                format!("income_class_{class}"),
                H::IncomeClass(class),
            ));
        }
        attributes.push(ControlAttribute::person("male", P::Sex("M")));
        attributes.push(ControlAttribute::person("female", P::Sex("F")));
        for (name, class) in [
            ("employment_zone_internal", EmploymentZoneClass::Internal),
            ("employment_zone_external", EmploymentZoneClass::External),
            ("employment_zone_roaming", EmploymentZoneClass::Roaming),
            ("employment_zone_0", EmploymentZoneClass::Unassigned),
        ] {
            attributes.push(ControlAttribute::person(name, P::EmploymentZone(class)));
        }

        Self { attributes }
    }

    /// Standard schema minus the configured `DropControlColumns`. Fails if
    /// the configured names make two columns collide.
    pub fn from_config(config: &PopSynConfig) -> Result<Self> {
        let standard = Self::standard(
            &config.total_households_column_name,
            &config.total_population_column_name,
            &config.age_bins,
        );
        Self::from_attributes(standard.attributes)?.without(&config.drop_control_columns)
    }

    pub fn from_attributes(attributes: Vec<ControlAttribute>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for attr in &attributes {
            if !seen.insert(attr.name.as_str()) {
                return Err(PopSynError::config(format!(
                    "control column `{}` defined twice",
                    attr.name
                )));
            }
        }
        Ok(Self { attributes })
    }

    /// Remove columns by name. Naming a column the schema lacks is an error.
    pub fn without(mut self, drop: &[String]) -> Result<Self> {
        for name in drop {
            if !self.attributes.iter().any(|a| &a.name == name) {
                return Err(PopSynError::config(format!(
                    "DropControlColumns names unknown column `{name}`"
                )));
            }
        }
        self.attributes.retain(|a| !drop.contains(&a.name));
        Ok(self)
    }

    pub fn attributes(&self) -> &[ControlAttribute] {
        &self.attributes
    }

    pub fn names(&self) -> Vec<String> {
        self.attributes.iter().map(|a| a.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Household seed columns the schema needs
    pub fn household_columns(&self) -> BTreeSet<&'static str> {
        let mut columns: BTreeSet<&'static str> = HOUSEHOLD_KEY_COLUMNS.into_iter().collect();
        columns.extend(self.attributes.iter().filter_map(|a| match &a.source {
            AttributeSource::Household(p) => p.column(),
            AttributeSource::Person(_) => None,
        }));
        columns
    }

    /// Person seed columns the schema needs
    pub fn person_columns(&self) -> BTreeSet<&'static str> {
        let mut columns: BTreeSet<&'static str> = PERSON_KEY_COLUMNS.into_iter().collect();
        columns.extend(self.attributes.iter().filter_map(|a| match &a.source {
            AttributeSource::Person(p) => p.column(),
            AttributeSource::Household(_) => None,
        }));
        columns
    }

    /// Fail if any predicate reads a column the seed files do not have
    pub fn validate_columns(&self, available: &SeedColumns) -> Result<()> {
        let missing_households: Vec<&str> = self
            .household_columns()
            .into_iter()
            .filter(|c| !available.has_household(c))
            .collect();
        let missing_persons: Vec<&str> = self
            .person_columns()
            .into_iter()
            .filter(|c| !available.has_person(c))
            .collect();

        if missing_households.is_empty() && missing_persons.is_empty() {
            return Ok(());
        }
        Err(PopSynError::config(format!(
            "seed data lacks columns required by the control schema (households: [{}], persons: [{}])",
            missing_households.join(", "),
            missing_persons.join(", ")
        )))
    }
}

/// Geography level of a control table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GeographyLevel {
    Zone,
    Group,
    Region,
}

impl GeographyLevel {
    /// Key columns written ahead of the attributes
    pub fn key_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Zone => &["region", "puma", "zone"],
            Self::Group => &["region", "puma"],
            Self::Region => &["region"],
        }
    }
}

impl fmt::Display for GeographyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zone => write!(f, "zone"),
            Self::Group => write!(f, "group"),
            Self::Region => write!(f, "region"),
        }
    }
}

/// Row key; `group`/`zone` are set only at levels that have them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeoKey {
    pub region: u32,
    pub group: Option<u32>,
    pub zone: Option<u32>,
}

impl GeoKey {
    pub fn zone(region: u32, group: u32, zone: u32) -> Self {
        Self {
            region,
            group: Some(group),
            zone: Some(zone),
        }
    }

    pub fn group(region: u32, group: u32) -> Self {
        Self {
            region,
            group: Some(group),
            zone: None,
        }
    }

    pub fn region(region: u32) -> Self {
        Self {
            region,
            group: None,
            zone: None,
        }
    }

    /// Project onto a coarser level
    pub fn at(&self, level: GeographyLevel) -> Self {
        match level {
            GeographyLevel::Zone => *self,
            GeographyLevel::Group => Self {
                zone: None,
                ..*self
            },
            GeographyLevel::Region => Self::region(self.region),
        }
    }
}

impl fmt::Display for GeoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region {}", self.region)?;
        if let Some(group) = self.group {
            write!(f, " / puma {group}")?;
        }
        if let Some(zone) = self.zone {
            write!(f, " / zone {zone}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlRow {
    pub key: GeoKey,
    pub values: Vec<f64>,
}

/// One control-total table at a single geography level
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTable {
    level: GeographyLevel,
    columns: Vec<String>,
    rows: Vec<ControlRow>,
}

impl ControlTable {
    pub fn new(level: GeographyLevel, columns: Vec<String>) -> Self {
        Self {
            level,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, key: GeoKey, values: Vec<f64>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(PopSynError::config(format!(
                "{} row for {key} has {} values, table has {} columns",
                self.level,
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(ControlRow { key, values });
        Ok(())
    }

    pub fn level(&self) -> GeographyLevel {
        self.level
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[ControlRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            PopSynError::config(format!("{} control table has no column `{name}`", self.level))
        })
    }

    pub fn row(&self, key: &GeoKey) -> Option<&ControlRow> {
        self.rows.iter().find(|r| &r.key == key)
    }

    pub fn value(&self, key: &GeoKey, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.row(key).map(|r| r.values[idx])
    }

    pub fn column_total(&self, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|r| r.values[idx]).sum())
    }

    /// Sum rows grouped by their key at a coarser level
    pub fn roll_up(&self, level: GeographyLevel) -> ControlTable {
        let mut sums: BTreeMap<GeoKey, Vec<f64>> = BTreeMap::new();
        for row in &self.rows {
            let acc = sums
                .entry(row.key.at(level))
                .or_insert_with(|| vec![0.0; self.columns.len()]);
            for (a, v) in acc.iter_mut().zip(&row.values) {
                *a += v;
            }
        }

        ControlTable {
            level,
            columns: self.columns.clone(),
            rows: sums
                .into_iter()
                .map(|(key, values)| ControlRow { key, values })
                .collect(),
        }
    }

    /// Values clamped at zero and truncated toward zero
    pub fn truncated(&self) -> ControlTable {
        ControlTable {
            level: self.level,
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|r| ControlRow {
                    key: r.key,
                    values: r.values.iter().map(|v| v.max(0.0).trunc()).collect(),
                })
                .collect(),
        }
    }
}

/// Control tables for all three geography levels
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTotals {
    pub zone: ControlTable,
    pub group: ControlTable,
    pub region: ControlTable,
}

impl ControlTotals {
    /// Derive the group and region tables from a zone table
    pub fn from_zone_table(zone: ControlTable) -> Self {
        let group = zone.roll_up(GeographyLevel::Group);
        let region = group.roll_up(GeographyLevel::Region);
        Self {
            zone,
            group,
            region,
        }
    }

    /// Truncate zone values to non-negative integers and re-derive the upper
    /// levels from them, so the published tables add up exactly.
    pub fn into_integral(self) -> Self {
        Self::from_zone_table(self.zone.truncated())
    }

    /// Check zone -> group and group -> region conservation for every column
    pub fn verify(&self, tolerance: f64) -> Result<()> {
        verify_level(&self.zone, &self.group, tolerance)?;
        verify_level(&self.group, &self.region, tolerance)
    }
}

fn verify_level(fine: &ControlTable, coarse: &ControlTable, tolerance: f64) -> Result<()> {
    if fine.columns != coarse.columns {
        let column = fine
            .columns
            .iter()
            .find(|c| !coarse.columns.contains(c))
            .or_else(|| coarse.columns.iter().find(|c| !fine.columns.contains(c)))
            .cloned()
            .unwrap_or_else(|| "<column order>".to_string());
        return Err(PopSynError::Consistency {
            level: coarse.level.to_string(),
            key: "header".to_string(),
            column,
            expected: f64::NAN,
            actual: f64::NAN,
        });
    }

    let expected = fine.roll_up(coarse.level);
    let mut keys: BTreeSet<GeoKey> = expected.rows.iter().map(|r| r.key).collect();
    keys.extend(coarse.rows.iter().map(|r| r.key));

    let zeros = vec![0.0; fine.columns.len()];
    for key in keys {
        let want = expected.row(&key).map_or(&zeros, |r| &r.values);
        let got = coarse.row(&key).map_or(&zeros, |r| &r.values);
        for (idx, (w, g)) in want.iter().zip(got).enumerate() {
            if (w - g).abs() > tolerance * w.abs().max(1.0) {
                return Err(PopSynError::Consistency {
                    level: coarse.level.to_string(),
                    key: key.to_string(),
                    column: fine.columns[idx].clone(),
                    expected: *w,
                    actual: *g,
                });
            }
        }
    }
    Ok(())
}
