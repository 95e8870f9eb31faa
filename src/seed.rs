//! Household/person seed population
//!
//! Loaded once per run. After filtering and the resampling passes the
//! records are only read, except for the household-size reconciliation that
//! feeds the processed seed files.

use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Read;
use tracing::{debug, info, warn};

use crate::config::CategoryMapping;
use crate::error::{PopSynError, Result};
use crate::io::read_records;
use crate::models::{
    HouseholdRecord, PersonRecord, ProcessedHousehold, ProcessedPerson, INCOME_CLASS_UNKNOWN,
    PERSON_CATEGORY_INVALID,
};
use crate::resample::{resample_category, CategoryColumn, ResampleOutcome};
use crate::zones::{ZoneHierarchy, ZoneRanges};

const HOUSEHOLD_COLUMNS: [&str; 7] = [
    "HouseholdId",
    "HouseholdZone",
    "DwellingType",
    "NumberOfPersons",
    "Vehicles",
    "IncomeClass",
    "ExpansionFactor",
];

const PERSON_COLUMNS: [&str; 13] = [
    "HouseholdId",
    "PersonNumber",
    "Age",
    "Sex",
    "License",
    "EmploymentStatus",
    "Occupation",
    "StudentStatus",
    "EmploymentZone",
    "ExpansionFactor",
    "TransitPass",
    "FreeParking",
    "SchoolZone",
];

const INCOME_CLASS: CategoryColumn<HouseholdRecord, u8> = CategoryColumn {
    name: "IncomeClass",
    get: |h| h.income_class,
    set: |h, v| h.income_class = v,
};

const OCCUPATION: CategoryColumn<PersonRecord, String> = CategoryColumn {
    name: "Occupation",
    get: |p| p.occupation.clone(),
    set: |p, v| p.occupation = v,
};

const EMPLOYMENT_STATUS: CategoryColumn<PersonRecord, String> = CategoryColumn {
    name: "EmploymentStatus",
    get: |p| p.employment_status.clone(),
    set: |p, v| p.employment_status = v,
};

const STUDENT_STATUS: CategoryColumn<PersonRecord, String> = CategoryColumn {
    name: "StudentStatus",
    get: |p| p.student_status.clone(),
    set: |p, v| p.student_status = v,
};

/// Column names present in the loaded seed files
#[derive(Debug, Clone, Default)]
pub struct SeedColumns {
    households: BTreeSet<String>,
    persons: BTreeSet<String>,
}

impl SeedColumns {
    pub fn new<H, P, S>(households: H, persons: P) -> Self
    where
        H: IntoIterator<Item = S>,
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            households: households.into_iter().map(Into::into).collect(),
            persons: persons.into_iter().map(Into::into).collect(),
        }
    }

    /// Every column the record types know about
    pub fn complete() -> Self {
        Self::new(HOUSEHOLD_COLUMNS, PERSON_COLUMNS)
    }

    pub fn has_household(&self, column: &str) -> bool {
        self.households.contains(column)
    }

    pub fn has_person(&self, column: &str) -> bool {
        self.persons.contains(column)
    }
}

/// Records removed by `restrict_to`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestrictSummary {
    pub households_dropped: usize,
    pub persons_dropped: usize,
    pub orphan_persons: usize,
}

#[derive(Debug, Clone)]
pub struct SeedPopulation {
    households: Vec<HouseholdRecord>,
    persons: Vec<PersonRecord>,
    columns: SeedColumns,
}

impl SeedPopulation {
    pub fn new(households: Vec<HouseholdRecord>, persons: Vec<PersonRecord>) -> Self {
        Self {
            households,
            persons,
            columns: SeedColumns::complete(),
        }
    }

    /// Read household and person seed CSVs, remembering their headers
    pub fn read<H: Read, P: Read>(households: H, persons: P) -> Result<Self> {
        let (household_headers, households) = read_records::<HouseholdRecord, _>(households)?;
        let (person_headers, persons) = read_records::<PersonRecord, _>(persons)?;
        info!(
            "Read {} household and {} person seed records",
            households.len(),
            persons.len()
        );
        Ok(Self {
            households,
            persons,
            columns: SeedColumns::new(household_headers.iter(), person_headers.iter()),
        })
    }

    /// Replace the recorded seed headers, for records not read from CSV
    pub fn with_columns(mut self, columns: SeedColumns) -> Self {
        self.columns = columns;
        self
    }

    pub fn households(&self) -> &[HouseholdRecord] {
        &self.households
    }

    pub fn persons(&self) -> &[PersonRecord] {
        &self.persons
    }

    pub fn columns(&self) -> &SeedColumns {
        &self.columns
    }

    /// Keep only households in the internal zone ranges, and persons of kept
    /// households. A household in an internal zone the hierarchy does not know
    /// is an error.
    pub fn restrict_to(
        &mut self,
        hierarchy: &ZoneHierarchy,
        internal: &ZoneRanges,
    ) -> Result<RestrictSummary> {
        let mut summary = RestrictSummary::default();

        let known: HashSet<u64> = self.households.iter().map(|h| h.household_id).collect();

        let mut kept = Vec::with_capacity(self.households.len());
        for household in self.households.drain(..) {
            if !internal.contains(household.household_zone) {
                summary.households_dropped += 1;
                continue;
            }
            hierarchy.resolve(
                household.household_zone,
                &format!("household {}", household.household_id),
            )?;
            kept.push(household);
        }
        self.households = kept;

        let kept_ids: HashSet<u64> = self.households.iter().map(|h| h.household_id).collect();
        self.persons.retain(|p| {
            if kept_ids.contains(&p.household_id) {
                true
            } else {
                if known.contains(&p.household_id) {
                    summary.persons_dropped += 1;
                } else {
                    summary.orphan_persons += 1;
                }
                false
            }
        });

        if summary.orphan_persons > 0 {
            warn!(
                "Dropped {} person records without a matching household",
                summary.orphan_persons
            );
        }
        info!(
            "Restricted seed to internal zones: dropped {} households, {} persons",
            summary.households_dropped, summary.persons_dropped
        );
        Ok(summary)
    }

    /// HouseholdId -> home zone
    pub fn household_zones(&self) -> HashMap<u64, u32> {
        self.households
            .iter()
            .map(|h| (h.household_id, h.household_zone))
            .collect()
    }

    /// Home zone of each person, aligned with `persons()`
    pub fn person_zones(&self) -> Result<Vec<u32>> {
        let zones = self.household_zones();
        self.persons
            .iter()
            .map(|p| {
                zones
                    .get(&p.household_id)
                    .copied()
                    .ok_or(PopSynError::MissingHousehold {
                        household_id: p.household_id,
                    })
            })
            .collect()
    }

    fn household_groups(&self, hierarchy: &ZoneHierarchy) -> Result<Vec<u32>> {
        self.households
            .iter()
            .map(|h| {
                hierarchy
                    .resolve(h.household_zone, &format!("household {}", h.household_id))
                    .map(|info| info.group)
            })
            .collect()
    }

    fn person_groups(&self, hierarchy: &ZoneHierarchy) -> Result<Vec<u32>> {
        self.person_zones()?
            .into_iter()
            .map(|zone| hierarchy.resolve(zone, "person household").map(|info| info.group))
            .collect()
    }

    /// Resample income class (households) and occupation, employment status
    /// and student status (persons) within each record's intermediate group.
    pub fn resample_invalid_categories<R: Rng + ?Sized>(
        &mut self,
        hierarchy: &ZoneHierarchy,
        rng: &mut R,
    ) -> Result<Vec<ResampleOutcome>> {
        let household_groups = self.household_groups(hierarchy)?;
        let person_groups = self.person_groups(hierarchy)?;
        let invalid = PERSON_CATEGORY_INVALID.to_string();

        let mut outcomes = vec![resample_category(
            &mut self.households,
            &household_groups,
            &INCOME_CLASS,
            &INCOME_CLASS_UNKNOWN,
            HouseholdRecord::weight,
            &mut *rng,
        )?];
        for column in [&OCCUPATION, &EMPLOYMENT_STATUS, &STUDENT_STATUS] {
            outcomes.push(resample_category(
                &mut self.persons,
                &person_groups,
                column,
                &invalid,
                PersonRecord::weight,
                &mut *rng,
            )?);
        }

        for outcome in &outcomes {
            info!(
                "Resampled {} invalid `{}` values across {} strata",
                outcome.replaced, outcome.column, outcome.strata
            );
        }
        Ok(outcomes)
    }

    /// Make `NumberOfPersons` agree with the person records and renumber the
    /// members of corrected households from 1. Returns the households changed.
    pub fn reconcile_household_sizes(&mut self) -> usize {
        let mut members: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (idx, person) in self.persons.iter().enumerate() {
            members.entry(person.household_id).or_default().push(idx);
        }

        let mut changed = 0;
        for household in &mut self.households {
            let Some(indices) = members.get_mut(&household.household_id) else {
                continue;
            };
            if indices.len() as u32 == household.number_of_persons {
                continue;
            }
            household.number_of_persons = indices.len() as u32;
            indices.sort_by_key(|&idx| self.persons[idx].person_number);
            for (n, &idx) in indices.iter().enumerate() {
                self.persons[idx].person_number = n as u32 + 1;
            }
            changed += 1;
        }

        if changed > 0 {
            debug!("Reconciled household size on {} households", changed);
        }
        changed
    }

    /// Household rows for the synthesis engine. Households without any
    /// person record are left out.
    pub fn processed_households(&self, hierarchy: &ZoneHierarchy) -> Result<Vec<ProcessedHousehold>> {
        let with_members: HashSet<u64> = self.persons.iter().map(|p| p.household_id).collect();
        let mut rows = Vec::with_capacity(self.households.len());
        for household in &self.households {
            if !with_members.contains(&household.household_id) {
                continue;
            }
            let info = hierarchy.resolve(
                household.household_zone,
                &format!("household {}", household.household_id),
            )?;
            rows.push(ProcessedHousehold::from_record(household, info.group));
        }
        rows.sort_by_key(|h| h.household_id);
        Ok(rows)
    }

    /// Person rows for the synthesis engine with category remapping applied.
    /// Values absent from a column's mapping are kept as they are.
    pub fn processed_persons(
        &self,
        hierarchy: &ZoneHierarchy,
        mapping: &CategoryMapping,
    ) -> Result<Vec<ProcessedPerson>> {
        if let Some(column) = mapping
            .persons
            .keys()
            .find(|c| !PersonRecord::is_category_column(c))
        {
            return Err(PopSynError::config(format!(
                "CategoryMapping.Persons names unsupported column `{column}`"
            )));
        }

        let zones = self.person_zones()?;
        let mut rows = Vec::with_capacity(self.persons.len());
        for (person, zone) in self.persons.iter().zip(zones) {
            let info = hierarchy.resolve(zone, "person household")?;
            let mut person = person.clone();
            for (column, values) in &mapping.persons {
                if let Some(value) = person.category_mut(column) {
                    if let Some(mapped) = values.get(value.as_str()) {
                        *value = mapped.clone();
                    }
                }
            }
            rows.push(ProcessedPerson::from_record(&person, info.group));
        }
        rows.sort_by_key(|p| (p.household_id, p.person_number));
        Ok(rows)
    }
}
