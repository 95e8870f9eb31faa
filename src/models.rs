use serde::{Deserialize, Serialize};

/// Income class reserved for "unknown / not reported"
pub const INCOME_CLASS_UNKNOWN: u8 = 7;

/// Person category value reserved for "invalid / missing"
pub const PERSON_CATEGORY_INVALID: &str = "9";

/// Row of the zone geography file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ZoneRecord {
    #[serde(rename = "Zone", alias = "Zone#")]
    pub zone: u32,
    #[serde(rename = "PD")]
    pub district: u32,
}

/// Household seed record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HouseholdRecord {
    pub household_id: u64,
    pub household_zone: u32,
    pub dwelling_type: u8,
    pub number_of_persons: u32,
    pub vehicles: u32,
    pub income_class: u8,
    pub expansion_factor: f64,
}

/// Person seed record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PersonRecord {
    pub household_id: u64,
    pub person_number: u32,
    pub age: u32,
    pub sex: String,
    pub license: String,
    pub employment_status: String,
    pub occupation: String,
    pub student_status: String,
    pub employment_zone: u32,
    pub expansion_factor: f64,
    // Carried through to the processed seed file only
    #[serde(default)]
    pub transit_pass: Option<String>,
    #[serde(default)]
    pub free_parking: Option<String>,
    #[serde(default)]
    pub school_zone: Option<u32>,
}

impl HouseholdRecord {
    pub fn weight(&self) -> f64 {
        self.expansion_factor
    }
}

impl PersonRecord {
    pub fn weight(&self) -> f64 {
        self.expansion_factor
    }

    /// Categorical value by seed column name, for value remapping
    pub fn category_mut(&mut self, column: &str) -> Option<&mut String> {
        match column {
            "Sex" => Some(&mut self.sex),
            "License" => Some(&mut self.license),
            "EmploymentStatus" => Some(&mut self.employment_status),
            "Occupation" => Some(&mut self.occupation),
            "StudentStatus" => Some(&mut self.student_status),
            "TransitPass" => self.transit_pass.as_mut(),
            "FreeParking" => self.free_parking.as_mut(),
            _ => None,
        }
    }

    /// Whether `column` names a remappable categorical column
    pub fn is_category_column(column: &str) -> bool {
        matches!(
            column,
            "Sex"
                | "License"
                | "EmploymentStatus"
                | "Occupation"
                | "StudentStatus"
                | "TransitPass"
                | "FreeParking"
        )
    }
}

/// Household row of the processed seed file
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedHousehold {
    #[serde(rename = "HouseholdId")]
    pub household_id: u64,
    pub puma: u32,
    #[serde(rename = "DwellingType")]
    pub dwelling_type: u8,
    #[serde(rename = "NumberOfPersons")]
    pub number_of_persons: u32,
    #[serde(rename = "Vehicles")]
    pub vehicles: u32,
    #[serde(rename = "IncomeClass")]
    pub income_class: u8,
    pub weight: f64,
}

/// Person row of the processed seed file
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedPerson {
    #[serde(rename = "HouseholdId")]
    pub household_id: u64,
    #[serde(rename = "PersonNumber")]
    pub person_number: u32,
    pub puma: u32,
    #[serde(rename = "Age")]
    pub age: u32,
    #[serde(rename = "Sex")]
    pub sex: String,
    #[serde(rename = "License")]
    pub license: String,
    #[serde(rename = "TransitPass")]
    pub transit_pass: Option<String>,
    #[serde(rename = "EmploymentStatus")]
    pub employment_status: String,
    #[serde(rename = "Occupation")]
    pub occupation: String,
    #[serde(rename = "FreeParking")]
    pub free_parking: Option<String>,
    #[serde(rename = "StudentStatus")]
    pub student_status: String,
    #[serde(rename = "EmploymentZone")]
    pub employment_zone: u32,
    #[serde(rename = "SchoolZone")]
    pub school_zone: Option<u32>,
    pub weight: f64,
}

impl ProcessedHousehold {
    pub fn from_record(record: &HouseholdRecord, puma: u32) -> Self {
        Self {
            household_id: record.household_id,
            puma,
            dwelling_type: record.dwelling_type,
            number_of_persons: record.number_of_persons,
            vehicles: record.vehicles,
            income_class: record.income_class,
            weight: record.expansion_factor,
        }
    }
}

impl ProcessedPerson {
    pub fn from_record(record: &PersonRecord, puma: u32) -> Self {
        Self {
            household_id: record.household_id,
            person_number: record.person_number,
            puma,
            age: record.age,
            sex: record.sex.clone(),
            license: record.license.clone(),
            transit_pass: record.transit_pass.clone(),
            employment_status: record.employment_status.clone(),
            occupation: record.occupation.clone(),
            free_parking: record.free_parking.clone(),
            student_status: record.student_status.clone(),
            employment_zone: record.employment_zone,
            school_zone: record.school_zone,
            weight: record.expansion_factor,
        }
    }
}
