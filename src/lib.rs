//! Control-total generation for population synthesis
//!
//! Turns a weighted household/person seed sample and a zone geography into
//! control tables at zone, group (`puma`) and region level, and rescales
//! existing tables to a zone population forecast.

pub mod aggregate;
pub mod config;
pub mod controls;
pub mod error;
pub mod io;
pub mod models;
pub mod rebalance;
pub mod report;
pub mod resample;
pub mod seed;
pub mod zones;

pub use aggregate::{build_control_totals, AggregationOptions};
pub use config::PopSynConfig;
pub use controls::{ControlSchema, ControlTable, ControlTotals, GeographyLevel};
pub use error::{PopSynError, Result};
pub use rebalance::{apply_population_vector, PopulationVector, RebalanceColumns};
pub use resample::resample_category;
pub use zones::ZoneHierarchy;
