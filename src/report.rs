//! Seed-versus-control summary report

use serde::Serialize;
use std::io::Write;
use tracing::warn;

use crate::aggregate::{build_control_totals, AggregationOptions};
use crate::controls::{ControlSchema, ControlTable};
use crate::error::Result;
use crate::io::write_records;
use crate::seed::SeedPopulation;
use crate::zones::{EmploymentZones, ZoneHierarchy};

/// Relative path of the report inside a run folder
pub const REPORT_FILE: &str = "Validation/control_summary.csv";

/// One control column: observed seed weight against the published total
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub column: String,
    pub observed: f64,
    pub control: f64,
    pub difference: f64,
}

/// Compare weighted seed totals with a region-level control table.
///
/// Columns of the control table the schema does not define are skipped with a
/// warning. Rows follow the control table's column order.
pub fn summarize(
    seed: &SeedPopulation,
    hierarchy: &ZoneHierarchy,
    schema: &ControlSchema,
    employment: &EmploymentZones,
    region: &ControlTable,
) -> Result<Vec<ReportRow>> {
    let observed = build_control_totals(
        seed,
        hierarchy,
        schema,
        employment,
        &AggregationOptions::default(),
    )?;

    let mut rows = Vec::with_capacity(region.columns().len());
    for column in region.columns() {
        let Some(observed) = observed.region.column_total(column) else {
            warn!("Control column `{}` has no seed definition; not reported", column);
            continue;
        };
        let control = region.column_total(column).unwrap_or_default();
        rows.push(ReportRow {
            column: column.clone(),
            observed,
            control,
            difference: (control - observed).abs(),
        });
    }
    Ok(rows)
}

pub fn write_report<W: Write>(rows: &[ReportRow], writer: W) -> Result<()> {
    write_records(rows, writer)
}

/// Fixed-width rendering for the terminal
pub fn render(rows: &[ReportRow]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "  {:<28} {:>14} {:>14} {:>12}\n",
        "column", "observed", "control", "difference"
    ));
    out.push_str(&format!("  {}\n", "-".repeat(71)));
    for row in rows {
        out.push_str(&format!(
            "  {:<28} {:>14.1} {:>14.1} {:>12.1}\n",
            row.column, row.observed, row.control, row.difference
        ));
    }
    out
}
