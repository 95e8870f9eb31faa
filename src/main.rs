//! Control-total generator for population synthesis
//!
//! Usage:
//!   popsyn_controls [OPTIONS]
//!
//! Modes:
//!   (default) / --input-only   Build control tables and processed seed files
//!   --population-vector <CSV> --controls <DIR>
//!                              Rescale existing tables to a zone forecast
//!   --report-only --output <DIR>
//!                              Compare seed totals with a run's region controls

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use popsyn_controls::aggregate::{build_control_totals, AggregationOptions};
use popsyn_controls::config::PopSynConfig;
use popsyn_controls::controls::{ControlSchema, ControlTotals, GeographyLevel};
use popsyn_controls::io;
use popsyn_controls::rebalance::{apply_population_vector, RebalanceColumns};
use popsyn_controls::report::{self, REPORT_FILE};
use popsyn_controls::seed::SeedPopulation;
use popsyn_controls::zones::ZoneHierarchy;

/// Control-total generator for population synthesis
#[derive(Parser, Debug)]
#[command(name = "popsyn_controls")]
#[command(about = "Build zone, group and region control totals from a weighted seed sample")]
struct Args {
    /// Configuration JSON
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Generate control tables and processed seeds (default mode)
    #[arg(long, conflicts_with_all = ["report_only", "population_vector"])]
    input_only: bool,

    /// Write the control summary report for an existing run folder
    #[arg(long, requires = "output", conflicts_with = "population_vector")]
    report_only: bool,

    /// Zone population forecast CSV used to rebalance existing controls
    #[arg(long, requires = "controls")]
    population_vector: Option<PathBuf>,

    /// Folder holding the control tables to rebalance
    #[arg(long, requires = "population_vector")]
    controls: Option<PathBuf>,

    /// Random seed for resampling (overrides RandomSeed)
    #[arg(long)]
    seed: Option<u64>,

    /// Explicit run folder instead of a timestamped one
    #[arg(long)]
    output: Option<PathBuf>,

    /// Prefix for the timestamped run folder
    #[arg(long)]
    name: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .init();

    let args = Args::parse();
    let result = run(&args);
    if let Err(err) = &result {
        error!("{err:#}");
    }
    result
}

fn run(args: &Args) -> Result<()> {
    let config = PopSynConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    let hierarchy = load_hierarchy(&config)?;

    if args.report_only {
        let Some(folder) = &args.output else {
            bail!("--report-only needs --output <run folder>");
        };
        return write_summary_report(&config, &hierarchy, folder);
    }

    let folder = args
        .output
        .clone()
        .unwrap_or_else(|| config.run_folder(args.name.as_deref(), Local::now()));

    match (&args.population_vector, &args.controls) {
        (Some(vector), Some(controls)) => rebalance(&config, &hierarchy, vector, controls, &folder),
        (None, None) => {
            if !args.input_only {
                info!("No mode flag given; generating inputs");
            }
            generate(&config, &hierarchy, args.seed, &folder)
        }
        _ => bail!("--population-vector and --controls must be given together"),
    }
}

fn load_hierarchy(config: &PopSynConfig) -> Result<ZoneHierarchy> {
    let zones = io::open(&config.zones)
        .and_then(io::read_zones)
        .with_context(|| format!("Failed to read zones from {}", config.zones.display()))?;
    let hierarchy = ZoneHierarchy::build(
        &zones,
        &config.geography_groups()?,
        &config.internal_zones()?,
        config.region_id,
    )?;
    info!(
        "Loaded {} zones in {} groups",
        hierarchy.len(),
        hierarchy.groups().len()
    );
    Ok(hierarchy)
}

fn load_seed(config: &PopSynConfig, hierarchy: &ZoneHierarchy) -> Result<SeedPopulation> {
    let households = io::open(&config.households_seed_file).with_context(|| {
        format!("Failed to open {}", config.households_seed_file.display())
    })?;
    let persons = io::open(&config.persons_seed_file)
        .with_context(|| format!("Failed to open {}", config.persons_seed_file.display()))?;
    let mut seed = SeedPopulation::read(households, persons).context("Failed to read seed files")?;
    seed.restrict_to(hierarchy, &config.internal_zones()?)?;
    Ok(seed)
}

fn generate(
    config: &PopSynConfig,
    hierarchy: &ZoneHierarchy,
    seed_override: Option<u64>,
    folder: &Path,
) -> Result<()> {
    let mut seed = load_seed(config, hierarchy)?;

    let rng_seed = seed_override
        .or(config.random_seed)
        .unwrap_or_else(rand::random::<u64>);
    info!("Random seed: {}", rng_seed);
    let mut rng = StdRng::seed_from_u64(rng_seed);
    seed.resample_invalid_categories(hierarchy, &mut rng)?;

    let schema = ControlSchema::from_config(config)?;
    let totals = build_control_totals(
        &seed,
        hierarchy,
        &schema,
        &config.employment_zones()?,
        &AggregationOptions::from_config(config),
    )?
    .into_integral();
    totals.verify(config.consistency_tolerance)?;

    let reconciled = seed.reconcile_household_sizes();
    info!("Reconciled household size on {} households", reconciled);
    let households = seed.processed_households(hierarchy)?;
    let persons = seed.processed_persons(hierarchy, &config.category_mapping)?;

    let inputs = folder.join("Inputs");
    write_totals(config, &totals, &inputs)?;

    let path = inputs.join(&config.processed_households_seed_file);
    io::create(&path)
        .and_then(|file| io::write_records(&households, file))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    let path = inputs.join(&config.processed_persons_seed_file);
    io::create(&path)
        .and_then(|file| io::write_records(&persons, file))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    write_config_copy(config, folder)?;
    info!(
        "Wrote controls for {} zones and {} processed households to {}",
        totals.zone.len(),
        households.len(),
        inputs.display()
    );
    Ok(())
}

fn rebalance(
    config: &PopSynConfig,
    hierarchy: &ZoneHierarchy,
    vector_path: &Path,
    controls: &Path,
    folder: &Path,
) -> Result<()> {
    let zone_path = controls.join(&config.maz_level_controls);
    let zone = io::open(&zone_path)
        .and_then(|file| io::read_control_table(file, GeographyLevel::Zone))
        .with_context(|| format!("Failed to read {}", zone_path.display()))?;
    let group_path = controls.join(&config.taz_level_controls);
    let group = io::open(&group_path)
        .and_then(|file| io::read_control_table(file, GeographyLevel::Group))
        .with_context(|| format!("Failed to read {}", group_path.display()))?;
    let base = ControlTotals {
        region: group.roll_up(GeographyLevel::Region),
        zone,
        group,
    };

    let vector = io::open(vector_path)
        .and_then(io::read_population_vector)
        .with_context(|| format!("Failed to read population vector {}", vector_path.display()))?;
    info!("Population vector covers {} zones", vector.len());

    let (totals, _) =
        apply_population_vector(&base, hierarchy, &vector, &RebalanceColumns::from_config(config))?;
    totals.verify(config.consistency_tolerance)?;

    write_totals(config, &totals, &folder.join("Inputs"))?;
    write_config_copy(config, folder)
}

fn write_summary_report(config: &PopSynConfig, hierarchy: &ZoneHierarchy, folder: &Path) -> Result<()> {
    let region_path = folder.join("Inputs").join(&config.meta_level_controls);
    let region = io::open(&region_path)
        .and_then(|file| io::read_control_table(file, GeographyLevel::Region))
        .with_context(|| format!("Failed to read {}", region_path.display()))?;

    let seed = load_seed(config, hierarchy)?;
    let rows = report::summarize(
        &seed,
        hierarchy,
        &ControlSchema::from_config(config)?,
        &config.employment_zones()?,
        &region,
    )?;

    let path = folder.join(REPORT_FILE);
    io::create(&path)
        .and_then(|file| report::write_report(&rows, file))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("\nCONTROL SUMMARY");
    println!("{}", "-".repeat(73));
    print!("{}", report::render(&rows));
    println!();
    info!("Control summary written to {}", path.display());
    Ok(())
}

fn write_totals(config: &PopSynConfig, totals: &ControlTotals, inputs: &Path) -> Result<()> {
    for (table, name) in [
        (&totals.zone, &config.maz_level_controls),
        (&totals.group, &config.taz_level_controls),
        (&totals.region, &config.meta_level_controls),
    ] {
        let path = inputs.join(name);
        io::create(&path)
            .and_then(|file| io::write_control_table(table, file))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {} {} rows to {}", table.len(), table.level(), path.display());
    }
    Ok(())
}

fn write_config_copy(config: &PopSynConfig, folder: &Path) -> Result<()> {
    let path = folder.join("config.json");
    let file = io::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, config)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
