use clap::Parser;
use scpdsi_core::metrics::linear_trend_map;
use scpdsi_core::{
    BatchResult, BatchRunner, CalibrationMetadata, DroughtEvent, PdsiConfig, SyntheticForcing,
};
use serde::Serialize;
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// scPDSI demo over a synthetic grid
#[derive(Parser, Debug)]
#[command(name = "scpdsi-demo")]
#[command(about = "Self-calibrating PDSI over synthetic gridded forcing", long_about = None)]
struct Args {
    /// Number of months per cell
    #[arg(short, long, default_value_t = 360)]
    months: usize,

    /// Number of grid cells
    #[arg(short, long, default_value_t = 16)]
    cells: usize,

    /// Random seed for the synthetic forcing
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Gamma shape of monthly precipitation
    #[arg(long, default_value_t = 2.0)]
    precip_shape: f64,

    /// Gamma scale of monthly precipitation in mm (mean is shape x scale)
    #[arg(long, default_value_t = 40.0)]
    precip_scale: f64,

    /// Minimum available water capacity in mm
    #[arg(long, default_value_t = 100.0)]
    awc_min: f64,

    /// Maximum available water capacity in mm
    #[arg(long, default_value_t = 200.0)]
    awc_max: f64,

    /// First month of an imposed drought (omit for none)
    #[arg(long)]
    drought_start: Option<usize>,

    /// Length of the imposed drought in months
    #[arg(long, default_value_t = 12)]
    drought_months: usize,

    /// Precipitation during the imposed drought in mm/month
    #[arg(long, default_value_t = 5.0)]
    drought_precip: f64,

    /// Engine configuration as JSON (missing fields take defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use Palmer's constant duration factors instead of self-calibrating
    #[arg(long)]
    no_calibration: bool,

    /// Worker threads (default: rayon global pool)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Cell whose monthly series is printed
    #[arg(long, default_value_t = 0)]
    report_cell: usize,

    /// Report interval in months for the monthly series
    #[arg(short, long, default_value_t = 12)]
    report_interval: usize,

    /// Write time-major PDSI and Z to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Write per-cell calibration metadata to this JSON file
    #[arg(long)]
    json: Option<PathBuf>,
}

/// Per-cell record written to the JSON export
#[derive(Serialize)]
struct CellSummary<'a> {
    cell: usize,
    awc_mm: f64,
    trend_per_decade: Option<f64>,
    metadata: Option<&'a CalibrationMetadata>,
    failure: Option<String>,
}

fn load_config(args: &Args) -> Result<PdsiConfig, Box<dyn Error>> {
    let mut config: PdsiConfig = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let config = serde_json::from_str(&text)?;
            info!("Loaded configuration from {}", path.display());
            config
        }
        None => PdsiConfig::default(),
    };
    if args.no_calibration {
        config.calibration.enabled = false;
    }
    Ok(config)
}

fn write_csv(path: &Path, result: &BatchResult) -> Result<(), Box<dyn Error>> {
    let pdsi = result.pdsi();
    let z = result.z_index();
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "month,cell,pdsi,z_index")?;
    for month in 0..pdsi.n_months() {
        for cell in 0..pdsi.n_cells() {
            let fmt = |v: Option<f64>| v.map_or_else(String::new, |v| format!("{v:.4}"));
            writeln!(
                out,
                "{},{},{},{}",
                month,
                cell,
                fmt(pdsi.get(month, cell)),
                fmt(z.get(month, cell))
            )?;
        }
    }
    out.flush()?;
    Ok(())
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    println!("=== scPDSI Demo ===\n");

    let config = load_config(args)?;
    let mut generator = SyntheticForcing {
        n_months: args.months,
        n_cells: args.cells,
        seed: args.seed,
        precip_shape: args.precip_shape,
        precip_scale: args.precip_scale,
        awc_range: (args.awc_min, args.awc_max),
        ..SyntheticForcing::default()
    };
    if let Some(start) = args.drought_start {
        generator = generator.with_drought(DroughtEvent {
            start,
            months: args.drought_months,
            precip: args.drought_precip,
        });
        println!(
            "Imposed drought: months {}..{} at {:.1} mm/month",
            start,
            start + args.drought_months,
            args.drought_precip
        );
    }

    let grid = generator.generate()?;
    println!(
        "Generated {} cells x {} months (seed {})",
        grid.n_cells(),
        grid.n_months(),
        args.seed
    );
    println!(
        "Calibration: {}\n",
        if config.calibration.enabled {
            "self-calibrating"
        } else {
            "Palmer constants"
        }
    );

    let mut runner = BatchRunner::new(config)?;
    if let Some(threads) = args.threads {
        runner = runner.with_threads(threads);
    }
    let result = runner.run(&grid, None);
    let trends = linear_trend_map(&result.pdsi(), 1.0 / 12.0);

    println!("Cell |   AWC  | Wet p / q     | Dry p / q     | Iter | Conv | Fallback | Min PDSI | Trend/decade");
    println!("-----|--------|---------------|---------------|------|------|----------|----------|-------------");
    for (cell, outcome) in result.cells().iter().enumerate() {
        let awc = *grid.cell(cell).map(|f| f.awc()).unwrap_or_default();
        match outcome {
            Ok(output) => {
                let meta = &output.metadata;
                let min_pdsi = output.pdsi.iter().copied().fold(f64::INFINITY, f64::min);
                let trend = trends[cell].map_or_else(|| "-".to_string(), |t| format!("{:+.3}", t * 10.0));
                println!(
                    "{:4} | {:6.1} | {:.3} / {:.3} | {:.3} / {:.3} | {:4} | {:4} | {:8} | {:8.2} | {}",
                    cell,
                    awc,
                    meta.wet.p,
                    meta.wet.q,
                    meta.dry.p,
                    meta.dry.q,
                    meta.iterations,
                    if meta.converged { "yes" } else { "no" },
                    if meta.fallback_used { "yes" } else { "no" },
                    min_pdsi,
                    trend
                );
                for warning in &meta.warnings {
                    println!("     |   warning: {}", warning);
                }
            }
            Err(failure) => println!("{:4} | {:6.1} | FAILED: {}", cell, awc, failure),
        }
    }

    if let Some(Ok(output)) = result.cell(args.report_cell) {
        println!("\nCell {} monthly series:\n", args.report_cell);
        println!("Month |   P(mm) | PET(mm) |      Z |   PDSI | Phase");
        println!("------|---------|---------|--------|--------|----------------");
        let step = args.report_interval.max(1);
        for month in (0..output.len()).step_by(step) {
            let wb = &output.water_balance[month];
            println!(
                "{:5} | {:7.1} | {:7.1} | {:6.2} | {:6.2} | {}",
                month, wb.precip, wb.pet, output.z_index[month], output.pdsi[month], output.phases[month]
            );
        }
        println!("\nSpell transitions:");
        for t in &output.transitions {
            println!("  month {:4}: {} -> {}", t.month, t.from, t.to);
        }
    }

    println!(
        "\n{} of {} cells succeeded",
        result.succeeded(),
        result.n_cells()
    );
    for (kind, count) in result.failure_summary() {
        println!("  {}: {}", kind, count);
    }

    if let Some(path) = &args.csv {
        write_csv(path, &result)?;
        println!("Wrote PDSI/Z series to {}", path.display());
    }

    if let Some(path) = &args.json {
        let summaries: Vec<CellSummary> = result
            .cells()
            .iter()
            .enumerate()
            .map(|(cell, outcome)| CellSummary {
                cell,
                awc_mm: grid.cell(cell).map(|f| *f.awc()).unwrap_or(f64::NAN),
                trend_per_decade: trends[cell].map(|t| t * 10.0),
                metadata: outcome.as_ref().ok().map(|o| &o.metadata),
                failure: outcome.as_ref().err().map(ToString::to_string),
            })
            .collect();
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, &summaries)?;
        println!("Wrote calibration metadata to {}", path.display());
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
