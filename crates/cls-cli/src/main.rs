//! clscan CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cls_inference::{MuScanDriver, ScanConfig};
use cls_table::{ColumnTable, DeriveMode, load_text, save_text};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clscan")]
#[command(about = "clscan - toy-based CLs scans and event selection")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the signal strength and report CLs bands and upper limits
    Scan {
        /// Scan configuration (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto). Overrides the configuration.
        #[arg(long)]
        threads: Option<usize>,

        /// Random seed. Overrides the configuration.
        #[arg(long)]
        seed: Option<u64>,

        /// Leave out the per-point test-statistic histograms.
        #[arg(long)]
        no_snapshots: bool,
    },

    /// CLs at a single signal strength
    Hypotest {
        /// Scan configuration (JSON); the mu range is ignored
        #[arg(short, long)]
        input: PathBuf,

        /// Tested signal strength
        #[arg(long)]
        mu: f64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Random seed. Overrides the configuration.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Apply a cut to a text table
    Select {
        /// Whitespace-delimited table with a header line
        #[arg(short, long)]
        table: PathBuf,

        /// Cut expression, e.g. "njet >= 4 && pt_lead > 30"
        #[arg(long)]
        cut: String,

        /// Keep only these columns (comma-separated)
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,

        /// Write the selected rows to this text table
        #[arg(long)]
        save: Option<PathBuf>,

        /// Output file for the summary (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Add a column computed from an expression
    Derive {
        /// Whitespace-delimited table with a header line
        #[arg(short, long)]
        table: PathBuf,

        /// Name of the new column
        #[arg(long)]
        name: String,

        /// Expression, e.g. "sqrt(px*px + py*py)"
        #[arg(long)]
        expr: String,

        /// Replace the column if it already exists
        #[arg(long)]
        overwrite: bool,

        /// Write the extended table to this file
        #[arg(long)]
        save: Option<PathBuf>,

        /// Output file for the summary (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Count rows, optionally after a cut
    Entries {
        /// Whitespace-delimited table with a header line
        #[arg(short, long)]
        table: PathBuf,

        /// Cut expression
        #[arg(long)]
        cut: Option<String>,

        /// Output file for the summary (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Scan { input, output, threads, seed, no_snapshots } => {
            cmd_scan(&input, output.as_ref(), threads, seed, no_snapshots)
        }
        Commands::Hypotest { input, mu, output, seed } => cmd_hypotest(&input, mu, output.as_ref(), seed),
        Commands::Select { table, cut, columns, save, output } => {
            cmd_select(&table, &cut, columns.as_deref(), save.as_ref(), output.as_ref())
        }
        Commands::Derive { table, name, expr, overwrite, save, output } => {
            cmd_derive(&table, &name, &expr, overwrite, save.as_ref(), output.as_ref())
        }
        Commands::Entries { table, cut, output } => cmd_entries(&table, cut.as_deref(), output.as_ref()),
        Commands::Version => {
            println!("clscan {}", cls_core::VERSION);
            Ok(())
        }
    }
}

fn load_config(input: &PathBuf, seed: Option<u64>) -> Result<ScanConfig> {
    let mut config = ScanConfig::from_path(input)
        .with_context(|| format!("failed to load scan configuration {}", input.display()))?;
    if seed.is_some() {
        config.seed = seed;
    }
    Ok(config)
}

fn load_table(path: &PathBuf) -> Result<ColumnTable> {
    let table = load_text(path, None).with_context(|| format!("failed to read table {}", path.display()))?;
    tracing::debug!(rows = table.n_rows(), columns = table.n_columns(), "loaded table");
    Ok(table)
}

fn cmd_scan(
    input: &PathBuf,
    output: Option<&PathBuf>,
    threads: Option<usize>,
    seed: Option<u64>,
    no_snapshots: bool,
) -> Result<()> {
    let mut config = load_config(input, seed)?;
    if let Some(t) = threads {
        config.threads = t;
    }
    let threads = config.threads;
    let mut driver = MuScanDriver::new(config)?;
    let mut result = if threads == 1 { driver.run()? } else { driver.run_parallel()? };
    tracing::info!(
        points = result.points.len(),
        seed = result.seed,
        expected_limit = result.limits.as_ref().map(|l| l.expected_median()),
        observed_limit = result.limits.as_ref().and_then(|l| l.observed),
        "scan finished"
    );
    if no_snapshots {
        result.snapshots.clear();
    }
    write_json(output, serde_json::to_value(&result)?)
}

fn cmd_hypotest(input: &PathBuf, mu: f64, output: Option<&PathBuf>, seed: Option<u64>) -> Result<()> {
    let mut config = load_config(input, seed)?;
    // Validation then checks the alternative at the tested point only.
    config.mu_min = mu;
    config.mu_max = mu;
    config.n_points = 1;
    let mut driver = MuScanDriver::new(config)?;
    let r = driver.hypotest(mu)?;
    tracing::debug!(mu = r.mu, cls_median = r.expected[0].cls, cls_obs = r.observed.map(|o| o.cls), "hypotest result");

    let output_json = serde_json::json!({
        "mu": r.mu,
        "seed": driver.seed(),
        "observed": r.observed,
        "expected_quantiles": cls_core::types::BAND_QUANTILES,
        "expected": r.expected,
    });
    write_json(output, output_json)
}

fn cmd_select(
    table: &PathBuf,
    cut: &str,
    columns: Option<&[String]>,
    save: Option<&PathBuf>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let t = load_table(table)?;
    let indices = t.cut_indices(cut)?;
    let names: Option<Vec<&str>> = columns.map(|c| c.iter().map(String::as_str).collect());
    let selected = t.subsample(Some(cut), None, names.as_deref())?;
    tracing::info!(cut, rows = t.n_rows(), selected = indices.len(), "selection applied");

    if let Some(path) = save {
        save_text(&selected, path)?;
    }
    write_json(
        output,
        serde_json::json!({
            "cut": cut,
            "n_rows": t.n_rows(),
            "n_selected": indices.len(),
            "indices": indices,
            "columns": selected.names(),
        }),
    )
}

fn cmd_derive(
    table: &PathBuf,
    name: &str,
    expr: &str,
    overwrite: bool,
    save: Option<&PathBuf>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let mut t = load_table(table)?;
    let mode = if overwrite { DeriveMode::Overwrite } else { DeriveMode::Create };
    t.derive(name, expr, mode)?;
    let column = t.column(name)?;
    if column.values().iter().any(|v| !v.is_finite()) {
        tracing::warn!(name, "derived column contains non-finite values");
    }
    if let Some(path) = save {
        save_text(&t, path)?;
    }
    write_json(
        output,
        serde_json::json!({
            "name": name,
            "expr": expr,
            "kind": column.kind(),
            "values": column.values(),
        }),
    )
}

fn cmd_entries(table: &PathBuf, cut: Option<&str>, output: Option<&PathBuf>) -> Result<()> {
    let t = load_table(table)?;
    let entries = t.entries(cut)?;
    tracing::debug!(rows = t.n_rows(), entries, "entries counted");
    write_json(output, serde_json::json!({ "n_rows": t.n_rows(), "cut": cut, "entries": entries }))
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
