use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use lnp_escape::{run_files, PipelineConfig};

#[derive(Parser)]
#[command(name = "lnp-escape")]
#[command(about = "Derive LNP association, escape and expression metrics from flow-cytometry MFIs", long_about = None)]
struct Cli {
    /// Enriched per-replicate CSV (optionally .gz)
    #[arg(short, long)]
    input: PathBuf,

    /// Derived metrics CSV
    #[arg(short, long)]
    output: PathBuf,

    /// Config TOML file
    #[arg(short, long, conflicts_with_all = ["untreated_id", "correction_factor"])]
    config: Option<PathBuf>,

    /// sample_id of the untreated baseline wells
    #[arg(long)]
    untreated_id: Option<String>,

    /// Probe switch-on correction factor for this batch
    #[arg(long)]
    correction_factor: Option<f64>,

    /// Significance level for both gated tests
    #[arg(long)]
    alpha: Option<f64>,

    /// Write every significance decision to this CSV
    #[arg(long)]
    flags: Option<PathBuf>,

    /// Write per-sample mean/sd summary to this CSV
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match (&cli.config, &cli.untreated_id, cli.correction_factor) {
        (Some(path), _, _) => PipelineConfig::from_file(path)?,
        (None, Some(untreated), Some(cf)) => PipelineConfig::new(untreated.clone(), cf),
        _ => bail!("either --config or both --untreated-id and --correction-factor are required"),
    };
    if let Some(alpha) = cli.alpha {
        config.alpha = alpha;
    }
    config.validate()?;

    let result = run_files(
        &cli.input,
        &config,
        &cli.output,
        cli.flags.as_deref(),
        cli.summary.as_deref(),
    )?;

    let n_sig = result.flags.iter().filter(|f| f.is_significant()).count();
    info!(
        "Done: {} metric rows, {} of {} tests significant",
        result.metrics.len(),
        n_sig,
        result.flags.len()
    );
    Ok(())
}
