//! Escape pipeline orchestration
//!
//! Chains the stages in order, each consuming the previous stage's table:
//!
//! 1. baseline significance tests (per cell type, per channel)
//! 2. background correction, baseline wells dropped
//! 3. cross-channel normalization against WT association
//! 4. SNAP-vs-WT test and WT subtraction, clamped at 0
//! 5. derived metrics, LSA SNAP rows kept
//!
//! Entry points: `run_pipeline()` on in-memory records, `run_files()` for CSV in/out,
//! and `run_pipeline_py()` exposed to Python via PyO3 (feature `python`).

use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::background::correct_background;
use crate::baseline::{test_against_baseline, BaselineSet, SignificanceFlag};
use crate::config::PipelineConfig;
use crate::error::{EscapeError, EscapeResult};
use crate::metrics::{derive_metrics, DerivedMetricRow};
use crate::normalize::normalize_cross_channel;
use crate::record::{check_group_consistency, ReplicateRecord};
use crate::snap_wt::difference_snap_vs_wt;
use crate::summary::{summarize, SampleSummary};

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub metrics: Vec<DerivedMetricRow>,
    /// Baseline flags first, then SNAP-vs-WT flags, each in key order
    pub flags: Vec<SignificanceFlag>,
}

impl PipelineOutput {
    pub fn summary(&self) -> Vec<SampleSummary> {
        summarize(&self.metrics)
    }
}

/// Run every stage on validated records.
///
/// Fails only on structural problems (bad configuration, inconsistent groups).
pub fn run_pipeline(records: &[ReplicateRecord], config: &PipelineConfig) -> EscapeResult<PipelineOutput> {
    config.validate()?;
    if records.is_empty() {
        return Err(EscapeError::EmptyInput);
    }
    check_group_consistency(records)?;

    info!(
        "Running escape pipeline on {} records (untreated='{}', correction_factor={})",
        records.len(),
        config.untreated_id,
        config.correction_factor
    );

    // Stage 1: baseline significance
    let baseline = BaselineSet::from_records(records, &config.untreated_id);
    let baseline_flags = test_against_baseline(records, &baseline, &config.untreated_id, &config.baseline_rule());

    // Stage 2: background correction
    let corrected = correct_background(records, &baseline, &baseline_flags, &config.untreated_id);

    // Stage 3: cross-channel normalization
    let normalized = normalize_cross_channel(corrected);

    // Stage 4: SNAP vs WT
    let (escape, snap_flags) = difference_snap_vs_wt(normalized, &config.snap_rule());

    // Stage 5: derived metrics
    let metrics = derive_metrics(&escape, config.correction_factor);

    let flags: Vec<SignificanceFlag> = baseline_flags
        .iter()
        .cloned()
        .chain(snap_flags.into_values())
        .collect();

    Ok(PipelineOutput { metrics, flags })
}

/// Load records from CSV, run the pipeline and write the requested tables
pub fn run_files(
    input: &Path,
    config: &PipelineConfig,
    output: &Path,
    flags_output: Option<&Path>,
    summary_output: Option<&Path>,
) -> Result<PipelineOutput> {
    let records = crate::io::load_records(input)?;
    let result = run_pipeline(&records, config).context("Pipeline failed")?;

    crate::io::write_metrics(output, &result.metrics)?;
    if let Some(p) = flags_output {
        crate::io::write_flags(p, &result.flags).context("Writing significance flags")?;
    }
    if let Some(p) = summary_output {
        crate::io::write_summary(p, &result.summary()).context("Writing summary")?;
    }
    Ok(result)
}

#[cfg(feature = "python")]
mod python {
    use std::path::PathBuf;

    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    use crate::config::PipelineConfig;

    /// Run the escape pipeline on an enriched CSV and write the derived metrics.
    ///
    /// Returns the number of metric rows written.
    #[pyfunction]
    #[pyo3(signature = (
        input_path,
        output_path,
        untreated_id,
        correction_factor,
        alpha=0.05,
        min_replicates=2,
        flags_path=None,
        summary_path=None
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn run_pipeline_py(
        input_path: PathBuf,
        output_path: PathBuf,
        untreated_id: String,
        correction_factor: f64,
        alpha: f64,
        min_replicates: usize,
        flags_path: Option<PathBuf>,
        summary_path: Option<PathBuf>,
    ) -> PyResult<usize> {
        let mut config = PipelineConfig::new(untreated_id, correction_factor);
        config.alpha = alpha;
        config.min_replicates = min_replicates;
        config.validate().map_err(|e| PyValueError::new_err(e.to_string()))?;

        let result = super::run_files(
            &input_path,
            &config,
            &output_path,
            flags_path.as_deref(),
            summary_path.as_deref(),
        )
        .map_err(|e| PyRuntimeError::new_err(format!("{:#}", e)))?;

        Ok(result.metrics.len())
    }
}

#[cfg(feature = "python")]
pub use python::run_pipeline_py;
