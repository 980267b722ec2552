//! lnp-escape: signal extraction for LNP flow-cytometry escape assays
//!
//! Turns per-replicate median fluorescence intensities (AF488 association, Cy5/SNAP
//! escape probe, mScarlet expression) into background-corrected, association-normalized
//! escape and expression metrics. Optionally exposed to Python via PyO3.

pub mod background;
pub mod baseline;
pub mod config;
pub mod error;
pub mod io;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod snap_wt;
pub mod stats;
pub mod summary;

pub use config::PipelineConfig;
pub use error::{EscapeError, EscapeResult};
pub use metrics::DerivedMetricRow;
pub use pipeline::{run_files, run_pipeline, PipelineOutput};
pub use record::{CellType, Channel, ReplicateRecord, SensorType};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Python module initialization
#[cfg(feature = "python")]
#[pymodule]
fn lnp_escape(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(pipeline::run_pipeline_py, m)?)?;

    // Version
    #[pyfn(m)]
    fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    Ok(())
}
