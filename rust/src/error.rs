//! Error types for the escape pipeline.
//!
//! Only structural problems with the input table or the configuration are errors.
//! Statistical edge cases (undersampled groups, zero denominators, missing partners)
//! resolve to documented placeholder values inside the stages instead.

use thiserror::Error;

/// Errors raised before any computation starts.
#[derive(Error, Debug)]
pub enum EscapeError {
    /// A `cell_type` outside {WT, LSA}
    #[error("row {row}: unrecognized cell_type '{value}' (expected WT or LSA)")]
    UnknownCellType { row: usize, value: String },

    /// A `sensor_type` outside {SNAP, Cy5}
    #[error("row {row}: unrecognized sensor_type '{value}' (expected SNAP or Cy5)")]
    UnknownSensorType { row: usize, value: String },

    /// Negative or non-finite fluorescence/viability value
    #[error("row {row}: invalid {field} value {value}")]
    InvalidValue { row: usize, field: &'static str, value: f64 },

    /// Empty identifier column
    #[error("row {row}: missing {field}")]
    MissingField { row: usize, field: &'static str },

    /// Replicates of one (cell_type, sample_id, group_id) disagree on sensor or formulation
    #[error("group ({cell_type}, {sample_id}, {group_id}) mixes {what}: '{first}' vs '{second}'")]
    InconsistentGroup {
        cell_type: String,
        sample_id: String,
        group_id: String,
        what: &'static str,
        first: String,
        second: String,
    },

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Empty input table
    #[error("input table contains no records")]
    EmptyInput,
}

pub type EscapeResult<T> = std::result::Result<T, EscapeError>;
