//! Pipeline configuration
//!
//! Everything the stages need is carried by `PipelineConfig` and passed in explicitly.
//! The probe switch-on correction factor is a per-experiment constant; it is either
//! given directly or looked up by probe-batch identifier in a `CorrectionFactorTable`.
//!
//! # TOML layout
//! ```toml
//! untreated_id = "untreated"
//! alpha = 0.05            # optional
//! min_replicates = 2      # optional
//!
//! # either a literal factor ...
//! correction_factor = 0.42
//! # ... or a batch looked up in an inline table and/or a CSV file
//! probe_batch = "LOT-2311"
//! correction_factors_csv = "probe_batches.csv"
//! [correction_factors]
//! "LOT-2311" = 0.42
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;

use crate::error::{EscapeError, EscapeResult};
use crate::stats::{GateRule, MissingValues, Outcome};

pub const DEFAULT_ALPHA: f64 = 0.05;
pub const DEFAULT_MIN_REPLICATES: usize = 2;

/// Parameters of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// `sample_id` of the untreated baseline wells
    pub untreated_id: String,
    /// Probe switch-on efficiency for the batch used in this experiment
    pub correction_factor: f64,
    /// Significance level for both gated tests
    pub alpha: f64,
    /// Minimum replicates per side before a t-test is attempted
    pub min_replicates: usize,
}

impl PipelineConfig {
    pub fn new(untreated_id: impl Into<String>, correction_factor: f64) -> Self {
        Self {
            untreated_id: untreated_id.into(),
            correction_factor,
            alpha: DEFAULT_ALPHA,
            min_replicates: DEFAULT_MIN_REPLICATES,
        }
    }

    pub fn validate(&self) -> EscapeResult<()> {
        if self.untreated_id.trim().is_empty() {
            return Err(EscapeError::Config("untreated_id must not be empty".to_string()));
        }
        if !self.correction_factor.is_finite() || self.correction_factor <= 0.0 {
            return Err(EscapeError::Config(format!(
                "correction_factor must be a positive number, got {}",
                self.correction_factor
            )));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(EscapeError::Config(format!("alpha must lie in (0, 1), got {}", self.alpha)));
        }
        if self.min_replicates < 2 {
            return Err(EscapeError::Config(format!(
                "min_replicates must be at least 2, got {}",
                self.min_replicates
            )));
        }
        Ok(())
    }

    /// Gate for sample-vs-baseline tests: a missing value or too few replicates
    /// leaves the flag untestable (NA); the corrector zeroes untestable groups.
    pub fn baseline_rule(&self) -> GateRule {
        GateRule {
            alpha: self.alpha,
            min_n: self.min_replicates,
            missing: MissingValues::Untestable,
            undersampled: Outcome::Untestable,
        }
    }

    /// Gate for the WT-vs-LSA test: any guard failure is an explicit `false`.
    pub fn snap_rule(&self) -> GateRule {
        GateRule {
            alpha: self.alpha,
            min_n: self.min_replicates,
            missing: MissingValues::NotSignificant,
            undersampled: Outcome::NotSignificant,
        }
    }

    /// Load and resolve a TOML configuration file.
    ///
    /// A relative `correction_factors_csv` is resolved against the config file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let file: ConfigFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        file.resolve(base_dir)
    }

    /// Parse and resolve TOML content; relative CSV paths resolve against the working directory.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).context("Failed to parse config")?;
        file.resolve(Path::new("."))
    }
}

/// On-disk configuration before the correction factor is resolved
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    untreated_id: String,
    #[serde(default)]
    correction_factor: Option<f64>,
    #[serde(default)]
    probe_batch: Option<String>,
    #[serde(default)]
    correction_factors: BTreeMap<String, f64>,
    #[serde(default)]
    correction_factors_csv: Option<PathBuf>,
    #[serde(default)]
    alpha: Option<f64>,
    #[serde(default)]
    min_replicates: Option<usize>,
}

impl ConfigFile {
    fn resolve(self, base_dir: &Path) -> Result<PipelineConfig> {
        let correction_factor = match (self.correction_factor, &self.probe_batch) {
            (Some(cf), None) => cf,
            (Some(_), Some(_)) => {
                return Err(EscapeError::Config(
                    "set either correction_factor or probe_batch, not both".to_string(),
                )
                .into())
            }
            (None, Some(batch)) => {
                let mut table = CorrectionFactorTable::default();
                if let Some(csv_path) = &self.correction_factors_csv {
                    let full = if csv_path.is_absolute() {
                        csv_path.clone()
                    } else {
                        base_dir.join(csv_path)
                    };
                    table = CorrectionFactorTable::load_csv(&full)?;
                }
                for (b, f) in &self.correction_factors {
                    table.insert(b, *f);
                }
                table.lookup(batch)?
            }
            (None, None) => {
                return Err(EscapeError::Config(
                    "a correction_factor or a probe_batch is required".to_string(),
                )
                .into())
            }
        };

        let config = PipelineConfig {
            untreated_id: self.untreated_id,
            correction_factor,
            alpha: self.alpha.unwrap_or(DEFAULT_ALPHA),
            min_replicates: self.min_replicates.unwrap_or(DEFAULT_MIN_REPLICATES),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Probe-batch identifier -> empirically determined switch-on efficiency
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionFactorTable {
    pub factors: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct CorrectionFactorRow {
    probe_batch: String,
    correction_factor: f64,
}

impl CorrectionFactorTable {
    pub fn insert(&mut self, batch: &str, factor: f64) {
        self.factors.insert(batch.trim().to_string(), factor);
    }

    pub fn lookup(&self, batch: &str) -> EscapeResult<f64> {
        self.factors
            .get(batch.trim())
            .copied()
            .ok_or_else(|| EscapeError::Config(format!("no correction factor for probe batch '{}'", batch)))
    }

    /// Load from a CSV with header `probe_batch,correction_factor`
    pub fn load_csv(path: &Path) -> Result<Self> {
        let reader = crate::io::get_reader(path)?;
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let mut table = Self::default();
        for row in csv_reader.deserialize::<CorrectionFactorRow>() {
            let row = row.with_context(|| format!("Invalid correction factor row in {:?}", path))?;
            table.insert(&row.probe_batch, row.correction_factor);
        }

        info!("Loaded {} probe-batch correction factors from {:?}", table.factors.len(), path);
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate() {
        assert!(PipelineConfig::new("untreated", 0.5).validate().is_ok());
        assert!(PipelineConfig::new("untreated", 0.0).validate().is_err());
        assert!(PipelineConfig::new("untreated", f64::NAN).validate().is_err());
        assert!(PipelineConfig::new(" ", 0.5).validate().is_err());

        let mut cfg = PipelineConfig::new("untreated", 0.5);
        cfg.min_replicates = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rules_differ_on_undersampling() {
        let cfg = PipelineConfig::new("untreated", 0.5);
        assert_eq!(cfg.baseline_rule().undersampled, Outcome::Untestable);
        assert_eq!(cfg.snap_rule().undersampled, Outcome::NotSignificant);
    }

    #[test]
    fn test_toml_literal_factor() {
        let cfg = PipelineConfig::from_toml_str("untreated_id = \"UT\"\ncorrection_factor = 0.8\n").unwrap();
        assert_eq!(cfg.untreated_id, "UT");
        assert_eq!(cfg.correction_factor, 0.8);
        assert_eq!(cfg.alpha, DEFAULT_ALPHA);
    }

    #[test]
    fn test_toml_batch_lookup() {
        let toml = r#"
            untreated_id = "UT"
            probe_batch = "LOT-2"
            alpha = 0.01
            [correction_factors]
            "LOT-1" = 0.3
            "LOT-2" = 0.45
        "#;
        let cfg = PipelineConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.correction_factor, 0.45);
        assert_eq!(cfg.alpha, 0.01);
    }

    #[test]
    fn test_toml_unknown_batch() {
        let toml = "untreated_id = \"UT\"\nprobe_batch = \"LOT-9\"\n[correction_factors]\n\"LOT-1\" = 0.3\n";
        assert!(PipelineConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_toml_missing_factor() {
        assert!(PipelineConfig::from_toml_str("untreated_id = \"UT\"\n").is_err());
    }

    #[test]
    fn test_config_file_with_batch_csv() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("batches.csv");
        let mut f = std::fs::File::create(&csv_path).unwrap();
        writeln!(f, "probe_batch,correction_factor").unwrap();
        writeln!(f, "LOT-A, 0.25").unwrap();
        writeln!(f, "LOT-B, 0.5").unwrap();
        drop(f);

        let cfg_path = dir.path().join("run.toml");
        std::fs::write(
            &cfg_path,
            "untreated_id = \"UT\"\nprobe_batch = \"LOT-B\"\ncorrection_factors_csv = \"batches.csv\"\n",
        )
        .unwrap();

        let cfg = PipelineConfig::from_file(&cfg_path).unwrap();
        assert_eq!(cfg.correction_factor, 0.5);
    }
}
