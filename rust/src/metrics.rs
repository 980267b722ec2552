//! Derived metrics
//!
//! Per replicate:
//! - `adj_Cy5_rel = adj_Cy5_abs / AF488` (escape per unit association)
//! - `express_per_assoc = mScarlet / AF488`
//! - `express_per_escape = mScarlet / adj_Cy5_abs` (NA when escape is 0)
//!
//! Then, on LSA wells only, the SNAP escape is expressed as a percentage of the
//! matching Cy5-sensor sample (same formulation and sample_name), scaled by the probe
//! batch correction factor. Only SNAP rows are emitted.

use std::collections::BTreeMap;

use log::{info, warn};

use crate::record::{CellType, SensorType};
use crate::snap_wt::EscapeRecord;
use crate::stats;

/// Final per-replicate output row
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetricRow {
    pub formulation: String,
    pub sample_name: String,
    pub sample_id: String,
    pub group_id: String,
    pub replicate: u32,
    pub cell_type: CellType,
    pub sensor_type: SensorType,
    pub viability: Option<f64>,
    /// Background-corrected association
    pub af488: Option<f64>,
    pub adj_cy5_abs: Option<f64>,
    pub adj_cy5_rel: Option<f64>,
    pub snap_perc_of_cy5: Option<f64>,
    /// Background-corrected expression
    pub mscarlet: Option<f64>,
    pub express_per_assoc: Option<f64>,
    pub express_per_escape: Option<f64>,
}

impl DerivedMetricRow {
    fn from_escape(rec: &EscapeRecord) -> Self {
        let corrected = &rec.normalized.corrected;
        let r = &corrected.record;

        let express_per_escape = match rec.adj_cy5_abs {
            Some(abs) if abs == 0.0 => None,
            abs => stats::ratio(corrected.mscarlet, abs),
        };

        Self {
            formulation: r.formulation.clone(),
            sample_name: r.sample_name.clone(),
            sample_id: r.sample_id.clone(),
            group_id: r.group_id.clone(),
            replicate: r.replicate,
            cell_type: r.cell_type,
            sensor_type: r.sensor_type,
            viability: r.viability,
            af488: corrected.af488,
            adj_cy5_abs: rec.adj_cy5_abs,
            adj_cy5_rel: stats::ratio(rec.adj_cy5_abs, corrected.af488),
            snap_perc_of_cy5: None,
            mscarlet: corrected.mscarlet,
            express_per_assoc: stats::ratio(corrected.mscarlet, corrected.af488),
            express_per_escape,
        }
    }
}

/// Per-replicate ratios for every record, WT included
pub fn per_replicate_metrics(records: &[EscapeRecord]) -> Vec<DerivedMetricRow> {
    records.iter().map(DerivedMetricRow::from_escape).collect()
}

/// Mean Cy5-sensor `adj_Cy5_rel` per (formulation, sample_name)
fn cy5_reference_means(rows: &[DerivedMetricRow]) -> BTreeMap<(String, String), Option<f64>> {
    let mut values: BTreeMap<(String, String), Vec<Option<f64>>> = BTreeMap::new();
    for row in rows {
        match row.sensor_type {
            SensorType::Cy5 => values
                .entry((row.formulation.clone(), row.sample_name.clone()))
                .or_default()
                .push(row.adj_cy5_rel),
            SensorType::Snap => {}
        }
    }
    values.into_iter().map(|(k, v)| (k, stats::mean(&v))).collect()
}

/// Percent escape efficiency of LSA SNAP rows relative to their Cy5-sensor sibling.
///
/// Rows without a sibling (or whose sibling mean is 0/NA) get NA.
pub fn percent_of_cy5(rows: Vec<DerivedMetricRow>, correction_factor: f64) -> Vec<DerivedMetricRow> {
    let lsa: Vec<DerivedMetricRow> = rows.into_iter().filter(|r| r.cell_type == CellType::Lsa).collect();
    let reference = cy5_reference_means(&lsa);

    let mut missing: Vec<(String, String)> = Vec::new();
    let out: Vec<DerivedMetricRow> = lsa
        .into_iter()
        .filter(|r| r.sensor_type == SensorType::Snap)
        .map(|mut row| {
            let key = (row.formulation.clone(), row.sample_name.clone());
            let ref_mean = match reference.get(&key) {
                Some(m) => *m,
                None => {
                    if !missing.contains(&key) {
                        missing.push(key);
                    }
                    None
                }
            };
            let scaled = row.adj_cy5_rel.map(|rel| rel * correction_factor * 100.0);
            row.snap_perc_of_cy5 = stats::ratio(scaled, ref_mean);
            row
        })
        .collect();

    for (formulation, sample_name) in &missing {
        warn!(
            "No Cy5-sensor sample for formulation={} sample_name={}; SNAP_perc_of_Cy5 is NA",
            formulation, sample_name
        );
    }
    out
}

/// Compute all derived metrics and keep the LSA SNAP rows
pub fn derive_metrics(records: &[EscapeRecord], correction_factor: f64) -> Vec<DerivedMetricRow> {
    let rows = percent_of_cy5(per_replicate_metrics(records), correction_factor);
    info!("Derived metrics for {} SNAP replicates", rows.len());
    rows
}
