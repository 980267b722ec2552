//! Cross-channel normalization
//!
//! The escape probe signal scales with how much LNP reached the cell. Within each
//! (sensor_type, formulation, sample_id) partition, Cy5 is divided by the record's
//! association relative to the WT mean:
//!
//! `norm_factor = AF488 / mean(AF488 | WT)`, `adj_Cy5 = Cy5 / norm_factor`
//!
//! Zero or undefined denominators give NA instead of failing the run.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::background::CorrectedRecord;
use crate::record::{CellType, SensorType};
use crate::stats;

/// A corrected record with its association-normalized Cy5
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub corrected: CorrectedRecord,
    pub wt_af488_mean: Option<f64>,
    pub norm_factor: Option<f64>,
    pub adj_cy5: Option<f64>,
}

/// Key for the normalization partition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartitionKey {
    pub sensor_type: SensorType,
    pub formulation: String,
    pub sample_id: String,
}

impl PartitionKey {
    pub fn of(rec: &CorrectedRecord) -> Self {
        Self {
            sensor_type: rec.record.sensor_type,
            formulation: rec.record.formulation.clone(),
            sample_id: rec.record.sample_id.clone(),
        }
    }
}

/// Mean WT AF488 per partition
pub fn wt_association_means(records: &[CorrectedRecord]) -> BTreeMap<PartitionKey, Option<f64>> {
    let mut wt_values: BTreeMap<PartitionKey, Vec<Option<f64>>> = BTreeMap::new();
    for rec in records {
        let entry = wt_values.entry(PartitionKey::of(rec)).or_default();
        match rec.record.cell_type {
            CellType::Wt => entry.push(rec.af488),
            CellType::Lsa => {}
        }
    }

    wt_values
        .into_iter()
        .map(|(key, values)| {
            let m = stats::mean(&values);
            if values.is_empty() {
                warn!(
                    "No WT wells for {} {} sample={}; adj_Cy5 will be NA",
                    key.sensor_type, key.formulation, key.sample_id
                );
            } else if m.map_or(true, |v| v == 0.0) {
                debug!(
                    "WT AF488 mean is {:?} for {} {} sample={}; adj_Cy5 will be NA",
                    m, key.sensor_type, key.formulation, key.sample_id
                );
            }
            (key, m)
        })
        .collect()
}

/// Rescale Cy5 by each record's association relative to WT
pub fn normalize_cross_channel(records: Vec<CorrectedRecord>) -> Vec<NormalizedRecord> {
    let wt_means = wt_association_means(&records);

    records
        .into_iter()
        .map(|rec| {
            let wt_af488_mean = wt_means.get(&PartitionKey::of(&rec)).copied().flatten();
            let norm_factor = stats::ratio(rec.af488, wt_af488_mean);
            let adj_cy5 = stats::ratio(rec.cy5, norm_factor);
            NormalizedRecord {
                corrected: rec,
                wt_af488_mean,
                norm_factor,
                adj_cy5,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ReplicateRecord;

    fn corrected(cell: CellType, sample: &str, af488: Option<f64>, cy5: Option<f64>) -> CorrectedRecord {
        CorrectedRecord {
            record: ReplicateRecord::new(cell, SensorType::Snap, "F1", sample, sample, "G1", 1),
            af488,
            cy5,
            mscarlet: Some(1.0),
        }
    }

    #[test]
    fn test_lsa_at_wt_mean_keeps_cy5() {
        let recs = vec![
            corrected(CellType::Wt, "S1", Some(20.0), Some(4.0)),
            corrected(CellType::Wt, "S1", Some(22.0), Some(4.0)),
            corrected(CellType::Wt, "S1", Some(21.0), Some(4.0)),
            corrected(CellType::Lsa, "S1", Some(21.0), Some(9.0)),
            corrected(CellType::Lsa, "S1", Some(21.0), Some(8.0)),
            corrected(CellType::Lsa, "S1", Some(21.0), Some(7.0)),
        ];
        let out = normalize_cross_channel(recs);
        for rec in out.iter().filter(|r| r.corrected.record.cell_type == CellType::Lsa) {
            assert!((rec.norm_factor.unwrap() - 1.0).abs() < 1e-12);
            assert!((rec.adj_cy5.unwrap() - rec.corrected.cy5.unwrap()).abs() < 1e-12);
        }
        assert_eq!(out[0].wt_af488_mean, Some(21.0));
    }

    #[test]
    fn test_double_association_halves_cy5() {
        let recs = vec![
            corrected(CellType::Wt, "S1", Some(10.0), Some(4.0)),
            corrected(CellType::Lsa, "S1", Some(20.0), Some(8.0)),
        ];
        let out = normalize_cross_channel(recs);
        assert_eq!(out[1].norm_factor, Some(2.0));
        assert_eq!(out[1].adj_cy5, Some(4.0));
    }

    #[test]
    fn test_zero_wt_mean_gives_na() {
        let recs = vec![
            corrected(CellType::Wt, "S1", Some(0.0), Some(4.0)),
            corrected(CellType::Lsa, "S1", Some(20.0), Some(8.0)),
        ];
        let out = normalize_cross_channel(recs);
        assert!(out.iter().all(|r| r.norm_factor.is_none() && r.adj_cy5.is_none()));
    }

    #[test]
    fn test_no_wt_partner_gives_na() {
        let recs = vec![
            corrected(CellType::Wt, "S1", Some(10.0), Some(4.0)),
            corrected(CellType::Lsa, "S2", Some(20.0), Some(8.0)),
        ];
        let out = normalize_cross_channel(recs);
        assert_eq!(out[0].adj_cy5, Some(4.0));
        assert_eq!(out[1].adj_cy5, None);
    }

    #[test]
    fn test_zero_association_gives_na() {
        let recs = vec![
            corrected(CellType::Wt, "S1", Some(10.0), Some(4.0)),
            corrected(CellType::Lsa, "S1", Some(0.0), Some(8.0)),
            corrected(CellType::Lsa, "S1", None, Some(8.0)),
        ];
        let out = normalize_cross_channel(recs);
        assert_eq!(out[1].norm_factor, Some(0.0));
        assert_eq!(out[1].adj_cy5, None);
        assert_eq!(out[2].norm_factor, None);
        assert_eq!(out[2].adj_cy5, None);
    }
}
