//! SNAP-vs-WT differencing
//!
//! SNAP-sensor samples report escape only as the excess of LSA over WT. For each SNAP
//! `sample_id` the normalized Cy5 of WT and LSA wells is Welch-tested; a significant
//! difference subtracts the WT mean, otherwise the escape signal is 0. Cy5-sensor
//! samples pass through unchanged. Negative escape is floored at 0 for every sensor.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::baseline::{SignificanceFlag, TestStage};
use crate::normalize::NormalizedRecord;
use crate::record::{CellType, Channel, SensorType};
use crate::stats::{self, GateRule};

/// A normalized record with its WT-subtracted, clamped escape signal
#[derive(Debug, Clone, PartialEq)]
pub struct EscapeRecord {
    pub normalized: NormalizedRecord,
    pub adj_cy5_abs: Option<f64>,
}

/// WT-vs-LSA test of normalized Cy5 for every SNAP-sensor sample, keyed by sample_id.
///
/// A missing value or fewer than `min_n` values on either side is an explicit
/// not-significant result.
pub fn test_snap_vs_wt(records: &[NormalizedRecord], rule: &GateRule) -> BTreeMap<String, SignificanceFlag> {
    let mut by_sample: BTreeMap<&str, (Vec<Option<f64>>, Vec<Option<f64>>)> = BTreeMap::new();
    for rec in records {
        let r = &rec.corrected.record;
        match r.sensor_type {
            SensorType::Snap => {
                let (wt, lsa) = by_sample.entry(r.sample_id.as_str()).or_default();
                match r.cell_type {
                    CellType::Wt => wt.push(rec.adj_cy5),
                    CellType::Lsa => lsa.push(rec.adj_cy5),
                }
            }
            SensorType::Cy5 => {}
        }
    }

    by_sample
        .into_iter()
        .map(|(sample_id, (wt, lsa))| {
            let test = stats::gated_welch_test(&lsa, &wt, rule);
            debug!(
                "SNAP sample={}: WT n={}, LSA n={}, outcome={}",
                sample_id,
                wt.len(),
                lsa.len(),
                test.outcome.as_str()
            );
            let flag = SignificanceFlag {
                stage: TestStage::SnapVsWt,
                cell_type: None,
                sample_id: sample_id.to_string(),
                group_id: None,
                channel: Channel::Cy5,
                n_test: lsa.len(),
                n_reference: wt.len(),
                p_value: test.welch.map(|w| w.p_value),
                outcome: test.outcome,
            };
            (sample_id.to_string(), flag)
        })
        .collect()
}

/// Mean WT adj_Cy5 per (formulation, sensor_type, sample_id)
fn wt_escape_means(records: &[NormalizedRecord]) -> BTreeMap<(String, SensorType, String), Option<f64>> {
    let mut values: BTreeMap<(String, SensorType, String), Vec<Option<f64>>> = BTreeMap::new();
    for rec in records {
        let r = &rec.corrected.record;
        if r.cell_type == CellType::Wt {
            values
                .entry((r.formulation.clone(), r.sensor_type, r.sample_id.clone()))
                .or_default()
                .push(rec.adj_cy5);
        }
    }
    values.into_iter().map(|(k, v)| (k, stats::mean(&v))).collect()
}

/// Apply the WT subtraction gated by `flags`, then clamp at zero
pub fn subtract_wt(
    records: Vec<NormalizedRecord>,
    flags: &BTreeMap<String, SignificanceFlag>,
) -> Vec<EscapeRecord> {
    let wt_means = wt_escape_means(&records);

    let out: Vec<EscapeRecord> = records
        .into_iter()
        .map(|rec| {
            let r = &rec.corrected.record;
            let abs = match r.sensor_type {
                SensorType::Snap => {
                    let significant = flags.get(&r.sample_id).map_or(false, |f| f.is_significant());
                    if significant {
                        let wt_mean = wt_means
                            .get(&(r.formulation.clone(), r.sensor_type, r.sample_id.clone()))
                            .copied()
                            .flatten();
                        match (rec.adj_cy5, wt_mean) {
                            (Some(v), Some(m)) => Some(v - m),
                            _ => None,
                        }
                    } else {
                        Some(0.0)
                    }
                }
                SensorType::Cy5 => rec.adj_cy5,
            };
            EscapeRecord {
                adj_cy5_abs: abs.map(|v| v.max(0.0)),
                normalized: rec,
            }
        })
        .collect();

    let n_sig = flags.values().filter(|f| f.is_significant()).count();
    info!("SNAP vs WT: {} of {} SNAP samples significant", n_sig, flags.len());
    out
}

/// Test and subtract in one step
pub fn difference_snap_vs_wt(
    records: Vec<NormalizedRecord>,
    rule: &GateRule,
) -> (Vec<EscapeRecord>, BTreeMap<String, SignificanceFlag>) {
    let flags = test_snap_vs_wt(&records, rule);
    (subtract_wt(records, &flags), flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::CorrectedRecord;
    use crate::config::PipelineConfig;
    use crate::record::ReplicateRecord;
    use crate::stats::Outcome;

    fn norm(cell: CellType, sensor: SensorType, sample: &str, adj: Option<f64>) -> NormalizedRecord {
        NormalizedRecord {
            corrected: CorrectedRecord {
                record: ReplicateRecord::new(cell, sensor, "F1", sample, sample, "G1", 1),
                af488: Some(1.0),
                cy5: adj,
                mscarlet: Some(1.0),
            },
            wt_af488_mean: Some(1.0),
            norm_factor: Some(1.0),
            adj_cy5: adj,
        }
    }

    fn rule() -> GateRule {
        PipelineConfig::new("UT", 1.0).snap_rule()
    }

    #[test]
    fn test_identical_distributions_zeroed() {
        let mut recs: Vec<NormalizedRecord> =
            (0..2).map(|_| norm(CellType::Wt, SensorType::Snap, "S1", Some(1.0))).collect();
        recs.extend((0..3).map(|_| norm(CellType::Lsa, SensorType::Snap, "S1", Some(1.0))));

        let (out, flags) = difference_snap_vs_wt(recs, &rule());
        assert_eq!(flags["S1"].outcome, Outcome::NotSignificant);
        assert!(out.iter().all(|r| r.adj_cy5_abs == Some(0.0)));
    }

    #[test]
    fn test_single_wt_value_not_significant() {
        let recs = vec![
            norm(CellType::Wt, SensorType::Snap, "S1", Some(1.0)),
            norm(CellType::Lsa, SensorType::Snap, "S1", Some(10.0)),
            norm(CellType::Lsa, SensorType::Snap, "S1", Some(11.0)),
        ];
        let flags = test_snap_vs_wt(&recs, &rule());
        assert_eq!(flags["S1"].outcome, Outcome::NotSignificant);
        assert_eq!(flags["S1"].p_value, None);
    }

    #[test]
    fn test_missing_value_not_significant() {
        let recs = vec![
            norm(CellType::Wt, SensorType::Snap, "S1", Some(1.0)),
            norm(CellType::Wt, SensorType::Snap, "S1", None),
            norm(CellType::Wt, SensorType::Snap, "S1", Some(1.2)),
            norm(CellType::Lsa, SensorType::Snap, "S1", Some(10.0)),
            norm(CellType::Lsa, SensorType::Snap, "S1", Some(11.0)),
            norm(CellType::Lsa, SensorType::Snap, "S1", Some(12.0)),
        ];
        let (out, flags) = difference_snap_vs_wt(recs, &rule());
        assert_eq!(flags["S1"].outcome, Outcome::NotSignificant);
        assert!(out.iter().all(|r| r.adj_cy5_abs == Some(0.0)));
    }

    #[test]
    fn test_significant_subtracts_wt_mean_and_clamps() {
        let recs = vec![
            norm(CellType::Wt, SensorType::Snap, "S1", Some(1.0)),
            norm(CellType::Wt, SensorType::Snap, "S1", Some(2.0)),
            norm(CellType::Wt, SensorType::Snap, "S1", Some(3.0)),
            norm(CellType::Lsa, SensorType::Snap, "S1", Some(10.0)),
            norm(CellType::Lsa, SensorType::Snap, "S1", Some(11.0)),
            norm(CellType::Lsa, SensorType::Snap, "S1", Some(12.0)),
        ];
        let (out, flags) = difference_snap_vs_wt(recs, &rule());
        assert!(flags["S1"].is_significant());

        let abs: Vec<f64> = out.iter().map(|r| r.adj_cy5_abs.unwrap()).collect();
        // WT rows fall below their own mean and are floored
        assert_eq!(abs, vec![0.0, 0.0, 1.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn test_cy5_sensor_passes_through() {
        let recs = vec![
            norm(CellType::Wt, SensorType::Cy5, "C1", Some(5.0)),
            norm(CellType::Lsa, SensorType::Cy5, "C1", Some(7.0)),
            norm(CellType::Lsa, SensorType::Cy5, "C1", None),
        ];
        let (out, flags) = difference_snap_vs_wt(recs, &rule());
        assert!(flags.is_empty(), "Cy5-sensor samples are never tested");
        let abs: Vec<Option<f64>> = out.iter().map(|r| r.adj_cy5_abs).collect();
        assert_eq!(abs, vec![Some(5.0), Some(7.0), None]);
    }
}
