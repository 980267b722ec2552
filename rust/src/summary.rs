//! Per-sample summary of the derived metrics
//!
//! Long format: one row per (formulation, sample_name, metric) with the count of
//! non-missing replicates, their mean and sample standard deviation.

use std::collections::BTreeMap;

use crate::metrics::DerivedMetricRow;
use crate::stats;

/// Metric columns summarized, in output order
pub const METRICS: [&str; 7] = [
    "AF488",
    "adj_Cy5_abs",
    "adj_Cy5_rel",
    "SNAP_perc_of_Cy5",
    "mScarlet",
    "express_per_assoc",
    "express_per_escape",
];

fn metric_value(row: &DerivedMetricRow, metric: &str) -> Option<f64> {
    match metric {
        "AF488" => row.af488,
        "adj_Cy5_abs" => row.adj_cy5_abs,
        "adj_Cy5_rel" => row.adj_cy5_rel,
        "SNAP_perc_of_Cy5" => row.snap_perc_of_cy5,
        "mScarlet" => row.mscarlet,
        "express_per_assoc" => row.express_per_assoc,
        "express_per_escape" => row.express_per_escape,
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleSummary {
    pub formulation: String,
    pub sample_name: String,
    pub metric: &'static str,
    pub n: usize,
    pub mean: Option<f64>,
    pub sd: Option<f64>,
}

pub fn summarize(rows: &[DerivedMetricRow]) -> Vec<SampleSummary> {
    let mut by_sample: BTreeMap<(&str, &str), Vec<&DerivedMetricRow>> = BTreeMap::new();
    for row in rows {
        by_sample
            .entry((row.formulation.as_str(), row.sample_name.as_str()))
            .or_default()
            .push(row);
    }

    let mut out = Vec::with_capacity(by_sample.len() * METRICS.len());
    for ((formulation, sample_name), members) in by_sample {
        for metric in METRICS {
            let values: Vec<f64> = members.iter().filter_map(|r| metric_value(r, metric)).collect();
            out.push(SampleSummary {
                formulation: formulation.to_string(),
                sample_name: sample_name.to_string(),
                metric,
                n: values.len(),
                mean: stats::mean_of(&values),
                sd: stats::std_dev(&values),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CellType, SensorType};

    fn row(sample_name: &str, af488: Option<f64>, per_escape: Option<f64>) -> DerivedMetricRow {
        DerivedMetricRow {
            formulation: "F1".to_string(),
            sample_name: sample_name.to_string(),
            sample_id: "S1".to_string(),
            group_id: "G1".to_string(),
            replicate: 1,
            cell_type: CellType::Lsa,
            sensor_type: SensorType::Snap,
            viability: None,
            af488,
            adj_cy5_abs: Some(0.0),
            adj_cy5_rel: None,
            snap_perc_of_cy5: None,
            mscarlet: Some(1.0),
            express_per_assoc: None,
            express_per_escape: per_escape,
        }
    }

    #[test]
    fn test_summary_skips_missing() {
        let rows = vec![row("A", Some(2.0), None), row("A", Some(4.0), None), row("A", None, None)];
        let summary = summarize(&rows);
        assert_eq!(summary.len(), METRICS.len());

        let af = summary.iter().find(|s| s.metric == "AF488").unwrap();
        assert_eq!(af.n, 2);
        assert_eq!(af.mean, Some(3.0));
        assert!((af.sd.unwrap() - 2.0_f64.sqrt()).abs() < 1e-12);

        let escape = summary.iter().find(|s| s.metric == "express_per_escape").unwrap();
        assert_eq!(escape.n, 0);
        assert_eq!(escape.mean, None);
        assert_eq!(escape.sd, None);
    }

    #[test]
    fn test_summary_groups_by_sample_name() {
        let rows = vec![row("A", Some(2.0), None), row("B", Some(4.0), None)];
        let summary = summarize(&rows);
        assert_eq!(summary.len(), 2 * METRICS.len());
        assert_eq!(summary[0].sample_name, "A");
        assert_eq!(summary[METRICS.len()].sample_name, "B");
        // a single replicate has no standard deviation
        assert_eq!(summary[0].sd, None);
    }
}
