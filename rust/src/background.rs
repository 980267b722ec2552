//! Background correction against the untreated baseline
//!
//! Per channel: significant groups get `raw - mean(baseline)`, everything else is 0.
//! The Cy5 channel of Cy5-sensor wells is carried through raw; those samples are only
//! ever compared against WT later. Baseline wells are dropped from the output.

use log::info;

use crate::baseline::{BaselineSet, SignificanceTable};
use crate::record::{Channel, ReplicateRecord, SensorType};

/// A replicate with background-corrected channels
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedRecord {
    pub record: ReplicateRecord,
    pub af488: Option<f64>,
    pub cy5: Option<f64>,
    pub mscarlet: Option<f64>,
}

impl CorrectedRecord {
    pub fn value(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Af488 => self.af488,
            Channel::Cy5 => self.cy5,
            Channel::MScarlet => self.mscarlet,
        }
    }
}

/// Corrected value of one channel of one record
pub fn correct_channel(
    rec: &ReplicateRecord,
    channel: Channel,
    baseline: &BaselineSet,
    flags: &SignificanceTable,
) -> Option<f64> {
    if let (Channel::Cy5, SensorType::Cy5) = (channel, rec.sensor_type) {
        return rec.raw(channel);
    }

    if flags.is_significant(rec.cell_type, &rec.group_key(), channel) {
        match (rec.raw(channel), baseline.mean(rec.cell_type, channel)) {
            (Some(raw), Some(bg)) => Some(raw - bg),
            _ => None,
        }
    } else {
        Some(0.0)
    }
}

/// Apply the significance decisions to every non-baseline record
pub fn correct_background(
    records: &[ReplicateRecord],
    baseline: &BaselineSet,
    flags: &SignificanceTable,
    untreated_id: &str,
) -> Vec<CorrectedRecord> {
    let corrected: Vec<CorrectedRecord> = records
        .iter()
        .filter(|r| !r.is_baseline(untreated_id))
        .map(|rec| CorrectedRecord {
            record: rec.clone(),
            af488: correct_channel(rec, Channel::Af488, baseline, flags),
            cy5: correct_channel(rec, Channel::Cy5, baseline, flags),
            mscarlet: correct_channel(rec, Channel::MScarlet, baseline, flags),
        })
        .collect();

    info!(
        "Background correction: {} records kept, {} baseline wells dropped",
        corrected.len(),
        records.len() - corrected.len()
    );
    corrected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::test_against_baseline;
    use crate::config::PipelineConfig;
    use crate::record::CellType;

    fn well(sensor: SensorType, sample: &str, af488: f64, cy5: f64) -> ReplicateRecord {
        ReplicateRecord::new(CellType::Lsa, sensor, "F1", sample, sample, "G1", 1)
            .with_intensities(af488, cy5, 3.0)
    }

    fn run(records: &[ReplicateRecord]) -> Vec<CorrectedRecord> {
        let baseline = BaselineSet::from_records(records, "UT");
        let rule = PipelineConfig::new("UT", 1.0).baseline_rule();
        let flags = test_against_baseline(records, &baseline, "UT", &rule);
        correct_background(records, &baseline, &flags, "UT")
    }

    fn with_baseline(mut sample: Vec<ReplicateRecord>) -> Vec<ReplicateRecord> {
        let mut recs = vec![
            well(SensorType::Snap, "UT", 10.0, 5.0),
            well(SensorType::Snap, "UT", 12.0, 6.0),
            well(SensorType::Snap, "UT", 11.0, 7.0),
        ];
        recs.append(&mut sample);
        recs
    }

    #[test]
    fn test_not_significant_is_zeroed() {
        let recs = with_baseline(vec![
            well(SensorType::Snap, "S1", 10.0, 5.0),
            well(SensorType::Snap, "S1", 11.0, 6.0),
            well(SensorType::Snap, "S1", 12.0, 7.0),
        ]);
        let out = run(&recs);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|r| r.af488 == Some(0.0)));
        assert!(out.iter().all(|r| r.cy5 == Some(0.0)));
    }

    #[test]
    fn test_significant_subtracts_baseline_mean() {
        let recs = with_baseline(vec![
            well(SensorType::Snap, "S1", 50.0, 40.0),
            well(SensorType::Snap, "S1", 52.0, 41.0),
            well(SensorType::Snap, "S1", 51.0, 42.0),
        ]);
        let out = run(&recs);
        let af: Vec<f64> = out.iter().map(|r| r.af488.unwrap()).collect();
        assert_eq!(af, vec![39.0, 41.0, 40.0]);
        let mean_af = af.iter().sum::<f64>() / 3.0;
        assert!((mean_af - 40.0).abs() < 1e-12);
        // Cy5 of SNAP wells is corrected: baseline mean 6.0
        assert_eq!(out[0].cy5, Some(34.0));
    }

    #[test]
    fn test_cy5_sensor_passes_cy5_through() {
        let recs = with_baseline(vec![
            well(SensorType::Cy5, "S2", 50.0, 40.0),
            well(SensorType::Cy5, "S2", 52.0, 41.0),
            well(SensorType::Cy5, "S2", 51.0, 42.0),
        ]);
        let out = run(&recs);
        let cy5: Vec<Option<f64>> = out.iter().map(|r| r.cy5).collect();
        assert_eq!(cy5, vec![Some(40.0), Some(41.0), Some(42.0)]);
        // AF488 is still corrected for Cy5-sensor wells
        assert_eq!(out[0].af488, Some(39.0));
    }

    #[test]
    fn test_baseline_dropped() {
        let recs = with_baseline(vec![well(SensorType::Snap, "S1", 50.0, 40.0)]);
        let out = run(&recs);
        assert!(out.iter().all(|r| r.record.sample_id != "UT"));
        // single replicate: untestable, zeroed
        assert_eq!(out[0].af488, Some(0.0));
    }

    #[test]
    fn test_missing_raw_when_significant_is_missing() {
        let mut recs = with_baseline(vec![
            well(SensorType::Snap, "S1", 50.0, 40.0),
            well(SensorType::Snap, "S1", 52.0, 41.0),
            well(SensorType::Snap, "S1", 51.0, 42.0),
        ]);
        let baseline = BaselineSet::from_records(&recs, "UT");
        let rule = PipelineConfig::new("UT", 1.0).baseline_rule();
        let flags = test_against_baseline(&recs, &baseline, "UT", &rule);
        // Knock out one value after the flags were computed
        recs[3].af488_raw = None;
        let out = correct_background(&recs, &baseline, &flags, "UT");
        assert_eq!(out[0].af488, None);
        assert_eq!(out[1].af488, Some(41.0));
    }
}
