//! Baseline significance testing
//!
//! For every cell type and channel, each (group_id, sample_id) replicate set is
//! Welch-tested against the untreated wells of the same cell type. The resulting
//! flags decide, in the background corrector, whether a channel is baseline-subtracted
//! or zeroed.
//!
//! Groups are tested in parallel; results are keyed in ordered maps so the table is
//! the same regardless of scheduling.

use std::collections::BTreeMap;

use log::{debug, warn};
use rayon::prelude::*;

use crate::record::{CellType, Channel, GroupKey, ReplicateRecord};
use crate::stats::{self, GateRule, GatedTest, Outcome};

/// Which gate produced a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TestStage {
    /// Sample vs untreated wells of the same cell type
    Baseline,
    /// WT vs LSA on normalized Cy5 of SNAP-sensor samples
    SnapVsWt,
}

impl TestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStage::Baseline => "baseline",
            TestStage::SnapVsWt => "snap_vs_wt",
        }
    }
}

/// One significance decision, kept for auditing
#[derive(Debug, Clone, PartialEq)]
pub struct SignificanceFlag {
    pub stage: TestStage,
    /// `None` for WT-vs-LSA comparisons, which span both cell types
    pub cell_type: Option<CellType>,
    pub sample_id: String,
    /// `None` when the test pools all groups of a sample
    pub group_id: Option<String>,
    pub channel: Channel,
    pub n_test: usize,
    pub n_reference: usize,
    pub p_value: Option<f64>,
    pub outcome: Outcome,
}

impl SignificanceFlag {
    pub fn is_significant(&self) -> bool {
        self.outcome.is_significant()
    }
}

/// Untreated wells per (cell type, channel); read-only reference distributions
#[derive(Debug, Clone, Default)]
pub struct BaselineSet {
    values: BTreeMap<(CellType, Channel), Vec<Option<f64>>>,
}

impl BaselineSet {
    pub fn from_records(records: &[ReplicateRecord], untreated_id: &str) -> Self {
        let mut values: BTreeMap<(CellType, Channel), Vec<Option<f64>>> = BTreeMap::new();
        for rec in records.iter().filter(|r| r.is_baseline(untreated_id)) {
            for channel in Channel::ALL {
                values.entry((rec.cell_type, channel)).or_default().push(rec.raw(channel));
            }
        }
        Self { values }
    }

    pub fn values(&self, cell_type: CellType, channel: Channel) -> &[Option<f64>] {
        self.values
            .get(&(cell_type, channel))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Mean of the non-missing baseline values
    pub fn mean(&self, cell_type: CellType, channel: Channel) -> Option<f64> {
        stats::mean(self.values(cell_type, channel))
    }

    pub fn has_cell_type(&self, cell_type: CellType) -> bool {
        Channel::ALL.iter().any(|&c| !self.values(cell_type, c).is_empty())
    }
}

/// Flags from the baseline tester, keyed by (cell type, group, channel)
#[derive(Debug, Clone, Default)]
pub struct SignificanceTable {
    flags: BTreeMap<(CellType, GroupKey, Channel), SignificanceFlag>,
}

impl SignificanceTable {
    pub fn get(&self, cell_type: CellType, key: &GroupKey, channel: Channel) -> Option<&SignificanceFlag> {
        self.flags.get(&(cell_type, key.clone(), channel))
    }

    /// Missing and untestable flags both count as not significant
    pub fn is_significant(&self, cell_type: CellType, key: &GroupKey, channel: Channel) -> bool {
        self.get(cell_type, key, channel)
            .map(SignificanceFlag::is_significant)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignificanceFlag> {
        self.flags.values()
    }

    fn insert(&mut self, flag: SignificanceFlag) {
        let key = GroupKey {
            group_id: flag.group_id.clone().unwrap_or_default(),
            sample_id: flag.sample_id.clone(),
        };
        let cell_type = flag.cell_type.unwrap_or(CellType::Wt);
        self.flags.insert((cell_type, key, flag.channel), flag);
    }
}

/// Test every (group_id, sample_id) of one cell type against that cell type's
/// baseline values for a single channel.
///
/// `records` must already be restricted to `cell_type`; baseline wells are skipped.
pub fn test_cell_type(
    records: &[&ReplicateRecord],
    cell_type: CellType,
    baseline: &BaselineSet,
    channel: Channel,
    untreated_id: &str,
    rule: &GateRule,
) -> Vec<SignificanceFlag> {
    let mut groups: BTreeMap<GroupKey, Vec<Option<f64>>> = BTreeMap::new();
    for rec in records.iter().filter(|r| r.cell_type == cell_type && !r.is_baseline(untreated_id)) {
        groups.entry(rec.group_key()).or_default().push(rec.raw(channel));
    }

    let reference = baseline.values(cell_type, channel);
    let groups: Vec<(GroupKey, Vec<Option<f64>>)> = groups.into_iter().collect();

    groups
        .par_iter()
        .map(|(key, values)| {
            let GatedTest { outcome, welch } = stats::gated_welch_test(values, reference, rule);
            if outcome == Outcome::Untestable {
                debug!(
                    "{} {} sample={} group={}: untestable (n={}, baseline n={})",
                    cell_type, channel, key.sample_id, key.group_id, values.len(), reference.len()
                );
            }
            SignificanceFlag {
                stage: TestStage::Baseline,
                cell_type: Some(cell_type),
                sample_id: key.sample_id.clone(),
                group_id: Some(key.group_id.clone()),
                channel,
                n_test: values.len(),
                n_reference: reference.len(),
                p_value: welch.map(|w| w.p_value),
                outcome,
            }
        })
        .collect()
}

/// Run the baseline tester for both cell types and all three channels and
/// concatenate the results.
pub fn test_against_baseline(
    records: &[ReplicateRecord],
    baseline: &BaselineSet,
    untreated_id: &str,
    rule: &GateRule,
) -> SignificanceTable {
    let mut table = SignificanceTable::default();

    for cell_type in CellType::ALL {
        let of_type: Vec<&ReplicateRecord> = records.iter().filter(|r| r.cell_type == cell_type).collect();
        if of_type.iter().all(|r| r.is_baseline(untreated_id)) {
            continue;
        }
        if !baseline.has_cell_type(cell_type) {
            warn!(
                "No untreated wells ('{}') for cell type {}; all its channels will be zeroed",
                untreated_id, cell_type
            );
        }

        for channel in Channel::ALL {
            for flag in test_cell_type(&of_type, cell_type, baseline, channel, untreated_id, rule) {
                table.insert(flag);
            }
        }
    }

    let n_sig = table.iter().filter(|f| f.is_significant()).count();
    let n_na = table.iter().filter(|f| f.outcome == Outcome::Untestable).count();
    debug!("Baseline tests: {} flags, {} significant, {} untestable", table.len(), n_sig, n_na);
    table
}
