//! Replicate records and the closed vocabularies they are keyed on
//!
//! One `ReplicateRecord` is one well after metadata enrichment. Records arrive as
//! loosely typed `RawRecord` rows (straight from the enriched CSV) and are validated
//! into typed records before any stage runs: unknown cell or sensor types are
//! rejected here, so every later stage can match exhaustively on the enums.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EscapeError, EscapeResult};

/// Cell-line background
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CellType {
    #[serde(rename = "WT")]
    Wt,
    #[serde(rename = "LSA")]
    Lsa,
}

impl CellType {
    pub const ALL: [CellType; 2] = [CellType::Wt, CellType::Lsa];

    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Wt => "WT",
            CellType::Lsa => "LSA",
        }
    }
}

impl FromStr for CellType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WT" => Ok(CellType::Wt),
            "LSA" => Ok(CellType::Lsa),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe chemistry reporting escape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SensorType {
    #[serde(rename = "SNAP")]
    Snap,
    #[serde(rename = "Cy5")]
    Cy5,
}

impl SensorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Snap => "SNAP",
            SensorType::Cy5 => "Cy5",
        }
    }
}

impl FromStr for SensorType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SNAP" => Ok(SensorType::Snap),
            "CY5" => Ok(SensorType::Cy5),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fluorescence channels measured per well
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Af488,    // LNP association
    Cy5,      // escape probe (SNAP-tag or direct Cy5)
    MScarlet, // reporter expression
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Af488, Channel::Cy5, Channel::MScarlet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Af488 => "AF488",
            Channel::Cy5 => "Cy5",
            Channel::MScarlet => "mScarlet",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated row of the enriched table.
///
/// Missing intensities may be encoded as empty cells, `NA` or `NaN`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    pub cell_type: String,
    pub sensor_type: String,
    pub formulation: String,
    pub sample_id: String,
    pub sample_name: String,
    pub group_id: String,
    #[serde(default)]
    pub replicate: Option<u32>,
    #[serde(rename = "AF488_raw", default, deserialize_with = "de_missing")]
    pub af488_raw: Option<f64>,
    #[serde(rename = "Cy5_raw", default, deserialize_with = "de_missing")]
    pub cy5_raw: Option<f64>,
    #[serde(rename = "mScarlet_raw", default, deserialize_with = "de_missing")]
    pub mscarlet_raw: Option<f64>,
    #[serde(default, deserialize_with = "de_missing")]
    pub viability: Option<f64>,
}

fn de_missing<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("nan") => Ok(None),
        Some(s) => s.parse::<f64>().map(Some).map_err(serde::de::Error::custom),
    }
}

/// One well/replicate after enrichment and validation
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicateRecord {
    pub cell_type: CellType,
    pub sensor_type: SensorType,
    pub formulation: String,
    pub sample_id: String,
    pub sample_name: String,
    pub group_id: String,
    pub replicate: u32,
    pub af488_raw: Option<f64>,
    pub cy5_raw: Option<f64>,
    pub mscarlet_raw: Option<f64>,
    pub viability: Option<f64>,
}

impl ReplicateRecord {
    pub fn new(
        cell_type: CellType,
        sensor_type: SensorType,
        formulation: &str,
        sample_id: &str,
        sample_name: &str,
        group_id: &str,
        replicate: u32,
    ) -> Self {
        Self {
            cell_type,
            sensor_type,
            formulation: formulation.to_string(),
            sample_id: sample_id.to_string(),
            sample_name: sample_name.to_string(),
            group_id: group_id.to_string(),
            replicate,
            af488_raw: None,
            cy5_raw: None,
            mscarlet_raw: None,
            viability: None,
        }
    }

    pub fn with_intensities(mut self, af488: f64, cy5: f64, mscarlet: f64) -> Self {
        self.af488_raw = Some(af488);
        self.cy5_raw = Some(cy5);
        self.mscarlet_raw = Some(mscarlet);
        self
    }

    pub fn raw(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Af488 => self.af488_raw,
            Channel::Cy5 => self.cy5_raw,
            Channel::MScarlet => self.mscarlet_raw,
        }
    }

    /// Key of the replicate set this record belongs to: (group_id, sample_id)
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            group_id: self.group_id.clone(),
            sample_id: self.sample_id.clone(),
        }
    }

    pub fn is_baseline(&self, untreated_id: &str) -> bool {
        self.sample_id == untreated_id
    }
}

/// (group_id, sample_id) replicate-set key, ordered for deterministic iteration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub group_id: String,
    pub sample_id: String,
}

/// Validate raw rows into typed records.
///
/// Rejects unknown enum values, empty identifiers, and negative or non-finite
/// intensities; assigns replicate ordinals where the input has none; and checks
/// that every (cell_type, sample_id, group_id) uses a single sensor and formulation.
pub fn validate_records(raw: Vec<RawRecord>) -> EscapeResult<Vec<ReplicateRecord>> {
    if raw.is_empty() {
        return Err(EscapeError::EmptyInput);
    }

    let mut records = Vec::with_capacity(raw.len());
    let mut ordinals: HashMap<(CellType, String, String), u32> = HashMap::new();

    for (i, r) in raw.into_iter().enumerate() {
        let row = i + 1;

        let cell_type = r.cell_type.parse::<CellType>().map_err(|_| EscapeError::UnknownCellType {
            row,
            value: r.cell_type.clone(),
        })?;
        let sensor_type = r.sensor_type.parse::<SensorType>().map_err(|_| EscapeError::UnknownSensorType {
            row,
            value: r.sensor_type.clone(),
        })?;

        for (field, value) in [
            ("formulation", &r.formulation),
            ("sample_id", &r.sample_id),
            ("sample_name", &r.sample_name),
            ("group_id", &r.group_id),
        ] {
            if value.trim().is_empty() {
                return Err(EscapeError::MissingField { row, field });
            }
        }

        for (field, value) in [
            ("AF488_raw", r.af488_raw),
            ("Cy5_raw", r.cy5_raw),
            ("mScarlet_raw", r.mscarlet_raw),
            ("viability", r.viability),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(EscapeError::InvalidValue { row, field, value: v });
                }
            }
        }

        let sample_id = r.sample_id.trim().to_string();
        let group_id = r.group_id.trim().to_string();
        let counter = ordinals
            .entry((cell_type, sample_id.clone(), group_id.clone()))
            .or_insert(0);
        *counter += 1;
        let replicate = r.replicate.unwrap_or(*counter);

        records.push(ReplicateRecord {
            cell_type,
            sensor_type,
            formulation: r.formulation.trim().to_string(),
            sample_id,
            sample_name: r.sample_name.trim().to_string(),
            group_id,
            replicate,
            af488_raw: r.af488_raw,
            cy5_raw: r.cy5_raw,
            mscarlet_raw: r.mscarlet_raw,
            viability: r.viability,
        });
    }

    check_group_consistency(&records)?;
    Ok(records)
}

/// All replicates of one (cell_type, sample_id, group_id) must share sensor and formulation.
pub fn check_group_consistency(records: &[ReplicateRecord]) -> EscapeResult<()> {
    let mut seen: BTreeMap<(CellType, &str, &str), (SensorType, &str)> = BTreeMap::new();

    for rec in records {
        let key = (rec.cell_type, rec.sample_id.as_str(), rec.group_id.as_str());
        match seen.get(&key) {
            None => {
                seen.insert(key, (rec.sensor_type, rec.formulation.as_str()));
            }
            Some(&(sensor, formulation)) => {
                let mismatch = if sensor != rec.sensor_type {
                    Some(("sensor_type", sensor.to_string(), rec.sensor_type.to_string()))
                } else if formulation != rec.formulation {
                    Some(("formulation", formulation.to_string(), rec.formulation.clone()))
                } else {
                    None
                };
                if let Some((what, first, second)) = mismatch {
                    return Err(EscapeError::InconsistentGroup {
                        cell_type: rec.cell_type.to_string(),
                        sample_id: rec.sample_id.clone(),
                        group_id: rec.group_id.clone(),
                        what,
                        first,
                        second,
                    });
                }
            }
        }
    }
    Ok(())
}
