//! Tidy CSV input/output
//!
//! Reads the enriched per-replicate table (plain or gzip-compressed) and writes the
//! derived metrics, significance flags and per-sample summary as tidy CSV.
//! Missing values are written as `NA`.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use log::info;

use crate::baseline::SignificanceFlag;
use crate::metrics::DerivedMetricRow;
use crate::record::{validate_records, RawRecord, ReplicateRecord};
use crate::summary::SampleSummary;

/// Open a file and return a buffered reader, decompressing `.gz` transparently.
pub fn get_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let is_gz = path.extension().map(|ext| ext == "gz").unwrap_or(false);

    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    if is_gz {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Parse and validate enriched records from any CSV source
pub fn read_records<R: Read>(reader: R) -> Result<Vec<ReplicateRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut raw = Vec::new();
    for (i, row) in csv_reader.deserialize::<RawRecord>().enumerate() {
        let row = row.with_context(|| format!("Malformed record at data row {}", i + 1))?;
        raw.push(row);
    }

    Ok(validate_records(raw)?)
}

/// Load the enriched per-replicate table
pub fn load_records(path: &Path) -> Result<Vec<ReplicateRecord>> {
    let reader = get_reader(path)?;
    let records = read_records(reader).with_context(|| format!("Failed to load records from {:?}", path))?;
    info!("Loaded {} replicate records from {:?}", records.len(), path);
    Ok(records)
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{}", x),
        None => "NA".to_string(),
    }
}

fn csv_writer(path: &Path) -> Result<csv::Writer<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?;
    Ok(csv::Writer::from_writer(file))
}

pub const METRIC_HEADER: [&str; 15] = [
    "formulation",
    "sample_name",
    "sample_id",
    "group_id",
    "replicate",
    "cell_type",
    "sensor_type",
    "viability",
    "AF488",
    "adj_Cy5_abs",
    "adj_Cy5_rel",
    "SNAP_perc_of_Cy5",
    "mScarlet",
    "express_per_assoc",
    "express_per_escape",
];

/// Write derived metric rows to any sink
pub fn write_metrics_to<W: Write>(sink: W, rows: &[DerivedMetricRow]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(METRIC_HEADER)?;
    for row in rows {
        writer.write_record([
            row.formulation.clone(),
            row.sample_name.clone(),
            row.sample_id.clone(),
            row.group_id.clone(),
            row.replicate.to_string(),
            row.cell_type.to_string(),
            row.sensor_type.to_string(),
            fmt_opt(row.viability),
            fmt_opt(row.af488),
            fmt_opt(row.adj_cy5_abs),
            fmt_opt(row.adj_cy5_rel),
            fmt_opt(row.snap_perc_of_cy5),
            fmt_opt(row.mscarlet),
            fmt_opt(row.express_per_assoc),
            fmt_opt(row.express_per_escape),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_metrics(path: &Path, rows: &[DerivedMetricRow]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?;
    write_metrics_to(file, rows).with_context(|| format!("Writing derived metrics to {:?}", path))?;
    info!("Written {} derived metric rows to {:?}", rows.len(), path);
    Ok(())
}

pub fn write_flags(path: &Path, flags: &[SignificanceFlag]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    writer.write_record([
        "stage", "cell_type", "sample_id", "group_id", "channel", "n_test", "n_reference", "p_value", "significant",
    ])?;
    for flag in flags {
        writer.write_record([
            flag.stage.as_str().to_string(),
            flag.cell_type.map(|c| c.to_string()).unwrap_or_else(|| "NA".to_string()),
            flag.sample_id.clone(),
            flag.group_id.clone().unwrap_or_else(|| "NA".to_string()),
            flag.channel.to_string(),
            flag.n_test.to_string(),
            flag.n_reference.to_string(),
            fmt_opt(flag.p_value.filter(|p| !p.is_nan())),
            flag.outcome.as_str().to_string(),
        ])?;
    }
    writer.flush()?;
    info!("Written {} significance flags to {:?}", flags.len(), path);
    Ok(())
}

pub fn write_summary(path: &Path, summary: &[SampleSummary]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    writer.write_record(["formulation", "sample_name", "metric", "n", "mean", "sd"])?;
    for s in summary {
        writer.write_record([
            s.formulation.clone(),
            s.sample_name.clone(),
            s.metric.to_string(),
            s.n.to_string(),
            fmt_opt(s.mean),
            fmt_opt(s.sd),
        ])?;
    }
    writer.flush()?;
    info!("Written {} summary rows to {:?}", summary.len(), path);
    Ok(())
}
