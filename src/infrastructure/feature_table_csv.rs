use crate::domain::ml::FeatureTable;
use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .with_context(|| format!("Unrecognized date '{}'", value))
}

/// Loads a feature table from CSV.
///
/// The first column is the date index (`YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`);
/// every other column is a numeric feature, one of which must be `close`.
pub fn read_feature_table(path: &Path) -> Result<FeatureTable> {
    let file =
        File::open(path).with_context(|| format!("Failed to open feature table {:?}", path))?;
    let table = parse_feature_table(BufReader::new(file))
        .with_context(|| format!("Failed to load feature table {:?}", path))?;

    info!(
        "Loaded {} rows x {} columns from {:?}",
        table.len(),
        table.column_count(),
        path
    );
    Ok(table)
}

pub fn parse_feature_table<R: Read>(reader: R) -> Result<FeatureTable> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = rdr.headers().context("Missing CSV header")?.clone();
    if headers.len() < 2 {
        bail!("Expected a date column followed by at least one feature column");
    }
    let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut index = Vec::new();
    let mut rows = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Malformed CSV record {}", line + 1))?;
        let date = record.get(0).unwrap_or_default();
        index.push(parse_timestamp(date).with_context(|| format!("Record {}", line + 1))?);

        let row = record
            .iter()
            .skip(1)
            .zip(&columns)
            .map(|(value, column)| {
                value.parse::<f64>().with_context(|| {
                    format!(
                        "Non-numeric value '{}' in record {} column '{}'",
                        value,
                        line + 1,
                        column
                    )
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }

    Ok(FeatureTable::new(columns, index, rows)?)
}
