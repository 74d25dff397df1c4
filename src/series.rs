//! Time-series table for the dashboard, loaded from logger CSV output.
//!
//! The logger writes one row per sample with a timestamp column in
//! `YYYY-MM-DD HH:MM:SS:<fraction>` form. Rows whose timestamp does not
//! parse are dropped. A column counts as numeric when every non-empty cell
//! parses as a number.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};

/// Error type for series loading
#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Read error: {0}")]
    Read(#[from] std::io::Error),
    #[error("Input has no header row")]
    Empty,
    #[error("Time column {0:?} not found in header")]
    MissingTimeColumn(String),
    #[error("No rows with a valid timestamp")]
    NoRows,
    #[error("Unknown or non-numeric column {0:?}")]
    UnknownColumn(String),
}

/// One data column; `None` marks an empty or unparsable cell.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
    numeric: bool,
}

impl Column {
    pub fn is_numeric(&self) -> bool {
        self.numeric
    }
}

#[derive(Debug, Clone)]
pub struct SeriesTable {
    time_column: String,
    times: Vec<NaiveDateTime>,
    columns: Vec<Column>,
}

impl SeriesTable {
    pub fn load(path: &Path, time_column: &str) -> Result<Self, SeriesError> {
        let file = File::open(path).map_err(|source| SeriesError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_reader(BufReader::new(file), time_column)?;
        tracing::info!(
            "Loaded {} rows, {} numeric columns from {}",
            table.len(),
            table.numeric_columns().len(),
            path.display()
        );
        Ok(table)
    }

    pub fn from_reader<R: BufRead>(reader: R, time_column: &str) -> Result<Self, SeriesError> {
        let mut lines = reader.lines();
        let header = loop {
            match lines.next() {
                Some(line) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Err(SeriesError::Empty),
            }
        };

        let names = split_record(header.trim_start_matches('\u{feff}'));
        let time_index = names
            .iter()
            .position(|name| name == time_column)
            .ok_or_else(|| SeriesError::MissingTimeColumn(time_column.to_string()))?;

        let mut times = Vec::new();
        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
        let mut dropped = 0usize;

        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = split_record(&line);
            let Some(time) = record.get(time_index).and_then(|raw| parse_timestamp(raw)) else {
                dropped += 1;
                continue;
            };
            times.push(time);
            for (i, column) in cells.iter_mut().enumerate() {
                let cell = record
                    .get(i)
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                column.push(cell);
            }
        }

        if dropped > 0 {
            tracing::debug!("Dropped {} rows without a valid timestamp", dropped);
        }
        if times.is_empty() {
            return Err(SeriesError::NoRows);
        }

        let columns = names
            .into_iter()
            .zip(cells)
            .enumerate()
            .filter(|(i, _)| *i != time_index)
            .map(|(_, (name, raw))| {
                let mut numeric = raw.iter().any(Option::is_some);
                let values = raw
                    .iter()
                    .map(|cell| {
                        let cell = cell.as_deref()?;
                        let parsed = cell.parse::<f64>().ok();
                        if parsed.is_none() {
                            numeric = false;
                        }
                        parsed
                    })
                    .collect();
                Column {
                    name,
                    values,
                    numeric,
                }
            })
            .collect();

        Ok(Self {
            time_column: time_column.to_string(),
            times,
            columns,
        })
    }

    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    /// First and last timestamps, in file order.
    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((*self.times.first()?, *self.times.last()?))
    }

    /// Names of the numeric columns, in file order.
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.numeric)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Index of the last row at or before `time`; the first row when `time`
    /// precedes the table. Assumes rows are in time order.
    pub fn row_at_or_before(&self, time: NaiveDateTime) -> Option<usize> {
        if self.times.is_empty() {
            return None;
        }
        let after = self.times.partition_point(|t| *t <= time);
        Some(after.saturating_sub(1))
    }
}

/// Pick columns by comma-separated 1-based indices into `available`.
/// Entries that are not plain numbers or are out of range are skipped.
pub fn select_columns(available: &[&str], input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|s| s.parse::<usize>().ok())
        .filter(|i| (1..=available.len()).contains(i))
        .map(|i| available[i - 1].to_string())
        .collect()
}

/// Parse a logger timestamp.
///
/// Accepts `YYYY-MM-DD HH:MM:SS:<digits>` (fraction after a colon, read as a
/// decimal fraction of a second) as well as the usual `.`-separated form.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(time) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(time);
    }

    let (base, fraction) = raw.rsplit_once(':')?;
    if fraction.is_empty() || fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let base = NaiveDateTime::parse_from_str(base, "%Y-%m-%d %H:%M:%S").ok()?;
    let nanos: i64 = format!("{:0<9}", fraction).parse().ok()?;
    Some(base + Duration::nanoseconds(nanos))
}

/// Split one CSV record, honouring double-quoted fields.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field.trim_end_matches('\r').to_string());
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}
