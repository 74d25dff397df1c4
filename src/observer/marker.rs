//! Dashboard marker over a loaded series.

use std::io::Write;

use chrono::NaiveDateTime;

use super::{Observer, TimeAxis};
use crate::series::{SeriesError, SeriesTable};

/// Moves a time marker across a [`SeriesTable`] and writes a readout line
/// whenever the marker lands on a different row.
pub struct MarkerObserver<W: Write> {
    table: SeriesTable,
    columns: Vec<usize>,
    axis: TimeAxis,
    out: W,
    marker: Option<NaiveDateTime>,
    last_row: Option<usize>,
    last_ratio: f64,
}

impl<W: Write> MarkerObserver<W> {
    /// Every name in `columns` must be a numeric column of `table`.
    pub fn new(table: SeriesTable, columns: &[String], out: W) -> Result<Self, SeriesError> {
        let (start, end) = table.time_range().ok_or(SeriesError::NoRows)?;
        let numeric = table.numeric_columns();

        let mut indices = Vec::with_capacity(columns.len());
        for name in columns {
            let index = numeric
                .iter()
                .position(|n| *n == name.as_str())
                .ok_or_else(|| SeriesError::UnknownColumn(name.clone()))?;
            indices.push(index);
        }

        Ok(Self {
            columns: indices,
            axis: TimeAxis::new(start, end),
            table,
            out,
            marker: None,
            last_row: None,
            last_ratio: 0.0,
        })
    }

    /// Current marker time, once the first redraw has happened.
    pub fn marker(&self) -> Option<NaiveDateTime> {
        self.marker
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn readout(&self, row: usize) -> String {
        let numeric = self.table.numeric_columns();
        let mut line = match self.marker {
            Some(marker) => format!("[{}]", marker.format("%Y-%m-%d %H:%M:%S%.3f")),
            None => String::from("[-]"),
        };
        for &index in &self.columns {
            let name = numeric[index];
            let value = self
                .table
                .column(name)
                .and_then(|c| c.values.get(row).copied().flatten());
            match value {
                Some(v) => line.push_str(&format!(" {}={}", name, v)),
                None => line.push_str(&format!(" {}=-", name)),
            }
        }
        line.push_str(&format!(" ({:.1}%)", self.last_ratio * 100.0));
        line
    }

    fn emit(&mut self, line: String) {
        if let Err(e) = writeln!(self.out, "{}", line) {
            tracing::warn!("Marker readout write failed: {}", e);
        }
    }
}

impl<W: Write> Observer for MarkerObserver<W> {
    fn redraw(&mut self, ratio: f64) {
        let marker = self.axis.at(ratio);
        self.marker = Some(marker);
        self.last_ratio = ratio.clamp(0.0, 1.0);

        let Some(row) = self.table.row_at_or_before(marker) else {
            return;
        };
        if self.last_row == Some(row) {
            return;
        }
        self.last_row = Some(row);
        tracing::trace!("Marker at {} (row {})", marker, row);
        let line = self.readout(row);
        self.emit(line);
    }

    fn finish(&mut self) {
        let row = self.last_row.unwrap_or(0);
        let line = format!("{} done", self.readout(row));
        self.emit(line);
        if let Err(e) = self.out.flush() {
            tracing::warn!("Marker readout flush failed: {}", e);
        }
    }
}
