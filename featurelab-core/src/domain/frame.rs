//! Frame — a columnar, timestamp-indexed table for one symbol.
//!
//! Every column is `f64` and has exactly one value per timestamp. Columns are
//! kept in insertion order so persisted series and feature outputs line up
//! with the order features were declared in.

use super::bar::Bar;
use chrono::{DateTime, Datelike, Timelike, Utc};
use indexmap::IndexMap;
use std::collections::HashMap;
use thiserror::Error;

/// Columns every frame built from bars carries, in storage order.
pub const RAW_COLUMNS: [&str; 6] = ["open", "high", "low", "close", "tick_volume", "spread"];

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("column '{column}' has {actual} values but the frame has {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("missing column '{0}'")]
    MissingColumn(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    timestamps: Vec<DateTime<Utc>>,
    columns: IndexMap<String, Vec<f64>>,
}

impl Frame {
    /// An empty frame over the given index, with no columns yet.
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        Self {
            timestamps,
            columns: IndexMap::new(),
        }
    }

    /// Build a frame with the raw OHLCV + spread columns.
    pub fn from_bars(bars: &[Bar]) -> Self {
        let mut frame = Self::new(bars.iter().map(|b| b.timestamp).collect());
        frame.columns.insert("open".into(), bars.iter().map(|b| b.open).collect());
        frame.columns.insert("high".into(), bars.iter().map(|b| b.high).collect());
        frame.columns.insert("low".into(), bars.iter().map(|b| b.low).collect());
        frame.columns.insert("close".into(), bars.iter().map(|b| b.close).collect());
        frame.columns.insert(
            "tick_volume".into(),
            bars.iter().map(|b| b.tick_volume as f64).collect(),
        );
        frame.columns.insert("spread".into(), bars.iter().map(|b| b.spread).collect());
        frame
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().min().copied()
    }

    /// Latest timestamp in the frame (the watermark after a persist).
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().max().copied()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    /// Like [`Frame::column`], but a missing column is an error.
    pub fn require(&self, name: &str) -> Result<&[f64], FrameError> {
        self.column(name)
            .ok_or_else(|| FrameError::MissingColumn(name.to_string()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Add (or replace) a column. The value count must match the row count.
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), FrameError> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(FrameError::LengthMismatch {
                column: name,
                expected: self.len(),
                actual: values.len(),
            });
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// Minute-of-hour, hour, day-of-month and day-of-week (Monday = 0) per row.
    pub fn calendar(&self) -> impl Iterator<Item = (u32, u32, u32, u32)> + '_ {
        self.timestamps.iter().map(|ts| {
            (
                ts.minute(),
                ts.hour(),
                ts.day(),
                ts.weekday().num_days_from_monday(),
            )
        })
    }

    /// Sort by timestamp and drop repeated timestamps, keeping the first
    /// occurrence of each. Returns the number of rows removed.
    pub fn dedup_timestamps(&mut self) -> usize {
        let mut order: Vec<usize> = (0..self.len()).collect();
        // Stable sort keeps the original relative order among equal timestamps.
        order.sort_by_key(|&i| self.timestamps[i]);
        let mut keep = Vec::with_capacity(order.len());
        for i in order {
            match keep.last() {
                Some(&prev) if self.timestamps[prev] == self.timestamps[i] => {}
                _ => keep.push(i),
            }
        }
        let removed = self.len() - keep.len();
        if keep.iter().copied().ne(0..self.len()) {
            self.select_rows(&keep);
        }
        removed
    }

    /// Keep only rows strictly after `ts`.
    pub fn retain_after(&mut self, ts: DateTime<Utc>) {
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| self.timestamps[i] > ts)
            .collect();
        if keep.len() != self.len() {
            self.select_rows(&keep);
        }
    }

    /// Keep only rows strictly before `ts`.
    pub fn retain_before(&mut self, ts: DateTime<Utc>) {
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| self.timestamps[i] < ts)
            .collect();
        if keep.len() != self.len() {
            self.select_rows(&keep);
        }
    }

    /// Reindex onto `index`. Timestamps this frame lacks get NaN in every column.
    ///
    /// Assumes this frame's timestamps are unique.
    pub fn reindex(&self, index: &[DateTime<Utc>]) -> Frame {
        let positions: HashMap<DateTime<Utc>, usize> = self
            .timestamps
            .iter()
            .enumerate()
            .map(|(i, ts)| (*ts, i))
            .collect();
        let rows: Vec<Option<usize>> = index.iter().map(|ts| positions.get(ts).copied()).collect();
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let col = rows
                    .iter()
                    .map(|row| row.map_or(f64::NAN, |i| values[i]))
                    .collect();
                (name.clone(), col)
            })
            .collect();
        Frame {
            timestamps: index.to_vec(),
            columns,
        }
    }

    /// Stack frames vertically. The result has the union of all columns (in
    /// first-seen order); rows from a frame lacking a column get NaN there.
    pub fn concat<'a>(frames: impl IntoIterator<Item = &'a Frame>) -> Frame {
        let frames: Vec<&Frame> = frames.into_iter().collect();
        let mut names: Vec<&str> = Vec::new();
        for frame in &frames {
            for name in frame.column_names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        let total: usize = frames.iter().map(|f| f.len()).sum();
        let mut timestamps = Vec::with_capacity(total);
        for frame in &frames {
            timestamps.extend_from_slice(&frame.timestamps);
        }

        let mut columns = IndexMap::with_capacity(names.len());
        for name in names {
            let mut col = Vec::with_capacity(total);
            for frame in &frames {
                match frame.column(name) {
                    Some(values) => col.extend_from_slice(values),
                    None => col.extend(std::iter::repeat(f64::NAN).take(frame.len())),
                }
            }
            columns.insert(name.to_string(), col);
        }

        Frame {
            timestamps,
            columns,
        }
    }

    /// The last `n` rows, or every row if there are fewer.
    pub fn tail(&self, n: usize) -> Frame {
        let rows: Vec<usize> = (self.len().saturating_sub(n)..self.len()).collect();
        let mut out = self.clone();
        out.select_rows(&rows);
        out
    }

    fn select_rows(&mut self, rows: &[usize]) {
        self.timestamps = rows.iter().map(|&i| self.timestamps[i]).collect();
        for values in self.columns.values_mut() {
            *values = rows.iter().map(|&i| values[i]).collect();
        }
    }
}
