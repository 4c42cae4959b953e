//! Time-series store for persisted feature frames.
//!
//! One process-wide [`StoreHandle`] owns the root directory; each named
//! library (`symbol_specific`, `universal`) is a [`ParquetSeriesStore`]
//! under it, with Hive-style partitioning per key:
//!
//! `{root}/{library}/symbol={KEY}/{first_ts_ms}.parquet` + `meta.json`
//!
//! - Every write is one chunk named by its first timestamp. Writes are atomic
//!   (write to `.tmp`, rename into place).
//! - A write replaces every chunk that starts at or after its first
//!   timestamp and truncates a chunk that straddles it, so replaying the same
//!   write is idempotent.
//! - Reads concatenate chunks in timestamp order. Columns missing from older
//!   chunks read as NaN.
//! - The sidecar records each chunk's range, row count and BLAKE3 file hash.
//!   Chunk files that fail to decode or mismatch their entry are quarantined
//!   (`{file}.quarantined`) and dropped from the sidecar. I/O failures are
//!   reported, never quarantined.
//! - A missing or unparsable sidecar is rebuilt from the chunk files on disk.

use crate::domain::Frame;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

const META_FILE: &str = "meta.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored series for '{key}'")]
    NotFound { key: String },

    #[error("store I/O error: {0}")]
    Io(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("invalid series: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Whether retrying the same write may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Parquet(_))
    }
}

impl From<PolarsError> for StoreError {
    fn from(e: PolarsError) -> Self {
        StoreError::Parquet(e.to_string())
    }
}

/// A keyed collection of frames.
///
/// Writes to distinct keys may run concurrently; writes to the same key must
/// not.
pub trait SeriesStore: Send + Sync {
    fn write(&self, key: &str, frame: &Frame) -> Result<(), StoreError>;

    /// The full stored series. Absent keys fail with [`StoreError::NotFound`].
    fn read(&self, key: &str) -> Result<Frame, StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// The newest stored row. Absent keys fail with [`StoreError::NotFound`].
    fn last_row(&self, key: &str) -> Result<Frame, StoreError> {
        Ok(self.read(key)?.tail(1))
    }
}

// ── Chunk bookkeeping shared by both stores ─────────────────────────

/// What a new chunk starting at `first` does to an existing chunk.
#[derive(Debug, PartialEq, Eq)]
enum Overlap {
    Keep,
    Truncate,
    Replace,
}

fn overlap(chunk_first: DateTime<Utc>, chunk_last: DateTime<Utc>, first: DateTime<Utc>) -> Overlap {
    if chunk_first >= first {
        Overlap::Replace
    } else if chunk_last >= first {
        Overlap::Truncate
    } else {
        Overlap::Keep
    }
}

fn frame_range(frame: &Frame) -> Result<(DateTime<Utc>, DateTime<Utc>), StoreError> {
    match (frame.first_timestamp(), frame.last_timestamp()) {
        (Some(first), Some(last)) => Ok((first, last)),
        _ => Err(StoreError::Invalid("cannot store an empty frame".into())),
    }
}

// ── Parquet store ───────────────────────────────────────────────────

/// Process-wide handle to the store root. Open once, share via `Arc`.
#[derive(Debug)]
pub struct StoreHandle {
    root: PathBuf,
}

impl StoreHandle {
    pub fn open(root: impl Into<PathBuf>) -> Result<Arc<Self>, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::Io(format!("create {}: {e}", root.display())))?;
        debug!(root = %root.display(), "store opened");
        Ok(Arc::new(Self { root }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The named library. Its directory is created on first write.
    pub fn library(self: &Arc<Self>, name: &str) -> ParquetSeriesStore {
        ParquetSeriesStore {
            dir: self.root.join(name),
            _handle: Arc::clone(self),
        }
    }
}

/// Sidecar entry for one chunk file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub file: String,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    pub rows: usize,
    pub hash: String,
}

/// Sidecar for one key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub key: String,
    pub chunks: Vec<ChunkMeta>,
}

impl SeriesMeta {
    pub fn rows(&self) -> usize {
        self.chunks.iter().map(|c| c.rows).sum()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.chunks.iter().map(|c| c.last_timestamp).max()
    }
}

#[derive(Debug, Clone)]
pub struct ParquetSeriesStore {
    dir: PathBuf,
    _handle: Arc<StoreHandle>,
}

impl ParquetSeriesStore {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory for a key: `{library}/symbol={KEY}/`
    fn key_dir(&self, key: &str) -> PathBuf {
        self.dir.join(format!("symbol={key}"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.key_dir(key).join(META_FILE)
    }

    /// The sidecar for a key, or `None` if nothing is stored under it.
    ///
    /// A sidecar that is missing next to existing chunk files, or that does
    /// not parse, is rebuilt from those files (the unparsable one is
    /// quarantined first).
    pub fn meta(&self, key: &str) -> Result<Option<SeriesMeta>, StoreError> {
        let path = self.meta_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.rebuild_meta(key),
            Err(e) => return Err(StoreError::Io(format!("read {}: {e}", path.display()))),
        };
        match serde_json::from_str(&content) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                warn!(key, error = %e, "unparsable sidecar, rebuilding from chunk files");
                quarantine_file(&path);
                self.rebuild_meta(key)
            }
        }
    }

    /// Reconstruct and save a key's sidecar from the `*.parquet` files in its
    /// directory. Undecodable files are quarantined. Where two chunks overlap,
    /// the later-starting one is a leftover of an interrupted replace and is
    /// quarantined too.
    fn rebuild_meta(&self, key: &str) -> Result<Option<SeriesMeta>, StoreError> {
        let dir = self.key_dir(key);
        if !dir.is_dir() {
            return Ok(None);
        }
        let entries = fs::read_dir(&dir)
            .map_err(|e| StoreError::Io(format!("read dir {}: {e}", dir.display())))?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(format!("dir entry: {e}")))?;
            let file = entry.file_name().to_string_lossy().into_owned();
            if file.ends_with(".parquet") {
                let bytes = fs::read(entry.path())
                    .map_err(|e| StoreError::Io(format!("read {}: {e}", entry.path().display())))?;
                match decode_chunk(&file, &bytes) {
                    Ok(chunk) => found.push(chunk),
                    Err(e) => self.quarantine(key, &file, &e),
                }
            }
        }
        found.sort_by_key(|c| c.first_timestamp);

        let mut chunks: Vec<ChunkMeta> = Vec::with_capacity(found.len());
        for chunk in found {
            match chunks.last() {
                Some(prev) if chunk.first_timestamp <= prev.last_timestamp => {
                    let reason =
                        StoreError::Invalid(format!("{} overlaps {}", chunk.file, prev.file));
                    self.quarantine(key, &chunk.file, &reason);
                }
                _ => chunks.push(chunk),
            }
        }
        if chunks.is_empty() {
            return Ok(None);
        }

        let meta = SeriesMeta {
            key: key.to_string(),
            chunks,
        };
        self.write_meta(&meta)?;
        warn!(key, chunks = meta.chunks.len(), rows = meta.rows(), "sidecar rebuilt");
        Ok(Some(meta))
    }

    fn write_meta(&self, meta: &SeriesMeta) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| StoreError::Invalid(format!("meta serialization: {e}")))?;
        atomic_write(&self.meta_path(&meta.key), &json)
    }

    fn write_chunk(&self, key: &str, frame: &Frame) -> Result<ChunkMeta, StoreError> {
        let (first, last) = frame_range(frame)?;
        let file = format!("{}.parquet", first.timestamp_millis());
        let bytes = frame_to_parquet(frame)?;
        atomic_write(&self.key_dir(key).join(&file), &bytes)?;
        Ok(ChunkMeta {
            file,
            first_timestamp: first,
            last_timestamp: last,
            rows: frame.len(),
            hash: blake3::hash(&bytes).to_hex().to_string(),
        })
    }

    /// Load a chunk, verifying it against its sidecar entry.
    ///
    /// [`StoreError::Invalid`] means the chunk is corrupt or gone; any other
    /// error means it could not be read right now.
    fn load_chunk(&self, key: &str, chunk: &ChunkMeta) -> Result<Frame, StoreError> {
        let path = self.key_dir(key).join(&chunk.file);
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::Invalid(format!("{} is missing", chunk.file)),
            _ => StoreError::Io(format!("read {}: {e}", path.display())),
        })?;
        if blake3::hash(&bytes).to_hex().as_str() != chunk.hash {
            return Err(StoreError::Invalid(format!("hash mismatch for {}", chunk.file)));
        }
        let frame = parquet_to_frame(&bytes)
            .map_err(|e| StoreError::Invalid(format!("{}: {e}", chunk.file)))?;
        if frame.len() != chunk.rows {
            return Err(StoreError::Invalid(format!(
                "{} has {} rows, sidecar says {}",
                chunk.file,
                frame.len(),
                chunk.rows
            )));
        }
        Ok(frame)
    }

    fn quarantine(&self, key: &str, file: &str, reason: &StoreError) {
        warn!(key, file, error = %reason, "quarantining corrupt chunk");
        quarantine_file(&self.key_dir(key).join(file));
    }

    /// Load the sidecar's chunks in order, or only the newest loadable one.
    /// Corrupt chunks are quarantined and removed from the sidecar, which is
    /// saved before returning.
    fn load_verified(
        &self,
        key: &str,
        meta: &mut SeriesMeta,
        newest_only: bool,
    ) -> Result<Vec<Frame>, StoreError> {
        let order: Vec<usize> = if newest_only {
            (0..meta.chunks.len()).rev().collect()
        } else {
            (0..meta.chunks.len()).collect()
        };
        let mut frames = Vec::new();
        let mut corrupt = Vec::new();
        for i in order {
            let chunk = &meta.chunks[i];
            match self.load_chunk(key, chunk) {
                Ok(frame) => {
                    frames.push(frame);
                    if newest_only {
                        break;
                    }
                }
                Err(e @ StoreError::Invalid(_)) => {
                    self.quarantine(key, &chunk.file, &e);
                    corrupt.push(chunk.file.clone());
                }
                Err(e) => return Err(e),
            }
        }
        if !corrupt.is_empty() {
            meta.chunks.retain(|c| !corrupt.contains(&c.file));
            self.write_meta(meta)?;
        }
        Ok(frames)
    }
}

/// Sidecar entry for a chunk file found on disk without one.
fn decode_chunk(file: &str, bytes: &[u8]) -> Result<ChunkMeta, StoreError> {
    let frame = parquet_to_frame(bytes)?;
    let (first, last) = frame_range(&frame)?;
    Ok(ChunkMeta {
        file: file.to_string(),
        first_timestamp: first,
        last_timestamp: last,
        rows: frame.len(),
        hash: blake3::hash(bytes).to_hex().to_string(),
    })
}

/// Move a file aside as `{name}.quarantined`. Failure is logged only.
fn quarantine_file(path: &Path) {
    let mut target = path.as_os_str().to_owned();
    target.push(".quarantined");
    if let Err(e) = fs::rename(path, PathBuf::from(target)) {
        warn!(path = %path.display(), error = %e, "failed to quarantine file");
    }
}

impl SeriesStore for ParquetSeriesStore {
    fn write(&self, key: &str, frame: &Frame) -> Result<(), StoreError> {
        let (first, _) = frame_range(frame)?;
        let key_dir = self.key_dir(key);
        fs::create_dir_all(&key_dir)
            .map_err(|e| StoreError::Io(format!("create {}: {e}", key_dir.display())))?;

        let mut meta = self.meta(key)?.unwrap_or_else(|| SeriesMeta {
            key: key.to_string(),
            chunks: Vec::new(),
        });

        let new_chunk = self.write_chunk(key, frame)?;
        let mut chunks = Vec::with_capacity(meta.chunks.len() + 1);
        let mut obsolete = Vec::new();
        for chunk in meta.chunks.drain(..) {
            match overlap(chunk.first_timestamp, chunk.last_timestamp, first) {
                Overlap::Keep => chunks.push(chunk),
                Overlap::Replace => {
                    if chunk.file != new_chunk.file {
                        obsolete.push(chunk.file);
                    }
                }
                Overlap::Truncate => match self.load_chunk(key, &chunk) {
                    Ok(mut head) => {
                        head.retain_before(first);
                        chunks.push(self.write_chunk(key, &head)?);
                    }
                    Err(e @ StoreError::Invalid(_)) => self.quarantine(key, &chunk.file, &e),
                    Err(e) => return Err(e),
                },
            }
        }
        chunks.push(new_chunk);
        chunks.sort_by_key(|c| c.first_timestamp);
        meta.chunks = chunks;
        self.write_meta(&meta)?;

        for file in obsolete {
            let path = key_dir.join(&file);
            if let Err(e) = fs::remove_file(&path) {
                warn!(key, file, error = %e, "failed to remove replaced chunk");
            }
        }
        debug!(key, rows = frame.len(), chunks = meta.chunks.len(), "series written");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Frame, StoreError> {
        let not_found = || StoreError::NotFound {
            key: key.to_string(),
        };
        let mut meta = self.meta(key)?.ok_or_else(not_found)?;
        let frames = self.load_verified(key, &mut meta, false)?;
        if frames.is_empty() {
            return Err(not_found());
        }
        Ok(Frame::concat(&frames))
    }

    fn last_row(&self, key: &str) -> Result<Frame, StoreError> {
        let not_found = || StoreError::NotFound {
            key: key.to_string(),
        };
        let mut meta = self.meta(key)?.ok_or_else(not_found)?;
        self.load_verified(key, &mut meta, true)?
            .into_iter()
            .next()
            .map(|frame| frame.tail(1))
            .ok_or_else(not_found)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| StoreError::Io(format!("read dir {}: {e}", self.dir.display())))?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(format!("dir entry: {e}")))?;
            if let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("symbol="))
            {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(|e| StoreError::Io(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::Io(format!("atomic rename to {}: {e}", path.display()))
    })
}

// ── Parquet conversion ──────────────────────────────────────────────

const TIMESTAMP_COLUMN: &str = "timestamp";

fn frame_to_parquet(frame: &Frame) -> Result<Vec<u8>, StoreError> {
    let millis: Vec<i64> = frame
        .timestamps()
        .iter()
        .map(|ts| ts.timestamp_millis())
        .collect();
    let mut columns = vec![Column::new(TIMESTAMP_COLUMN.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?];
    for (name, values) in frame.columns() {
        columns.push(Column::new(name.into(), values.to_vec()));
    }
    let mut df = DataFrame::new(columns)?;

    let mut bytes = Vec::new();
    ParquetWriter::new(&mut bytes).finish(&mut df)?;
    Ok(bytes)
}

fn parquet_to_frame(bytes: &[u8]) -> Result<Frame, StoreError> {
    let df = ParquetReader::new(std::io::Cursor::new(bytes)).finish()?;

    let ts_col = df
        .column(TIMESTAMP_COLUMN)
        .map_err(|_| StoreError::Invalid("missing timestamp column".into()))?
        .cast(&DataType::Int64)?;
    let timestamps = ts_col
        .i64()?
        .iter()
        .enumerate()
        .map(|(row, ms)| {
            ms.and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| StoreError::Invalid(format!("bad timestamp at row {row}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut frame = Frame::new(timestamps);
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == TIMESTAMP_COLUMN {
            continue;
        }
        let values = column.cast(&DataType::Float64)?;
        let values: Vec<f64> = values.f64()?.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        frame
            .insert_column(name, values)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
    }
    Ok(frame)
}

// ── In-memory store ─────────────────────────────────────────────────

/// [`SeriesStore`] kept in memory with the same chunk semantics as the
/// Parquet store. Counts writes so tests can assert on persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: Mutex<HashMap<String, Vec<Frame>>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn chunk_count(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Frame>>> {
        self.series.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SeriesStore for MemoryStore {
    fn write(&self, key: &str, frame: &Frame) -> Result<(), StoreError> {
        let (first, _) = frame_range(frame)?;
        let mut series = self.lock();
        let chunks = series.entry(key.to_string()).or_default();
        let mut kept = Vec::with_capacity(chunks.len() + 1);
        for mut chunk in chunks.drain(..) {
            let (chunk_first, chunk_last) = frame_range(&chunk)?;
            match overlap(chunk_first, chunk_last, first) {
                Overlap::Keep => kept.push(chunk),
                Overlap::Truncate => {
                    chunk.retain_before(first);
                    kept.push(chunk);
                }
                Overlap::Replace => {}
            }
        }
        kept.push(frame.clone());
        *chunks = kept;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Frame, StoreError> {
        match self.lock().get(key) {
            Some(chunks) if !chunks.is_empty() => Ok(Frame::concat(chunks)),
            _ => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use chrono::{Duration, TimeZone};

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn frame(minutes: std::ops::Range<i64>, close: f64) -> Frame {
        let bars: Vec<Bar> = minutes
            .map(|m| Bar {
                timestamp: ts(m),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                tick_volume: 10,
                spread: 0.5,
            })
            .collect();
        Frame::from_bars(&bars)
    }

    fn stores() -> (tempfile::TempDir, Vec<Box<dyn SeriesStore>>) {
        let dir = tempfile::tempdir().unwrap();
        let handle = StoreHandle::open(dir.path()).unwrap();
        let stores: Vec<Box<dyn SeriesStore>> = vec![
            Box::new(handle.library("symbol_specific")),
            Box::new(MemoryStore::new()),
        ];
        (dir, stores)
    }

    #[test]
    fn write_and_read_roundtrip() {
        let (_dir, stores) = stores();
        for store in &stores {
            let mut f = frame(0..3, 1.5);
            f.insert_column("SMA_2", vec![f64::NAN, 1.5, 1.5]).unwrap();
            store.write("EURUSD", &f).unwrap();
            let back = store.read("EURUSD").unwrap();
            assert_eq!(back.timestamps(), f.timestamps());
            assert_eq!(back.column("close"), f.column("close"));
            assert!(back.column("SMA_2").unwrap()[0].is_nan());
            assert_eq!(
                back.column_names().collect::<Vec<_>>(),
                f.column_names().collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn missing_key_is_not_found() {
        let (_dir, stores) = stores();
        for store in &stores {
            assert!(matches!(
                store.read("NOPE"),
                Err(StoreError::NotFound { .. })
            ));
        }
    }

    #[test]
    fn incremental_chunks_concatenate_with_nan_fill() {
        let (_dir, stores) = stores();
        for store in &stores {
            store.write("EURUSD", &frame(0..3, 1.0)).unwrap();
            let mut later = frame(3..5, 2.0);
            later.insert_column("RSI_14", vec![55.0, 60.0]).unwrap();
            store.write("EURUSD", &later).unwrap();

            let all = store.read("EURUSD").unwrap();
            assert_eq!(all.len(), 5);
            let rsi = all.column("RSI_14").unwrap();
            assert!(rsi[..3].iter().all(|v| v.is_nan()));
            assert_eq!(&rsi[3..], &[55.0, 60.0]);
        }
    }

    #[test]
    fn replayed_write_is_idempotent() {
        let (_dir, stores) = stores();
        for store in &stores {
            store.write("EURUSD", &frame(0..3, 1.0)).unwrap();
            store.write("EURUSD", &frame(3..5, 2.0)).unwrap();
            store.write("EURUSD", &frame(3..5, 2.0)).unwrap();
            assert_eq!(store.read("EURUSD").unwrap().len(), 5);
        }
    }

    #[test]
    fn overlapping_write_truncates_older_chunk() {
        let (_dir, stores) = stores();
        for store in &stores {
            store.write("EURUSD", &frame(0..5, 1.0)).unwrap();
            store.write("EURUSD", &frame(3..6, 2.0)).unwrap();
            let all = store.read("EURUSD").unwrap();
            assert_eq!(all.len(), 6);
            assert_eq!(all.column("close").unwrap(), &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        }
    }

    #[test]
    fn keys_are_listed() {
        let (_dir, stores) = stores();
        for store in &stores {
            store.write("GBPUSD", &frame(0..1, 1.0)).unwrap();
            store.write("EURUSD", &frame(0..1, 1.0)).unwrap();
            assert_eq!(store.keys().unwrap(), vec!["EURUSD", "GBPUSD"]);
        }
    }

    #[test]
    fn empty_frame_is_rejected() {
        let (_dir, stores) = stores();
        for store in &stores {
            let err = store.write("EURUSD", &Frame::default()).unwrap_err();
            assert!(matches!(err, StoreError::Invalid(_)));
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn sidecar_tracks_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::open(dir.path()).unwrap().library("symbol_specific");
        store.write("EURUSD", &frame(0..3, 1.0)).unwrap();
        store.write("EURUSD", &frame(3..5, 1.0)).unwrap();
        let meta = store.meta("EURUSD").unwrap().unwrap();
        assert_eq!(meta.chunks.len(), 2);
        assert_eq!(meta.rows(), 5);
        assert_eq!(meta.last_timestamp(), Some(ts(4)));
        assert!(store.dir().join("symbol=EURUSD").join("meta.json").exists());
    }

    #[test]
    fn corrupt_chunk_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::open(dir.path()).unwrap().library("symbol_specific");
        store.write("EURUSD", &frame(0..3, 1.0)).unwrap();
        store.write("EURUSD", &frame(3..5, 2.0)).unwrap();

        let meta = store.meta("EURUSD").unwrap().unwrap();
        let first_file = store.key_dir("EURUSD").join(&meta.chunks[0].file);
        fs::write(&first_file, b"not parquet").unwrap();

        let survivors = store.read("EURUSD").unwrap();
        assert_eq!(survivors.len(), 2);
        assert!(!first_file.exists());
        assert!(first_file.with_extension("parquet.quarantined").exists());
        // The sidecar no longer lists the quarantined chunk.
        let meta = store.meta("EURUSD").unwrap().unwrap();
        assert_eq!(meta.chunks.len(), 1);
        assert_eq!(meta.rows(), 2);
    }

    #[test]
    fn write_after_quarantine_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::open(dir.path()).unwrap().library("symbol_specific");
        store.write("EURUSD", &frame(0..5, 1.0)).unwrap();
        store.write("EURUSD", &frame(5..8, 2.0)).unwrap();
        let meta = store.meta("EURUSD").unwrap().unwrap();
        fs::write(store.key_dir("EURUSD").join(&meta.chunks[0].file), b"garbage").unwrap();
        assert_eq!(store.read("EURUSD").unwrap().len(), 3);

        // Starts inside the quarantined chunk's range.
        store.write("EURUSD", &frame(3..10, 3.0)).unwrap();
        let all = store.read("EURUSD").unwrap();
        assert_eq!(all.timestamps(), (3..10).map(ts).collect::<Vec<_>>().as_slice());
        assert!(all.column("close").unwrap().iter().all(|&c| c == 3.0));
    }

    #[test]
    fn corrupt_chunk_under_truncation_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::open(dir.path()).unwrap().library("symbol_specific");
        store.write("EURUSD", &frame(0..5, 1.0)).unwrap();
        let meta = store.meta("EURUSD").unwrap().unwrap();
        let file = store.key_dir("EURUSD").join(&meta.chunks[0].file);
        fs::write(&file, b"garbage").unwrap();

        store.write("EURUSD", &frame(3..6, 2.0)).unwrap();
        assert_eq!(store.read("EURUSD").unwrap().len(), 3);
        assert!(file.with_extension("parquet.quarantined").exists());
    }

    #[test]
    fn unreadable_chunk_is_an_error_not_a_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::open(dir.path()).unwrap().library("symbol_specific");
        store.write("EURUSD", &frame(0..3, 1.0)).unwrap();
        let meta = store.meta("EURUSD").unwrap().unwrap();
        let file = store.key_dir("EURUSD").join(&meta.chunks[0].file);
        // A directory in place of the file: reading it fails with an I/O error.
        fs::remove_file(&file).unwrap();
        fs::create_dir(&file).unwrap();

        let err = store.read("EURUSD").unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert!(!file.with_extension("parquet.quarantined").exists());
        assert_eq!(store.meta("EURUSD").unwrap().unwrap().chunks.len(), 1);
    }

    #[test]
    fn corrupt_sidecar_is_rebuilt_from_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::open(dir.path()).unwrap().library("symbol_specific");
        store.write("EURUSD", &frame(0..100, 1.0)).unwrap();
        let meta_path = store.meta_path("EURUSD");
        fs::write(&meta_path, b"{ not json").unwrap();

        store.write("EURUSD", &frame(100..200, 2.0)).unwrap();
        let all = store.read("EURUSD").unwrap();
        assert_eq!(all.len(), 200);
        assert_eq!(store.meta("EURUSD").unwrap().unwrap().chunks.len(), 2);
        assert!(store.key_dir("EURUSD").join("meta.json.quarantined").exists());
    }

    #[test]
    fn missing_sidecar_is_rebuilt_from_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::open(dir.path()).unwrap().library("symbol_specific");
        store.write("EURUSD", &frame(0..3, 1.0)).unwrap();
        store.write("EURUSD", &frame(3..5, 2.0)).unwrap();
        fs::remove_file(store.meta_path("EURUSD")).unwrap();

        let all = store.read("EURUSD").unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all.column("close").unwrap(), &[1.0, 1.0, 1.0, 2.0, 2.0]);
        assert!(store.meta_path("EURUSD").exists());
    }

    #[test]
    fn rebuild_drops_leftover_of_interrupted_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::open(dir.path()).unwrap().library("symbol_specific");
        store.write("EURUSD", &frame(0..3, 1.0)).unwrap();
        store.write("EURUSD", &frame(3..6, 2.0)).unwrap();
        let meta = store.meta("EURUSD").unwrap().unwrap();
        let stale = store.key_dir("EURUSD").join(&meta.chunks[1].file);
        let kept = fs::read(&stale).unwrap();

        // Replace from minute 2, then restore the replaced file as if its
        // removal never happened, and lose the sidecar.
        store.write("EURUSD", &frame(2..6, 3.0)).unwrap();
        fs::write(&stale, kept).unwrap();
        fs::remove_file(store.meta_path("EURUSD")).unwrap();

        let all = store.read("EURUSD").unwrap();
        assert_eq!(all.column("close").unwrap(), &[1.0, 1.0, 3.0, 3.0, 3.0, 3.0]);
        assert!(stale.with_extension("parquet.quarantined").exists());
    }

    #[test]
    fn last_row_is_the_newest_stored_row() {
        let (_dir, stores) = stores();
        for store in &stores {
            assert!(matches!(
                store.last_row("EURUSD"),
                Err(StoreError::NotFound { .. })
            ));
            store.write("EURUSD", &frame(0..3, 1.0)).unwrap();
            store.write("EURUSD", &frame(3..5, 2.0)).unwrap();
            let last = store.last_row("EURUSD").unwrap();
            assert_eq!(last.timestamps(), &[ts(4)]);
            assert_eq!(last.column("close").unwrap(), &[2.0]);
        }
    }

    #[test]
    fn memory_store_counts_writes() {
        let store = MemoryStore::new();
        store.write("EURUSD", &frame(0..2, 1.0)).unwrap();
        store.write("EURUSD", &frame(2..4, 1.0)).unwrap();
        assert_eq!(store.writes(), 2);
        assert_eq!(store.chunk_count("EURUSD"), 2);
    }
}
