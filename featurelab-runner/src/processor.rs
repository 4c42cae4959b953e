//! Per-symbol incremental ETL step.
//!
//! One invocation walks
//! `START → DETERMINE_WINDOW → FETCH → QUALITY_CHECK → FEATURE_APPLY →
//! INCREMENTAL_FILTER → PERSIST → CHECKPOINT_UPDATE → DONE`, or ends in
//! `FAILED`. The processor never writes the checkpoint file: the
//! CHECKPOINT_UPDATE step hands the new watermark back in
//! [`Outcome::Persisted`] and the orchestrator commits it.
//!
//! Resuming from a checkpoint re-fetches `max_lookback` minutes of history
//! ahead of the watermark so windowed features see the same inputs they would
//! on a cold run, then discards those rows before persisting. Features that
//! reset at UTC midnight pull the fetch back to the start of the watermark's
//! day. Running totals are continued from the newest stored row.

use chrono::{DateTime, Duration, Utc};
use featurelab_core::data::{
    check_quality, MarketDataSource, SeriesStore, SourceError, StoreError,
};
use featurelab_core::domain::{Frame, FrameError};
use featurelab_core::features::FeatureEngine;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Start,
    DetermineWindow,
    Fetch,
    QualityCheck,
    FeatureApply,
    IncrementalFilter,
    Persist,
    CheckpointUpdate,
    Done,
    Failed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Start => "START",
            ProcessState::DetermineWindow => "DETERMINE_WINDOW",
            ProcessState::Fetch => "FETCH",
            ProcessState::QualityCheck => "QUALITY_CHECK",
            ProcessState::FeatureApply => "FEATURE_APPLY",
            ProcessState::IncrementalFilter => "INCREMENTAL_FILTER",
            ProcessState::Persist => "PERSIST",
            ProcessState::CheckpointUpdate => "CHECKPOINT_UPDATE",
            ProcessState::Done => "DONE",
            ProcessState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("fetch failed: {0}")]
    Source(#[from] SourceError),

    #[error("persist failed: {0}")]
    Store(#[from] StoreError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("symbol task panicked: {0}")]
    Panicked(String),
}

impl ProcessError {
    /// Whether the whole symbol run is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ProcessError::Source(e) => e.is_transient(),
            ProcessError::Store(e) => e.is_transient(),
            ProcessError::Frame(_) | ProcessError::Panicked(_) => false,
        }
    }
}

/// Inclusive fetch range for one run, plus the watermark rows must exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub resume_after: Option<DateTime<Utc>>,
}

impl FetchWindow {
    /// Start no later than UTC midnight of the watermark's day, and never
    /// before `earliest`. A window without a watermark is unchanged.
    pub fn anchored_to_day(self, earliest: DateTime<Utc>) -> Self {
        let Some(midnight) = self
            .resume_after
            .and_then(|last| last.date_naive().and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc())
        else {
            return self;
        };
        Self {
            start: self.start.min(midnight.max(earliest)),
            ..self
        }
    }
}

/// Resume `max_lookback` minutes before the watermark, never before
/// `earliest`. Without a watermark, start at `earliest`.
pub fn determine_window(
    last_timestamp: Option<DateTime<Utc>>,
    max_lookback: usize,
    earliest: DateTime<Utc>,
    end: DateTime<Utc>,
) -> FetchWindow {
    let start = match last_timestamp {
        Some(last) => i64::try_from(max_lookback)
            .ok()
            .and_then(Duration::try_minutes)
            .and_then(|lookback| last.checked_sub_signed(lookback))
            .map_or(earliest, |start| start.max(earliest)),
        None => earliest,
    };
    FetchWindow {
        start,
        end,
        resume_after: last_timestamp,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// New rows were written; the checkpoint should advance to
    /// `last_timestamp`.
    Persisted {
        rows: usize,
        last_timestamp: DateTime<Utc>,
    },
    NoNewData,
}

#[derive(Debug)]
pub struct SymbolReport {
    pub symbol: String,
    pub attempts: u32,
    pub result: Result<Outcome, ProcessError>,
}

impl SymbolReport {
    pub fn persisted(&self) -> Option<DateTime<Utc>> {
        match self.result {
            Ok(Outcome::Persisted { last_timestamp, .. }) => Some(last_timestamp),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.result.is_err()
    }
}

/// Everything one symbol run needs. Cheap to clone; each worker task gets
/// its own copy.
#[derive(Clone)]
pub struct SymbolProcessor {
    source: Arc<dyn MarketDataSource>,
    store: Arc<dyn SeriesStore>,
    engine: Arc<FeatureEngine>,
    retry: RetryPolicy,
    earliest_start: DateTime<Utc>,
}

impl fmt::Debug for SymbolProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolProcessor")
            .field("source", &self.source.name())
            .field("max_lookback", &self.engine.max_lookback())
            .field("retry", &self.retry)
            .field("earliest_start", &self.earliest_start)
            .finish()
    }
}

fn enter(symbol: &str, state: ProcessState) {
    debug!(symbol, %state, "state transition");
}

impl SymbolProcessor {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        store: Arc<dyn SeriesStore>,
        engine: Arc<FeatureEngine>,
        retry: RetryPolicy,
        earliest_start: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            store,
            engine,
            retry,
            earliest_start,
        }
    }

    pub fn source(&self) -> &Arc<dyn MarketDataSource> {
        &self.source
    }

    pub fn store(&self) -> &Arc<dyn SeriesStore> {
        &self.store
    }

    pub fn engine(&self) -> &FeatureEngine {
        &self.engine
    }

    /// Run the state machine for one symbol, retrying transient failures.
    pub fn process(
        &self,
        symbol: &str,
        last_timestamp: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> SymbolReport {
        let mut attempt = 0;
        loop {
            attempt += 1;
            enter(symbol, ProcessState::Start);
            match self.run_once(symbol, last_timestamp, end) {
                Ok(outcome) => {
                    enter(symbol, ProcessState::Done);
                    return SymbolReport {
                        symbol: symbol.to_string(),
                        attempts: attempt,
                        result: Ok(outcome),
                    };
                }
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        symbol,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    enter(symbol, ProcessState::Failed);
                    error!(symbol, attempts = attempt, error = %e, "symbol failed");
                    return SymbolReport {
                        symbol: symbol.to_string(),
                        attempts: attempt,
                        result: Err(e),
                    };
                }
            }
        }
    }

    /// One pass of the state machine, no retries.
    pub fn run_once(
        &self,
        symbol: &str,
        last_timestamp: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<Outcome, ProcessError> {
        enter(symbol, ProcessState::DetermineWindow);
        let mut window = determine_window(
            last_timestamp,
            self.engine.max_lookback(),
            self.earliest_start,
            end,
        );
        if self.engine.anchors_daily() {
            window = window.anchored_to_day(self.earliest_start);
        }
        debug!(symbol, start = %window.start, end = %window.end, "fetch window");
        if window.start > window.end {
            return Ok(Outcome::NoNewData);
        }

        enter(symbol, ProcessState::Fetch);
        let bars = self.source.fetch(symbol, window.start, window.end)?;
        if bars.is_empty() {
            info!(symbol, "no new data");
            return Ok(Outcome::NoNewData);
        }

        enter(symbol, ProcessState::QualityCheck);
        let mut frame = Frame::from_bars(&bars);
        let quality = check_quality(&mut frame, symbol);
        debug!(symbol, rows_in = quality.rows_in, rows_out = quality.rows_out, "quality checked");

        enter(symbol, ProcessState::FeatureApply);
        let summary = self.engine.process(&mut frame)?;
        debug!(symbol, applied = summary.applied, failed = summary.failed, "features applied");
        if window.resume_after.is_some() && !self.engine.cumulative_outputs().is_empty() {
            let anchor = match self.store.last_row(symbol) {
                Ok(anchor) => Some(anchor),
                Err(StoreError::NotFound { .. }) => {
                    warn!(symbol, "checkpoint without stored series, running totals cannot continue");
                    None
                }
                Err(e) => return Err(e.into()),
            };
            let carried = self.engine.continue_cumulative(&mut frame, anchor.as_ref())?;
            debug!(symbol, applied = carried.applied, failed = carried.failed, "running totals continued");
        }

        enter(symbol, ProcessState::IncrementalFilter);
        if let Some(last) = window.resume_after {
            frame.retain_after(last);
        }
        let Some(new_last) = frame.last_timestamp() else {
            info!(symbol, "no bars after checkpoint");
            return Ok(Outcome::NoNewData);
        };

        enter(symbol, ProcessState::Persist);
        self.store.write(symbol, &frame)?;
        info!(symbol, rows = frame.len(), last = %new_last, "persisted");

        enter(symbol, ProcessState::CheckpointUpdate);
        Ok(Outcome::Persisted {
            rows: frame.len(),
            last_timestamp: new_last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use featurelab_core::data::MemoryStore;
    use featurelab_core::domain::{Bar, SymbolInfo};
    use featurelab_core::features::{FeatureConfig, FeatureRegistry};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ts(m: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, 0, 0, 0).unwrap() + Duration::minutes(m)
    }

    /// Serves fixed bars after failing `failures` times with a transient error.
    struct Flaky {
        bars: Vec<Bar>,
        failures: u32,
        calls: AtomicU32,
    }

    impl MarketDataSource for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, SourceError> {
            Ok(SymbolInfo::new(symbol, symbol))
        }

        fn fetch(
            &self,
            _symbol: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Bar>, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(SourceError::NetworkUnreachable("down".into()));
            }
            Ok(self
                .bars
                .iter()
                .filter(|b| b.timestamp >= start && b.timestamp <= end)
                .cloned()
                .collect())
        }
    }

    fn bars(n: i64) -> Vec<Bar> {
        (0..n)
            .map(|m| Bar {
                timestamp: ts(m),
                open: 1.0 + m as f64,
                high: 2.0 + m as f64,
                low: 0.5 + m as f64,
                close: 1.5 + m as f64,
                tick_volume: 10,
                spread: 1.0,
            })
            .collect()
    }

    fn processor(source: Flaky, store: Arc<MemoryStore>) -> (SymbolProcessor, Arc<Flaky>) {
        let source = Arc::new(source);
        let config = FeatureConfig::from_json(
            r#"{"symbol_specific": {"Moving_Averages": {"SMA": {"length": [2]}}}}"#,
        )
        .unwrap();
        let engine = Arc::new(FeatureEngine::new(FeatureRegistry::builtin(), &config));
        let p = SymbolProcessor::new(
            source.clone(),
            store,
            engine,
            RetryPolicy::immediate(3),
            ts(0),
        );
        (p, source)
    }

    fn flaky(n: i64, failures: u32) -> Flaky {
        Flaky {
            bars: bars(n),
            failures,
            calls: AtomicU32::new(0),
        }
    }

    #[test]
    fn window_without_checkpoint_starts_at_earliest() {
        let w = determine_window(None, 200, ts(0), ts(500));
        assert_eq!(w.start, ts(0));
        assert_eq!(w.end, ts(500));
        assert_eq!(w.resume_after, None);
    }

    #[test]
    fn window_resumes_lookback_minutes_early() {
        let w = determine_window(Some(ts(300)), 200, ts(0), ts(500));
        assert_eq!(w.start, ts(100));
        assert_eq!(w.resume_after, Some(ts(300)));
    }

    #[test]
    fn window_is_clamped_to_earliest() {
        let w = determine_window(Some(ts(50)), 200, ts(0), ts(500));
        assert_eq!(w.start, ts(0));
    }

    #[test]
    fn day_anchor_reaches_back_to_midnight() {
        // Watermark at 04:20 on the second day; lookback alone would start at 01:00.
        let w = determine_window(Some(ts(1700)), 200, ts(0), ts(2000)).anchored_to_day(ts(0));
        assert_eq!(w.start, ts(1440));
        assert_eq!(w.resume_after, Some(ts(1700)));

        // Lookback already reaches past midnight.
        let w = determine_window(Some(ts(1460)), 200, ts(0), ts(2000)).anchored_to_day(ts(0));
        assert_eq!(w.start, ts(1260));
    }

    #[test]
    fn day_anchor_respects_earliest_and_cold_windows() {
        let w = determine_window(Some(ts(1700)), 200, ts(1450), ts(2000)).anchored_to_day(ts(1450));
        assert_eq!(w.start, ts(1450));
        let w = determine_window(Some(ts(1700)), 200, ts(1600), ts(2000)).anchored_to_day(ts(1600));
        assert_eq!(w.start, ts(1600));
        let cold = determine_window(None, 200, ts(0), ts(500));
        assert_eq!(cold.anchored_to_day(ts(0)), cold);
    }

    #[test]
    fn resumed_run_continues_running_totals_across_midnight() {
        // GIVEN one store filled in two runs and another in a single cold run
        let resumed = Arc::new(MemoryStore::new());
        let (p, _) = processor(flaky(1500, 0), resumed.clone());
        let first = p.process("EURUSD", None, ts(1460)).result.unwrap();
        assert_eq!(first, Outcome::Persisted { rows: 1461, last_timestamp: ts(1460) });
        p.process("EURUSD", Some(ts(1460)), ts(1499)).result.unwrap();

        let cold = Arc::new(MemoryStore::new());
        let (p, _) = processor(flaky(1500, 0), cold.clone());
        p.process("EURUSD", None, ts(1499)).result.unwrap();

        // THEN the running total and the day-anchored average agree row for row
        let resumed = resumed.read("EURUSD").unwrap();
        let cold = cold.read("EURUSD").unwrap();
        assert_eq!(resumed.timestamps(), cold.timestamps());
        for column in ["OBV", "VWAP"] {
            assert_eq!(resumed.column(column).unwrap(), cold.column(column).unwrap(), "{column}");
        }
    }

    #[test]
    fn fresh_symbol_persists_everything() {
        let store = Arc::new(MemoryStore::new());
        let (p, _) = processor(flaky(5, 0), store.clone());
        let report = p.process("EURUSD", None, ts(10));
        assert_eq!(
            report.result.unwrap(),
            Outcome::Persisted {
                rows: 5,
                last_timestamp: ts(4)
            }
        );
        let stored = store.read("EURUSD").unwrap();
        assert_eq!(stored.len(), 5);
        assert!(stored.has_column("SMA_2"));
        assert!(stored.has_column("minutes_in_bucket"));
    }

    #[test]
    fn resumed_symbol_persists_only_new_rows() {
        let store = Arc::new(MemoryStore::new());
        let (p, _) = processor(flaky(5, 0), store.clone());
        let report = p.process("EURUSD", Some(ts(2)), ts(10));
        assert_eq!(
            report.result.unwrap(),
            Outcome::Persisted {
                rows: 2,
                last_timestamp: ts(4)
            }
        );
        // SMA_2 at ts(3) used the re-fetched bar at ts(2).
        let stored = store.read("EURUSD").unwrap();
        assert_eq!(stored.column("SMA_2").unwrap(), &[(4.5 + 3.5) / 2.0, (5.5 + 4.5) / 2.0]);
        // Nothing stored to continue the running total from.
        assert!(stored.column("OBV").unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn nothing_after_checkpoint_is_no_new_data() {
        let store = Arc::new(MemoryStore::new());
        let (p, _) = processor(flaky(5, 0), store.clone());
        let report = p.process("EURUSD", Some(ts(4)), ts(10));
        assert_eq!(report.result.unwrap(), Outcome::NoNewData);
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn transient_failures_are_retried() {
        let store = Arc::new(MemoryStore::new());
        let (p, source) = processor(flaky(3, 2), store);
        let report = p.process("EURUSD", None, ts(10));
        assert_eq!(report.attempts, 3);
        assert!(report.persisted().is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhausted_retries_fail() {
        let store = Arc::new(MemoryStore::new());
        let (p, _) = processor(flaky(3, 10), store.clone());
        let report = p.process("EURUSD", None, ts(10));
        assert!(report.is_failed());
        assert_eq!(report.attempts, 3);
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn state_names_render() {
        assert_eq!(ProcessState::IncrementalFilter.to_string(), "INCREMENTAL_FILTER");
        assert_eq!(ProcessState::Failed.to_string(), "FAILED");
    }
}
