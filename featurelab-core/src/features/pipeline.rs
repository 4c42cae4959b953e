//! Feature pipeline: base columns, then every configured feature instance.
//!
//! Each instance is built and computed in isolation. A constructor error, a
//! compute error or a panic drops that instance's columns and is logged; the
//! remaining instances still run.

use super::expand::{expand_all, FeatureConfig, FeatureInstance};
use super::math;
use super::registry::{Category, FeatureRegistry};
use super::universal::Panel;
use super::{Continuity, FeatureError, FeatureOutput};
use crate::domain::{Frame, FrameError};
use indexmap::IndexMap;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Columns added by [`apply_base`], in order.
pub const BASE_COLUMNS: [&str; 7] = [
    "returns",
    "log_returns",
    "minute",
    "hour",
    "day",
    "day_of_week",
    "minutes_in_bucket",
];

/// Add the non-configurable derived columns: simple and log returns of close,
/// calendar fields from the timestamp index, and the quarter-hour bucket
/// (0 = minutes 0-14, 1 = 15-29, 2 = 30-44, 3 = 45-59).
pub fn apply_base(frame: &mut Frame) -> Result<(), FrameError> {
    let close = frame.require("close")?;
    let returns = math::pct_change(close, 1);
    let log_returns = math::log_returns(close);

    let n = frame.len();
    let mut minute = Vec::with_capacity(n);
    let mut hour = Vec::with_capacity(n);
    let mut day = Vec::with_capacity(n);
    let mut weekday = Vec::with_capacity(n);
    let mut bucket = Vec::with_capacity(n);
    for (m, h, d, w) in frame.calendar() {
        minute.push(m as f64);
        hour.push(h as f64);
        day.push(d as f64);
        weekday.push(w as f64);
        bucket.push(minute_bucket(m) as f64);
    }

    let values = [returns, log_returns, minute, hour, day, weekday, bucket];
    for (name, column) in BASE_COLUMNS.iter().zip(values) {
        frame.insert_column(*name, column)?;
    }
    Ok(())
}

fn minute_bucket(minute: u32) -> u32 {
    match minute {
        0..=14 => 0,
        15..=29 => 1,
        30..=44 => 2,
        _ => 3,
    }
}

/// Outcome counts of one [`apply_features`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub failed: usize,
}

/// Compute every instance against `frame` in order and merge its columns as
/// `{output_name}` or `{output_name}_{sub}`. Failing instances are logged and
/// skipped.
pub fn apply_features(frame: &mut Frame, instances: &[FeatureInstance]) -> ApplySummary {
    let mut summary = ApplySummary::default();
    for instance in instances {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let feature = instance.build()?;
            feature.compute(frame)
        }))
        .unwrap_or_else(|payload| Err(FeatureError::Panicked(panic_message(payload.as_ref()))))
        .and_then(|output| merge(frame, &instance.output_name, output));

        match result {
            Ok(()) => summary.applied += 1,
            Err(e) => {
                error!(feature = %instance.output_name, error = %e, "feature failed, skipping");
                summary.failed += 1;
            }
        }
    }
    summary
}

/// Insert an output's columns, all or nothing.
fn merge(frame: &mut Frame, name: &str, output: FeatureOutput) -> Result<(), FeatureError> {
    let columns = match output {
        FeatureOutput::Single(values) => vec![(name.to_string(), values)],
        FeatureOutput::Multi(subs) => subs
            .into_iter()
            .map(|(sub, values)| (format!("{name}_{sub}"), values))
            .collect(),
    };
    if let Some((column, values)) = columns.iter().find(|(_, v)| v.len() != frame.len()) {
        return Err(FrameError::LengthMismatch {
            column: column.clone(),
            expected: frame.len(),
            actual: values.len(),
        }
        .into());
    }
    for (column, values) in columns {
        frame.insert_column(column, values)?;
    }
    Ok(())
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The expanded feature set for a process, with its lookback computed once.
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    registry: FeatureRegistry,
    symbol_instances: Vec<FeatureInstance>,
    universal_instances: Vec<FeatureInstance>,
    max_lookback: usize,
    /// Output names of instances whose values are running totals.
    cumulative: Vec<String>,
    daily_anchored: bool,
}

impl FeatureEngine {
    pub fn new(registry: FeatureRegistry, config: &FeatureConfig) -> Self {
        for (category, kind) in config.unknown_kinds(&registry) {
            warn!(%category, kind, "feature kind in config is not registered, ignoring");
        }

        let max_lookback = registry.max_lookback();
        let symbol_instances = expand_all(&registry, config, Category::SymbolSpecific);
        let universal_instances = expand_all(&registry, config, Category::Universal);
        info!(
            max_lookback,
            symbol_features = symbol_instances.len(),
            universal_features = universal_instances.len(),
            "feature set expanded"
        );

        let mut cumulative = Vec::new();
        let mut daily_anchored = false;
        for instance in &symbol_instances {
            let Ok(feature) = instance.build() else {
                continue;
            };
            if feature.warmup() > max_lookback {
                warn!(
                    feature = %instance.output_name,
                    warmup = feature.warmup(),
                    max_lookback,
                    "feature warmup exceeds the lookback window; resumed values will differ"
                );
            }
            match feature.continuity() {
                Continuity::Windowed => {}
                Continuity::Cumulative => {
                    debug!(feature = %instance.output_name, "continued from the stored series on resume");
                    cumulative.push(instance.output_name.clone());
                }
                Continuity::Daily => {
                    debug!(feature = %instance.output_name, "resumed fetches reach back to the day start");
                    daily_anchored = true;
                }
            }
        }

        Self {
            registry,
            symbol_instances,
            universal_instances,
            max_lookback,
            cumulative,
            daily_anchored,
        }
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    /// Bars of history re-fetched ahead of a checkpoint.
    pub fn max_lookback(&self) -> usize {
        self.max_lookback
    }

    /// Whether a resumed fetch must start no later than UTC midnight of the
    /// checkpoint's day.
    pub fn anchors_daily(&self) -> bool {
        self.daily_anchored
    }

    /// Output names of the running-total features.
    pub fn cumulative_outputs(&self) -> &[String] {
        &self.cumulative
    }

    fn is_cumulative_column(&self, column: &str) -> bool {
        self.cumulative.iter().any(|name| {
            column
                .strip_prefix(name.as_str())
                .map_or(false, |rest| rest.is_empty() || rest.starts_with('_'))
        })
    }

    /// Shift each running-total column of a resumed `frame` so that, at the
    /// timestamp of `anchor` (the newest persisted row), it equals the
    /// persisted value. Every later row then matches a cold run.
    ///
    /// A column that cannot be aligned is set to NaN rather than persisted
    /// with a wrong offset: no anchor, the anchor's timestamp missing from
    /// `frame`, or a non-finite value on either side.
    pub fn continue_cumulative(
        &self,
        frame: &mut Frame,
        anchor: Option<&Frame>,
    ) -> Result<ApplySummary, FrameError> {
        let mut summary = ApplySummary::default();
        let anchor = anchor.and_then(|a| a.last_timestamp().map(|ts| (a, ts)));
        let row = anchor.and_then(|(_, ts)| frame.timestamps().binary_search(&ts).ok());
        let columns: Vec<String> = frame
            .column_names()
            .filter(|c| self.is_cumulative_column(c))
            .map(str::to_string)
            .collect();

        for column in columns {
            let values = frame.require(&column)?.to_vec();
            let offset = anchor.zip(row).and_then(|((anchor, _), row)| {
                let stored = *anchor.column(&column)?.last()?;
                let recomputed = values[row];
                (stored.is_finite() && recomputed.is_finite()).then(|| stored - recomputed)
            });
            let shifted = match offset {
                Some(offset) => {
                    summary.applied += 1;
                    values.iter().map(|v| v + offset).collect()
                }
                None => {
                    error!(
                        column = %column,
                        anchor = ?anchor.map(|(_, ts)| ts),
                        "cannot continue running total from the stored series, storing NaN"
                    );
                    summary.failed += 1;
                    vec![f64::NAN; values.len()]
                }
            };
            frame.insert_column(column, shifted)?;
        }
        Ok(summary)
    }

    pub fn symbol_instances(&self) -> &[FeatureInstance] {
        &self.symbol_instances
    }

    pub fn universal_instances(&self) -> &[FeatureInstance] {
        &self.universal_instances
    }

    /// Base columns then every symbol-specific feature.
    pub fn process(&self, frame: &mut Frame) -> Result<ApplySummary, FrameError> {
        apply_base(frame)?;
        Ok(apply_features(frame, &self.symbol_instances))
    }

    /// Compute the universal features over several symbols' frames. The
    /// result is indexed by the union of their timestamps.
    pub fn apply_universal(&self, frames: &IndexMap<String, Frame>) -> (Frame, ApplySummary) {
        let panel = Panel::align(frames);
        let mut out = Frame::new(panel.timestamps().to_vec());
        let mut summary = ApplySummary::default();
        for instance in &self.universal_instances {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let feature = instance.build_universal()?;
                feature.compute(&panel)
            }))
            .unwrap_or_else(|payload| Err(FeatureError::Panicked(panic_message(payload.as_ref()))))
            .and_then(|output| merge(&mut out, &instance.output_name, output));

            match result {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    error!(feature = %instance.output_name, error = %e, "universal feature failed, skipping");
                    summary.failed += 1;
                }
            }
        }
        (out, summary)
    }
}
