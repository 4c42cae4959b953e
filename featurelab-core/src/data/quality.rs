//! Data-quality checks on fetched minute bars.
//!
//! Only duplicate timestamps mutate the frame (keep-first). Missing values
//! and price outliers are reported and logged but left in place for
//! downstream consumers.

use crate::domain::Frame;
use tracing::warn;

/// Absolute z-score above which a price is reported as an outlier.
pub const OUTLIER_Z: f64 = 3.0;

const PRICE_COLUMNS: [&str; 4] = ["open", "high", "low", "close"];

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyReport {
    pub anomaly_type: AnomalyType,
    /// Column the anomaly was found in, if column-specific.
    pub column: Option<String>,
    pub count: usize,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyType {
    DuplicateTimestamp,
    MissingValues,
    OutlierPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub anomalies: Vec<AnomalyReport>,
}

impl QualityReport {
    pub fn duplicates_removed(&self) -> usize {
        self.rows_in - self.rows_out
    }

    pub fn count(&self, anomaly_type: AnomalyType) -> usize {
        self.anomalies
            .iter()
            .filter(|a| a.anomaly_type == anomaly_type)
            .map(|a| a.count)
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Deduplicate `frame` in place and report what was found.
pub fn check_quality(frame: &mut Frame, symbol: &str) -> QualityReport {
    let rows_in = frame.len();
    let mut anomalies = Vec::new();

    let removed = frame.dedup_timestamps();
    if removed > 0 {
        anomalies.push(AnomalyReport {
            anomaly_type: AnomalyType::DuplicateTimestamp,
            column: None,
            count: removed,
            severity: Severity::Info,
        });
    }

    for (name, values) in frame.columns() {
        let missing = values.iter().filter(|v| v.is_nan()).count();
        if missing > 0 {
            anomalies.push(AnomalyReport {
                anomaly_type: AnomalyType::MissingValues,
                column: Some(name.to_string()),
                count: missing,
                severity: Severity::Warning,
            });
        }
    }

    for name in PRICE_COLUMNS {
        if let Some(values) = frame.column(name) {
            let outliers = count_outliers(values);
            if outliers > 0 {
                anomalies.push(AnomalyReport {
                    anomaly_type: AnomalyType::OutlierPrice,
                    column: Some(name.to_string()),
                    count: outliers,
                    severity: Severity::Warning,
                });
            }
        }
    }

    for a in &anomalies {
        warn!(
            symbol,
            anomaly = ?a.anomaly_type,
            column = a.column.as_deref().unwrap_or("-"),
            count = a.count,
            "data quality anomaly"
        );
    }

    QualityReport {
        rows_in,
        rows_out: frame.len(),
        anomalies,
    }
}

/// Values with |z| > [`OUTLIER_Z`] against the population mean and standard
/// deviation of the finite values.
fn count_outliers(values: &[f64]) -> usize {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return 0;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let std = (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std == 0.0 {
        return 0;
    }
    finite
        .iter()
        .filter(|v| ((*v - mean) / std).abs() > OUTLIER_Z)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn bar(minute: i64, close: f64) -> Bar {
        Bar {
            timestamp: ts(minute),
            open: close,
            high: close,
            low: close,
            close,
            tick_volume: 1,
            spread: 0.0,
        }
    }

    #[test]
    fn clean_frame_is_untouched() {
        let bars: Vec<Bar> = (0..10).map(|m| bar(m, 100.0 + m as f64)).collect();
        let mut frame = Frame::from_bars(&bars);
        let before = frame.clone();
        let report = check_quality(&mut frame, "EURUSD");
        assert!(report.is_clean());
        assert_eq!(report.rows_out, 10);
        assert_eq!(frame, before);
    }

    #[test]
    fn duplicates_keep_first() {
        let bars = vec![bar(0, 1.0), bar(1, 2.0), bar(1, 9.0), bar(2, 3.0)];
        let mut frame = Frame::from_bars(&bars);
        let report = check_quality(&mut frame, "EURUSD");
        assert_eq!(report.duplicates_removed(), 1);
        assert_eq!(report.count(AnomalyType::DuplicateTimestamp), 1);
        assert_eq!(frame.column("close").unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn missing_values_are_reported_not_removed() {
        let mut bars: Vec<Bar> = (0..4).map(|m| bar(m, 1.0)).collect();
        bars[2].close = f64::NAN;
        let mut frame = Frame::from_bars(&bars);
        let report = check_quality(&mut frame, "EURUSD");
        assert_eq!(frame.len(), 4);
        assert_eq!(report.count(AnomalyType::MissingValues), 1);
        assert_eq!(report.anomalies[0].column.as_deref(), Some("close"));
    }

    #[test]
    fn outliers_are_reported_not_removed() {
        let mut bars: Vec<Bar> = (0..30).map(|m| bar(m, 100.0)).collect();
        bars[15] = bar(15, 1000.0);
        let mut frame = Frame::from_bars(&bars);
        let report = check_quality(&mut frame, "EURUSD");
        assert_eq!(frame.len(), 30);
        // One outlier in each of open/high/low/close.
        assert_eq!(report.count(AnomalyType::OutlierPrice), 4);
    }

    #[test]
    fn constant_series_has_no_outliers() {
        assert_eq!(count_outliers(&[5.0; 20]), 0);
        assert_eq!(count_outliers(&[5.0]), 0);
    }
}
