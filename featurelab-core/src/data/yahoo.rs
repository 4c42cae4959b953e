//! Yahoo Finance minute-bar source.
//!
//! Fetches 1-minute OHLCV bars from Yahoo's v8 chart API. Yahoo only serves
//! minute data for roughly the last 30 days and at most about a week per
//! request, so a fetch is clamped to that horizon and split into 7-day
//! windows. Yahoo has no spread, so it is reported as 0.

use super::session::Session;
use super::source::{MarketDataSource, SourceError};
use crate::domain::{Bar, SymbolInfo};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: String,
    long_name: Option<String>,
    short_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

/// Longest span Yahoo serves per 1-minute request.
const WINDOW_DAYS: i64 = 7;
/// How far back Yahoo keeps 1-minute data.
const HORIZON_DAYS: i64 = 29;

pub struct YahooSource {
    session: Arc<Session>,
}

impl YahooSource {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    fn chart_url(symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}\
             ?period1={}&period2={}&interval=1m",
            start.timestamp(),
            end.timestamp()
        )
    }

    /// Issue one chart request and decode the body.
    fn request(&self, symbol: &str, url: &str) -> Result<Option<ChartResponse>, SourceError> {
        let client = match self.session.client() {
            Some(client) => client,
            None => return Ok(None),
        };

        let resp = client.get(url).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                self.session.invalidate();
            }
            SourceError::NetworkUnreachable(e.to_string())
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(SourceError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        // Yahoo answers unknown symbols with 404 and a chart error body.
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::Other(format!("HTTP {status} for {symbol}")));
        }

        resp.json().map(Some).map_err(|e| {
            SourceError::ResponseFormatChanged(format!(
                "failed to parse response for {symbol}: {e}"
            ))
        })
    }
}

/// Unwrap the single chart result, mapping Yahoo's "Not Found" to
/// [`SourceError::SymbolNotFound`].
fn chart_data(symbol: &str, resp: ChartResponse) -> Result<ChartData, SourceError> {
    let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
        Some(err) if err.code == "Not Found" => SourceError::SymbolNotFound {
            symbol: symbol.to_string(),
        },
        Some(err) => {
            SourceError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
        }
        None => SourceError::ResponseFormatChanged("empty result with no error".into()),
    })?;

    result
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::ResponseFormatChanged("result array is empty".into()))
}

/// Convert chart data to bars within `[start, end]`, skipping rows where
/// every field is missing.
fn parse_bars(
    data: ChartData,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Bar>, SourceError> {
    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let timestamp = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
            SourceError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
        })?;
        if timestamp < start || timestamp > end {
            continue;
        }

        let open = quote.open.get(i).copied().flatten();
        let high = quote.high.get(i).copied().flatten();
        let low = quote.low.get(i).copied().flatten();
        let close = quote.close.get(i).copied().flatten();
        let volume = quote.volume.get(i).copied().flatten();
        if open.is_none() && high.is_none() && low.is_none() && close.is_none() && volume.is_none()
        {
            continue;
        }

        bars.push(Bar {
            timestamp,
            open: open.unwrap_or(f64::NAN),
            high: high.unwrap_or(f64::NAN),
            low: low.unwrap_or(f64::NAN),
            close: close.unwrap_or(f64::NAN),
            tick_volume: volume.unwrap_or(0),
            spread: 0.0,
        });
    }
    Ok(bars)
}

/// Split `[start, end]` into consecutive windows of at most `days` days.
fn windows(start: DateTime<Utc>, end: DateTime<Utc>, days: i64) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut out = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let stop = (cursor + Duration::days(days)).min(end);
        out.push((cursor, stop));
        if stop == end {
            break;
        }
        cursor = stop + Duration::seconds(1);
    }
    out
}

impl MarketDataSource for YahooSource {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, SourceError> {
        let url = format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}?range=1d&interval=1d"
        );
        let resp = self
            .request(symbol, &url)?
            .ok_or_else(|| SourceError::NetworkUnreachable("http session unavailable".into()))?;
        let meta = chart_data(symbol, resp)?.meta;
        let description = meta
            .long_name
            .or(meta.short_name)
            .unwrap_or_else(|| meta.symbol.clone());
        Ok(SymbolInfo::new(symbol, description))
    }

    fn fetch(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SourceError> {
        let horizon = Utc::now() - Duration::days(HORIZON_DAYS);
        let start = if start < horizon {
            debug!(symbol, requested = %start, clamped = %horizon, "start precedes minute-data horizon");
            horizon
        } else {
            start
        };
        if start > end {
            return Ok(Vec::new());
        }

        let mut bars = Vec::new();
        for (from, to) in windows(start, end, WINDOW_DAYS) {
            let url = Self::chart_url(symbol, from, to);
            let resp = match self.request(symbol, &url)? {
                Some(resp) => resp,
                None => {
                    warn!(symbol, "http session unavailable, returning no data");
                    return Ok(Vec::new());
                }
            };
            match chart_data(symbol, resp) {
                Ok(data) => bars.extend(parse_bars(data, from, to)?),
                Err(SourceError::SymbolNotFound { .. }) => {
                    warn!(symbol, "symbol not found at source");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            }
        }
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, d, h, m, 0).unwrap()
    }

    fn response(json: &str) -> ChartResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_minute_bars_and_skips_empty_rows() {
        let t0 = ts(2, 10, 0).timestamp();
        let json = format!(
            r#"{{"chart": {{"result": [{{
                "meta": {{"symbol": "EURUSD=X", "shortName": "EUR/USD"}},
                "timestamp": [{t0}, {}, {}],
                "indicators": {{"quote": [{{
                    "open": [1.1, null, 1.3],
                    "high": [1.2, null, 1.4],
                    "low": [1.0, null, 1.2],
                    "close": [1.15, null, 1.35],
                    "volume": [10, null, null]
                }}]}}
            }}], "error": null}}}}"#,
            t0 + 60,
            t0 + 120
        );
        let data = chart_data("EURUSD=X", response(&json)).unwrap();
        assert_eq!(data.meta.short_name.as_deref(), Some("EUR/USD"));
        let bars = parse_bars(data, ts(2, 0, 0), ts(3, 0, 0)).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, ts(2, 10, 0));
        assert_eq!(bars[0].tick_volume, 10);
        assert_eq!(bars[1].tick_volume, 0);
        assert_eq!(bars[1].spread, 0.0);
    }

    #[test]
    fn bars_outside_window_are_dropped() {
        let t0 = ts(2, 10, 0).timestamp();
        let json = format!(
            r#"{{"chart": {{"result": [{{
                "meta": {{"symbol": "X"}},
                "timestamp": [{t0}, {}],
                "indicators": {{"quote": [{{"open": [1.0, 2.0], "high": [1.0, 2.0],
                    "low": [1.0, 2.0], "close": [1.0, 2.0], "volume": [1, 1]}}]}}
            }}], "error": null}}}}"#,
            t0 + 60
        );
        let data = chart_data("X", response(&json)).unwrap();
        let bars = parse_bars(data, ts(2, 10, 1), ts(2, 11, 0)).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 2.0);
    }

    #[test]
    fn not_found_maps_to_symbol_not_found() {
        let resp = response(
            r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#,
        );
        assert!(matches!(
            chart_data("NOPE", resp),
            Err(SourceError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn windows_cover_range_without_overlap() {
        let start = ts(1, 0, 0);
        let end = ts(20, 0, 0);
        let w = windows(start, end, 7);
        assert_eq!(w.len(), 3);
        assert_eq!(w[0].0, start);
        assert_eq!(w.last().unwrap().1, end);
        for pair in w.windows(2) {
            assert!(pair[1].0 > pair[0].1);
        }
        assert_eq!(windows(start, start, 7), vec![(start, start)]);
    }
}
