//! Property tests for feature expansion, frame row operations, quality checks
//! and the rolling primitives.
//!
//! Uses proptest to verify:
//! 1. Expansion size — a schema expands to the product of its domain sizes
//! 2. Output names — never collide, even for repeated candidate values
//! 3. Incremental filter — only rows strictly after the watermark survive
//! 4. Quality check — output timestamps are strictly increasing and unique
//! 5. Rolling mean — agrees with a direct window average

use chrono::{DateTime, Duration, TimeZone, Utc};
use featurelab_core::data::check_quality;
use featurelab_core::domain::{Bar, Frame};
use featurelab_core::features::{expand, math, FeatureConfig, FeatureRegistry};
use proptest::prelude::*;
use std::collections::HashSet;

// ── Strategies (proptest) ────────────────────────────────────────────

fn ts(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 0, 0, 0).unwrap() + Duration::minutes(minute)
}

/// Distinct candidate values.
fn arb_domain() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::hash_set(1u32..100, 1..5).prop_map(|set| set.into_iter().collect())
}

/// Minute offsets, unsorted and possibly repeated.
fn arb_minutes() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..200, 0..80)
}

fn arb_closes() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..500.0_f64, 0..120)
}

fn frame_at(minutes: &[i64]) -> Frame {
    let bars: Vec<Bar> = minutes
        .iter()
        .enumerate()
        .map(|(i, &m)| Bar {
            timestamp: ts(m),
            open: 100.0 + i as f64,
            high: 101.0 + i as f64,
            low: 99.0 + i as f64,
            close: 100.5 + i as f64,
            tick_volume: 10,
            spread: 0.0,
        })
        .collect();
    Frame::from_bars(&bars)
}

// ── 1 & 2. Expansion ────────────────────────────────────────────────

proptest! {
    #[test]
    fn expansion_is_cartesian_product(fast in arb_domain(), slow in arb_domain(), signal in arb_domain()) {
        let json = format!(
            r#"{{"symbol_specific": {{"Momentum_Indicators": {{"MACD": {{
                "fast": {fast:?}, "slow": {slow:?}, "signal": {signal:?},
                "description": "ignored"
            }}}}}}}}"#
        );
        let config = FeatureConfig::from_json(&json).unwrap();
        let spec = FeatureRegistry::builtin().get("MACD").unwrap();
        let instances = expand(spec, &config);
        prop_assert_eq!(instances.len(), fast.len() * slow.len() * signal.len());
        for instance in &instances {
            prop_assert!(!instance.params.contains_key("description"));
        }
    }

    #[test]
    fn distinct_combinations_have_distinct_names(lengths in prop::collection::hash_set(1u32..500, 1..10)) {
        let lengths: Vec<u32> = lengths.into_iter().collect();
        let json = format!(
            r#"{{"symbol_specific": {{"Moving_Averages": {{"SMA": {{"length": {lengths:?}}}}}}}}}"#
        );
        let config = FeatureConfig::from_json(&json).unwrap();
        let spec = FeatureRegistry::builtin().get("SMA").unwrap();
        let names: HashSet<String> = expand(spec, &config)
            .into_iter()
            .map(|i| i.output_name)
            .collect();
        prop_assert_eq!(names.len(), lengths.len());
    }

    #[test]
    fn repeated_candidates_never_share_a_name(lengths in prop::collection::vec(1u32..20, 1..12)) {
        let json = format!(
            r#"{{"symbol_specific": {{"Moving_Averages": {{"SMA": {{"length": {lengths:?}}}}}}}}}"#
        );
        let config = FeatureConfig::from_json(&json).unwrap();
        let spec = FeatureRegistry::builtin().get("SMA").unwrap();
        let instances = expand(spec, &config);
        let names: HashSet<&str> = instances.iter().map(|i| i.output_name.as_str()).collect();
        let distinct: HashSet<u32> = lengths.iter().copied().collect();
        prop_assert_eq!(names.len(), instances.len());
        prop_assert_eq!(instances.len(), distinct.len());
    }
}

// ── 3. Incremental filter ────────────────────────────────────────────

proptest! {
    #[test]
    fn retain_after_keeps_only_newer_rows(mut minutes in arb_minutes(), watermark in 0i64..200) {
        minutes.sort_unstable();
        minutes.dedup();
        let mut frame = frame_at(&minutes);
        frame.retain_after(ts(watermark));
        let expected = minutes.iter().filter(|&&m| m > watermark).count();
        prop_assert_eq!(frame.len(), expected);
        prop_assert!(frame.timestamps().iter().all(|t| *t > ts(watermark)));
        prop_assert_eq!(frame.column("close").map(<[f64]>::len), Some(expected));
    }
}

// ── 4. Quality check ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn quality_check_yields_unique_increasing_timestamps(minutes in arb_minutes()) {
        let mut frame = frame_at(&minutes);
        let report = check_quality(&mut frame, "PROP");
        let unique: HashSet<i64> = minutes.iter().copied().collect();
        prop_assert_eq!(frame.len(), unique.len());
        prop_assert_eq!(report.duplicates_removed(), minutes.len() - unique.len());
        prop_assert!(frame.timestamps().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn quality_check_keeps_first_occurrence(minutes in arb_minutes()) {
        let mut frame = frame_at(&minutes);
        check_quality(&mut frame, "PROP");
        let opens = frame.column("open").unwrap();
        for (row, t) in frame.timestamps().iter().enumerate() {
            let first = minutes.iter().position(|&m| ts(m) == *t).unwrap();
            prop_assert_eq!(opens[row], 100.0 + first as f64);
        }
    }
}

// ── 5. Rolling primitives ────────────────────────────────────────────

proptest! {
    #[test]
    fn rolling_mean_matches_direct_average(closes in arb_closes(), window in 1usize..30) {
        let rolled = math::rolling_mean(&closes, window);
        prop_assert_eq!(rolled.len(), closes.len());
        for (i, value) in rolled.iter().enumerate() {
            if i + 1 < window {
                prop_assert!(value.is_nan());
            } else {
                let w = &closes[i + 1 - window..=i];
                let direct = w.iter().sum::<f64>() / window as f64;
                prop_assert!((value - direct).abs() < 1e-9);
            }
        }
    }
}
