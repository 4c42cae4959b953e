//! Registry of feature kinds.
//!
//! A static table maps each configuration key (`"SMA"`, `"MACD"`, ...) to a
//! [`FeatureSpec`]: its category, declared lookback, built-in default
//! parameters and the constructor that turns a concrete [`ParamSet`] into a
//! runnable feature. The registry is immutable after construction.

use super::params::{ParamSet, ParamValue};
use super::universal::{self, UniversalFeature};
use super::{momentum, moving_averages, transforms, volatility, volume};
use super::{Feature, FeatureError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which input a feature kind consumes: one symbol's frame, or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SymbolSpecific,
    Universal,
}

impl Category {
    /// The key of this category's section in the feature configuration.
    pub fn config_key(self) -> &'static str {
        match self {
            Category::SymbolSpecific => "symbol_specific",
            Category::Universal => "universal",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

pub type SymbolConstructor = fn(&ParamSet) -> Result<Box<dyn Feature>, FeatureError>;
pub type UniversalConstructor = fn(&ParamSet) -> Result<Box<dyn UniversalFeature>, FeatureError>;

/// Builds a feature from a concrete parameter assignment. The variant fixes
/// the category.
#[derive(Clone, Copy)]
pub enum Constructor {
    Symbol(SymbolConstructor),
    Universal(UniversalConstructor),
}

/// Static description of one feature kind.
pub struct FeatureSpec {
    /// Configuration key.
    pub kind: &'static str,
    /// Prefix of every output name.
    pub label: &'static str,
    /// Configuration group the kind is conventionally declared under.
    pub group: &'static str,
    /// Bars of history the kind needs; `None` for cumulative or stateless kinds.
    pub lookback: Option<usize>,
    pub defaults: &'static [(&'static str, i64)],
    pub constructor: Constructor,
}

impl FeatureSpec {
    pub fn category(&self) -> Category {
        match self.constructor {
            Constructor::Symbol(_) => Category::SymbolSpecific,
            Constructor::Universal(_) => Category::Universal,
        }
    }

    /// The built-in parameter assignment used when the configuration gives
    /// no schema for this kind.
    pub fn default_params(&self) -> ParamSet {
        self.defaults
            .iter()
            .map(|(name, value)| (name.to_string(), ParamValue::Int(*value)))
            .collect()
    }
}

impl fmt::Debug for FeatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureSpec")
            .field("kind", &self.kind)
            .field("category", &self.category())
            .field("lookback", &self.lookback)
            .field("defaults", &self.defaults)
            .finish()
    }
}

const fn symbol(
    group: &'static str,
    kind: &'static str,
    label: &'static str,
    lookback: Option<usize>,
    defaults: &'static [(&'static str, i64)],
    build: SymbolConstructor,
) -> FeatureSpec {
    FeatureSpec {
        kind,
        label,
        group,
        lookback,
        defaults,
        constructor: Constructor::Symbol(build),
    }
}

const fn universal(
    group: &'static str,
    kind: &'static str,
    lookback: Option<usize>,
    defaults: &'static [(&'static str, i64)],
    build: UniversalConstructor,
) -> FeatureSpec {
    FeatureSpec {
        kind,
        label: kind,
        group,
        lookback,
        defaults,
        constructor: Constructor::Universal(build),
    }
}

const MA: &str = "Moving_Averages";
const MOMENTUM: &str = "Momentum_Indicators";
const VOLATILITY: &str = "Volatility_Indicators";
const VOLUME: &str = "Volume_Indicators";
const TRANSFORMS: &str = "Price_Transformations";
const CROSS: &str = "Cross_Symbol";

static BUILTIN: &[FeatureSpec] = &[
    symbol(MA, "SMA", "SMA", Some(200), &[("length", 20)], moving_averages::build_sma),
    symbol(MA, "EMA", "EMA", Some(200), &[("length", 20)], moving_averages::build_ema),
    symbol(MA, "WMA", "WMA", Some(200), &[("length", 20)], moving_averages::build_wma),
    symbol(MA, "HMA", "HMA", Some(200), &[("length", 20)], moving_averages::build_hma),
    symbol(MA, "VWAP", "VWAP", None, &[], moving_averages::build_vwap),
    symbol(MOMENTUM, "RSI", "RSI", Some(100), &[("length", 14)], momentum::build_rsi),
    symbol(
        MOMENTUM,
        "MACD",
        "MACD",
        Some(100),
        &[("fast", 12), ("slow", 26), ("signal", 9)],
        momentum::build_macd,
    ),
    symbol(MOMENTUM, "STOCH", "STOCH", Some(50), &[("k", 14), ("d", 3)], momentum::build_stoch),
    symbol(
        VOLATILITY,
        "BBANDS",
        "BBANDS",
        Some(100),
        &[("length", 20), ("std", 2)],
        volatility::build_bbands,
    ),
    symbol(VOLATILITY, "ATR", "ATR", Some(100), &[("length", 14)], volatility::build_atr),
    symbol(
        VOLATILITY,
        "Volatility",
        "Volatility",
        Some(100),
        &[("window", 20)],
        volatility::build_volatility,
    ),
    symbol(VOLUME, "OBV", "OBV", None, &[], volume::build_obv),
    symbol(VOLUME, "CMF", "CMF", Some(100), &[("length", 20)], volume::build_cmf),
    symbol(TRANSFORMS, "LogReturns", "Log_Returns", None, &[], transforms::build_log_returns),
    symbol(
        TRANSFORMS,
        "PctChange",
        "Pct_Change",
        Some(60),
        &[("periods", 1)],
        transforms::build_pct_change,
    ),
    symbol(TRANSFORMS, "ZScore", "Z_Score", Some(100), &[("window", 20)], transforms::build_zscore),
    universal(CROSS, "AverageCloseAllSymbols", None, &[], universal::build_average_close),
    universal(CROSS, "MedianVolumeAllSymbols", None, &[], universal::build_median_volume),
    universal(
        CROSS,
        "ClosePriceCorrelation",
        Some(60),
        &[("window", 60)],
        universal::build_close_correlation,
    ),
];

/// The set of feature kinds available to a run.
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    specs: Vec<&'static FeatureSpec>,
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FeatureRegistry {
    /// Every built-in kind, in table order.
    pub fn builtin() -> Self {
        Self {
            specs: BUILTIN.iter().collect(),
        }
    }

    /// A registry over an explicit set of specs.
    pub fn from_specs(specs: impl IntoIterator<Item = &'static FeatureSpec>) -> Self {
        Self {
            specs: specs.into_iter().collect(),
        }
    }

    pub fn specs(&self) -> &[&'static FeatureSpec] {
        &self.specs
    }

    pub fn get(&self, kind: &str) -> Option<&'static FeatureSpec> {
        self.specs.iter().copied().find(|s| s.kind == kind)
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &'static FeatureSpec> + '_ {
        self.specs
            .iter()
            .copied()
            .filter(move |s| s.category() == category)
    }

    /// Largest declared lookback over every registered kind of both
    /// categories. Kinds without a lookback count as 0.
    pub fn max_lookback(&self) -> usize {
        self.specs
            .iter()
            .map(|s| s.lookback.unwrap_or(0))
            .max()
            .unwrap_or(0)
    }
}
