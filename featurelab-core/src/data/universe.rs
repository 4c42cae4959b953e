//! Symbol universe: the ordered list of symbols a run processes.
//!
//! Stored as plain text, one symbol per line. Blank lines and `#` comments
//! are ignored, surrounding whitespace is trimmed, and repeated symbols keep
//! their first position.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("failed to read universe file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write universe file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The default multi-asset groups, in output order.
pub const CORE_GROUPS: &[(&str, &[&str])] = &[
    (
        "forex",
        &[
            "EURUSD", "GBPUSD", "USDJPY", "NZDUSD", "USDCAD", "AUDUSD", "USDCHF", "USDCNH",
            "USDHKD", "USDMXN", "USDNOK", "USDPLN", "USDSEK", "USDSGD", "USDTRY", "USDZAR",
            "USDINR", "USDBRL", "USDCLP", "USDCOP", "USDIDR", "USDKRW", "USDTWD", "USDTHB",
            "USDHUF", "USDCZK", "USDDKK",
        ],
    ),
    (
        "indices",
        &[
            "DJ30", "SP500", "NAS100", "US2000", "VIX", "EU50", "FRA40", "UK100", "GER40",
            "ES35", "Nikkei225", "CHINA50", "HK50", "JPN225ft", "HKTECH", "DJ30ft", "NAS100ft",
            "SP500ft", "CHINA50ft", "FRA40ft", "GER40ft", "UK100ft", "HK50ft",
        ],
    ),
    (
        "commodities",
        &[
            "XAGUSD", "XAUUSD", "XPDUSD", "XPTUSD", "COPPER-C", "CL-OIL", "GAS-C", "NG-C",
            "GASOIL-C", "USOUSD", "UKOUSD", "UKOUSDft", "Soybean-C", "Wheat-C", "Cocoa-C",
            "Coffee-C", "Cotton-C", "OJ-C", "Sugar-C",
        ],
    ),
    (
        "crypto",
        &[
            "BTCUSD", "ETHUSD", "LTCUSD", "XRPUSD", "BCHUSD", "EOSUSD", "XLMUSD", "BTCBCH",
            "BTCETH", "ADAUSD", "DOGUSD", "DOTUSD", "LNKUSD", "SOLUSD", "UNIUSD", "ALGUSD",
            "AVAUSD", "BATUSD", "FILUSD", "IOTUSD", "GRTUSD", "MKRUSD", "NEOUSD", "SHBUSD",
            "TRXUSD", "ZECUSD", "ATMUSD", "AXSUSD", "BNBUSD", "CRVUSD", "ETCUSD", "INCUSD",
            "LRCUSD", "NERUSD", "ONEUSD", "SANUSD", "SUSUSD", "XTZUSD",
        ],
    ),
    (
        "stocks",
        &[
            "AAPL", "AMAZON", "BOEING", "CISCO", "EXXON", "GOOG", "IBM", "INTEL", "MSFT",
            "NVIDIA", "ORCL", "PFIZER", "PG", "TSLA", "META", "SNOW", "COIN", "ALIBABA", "BAIDU",
            "TOYOTA", "TSM", "VISA", "SHELL",
        ],
    ),
    (
        "bonds",
        &["LongGilt", "USNote10Y", "EURIBOR3M", "EUB10Y", "EUB5Y", "EUB2Y", "EUB30Y"],
    ),
    ("misc", &["USDX", "LOGC", "SGP20", "FI", "COR"]),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Universe {
    symbols: Vec<String>,
}

impl Universe {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let symbols = symbols
            .into_iter()
            .map(Into::into)
            .filter(|s| seen.insert(s.clone()))
            .collect();
        Self { symbols }
    }

    /// Parse a symbols file body.
    pub fn from_text(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(|line| line.split('#').next().unwrap_or("").trim())
                .filter(|line| !line.is_empty()),
        )
    }

    pub fn from_file(path: &Path) -> Result<Self, UniverseError> {
        let text = std::fs::read_to_string(path).map_err(|source| UniverseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_text(&text))
    }

    /// The default multi-asset universe.
    pub fn core() -> Self {
        Self::new(
            CORE_GROUPS
                .iter()
                .flat_map(|(_, symbols)| symbols.iter().copied()),
        )
    }

    /// Symbols of one core group, e.g. `"forex"`.
    pub fn core_group(name: &str) -> Option<Self> {
        CORE_GROUPS
            .iter()
            .find(|(group, _)| *group == name)
            .map(|(_, symbols)| Self::new(symbols.iter().copied()))
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for symbol in &self.symbols {
            out.push_str(symbol);
            out.push('\n');
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<(), UniverseError> {
        std::fs::write(path, self.to_text()).map_err(|source| UniverseError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_universe_covers_every_group() {
        let u = Universe::core();
        for (group, symbols) in CORE_GROUPS {
            for symbol in *symbols {
                assert!(u.contains(symbol), "{symbol} from {group} missing");
            }
        }
        assert_eq!(u.symbols()[0], "EURUSD");
        assert_eq!(u.symbols().last().map(String::as_str), Some("COR"));
    }

    #[test]
    fn core_universe_has_no_duplicates() {
        let u = Universe::core();
        let unique: HashSet<_> = u.symbols().iter().collect();
        assert_eq!(unique.len(), u.len());
    }

    #[test]
    fn text_parsing_trims_comments_and_duplicates() {
        let u = Universe::from_text("# majors\n EURUSD \n\nGBPUSD # cable\nEURUSD\n");
        assert_eq!(u.symbols(), &["EURUSD", "GBPUSD"]);
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.txt");
        let u = Universe::core_group("bonds").unwrap();
        u.write_to(&path).unwrap();
        assert_eq!(Universe::from_file(&path).unwrap(), u);
        assert_eq!(u.len(), 7);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Universe::from_file(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, UniverseError::Read { .. }));
    }

    #[test]
    fn unknown_group_is_none() {
        assert!(Universe::core_group("equities").is_none());
    }
}
