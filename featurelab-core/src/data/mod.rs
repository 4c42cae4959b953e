//! Market data in and feature frames out: sources, quality checks, the
//! series store and the symbol universe.

pub mod csv_source;
pub mod quality;
pub mod session;
pub mod source;
pub mod store;
pub mod synthetic;
pub mod universe;
pub mod yahoo;

pub use csv_source::CsvSource;
pub use quality::{check_quality, AnomalyReport, AnomalyType, QualityReport, Severity};
pub use session::Session;
pub use source::{MarketDataSource, SourceError};
pub use store::{
    MemoryStore, ParquetSeriesStore, SeriesMeta, SeriesStore, StoreError, StoreHandle,
};
pub use synthetic::SyntheticSource;
pub use universe::{Universe, UniverseError, CORE_GROUPS};
pub use yahoo::YahooSource;
