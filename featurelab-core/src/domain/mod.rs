//! Domain types: minute bars, columnar frames, symbol identity.

pub mod bar;
pub mod frame;
pub mod time;

pub use bar::{Bar, SymbolInfo};
pub use frame::{Frame, FrameError, RAW_COLUMNS};
