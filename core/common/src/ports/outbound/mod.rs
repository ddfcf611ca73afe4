//! Outbound ポート: ライブラリが外界（ログ出力先）を使うための trait

pub mod log;

pub use log::{now_iso8601, Log, LogLevel, LogRecord};
