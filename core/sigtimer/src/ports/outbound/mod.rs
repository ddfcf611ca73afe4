//! Outbound ポート: タイマーが外界（OS タイマー・シグナル処理・ログ）を使うための trait

pub mod signal_registry;
pub mod timer_facility;

pub use common::ports::outbound::{Log, LogLevel, LogRecord};
pub use signal_registry::SignalRegistry;
pub use timer_facility::{TimerFacility, TimerHandle};
