//! ドメイン型
//!
//! OS の構造体（timespec / itimerspec）を直接運ばず、意味のある型に包んで境界を明確にする。

pub mod config;
pub mod interval;
pub mod state;

pub use config::{default_signal, ClockKind, ConfigError, TimerConfig, TimerOptions};
pub use interval::{IntervalSpec, OsItimerspec, OsTimespec, TransferError, MIN_EXPIRY};
pub use state::LifecycleState;
