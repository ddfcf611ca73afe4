//! アダプター（OS タイマー・シグナル処理の実装）
//!
//! `Timer` はポートの trait 経由でのみ OS に触れる。Linux では POSIX 実装、
//! テストでは fake を注入する。

pub mod fake;

#[cfg(target_os = "linux")]
pub mod posix_signal;
#[cfg(target_os = "linux")]
pub mod posix_timer;

pub use fake::{FakeSignalRegistry, FakeTimerFacility, Failures};

#[cfg(target_os = "linux")]
pub use posix_signal::PosixSignalRegistry;
#[cfg(target_os = "linux")]
pub use posix_timer::PosixTimerFacility;
