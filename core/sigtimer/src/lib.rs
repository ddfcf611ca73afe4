//! sigtimer: 満了をシグナルで通知する POSIX インターバルタイマー
//!
//! 周期・単発・シグナル番号・クロックを指定して `Timer` を作り、満了ごとに
//! シグナル配送コンテキストでユーザーコールバックを呼ぶ。
//!
//! ```no_run
//! use sigtimer::{Timer, TimerOptions};
//!
//! let config = TimerOptions::new(1).validate().unwrap();
//! let mut timer = Timer::builder(config)
//!     .callback(|_| { /* アトミック操作のみ */ })
//!     .build()
//!     .unwrap();
//! timer.start().unwrap();
//! ```

pub mod adapter;
pub mod bridge;
pub mod domain;
pub mod error;
pub mod ports;
pub mod timer;

#[cfg(test)]
mod tests;

pub use bridge::{take_anomalies, Anomalies, Callback, Dispatch, UserData};
pub use domain::{ClockKind, ConfigError, LifecycleState, TimerConfig, TimerOptions};
pub use error::{
    is_warning, make_error, Critical, ErrorCategory, ErrorCode, TimerError, Warning,
};
pub use timer::{Timer, TimerBuilder};
