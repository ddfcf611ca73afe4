//! タイマー設定
//!
//! `TimerOptions` は構築パラメータ（JSON からも読める）で、検証を通ると不変の `TimerConfig` になる。

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// タイマーが参照するクロック
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    /// CLOCK_MONOTONIC（壁時計の変更に影響されない）
    #[default]
    Monotonic,
    /// CLOCK_REALTIME
    Realtime,
}

impl ClockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockKind::Monotonic => "monotonic",
            ClockKind::Realtime => "realtime",
        }
    }
}

impl FromStr for ClockKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monotonic" => Ok(ClockKind::Monotonic),
            "realtime" => Ok(ClockKind::Realtime),
            other => Err(ConfigError::InvalidClock(other.to_string())),
        }
    }
}

/// 既定のシグナル番号（プラットフォームの最大リアルタイムシグナル）
#[cfg(target_os = "linux")]
pub fn default_signal() -> i32 {
    libc::SIGRTMAX()
}

#[cfg(not(target_os = "linux"))]
pub fn default_signal() -> i32 {
    libc::SIGUSR2
}

/// 指定可能なシグナル番号の上限
#[cfg(target_os = "linux")]
pub fn max_signal() -> i32 {
    libc::SIGRTMAX()
}

#[cfg(not(target_os = "linux"))]
pub fn max_signal() -> i32 {
    31
}

/// 設定の検証・読み込みエラー
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("signal number {0} is out of range (1..={max})", max = max_signal())]
    InvalidSignal(i32),
    #[error("signal number {0} cannot be caught")]
    ReservedSignal(i32),
    #[error("period {seconds}s + {nanoseconds}ns does not fit the OS time representation")]
    PeriodOutOfRange { seconds: u64, nanoseconds: u64 },
    #[error("unknown clock: {0} (expected monotonic or realtime)")]
    InvalidClock(String),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid timer options: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 構築パラメータ
///
/// `period_seconds` のみ必須。ナノ秒が 1e9 以上なら秒へ繰り上げて正規化する。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimerOptions {
    pub period_seconds: u64,
    #[serde(default)]
    pub period_nanoseconds: u64,
    #[serde(default)]
    pub single_shot: bool,
    /// 未指定なら `default_signal()`
    #[serde(default)]
    pub signal_number: Option<i32>,
    #[serde(default)]
    pub clock: ClockKind,
}

impl TimerOptions {
    pub fn new(period_seconds: u64) -> Self {
        Self {
            period_seconds,
            period_nanoseconds: 0,
            single_shot: false,
            signal_number: None,
            clock: ClockKind::default(),
        }
    }

    pub fn nanoseconds(mut self, nanos: u64) -> Self {
        self.period_nanoseconds = nanos;
        self
    }

    pub fn single_shot(mut self, single_shot: bool) -> Self {
        self.single_shot = single_shot;
        self
    }

    pub fn signal(mut self, signal: i32) -> Self {
        self.signal_number = Some(signal);
        self
    }

    pub fn clock(mut self, clock: ClockKind) -> Self {
        self.clock = clock;
        self
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// 検証して不変の設定にする
    pub fn validate(&self) -> Result<TimerConfig, ConfigError> {
        let out_of_range = || ConfigError::PeriodOutOfRange {
            seconds: self.period_seconds,
            nanoseconds: self.period_nanoseconds,
        };
        let secs = self
            .period_seconds
            .checked_add(self.period_nanoseconds / NANOS_PER_SEC)
            .ok_or_else(out_of_range)?;
        if secs > i64::MAX as u64 {
            return Err(out_of_range());
        }
        let period = Duration::new(secs, (self.period_nanoseconds % NANOS_PER_SEC) as u32);

        let signal = self.signal_number.unwrap_or_else(default_signal);
        if signal < 1 || signal > max_signal() {
            return Err(ConfigError::InvalidSignal(signal));
        }
        if signal == libc::SIGKILL || signal == libc::SIGSTOP {
            return Err(ConfigError::ReservedSignal(signal));
        }

        Ok(TimerConfig {
            period,
            single_shot: self.single_shot,
            signal,
            clock: self.clock,
        })
    }
}

/// 検証済みの不変設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    period: Duration,
    single_shot: bool,
    signal: i32,
    clock: ClockKind,
}

impl TimerConfig {
    /// 周期だけ指定し、残りは既定値で作る
    pub fn new(period: Duration) -> Result<Self, ConfigError> {
        TimerOptions::new(period.as_secs())
            .nanoseconds(u64::from(period.subsec_nanos()))
            .validate()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_single_shot(&self) -> bool {
        self.single_shot
    }

    pub fn signal(&self) -> i32 {
        self.signal
    }

    pub fn clock(&self) -> ClockKind {
        self.clock
    }

    /// 1 回満了したら終わるタイマーか。
    /// 周期 0 は繰り返し指定でも OS 上は再装填されないので単発として扱う。
    pub fn fires_once(&self) -> bool {
        self.single_shot || self.period.is_zero()
    }
}

impl TryFrom<TimerOptions> for TimerConfig {
    type Error = ConfigError;

    fn try_from(options: TimerOptions) -> Result<Self, Self::Error> {
        options.validate()
    }
}
