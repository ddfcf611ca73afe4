//! タイマー設定値（itimerspec 相当）と、OS 表現との相互変換
//!
//! OS 側は符号付き秒・ナノ秒で時間を運ぶため、`Duration` との変換は失敗しうる。
//! その失敗が「残り時間の受け渡し失敗」（`Critical::TimeTransfer`）になる。

use std::time::Duration;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// 0 を渡すと OS タイマーは停止扱いになるため、即時発火にはこの最小値を使う
pub const MIN_EXPIRY: Duration = Duration::from_nanos(1);

/// OS 表現の timespec（秒・ナノ秒とも符号付き）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OsTimespec {
    pub sec: i64,
    pub nsec: i64,
}

/// OS 表現の itimerspec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OsItimerspec {
    /// 次の満了までの時間（0 なら停止）
    pub value: OsTimespec,
    /// 繰り返し周期（0 なら単発）
    pub interval: OsTimespec,
}

/// 時間表現の変換失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("negative time value: {sec}s {nsec}ns")]
    Negative { sec: i64, nsec: i64 },
    #[error("nanoseconds out of range: {0}")]
    NanosOutOfRange(i64),
    #[error("seconds do not fit the OS representation: {0}")]
    SecondsOverflow(u64),
}

impl OsTimespec {
    pub const ZERO: OsTimespec = OsTimespec { sec: 0, nsec: 0 };

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    pub fn from_duration(d: Duration) -> Result<Self, TransferError> {
        let sec = i64::try_from(d.as_secs()).map_err(|_| TransferError::SecondsOverflow(d.as_secs()))?;
        Ok(Self {
            sec,
            nsec: i64::from(d.subsec_nanos()),
        })
    }

    pub fn to_duration(&self) -> Result<Duration, TransferError> {
        if self.sec < 0 || self.nsec < 0 {
            return Err(TransferError::Negative {
                sec: self.sec,
                nsec: self.nsec,
            });
        }
        if self.nsec >= NANOS_PER_SEC {
            return Err(TransferError::NanosOutOfRange(self.nsec));
        }
        Ok(Duration::new(self.sec as u64, self.nsec as u32))
    }
}

impl OsItimerspec {
    pub const DISARMED: OsItimerspec = OsItimerspec {
        value: OsTimespec::ZERO,
        interval: OsTimespec::ZERO,
    };

    pub fn is_disarmed(&self) -> bool {
        self.value.is_zero()
    }
}

/// ドメイン側の設定値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSpec {
    pub value: Duration,
    pub interval: Duration,
}

impl IntervalSpec {
    pub const DISARMED: IntervalSpec = IntervalSpec {
        value: Duration::ZERO,
        interval: Duration::ZERO,
    };

    /// `first` 後に満了し、`interval` が 0 でなければ以後その周期で繰り返す。
    /// `first` が 0 の場合は停止ではなく即時発火になるよう MIN_EXPIRY に繰り上げる。
    pub fn arm(first: Duration, interval: Duration) -> Self {
        let value = if first.is_zero() { MIN_EXPIRY } else { first };
        Self { value, interval }
    }

    pub fn to_os(&self) -> Result<OsItimerspec, TransferError> {
        Ok(OsItimerspec {
            value: OsTimespec::from_duration(self.value)?,
            interval: OsTimespec::from_duration(self.interval)?,
        })
    }
}
