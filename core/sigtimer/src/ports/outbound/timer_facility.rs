//! OS タイマー機構 Outbound ポート
//!
//! create / set_interval / remaining / delete を抽象化する。Linux 実装は
//! `adapter::PosixTimerFacility`（timer_create 系）、テスト用は `adapter::fake::FakeTimerFacility`。

use crate::bridge::Association;
use crate::domain::{ClockKind, OsItimerspec, OsTimespec};
use std::io;
use std::ptr::NonNull;

/// OS タイマー資源の不透明な識別子
///
/// 1 つの `Timer` だけが所有する。複製できず、`TimerFacility::delete` で消費される。
#[derive(Debug, PartialEq, Eq)]
pub struct TimerHandle(usize);

impl TimerHandle {
    pub fn from_raw(raw: usize) -> Self {
        TimerHandle(raw)
    }

    pub fn as_raw(&self) -> usize {
        self.0
    }
}

/// OS タイマー機構の抽象（Outbound ポート）
pub trait TimerFacility: Send + Sync {
    /// 満了時に `signal` を送るタイマーを作る。`association` は通知値として OS に預ける。
    fn create(
        &self,
        clock: ClockKind,
        signal: i32,
        association: NonNull<Association>,
    ) -> io::Result<TimerHandle>;

    /// 設定値を書き込む（`OsItimerspec::DISARMED` で停止）
    fn set_interval(&self, handle: &TimerHandle, spec: &OsItimerspec) -> io::Result<()>;

    /// 次の満了までの残り時間（OS 表現のまま返す）
    fn remaining(&self, handle: &TimerHandle) -> io::Result<OsTimespec>;

    fn delete(&self, handle: TimerHandle) -> io::Result<()>;
}
