//! テスト用の TimerFacility / SignalRegistry
//!
//! 時間は進まない。`FakeTimerFacility::expire` を呼んだ時点で装填中のタイマーが満了したものとして、
//! `FakeSignalRegistry` 経由でシグナルブリッジへ配送する。失敗の注入もできる。

use crate::bridge::{self, Association, Dispatch};
use crate::domain::{ClockKind, OsItimerspec, OsTimespec};
use crate::ports::outbound::{SignalRegistry, TimerFacility, TimerHandle};
use std::collections::BTreeMap;
use std::io;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard};

fn injected(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected {} failure", what))
}

/// 注入する失敗
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Failures {
    pub create: bool,
    pub set_interval: bool,
    pub remaining: bool,
    pub delete: bool,
}

#[derive(Debug)]
struct FakeTimer {
    clock: ClockKind,
    signal: i32,
    association: usize,
    armed: OsItimerspec,
}

#[derive(Debug, Default)]
struct FakeTimers {
    next_id: usize,
    timers: BTreeMap<usize, FakeTimer>,
    failures: Failures,
    remaining_override: Option<OsTimespec>,
    set_interval_calls: usize,
    deleted: usize,
}

/// メモリ上の TimerFacility
#[derive(Debug, Default)]
pub struct FakeTimerFacility {
    state: Mutex<FakeTimers>,
}

impl FakeTimerFacility {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeTimers> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_failures(&self, failures: Failures) {
        self.lock().failures = failures;
    }

    /// `remaining` が返す値を差し替える（None で装填値に戻す）
    pub fn set_remaining(&self, remaining: Option<OsTimespec>) {
        self.lock().remaining_override = remaining;
    }

    /// 削除されていないタイマーの数
    pub fn live_timers(&self) -> usize {
        self.lock().timers.len()
    }

    pub fn deleted(&self) -> usize {
        self.lock().deleted
    }

    pub fn set_interval_calls(&self) -> usize {
        self.lock().set_interval_calls
    }

    /// 最後に作られたタイマーの現在の設定値
    pub fn armed(&self) -> Option<OsItimerspec> {
        self.lock().timers.values().next_back().map(|t| t.armed)
    }

    /// 最後に作られたタイマーのクロック
    pub fn clock(&self) -> Option<ClockKind> {
        self.lock().timers.values().next_back().map(|t| t.clock)
    }

    /// 装填中のタイマーをすべて満了させ、シグナルを配送する
    ///
    /// 繰り返しタイマーは周期で再装填、単発タイマーは停止する。
    pub fn expire(&self, registry: &FakeSignalRegistry) -> Vec<Dispatch> {
        let due: Vec<(i32, usize)> = {
            let mut state = self.lock();
            state
                .timers
                .values_mut()
                .filter(|t| !t.armed.is_disarmed())
                .map(|t| {
                    t.armed = if t.armed.interval.is_zero() {
                        OsItimerspec::DISARMED
                    } else {
                        OsItimerspec {
                            value: t.armed.interval,
                            interval: t.armed.interval,
                        }
                    };
                    (t.signal, t.association)
                })
                .collect()
        };
        due.into_iter()
            .map(|(signal, association)| registry.deliver(signal, association as *const Association))
            .collect()
    }
}

impl TimerFacility for FakeTimerFacility {
    fn create(
        &self,
        clock: ClockKind,
        signal: i32,
        association: NonNull<Association>,
    ) -> io::Result<TimerHandle> {
        let mut state = self.lock();
        if state.failures.create {
            return Err(injected("create"));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.timers.insert(
            id,
            FakeTimer {
                clock,
                signal,
                association: association.as_ptr() as usize,
                armed: OsItimerspec::DISARMED,
            },
        );
        Ok(TimerHandle::from_raw(id))
    }

    fn set_interval(&self, handle: &TimerHandle, spec: &OsItimerspec) -> io::Result<()> {
        let mut state = self.lock();
        state.set_interval_calls += 1;
        if state.failures.set_interval {
            return Err(injected("set_interval"));
        }
        let timer = state
            .timers
            .get_mut(&handle.as_raw())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        timer.armed = *spec;
        Ok(())
    }

    fn remaining(&self, handle: &TimerHandle) -> io::Result<OsTimespec> {
        let state = self.lock();
        if state.failures.remaining {
            return Err(injected("remaining"));
        }
        let timer = state
            .timers
            .get(&handle.as_raw())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        Ok(state.remaining_override.unwrap_or(timer.armed.value))
    }

    fn delete(&self, handle: TimerHandle) -> io::Result<()> {
        let mut state = self.lock();
        if state.failures.delete {
            return Err(injected("delete"));
        }
        state
            .timers
            .remove(&handle.as_raw())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        state.deleted += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeSignals {
    users: BTreeMap<i32, usize>,
    live: BTreeMap<i32, usize>,
    fail_install: bool,
    fail_restore: bool,
    installs: usize,
    restores: usize,
}

/// メモリ上の SignalRegistry（プロセスのシグナル処理には触れない）
#[derive(Debug, Default)]
pub struct FakeSignalRegistry {
    state: Mutex<FakeSignals>,
}

impl FakeSignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeSignals> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_fail_install(&self, fail: bool) {
        self.lock().fail_install = fail;
    }

    pub fn set_fail_restore(&self, fail: bool) {
        self.lock().fail_restore = fail;
    }

    pub fn users(&self, signal: i32) -> usize {
        self.lock().users.get(&signal).copied().unwrap_or(0)
    }

    pub fn is_bound(&self, signal: i32) -> bool {
        self.lock().live.contains_key(&signal)
    }

    /// ハンドラを実際に登録した回数（参照カウント 0 → 1）
    pub fn installs(&self) -> usize {
        self.lock().installs
    }

    /// 以前の処理へ戻した回数（参照カウント 1 → 0）
    pub fn restores(&self) -> usize {
        self.lock().restores
    }

    /// シグナルブリッジへ 1 件配送する
    pub fn deliver(&self, signal: i32, delivered: *const Association) -> Dispatch {
        let live = self.lock().live.get(&signal).copied().unwrap_or(0) as *const Association;
        // bind された関連付けは、所有する Timer が解放前に unbind する
        unsafe { bridge::dispatch(signal, delivered, live) }
    }
}

impl SignalRegistry for FakeSignalRegistry {
    fn install(&self, signal: i32) -> io::Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.fail_install {
            return Err(injected("install"));
        }
        let users = state.users.entry(signal).or_insert(0);
        *users += 1;
        if *users == 1 {
            state.installs += 1;
        }
        Ok(())
    }

    fn restore(&self, signal: i32) -> io::Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.fail_restore {
            return Err(injected("restore"));
        }
        let remaining = match state.users.get_mut(&signal) {
            Some(users) => {
                *users -= 1;
                *users
            }
            None => return Ok(()),
        };
        if remaining == 0 {
            state.users.remove(&signal);
            state.restores += 1;
        }
        Ok(())
    }

    fn bind(&self, signal: i32, association: NonNull<Association>) {
        self.lock()
            .live
            .insert(signal, association.as_ptr() as usize);
    }

    fn unbind(&self, signal: i32, association: NonNull<Association>) {
        let mut state = self.lock();
        if state.live.get(&signal) == Some(&(association.as_ptr() as usize)) {
            state.live.remove(&signal);
        }
    }
}
