//! タイマー本体（Controller）
//!
//! OS タイマー資源を所有し、ライフサイクル状態（Idle / Running / Suspended）を進め、
//! エラーを分類する。各操作には 2 つの形がある。
//! - `start` など: 致命的エラーのときだけ `Err(TimerError)`。警告はログに残して `Ok(())`
//! - `try_start` など: 警告も含めて `Err(ErrorCode)` で返す
//!
//! スレッドセーフではない。同じインスタンスへのライフサイクル操作は呼び出し側で直列化すること。
//! コールバックの制約は `bridge::Callback` を参照。

use crate::bridge::{Association, Callback, UserData};
use crate::domain::{IntervalSpec, LifecycleState, OsItimerspec, TimerConfig, TransferError};
use crate::error::{Critical, ErrorCode, TimerError, Warning};
use crate::ports::outbound::{
    Log, LogLevel, LogRecord, SignalRegistry, TimerFacility, TimerHandle,
};
use common::adapter::NoopLog;
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

const LAYER: &str = "timer";

/// 1 操作の結果: `Ok(None)` 反映済み / `Ok(Some(_))` 警告付きの no-op / `Err` 致命的エラー
type Step = Result<Option<Warning>, TimerError>;

fn to_code(step: Step) -> Result<(), ErrorCode> {
    match step {
        Ok(None) => Ok(()),
        Ok(Some(warning)) => Err(ErrorCode::Warning(warning)),
        Err(e) => Err(e.code()),
    }
}

#[cfg(target_os = "linux")]
fn default_ports() -> Result<(Arc<dyn TimerFacility>, Arc<dyn SignalRegistry>), TimerError> {
    use crate::adapter::{PosixSignalRegistry, PosixTimerFacility};
    Ok((Arc::new(PosixTimerFacility), Arc::new(PosixSignalRegistry)))
}

#[cfg(not(target_os = "linux"))]
fn default_ports() -> Result<(Arc<dyn TimerFacility>, Arc<dyn SignalRegistry>), TimerError> {
    Err(TimerError::os(
        Critical::TimerCreation,
        io::Error::from(io::ErrorKind::Unsupported),
    ))
}

/// `Timer` の組み立て
///
/// コールバック・ユーザーデータは構築後に変更できない。ポートを指定しなければ
/// Linux の POSIX 実装を使う。
pub struct TimerBuilder {
    config: TimerConfig,
    callback: Option<Callback>,
    user_data: UserData,
    facility: Option<Arc<dyn TimerFacility>>,
    registry: Option<Arc<dyn SignalRegistry>>,
    log: Arc<dyn Log>,
}

impl TimerBuilder {
    fn new(config: TimerConfig) -> Self {
        Self {
            config,
            callback: None,
            user_data: UserData::null(),
            facility: None,
            registry: None,
            log: Arc::new(NoopLog),
        }
    }

    /// 満了ごとにシグナル配送コンテキストで呼ばれるコールバック
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(UserData) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn user_data(mut self, user_data: UserData) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn facility(mut self, facility: Arc<dyn TimerFacility>) -> Self {
        self.facility = Some(facility);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn SignalRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn log(mut self, log: Arc<dyn Log>) -> Self {
        self.log = log;
        self
    }

    /// OS タイマーを作成する。状態は Idle から始まる。
    pub fn build(self) -> Result<Timer, TimerError> {
        let (facility, registry) = match (self.facility, self.registry) {
            (Some(facility), Some(registry)) => (facility, registry),
            (facility, registry) => {
                let (default_facility, default_registry) = default_ports()?;
                (
                    facility.unwrap_or(default_facility),
                    registry.unwrap_or(default_registry),
                )
            }
        };
        let config = self.config;

        let association = NonNull::from(Box::leak(Box::new(Association::new(
            config.signal(),
            config.fires_once(),
            self.callback,
            self.user_data,
        ))));

        let handle = match facility.create(config.clock(), config.signal(), association) {
            Ok(handle) => handle,
            Err(e) => {
                // SAFETY: 直前に Box から作ったポインタで、どこにも bind していない
                unsafe { drop(Box::from_raw(association.as_ptr())) };
                let _ = self.log.log(
                    &LogRecord::new(LogLevel::Error, Critical::TimerCreation.message())
                        .layer(LAYER)
                        .kind("error")
                        .field("code", Critical::TimerCreation.code())
                        .field("signal", config.signal())
                        .field("os_error", e.to_string()),
                );
                return Err(TimerError::os(Critical::TimerCreation, e));
            }
        };

        let timer = Timer {
            config,
            state: LifecycleState::Idle,
            handle: Some(handle),
            association,
            remaining: None,
            installed: false,
            facility,
            registry,
            log: self.log,
        };
        timer.record(
            LogRecord::new(LogLevel::Debug, "timer created")
                .kind("lifecycle")
                .field("period_ns", config.period().as_nanos() as u64)
                .field("single_shot", config.is_single_shot())
                .field("clock", config.clock().as_str()),
        );
        Ok(timer)
    }
}

/// シグナルで満了を通知するインターバルタイマー
///
/// OS タイマーを 1 つだけ所有する。複製はできない。破棄時に OS タイマーを止めて削除し、
/// シグナルの登録を解放する（失敗はログに残すだけで伝播しない）。
pub struct Timer {
    config: TimerConfig,
    state: LifecycleState,
    // Drop で delete に渡すときだけ None になる
    handle: Option<TimerHandle>,
    // Box::leak したもの。OS が通知値として持つので、Timer が移動してもアドレスは変わらない
    association: NonNull<Association>,
    // suspend 時に取得した残り時間
    remaining: Option<Duration>,
    installed: bool,
    facility: Arc<dyn TimerFacility>,
    registry: Arc<dyn SignalRegistry>,
    log: Arc<dyn Log>,
}

// 関連付けは Send + Sync な値だけを持ち、所有者はこの Timer だけ。
unsafe impl Send for Timer {}

impl Timer {
    pub fn builder(config: TimerConfig) -> TimerBuilder {
        TimerBuilder::new(config)
    }

    fn association(&self) -> &Association {
        // SAFETY: build で確保し、Drop まで解放しない
        unsafe { self.association.as_ref() }
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// 現在の状態
    ///
    /// 単発タイマーが満了していれば Idle を返す（確定は次のライフサイクル操作で行う）。
    pub fn state(&self) -> LifecycleState {
        if self.state == LifecycleState::Running && self.association().has_expired() {
            LifecycleState::Idle
        } else {
            self.state
        }
    }

    /// suspend で保存した残り時間（Suspended のときだけ Some）
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining
    }

    /// コールバックへ配送した満了回数
    pub fn expirations(&self) -> u64 {
        self.association().expirations()
    }

    pub fn start(&mut self) -> Result<(), TimerError> {
        self.start_step().map(|_| ())
    }

    pub fn stop(&mut self) -> Result<(), TimerError> {
        self.stop_step().map(|_| ())
    }

    pub fn suspend(&mut self) -> Result<(), TimerError> {
        self.suspend_step().map(|_| ())
    }

    pub fn resume(&mut self) -> Result<(), TimerError> {
        self.resume_step().map(|_| ())
    }

    pub fn reset(&mut self) -> Result<(), TimerError> {
        self.reset_step().map(|_| ())
    }

    pub fn try_start(&mut self) -> Result<(), ErrorCode> {
        to_code(self.start_step())
    }

    pub fn try_stop(&mut self) -> Result<(), ErrorCode> {
        to_code(self.stop_step())
    }

    pub fn try_suspend(&mut self) -> Result<(), ErrorCode> {
        to_code(self.suspend_step())
    }

    pub fn try_resume(&mut self) -> Result<(), ErrorCode> {
        to_code(self.resume_step())
    }

    pub fn try_reset(&mut self) -> Result<(), ErrorCode> {
        to_code(self.reset_step())
    }

    fn start_step(&mut self) -> Step {
        self.settle();
        if self.state != LifecycleState::Idle {
            return Ok(Some(self.warn(Warning::StartAlreadyStarted)));
        }
        self.arm(self.config.period(), "started")
    }

    fn stop_step(&mut self) -> Step {
        self.settle();
        if self.state == LifecycleState::Idle {
            return Ok(Some(self.warn(Warning::StopWhileNotRunning)));
        }
        self.disarm()?;
        self.unbind();
        let from = self.state;
        self.state = LifecycleState::Idle;
        self.remaining = None;
        self.transition(from, "stopped");
        Ok(None)
    }

    fn suspend_step(&mut self) -> Step {
        self.settle();
        if self.state != LifecycleState::Running {
            return Ok(Some(self.warn(Warning::SuspendWhileNotRunning)));
        }
        let raw = self
            .facility
            .remaining(self.handle()?)
            .map_err(|e| self.critical(Critical::TimerGettime, e))?;
        let remaining = raw.to_duration().map_err(|e| self.transfer_failed(e))?;
        self.disarm()?;
        self.unbind();

        if self.association().has_expired() {
            // 問い合わせから停止までの間に単発タイマーが満了した
            self.state = LifecycleState::Idle;
            self.transition(LifecycleState::Running, "expired");
            return Ok(None);
        }
        self.remaining = Some(remaining);
        self.state = LifecycleState::Suspended;
        self.record(
            LogRecord::new(LogLevel::Debug, "timer suspended")
                .kind("lifecycle")
                .field("from", LifecycleState::Running.as_str())
                .field("to", LifecycleState::Suspended.as_str())
                .field("remaining_ns", remaining.as_nanos() as u64),
        );
        Ok(None)
    }

    fn resume_step(&mut self) -> Step {
        self.settle();
        match self.state {
            LifecycleState::Running => Ok(Some(self.warn(Warning::ResumeAlreadyRunning))),
            LifecycleState::Idle => Ok(Some(self.warn(Warning::ResumeWhileNotSuspended))),
            LifecycleState::Suspended => {
                let first = self.remaining.unwrap_or(self.config.period());
                self.arm(first, "resumed")
            }
        }
    }

    fn reset_step(&mut self) -> Step {
        self.settle();
        self.arm(self.config.period(), "reset")
    }

    /// `first` 後に満了するよう装填して Running にする
    fn arm(&mut self, first: Duration, action: &str) -> Step {
        let interval = if self.config.fires_once() {
            Duration::ZERO
        } else {
            self.config.period()
        };
        let spec = IntervalSpec::arm(first, interval)
            .to_os()
            .map_err(|e| self.transfer_failed(e))?;
        self.ensure_installed()?;

        // 1 回目の配送が届く前に結び付けておく
        self.association().rearm();
        self.registry
            .bind(self.config.signal(), self.association);
        let result = self.facility.set_interval(self.handle()?, &spec);
        if let Err(e) = result {
            // Running 中の reset なら以前の装填が生きているので結び付けは残す
            if self.state != LifecycleState::Running {
                self.unbind();
            }
            return Err(self.critical(Critical::TimerSettime, e));
        }

        let from = self.state;
        self.state = LifecycleState::Running;
        self.remaining = None;
        self.transition(from, action);
        Ok(None)
    }

    fn disarm(&self) -> Result<(), TimerError> {
        self.facility
            .set_interval(self.handle()?, &OsItimerspec::DISARMED)
            .map_err(|e| self.critical(Critical::TimerSettime, e))
    }

    fn ensure_installed(&mut self) -> Result<(), TimerError> {
        if self.installed {
            return Ok(());
        }
        self.registry
            .install(self.config.signal())
            .map_err(|e| self.critical(Critical::SignalHandlerRegistration, e))?;
        self.installed = true;
        Ok(())
    }

    fn unbind(&self) {
        self.registry.unbind(self.config.signal(), self.association);
    }

    /// 単発タイマーの満了を状態へ反映する（ブリッジは状態を変えないため、ここで遅れて行う）
    fn settle(&mut self) {
        if self.state == LifecycleState::Running && self.association().has_expired() {
            self.unbind();
            self.state = LifecycleState::Idle;
            self.transition(LifecycleState::Running, "expired");
        }
    }

    fn handle(&self) -> Result<&TimerHandle, TimerError> {
        self.handle
            .as_ref()
            .ok_or_else(|| TimerError::new(Critical::Unknown))
    }

    fn record(&self, record: LogRecord) {
        let _ = self.log.log(
            &record
                .layer(LAYER)
                .field("signal", self.config.signal()),
        );
    }

    fn transition(&self, from: LifecycleState, action: &str) {
        self.record(
            LogRecord::new(LogLevel::Debug, format!("timer {}", action))
                .kind("lifecycle")
                .field("from", from.as_str())
                .field("to", self.state.as_str()),
        );
    }

    fn warn(&self, warning: Warning) -> Warning {
        self.record(
            LogRecord::new(LogLevel::Warn, warning.message())
                .kind("warning")
                .field("code", warning.code())
                .field("name", warning.name())
                .field("state", self.state.as_str()),
        );
        warning
    }

    fn critical(&self, critical: Critical, source: io::Error) -> TimerError {
        self.record(
            LogRecord::new(LogLevel::Error, critical.message())
                .kind("error")
                .field("code", critical.code())
                .field("state", self.state.as_str())
                .field("os_error", source.to_string()),
        );
        TimerError::os(critical, source)
    }

    fn transfer_failed(&self, e: TransferError) -> TimerError {
        let critical = Critical::TimeTransfer;
        self.record(
            LogRecord::new(LogLevel::Error, critical.message())
                .kind("error")
                .field("code", critical.code())
                .field("state", self.state.as_str())
                .field("detail", e.to_string()),
        );
        TimerError::new(critical)
    }

    fn teardown_failed(&self, step: &str, e: &io::Error) {
        self.record(
            LogRecord::new(LogLevel::Warn, format!("{} failed during teardown", step))
                .kind("teardown")
                .field("os_error", e.to_string()),
        );
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let signal = self.config.signal();
        // 以降に届いたシグナルはブリッジで捨てられ、別スレッドで実行中のコールバックも抜けている
        self.registry.unbind(signal, self.association);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.facility.set_interval(&handle, &OsItimerspec::DISARMED) {
                self.teardown_failed("disarm", &e);
            }
            if let Err(e) = self.facility.delete(handle) {
                self.teardown_failed("timer_delete", &e);
            }
        }
        if self.installed {
            if let Err(e) = self.registry.restore(signal) {
                self.teardown_failed("signal restore", &e);
            }
        }
        self.record(
            LogRecord::new(LogLevel::Debug, "timer destroyed")
                .kind("lifecycle")
                .field("expirations", self.expirations()),
        );

        // SAFETY: build で Box から作った唯一の所有ポインタ。unbind と timer_delete が済んでいる
        unsafe { drop(Box::from_raw(self.association.as_ptr())) };
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("remaining", &self.remaining)
            .field("association", self.association())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FakeSignalRegistry, FakeTimerFacility, Failures};
    use crate::bridge::Dispatch;
    use crate::domain::{ClockKind, OsTimespec, TimerOptions, MIN_EXPIRY};
    use common::adapter::MemoryLog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SIGNAL: i32 = libc::SIGUSR1;

    struct Harness {
        facility: Arc<FakeTimerFacility>,
        registry: Arc<FakeSignalRegistry>,
        log: Arc<MemoryLog>,
        count: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                facility: Arc::new(FakeTimerFacility::new()),
                registry: Arc::new(FakeSignalRegistry::new()),
                log: Arc::new(MemoryLog::new()),
                count: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn timer(&self, options: TimerOptions) -> Timer {
            self.try_timer(options).unwrap()
        }

        fn try_timer(&self, options: TimerOptions) -> Result<Timer, TimerError> {
            let count = Arc::clone(&self.count);
            Timer::builder(options.signal(SIGNAL).validate().unwrap())
                .callback(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .facility(self.facility.clone())
                .registry(self.registry.clone())
                .log(self.log.clone())
                .build()
        }

        fn expire(&self) -> Vec<Dispatch> {
            self.facility.expire(&self.registry)
        }

        fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    fn ts(d: Duration) -> OsTimespec {
        OsTimespec::from_duration(d).unwrap()
    }

    #[test]
    fn test_new_timer_is_idle() {
        let h = Harness::new();
        let timer = h.timer(TimerOptions::new(1).clock(ClockKind::Realtime));
        assert_eq!(timer.state(), LifecycleState::Idle);
        assert_eq!(timer.remaining(), None);
        assert_eq!(h.facility.live_timers(), 1);
        assert_eq!(h.facility.clock(), Some(ClockKind::Realtime));
        // start までシグナル処理には触れない
        assert_eq!(h.registry.installs(), 0);
    }

    #[test]
    fn test_start_arms_periodic_timer_and_installs_bridge() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(2).nanoseconds(500));
        timer.start().unwrap();

        assert_eq!(timer.state(), LifecycleState::Running);
        let armed = h.facility.armed().unwrap();
        assert_eq!(armed.value, ts(Duration::new(2, 500)));
        assert_eq!(armed.interval, ts(Duration::new(2, 500)));
        assert_eq!(h.registry.users(SIGNAL), 1);
        assert!(h.registry.is_bound(SIGNAL));

        assert_eq!(h.expire(), vec![Dispatch::Delivered]);
        assert_eq!(h.expire(), vec![Dispatch::Delivered]);
        assert_eq!(h.count(), 2);
        assert_eq!(timer.expirations(), 2);
        assert_eq!(timer.state(), LifecycleState::Running);
    }

    #[test]
    fn test_second_start_is_a_warning() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.try_start().unwrap();
        assert_eq!(
            timer.try_start(),
            Err(ErrorCode::Warning(Warning::StartAlreadyStarted))
        );
        assert_eq!(timer.state(), LifecycleState::Running);
        // 例外を投げる側の形は警告では失敗しない
        assert!(timer.start().is_ok());
        assert_eq!(h.log.messages_at(LogLevel::Warn).len(), 2);
        // ハンドラの登録は 1 回だけ
        assert_eq!(h.registry.users(SIGNAL), 1);
    }

    #[test]
    fn test_stop_disarms_and_stops_callbacks() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();
        let association = timer.association.as_ptr() as *const Association;
        h.expire();
        assert_eq!(h.count(), 1);

        timer.stop().unwrap();
        assert_eq!(timer.state(), LifecycleState::Idle);
        assert!(h.facility.armed().unwrap().is_disarmed());
        assert!(!h.registry.is_bound(SIGNAL));

        assert!(h.expire().is_empty());
        // 停止前に生成された遅延シグナルは落とされる
        assert_eq!(
            h.registry.deliver(SIGNAL, association),
            Dispatch::Dropped(Warning::SignalHandlerUnexpectedSignal)
        );
        assert_eq!(h.count(), 1);

        assert_eq!(
            timer.try_stop(),
            Err(ErrorCode::Warning(Warning::StopWhileNotRunning))
        );
    }

    #[test]
    fn test_suspend_while_idle_is_a_warning() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        assert_eq!(
            timer.try_suspend(),
            Err(ErrorCode::Warning(Warning::SuspendWhileNotRunning))
        );
        assert_eq!(timer.state(), LifecycleState::Idle);
        assert_eq!(h.facility.set_interval_calls(), 0);
    }

    #[test]
    fn test_suspend_and_resume_keep_remaining_time() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();

        h.facility.set_remaining(Some(ts(Duration::from_millis(250))));
        timer.suspend().unwrap();
        assert_eq!(timer.state(), LifecycleState::Suspended);
        assert_eq!(timer.remaining(), Some(Duration::from_millis(250)));
        assert!(h.facility.armed().unwrap().is_disarmed());
        assert!(!h.registry.is_bound(SIGNAL));

        assert_eq!(
            timer.try_suspend(),
            Err(ErrorCode::Warning(Warning::SuspendWhileNotRunning))
        );
        assert_eq!(
            timer.try_start(),
            Err(ErrorCode::Warning(Warning::StartAlreadyStarted))
        );

        timer.resume().unwrap();
        assert_eq!(timer.state(), LifecycleState::Running);
        assert_eq!(timer.remaining(), None);
        let armed = h.facility.armed().unwrap();
        assert_eq!(armed.value, ts(Duration::from_millis(250)));
        assert_eq!(armed.interval, ts(Duration::from_secs(1)));
        assert!(h.registry.is_bound(SIGNAL));

        h.expire();
        assert_eq!(h.count(), 1);
    }

    #[test]
    fn test_resume_warnings() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        assert_eq!(
            timer.try_resume(),
            Err(ErrorCode::Warning(Warning::ResumeWhileNotSuspended))
        );
        timer.start().unwrap();
        assert_eq!(
            timer.try_resume(),
            Err(ErrorCode::Warning(Warning::ResumeAlreadyRunning))
        );
    }

    #[test]
    fn test_stop_from_suspended() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();
        timer.suspend().unwrap();
        timer.stop().unwrap();
        assert_eq!(timer.state(), LifecycleState::Idle);
        assert_eq!(timer.remaining(), None);
        assert_eq!(
            timer.try_resume(),
            Err(ErrorCode::Warning(Warning::ResumeWhileNotSuspended))
        );
    }

    #[test]
    fn test_reset_rearms_full_period_from_any_state() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(3));

        // Idle からは暗黙に開始する
        timer.reset().unwrap();
        assert_eq!(timer.state(), LifecycleState::Running);
        assert_eq!(h.registry.users(SIGNAL), 1);

        h.facility.set_remaining(Some(ts(Duration::from_millis(10))));
        timer.suspend().unwrap();
        timer.reset().unwrap();
        assert_eq!(timer.state(), LifecycleState::Running);
        assert_eq!(timer.remaining(), None);
        assert_eq!(h.facility.armed().unwrap().value, ts(Duration::from_secs(3)));

        timer.reset().unwrap();
        assert_eq!(h.facility.armed().unwrap().value, ts(Duration::from_secs(3)));
        assert_eq!(h.registry.users(SIGNAL), 1);
    }

    #[test]
    fn test_single_shot_fires_once_then_idle() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1).single_shot(true));
        timer.start().unwrap();
        assert!(h.facility.armed().unwrap().interval.is_zero());

        assert_eq!(h.expire(), vec![Dispatch::Delivered]);
        assert!(h.expire().is_empty());
        assert_eq!(h.count(), 1);
        assert_eq!(timer.state(), LifecycleState::Idle);
        assert_eq!(
            timer.try_stop(),
            Err(ErrorCode::Warning(Warning::StopWhileNotRunning))
        );

        // 再開始すれば再び 1 回発火する
        timer.start().unwrap();
        assert_eq!(timer.state(), LifecycleState::Running);
        h.expire();
        assert_eq!(h.count(), 2);
    }

    #[test]
    fn test_zero_period_single_shot_fires_promptly() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(0).single_shot(true));
        timer.try_start().unwrap();
        let armed = h.facility.armed().unwrap();
        assert_eq!(armed.value, ts(MIN_EXPIRY));
        assert!(armed.interval.is_zero());

        h.expire();
        assert_eq!(h.count(), 1);
        assert_eq!(timer.state(), LifecycleState::Idle);
        assert_eq!(
            timer.try_stop(),
            Err(ErrorCode::Warning(Warning::StopWhileNotRunning))
        );
    }

    #[test]
    fn test_zero_period_repeating_behaves_as_single_shot() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(0));
        timer.start().unwrap();
        assert!(h.facility.armed().unwrap().interval.is_zero());
        h.expire();
        assert!(h.expire().is_empty());
        assert_eq!(h.count(), 1);
        assert_eq!(timer.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_creation_failure() {
        let h = Harness::new();
        h.facility.set_failures(Failures {
            create: true,
            ..Default::default()
        });
        let err = h.try_timer(TimerOptions::new(1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Critical(Critical::TimerCreation));
        assert!(err.os_error().is_some());
        assert_eq!(h.log.messages_at(LogLevel::Error).len(), 1);
    }

    #[test]
    fn test_registration_failure_leaves_state_unchanged() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        h.registry.set_fail_install(true);
        assert_eq!(
            timer.try_start(),
            Err(ErrorCode::Critical(Critical::SignalHandlerRegistration))
        );
        assert_eq!(timer.state(), LifecycleState::Idle);
        assert_eq!(h.facility.set_interval_calls(), 0);

        h.registry.set_fail_install(false);
        timer.start().unwrap();
        assert_eq!(timer.state(), LifecycleState::Running);
    }

    #[test]
    fn test_settime_failure_on_start() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        h.facility.set_failures(Failures {
            set_interval: true,
            ..Default::default()
        });
        let err = timer.start().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Critical(Critical::TimerSettime));
        assert_eq!(err.raw(), -3);
        assert_eq!(timer.state(), LifecycleState::Idle);
        assert!(!h.registry.is_bound(SIGNAL));
    }

    #[test]
    fn test_settime_failure_on_stop_keeps_running() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();
        h.facility.set_failures(Failures {
            set_interval: true,
            ..Default::default()
        });
        assert_eq!(
            timer.try_stop(),
            Err(ErrorCode::Critical(Critical::TimerSettime))
        );
        assert_eq!(timer.state(), LifecycleState::Running);
        assert!(h.registry.is_bound(SIGNAL));

        // Running 中の reset 失敗でも以前の装填は配送され続ける
        assert_eq!(
            timer.try_reset(),
            Err(ErrorCode::Critical(Critical::TimerSettime))
        );
        assert!(h.registry.is_bound(SIGNAL));
    }

    #[test]
    fn test_gettime_failure_on_suspend() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();
        h.facility.set_failures(Failures {
            remaining: true,
            ..Default::default()
        });
        assert_eq!(
            timer.try_suspend(),
            Err(ErrorCode::Critical(Critical::TimerGettime))
        );
        assert_eq!(timer.state(), LifecycleState::Running);
    }

    #[test]
    fn test_remaining_transfer_failure_on_suspend() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();
        h.facility
            .set_remaining(Some(OsTimespec { sec: 0, nsec: -1 }));
        let err = timer.suspend().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Critical(Critical::TimeTransfer));
        assert_eq!(timer.state(), LifecycleState::Running);
        // 停止していない
        assert!(!h.facility.armed().unwrap().is_disarmed());
    }

    #[test]
    fn test_drop_while_running_releases_everything() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();
        let association = timer.association.as_ptr() as usize;
        drop(timer);

        assert_eq!(h.facility.live_timers(), 0);
        assert_eq!(h.facility.deleted(), 1);
        assert_eq!(h.registry.users(SIGNAL), 0);
        assert_eq!(h.registry.restores(), 1);
        assert!(!h.registry.is_bound(SIGNAL));
        // 破棄後に届いたシグナルは参照外しされずに落ちる
        assert_eq!(
            h.registry.deliver(SIGNAL, association as *const Association),
            Dispatch::Dropped(Warning::SignalHandlerUnexpectedSignal)
        );
        assert_eq!(h.count(), 0);
    }

    #[test]
    fn test_stop_keeps_bridge_installed_until_drop() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();
        timer.stop().unwrap();
        // 停止後の遅延シグナルもブリッジが受ける
        assert_eq!(h.registry.users(SIGNAL), 1);
        assert_eq!(h.registry.restores(), 0);

        timer.start().unwrap();
        timer.stop().unwrap();
        assert_eq!(h.registry.installs(), 1);

        drop(timer);
        assert_eq!(h.registry.users(SIGNAL), 0);
        assert_eq!(h.registry.restores(), 1);
    }

    #[test]
    fn test_drop_of_never_started_timer_does_not_restore() {
        let h = Harness::new();
        drop(h.timer(TimerOptions::new(1)));
        assert_eq!(h.facility.deleted(), 1);
        assert_eq!(h.registry.restores(), 0);
    }

    #[test]
    fn test_drop_swallows_teardown_errors() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();
        h.facility.set_failures(Failures {
            set_interval: true,
            delete: true,
            ..Default::default()
        });
        h.registry.set_fail_restore(true);
        drop(timer);

        let teardown: Vec<_> = h
            .log
            .records()
            .into_iter()
            .filter(|r| r.kind.as_deref() == Some("teardown"))
            .collect();
        assert_eq!(teardown.len(), 3);
        assert!(teardown.iter().all(|r| r.level == LogLevel::Warn));
    }

    #[test]
    fn test_second_timer_on_same_signal_displaces_first() {
        let h = Harness::new();
        let mut first = h.timer(TimerOptions::new(1));
        let mut second = h.timer(TimerOptions::new(1));
        first.start().unwrap();
        second.start().unwrap();
        assert_eq!(h.registry.installs(), 1);
        assert_eq!(h.registry.users(SIGNAL), 2);

        let mut outcomes = h.expire();
        outcomes.sort_by_key(|d| matches!(d, Dispatch::Delivered));
        assert_eq!(
            outcomes,
            vec![
                Dispatch::Dropped(Warning::SignalHandlerUnexpectedSignal),
                Dispatch::Delivered
            ]
        );
        assert_eq!(first.expirations(), 0);
        assert_eq!(second.expirations(), 1);

        drop(second);
        assert_eq!(h.registry.users(SIGNAL), 1);
        drop(first);
        assert_eq!(h.registry.restores(), 1);
    }

    #[test]
    fn test_timer_can_move_after_start() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();
        let mut timers = vec![timer];
        h.expire();
        assert_eq!(h.count(), 1);
        timers[0].stop().unwrap();
    }

    #[test]
    fn test_user_data_is_passed_to_callback() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        let h = Harness::new();
        let mut timer = Timer::builder(TimerOptions::new(1).signal(SIGNAL).validate().unwrap())
            .callback(|data| {
                let seen = unsafe { data.as_ref::<AtomicUsize>() }.unwrap();
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .user_data(UserData::from_static(&SEEN))
            .facility(h.facility.clone())
            .registry(h.registry.clone())
            .build()
            .unwrap();
        timer.start().unwrap();
        h.expire();
        assert_eq!(SEEN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timer_without_callback_counts_expirations() {
        let h = Harness::new();
        let mut timer = Timer::builder(TimerOptions::new(1).signal(SIGNAL).validate().unwrap())
            .facility(h.facility.clone())
            .registry(h.registry.clone())
            .build()
            .unwrap();
        timer.start().unwrap();
        h.expire();
        assert_eq!(timer.expirations(), 1);
    }

    #[test]
    fn test_lifecycle_is_logged() {
        let h = Harness::new();
        let mut timer = h.timer(TimerOptions::new(1));
        timer.start().unwrap();
        timer.stop().unwrap();
        let messages = h.log.messages_at(LogLevel::Debug);
        assert!(messages.contains(&"timer created".to_string()));
        assert!(messages.contains(&"timer started".to_string()));
        assert!(messages.contains(&"timer stopped".to_string()));
        assert!(h
            .log
            .records()
            .iter()
            .all(|r| r.layer.as_deref() == Some("timer")));
    }
}
