//! タイマーを実際に動かして結果を集計する

use crate::cli::Plan;
use common::error::Error;
use common::ports::outbound::{Log, LogLevel, LogRecord};
use serde::Serialize;
use sigtimer::{take_anomalies, Anomalies, Timer, TimerConfig, TimerError, UserData};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(1);

/// 実行結果（標準出力に JSON で出す）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub state: String,
    /// ライブラリが数えた満了回数
    pub expirations: u64,
    /// コールバックが数えた呼び出し回数
    pub callbacks: u64,
    pub elapsed_ms: u64,
    pub interrupted: bool,
    pub suspended: bool,
    pub reset: bool,
    pub anomalies: AnomalySummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalySummary {
    pub null_pointer: u64,
    pub unexpected_signal: u64,
}

impl From<Anomalies> for AnomalySummary {
    fn from(a: Anomalies) -> Self {
        Self {
            null_pointer: a.null_pointer,
            unexpected_signal: a.unexpected_signal,
        }
    }
}

fn timer_failed(e: TimerError) -> Error {
    Error::system(e.to_string())
}

/// シグナル配送コンテキストで呼ばれる。アトミック加算だけを行う。
fn count_tick(data: UserData) {
    if let Some(counter) = unsafe { data.as_ref::<AtomicU64>() } {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// `plan` に従ってタイマーを動かす
///
/// `counter` はコールバックから加算される。`interrupted` が立つと途中で止める。
pub fn run(
    config: TimerConfig,
    plan: Plan,
    counter: &'static AtomicU64,
    interrupted: &AtomicBool,
    log: Arc<dyn Log>,
) -> Result<Summary, Error> {
    counter.store(0, Ordering::Relaxed);
    let _ = take_anomalies();

    let mut timer = Timer::builder(config)
        .callback(count_tick)
        .user_data(UserData::from_static(counter))
        .log(Arc::clone(&log))
        .build()
        .map_err(timer_failed)?;

    let started = Instant::now();
    timer.start().map_err(timer_failed)?;
    let _ = log.log(
        &LogRecord::new(LogLevel::Info, "probe started")
            .layer("cli")
            .kind("lifecycle")
            .field("signal", config.signal())
            .field("period_ns", config.period().as_nanos() as u64),
    );

    let mut suspended = false;
    let mut reset = false;
    let mut was_interrupted = false;
    loop {
        if interrupted.load(Ordering::Relaxed) {
            was_interrupted = true;
            break;
        }
        let ticks = counter.load(Ordering::Relaxed);
        if plan.ticks.is_some_and(|limit| ticks >= limit) {
            break;
        }
        if plan.run_for.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        if ticks >= 1 {
            if let (Some(pause), false) = (plan.suspend_for, suspended) {
                timer.suspend().map_err(timer_failed)?;
                thread::sleep(pause);
                timer.resume().map_err(timer_failed)?;
                suspended = true;
            }
            if plan.reset && !reset {
                timer.reset().map_err(timer_failed)?;
                reset = true;
            }
        }
        thread::sleep(POLL);
    }

    let state = timer.state();
    if state.is_active() {
        timer.stop().map_err(timer_failed)?;
    }
    let summary = Summary {
        state: state.as_str().to_string(),
        expirations: timer.expirations(),
        callbacks: counter.load(Ordering::Relaxed),
        elapsed_ms: started.elapsed().as_millis() as u64,
        interrupted: was_interrupted,
        suspended,
        reset,
        anomalies: take_anomalies().into(),
    };
    let _ = log.log(
        &LogRecord::new(LogLevel::Info, "probe finished")
            .layer("cli")
            .kind("lifecycle")
            .field("expirations", summary.expirations)
            .field("callbacks", summary.callbacks),
    );
    Ok(summary)
}
