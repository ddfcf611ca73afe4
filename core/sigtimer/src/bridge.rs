//! シグナルブリッジ
//!
//! OS タイマーの満了シグナルを受けて、発生元タイマーのユーザーコールバックを呼ぶ。
//!
//! ここにあるコードはシグナル配送コンテキストで動く（呼び出し元スレッドを任意の命令境界で
//! 割り込む）。そのためログ・アロケーション・ロック・パニックの捕捉を一切行わず、
//! 異常の記録はアトミックカウンタだけで行う。カウンタは通常のコードから `take_anomalies` で回収する。

use crate::error::Warning;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// コールバックへそのまま渡される不透明なユーザーデータ
///
/// ライブラリはこのポインタを参照外ししない。指す先の所有権・寿命は呼び出し側が持つ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserData(*mut c_void);

// ポインタを運ぶだけで参照外ししない。指す先の同期は呼び出し側の責任。
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    pub const fn null() -> Self {
        UserData(std::ptr::null_mut())
    }

    pub const fn from_ptr(ptr: *mut c_void) -> Self {
        UserData(ptr)
    }

    /// `'static` な共有参照から作る（アトミックカウンタの受け渡しなど）
    pub fn from_static<T: Sync>(value: &'static T) -> Self {
        UserData(value as *const T as *mut c_void)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// 型 `T` への共有参照として読む
    ///
    /// # Safety
    /// ポインタが生存中の `T` を指していること（`from_static::<T>` で作った値など）。
    pub unsafe fn as_ref<'a, T>(&self) -> Option<&'a T> {
        (self.0 as *const T).as_ref()
    }
}

impl Default for UserData {
    fn default() -> Self {
        UserData::null()
    }
}

/// ユーザーコールバック
///
/// シグナル配送コンテキスト（割り込み相当）で同期的に呼ばれる。本体では
/// - ブロックしない（ロック・スリープ・ブロッキング I/O 禁止）
/// - アロケーションしない
/// - 非リエントラントな関数を呼ばない
/// - ライフサイクル操作と共有するデータにはアトミック操作だけで触る
/// - パニックしない（`extern "C"` のハンドラ境界を越えるとプロセスが abort する）
pub type Callback = Box<dyn Fn(UserData) + Send + Sync + 'static>;

/// OS タイマーの通知値として渡される、タイマー 1 つ分の関連付け
///
/// `Timer` が Box で所有するのでアドレスは `Timer` の移動後も変わらない。
pub struct Association {
    signal: i32,
    fires_once: bool,
    callback: Option<Callback>,
    user_data: UserData,
    expirations: AtomicU64,
    expired: AtomicBool,
}

impl Association {
    pub(crate) fn new(
        signal: i32,
        fires_once: bool,
        callback: Option<Callback>,
        user_data: UserData,
    ) -> Self {
        Self {
            signal,
            fires_once,
            callback,
            user_data,
            expirations: AtomicU64::new(0),
            expired: AtomicBool::new(false),
        }
    }

    pub fn signal(&self) -> i32 {
        self.signal
    }

    /// これまでにコールバックへ配送した満了回数
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Acquire)
    }

    /// 単発タイマーが装填後に満了したか
    pub(crate) fn has_expired(&self) -> bool {
        self.fires_once && self.expired.load(Ordering::Acquire)
    }

    /// 装填直前に呼ぶ
    pub(crate) fn rearm(&self) {
        self.expired.store(false, Ordering::Release);
    }

    fn fire(&self) {
        self.expirations.fetch_add(1, Ordering::AcqRel);
        if self.fires_once {
            self.expired.store(true, Ordering::Release);
        }
        if let Some(callback) = &self.callback {
            callback(self.user_data);
        }
    }
}

impl std::fmt::Debug for Association {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Association")
            .field("signal", &self.signal)
            .field("fires_once", &self.fires_once)
            .field("has_callback", &self.callback.is_some())
            .field("user_data", &self.user_data)
            .field("expirations", &self.expirations())
            .finish()
    }
}

/// 1 回の配送結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    Dropped(Warning),
}

/// 捨てた配送の種類ごとのカウンタ（ハンドラから加算し、通常コンテキストで回収する）
struct AnomalyCounters {
    null_pointer: AtomicU64,
    unexpected_signal: AtomicU64,
}

impl AnomalyCounters {
    const fn new() -> Self {
        Self {
            null_pointer: AtomicU64::new(0),
            unexpected_signal: AtomicU64::new(0),
        }
    }

    fn record(&self, warning: Warning) -> Dispatch {
        match warning {
            Warning::SignalHandlerTimerNullPointer => {
                self.null_pointer.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.unexpected_signal.fetch_add(1, Ordering::Relaxed);
            }
        }
        Dispatch::Dropped(warning)
    }

    fn take(&self) -> Anomalies {
        Anomalies {
            null_pointer: self.null_pointer.swap(0, Ordering::Relaxed),
            unexpected_signal: self.unexpected_signal.swap(0, Ordering::Relaxed),
        }
    }
}

static ANOMALIES: AnomalyCounters = AnomalyCounters::new();

/// グローバルカウンタを回収するテスト同士を直列にする
#[cfg(test)]
pub(crate) static ANOMALY_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// シグナル配送を振り分ける
///
/// - `delivered`: OS が通知値として運んできた関連付け
/// - `live`: シグナル登録表でその番号に現在結び付いている関連付け
///
/// `delivered` が `live` と一致した場合だけ参照外しする。停止・破棄済みのタイマーの
/// 遅延シグナルや、同じ番号を後から使ったタイマーに押し出された関連付けはここで落ちる。
///
/// # Safety
/// `live` が null でなければ、生存中の `Association` を指していること。
/// （`SignalRegistry::bind` された関連付けは解放前に必ず `unbind` される。）
pub(crate) unsafe fn dispatch(
    signal: i32,
    delivered: *const Association,
    live: *const Association,
) -> Dispatch {
    if delivered.is_null() {
        return ANOMALIES.record(Warning::SignalHandlerTimerNullPointer);
    }
    if delivered != live {
        return ANOMALIES.record(Warning::SignalHandlerUnexpectedSignal);
    }
    let association = &*delivered;
    if association.signal != signal {
        return ANOMALIES.record(Warning::SignalHandlerUnexpectedSignal);
    }
    association.fire();
    Dispatch::Delivered
}

/// シグナルブリッジで捨てた配送の件数（プロセス全体）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Anomalies {
    pub null_pointer: u64,
    pub unexpected_signal: u64,
}

impl Anomalies {
    pub fn total(&self) -> u64 {
        self.null_pointer + self.unexpected_signal
    }
}

/// 記録済みの異常件数を取り出し、カウンタを 0 に戻す
pub fn take_anomalies() -> Anomalies {
    ANOMALIES.take()
}
