//! タイマーのエラー分類
//!
//! コードは符号で 2 系統に分かれる。
//! - 負: 致命的エラー（OS 呼び出しの失敗。操作は反映されず状態は変わらない）
//! - 正: 警告（状態の前提違反による no-op。システムは一貫したまま）
//!
//! 生の整数値は外部とのやり取り（終了コード・ログ）用で、内部では `ErrorCode` の直和型で扱う。

use std::io;

/// エラードメイン名
pub const CATEGORY_NAME: &str = "sigtimer";

const UNKNOWN_MESSAGE: &str = "Unknown error";

/// 致命的エラー（負のコード）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Critical {
    /// timer_create の失敗
    TimerCreation,
    /// OS 呼び出し間での残り時間の受け渡しに失敗（範囲外の timespec など）
    TimeTransfer,
    /// timer_gettime の失敗
    TimerGettime,
    /// timer_settime の失敗
    TimerSettime,
    /// sigaction によるハンドラ登録の失敗
    SignalHandlerRegistration,
    /// 分類できないエラー
    Unknown,
}

impl Critical {
    pub const ALL: [Critical; 6] = [
        Critical::TimerCreation,
        Critical::TimeTransfer,
        Critical::TimerGettime,
        Critical::TimerSettime,
        Critical::SignalHandlerRegistration,
        Critical::Unknown,
    ];

    pub const fn code(self) -> i32 {
        match self {
            Critical::TimerCreation => -6,
            Critical::TimeTransfer => -5,
            Critical::TimerGettime => -4,
            Critical::TimerSettime => -3,
            Critical::SignalHandlerRegistration => -2,
            Critical::Unknown => -1,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Critical::TimerCreation => "POSIX timer_create has failed",
            Critical::TimeTransfer => "remaining time transfer has failed",
            Critical::TimerGettime => "POSIX timer_gettime has failed",
            Critical::TimerSettime => "POSIX timer_settime has failed",
            Critical::SignalHandlerRegistration => "SYSTEM sigaction has failed",
            Critical::Unknown => "unknown error",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Critical::TimerCreation => "timer_creation",
            Critical::TimeTransfer => "time_transfer",
            Critical::TimerGettime => "timer_gettime",
            Critical::TimerSettime => "timer_settime",
            Critical::SignalHandlerRegistration => "signal_handler_registration",
            Critical::Unknown => "unknown_error",
        }
    }
}

/// 警告（正のコード）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Warning {
    /// シグナルブリッジが null の関連付けを受け取った
    SignalHandlerTimerNullPointer,
    /// シグナルブリッジが想定外のシグナル（または登録外のタイマー）を受け取った
    SignalHandlerUnexpectedSignal,
    StartAlreadyStarted,
    ResumeAlreadyRunning,
    StopWhileNotRunning,
    SuspendWhileNotRunning,
    /// Idle からの resume
    ResumeWhileNotSuspended,
}

impl Warning {
    pub const ALL: [Warning; 7] = [
        Warning::SignalHandlerTimerNullPointer,
        Warning::SignalHandlerUnexpectedSignal,
        Warning::StartAlreadyStarted,
        Warning::ResumeAlreadyRunning,
        Warning::StopWhileNotRunning,
        Warning::SuspendWhileNotRunning,
        Warning::ResumeWhileNotSuspended,
    ];

    pub const fn code(self) -> i32 {
        match self {
            Warning::SignalHandlerTimerNullPointer => 1,
            Warning::SignalHandlerUnexpectedSignal => 2,
            Warning::StartAlreadyStarted => 3,
            Warning::ResumeAlreadyRunning => 4,
            Warning::StopWhileNotRunning => 5,
            Warning::SuspendWhileNotRunning => 6,
            Warning::ResumeWhileNotSuspended => 7,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Warning::SignalHandlerTimerNullPointer => "signal_handler timer pointer is null",
            Warning::SignalHandlerUnexpectedSignal => "signal_handler unexpected signal",
            Warning::StartAlreadyStarted => "an attempt to start already running timer",
            Warning::ResumeAlreadyRunning => "an attempt to resume already running timer",
            Warning::StopWhileNotRunning => "an attempt to stop already stopped timer",
            Warning::SuspendWhileNotRunning => "an attempt to suspend not running timer",
            Warning::ResumeWhileNotSuspended => "an attempt to resume not suspended timer",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Warning::SignalHandlerTimerNullPointer => "signal_handler_timer_null_pointer",
            Warning::SignalHandlerUnexpectedSignal => "signal_handler_unexpected_signal",
            Warning::StartAlreadyStarted => "start_already_started",
            Warning::ResumeAlreadyRunning => "resume_already_running",
            Warning::StopWhileNotRunning => "stop_while_not_running",
            Warning::SuspendWhileNotRunning => "suspend_while_not_running",
            Warning::ResumeWhileNotSuspended => "resume_while_not_suspended",
        }
    }
}

/// `try_*` 系の操作が返す型付きコード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorCode {
    #[error("{}", .0.message())]
    Critical(Critical),
    #[error("{}", .0.message())]
    Warning(Warning),
}

impl ErrorCode {
    /// 生の整数コードから変換する。
    ///
    /// 0 は成功なので `None`。表にない値は `Critical::Unknown` に寄せる。
    pub fn from_raw(raw: i32) -> Option<ErrorCode> {
        if raw == 0 {
            return None;
        }
        Some(Self::lookup(raw).unwrap_or(ErrorCode::Critical(Critical::Unknown)))
    }

    /// 表にあるコードだけを返す
    pub fn lookup(raw: i32) -> Option<ErrorCode> {
        if raw < 0 {
            Critical::ALL
                .iter()
                .find(|c| c.code() == raw)
                .map(|c| ErrorCode::Critical(*c))
        } else {
            Warning::ALL
                .iter()
                .find(|w| w.code() == raw)
                .map(|w| ErrorCode::Warning(*w))
        }
    }

    pub const fn raw(self) -> i32 {
        match self {
            ErrorCode::Critical(c) => c.code(),
            ErrorCode::Warning(w) => w.code(),
        }
    }

    pub const fn is_warning(self) -> bool {
        matches!(self, ErrorCode::Warning(_))
    }

    pub const fn is_critical(self) -> bool {
        matches!(self, ErrorCode::Critical(_))
    }

    pub const fn message(self) -> &'static str {
        match self {
            ErrorCode::Critical(c) => c.message(),
            ErrorCode::Warning(w) => w.message(),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ErrorCode::Critical(c) => c.name(),
            ErrorCode::Warning(w) => w.name(),
        }
    }
}

impl From<Critical> for ErrorCode {
    fn from(c: Critical) -> Self {
        ErrorCode::Critical(c)
    }
}

impl From<Warning> for ErrorCode {
    fn from(w: Warning) -> Self {
        ErrorCode::Warning(w)
    }
}

/// 生のコードが警告かどうか（符号で判定）
pub fn is_warning(raw: i32) -> bool {
    raw > 0
}

/// エラードメイン（名前とコードごとのメッセージ）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCategory;

impl ErrorCategory {
    pub const fn name(&self) -> &'static str {
        CATEGORY_NAME
    }

    /// コードに対応するメッセージ。表にないコードは "Unknown error"。
    pub fn message(&self, raw: i32) -> &'static str {
        ErrorCode::lookup(raw)
            .map(ErrorCode::message)
            .unwrap_or(UNKNOWN_MESSAGE)
    }
}

/// 呼び出し側へ返すエラーオブジェクト
///
/// コード・ドメイン名・メッセージに加え、OS 呼び出しが原因なら errno を source に持つ。
#[derive(Debug, thiserror::Error)]
#[error("{}", describe(.raw, .source))]
pub struct TimerError {
    raw: i32,
    code: ErrorCode,
    #[source]
    source: Option<io::Error>,
}

fn describe(raw: &i32, source: &Option<io::Error>) -> String {
    let message = ErrorCategory.message(*raw);
    match source {
        Some(os) => format!("{}: {} ({})", CATEGORY_NAME, message, os),
        None => format!("{}: {}", CATEGORY_NAME, message),
    }
}

impl TimerError {
    pub fn new(code: impl Into<ErrorCode>) -> Self {
        let code = code.into();
        Self {
            raw: code.raw(),
            code,
            source: None,
        }
    }

    /// OS 呼び出しの失敗から作る
    pub fn os(critical: Critical, source: io::Error) -> Self {
        Self {
            raw: critical.code(),
            code: ErrorCode::Critical(critical),
            source: Some(source),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// 生のコード（make_error で表にない値を渡した場合はその値のまま）
    pub fn raw(&self) -> i32 {
        self.raw
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory
    }

    pub fn message(&self) -> &'static str {
        ErrorCategory.message(self.raw)
    }

    /// 符号で判定する（自由関数 `is_warning` と同じ）。表にない正の値も警告扱い。
    pub fn is_warning(&self) -> bool {
        is_warning(self.raw)
    }

    pub fn os_error(&self) -> Option<&io::Error> {
        self.source.as_ref()
    }
}

impl From<ErrorCode> for TimerError {
    fn from(code: ErrorCode) -> Self {
        TimerError::new(code)
    }
}

/// 生のコードをエラーオブジェクトに変換する。0（成功）は `None`。
pub fn make_error(raw: i32) -> Option<TimerError> {
    let code = ErrorCode::from_raw(raw)?;
    Some(TimerError {
        raw,
        code,
        source: None,
    })
}
