//! エラーハンドリング
//!
//! 終了コードは sysexits 準拠（引数不正 = 64、システムエラー = 70、I/O = 74）。

/// common 全体で使うエラー型
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 引数・設定値の不正（使い方の表示対象）
    #[error("{0}")]
    InvalidArgument(String),
    /// OS 呼び出しなどシステム側の失敗
    #[error("{0}")]
    System(String),
    /// ファイル入出力の失敗
    #[error("{0}")]
    Io(String),
    /// JSON のシリアライズ・パース失敗
    #[error("json: {0}")]
    Json(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn system(msg: impl Into<String>) -> Self {
        Error::System(msg.into())
    }

    pub fn io_msg(msg: impl Into<String>) -> Self {
        Error::Io(msg.into())
    }

    /// プロセス終了コード
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => 64,
            Error::Json(_) => 65,
            Error::System(_) => 70,
            Error::Io(_) => 74,
        }
    }

    /// usage を併せて表示すべきエラーか
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}
