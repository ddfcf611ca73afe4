//! タイマーのライフサイクル状態

use std::fmt;

/// ライフサイクル状態
///
/// Controller（`Timer`）のライフサイクル操作だけが変更する。シグナルブリッジは触らない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Running,
    Suspended,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Running => "running",
            LifecycleState::Suspended => "suspended",
        }
    }

    /// Running または Suspended（OS タイマーを止めれば Idle に戻せる状態）
    pub fn is_active(&self) -> bool {
        !matches!(self, LifecycleState::Idle)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
