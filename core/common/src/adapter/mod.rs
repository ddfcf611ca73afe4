//! アダプター（Log ポートの標準実装）
//!
//! ライブラリはこのモジュールの実装を直接知らず、`Arc<dyn Log>` として注入される。

pub mod file_json_log;
pub mod memory_log;
pub mod stderr_log;

pub use file_json_log::{FileJsonLog, NoopLog};
pub use memory_log::MemoryLog;
pub use stderr_log::StderrLog;
