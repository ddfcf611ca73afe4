//! 人間向けログ（LogRecord → stderr への 1 行出力）
//!
//! fields の全量は出さず要点のみ（巨大化防止）。

use crate::error::Error;
use crate::ports::outbound::{Log, LogLevel, LogRecord};

const FIELDS_SUMMARY_MAX: usize = 200;

/// fields を短い文字列にする
fn fields_summary(record: &LogRecord) -> String {
    let Some(fields) = record.fields.as_ref() else {
        return String::new();
    };
    if fields.is_empty() {
        return String::new();
    }
    let s = serde_json::to_string(fields).unwrap_or_default();
    if s.len() <= FIELDS_SUMMARY_MAX {
        return s;
    }
    let truncated = s.chars().take(FIELDS_SUMMARY_MAX).collect::<String>();
    format!("{}... (len={})", truncated, s.len())
}

/// 1 行に整形する（テストしやすいよう出力と分離）
pub fn format_line(record: &LogRecord) -> String {
    let mut line = format!("[{}] {}", record.level.as_str(), record.message);
    if let Some(layer) = &record.layer {
        line = format!("[{}] {}: {}", record.level.as_str(), layer, record.message);
    }
    let summary = fields_summary(record);
    if !summary.is_empty() {
        line.push(' ');
        line.push_str(&summary);
    }
    line
}

/// stderr へ整形して出力する Log 実装
///
/// `max_level` より詳細なレコードは捨てる（例: Info なら Debug を出さない）。
pub struct StderrLog {
    max_level: LogLevel,
}

impl StderrLog {
    pub fn new(max_level: LogLevel) -> Self {
        Self { max_level }
    }
}

impl Default for StderrLog {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Log for StderrLog {
    fn log(&self, record: &LogRecord) -> Result<(), Error> {
        if record.level > self.max_level {
            return Ok(());
        }
        eprintln!("{}", format_line(record));
        Ok(())
    }
}
