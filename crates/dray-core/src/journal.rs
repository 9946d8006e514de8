//! Operational journal - イベント記録の sink.
//!
//! queue.log には claim / 完了 / 失敗が timestamp と pid 付きで追記されます。
//! これは運用デバッグのための advisory なログであり、正本ではありません
//! （タスクの状態はあくまで bucket 内のファイルです）。
//!
//! sink は構築時に注入されるので、ファイルの寿命や flush のタイミングは
//! 呼び出し側が握れます。暗黙のグローバル logger は持ちません。

use chrono::{SecondsFormat, Utc};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

/// Severity of a journal line. Mirrors the four levels the queue emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl JournalLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalLevel::Debug => "DEBUG",
            JournalLevel::Info => "INFO",
            JournalLevel::Warning => "WARNING",
            JournalLevel::Error => "ERROR",
        }
    }
}

/// Where queue lifecycle messages go.
///
/// Implementations must tolerate concurrent calls; the queue and every
/// worker share one sink.
pub trait JournalSink: Send + Sync {
    fn record(&self, level: JournalLevel, message: &str);
}

/// Appends `"{timestamp} - {pid} - {level} - {message}"` lines to a file.
///
/// The pid makes interleaved lines from multiple worker processes
/// attributable. Write failures are reported via `tracing` and otherwise
/// swallowed: the journal is advisory, so it must never take the queue down.
pub struct FileJournal {
    file: Mutex<std::fs::File>,
    pid: u32,
}

impl FileJournal {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            pid: std::process::id(),
        })
    }
}

impl JournalSink for FileJournal {
    fn record(&self, level: JournalLevel, message: &str) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        if let Err(err) = writeln!(
            file,
            "{timestamp} - {pid} - {level} - {message}",
            pid = self.pid,
            level = level.as_str(),
        ) {
            warn!(%err, "failed to append journal line");
        }
    }
}

/// Discards everything. For tests and embedders with their own telemetry.
pub struct NullJournal;

impl JournalSink for NullJournal {
    fn record(&self, _level: JournalLevel, _message: &str) {}
}
