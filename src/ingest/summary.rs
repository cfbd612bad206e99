use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use strum::Display;

use crate::logging;

/// 排程工作在多次執行之間的狀態
#[derive(Serialize, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CycleState {
    /// 所有股票都尚未處理（剛重設）
    Idle,
    /// 部分已處理
    Draining,
    /// 已無待處理的股票，下一次執行會重設
    Exhausted,
    /// 不追蹤進度的工作
    Untracked,
}

/// 一次執行的彙總紀錄
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub job: String,
    pub symbols_attempted: usize,
    pub symbols_succeeded: usize,
    pub symbols_marked_done: usize,
    pub symbols_forced: usize,
    pub work_items: usize,
    pub requests_succeeded: usize,
    pub batches: usize,
    pub pauses: usize,
    pub failed_batches: usize,
    /// 本次執行是否重設了處理旗標
    pub reset: bool,
    pub state: CycleState,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunSummary {
    pub fn start(job: &str) -> Self {
        let now = Local::now();
        RunSummary {
            job: job.to_string(),
            symbols_attempted: 0,
            symbols_succeeded: 0,
            symbols_marked_done: 0,
            symbols_forced: 0,
            work_items: 0,
            requests_succeeded: 0,
            batches: 0,
            pauses: 0,
            failed_batches: 0,
            reset: false,
            state: CycleState::Untracked,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Local::now();
        self
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: attempted {} symbols ({} succeeded, {} marked done, {} forced), {}/{} requests ok in {} batches ({} failed), state {}{}, {} ms",
            self.job,
            self.symbols_attempted,
            self.symbols_succeeded,
            self.symbols_marked_done,
            self.symbols_forced,
            self.requests_succeeded,
            self.work_items,
            self.batches,
            self.failed_batches,
            self.state,
            if self.reset { " (reset)" } else { "" },
            self.elapsed_ms()
        )
    }
}

/// 執行彙總的輸出端（log、資料表、儀表板）
#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn record(&self, summary: &RunSummary) -> Result<()>;
}

/// 只寫入 log 檔
pub struct LogSink;

#[async_trait]
impl SummarySink for LogSink {
    async fn record(&self, summary: &RunSummary) -> Result<()> {
        logging::info_file_async(format!(
            "run summary {}",
            serde_json::to_string(summary)?
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_counts() {
        let mut summary = RunSummary::start("earnings");
        summary.symbols_attempted = 3;
        summary.symbols_succeeded = 2;
        summary.state = CycleState::Draining;
        let text = summary.finish().to_string();

        assert!(text.starts_with("earnings: attempted 3 symbols (2 succeeded"));
        assert!(text.contains("state draining"));
    }

    #[test]
    fn test_serialize_snake_case_state() {
        let mut summary = RunSummary::start("quote");
        summary.state = CycleState::Exhausted;
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["state"], "exhausted");
        assert_eq!(json["job"], "quote");
    }
}
