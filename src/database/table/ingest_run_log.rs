use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::types::Json;

use crate::{
    database,
    ingest::summary::{LogSink, RunSummary, SummarySink},
};

/// `BIGINT` 欄位的計數轉換
fn count(n: usize) -> Result<i64> {
    i64::try_from(n).with_context(|| format!("count {} does not fit in BIGINT", n))
}

/// 把每次執行的彙總寫入 `ingest_run_log`，同時留一份在 log 檔
pub struct RunLogSink;

impl RunLogSink {
    pub async fn insert(summary: &RunSummary) -> Result<u64> {
        let sql = r#"
INSERT INTO ingest_run_log
    (job_key, state, symbols_attempted, symbols_succeeded, symbols_marked_done,
     work_items, requests_succeeded, failed_batches, reset, started_at, finished_at, summary)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12);
"#;

        let result = sqlx::query(sql)
            .bind(&summary.job)
            .bind(summary.state.to_string())
            .bind(count(summary.symbols_attempted)?)
            .bind(count(summary.symbols_succeeded)?)
            .bind(count(summary.symbols_marked_done)?)
            .bind(count(summary.work_items)?)
            .bind(count(summary.requests_succeeded)?)
            .bind(count(summary.failed_batches)?)
            .bind(summary.reset)
            .bind(summary.started_at)
            .bind(summary.finished_at)
            .bind(Json(summary))
            .execute(database::get_connection()?)
            .await
            .context(format!(
                "Failed to RunLogSink::insert({}) from database",
                summary.job
            ))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SummarySink for RunLogSink {
    async fn record(&self, summary: &RunSummary) -> Result<()> {
        LogSink.record(summary).await?;
        RunLogSink::insert(summary).await?;
        Ok(())
    }
}
