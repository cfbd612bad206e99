use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::{
    database,
    ingest::progress::{ProgressStore, SymbolFilter},
};

/// 以 `stocks` 為股票代號註冊表、`ingest_progress` 存放各工作處理旗標的實作。
///
/// `ingest_progress` 沒有資料列的股票視為未處理。
pub struct PgProgressStore;

fn priority_only(filter: SymbolFilter) -> bool {
    filter == SymbolFilter::PriorityOnly
}

/// `LIMIT NULL` 即不限筆數；超過 `i64::MAX` 的上限等同不限
fn sql_limit(limit: Option<usize>) -> Option<i64> {
    limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX))
}

#[async_trait]
impl ProgressStore for PgProgressStore {
    async fn list_pending(
        &self,
        job: &str,
        filter: SymbolFilter,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let sql = r#"
SELECT s.symbol
FROM stocks AS s
LEFT JOIN ingest_progress AS p
    ON p.stock_symbol = s.symbol AND p.job_key = $1
WHERE COALESCE(p.processed, false) = false
  AND ($2 = false OR s.priority = true)
ORDER BY s.id
LIMIT $3;
"#;

        sqlx::query_scalar::<_, String>(sql)
            .bind(job)
            .bind(priority_only(filter))
            .bind(sql_limit(limit))
            .fetch_all(database::get_connection()?)
            .await
            .context(format!(
                "Failed to PgProgressStore::list_pending({}, {}, {:?}) from database",
                job, filter, limit
            ))
    }

    async fn list_symbols(
        &self,
        filter: SymbolFilter,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let sql = r#"
SELECT symbol
FROM stocks
WHERE ($1 = false OR priority = true)
ORDER BY id
LIMIT $2;
"#;

        sqlx::query_scalar::<_, String>(sql)
            .bind(priority_only(filter))
            .bind(sql_limit(limit))
            .fetch_all(database::get_connection()?)
            .await
            .context(format!(
                "Failed to PgProgressStore::list_symbols({}, {:?}) from database",
                filter, limit
            ))
    }

    async fn mark_done(&self, job: &str, symbols: &[String]) -> Result<u64> {
        if symbols.is_empty() {
            return Ok(0);
        }

        let sql = r#"
INSERT INTO ingest_progress
    (job_key, stock_symbol, processed, failed_runs, updated_at)
SELECT $1, symbol, true, 0, now()
FROM unnest($2::text[]) AS symbol
ON CONFLICT (job_key, stock_symbol)
DO UPDATE SET
    processed = true,
    failed_runs = 0,
    updated_at = now();
"#;

        let result = sqlx::query(sql)
            .bind(job)
            .bind(symbols)
            .execute(database::get_connection()?)
            .await
            .context(format!(
                "Failed to PgProgressStore::mark_done({}, {} symbols) from database",
                job,
                symbols.len()
            ))?;

        Ok(result.rows_affected())
    }

    async fn reset_all(&self, job: &str) -> Result<u64> {
        let reset = r#"
UPDATE ingest_progress
SET processed = false, failed_runs = 0, updated_at = now()
WHERE job_key = $1;
"#;
        // 已從註冊表移除的股票不再保留旗標
        let prune = r#"
DELETE FROM ingest_progress AS p
WHERE p.job_key = $1
  AND NOT EXISTS (SELECT 1 FROM stocks AS s WHERE s.symbol = p.stock_symbol);
"#;

        let mut tx = database::get_tx().await?;

        let affected = match sqlx::query(reset).bind(job).execute(&mut *tx).await {
            Ok(r) => r.rows_affected(),
            Err(why) => {
                tx.rollback().await?;
                return Err(why).context(format!(
                    "Failed to PgProgressStore::reset_all({}) from database",
                    job
                ));
            }
        };

        if let Err(why) = sqlx::query(prune).bind(job).execute(&mut *tx).await {
            tx.rollback().await?;
            return Err(why).context(format!(
                "Failed to prune ingest_progress({}) from database",
                job
            ));
        }

        tx.commit().await?;

        Ok(affected)
    }

    async fn has_pending(&self, job: &str, filter: SymbolFilter) -> Result<bool> {
        let sql = r#"
SELECT EXISTS (
    SELECT 1
    FROM stocks AS s
    LEFT JOIN ingest_progress AS p
        ON p.stock_symbol = s.symbol AND p.job_key = $1
    WHERE COALESCE(p.processed, false) = false
      AND ($2 = false OR s.priority = true)
);
"#;

        sqlx::query_scalar::<_, bool>(sql)
            .bind(job)
            .bind(priority_only(filter))
            .fetch_one(database::get_connection()?)
            .await
            .context(format!(
                "Failed to PgProgressStore::has_pending({}, {}) from database",
                job, filter
            ))
    }

    async fn record_failures(
        &self,
        job: &str,
        symbols: &[String],
    ) -> Result<HashMap<String, u32>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = r#"
INSERT INTO ingest_progress
    (job_key, stock_symbol, processed, failed_runs, updated_at)
SELECT $1, symbol, false, 1, now()
FROM unnest($2::text[]) AS symbol
ON CONFLICT (job_key, stock_symbol)
DO UPDATE SET
    failed_runs = ingest_progress.failed_runs + 1,
    updated_at = now()
RETURNING stock_symbol, failed_runs;
"#;

        let rows = sqlx::query_as::<_, (String, i32)>(sql)
            .bind(job)
            .bind(symbols)
            .fetch_all(database::get_connection()?)
            .await
            .context(format!(
                "Failed to PgProgressStore::record_failures({}, {} symbols) from database",
                job,
                symbols.len()
            ))?;

        Ok(rows
            .into_iter()
            .map(|(symbol, runs)| (symbol, u32::try_from(runs).unwrap_or(0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::logging;

    use super::*;

    const JOB: &str = "test_job";

    #[test]
    fn test_sql_limit() {
        assert_eq!(sql_limit(None), None);
        assert_eq!(sql_limit(Some(1500)), Some(1500));
        assert_eq!(sql_limit(Some(usize::MAX)), Some(i64::MAX));
    }

    #[tokio::test]
    #[ignore]
    async fn test_progress_cycle() {
        dotenv::dotenv().ok();
        logging::debug_file_async("開始 PgProgressStore cycle".to_string());

        let store = PgProgressStore;
        store.reset_all(JOB).await.unwrap();

        let pending = store
            .list_pending(JOB, SymbolFilter::All, Some(2))
            .await
            .unwrap();
        logging::debug_file_async(format!("pending: {:?}", pending));
        assert!(pending.len() <= 2);

        let marked = store.mark_done(JOB, &pending).await.unwrap();
        assert_eq!(marked as usize, pending.len());

        let next = store
            .list_pending(JOB, SymbolFilter::All, Some(2))
            .await
            .unwrap();
        assert!(next.iter().all(|s| !pending.contains(s)));

        store.reset_all(JOB).await.unwrap();
        logging::debug_file_async("結束 PgProgressStore cycle".to_string());
    }

    #[tokio::test]
    #[ignore]
    async fn test_record_failures() {
        dotenv::dotenv().ok();

        let store = PgProgressStore;
        let symbols = store.list_symbols(SymbolFilter::All, Some(1)).await.unwrap();
        store.reset_all(JOB).await.unwrap();

        let first = store.record_failures(JOB, &symbols).await.unwrap();
        let second = store.record_failures(JOB, &symbols).await.unwrap();
        for symbol in &symbols {
            assert_eq!(first[symbol] + 1, second[symbol]);
        }

        store.reset_all(JOB).await.unwrap();
    }
}
