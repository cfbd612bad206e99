use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use scopeguard::defer;

use crate::{
    ingest::{
        batcher,
        fetch::{FetchError, FetchPool},
        job::{ExhaustedPolicy, IngestionJob, PreparedJob},
        progress::{ProgressStore, ProgressTracker},
        summary::{CycleState, RunSummary},
        FetchOutcome, WorkItem,
    },
    logging,
};

/// 批次之間固定暫停的預設時間
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_secs(1);

/// 執行單次排程：取出待處理股票 → 切批次 → 並發請求 → 更新旗標。
///
/// 批次依序執行，每個批次結束後（最後一批除外）固定暫停 `batch_pause`，
/// 不扣除批次本身花費的時間。
pub struct CycleRunner {
    store: Arc<dyn ProgressStore>,
    pool: Arc<dyn FetchPool>,
    batch_pause: Duration,
}

impl CycleRunner {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        pool: Arc<dyn FetchPool>,
        batch_pause: Duration,
    ) -> Self {
        CycleRunner {
            store,
            pool,
            batch_pause,
        }
    }

    /// 只有無法取得待處理清單時回傳 `Err`，其餘失敗都記錄在 log 與彙總中
    pub async fn run(&self, prepared: &PreparedJob) -> Result<RunSummary> {
        let job = &prepared.job;
        let name = job.name.as_str();
        logging::info_file_async(format!("{} 開始", name));
        defer! {
            logging::info_file_async(format!("{} 結束", name));
        }

        let mut summary = RunSummary::start(name);
        let mut symbols = self.load_symbols(job).await?;

        if symbols.is_empty() {
            if !job.track_progress {
                return Ok(summary.finish());
            }

            match job.on_exhausted {
                ExhaustedPolicy::Idle => {
                    summary.state = CycleState::Exhausted;
                    return Ok(summary.finish());
                }
                ExhaustedPolicy::Reset => {
                    self.reset(name, &mut summary).await;
                    return Ok(summary.finish());
                }
                ExhaustedPolicy::ResetAndRun => {
                    self.reset(name, &mut summary).await;
                    if !summary.reset {
                        return Ok(summary.finish());
                    }
                    symbols = self.load_symbols(job).await?;
                    if symbols.is_empty() {
                        return Ok(summary.finish());
                    }
                }
            }
        }

        summary.symbols_attempted = symbols.len();
        let items = batcher::work_items(&symbols, &prepared.endpoints);
        summary.work_items = items.len();
        let batches = batcher::batches(items, prepared.rate_limit);
        summary.batches = batches.len();

        let policy = job.request_policy();
        let endpoint_count = prepared.endpoints.len();
        let mut tracker = if job.track_progress {
            ProgressTracker::new(
                self.store.as_ref(),
                name,
                job.progress_policy,
                endpoint_count,
            )
        } else {
            ProgressTracker::untracked(name, endpoint_count)
        };

        let total = batches.len();
        for (index, batch) in batches.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.batch_pause).await;
                summary.pauses += 1;
            }

            let outcomes = match self.pool.dispatch(batch, &policy).await {
                Ok(outcomes) => outcomes,
                Err(why) => {
                    logging::error_file_async(format!(
                        "{}: batch {}/{} dispatch failed, treating {} requests as failed. because {:?}",
                        name,
                        index + 1,
                        total,
                        batch.len(),
                        why
                    ));
                    summary.failed_batches += 1;
                    all_failed(batch, &why)
                }
            };

            let ok = outcomes.iter().filter(|o| o.is_success()).count();
            summary.requests_succeeded += ok;
            logging::debug_file_async(format!(
                "{}: batch {}/{} {}/{} requests ok",
                name,
                index + 1,
                total,
                ok,
                outcomes.len()
            ));

            tracker.settle(&outcomes).await;
        }

        tracker.finish().await;
        summary.symbols_succeeded = tracker.succeeded;
        summary.symbols_marked_done = tracker.marked_done;
        summary.symbols_forced = tracker.forced;
        summary.state = self.cycle_state(job).await;

        Ok(summary.finish())
    }

    async fn load_symbols(&self, job: &IngestionJob) -> Result<Vec<String>> {
        if job.track_progress {
            self.store
                .list_pending(&job.name, job.symbols, job.max_per_run)
                .await
                .with_context(|| format!("Failed to list pending symbols for {}", job.name))
        } else {
            self.store
                .list_symbols(job.symbols, job.max_per_run)
                .await
                .with_context(|| format!("Failed to list symbols for {}", job.name))
        }
    }

    async fn reset(&self, name: &str, summary: &mut RunSummary) {
        match self.store.reset_all(name).await {
            Ok(rows) => {
                logging::info_file_async(format!(
                    "{}: cycle exhausted, reset {} progress flags",
                    name, rows
                ));
                summary.reset = true;
                summary.state = CycleState::Idle;
            }
            Err(why) => {
                logging::error_file_async(format!(
                    "{}: failed to reset progress flags because {:?}",
                    name, why
                ));
                summary.state = CycleState::Exhausted;
            }
        }
    }

    async fn cycle_state(&self, job: &IngestionJob) -> CycleState {
        if !job.track_progress {
            return CycleState::Untracked;
        }

        match self.store.has_pending(&job.name, job.symbols).await {
            Ok(true) => CycleState::Draining,
            Ok(false) => CycleState::Exhausted,
            Err(why) => {
                logging::error_file_async(format!(
                    "{}: failed to check pending symbols because {:?}",
                    job.name, why
                ));
                CycleState::Draining
            }
        }
    }
}

fn all_failed(batch: &[WorkItem], why: &anyhow::Error) -> Vec<FetchOutcome> {
    let reason = format!("{:#}", why);
    batch
        .iter()
        .map(|item| FetchOutcome::new(item.clone(), Err(FetchError::Dispatch(reason.clone()))))
        .collect()
}
