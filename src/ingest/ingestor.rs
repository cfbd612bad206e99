use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::{
    ingest::{
        cycle::CycleRunner,
        job::PreparedJob,
        summary::{RunSummary, SummarySink},
    },
    logging,
};

/// 所有排程工作的執行入口。
///
/// 每個工作有自己的執行鎖，前一次還沒跑完時新的觸發會被略過，
/// 避免兩個執行個體同時改寫同一批處理旗標。
pub struct Ingestor {
    runner: CycleRunner,
    jobs: Vec<PreparedJob>,
    locks: HashMap<String, Arc<Mutex<()>>>,
    sink: Arc<dyn SummarySink>,
}

impl Ingestor {
    pub fn new(runner: CycleRunner, jobs: Vec<PreparedJob>, sink: Arc<dyn SummarySink>) -> Self {
        let locks = jobs
            .iter()
            .map(|j| (j.name().to_string(), Arc::new(Mutex::new(()))))
            .collect();

        Ingestor {
            runner,
            jobs,
            locks,
            sink,
        }
    }

    pub fn jobs(&self) -> &[PreparedJob] {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<&PreparedJob> {
        self.jobs.iter().find(|j| j.name() == name)
    }

    /// 執行一次指定的工作；同名工作仍在執行時回傳 `Ok(None)`
    pub async fn execute(&self, name: &str) -> Result<Option<RunSummary>> {
        let prepared = self
            .job(name)
            .ok_or_else(|| anyhow!("unknown ingestion job {}", name))?;
        let lock = self
            .locks
            .get(name)
            .ok_or_else(|| anyhow!("no run lock for job {}", name))?;

        let Ok(_guard) = lock.try_lock() else {
            logging::warn_file_async(format!(
                "{} is still running, skip this invocation",
                name
            ));
            return Ok(None);
        };

        let summary = self.runner.run(prepared).await?;
        logging::info_file_async(summary.to_string());

        if let Err(why) = self.sink.record(&summary).await {
            logging::error_file_async(format!(
                "Failed to record run summary of {} because {:?}",
                name, why
            ));
        }

        Ok(Some(summary))
    }

    /// 同時觸發所有工作，共用同一個全域速率限制
    pub async fn execute_all(&self) -> Vec<(String, Result<Option<RunSummary>>)> {
        let runs = self.jobs.iter().map(|j| async move {
            let name = j.name().to_string();
            let result = self.execute(&name).await;
            (name, result)
        });

        join_all(runs).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use async_trait::async_trait;

    use crate::ingest::{
        cycle::DEFAULT_BATCH_PAUSE,
        fetch::{ConcurrentFetchPool, FetchError, Fetcher},
        job::IngestionJob,
        limiter::RateLimiter,
        progress::memory::MemoryProgressStore,
        testing::ScriptedFetcher,
        WorkItem,
    };

    use super::*;

    #[derive(Default)]
    struct CountingSink {
        recorded: AtomicUsize,
    }

    #[async_trait]
    impl SummarySink for CountingSink {
        async fn record(&self, _: &RunSummary) -> Result<()> {
            self.recorded.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("dashboard offline"))
        }
    }

    struct SlowFetcher;

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn get(&self, _: &WorkItem, _: Option<Duration>) -> Result<u16, FetchError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(200)
        }
    }

    fn ingestor(fetcher: Arc<dyn Fetcher>, sink: Arc<dyn SummarySink>) -> Ingestor {
        let store = Arc::new(MemoryProgressStore::with_symbols(["AAPL", "MSFT"]));
        let pool = Arc::new(ConcurrentFetchPool::new(
            fetcher,
            Arc::new(RateLimiter::unlimited()),
        ));
        let jobs = vec![
            IngestionJob::new("earnings", "0 0 3 * * *", &["earnings"], 10)
                .prepare("https://api.test/v3")
                .unwrap(),
            IngestionJob::new("dividends", "0 30 3 * * *", &["dividends"], 10)
                .prepare("https://api.test/v3")
                .unwrap(),
        ];

        Ingestor::new(CycleRunner::new(store, pool, DEFAULT_BATCH_PAUSE), jobs, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_records_summary_and_ignores_sink_error() {
        let sink = Arc::new(CountingSink::default());
        let ingestor = ingestor(Arc::new(ScriptedFetcher::always_ok()), sink.clone());

        let summary = ingestor.execute("earnings").await.unwrap().unwrap();

        assert_eq!(summary.symbols_marked_done, 2);
        assert_eq!(sink.recorded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_job_is_error() {
        let ingestor = ingestor(
            Arc::new(ScriptedFetcher::always_ok()),
            Arc::new(CountingSink::default()),
        );

        assert!(ingestor.execute("weather").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_invocation_is_skipped() {
        let ingestor = ingestor(Arc::new(SlowFetcher), Arc::new(CountingSink::default()));

        let (first, second) = tokio::join!(ingestor.execute("earnings"), ingestor.execute("earnings"));

        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_all_runs_every_job() {
        let fetcher = Arc::new(ScriptedFetcher::always_ok());
        let ingestor = ingestor(fetcher.clone(), Arc::new(CountingSink::default()));

        let results = ingestor.execute_all().await;

        let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["earnings", "dividends"]);
        assert!(results.iter().all(|(_, r)| matches!(r, Ok(Some(_)))));
        assert_eq!(fetcher.calls(), 4);
    }
}
