use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{ingest::FetchOutcome, logging};

#[cfg(test)]
pub(crate) mod memory;

/// 股票代號註冊表中的一筆資料，`id` 由小到大即為處理順序
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRegistryEntry {
    pub id: i64,
    pub symbol: String,
    pub priority: bool,
}

#[cfg(test)]
impl SymbolRegistryEntry {
    pub fn new(id: i64, symbol: impl Into<String>, priority: bool) -> Self {
        SymbolRegistryEntry {
            id,
            symbol: symbol.into(),
            priority,
        }
    }
}

/// 取股票代號時的篩選條件
#[derive(Serialize, Deserialize, Display, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SymbolFilter {
    #[default]
    All,
    PriorityOnly,
}

/// 股票代號來源與每個排程工作的處理旗標。
///
/// 同一個工作不可同時有兩個執行個體寫入旗標，排程端以執行鎖保證。
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// 依 id 由小到大取出尚未處理的股票代號，`limit` 為 `None` 時全部取出
    async fn list_pending(
        &self,
        job: &str,
        filter: SymbolFilter,
        limit: Option<usize>,
    ) -> Result<Vec<String>>;

    /// 依 id 由小到大取出所有股票代號，不看處理旗標
    async fn list_symbols(&self, filter: SymbolFilter, limit: Option<usize>)
        -> Result<Vec<String>>;

    /// 標記為已處理，並清除連續失敗次數
    async fn mark_done(&self, job: &str, symbols: &[String]) -> Result<u64>;

    /// 將該工作的所有旗標重設為未處理，開始新的循環
    async fn reset_all(&self, job: &str) -> Result<u64>;

    async fn has_pending(&self, job: &str, filter: SymbolFilter) -> Result<bool>;

    /// 連續失敗次數加一，回傳更新後的次數
    async fn record_failures(&self, job: &str, symbols: &[String])
        -> Result<HashMap<String, u32>>;
}

/// 批次結束後哪些股票可以標記為已處理
#[derive(Serialize, Deserialize, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProgressPolicy {
    /// 至少一個 endpoint 成功才標記，失敗的留待下次重試
    SuccessGated,
    /// 不論成功與否全部標記
    Unconditional,
    /// 批次中先標記成功者，本次執行結束時再把失敗者一併標記
    GatedThenForced,
    /// 同 `SuccessGated`，但連續失敗達 `max_failed_runs` 次的股票強制標記
    FailureBudget { max_failed_runs: u32 },
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        ProgressPolicy::FailureBudget { max_failed_runs: 3 }
    }
}

#[derive(Default)]
struct SymbolState {
    resolved: usize,
    succeeded: bool,
    settled: bool,
}

/// 單次執行中彙整每檔股票在所有 endpoint 的結果，並寫回處理旗標。
///
/// 旗標寫入失敗只記錄 log，該股票維持未處理，下一次執行會再被取出。
pub struct ProgressTracker<'a> {
    store: Option<&'a dyn ProgressStore>,
    job: &'a str,
    policy: ProgressPolicy,
    endpoints_per_symbol: usize,
    symbols: HashMap<String, SymbolState>,
    deferred: Vec<String>,
    pub succeeded: usize,
    pub marked_done: usize,
    pub forced: usize,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(
        store: &'a dyn ProgressStore,
        job: &'a str,
        policy: ProgressPolicy,
        endpoints_per_symbol: usize,
    ) -> Self {
        Self::build(Some(store), job, policy, endpoints_per_symbol)
    }

    /// 不追蹤進度的工作只統計成功數，不寫入旗標
    pub fn untracked(job: &'a str, endpoints_per_symbol: usize) -> Self {
        Self::build(
            None,
            job,
            ProgressPolicy::Unconditional,
            endpoints_per_symbol,
        )
    }

    fn build(
        store: Option<&'a dyn ProgressStore>,
        job: &'a str,
        policy: ProgressPolicy,
        endpoints_per_symbol: usize,
    ) -> Self {
        ProgressTracker {
            store,
            job,
            policy,
            endpoints_per_symbol: endpoints_per_symbol.max(1),
            symbols: HashMap::new(),
            deferred: Vec::new(),
            succeeded: 0,
            marked_done: 0,
            forced: 0,
        }
    }

    /// 處理一個批次的結果
    pub async fn settle(&mut self, outcomes: &[FetchOutcome]) {
        let mut in_batch: Vec<String> = Vec::new();
        let mut succeeded: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for outcome in outcomes {
            let symbol = outcome.symbol();
            let state = self.symbols.entry(symbol.to_string()).or_default();
            state.resolved += 1;

            if !in_batch.iter().any(|s| s == symbol) {
                in_batch.push(symbol.to_string());
            }

            if outcome.is_success() && !state.succeeded {
                state.succeeded = true;
                self.succeeded += 1;
                if !state.settled {
                    state.settled = true;
                    succeeded.push(symbol.to_string());
                }
            } else if !state.succeeded
                && !state.settled
                && state.resolved >= self.endpoints_per_symbol
            {
                state.settled = true;
                failed.push(symbol.to_string());
            }
        }

        if self.store.is_none() {
            return;
        }

        match self.policy {
            ProgressPolicy::Unconditional => {
                // 跨批次的股票只要第一次出現就標記
                let fresh: Vec<String> = in_batch
                    .into_iter()
                    .filter(|s| !self.deferred.contains(s))
                    .collect();
                self.marked_done += self.persist(&fresh).await;
                self.deferred.extend(fresh);
            }
            ProgressPolicy::SuccessGated => {
                self.marked_done += self.persist(&succeeded).await;
            }
            ProgressPolicy::GatedThenForced => {
                self.marked_done += self.persist(&succeeded).await;
                self.deferred.extend(failed);
            }
            ProgressPolicy::FailureBudget { max_failed_runs } => {
                self.marked_done += self.persist(&succeeded).await;
                self.apply_failure_budget(&failed, max_failed_runs).await;
            }
        }
    }

    /// 本次執行結束，`GatedThenForced` 在這裡把失敗者強制標記
    pub async fn finish(&mut self) {
        if self.store.is_none() || self.policy != ProgressPolicy::GatedThenForced {
            return;
        }

        let deferred = std::mem::take(&mut self.deferred);
        if deferred.is_empty() {
            return;
        }

        logging::warn_file_async(format!(
            "{}: force-completing {} symbols without a successful response: {:?}",
            self.job,
            deferred.len(),
            deferred
        ));
        let marked = self.persist(&deferred).await;
        self.marked_done += marked;
        self.forced += marked;
    }

    async fn apply_failure_budget(&mut self, failed: &[String], max_failed_runs: u32) {
        let Some(store) = self.store else {
            return;
        };
        if failed.is_empty() {
            return;
        }

        let counts = match store.record_failures(self.job, failed).await {
            Ok(counts) => counts,
            Err(why) => {
                logging::error_file_async(format!(
                    "{}: failed to record failures for {:?} because {:?}",
                    self.job, failed, why
                ));
                return;
            }
        };

        let exhausted: Vec<String> = failed
            .iter()
            .filter(|s| counts.get(*s).is_some_and(|c| *c >= max_failed_runs))
            .cloned()
            .collect();
        if exhausted.is_empty() {
            return;
        }

        logging::warn_file_async(format!(
            "{}: {:?} failed {} consecutive runs, force-completing",
            self.job, exhausted, max_failed_runs
        ));
        let marked = self.persist(&exhausted).await;
        self.marked_done += marked;
        self.forced += marked;
    }

    async fn persist(&self, symbols: &[String]) -> usize {
        let Some(store) = self.store else {
            return 0;
        };
        if symbols.is_empty() {
            return 0;
        }

        match store.mark_done(self.job, symbols).await {
            Ok(_) => symbols.len(),
            Err(why) => {
                logging::error_file_async(format!(
                    "{}: failed to mark {:?} done because {:?}",
                    self.job, symbols, why
                ));
                0
            }
        }
    }
}
