use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::ingest::progress::{ProgressStore, SymbolFilter, SymbolRegistryEntry};

/// 測試用的記憶體版 [`ProgressStore`]，可注入讀寫故障
#[derive(Default)]
pub struct MemoryProgressStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    symbols: Vec<SymbolRegistryEntry>,
    processed: HashSet<(String, String)>,
    failed_runs: HashMap<(String, String), u32>,
    resets: usize,
    read_fault: bool,
    write_fault: bool,
}

impl MemoryState {
    fn filtered(&self, filter: SymbolFilter) -> impl Iterator<Item = &SymbolRegistryEntry> {
        self.symbols
            .iter()
            .filter(move |e| filter == SymbolFilter::All || e.priority)
    }

    fn check_read(&self) -> Result<()> {
        if self.read_fault {
            return Err(anyhow!("symbol registry is unreachable"));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.write_fault {
            return Err(anyhow!("progress table is read-only"));
        }
        Ok(())
    }
}

fn take<I: Iterator<Item = String>>(iter: I, limit: Option<usize>) -> Vec<String> {
    match limit {
        Some(n) => iter.take(n).collect(),
        None => iter.collect(),
    }
}

impl MemoryProgressStore {
    /// 依傳入順序給定 id，皆非 priority
    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = symbols
            .into_iter()
            .enumerate()
            .map(|(i, s)| SymbolRegistryEntry::new(i as i64 + 1, s, false))
            .collect();
        Self::with_entries(entries)
    }

    pub fn with_entries(mut entries: Vec<SymbolRegistryEntry>) -> Self {
        entries.sort_by_key(|e| e.id);
        MemoryProgressStore {
            state: Mutex::new(MemoryState {
                symbols: entries,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // 測試中 panic 造成的 poison 不影響資料本身
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_read_fault(&self, fault: bool) {
        self.lock().read_fault = fault;
    }

    pub fn set_write_fault(&self, fault: bool) {
        self.lock().write_fault = fault;
    }

    /// 依 id 順序回傳已處理的股票代號
    pub fn processed(&self, job: &str) -> Vec<String> {
        let state = self.lock();
        state
            .symbols
            .iter()
            .filter(|e| state.processed.contains(&(job.to_string(), e.symbol.clone())))
            .map(|e| e.symbol.clone())
            .collect()
    }

    pub fn failed_runs(&self, job: &str, symbol: &str) -> u32 {
        self.lock()
            .failed_runs
            .get(&(job.to_string(), symbol.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn resets(&self) -> usize {
        self.lock().resets
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn list_pending(
        &self,
        job: &str,
        filter: SymbolFilter,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let state = self.lock();
        state.check_read()?;
        let pending = take(
            state
                .filtered(filter)
                .filter(|e| !state.processed.contains(&(job.to_string(), e.symbol.clone())))
                .map(|e| e.symbol.clone()),
            limit,
        );

        Ok(pending)
    }

    async fn list_symbols(
        &self,
        filter: SymbolFilter,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let state = self.lock();
        state.check_read()?;

        let symbols = take(state.filtered(filter).map(|e| e.symbol.clone()), limit);

        Ok(symbols)
    }

    async fn mark_done(&self, job: &str, symbols: &[String]) -> Result<u64> {
        let mut state = self.lock();
        state.check_write()?;
        for symbol in symbols {
            let key = (job.to_string(), symbol.clone());
            state.failed_runs.remove(&key);
            state.processed.insert(key);
        }

        Ok(symbols.len() as u64)
    }

    async fn reset_all(&self, job: &str) -> Result<u64> {
        let mut state = self.lock();
        state.check_write()?;
        let before = state.processed.len();
        state.processed.retain(|(j, _)| j != job);
        state.failed_runs.retain(|(j, _), _| j != job);
        state.resets += 1;

        Ok((before - state.processed.len()) as u64)
    }

    async fn has_pending(&self, job: &str, filter: SymbolFilter) -> Result<bool> {
        let state = self.lock();
        state.check_read()?;

        let pending = state
            .filtered(filter)
            .any(|e| !state.processed.contains(&(job.to_string(), e.symbol.clone())));

        Ok(pending)
    }

    async fn record_failures(
        &self,
        job: &str,
        symbols: &[String],
    ) -> Result<HashMap<String, u32>> {
        let mut state = self.lock();
        state.check_write()?;
        let mut counts = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            let count = state
                .failed_runs
                .entry((job.to_string(), symbol.clone()))
                .or_insert(0);
            *count += 1;
            counts.insert(symbol.clone(), *count);
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_in_id_order_with_limit() {
        let store = MemoryProgressStore::with_entries(vec![
            SymbolRegistryEntry::new(3, "GOOG", false),
            SymbolRegistryEntry::new(1, "AAPL", true),
            SymbolRegistryEntry::new(2, "MSFT", false),
        ]);

        let pending = store
            .list_pending("quote", SymbolFilter::All, Some(2))
            .await
            .unwrap();
        assert_eq!(pending, vec!["AAPL", "MSFT"]);

        let priority = store
            .list_symbols(SymbolFilter::PriorityOnly, None)
            .await
            .unwrap();
        assert_eq!(priority, vec!["AAPL"]);
    }

    #[tokio::test]
    async fn test_flags_are_per_job() {
        let store = MemoryProgressStore::with_symbols(["AAPL", "MSFT"]);
        store
            .mark_done("earnings", &["AAPL".to_string()])
            .await
            .unwrap();

        assert_eq!(
            store
                .list_pending("earnings", SymbolFilter::All, None)
                .await
                .unwrap(),
            vec!["MSFT"]
        );
        assert_eq!(
            store
                .list_pending("dividends", SymbolFilter::All, None)
                .await
                .unwrap(),
            vec!["AAPL", "MSFT"]
        );
    }

    #[tokio::test]
    async fn test_reset_all_only_touches_job() {
        let store = MemoryProgressStore::with_symbols(["AAPL", "MSFT"]);
        let all = vec!["AAPL".to_string(), "MSFT".to_string()];
        store.mark_done("earnings", &all).await.unwrap();
        store.mark_done("dividends", &all).await.unwrap();
        assert!(!store.has_pending("earnings", SymbolFilter::All).await.unwrap());

        assert_eq!(store.reset_all("earnings").await.unwrap(), 2);
        assert!(store.has_pending("earnings", SymbolFilter::All).await.unwrap());
        assert!(!store.has_pending("dividends", SymbolFilter::All).await.unwrap());
        assert_eq!(store.resets(), 1);
    }

    #[tokio::test]
    async fn test_read_fault() {
        let store = MemoryProgressStore::with_symbols(["AAPL"]);
        store.set_read_fault(true);

        assert!(store
            .list_pending("quote", SymbolFilter::All, None)
            .await
            .is_err());
    }
}
