use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use url::Url;

use crate::ingest::{
    fetch::{FetchError, FetchPool, Fetcher, RequestPolicy},
    FetchOutcome, WorkItem,
};

pub(crate) fn endpoint(name: &str) -> Url {
    Url::parse(&format!("https://api.test/{}", name)).unwrap()
}

pub(crate) fn item(symbol: &str, name: &str) -> WorkItem {
    WorkItem::new(symbol, endpoint(name))
}

type Script = dyn Fn(&WorkItem) -> Result<u16, FetchError> + Send + Sync;

/// 依規則回應的假 Fetcher，並記錄所有收到的請求
pub(crate) struct ScriptedFetcher {
    script: Box<Script>,
    calls: AtomicUsize,
    seen: Mutex<Vec<WorkItem>>,
}

impl ScriptedFetcher {
    pub(crate) fn new<F>(script: F) -> Self
    where
        F: Fn(&WorkItem) -> Result<u16, FetchError> + Send + Sync + 'static,
    {
        ScriptedFetcher {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always_ok() -> Self {
        Self::new(|_| Ok(200))
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen_symbols(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.symbol.clone())
            .collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn get(&self, item: &WorkItem, _: Option<Duration>) -> Result<u16, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(item.clone());
        (self.script)(item)
    }
}

/// 指定第幾次 dispatch 直接故障的 pool，其他批次交給內層 pool
pub(crate) struct FaultyPool<P> {
    inner: P,
    fail_on: usize,
    dispatched: AtomicUsize,
    batches: Mutex<Vec<Vec<WorkItem>>>,
}

impl<P: FetchPool> FaultyPool<P> {
    /// `fail_on` 為 1-based 的批次序號
    pub(crate) fn new(inner: P, fail_on: usize) -> Self {
        FaultyPool {
            inner,
            fail_on,
            dispatched: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn batches(&self) -> Vec<Vec<WorkItem>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl<P: FetchPool> FetchPool for FaultyPool<P> {
    async fn dispatch(
        &self,
        batch: &[WorkItem],
        policy: &RequestPolicy,
    ) -> Result<Vec<FetchOutcome>> {
        let n = self.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
        self.batches.lock().unwrap().push(batch.to_vec());
        if n == self.fail_on {
            return Err(anyhow!("connection pool exhausted"));
        }

        self.inner.dispatch(batch, policy).await
    }
}
