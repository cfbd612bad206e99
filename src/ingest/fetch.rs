use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use thiserror::Error;
use tokio::time::Instant;
use tokio_retry::{strategy::FixedInterval, Retry};

use crate::{
    ingest::{limiter::RateLimiter, FetchOutcome, WorkItem},
    logging,
    util::http,
};

/// 單一請求失敗的原因。所有失敗都會觸發重試，重試用盡後記錄在 [`FetchOutcome`] 中。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("batch dispatch failed: {0}")]
    Dispatch(String),
}

/// 每個請求的重試與逾時設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    /// 第一次失敗後最多再試幾次
    pub retries: usize,
    /// 每次重試前固定等待的時間
    pub retry_delay: Duration,
    /// `None` 時使用 HTTP client 的預設逾時
    pub timeout: Option<Duration>,
}

/// 送出單次 GET 請求；回傳 2xx 狀態碼，其他結果皆為錯誤
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, item: &WorkItem, timeout: Option<Duration>) -> Result<u16, FetchError>;
}

/// 以 reqwest 實作的 [`Fetcher`]，股票代號以 `symbol` query 參數帶入
pub struct HttpFetcher {
    client: Client,
    api_key: Option<String>,
}

impl HttpFetcher {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Ok(Self::with_client(http::get_client()?.clone(), api_key))
    }

    pub fn with_client(client: Client, api_key: Option<String>) -> Self {
        HttpFetcher {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, item: &WorkItem, timeout: Option<Duration>) -> Result<u16, FetchError> {
        let mut rb = self
            .client
            .get(item.endpoint.clone())
            .query(&[("symbol", item.symbol.as_str())]);

        if let Some(key) = &self.api_key {
            rb = rb.query(&[("apikey", key.as_str())]);
        }

        if let Some(t) = timeout {
            rb = rb.timeout(t);
        }

        let response = rb.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        // 讀完 body 才會把連線還給連線池
        match response.bytes().await {
            Ok(body) => {
                logging::debug_file_async(format!(
                    "GET {} symbol={} {} ({} bytes)",
                    item.endpoint,
                    item.symbol,
                    status.as_u16(),
                    body.len()
                ));
                Ok(status.as_u16())
            }
            Err(why) => Err(transport_error(why)),
        }
    }
}

/// reqwest 的錯誤內含完整網址（包括 `apikey`），轉換前先移除
fn transport_error(why: reqwest::Error) -> FetchError {
    if why.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(format!("{:?}", why.without_url()))
    }
}

/// 批次請求的派送者。
///
/// 單一請求的失敗都以 [`FetchOutcome`] 回傳，只有派送機制本身故障時才回傳 `Err`。
#[async_trait]
pub trait FetchPool: Send + Sync {
    async fn dispatch(&self, batch: &[WorkItem], policy: &RequestPolicy)
        -> Result<Vec<FetchOutcome>>;
}

/// 同一批次的請求全部並發送出，等到全部完成後依原順序回傳結果
pub struct ConcurrentFetchPool {
    fetcher: Arc<dyn Fetcher>,
    limiter: Arc<RateLimiter>,
}

impl ConcurrentFetchPool {
    pub fn new(fetcher: Arc<dyn Fetcher>, limiter: Arc<RateLimiter>) -> Self {
        ConcurrentFetchPool { fetcher, limiter }
    }
}

#[async_trait]
impl FetchPool for ConcurrentFetchPool {
    async fn dispatch(
        &self,
        batch: &[WorkItem],
        policy: &RequestPolicy,
    ) -> Result<Vec<FetchOutcome>> {
        let handles: Vec<_> = batch
            .iter()
            .cloned()
            .map(|item| {
                let fetcher = self.fetcher.clone();
                let limiter = self.limiter.clone();
                let policy = *policy;
                tokio::spawn(async move {
                    let result = fetch_with_retry(fetcher.as_ref(), &limiter, &item, &policy).await;
                    FetchOutcome::new(item, result)
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            outcomes.push(joined.map_err(|why| anyhow!("Failed to join fetch task: {:?}", why))?);
        }

        Ok(outcomes)
    }
}

/// 以固定間隔重試單一請求，重試用盡後回傳最後一次的錯誤
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    limiter: &RateLimiter,
    item: &WorkItem,
    policy: &RequestPolicy,
) -> Result<u16, FetchError> {
    let strategy = FixedInterval::new(policy.retry_delay).take(policy.retries);
    let timeout = policy.timeout;
    let mut attempt = 0u32;

    let action = move || {
        attempt += 1;
        let current = attempt;
        async move {
            limiter.acquire().await;
            let start = Instant::now();
            let result = fetcher.get(item, timeout).await;
            if let Err(why) = &result {
                logging::warn_file_async(format!(
                    "Attempt {} to GET {} symbol={} failed because {}. {} ms",
                    current,
                    item.endpoint,
                    item.symbol,
                    why,
                    start.elapsed().as_millis()
                ));
            }
            result
        }
    };

    Retry::spawn(strategy, action).await
}
