use std::{num::NonZeroUsize, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use strum::Display;
use url::Url;

use crate::ingest::{
    fetch::RequestPolicy,
    progress::{ProgressPolicy, SymbolFilter},
};

/// 待處理清單為空時的動作
#[derive(Serialize, Deserialize, Display, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// 重設旗標後結束，下一次執行才開始新循環
    #[default]
    Reset,
    /// 重設旗標後在同一次執行內直接跑新循環
    ResetAndRun,
    /// 什麼都不做
    Idle,
}

/// 一個排程工作的完整設定。
///
/// 各個工作只差在 endpoint 清單、批次大小與進度策略，統一由同一個排程引擎執行。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IngestionJob {
    pub name: String,
    /// tokio-cron-scheduler 的 cron 表示式（含秒，UTC）
    pub cron: String,
    /// 絕對網址或相對於 `ingest.api_base_url` 的路徑
    pub endpoints: Vec<String>,
    /// 每批次並發請求數（每秒上限）
    pub rate_limit: usize,
    /// 每次執行最多處理的股票數，`None` 為不限
    #[serde(default)]
    pub max_per_run: Option<usize>,
    #[serde(default = "default_retries")]
    pub retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// `None` 時使用 HTTP client 的預設逾時
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub track_progress: bool,
    #[serde(default)]
    pub on_exhausted: ExhaustedPolicy,
    #[serde(default)]
    pub progress_policy: ProgressPolicy,
    #[serde(default)]
    pub symbols: SymbolFilter,
}

fn default_retries() -> usize {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl IngestionJob {
    pub fn new(name: &str, cron: &str, endpoints: &[&str], rate_limit: usize) -> Self {
        IngestionJob {
            name: name.to_string(),
            cron: cron.to_string(),
            endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
            rate_limit,
            max_per_run: None,
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: None,
            track_progress: true,
            on_exhausted: ExhaustedPolicy::default(),
            progress_policy: ProgressPolicy::default(),
            symbols: SymbolFilter::default(),
        }
    }

    pub fn max_per_run(mut self, max_per_run: usize) -> Self {
        self.max_per_run = Some(max_per_run);
        self
    }

    pub fn retry(mut self, retries: usize, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn untracked(mut self) -> Self {
        self.track_progress = false;
        self
    }

    pub fn policy(mut self, policy: ProgressPolicy) -> Self {
        self.progress_policy = policy;
        self
    }

    pub fn on_exhausted(mut self, on_exhausted: ExhaustedPolicy) -> Self {
        self.on_exhausted = on_exhausted;
        self
    }

    pub fn request_policy(&self) -> RequestPolicy {
        RequestPolicy {
            retries: self.retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }

    /// 檢查設定並把 endpoint 解析成完整網址
    pub fn prepare(&self, base_url: &str) -> Result<PreparedJob> {
        if self.name.trim().is_empty() {
            bail!("job name must not be empty");
        }

        let rate_limit = NonZeroUsize::new(self.rate_limit)
            .ok_or_else(|| anyhow!("job {}: rate_limit must be greater than zero", self.name))?;

        if self.max_per_run == Some(0) {
            bail!("job {}: max_per_run must be greater than zero", self.name);
        }

        if self.endpoints.is_empty() {
            bail!("job {}: at least one endpoint is required", self.name);
        }

        let endpoints = self
            .endpoints
            .iter()
            .map(|e| resolve_endpoint(base_url, e))
            .collect::<Result<Vec<Url>>>()
            .with_context(|| format!("job {}: invalid endpoint", self.name))?;

        Ok(PreparedJob {
            job: self.clone(),
            endpoints,
            rate_limit,
        })
    }
}

fn resolve_endpoint(base_url: &str, endpoint: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(endpoint) {
        return Ok(url);
    }

    if base_url.is_empty() {
        bail!("relative endpoint {} requires ingest.api_base_url", endpoint);
    }

    let base = if base_url.ends_with('/') {
        Url::parse(base_url)
    } else {
        Url::parse(&format!("{}/", base_url))
    }
    .with_context(|| format!("invalid api_base_url {}", base_url))?;

    base.join(endpoint.trim_start_matches('/'))
        .with_context(|| format!("invalid endpoint {}", endpoint))
}

/// 已檢查過、endpoint 已解析完成的工作
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub job: IngestionJob,
    pub endpoints: Vec<Url>,
    pub rate_limit: NonZeroUsize,
}

impl PreparedJob {
    pub fn name(&self) -> &str {
        &self.job.name
    }
}
