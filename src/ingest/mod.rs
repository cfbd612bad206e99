use url::Url;

use crate::ingest::fetch::FetchError;

/// 將股票代號清單切成符合速率上限的批次
pub mod batcher;
/// 內建的排程工作定義
pub mod catalog;
/// 單次排程的批次迴圈
pub mod cycle;
/// 並發 HTTP 請求池
pub mod fetch;
/// 對外提供的排程執行入口（鎖、彙總紀錄）
pub mod ingestor;
/// 排程工作設定
pub mod job;
/// 全域共用的請求速率限制
pub mod limiter;
/// 每檔股票在各排程工作中的完成進度
pub mod progress;
/// 每次執行的彙總紀錄
pub mod summary;

#[cfg(test)]
pub(crate) mod testing;

/// 一個 (endpoint, symbol) 組合，對應一次 HTTP 請求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub symbol: String,
    pub endpoint: Url,
}

impl WorkItem {
    pub fn new(symbol: impl Into<String>, endpoint: Url) -> Self {
        WorkItem {
            symbol: symbol.into(),
            endpoint,
        }
    }
}

/// 同一個速率視窗內並發送出的請求
pub type Batch = Vec<WorkItem>;

/// 單一 WorkItem 的請求結果，成功時為 HTTP 狀態碼
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub work_item: WorkItem,
    pub result: Result<u16, FetchError>,
}

impl FetchOutcome {
    pub fn new(work_item: WorkItem, result: Result<u16, FetchError>) -> Self {
        FetchOutcome { work_item, result }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn symbol(&self) -> &str {
        &self.work_item.symbol
    }
}
