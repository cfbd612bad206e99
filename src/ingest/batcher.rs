use std::num::NonZeroUsize;

use url::Url;

use crate::ingest::{Batch, WorkItem};

/// 產生 symbols × endpoints 的請求清單。
///
/// 外層為股票代號、內層為 endpoint，這個順序決定了哪些請求會落在同一個批次。
pub fn work_items(symbols: &[String], endpoints: &[Url]) -> Vec<WorkItem> {
    let mut items = Vec::with_capacity(symbols.len() * endpoints.len());
    for symbol in symbols {
        for endpoint in endpoints {
            items.push(WorkItem::new(symbol.as_str(), endpoint.clone()));
        }
    }

    items
}

/// 依 `rate_limit` 將請求切成批次，保持原本順序，最後一批為餘數
pub fn batches(items: Vec<WorkItem>, rate_limit: NonZeroUsize) -> Vec<Batch> {
    let size = rate_limit.get();
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);

    for item in items {
        current.push(item);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}
