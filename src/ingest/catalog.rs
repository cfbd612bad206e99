use std::time::Duration;

use crate::ingest::{
    job::{ExhaustedPolicy, IngestionJob},
    progress::ProgressPolicy,
};

/// 沒有在 `app.json` 設定 `ingest.jobs` 時使用的預設工作。
///
/// cron 為 UTC 時間，時段錯開以免多個工作同時搶同一份額度。
pub fn defaults() -> Vec<IngestionJob> {
    let ten_seconds = Duration::from_secs(10);
    let one_second = Duration::from_secs(1);
    let two_seconds = Duration::from_secs(2);

    vec![
        // 每 15 分鐘更新全部股票的報價，不追蹤進度
        IngestionJob::new("quote", "0 */15 * * * *", &["quote"], 30)
            .retry(3, one_second)
            .timeout(ten_seconds)
            .untracked(),
        // 每小時更新公司基本資料
        IngestionJob::new("company_profile", "0 5 * * * *", &["profile"], 30)
            .max_per_run(600)
            .retry(2, two_seconds)
            .policy(ProgressPolicy::GatedThenForced),
        // 01:00 關鍵指標
        IngestionJob::new(
            "key_metrics",
            "0 0 1 * * *",
            &["key-metrics", "key-metrics-ttm"],
            30,
        )
        .max_per_run(1000)
        .retry(3, one_second)
        .timeout(ten_seconds)
        .policy(ProgressPolicy::GatedThenForced),
        // 01:30 財務比率
        IngestionJob::new("financial_ratios", "0 30 1 * * *", &["ratios", "ratios-ttm"], 30)
            .max_per_run(1000)
            .retry(3, one_second)
            .timeout(ten_seconds)
            .policy(ProgressPolicy::GatedThenForced),
        // 02:00 三大財務報表
        IngestionJob::new(
            "financial_statements",
            "0 0 2 * * *",
            &[
                "income-statement",
                "balance-sheet-statement",
                "cash-flow-statement",
            ],
            30,
        )
        .max_per_run(500)
        .retry(3, two_seconds)
        .timeout(ten_seconds)
        .policy(ProgressPolicy::GatedThenForced),
        // 03:00 盈餘公告
        IngestionJob::new("earnings", "0 0 3 * * *", &["earnings"], 25)
            .max_per_run(1500)
            .retry(2, one_second)
            .timeout(ten_seconds),
        // 03:30 股利
        IngestionJob::new("dividends", "0 30 3 * * *", &["dividends"], 25)
            .max_per_run(1500)
            .retry(2, one_second)
            .timeout(ten_seconds)
            .policy(ProgressPolicy::Unconditional),
        // 04:00 目標價
        IngestionJob::new(
            "price_target",
            "0 0 4 * * *",
            &["price-target-consensus", "price-target-summary"],
            30,
        )
        .max_per_run(1000)
        .retry(2, two_seconds)
        .policy(ProgressPolicy::GatedThenForced),
        // 04:30 分析師預估
        IngestionJob::new("analyst_estimates", "0 30 4 * * *", &["analyst-estimates"], 30)
            .max_per_run(1000)
            .retry(2, two_seconds)
            .policy(ProgressPolicy::SuccessGated),
        // 05:00 內部人交易
        IngestionJob::new("insider_trading", "0 0 5 * * *", &["insider-trading"], 20)
            .max_per_run(800)
            .retry(3, one_second)
            .timeout(ten_seconds),
        // 每 30 分鐘更新技術指標，整個清單跑完後同一次執行直接開始新循環
        IngestionJob::new(
            "technical_indicators",
            "0 */30 * * * *",
            &["technical-indicator/sma", "technical-indicator/rsi"],
            30,
        )
        .max_per_run(300)
        .retry(2, one_second)
        .timeout(ten_seconds)
        .policy(ProgressPolicy::Unconditional)
        .on_exhausted(ExhaustedPolicy::ResetAndRun),
    ]
}
