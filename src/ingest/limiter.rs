use std::time::Duration;

use tokio::{sync::Mutex, time::Instant};

/// 行程內所有排程工作共用的 token bucket，每個請求送出前都要先取得 token。
pub struct RateLimiter {
    per_second: u32,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    refreshed_at: Instant,
}

impl RateLimiter {
    /// `per_second` 為 0 時不限制
    pub fn new(per_second: u32) -> Self {
        RateLimiter {
            per_second,
            bucket: Mutex::new(Bucket {
                tokens: per_second as f64,
                refreshed_at: Instant::now(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// 等到取得一個 token
    pub async fn acquire(&self) {
        if self.per_second == 0 {
            return;
        }

        let rate = self.per_second as f64;
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.refreshed_at).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * rate).min(rate);
                bucket.refreshed_at = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }

                Duration::from_secs_f64((1.0 - bucket.tokens) / rate)
            };

            tokio::time::sleep(wait).await;
        }
    }
}
