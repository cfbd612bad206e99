use std::{env, future::Future, sync::Arc};

use anyhow::{Error, Result};
use concat_string::concat_string;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::{ingest::ingestor::Ingestor, logging};

/// 啟動排程，每個工作依自己的 cron 觸發
pub async fn start(sched: &JobScheduler, ingestor: Arc<Ingestor>) -> Result<()> {
    //                 sec  min   hour   day of month   month   day of week   year
    //let expression = "0   30   9,12,15     1,15       May-Aug  Mon,Wed,Fri  2018/2";
    // UTC 時間
    for prepared in ingestor.jobs() {
        let name = prepared.name().to_string();
        let cron = prepared.job.cron.clone();
        let ingestor = Arc::clone(&ingestor);

        let job = create_job(&cron, move || {
            let ingestor = Arc::clone(&ingestor);
            let name = name.clone();
            async move {
                ingestor.execute(&name).await?;
                Ok(())
            }
        })?;

        sched.add(job).await?;
        logging::info_file_async(format!("{} scheduled at {}", prepared.name(), cron));
    }

    sched.start().await?;

    logging::info_file_async(concat_string!(
        "stock_ingestor 已啟動 Rust OS/Arch: ",
        env::consts::OS,
        "/",
        env::consts::ARCH
    ));

    Ok(())
}

fn create_job<F, Fut>(cron_expr: &str, task: F) -> Result<Job>
where
    F: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    let expr = cron_expr.to_string();
    Ok(Job::new_async(cron_expr, move |_uuid, _l| {
        let task = task.clone();
        let expr = expr.clone();
        Box::pin(async move {
            if let Err(why) = task().await {
                logging::error_file_async(format!(
                    "Failed to execute task({}) because {:?}",
                    expr, why
                ));
            }
        })
    })?)
}
