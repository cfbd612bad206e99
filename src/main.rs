use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tokio_cron_scheduler::JobScheduler;

use crate::{
    cli::{Cli, Command},
    database::table::{ingest_progress::PgProgressStore, ingest_run_log::RunLogSink},
    ingest::{
        cycle::CycleRunner,
        fetch::{ConcurrentFetchPool, HttpFetcher},
        ingestor::Ingestor,
        job::PreparedJob,
        limiter::RateLimiter,
    },
};

pub mod cli;
pub mod config;
pub mod database;
pub mod ingest;
pub mod logging;
pub mod scheduler;
pub mod util;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match run(cli.command()).await {
        Ok(code) => code,
        Err(why) => {
            logging::error_file_async(format!("{:?}", why));
            logging::error_console(format!("{:?}", why));
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<ExitCode> {
    let jobs = config::SETTINGS.ingest.prepare_jobs()?;

    if command == Command::Jobs {
        print_jobs(&jobs);
        return Ok(ExitCode::SUCCESS);
    }

    let ingestor = build_ingestor(jobs)?;

    match command {
        Command::Serve => serve(Arc::new(ingestor)).await,
        Command::Run { job } => match ingestor.execute(&job).await? {
            Some(summary) => {
                logging::info_console(summary.to_string());
                Ok(ExitCode::SUCCESS)
            }
            None => {
                logging::info_console(format!("{} is already running", job));
                Ok(ExitCode::SUCCESS)
            }
        },
        Command::RunAll => {
            let mut code = ExitCode::SUCCESS;
            for (name, result) in ingestor.execute_all().await {
                match result {
                    Ok(Some(summary)) => logging::info_console(summary.to_string()),
                    Ok(None) => logging::info_console(format!("{} is already running", name)),
                    Err(why) => {
                        logging::error_console(format!("{}: {:?}", name, why));
                        code = ExitCode::FAILURE;
                    }
                }
            }
            Ok(code)
        }
        Command::Jobs => Ok(ExitCode::SUCCESS),
    }
}

fn build_ingestor(jobs: Vec<PreparedJob>) -> Result<Ingestor> {
    let settings = &config::SETTINGS.ingest;
    let fetcher = Arc::new(HttpFetcher::new(settings.api_key())?);
    let limiter = Arc::new(RateLimiter::new(settings.global_rate_limit));
    let pool = Arc::new(ConcurrentFetchPool::new(fetcher, limiter));
    let runner = CycleRunner::new(Arc::new(PgProgressStore), pool, settings.batch_pause());

    Ok(Ingestor::new(runner, jobs, Arc::new(RunLogSink)))
}

async fn serve(ingestor: Arc<Ingestor>) -> Result<ExitCode> {
    let mut sched = JobScheduler::new().await?;
    scheduler::start(&sched, ingestor).await?;

    tokio::signal::ctrl_c().await?;
    logging::info_console("shutting down");
    sched.shutdown().await?;

    Ok(ExitCode::SUCCESS)
}

fn print_jobs(jobs: &[PreparedJob]) {
    for prepared in jobs {
        let job = &prepared.job;
        let endpoints: Vec<&str> = prepared.endpoints.iter().map(|u| u.as_str()).collect();
        println!(
            "{:<22} {:<16} rate {:>3}/s  max {:>5}  {}  {}",
            job.name,
            job.cron,
            prepared.rate_limit,
            job.max_per_run
                .map(|m| m.to_string())
                .unwrap_or_else(|| "all".to_string()),
            if job.track_progress {
                job.progress_policy.to_string()
            } else {
                "untracked".to_string()
            },
            endpoints.join(", ")
        );
    }
}
