use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "stock_ingestor")]
#[command(about = "Scheduled, rate-limited ingestion of per-symbol market data")]
#[command(version)]
pub struct Cli {
    /// 未指定時以 `serve` 執行
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run every job on its cron schedule until Ctrl-C
    Serve,

    /// Run a single job once and print its summary
    Run {
        /// Job name, see `jobs`
        job: String,
    },

    /// Run every job once, concurrently
    RunAll,

    /// List the configured jobs
    Jobs,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
