pub mod ingest_progress;
pub mod ingest_run_log;
