use std::{collections::HashSet, env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Result};
use config::{Config as config_config, File as config_file};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{
    ingest::{
        catalog,
        job::{IngestionJob, PreparedJob},
    },
    logging,
};

const CONFIG_PATH: &str = "app.json";

#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct App {
    #[serde(default)]
    pub postgresql: PostgreSQL,
    #[serde(default)]
    pub ingest: Ingest,
}

const POSTGRESQL_HOST: &str = "POSTGRESQL_HOST";
const POSTGRESQL_PORT: &str = "POSTGRESQL_PORT";
const POSTGRESQL_USER: &str = "POSTGRESQL_USER";
const POSTGRESQL_PASSWORD: &str = "POSTGRESQL_PASSWORD";
const POSTGRESQL_DB: &str = "POSTGRESQL_DB";
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PostgreSQL {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_postgresql_port")]
    pub port: i32,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: String,
}

fn default_postgresql_port() -> i32 {
    5432
}

impl Default for PostgreSQL {
    fn default() -> Self {
        PostgreSQL {
            host: String::new(),
            port: default_postgresql_port(),
            user: String::new(),
            password: String::new(),
            db: String::new(),
        }
    }
}

const INGEST_API_BASE_URL: &str = "INGEST_API_BASE_URL";
const INGEST_API_KEY: &str = "INGEST_API_KEY";
const INGEST_GLOBAL_RATE_LIMIT: &str = "INGEST_GLOBAL_RATE_LIMIT";
const INGEST_BATCH_PAUSE_MS: &str = "INGEST_BATCH_PAUSE_MS";
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Ingest {
    /// 相對 endpoint 的前綴，例如 `https://financialmodelingprep.com/api/v3`
    #[serde(default)]
    pub api_base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// 所有工作共用的每秒請求上限，0 為不限
    #[serde(default = "default_global_rate_limit")]
    pub global_rate_limit: u32,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// 空白時使用內建的工作清單
    #[serde(default)]
    pub jobs: Vec<IngestionJob>,
}

fn default_global_rate_limit() -> u32 {
    30
}

fn default_batch_pause_ms() -> u64 {
    1000
}

impl Default for Ingest {
    fn default() -> Self {
        Ingest {
            api_base_url: String::new(),
            api_key: String::new(),
            global_rate_limit: default_global_rate_limit(),
            batch_pause_ms: default_batch_pause_ms(),
            jobs: Vec::new(),
        }
    }
}

impl Ingest {
    pub fn api_key(&self) -> Option<String> {
        if self.api_key.is_empty() {
            None
        } else {
            Some(self.api_key.clone())
        }
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// 設定檔內的工作，未設定時回傳內建清單
    pub fn jobs(&self) -> Vec<IngestionJob> {
        if self.jobs.is_empty() {
            catalog::defaults()
        } else {
            self.jobs.clone()
        }
    }

    /// 檢查全部工作並解析 endpoint，有任何一個設定錯誤就回傳錯誤
    pub fn prepare_jobs(&self) -> Result<Vec<PreparedJob>> {
        let mut names = HashSet::new();
        let mut prepared = Vec::new();

        for job in self.jobs() {
            if !names.insert(job.name.clone()) {
                bail!("duplicate ingestion job {}", job.name);
            }
            prepared.push(job.prepare(&self.api_base_url)?);
        }

        Ok(prepared)
    }
}

pub static SETTINGS: Lazy<App> = Lazy::new(|| match App::get() {
    Ok(app) => app,
    Err(why) => {
        logging::error_file_async(format!(
            "I can't read the config context because {:?}",
            why
        ));
        App::from_env()
    }
});

impl App {
    fn get() -> Result<Self, config::ConfigError> {
        let config_path = config_path();
        if config_path.exists() {
            let config: App = config_config::builder()
                .add_source(config_file::from(config_path))
                .build()?
                .try_deserialize()?;
            return Ok(config.override_with_env());
        }
        Ok(App::from_env())
    }

    /// 從 env 中讀取設定值
    fn from_env() -> Self {
        App::default().override_with_env()
    }

    /// 將來至於 env 的設定值覆蓋掉 json 上的設定值
    fn override_with_env(self) -> Self {
        self.override_with(|key| env::var(key).ok())
    }

    fn override_with<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(POSTGRESQL_HOST) {
            self.postgresql.host = host;
        }

        if let Some(port) = lookup(POSTGRESQL_PORT) {
            self.postgresql.port = i32::from_str(&port).unwrap_or(5432);
        }

        if let Some(user) = lookup(POSTGRESQL_USER) {
            self.postgresql.user = user;
        }

        if let Some(password) = lookup(POSTGRESQL_PASSWORD) {
            self.postgresql.password = password;
        }

        if let Some(db) = lookup(POSTGRESQL_DB) {
            self.postgresql.db = db;
        }

        if let Some(url) = lookup(INGEST_API_BASE_URL) {
            self.ingest.api_base_url = url;
        }

        if let Some(key) = lookup(INGEST_API_KEY) {
            self.ingest.api_key = key;
        }

        if let Some(limit) = lookup(INGEST_GLOBAL_RATE_LIMIT) {
            match u32::from_str(&limit) {
                Ok(limit) => self.ingest.global_rate_limit = limit,
                Err(why) => logging::warn_file_async(format!(
                    "ignore {}={} because {:?}",
                    INGEST_GLOBAL_RATE_LIMIT, limit, why
                )),
            }
        }

        if let Some(pause) = lookup(INGEST_BATCH_PAUSE_MS) {
            match u64::from_str(&pause) {
                Ok(pause) => self.ingest.batch_pause_ms = pause,
                Err(why) => logging::warn_file_async(format!(
                    "ignore {}={} because {:?}",
                    INGEST_BATCH_PAUSE_MS, pause, why
                )),
            }
        }

        self
    }
}

/// 回傳設定檔的路徑
fn config_path() -> PathBuf {
    PathBuf::from(CONFIG_PATH)
}
