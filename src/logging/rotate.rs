use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};

use crate::logging;

/// 預設單檔最大大小：10 MB
const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;
/// 預設保留天數：7 天
const DEFAULT_MAX_AGE_DAYS: u64 = 7;

/// 依日期與檔案大小輪轉的日誌寫入器。
///
/// 檔名由 `pattern` 經 `chrono` 格式化而來，同一天內超過 `max_size`
/// 時以世代編號續寫：`2026-10-14-ingest.log`、`2026-10-14-ingest.1.log`…
pub struct Rotate {
    pattern: String,
    base_fn: String,
    generation: u32,
    written: u64,
    max_size: u64,
    max_age: Duration,
    out: Option<BufWriter<File>>,
}

impl Rotate {
    pub fn new(pattern: String) -> Self {
        Self::with_options(pattern, DEFAULT_MAX_SIZE, DEFAULT_MAX_AGE_DAYS)
    }

    pub fn with_options(pattern: String, max_size: u64, max_age_days: u64) -> Self {
        Rotate {
            pattern,
            base_fn: String::new(),
            generation: 0,
            written: 0,
            max_size,
            max_age: Duration::from_secs(max_age_days * 24 * 60 * 60),
            out: None,
        }
    }

    /// 寫入訊息，必要時先切換日期或世代
    pub fn write_msg(&mut self, now: DateTime<Local>, msg: &[u8]) -> Result<()> {
        let base_fn = now.format(&self.pattern).to_string();
        if base_fn != self.base_fn || self.out.is_none() {
            self.base_fn = base_fn;
            self.generation = 0;
            self.open()?;
            self.remove_expired();
        }

        if self.written > 0 && self.written + msg.len() as u64 > self.max_size {
            self.generation += 1;
            self.open()?;
        }

        let out = self
            .out
            .as_mut()
            .ok_or_else(|| anyhow!("log file {} is not open", self.base_fn))?;
        out.write_all(msg)?;
        out.flush()?;
        self.written += msg.len() as u64;

        Ok(())
    }

    fn current_fn(&self) -> PathBuf {
        generation_fn(&self.base_fn, self.generation)
    }

    fn open(&mut self) -> Result<()> {
        if let Some(mut old) = self.out.take() {
            let _ = old.flush();
        }

        let filename = self.current_fn();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&filename)?;
        self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.out = Some(BufWriter::new(file));

        Ok(())
    }

    /// 刪除目錄內超過保留期限的舊檔
    fn remove_expired(&self) {
        let current = self.current_fn();
        let dir = match current.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(why) => {
                logging::error_console(format!(
                    "Failed to read log directory {} because {:?}",
                    dir.display(),
                    why
                ));
                return;
            }
        };

        let now = SystemTime::now();
        for path in entries.flatten().map(|e| e.path()) {
            if path == current || path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }

            let expired = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > self.max_age);

            if expired {
                if let Err(why) = fs::remove_file(&path) {
                    logging::error_console(format!(
                        "couldn't remove the file({}). because {:?}",
                        path.display(),
                        why
                    ));
                }
            }
        }
    }
}

impl Drop for Rotate {
    fn drop(&mut self) {
        if let Some(out) = self.out.as_mut() {
            let _ = out.flush();
        }
    }
}

/// generation = 0: "log/2026-10-14-ingest.log"
/// generation = 1: "log/2026-10-14-ingest.1.log"
fn generation_fn(base_fn: &str, generation: u32) -> PathBuf {
    if generation == 0 {
        return PathBuf::from(base_fn);
    }

    let path = Path::new(base_fn);
    let parent = path.parent().unwrap_or(Path::new(""));
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("log");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("log");

    parent.join(format!("{}.{}.{}", stem, generation, ext))
}
