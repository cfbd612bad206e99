use std::{
    fmt::Write as _,
    sync::mpsc::{self, Receiver, Sender},
    thread,
};

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use strum::Display;

use crate::logging::rotate::Rotate;

pub mod rotate;

static LOGGER: Lazy<Logger> = Lazy::new(|| Logger::new("log/%Y-%m-%d-ingest.log".to_string()));

/// 單次寫檔前累積的最大位元組數
const FLUSH_THRESHOLD: usize = 4096;

#[derive(Display, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

pub struct LogMessage {
    pub level: Level,
    pub msg: String,
    pub created_at: DateTime<Local>,
}

impl LogMessage {
    pub fn new(level: Level, msg: String) -> Self {
        LogMessage {
            level,
            msg,
            created_at: Local::now(),
        }
    }
}

pub struct Logger {
    writer: Sender<LogMessage>,
}

impl Logger {
    /// `pattern` 為 chrono 格式的檔名，例如 `log/%Y-%m-%d-ingest.log`
    fn new(pattern: String) -> Self {
        let (tx, rx) = mpsc::channel::<LogMessage>();

        // 寫入檔案的操作使用另一個線程處理
        thread::spawn(move || Self::drain(Rotate::new(pattern), rx));

        Logger { writer: tx }
    }

    fn drain(mut rotate: Rotate, rx: Receiver<LogMessage>) {
        let mut together = String::with_capacity(FLUSH_THRESHOLD);

        while let Ok(first) = rx.recv() {
            let now = first.created_at;
            Self::append(&mut together, first);

            // 把 channel 中已排隊的訊息一次帶走，減少寫檔次數
            while together.len() < FLUSH_THRESHOLD {
                match rx.try_recv() {
                    Ok(next) => Self::append(&mut together, next),
                    Err(_) => break,
                }
            }

            if let Err(why) = rotate.write_msg(now, together.as_bytes()) {
                error_console(format!("Failed to write log file because {:?}", why));
                info_console(together.clone());
            }

            together.clear();
        }
    }

    fn append(buffer: &mut String, received: LogMessage) {
        if writeln!(
            buffer,
            "{} {} {}",
            received.created_at.format("%F %X%.6f"),
            received.level,
            received.msg
        )
        .is_err()
        {
            error_console("Failed to format a log line".to_string());
        }
    }

    fn send(&self, level: Level, msg: String) {
        if let Err(why) = self.writer.send(LogMessage::new(level, msg)) {
            error_console(why.to_string());
        }
    }
}

pub fn debug_file_async<S: Into<String>>(log: S) {
    LOGGER.send(Level::Debug, log.into());
}

pub fn info_file_async<S: Into<String>>(log: S) {
    LOGGER.send(Level::Info, log.into());
}

pub fn warn_file_async<S: Into<String>>(log: S) {
    LOGGER.send(Level::Warn, log.into());
}

pub fn error_file_async<S: Into<String>>(log: S) {
    LOGGER.send(Level::Error, log.into());
}

pub fn info_console<S: Into<String>>(log: S) {
    println!(
        "{} Info {}",
        Local::now().format("%Y-%m-%d %H:%M:%S.%3f"),
        log.into()
    );
}

pub fn error_console<S: Into<String>>(log: S) {
    eprintln!(
        "{} Error {}",
        Local::now().format("%Y-%m-%d %H:%M:%S.%3f"),
        log.into()
    );
}
