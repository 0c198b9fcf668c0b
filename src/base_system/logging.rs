//! 日志系统：控制台、文件与 TUI 日志框三路输出。
//!
//! `logs/latest.log` 超过上限或程序退出时打包为 `log_<时间>.zip`，
//! 目录内只保留最近 [`KEEP_ARCHIVES`] 个压缩包。

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::{io, panic, thread, time::Duration};

use crossbeam_channel::{Receiver, Sender};
use crossterm::event::DisableMouseCapture;
use crossterm::execute;
use crossterm::terminal::{LeaveAlternateScreen, disable_raw_mode};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{error, info};
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024; // 10MB
const ARCHIVE_WAIT_MS: u64 = 300; // 等待 non_blocking 写线程落盘
pub const KEEP_ARCHIVES: usize = 10;

/// HTTP 栈的 debug 日志量很大，文件里只留 info 以上。
const NOISY_TARGETS: [&str; 4] = ["reqwest", "hyper", "hyper_util", "rustls"];

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("time formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    pub debug: bool,
    pub use_color: bool,
    pub archive_on_exit: bool,
    /// TUI 模式下关闭，避免日志直接写进备用屏幕。
    pub console: bool,
    pub broadcast_to_ui: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            archive_on_exit: true,
            console: true,
            broadcast_to_ui: false,
        }
    }
}

static LOG_CHANNEL: OnceLock<(Sender<String>, Receiver<String>)> = OnceLock::new();

/// TUI 日志框的数据源；未启用广播时为 None。
pub fn take_broadcast_rx() -> Option<Receiver<String>> {
    LOG_CHANNEL.get().map(|(_, rx)| rx.clone())
}

/// 丢弃积压的广播日志（没有日志框的前端调用，避免通道无限增长）。
pub fn discard_broadcast() -> usize {
    LOG_CHANNEL
        .get()
        .map(|(_, rx)| rx.try_iter().count())
        .unwrap_or(0)
}

#[derive(Clone)]
struct ChannelWriter {
    tx: Sender<String>,
}

impl io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf).trim_end().to_string();
        if !text.is_empty() {
            let _ = self.tx.send(text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ChannelWriter {
    type Writer = ChannelWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub struct LogSystem {
    runtime: Arc<LogRuntime>,
}

impl LogSystem {
    pub fn init(options: LogOptions, base_dir: Option<&Path>) -> Result<Self, LogError> {
        let logs_dir = base_dir
            .map(|dir| dir.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"));
        fs::create_dir_all(&logs_dir)?;
        let latest_log = logs_dir.join("latest.log");
        archive_if_large(&latest_log, &logs_dir)?;

        let (file_writer, guard) = non_blocking::NonBlockingBuilder::default()
            .lossy(false)
            .finish(rolling::never(&logs_dir, "latest.log"));

        let console_level = if options.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };

        let console_layer = options.console.then(|| {
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_ansi(options.use_color)
                .with_writer(BoxMakeWriter::new(io::stderr))
                .with_filter(console_level)
        });

        let broadcast_layer = options.broadcast_to_ui.then(|| {
            let (tx, _rx) = LOG_CHANNEL.get_or_init(crossbeam_channel::unbounded).clone();
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .without_time()
                .with_ansi(false)
                .with_writer(ChannelWriter { tx })
                .with_filter(console_level)
        });

        let file_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(file_targets());

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .with(broadcast_layer)
            .try_init()
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("global subscriber") || msg.contains("already") {
                    LogError::AlreadyInitialized
                } else {
                    LogError::SubscriberInit(e)
                }
            })?;

        let runtime = Arc::new(LogRuntime {
            logs_dir,
            latest_log,
            guard: Mutex::new(Some(guard)),
            exit_called: AtomicBool::new(false),
            archive_on_exit: options.archive_on_exit,
        });
        runtime.install_signal_handler();
        runtime.install_panic_hook();

        Ok(Self { runtime })
    }

    pub fn logs_dir(&self) -> &Path {
        &self.runtime.logs_dir
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.runtime.safe_exit();
    }
}

struct LogRuntime {
    logs_dir: PathBuf,
    latest_log: PathBuf,
    guard: Mutex<Option<WorkerGuard>>,
    exit_called: AtomicBool,
    archive_on_exit: bool,
}

impl LogRuntime {
    fn install_signal_handler(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let _ = ctrlc::set_handler(move || {
            restore_terminal();
            runtime.safe_exit();
            std::process::exit(0);
        });
    }

    fn install_panic_hook(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            restore_terminal();
            match info.location() {
                Some(location) => {
                    error!("panic at {}:{}: {}", location.file(), location.line(), info)
                }
                None => error!("panic: {info}"),
            }
            runtime.safe_exit();
            previous(info);
        }));
    }

    fn safe_exit(&self) {
        if self.exit_called.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.guard.lock() {
            guard.take();
        }
        if !self.archive_on_exit {
            return;
        }
        thread::sleep(Duration::from_millis(ARCHIVE_WAIT_MS));
        if let Err(err) = archive_log_file(&self.latest_log, &self.logs_dir) {
            eprintln!("日志归档失败: {err}");
        }
    }
}

fn file_targets() -> Targets {
    NOISY_TARGETS
        .iter()
        .fold(Targets::new().with_default(LevelFilter::DEBUG), |t, target| {
            t.with_target(*target, LevelFilter::INFO)
        })
}

/// 尽力恢复终端：TUI 处于 raw mode / 备用屏幕时直接退出会让终端“卡住”。
fn restore_terminal() {
    let _ = disable_raw_mode();
    let mut out = io::stdout();
    let _ = execute!(out, DisableMouseCapture, LeaveAlternateScreen);
}

fn archive_if_large(latest_log: &Path, logs_dir: &Path) -> Result<(), LogError> {
    if let Ok(meta) = fs::metadata(latest_log)
        && meta.len() >= MAX_LOG_BYTES
    {
        archive_log_file(latest_log, logs_dir)?;
    }
    Ok(())
}

fn archive_log_file(latest_log: &Path, logs_dir: &Path) -> Result<Option<PathBuf>, LogError> {
    if !latest_log.exists() {
        return Ok(None);
    }
    if fs::metadata(latest_log)?.len() == 0 {
        let _ = fs::remove_file(latest_log);
        return Ok(None);
    }

    let timestamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    let archive_path = logs_dir.join(format!("log_{timestamp}.zip"));

    let mut zip = zip::ZipWriter::new(File::create(&archive_path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(format!("{timestamp}.log"), options)?;
    io::copy(&mut File::open(latest_log)?, &mut zip)?;
    zip.finish()?;

    let _ = fs::remove_file(latest_log);
    info!("日志已归档: {}", archive_path.display());
    prune_archives(logs_dir, KEEP_ARCHIVES)?;
    Ok(Some(archive_path))
}

/// 删除多余的旧归档；文件名带时间戳，按名字排序即按时间排序。
fn prune_archives(logs_dir: &Path, keep: usize) -> Result<usize, LogError> {
    let mut archives: Vec<PathBuf> = fs::read_dir(logs_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("log_") && n.ends_with(".zip"))
        })
        .collect();
    if archives.len() <= keep {
        return Ok(0);
    }
    archives.sort();
    let stale = archives.len() - keep;
    for path in &archives[..stale] {
        let _ = fs::remove_file(path);
    }
    Ok(stale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_is_removed_without_archive() {
        let dir = tempfile::tempdir().unwrap();
        let latest = dir.path().join("latest.log");
        fs::write(&latest, "").unwrap();
        assert!(archive_log_file(&latest, dir.path()).unwrap().is_none());
        assert!(!latest.exists());
    }

    #[test]
    fn non_empty_log_is_zipped() {
        let dir = tempfile::tempdir().unwrap();
        let latest = dir.path().join("latest.log");
        fs::write(&latest, "INFO page 1 preloaded\n").unwrap();
        let archive = archive_log_file(&latest, dir.path()).unwrap().unwrap();
        assert!(archive.exists());
        assert!(!latest.exists());
    }

    #[test]
    fn discard_broadcast_empties_the_channel() {
        let (tx, rx) = LOG_CHANNEL.get_or_init(crossbeam_channel::unbounded).clone();
        let mut writer = ChannelWriter { tx };
        io::Write::write(&mut writer, b"INFO a\n").unwrap();
        io::Write::write(&mut writer, b"INFO b\n").unwrap();
        assert!(discard_broadcast() >= 2);
        assert!(rx.is_empty());
    }

    #[test]
    fn prune_keeps_newest_archives() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=4 {
            fs::write(dir.path().join(format!("log_2026010{day}_120000.zip")), "").unwrap();
        }
        fs::write(dir.path().join("latest.log"), "x").unwrap();

        assert_eq!(prune_archives(dir.path(), 2).unwrap(), 2);
        assert!(!dir.path().join("log_20260101_120000.zip").exists());
        assert!(!dir.path().join("log_20260102_120000.zip").exists());
        assert!(dir.path().join("log_20260104_120000.zip").exists());
        assert!(dir.path().join("latest.log").exists());
    }
}
