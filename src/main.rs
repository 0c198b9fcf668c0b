//! Kasen Reader：Kasen 漫画服务器的终端阅读器。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/重试/存储/章节链接等基础设施
//! - `network_parser`：Kasen 服务器 HTTP 接口
//! - `reader`：阅读核心（页面状态、预加载、翻页、视口追踪、阅读偏好）
//! - `ui`：TUI 与无 UI（命令行）两套交互

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::info;

mod base_system;
mod network_parser;
mod reader;
mod ui;

use base_system::chapter_link::{chapter_path, parse_chapter_link};
use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use ui::LaunchTarget;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "kasen-reader")]
#[command(about = "Kasen manga reader (Rust TUI)")]
struct Cli {
    /// 章节ID或链接，例如 42、/chapters/42/5 或完整的阅读页地址
    chapter: Option<String>,

    /// 从指定页开始阅读（覆盖链接中的页码和阅读记录）
    #[arg(long)]
    page: Option<usize>,

    /// 服务器地址，仅本次生效（不写回 config.yml）
    #[arg(long)]
    server: Option<String>,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 使用命令行模式（逐行输入命令）
    #[arg(long, default_value_t = false)]
    old_cli: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（用于存放 config.yml、logs 和阅读记录，方便 Docker 挂载）
    #[arg(long)]
    data_dir: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("Kasen Reader v{}", VERSION);
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref().map(Path::new);
    // 命令行模式没有日志框，不广播
    let log = init_logging(cli.debug, !cli.old_cli, data_dir)?;

    let mut config = load_or_create::<Config>(data_dir).context("加载配置失败")?;
    config.set_data_dir(data_dir);
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if cli.old_cli {
        config.old_cli = true;
    }

    let raw = match cli.chapter {
        Some(raw) => raw,
        None => prompt_chapter()?,
    };
    let link = parse_chapter_link(&raw).ok_or_else(|| anyhow!("无法识别的章节链接: {raw}"))?;
    let explicit_path = match cli.page {
        Some(page) => Some(chapter_path(link.chapter_id, page)),
        None => link.page.map(|_| link.path()),
    };
    let mut target = LaunchTarget {
        chapter_id: link.chapter_id,
        explicit_path,
    };
    info!(target: "startup", "Kasen Reader v{} | 服务器: {}", VERSION, config.server_base());
    info!(target: "startup", "日志目录: {}", log.logs_dir().display());

    loop {
        if config.old_cli {
            return ui::noui::run(&config, target);
        }

        match ui::tui::run(config.clone(), target)? {
            ui::tui::TuiExit::Quit => return Ok(()),
            ui::tui::TuiExit::SwitchToOldCli(next) => {
                config.old_cli = true;
                target = next;
            }
        }
    }
}

fn init_logging(debug: bool, broadcast_to_ui: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: false,
        broadcast_to_ui,
    };
    LogSystem::init(opts, base_dir).map_err(|e| anyhow!(e))
}

fn prompt_chapter() -> Result<String> {
    loop {
        print!("请输入章节ID或链接（q 退出）：");
        io::stdout().flush().ok();
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        let text = line.trim();
        if read == 0 || text.eq_ignore_ascii_case("q") {
            return Err(anyhow!("未指定章节"));
        }
        if !text.is_empty() {
            return Ok(text.to_string());
        }
    }
}
