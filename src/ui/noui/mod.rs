//! 无 UI（命令行）阅读模式。
//!
//! 逐行读取命令驱动同一个章节会话；不显示图片，只报告页码与各页下载状态。

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError};
use crossterm::event::DisableMouseCapture;
use crossterm::execute;
use crossterm::terminal::{LeaveAlternateScreen, disable_raw_mode};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

mod commands;

use commands::{Command, parse_command};

use super::{LaunchTarget, load_preferences, open_session};
use crate::base_system::chapter_link::ChapterLink;
use crate::base_system::context::Config;
use crate::base_system::logging::discard_broadcast;
use crate::network_parser::api::KasenApi;
use crate::reader::models::ChapterInfo;
use crate::reader::page::PageStatus;
use crate::reader::preference::{PREFERENCE_FIELDS, PreferenceError, PreferenceStore};
use crate::reader::session::ChapterSession;

pub fn run(config: &Config, target: LaunchTarget) -> Result<()> {
    // 上次可能在 TUI 原始模式下退出，先尽量恢复终端，保证按行输入可用
    let _ = disable_raw_mode();
    let mut out = io::stdout();
    let _ = execute!(out, DisableMouseCapture, LeaveAlternateScreen);

    let api = Arc::new(KasenApi::new(config).context("init http client")?);
    println!(
        "Kasen Reader v{}（命令行模式）\n服务器: {}\n输入 h 查看命令。",
        env!("CARGO_PKG_VERSION"),
        api.base_url()
    );

    let input = Input::spawn()?;
    let prefs = load_preferences(config);
    let Some(mut session) =
        open_chapter(config, &api, &input, prefs, target.chapter_id, target.explicit_path)
    else {
        return Ok(());
    };

    loop {
        session.tick(Instant::now());
        print_position(&session);

        let Some(line) = input.prompt_while("> ", &mut session) else {
            // 标准输入已关闭
            println!();
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let binds = session.preferences().keybinds.clone();
        let command = if text == binds.previous_chapter {
            Ok(Command::PreviousChapter)
        } else if text == binds.next_chapter {
            Ok(Command::NextChapter)
        } else {
            parse_command(text)
        };
        let command = match command {
            Ok(command) => command,
            Err(msg) => {
                println!("{msg}");
                continue;
            }
        };

        let now = Instant::now();
        match command {
            Command::Quit => {
                println!("已退出。");
                break;
            }
            Command::First => report_move(session.first(now), "已经是第一页"),
            Command::Previous => report_move(session.prev(now), "已经是第一页"),
            Command::Next => {
                let moved = session.next(now);
                report_move(moved, "已经是最后一页");
                if !moved && let Some(next) = session.pagination().next.as_ref() {
                    println!("下一章: {}（输入 ] 进入）", next.label());
                }
            }
            Command::Last => report_move(session.last(now), "已经是最后一页"),
            Command::Jump(n) => {
                if !session.jump(n, now) && n != session.current_index() + 1 {
                    println!("页码无效: 1 ~ {}", session.page_count());
                }
            }
            Command::Retry(page) => {
                let index = page
                    .map(|n| n.saturating_sub(1))
                    .unwrap_or(session.current_index());
                if session.retry_page(index, now) {
                    println!("第 {} 页重新加入预加载", index + 1);
                } else {
                    println!("第 {} 页不是失败状态", index + 1);
                }
            }
            Command::Direction(direction) => {
                let next = direction.unwrap_or_else(|| session.direction().cycle());
                if let Err(err) = session.set_direction(next, now) {
                    warn!(target: "noui", "阅读方向保存失败: {err}");
                }
                println!("阅读方向: {}", next.label());
            }
            Command::Set { field, value } => match session.set_preference(&field, &value, now) {
                Ok(()) => println!(
                    "{field} = {}",
                    session.preferences().value_of(&field).unwrap_or_default()
                ),
                Err(PreferenceError::Store(err)) => {
                    println!("已修改，但保存失败（仅本次有效）: {err}")
                }
                Err(err) => println!("无法修改: {err}"),
            },
            Command::Prefs => print_preferences(&session),
            Command::Wait => wait_for_downloads(&mut session),
            Command::Info => print_pages(&session),
            Command::Chapters => print_chapters(&session),
            Command::PreviousChapter => {
                let target = session.pagination().previous.clone();
                session = switch_chapter(config, &api, session, target, "已经是第一章");
            }
            Command::NextChapter => {
                let target = session.pagination().next.clone();
                session = switch_chapter(config, &api, session, target, "已经是最新一章");
            }
            Command::Open(chapter_id) => {
                let prefs = session.into_preferences();
                let path = ChapterLink {
                    chapter_id,
                    page: None,
                }
                .path();
                match open_chapter(config, &api, &input, prefs, chapter_id, Some(path)) {
                    Some(next) => session = next,
                    None => return Ok(()),
                }
            }
            Command::Help => print_help(),
        }
    }

    Ok(())
}

/// 后台线程逐行读取标准输入，等待输入的同时主循环继续推进会话。
struct Input {
    lines: Receiver<String>,
}

impl Input {
    const POLL: Duration = Duration::from_millis(50);

    fn spawn() -> Result<Self> {
        let (tx, rx) = channel::unbounded();
        thread::Builder::new()
            .name("stdin".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .context("spawn stdin reader")?;
        Ok(Self { lines: rx })
    }

    /// 标准输入关闭时返回 None。
    fn prompt(&self, text: &str) -> Option<String> {
        print_prompt(text);
        self.lines.recv().ok()
    }

    /// 等待输入期间照常 tick：加载等待会结束，下载完成后空出的名额会被补上。
    fn prompt_while(&self, text: &str, session: &mut ChapterSession) -> Option<String> {
        print_prompt(text);
        loop {
            match self.lines.recv_timeout(Self::POLL) {
                Ok(line) => return Some(line),
                Err(RecvTimeoutError::Timeout) => {
                    session.tick(Instant::now());
                    discard_broadcast();
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

fn print_prompt(text: &str) {
    print!("{text}");
    io::stdout().flush().ok();
}

/// 加载章节并打开会话；失败时询问是否重试，放弃则返回 None。
fn open_chapter(
    config: &Config,
    api: &Arc<KasenApi>,
    input: &Input,
    prefs: PreferenceStore,
    chapter_id: i64,
    explicit_path: Option<String>,
) -> Option<ChapterSession> {
    loop {
        println!("正在加载章节 {chapter_id} ...");
        match api.load_reader_data(chapter_id) {
            Ok(data) => {
                println!("{}", data.chapter.label());
                return Some(open_session(config, api, data, prefs, explicit_path));
            }
            Err(err) => {
                println!("章节加载失败: {}", err.toast());
                let again = input.prompt("重试？(Y/n): ")?;
                if again.trim().eq_ignore_ascii_case("n") {
                    return None;
                }
            }
        }
    }
}

fn switch_chapter(
    config: &Config,
    api: &Arc<KasenApi>,
    session: ChapterSession,
    target: Option<ChapterInfo>,
    missing: &str,
) -> ChapterSession {
    let Some(chapter) = target else {
        println!("{missing}");
        return session;
    };
    match api.load_reader_data(chapter.id) {
        Ok(data) => {
            println!("{}", data.chapter.label());
            let prefs = session.into_preferences();
            let path = ChapterLink {
                chapter_id: chapter.id,
                page: None,
            }
            .path();
            open_session(config, api, data, prefs, Some(path))
        }
        Err(err) => {
            println!("章节加载失败: {}", err.toast());
            session
        }
    }
}

fn report_move(moved: bool, at_bound: &str) {
    if !moved {
        println!("{at_bound}");
    }
}

fn status_char(status: &PageStatus) -> char {
    match status {
        PageStatus::Idle => '.',
        PageStatus::Downloading => '~',
        PageStatus::Downloaded(_) => '#',
        PageStatus::Failed => 'x',
    }
}

fn status_label(status: &PageStatus) -> &'static str {
    match status {
        PageStatus::Idle => "等待",
        PageStatus::Downloading => "下载中",
        PageStatus::Downloaded(_) => "已下载",
        PageStatus::Failed => "失败",
    }
}

fn print_position(session: &ChapterSession) {
    let Some(page) = session.current_page() else {
        println!("本章没有页面");
        return;
    };
    let size = page
        .image()
        .map(|img| {
            let format = img
                .format()
                .and_then(|f| f.extensions_str().first().copied())
                .unwrap_or("未知格式");
            match img.dimensions() {
                Some((w, h)) => format!(" {w}x{h} {format}"),
                None if img.is_empty() => " 空文件".to_string(),
                None => format!(" {} 字节 {format}", img.len()),
            }
        })
        .unwrap_or_default();
    println!(
        "{} / {} 页 [{}{}]",
        page.number(),
        session.page_count(),
        status_label(page.status()),
        size
    );
}

fn print_pages(session: &ChapterSession) {
    let strip: String = session
        .pages()
        .iter()
        .map(|p| status_char(p.status()))
        .collect();
    println!("{}", session.title());
    println!("页面: {strip}");
    println!("      (. 等待  ~ 下载中  # 已下载  x 失败)");
    let queue: Vec<String> = session.queue().iter().map(|i| (i + 1).to_string()).collect();
    let pref = session.preferences();
    println!(
        "预加载队列: [{}] ({}/{})，进行中下载 {}/{}",
        queue.join(", "),
        queue.len(),
        pref.max_preloads,
        session.active_downloads(),
        pref.max_parallel
    );
    println!("位置: {}", session.location_path());
}

fn print_chapters(session: &ChapterSession) {
    if session.chapters().is_empty() {
        println!("没有章节列表");
        return;
    }
    let current = session.chapter().id;
    for chapter in session.chapters() {
        let marker = if chapter.id == current { "*" } else { " " };
        println!("{marker} {:>8}  {}", chapter.id, chapter.label());
    }
    println!("输入 o <章节ID> 打开章节");
}

fn print_preferences(session: &ChapterSession) {
    let pref = session.preferences();
    for field in PREFERENCE_FIELDS {
        println!("{field:<26} {}", pref.value_of(field).unwrap_or_default());
    }
    println!("修改: set <字段> <值>");
}

/// 阻塞直到预加载队列中的页全部下载结束，用进度条显示已下载页数。
fn wait_for_downloads(session: &mut ChapterSession) {
    let total = session.page_count() as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb.set_prefix("页面下载");

    loop {
        session.tick(Instant::now());
        let done = session.pages().iter().filter(|p| p.is_downloaded()).count() as u64;
        pb.set_position(done);
        if !session.is_loading() && !session.has_pending_downloads() {
            break;
        }
        session.wait_for_download(Duration::from_millis(100), Instant::now());
        discard_broadcast();
    }
    pb.finish_and_clear();

    let failed = session.pages().iter().filter(|p| p.is_failed()).count();
    if failed > 0 {
        println!("{failed} 页下载失败，可用 r <页码> 重试");
    }
}

fn print_help() {
    println!(
        "命令:\n\
  n / p            下一页 / 上一页\n\
  f / l            第一页 / 最后一页\n\
  <页码> | j <页码> 跳转\n\
  r [页码]         重试失败页（默认当前页）\n\
  d [ltr|rtl|ttb]  切换阅读方向\n\
  [ / ]            上一章 / 下一章（也可以输入绑定的按键）\n\
  c                章节列表\n\
  o <章节ID>       打开章节\n\
  i                页面下载状态\n\
  w                等待预加载完成\n\
  prefs            查看阅读偏好\n\
  set <字段> <值>  修改阅读偏好\n\
  q                退出"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::storage::MemoryStore;
    use crate::network_parser::api::{ApiError, ImageSource};
    use crate::reader::location::MemoryLocation;
    use crate::reader::models::ReaderData;
    use crate::reader::session::SessionOptions;

    struct Ready;

    impl ImageSource for Ready {
        fn fetch_image(&self, _chapter_id: i64, _file_name: &str) -> Result<Vec<u8>, ApiError> {
            Ok(vec![1, 2, 3])
        }
    }

    fn session() -> ChapterSession {
        let names = (1..=4).map(|i| format!("{i:03}.jpg")).collect();
        ChapterSession::open(
            ReaderData::standalone(1, names),
            PreferenceStore::load(Box::new(MemoryStore::new())),
            Box::new(MemoryLocation::new("/chapters/1")),
            Arc::new(Ready),
            SessionOptions {
                settle_delay: Duration::from_millis(100),
                ..SessionOptions::default()
            },
            Instant::now(),
        )
    }

    #[test]
    fn session_keeps_ticking_while_prompt_waits() {
        let (tx, rx) = channel::unbounded();
        let input = Input { lines: rx };
        let mut session = session();
        assert!(session.is_loading());

        let typist = thread::spawn(move || {
            thread::sleep(Duration::from_millis(600));
            tx.send("n".to_string()).unwrap();
        });
        let line = input.prompt_while("> ", &mut session);
        typist.join().unwrap();

        assert_eq!(line.as_deref(), Some("n"));
        assert!(!session.is_loading());
        assert!(session.pages().iter().any(|p| p.is_downloaded()));
    }

    #[test]
    fn closed_stdin_ends_the_prompt() {
        let (tx, rx) = channel::unbounded::<String>();
        drop(tx);
        let input = Input { lines: rx };
        let mut session = session();
        assert_eq!(input.prompt_while("> ", &mut session), None);
        assert_eq!(input.prompt("> "), None);
    }
}
