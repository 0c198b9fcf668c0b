//! 终端阅读界面。
//!
//! 主循环与旧版下载器一致：处理工作线程消息 → 拉取日志 → 推进会话 → 绘制 → 处理输入。
//! 章节数据在后台线程加载，加载期间新的章节切换请求会被忽略。

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{self as channel, Receiver, Sender};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
    MouseButton, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction as LayoutDirection, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, ListState, Paragraph, Wrap};
use tracing::{debug, info, warn};

mod page_view;
mod settings;
mod sidebar;

use super::{LaunchTarget, load_preferences, open_session};
use crate::base_system::chapter_link::{ChapterLink, chapter_path};
use crate::base_system::context::Config;
use crate::base_system::logging::take_broadcast_rx;
use crate::network_parser::api::KasenApi;
use crate::reader::coalesce::{ActionGuard, ActionTicket};
use crate::reader::models::{ChapterInfo, ReaderData};
use crate::reader::preference::{KeyAction, Preference, PreferenceError, PreferenceStore};
use crate::reader::session::{ChapterSession, ScrollRequest};

#[derive(Debug)]
pub enum TuiExit {
    Quit,
    /// 切换到命令行模式，继续阅读同一章节。
    SwitchToOldCli(LaunchTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Reader,
    Settings,
    Help,
}

enum WorkerMsg {
    ChapterLoaded {
        load_id: u64,
        data: ReaderData,
        explicit_path: Option<String>,
    },
    ChapterFailed {
        load_id: u64,
        chapter_id: i64,
        error: String,
        interrupted: bool,
    },
}

impl WorkerMsg {
    fn load_id(&self) -> u64 {
        match self {
            WorkerMsg::ChapterLoaded { load_id, .. } | WorkerMsg::ChapterFailed { load_id, .. } => {
                *load_id
            }
        }
    }
}

struct App {
    config: Config,
    api: Arc<KasenApi>,
    view: View,
    status: String,
    logs: Vec<String>,
    exit: Option<TuiExit>,
    needs_draw: bool,

    // reader
    session: Option<ChapterSession>,
    /// 没有会话（首个章节尚未加载完）时由这里持有偏好。
    idle_prefs: Option<PreferenceStore>,
    art: page_view::ArtCache,
    page_scroll: u16,
    page_scroll_max: u16,
    pending_scroll: Option<ScrollRequest>,
    jump_input: Option<String>,
    last_reader_area: Option<Rect>,
    last_chapter_list: Option<Rect>,
    sidebar_state: ListState,

    // settings
    settings_state: ListState,
    settings_edit: Option<String>,

    // worker
    worker_tx: Sender<WorkerMsg>,
    worker_rx: Receiver<WorkerMsg>,
    chapter_guard: ActionGuard,
    chapter_ticket: Option<ActionTicket>,
    /// 每次加载递增；中断后迟到的结果按编号丢弃。
    load_id: u64,

    // spinner
    spinner_active: bool,
    spinner_text: String,
    spinner_idx: usize,
    spinner_last: Instant,

    // log
    log_rx: Option<Receiver<String>>,
}

impl App {
    fn new(config: Config, api: Arc<KasenApi>) -> Self {
        let (worker_tx, worker_rx) = channel::unbounded();
        let mut settings_state = ListState::default();
        settings_state.select(Some(0));
        let idle_prefs = Some(load_preferences(&config));

        Self {
            config,
            api,
            view: View::Reader,
            status: "翻页: ←/→  跳页: g  设置: o  帮助: ?  退出: q".to_string(),
            logs: Vec::new(),
            exit: None,
            needs_draw: true,
            session: None,
            idle_prefs,
            art: page_view::ArtCache::default(),
            page_scroll: 0,
            page_scroll_max: 0,
            pending_scroll: None,
            jump_input: None,
            last_reader_area: None,
            last_chapter_list: None,
            sidebar_state: ListState::default(),
            settings_state,
            settings_edit: None,
            worker_tx,
            worker_rx,
            chapter_guard: ActionGuard::new(),
            chapter_ticket: None,
            load_id: 0,
            spinner_active: false,
            spinner_text: String::new(),
            spinner_idx: 0,
            spinner_last: Instant::now(),
            log_rx: take_broadcast_rx(),
        }
    }

    fn push_log(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        let trimmed = msg.trim_end_matches(['\r', '\n']);
        self.logs.push(trimmed.to_string());
        if self.logs.len() > 200 {
            let overflow = self.logs.len() - 200;
            self.logs.drain(0..overflow);
        }
    }

    fn preferences(&self) -> Option<&Preference> {
        match self.session.as_ref() {
            Some(session) => Some(session.preferences()),
            None => self.idle_prefs.as_ref().map(PreferenceStore::get),
        }
    }

    /// 修改一个偏好字段；有会话时交给会话处理方向切换等副作用。
    fn set_preference(&mut self, field: &str, value: &str) -> Result<(), PreferenceError> {
        let now = Instant::now();
        match (self.session.as_mut(), self.idle_prefs.as_mut()) {
            (Some(session), _) => session.set_preference(field, value, now),
            (None, Some(prefs)) => prefs.set(field, value),
            (None, None) => Ok(()),
        }
    }
}

pub fn run(config: Config, target: LaunchTarget) -> Result<TuiExit> {
    let api = Arc::new(KasenApi::new(&config).context("init http client")?);

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("init terminal")?;

    let result = run_loop(&mut terminal, App::new(config, api), target);

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), DisableMouseCapture, LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    mut app: App,
    target: LaunchTarget,
) -> Result<TuiExit> {
    start_chapter_load(&mut app, target.chapter_id, target.explicit_path);

    loop {
        tick_spinner(&mut app);
        poll_worker(&mut app);
        drain_log_channel(&mut app);
        tick_session(&mut app);

        if app.needs_draw {
            terminal.draw(|f| draw_ui(f, &mut app))?;
            app.needs_draw = false;
            apply_scroll_requests(&mut app);
        }

        if !handle_event(&mut app)? {
            break;
        }
    }

    Ok(app.exit.take().unwrap_or(TuiExit::Quit))
}

fn draw_ui(frame: &mut ratatui::Frame, app: &mut App) {
    match app.view {
        View::Reader => page_view::draw_reader(frame, app),
        View::Settings => settings::draw_settings(frame, app),
        View::Help => draw_help(frame, app),
    }
}

/// 事件轮询的最长等待；会话有更早到期的工作时提前醒来。
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn poll_timeout(app: &App) -> Duration {
    app.session
        .as_ref()
        .and_then(ChapterSession::next_deadline)
        .map(|due| due.saturating_duration_since(Instant::now()).min(POLL_INTERVAL))
        .unwrap_or(POLL_INTERVAL)
}

fn handle_event(app: &mut App) -> Result<bool> {
    if !event::poll(poll_timeout(app)).context("poll event")? {
        return Ok(true);
    }

    let evt = event::read().context("read event")?;
    app.needs_draw = true;
    if let Event::Key(key) = &evt
        && key.kind == KeyEventKind::Press
        && key.modifiers.contains(KeyModifiers::CONTROL)
        && key.code == KeyCode::Char('c')
    {
        app.exit = Some(TuiExit::Quit);
        return Ok(false);
    }

    match app.view {
        View::Reader => handle_event_reader(app, evt)?,
        View::Settings => settings::handle_event_settings(app, evt)?,
        View::Help => handle_event_help(app, evt),
    }

    Ok(app.exit.is_none())
}

fn handle_event_reader(app: &mut App, event: Event) -> Result<()> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => {
            if app.jump_input.is_some() {
                handle_jump_input(app, key.code);
                return Ok(());
            }
            if let Some(name) = key_name(key.code)
                && let Some(action) = app.preferences().and_then(|p| p.keybinds.action_for(&name))
            {
                run_key_action(app, action);
                return Ok(());
            }
            handle_reader_key(app, key.code);
        }
        Event::Mouse(me) => handle_mouse_reader(app, me),
        Event::Resize(_, _) => {}
        _ => {}
    }
    Ok(())
}

fn handle_reader_key(app: &mut App, code: KeyCode) {
    let now = Instant::now();
    match code {
        KeyCode::Esc if app.chapter_ticket.is_some() => interrupt_chapter_load(app),
        KeyCode::Char('q') | KeyCode::Esc => app.exit = Some(TuiExit::Quit),
        KeyCode::Char('?') | KeyCode::Char('h') => app.view = View::Help,
        KeyCode::Char('o') => {
            app.view = View::Settings;
            app.status = "↑/↓ 选择，Enter 修改，Esc 返回".to_string();
        }
        KeyCode::Char('c') => {
            if let Some(session) = app.session.as_ref() {
                let target = LaunchTarget {
                    chapter_id: session.chapter().id,
                    explicit_path: Some(chapter_path(
                        session.chapter().id,
                        session.current_index() + 1,
                    )),
                };
                app.exit = Some(TuiExit::SwitchToOldCli(target));
            }
        }
        KeyCode::Char('g') => {
            if app.session.is_some() {
                app.jump_input = Some(String::new());
                app.status = "输入页码后按 Enter 跳转，Esc 取消".to_string();
            }
        }
        KeyCode::Char('r') => retry_current(app),
        KeyCode::Char('d') => cycle_direction(app),
        KeyCode::Char('s') => toggle_sidebar(app),
        KeyCode::Home => {
            if let Some(session) = app.session.as_mut() {
                session.first(now);
            }
        }
        KeyCode::End => {
            if let Some(session) = app.session.as_mut() {
                session.last(now);
            }
        }
        KeyCode::Up => scroll_by(app, -1),
        KeyCode::Down => scroll_by(app, 1),
        KeyCode::PageUp => scroll_by(app, -i64::from(reader_rows(app))),
        KeyCode::PageDown => scroll_by(app, i64::from(reader_rows(app))),
        _ => {}
    }
}

fn handle_jump_input(app: &mut App, code: KeyCode) {
    let Some(buffer) = app.jump_input.as_mut() else {
        return;
    };
    match code {
        KeyCode::Char(c) if c.is_ascii_digit() => buffer.push(c),
        KeyCode::Backspace => {
            buffer.pop();
        }
        KeyCode::Esc => {
            app.jump_input = None;
            app.status = "取消跳转".to_string();
        }
        KeyCode::Enter => {
            let input = app.jump_input.take().unwrap_or_default();
            let Some(session) = app.session.as_mut() else {
                return;
            };
            match input.parse::<usize>() {
                Ok(n) if (1..=session.page_count()).contains(&n) => {
                    session.jump(n, Instant::now());
                }
                _ => {
                    app.status = format!("页码无效: 1 ~ {}", session.page_count());
                }
            }
        }
        _ => {}
    }
}

fn run_key_action(app: &mut App, action: KeyAction) {
    let now = Instant::now();
    match action {
        KeyAction::PreviousPage => {
            if let Some(session) = app.session.as_mut() {
                session.prev(now);
            }
        }
        KeyAction::NextPage => {
            if let Some(session) = app.session.as_mut() {
                session.next(now);
            }
        }
        KeyAction::PreviousChapter => {
            let target = app
                .session
                .as_ref()
                .and_then(|s| s.pagination().previous.clone());
            switch_chapter(app, target, "已经是第一章");
        }
        KeyAction::NextChapter => {
            let target = app
                .session
                .as_ref()
                .and_then(|s| s.pagination().next.clone());
            switch_chapter(app, target, "已经是最新一章");
        }
    }
}

fn handle_mouse_reader(app: &mut App, me: event::MouseEvent) {
    let pos_in = |area: Rect, col: u16, row: u16| {
        col >= area.x && col < area.x + area.width && row >= area.y && row < area.y + area.height
    };
    match me.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            if let Some(list) = app.last_chapter_list
                && pos_in(list, me.column, me.row)
            {
                if let Some(chapter) = sidebar::chapter_at(app, list, me.row) {
                    switch_chapter(app, Some(chapter), "");
                }
                return;
            }
            let Some(area) = app.last_reader_area else {
                return;
            };
            if !pos_in(area, me.column, me.row) {
                return;
            }
            if let Some(session) = app.session.as_mut()
                && !session.direction().is_scroll()
            {
                session.click(me.column - area.x, area.width, Instant::now());
            }
        }
        MouseEventKind::ScrollUp => scroll_by(app, -3),
        MouseEventKind::ScrollDown => scroll_by(app, 3),
        _ => {}
    }
}

fn handle_event_help(app: &mut App, event: Event) {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => app.view = View::Reader,
        Event::Mouse(me) if matches!(me.kind, MouseEventKind::Down(_)) => app.view = View::Reader,
        _ => {}
    }
}

/// crossterm 键码转成与偏好里按键绑定一致的键名。
fn key_name(code: KeyCode) -> Option<String> {
    let name = match code {
        KeyCode::Char(' ') => "Space".to_string(),
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Left => "ArrowLeft".to_string(),
        KeyCode::Right => "ArrowRight".to_string(),
        KeyCode::Up => "ArrowUp".to_string(),
        KeyCode::Down => "ArrowDown".to_string(),
        KeyCode::PageUp => "PageUp".to_string(),
        KeyCode::PageDown => "PageDown".to_string(),
        KeyCode::Home => "Home".to_string(),
        KeyCode::End => "End".to_string(),
        KeyCode::Enter => "Enter".to_string(),
        KeyCode::Backspace => "Backspace".to_string(),
        KeyCode::Tab => "Tab".to_string(),
        KeyCode::F(n) => format!("F{n}"),
        _ => return None,
    };
    Some(name)
}

fn reader_rows(app: &App) -> u16 {
    app.last_reader_area
        .map(|a| a.height.saturating_sub(2))
        .unwrap_or(10)
        .max(1)
}

fn scroll_by(app: &mut App, delta: i64) {
    let rows = reader_rows(app);
    let Some(session) = app.session.as_mut() else {
        return;
    };
    let now = Instant::now();
    if session.direction().is_scroll() {
        let max = session.layout().total_height().saturating_sub(u32::from(rows));
        let top = (i64::from(session.scroll_top()) + delta).clamp(0, i64::from(max)) as u32;
        session.on_scroll(top, true, now);
    } else {
        let next = (i64::from(app.page_scroll) + delta).clamp(0, i64::from(app.page_scroll_max));
        app.page_scroll = next as u16;
        session.on_scroll(u32::from(app.page_scroll), true, now);
    }
}

fn retry_current(app: &mut App) {
    let Some(session) = app.session.as_mut() else {
        return;
    };
    let index = session.current_index();
    if session.retry_page(index, Instant::now()) {
        app.status = format!("第 {} 页重新下载", index + 1);
    } else {
        app.status = "当前页没有失败，无需重试".to_string();
    }
}

fn cycle_direction(app: &mut App) {
    let Some(session) = app.session.as_mut() else {
        return;
    };
    let next = session.direction().cycle();
    if let Err(err) = session.set_direction(next, Instant::now()) {
        warn!(target: "tui", "阅读方向保存失败: {err}");
    }
    app.page_scroll = 0;
    app.status = format!("阅读方向: {}", next.label());
}

fn toggle_sidebar(app: &mut App) {
    let shown = app.preferences().map(|p| p.show_sidebar).unwrap_or(false);
    let value = if shown { "false" } else { "true" };
    if let Err(err) = app.set_preference("showSidebar", value) {
        warn!(target: "tui", "侧边栏设置保存失败: {err}");
    }
}

fn switch_chapter(app: &mut App, target: Option<ChapterInfo>, missing: &str) {
    let Some(chapter) = target else {
        if !missing.is_empty() {
            app.status = missing.to_string();
        }
        return;
    };
    if app.session.as_ref().is_some_and(|s| s.chapter().id == chapter.id) {
        return;
    }
    let path = ChapterLink {
        chapter_id: chapter.id,
        page: None,
    }
    .path();
    start_chapter_load(app, chapter.id, Some(path));
}

fn start_chapter_load(app: &mut App, chapter_id: i64, explicit_path: Option<String>) {
    let Some(ticket) = app.chapter_guard.try_begin() else {
        app.status = "章节加载中，请稍候".to_string();
        return;
    };
    app.chapter_ticket = Some(ticket);
    app.load_id += 1;
    let load_id = app.load_id;
    start_spinner(app, format!("正在加载章节 {chapter_id}（Esc 中断）"));

    let api = Arc::clone(&app.api);
    let tx = app.worker_tx.clone();
    thread::spawn(move || {
        let msg = match api.load_reader_data(chapter_id) {
            Ok(data) => WorkerMsg::ChapterLoaded {
                load_id,
                data,
                explicit_path,
            },
            Err(err) => WorkerMsg::ChapterFailed {
                load_id,
                chapter_id,
                error: err.toast(),
                interrupted: err.is_interrupted(),
            },
        };
        let _ = tx.send(msg);
    });
}

fn interrupt_chapter_load(app: &mut App) {
    app.chapter_ticket = None;
    app.load_id += 1;
    stop_spinner(app);
    info!(target: "tui", "用户中断了章节加载");
    app.status = "章节加载已中断".to_string();
    app.needs_draw = true;
}

fn poll_worker(app: &mut App) {
    while let Ok(msg) = app.worker_rx.try_recv() {
        if msg.load_id() != app.load_id {
            debug!(target: "tui", load_id = msg.load_id(), "丢弃已中断的章节加载结果");
            continue;
        }
        app.chapter_ticket = None;
        app.needs_draw = true;
        stop_spinner(app);
        match msg {
            WorkerMsg::ChapterLoaded {
                data,
                explicit_path,
                ..
            } => {
                let prefs = match app.session.take() {
                    Some(previous) => previous.into_preferences(),
                    None => app
                        .idle_prefs
                        .take()
                        .unwrap_or_else(|| load_preferences(&app.config)),
                };
                info!(target: "tui", "已打开 {}", data.chapter.label());
                app.art.clear();
                app.page_scroll = 0;
                app.pending_scroll = None;

                let session = open_session(&app.config, &app.api, data, prefs, explicit_path);
                let current_id = session.chapter().id;
                app.sidebar_state
                    .select(session.chapters().iter().position(|c| c.id == current_id));
                app.status = session.title();
                app.session = Some(session);
            }
            WorkerMsg::ChapterFailed {
                chapter_id,
                error,
                interrupted,
                ..
            } => {
                let what = if interrupted { "加载中断" } else { "加载失败" };
                warn!(target: "tui", "章节 {chapter_id} {what}: {error}");
                app.status = format!("章节 {chapter_id} {what}: {error}");
            }
        }
    }
}

fn tick_session(app: &mut App) {
    let Some(session) = app.session.as_mut() else {
        return;
    };
    if session.tick(Instant::now()) {
        app.needs_draw = true;
    }
}

/// 会话发出的滚动请求在绘制之后处理，这时布局已经是最新的。
fn apply_scroll_requests(app: &mut App) {
    let Some(session) = app.session.as_mut() else {
        return;
    };
    let request = session.take_scroll_request().or(app.pending_scroll.take());
    let Some(request) = request else {
        return;
    };
    let now = Instant::now();
    if session.direction().is_scroll() {
        match session.scroll_offset_for(&request) {
            Some(offset) => {
                session.on_scroll(offset, false, now);
                app.needs_draw = true;
            }
            None => app.pending_scroll = Some(request),
        }
    } else {
        app.page_scroll = u16::try_from(request.offset).unwrap_or(u16::MAX);
        app.needs_draw = true;
    }
}

const SPINNER_FRAMES: &[char] = &['|', '/', '-', '\\'];

const LOG_HEIGHT: u16 = 7;

/// 侧边栏宽度（列）。
const SIDEBAR_WIDTH: u16 = 32;

fn start_spinner(app: &mut App, text: impl Into<String>) {
    app.spinner_active = true;
    app.spinner_text = text.into();
    app.spinner_idx = 0;
    app.spinner_last = Instant::now();
    app.status = format!("{} {}", app.spinner_text, SPINNER_FRAMES[app.spinner_idx]);
}

fn stop_spinner(app: &mut App) {
    app.spinner_active = false;
    app.spinner_text.clear();
}

fn tick_spinner(app: &mut App) {
    if !app.spinner_active {
        return;
    }
    if app.spinner_last.elapsed() < Duration::from_millis(140) {
        return;
    }
    app.spinner_idx = (app.spinner_idx + 1) % SPINNER_FRAMES.len();
    app.spinner_last = Instant::now();
    app.status = format!("{} {}", app.spinner_text, SPINNER_FRAMES[app.spinner_idx]);
    app.needs_draw = true;
}

fn split_with_log(area: Rect) -> (Rect, Rect) {
    let layout = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Min(LOG_HEIGHT.max(4)),
            Constraint::Length(LOG_HEIGHT),
        ])
        .split(area);
    (layout[0], layout[1])
}

fn render_log_box(frame: &mut ratatui::Frame, area: Rect, app: &App) {
    let mut lines = Vec::new();
    if app.logs.is_empty() {
        lines.push(Line::from("日志: 暂无"));
    } else {
        let visible = area.height.saturating_sub(2).max(1) as usize;
        lines.extend(
            app.logs
                .iter()
                .rev()
                .take(visible)
                .rev()
                .map(|m| style_log_line(m)),
        );
    }

    let log = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("日志"));
    frame.render_widget(log, area);
}

fn render_status(frame: &mut ratatui::Frame, area: Rect, app: &App) {
    let text = match app.jump_input.as_ref() {
        Some(buffer) => format!("跳转到第 {buffer}_ 页"),
        None => app.status.clone(),
    };
    let status = Paragraph::new(Line::from(Span::styled(
        text,
        Style::default().fg(Color::Yellow),
    )));
    frame.render_widget(status, area);
}

fn draw_help(frame: &mut ratatui::Frame, app: &mut App) {
    let (main, log_area) = split_with_log(frame.size());
    let binds = app.preferences().map(|p| p.keybinds.clone()).unwrap_or_default();
    let key = |k: &str| Span::styled(k.to_string(), Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    let rows = [
        (format!("{} / {}", binds.previous_page, binds.next_page), "上一页 / 下一页"),
        (format!("{} / {}", binds.previous_chapter, binds.next_chapter), "上一章 / 下一章"),
        ("Home / End".to_string(), "第一页 / 最后一页"),
        ("g".to_string(), "跳转到指定页"),
        ("↑ ↓ PgUp PgDn 滚轮".to_string(), "滚动"),
        ("鼠标左键".to_string(), "点击左半边上一页，右半边下一页（从右到左时相反）"),
        ("r".to_string(), "重试当前失败页"),
        ("d".to_string(), "切换阅读方向"),
        ("s".to_string(), "显示/隐藏侧边栏"),
        ("o".to_string(), "阅读设置"),
        ("c".to_string(), "切换到命令行模式"),
        ("q".to_string(), "退出"),
    ];
    let lines: Vec<Line> = rows
        .iter()
        .map(|(k, desc)| Line::from(vec![key(k), Span::raw("  "), Span::raw(*desc)]))
        .collect();
    let help = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("按键说明（任意键返回）"))
        .alignment(Alignment::Left);
    frame.render_widget(help, main);
    render_log_box(frame, log_area, app);
}

fn style_log_line(line: &str) -> Line<'static> {
    let mut parts = line.split_whitespace();
    let ts = parts.next().unwrap_or("");
    let level = parts.next().unwrap_or("").to_ascii_uppercase();
    let rest: Vec<&str> = parts.collect();

    let mut spans: Vec<Span<'static>> = Vec::new();
    if !ts.is_empty() {
        spans.push(Span::styled(
            ts.to_string(),
            Style::default().fg(Color::DarkGray),
        ));
    }

    if !level.is_empty() {
        let color = match level.as_str() {
            "ERROR" => Color::Red,
            "WARN" => Color::Yellow,
            "INFO" => Color::Cyan,
            "DEBUG" | "TRACE" => Color::Gray,
            _ => Color::White,
        };
        if !spans.is_empty() {
            spans.push(Span::raw(" "));
        }
        spans.push(Span::styled(
            level,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
    }

    if let Some(target) = rest.first()
        && !target.is_empty()
    {
        if !spans.is_empty() {
            spans.push(Span::raw(" "));
        }
        spans.push(Span::styled(
            (*target).to_string(),
            Style::default().fg(Color::LightBlue),
        ));
    }

    let message = rest.iter().skip(1).copied().collect::<Vec<_>>().join(" ");
    if !message.is_empty() {
        if !spans.is_empty() {
            spans.push(Span::raw(" "));
        }
        spans.push(Span::raw(message));
    }

    Line::from(spans)
}

fn drain_log_channel(app: &mut App) {
    let Some(rx) = app.log_rx.clone() else {
        return;
    };
    for line in rx.try_iter() {
        app.push_log(line);
        app.needs_draw = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_match_default_bindings() {
        let binds = crate::reader::preference::Keybinds::default();
        let left = key_name(KeyCode::Left).unwrap();
        assert_eq!(binds.action_for(&left), Some(KeyAction::PreviousPage));
        let dot = key_name(KeyCode::Char('.')).unwrap();
        assert_eq!(binds.action_for(&dot), Some(KeyAction::NextChapter));
        assert_eq!(key_name(KeyCode::Char(' ')).as_deref(), Some("Space"));
        assert_eq!(key_name(KeyCode::Null), None);
    }

    #[test]
    fn log_lines_are_split_into_styled_spans() {
        let line = style_log_line("12:00:01 WARN prefetch 第 3 页预加载失败");
        let text: Vec<String> = line.spans.iter().map(|s| s.content.to_string()).collect();
        assert_eq!(text[0], "12:00:01");
        assert!(text.contains(&"WARN".to_string()));
        assert!(text.contains(&"prefetch".to_string()));
        assert_eq!(text.last().unwrap(), "第 3 页预加载失败");
    }

    #[test]
    fn interrupted_load_drops_the_late_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.set_data_dir(Some(dir.path()));
        let api = Arc::new(KasenApi::new(&config).unwrap());
        let mut app = App::new(config, api);

        app.chapter_ticket = app.chapter_guard.try_begin();
        app.load_id = 1;
        interrupt_chapter_load(&mut app);
        assert!(!app.chapter_guard.is_busy());

        app.worker_tx
            .send(WorkerMsg::ChapterFailed {
                load_id: 1,
                chapter_id: 9,
                error: "boom".to_string(),
                interrupted: false,
            })
            .unwrap();
        poll_worker(&mut app);
        assert_eq!(app.status, "章节加载已中断");
        assert!(app.session.is_none());
    }
}
