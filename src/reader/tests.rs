//! 章节会话的端到端场景：翻页、预加载、方向切换与位置同步。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use super::location::MemoryLocation;
use super::models::ReaderData;
use super::navigation::NavCommand;
use super::preference::{Direction, Preference, PreferenceStore};
use super::session::{ChapterSession, ScrollRequest, SessionOptions};
use super::viewport::ScrollLayout;
use crate::base_system::context::BackwardScan;
use crate::base_system::retry::RetryPolicy;
use crate::base_system::storage::MemoryStore;
use crate::network_parser::api::{ApiError, ImageSource};

const SETTLE: Duration = Duration::from_millis(250);
const WAIT: Duration = Duration::from_secs(5);

/// 按文件名记录调用次数；`failing` 中的文件总是失败。
#[derive(Default)]
struct Scripted {
    failing: Vec<String>,
    calls: Mutex<HashMap<String, u32>>,
    total: AtomicU32,
}

impl Scripted {
    fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn calls_for(&self, name: &str) -> u32 {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl ImageSource for Scripted {
    fn fetch_image(&self, _chapter_id: i64, file_name: &str) -> Result<Vec<u8>, ApiError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(file_name.to_string())
            .or_default() += 1;
        if self.failing.iter().any(|f| f == file_name) {
            Err(ApiError::Status(502))
        } else {
            Ok(vec![1, 2, 3])
        }
    }
}

/// 每次拉取都要等测试放行一次；放行端关闭后全部失败。
struct Gated {
    gate: Receiver<()>,
}

impl ImageSource for Gated {
    fn fetch_image(&self, _chapter_id: i64, _file_name: &str) -> Result<Vec<u8>, ApiError> {
        match self.gate.recv() {
            Ok(()) => Ok(vec![1, 2, 3]),
            Err(_) => Err(ApiError::Status(503)),
        }
    }
}

fn gated() -> (Arc<Gated>, Sender<()>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Arc::new(Gated { gate: rx }), tx)
}

fn options() -> SessionOptions {
    SessionOptions {
        retry: RetryPolicy::new(7, Duration::ZERO),
        backward_scan: BackwardScan::FromStart,
        ..SessionOptions::default()
    }
}

fn prefs(mutate: impl FnOnce(&mut Preference)) -> PreferenceStore {
    let mut store = PreferenceStore::load(Box::new(MemoryStore::new()));
    store.update(mutate).unwrap();
    store
}

fn data(pages: usize) -> ReaderData {
    let names = (1..=pages).map(|i| format!("{i:03}.jpg")).collect();
    ReaderData::standalone(1, names)
}

fn open_with(
    pages: usize,
    path: &str,
    prefs: PreferenceStore,
    source: Arc<dyn ImageSource>,
) -> (ChapterSession, Instant) {
    let now = Instant::now();
    let session = ChapterSession::open(
        data(pages),
        prefs,
        Box::new(MemoryLocation::new(path)),
        source,
        options(),
        now,
    );
    (session, now)
}

fn open(pages: usize) -> (ChapterSession, Instant) {
    open_with(
        pages,
        "/chapters/1",
        prefs(|_| {}),
        Arc::new(Scripted::default()),
    )
}

fn viewing(session: &ChapterSession) -> Vec<usize> {
    session
        .pages()
        .iter()
        .filter(|p| p.is_viewing)
        .map(|p| p.index)
        .collect()
}

fn downloading(session: &ChapterSession) -> usize {
    session.pages().iter().filter(|p| p.is_downloading()).count()
}

/// 像前端那样执行会话发出的滚动请求，返回执行的次数。
fn follow_scroll_requests(session: &mut ChapterSession, now: Instant) -> usize {
    let mut applied = 0;
    while let Some(request) = session.take_scroll_request() {
        let offset = session.scroll_offset_for(&request).unwrap();
        session.on_scroll(offset, false, now);
        applied += 1;
    }
    applied
}

fn page_on_screen(session: &ChapterSession) -> Option<usize> {
    session.layout().region_at(session.scroll_top())
}

#[test]
fn jump_moves_to_page_and_keeps_single_viewing_page() {
    let (mut session, now) = open(10);
    assert!(session.jump(7, now));
    assert_eq!(session.current_index(), 6);
    assert_eq!(viewing(&session), vec![6]);
    assert_eq!(session.title(), "Page 7: Ch. 1");

    assert!(!session.jump(0, now));
    assert!(!session.jump(11, now));
    assert!(!session.jump(7, now));
    assert_eq!(session.current_index(), 6);
}

#[test]
fn first_and_last_are_noops_at_the_bounds() {
    let (mut session, now) = open(4);
    assert!(session.tick(now));
    let before = session.render_stats();

    assert!(!session.first(now));
    assert!(!session.prev(now));
    assert_eq!(session.render_stats(), before);

    assert!(session.last(now));
    assert!(!session.last(now));
    assert!(!session.next(now));
    assert_eq!(session.current_index(), 3);
}

#[test]
fn repeated_next_ends_on_the_last_page() {
    let (mut by_next, now) = open(6);
    for _ in 0..5 {
        assert!(by_next.next(now));
    }
    let (mut by_last, _) = open(6);
    by_last.last(now);
    assert_eq!(by_next.current_index(), by_last.current_index());
    assert_eq!(viewing(&by_next), viewing(&by_last));
}

#[test]
fn navigate_command_matches_helpers() {
    let (mut session, now) = open(5);
    assert!(session.navigate(NavCommand::Last, now));
    assert!(session.navigate(NavCommand::Previous, now));
    assert_eq!(session.current_index(), 3);
    assert!(session.navigate(NavCommand::First, now));
    assert_eq!(session.current_index(), 0);
}

#[test]
fn deep_link_opens_on_page_and_clamps_out_of_range() {
    let source: Arc<dyn ImageSource> = Arc::new(Scripted::default());
    let (session, _) = open_with(5, "/chapters/1/3", prefs(|_| {}), source.clone());
    assert_eq!(session.current_index(), 2);

    let (mut session, now) = open_with(5, "/chapters/1/99", prefs(|_| {}), source);
    assert_eq!(session.current_index(), 4);
    assert_eq!(viewing(&session), vec![4]);
    session.tick(now + SETTLE);
    assert_eq!(session.location_path(), "/chapters/1/5");
}

#[test]
fn loading_gate_then_queue_follows_alternating_candidates() {
    let (source, _gate) = gated();
    let store = prefs(|p| {
        p.max_preloads = 3;
        p.max_parallel = 1;
    });
    let (mut session, now) = open_with(10, "/chapters/1/5", store, source);

    session.tick(now);
    assert!(session.is_loading());
    assert!(session.queue().is_empty());
    assert_eq!(session.active_downloads(), 0);

    session.tick(now + SETTLE);
    assert!(!session.is_loading());
    assert_eq!(session.queue(), &[4, 0, 5]);
    assert_eq!(session.active_downloads(), 1);
    assert!(session.pages()[4].is_downloading());
}

#[test]
fn parallel_downloads_stay_within_bound() {
    let (source, gate) = gated();
    let store = prefs(|p| {
        p.max_preloads = 5;
        p.max_parallel = 2;
    });
    let (mut session, now) = open_with(5, "/chapters/1", store, source);
    session.tick(now + SETTLE);
    assert_eq!(session.queue().len(), 5);
    assert_eq!(session.active_downloads(), 2);
    assert_eq!(downloading(&session), 2);

    gate.send(()).unwrap();
    assert!(session.wait_for_download(WAIT, now + SETTLE));
    assert_eq!(session.active_downloads(), 2);
    assert_eq!(downloading(&session), 2);
    assert_eq!(session.queue().len(), 4);

    for _ in 0..4 {
        gate.send(()).unwrap();
    }
    let mut finished = 1;
    while finished < 5 {
        assert!(session.wait_for_download(WAIT, now + SETTLE));
        assert!(downloading(&session) <= 2);
        finished += 1;
    }
    session.tick(now + SETTLE * 2);
    assert!(session.pages().iter().all(|p| p.is_downloaded()));
    assert!(session.queue().is_empty());
    assert_eq!(session.active_downloads(), 0);
    assert!(!session.has_pending_downloads());
}

#[test]
fn failing_page_is_tried_seven_times_then_left_alone() {
    let source = Arc::new(Scripted::failing(&["001.jpg"]));
    let store = prefs(|p| p.max_parallel = 1);
    let (mut session, now) = open_with(1, "/chapters/1", store, source.clone());

    session.tick(now + SETTLE);
    assert!(session.wait_for_download(WAIT, now + SETTLE));
    assert!(session.pages()[0].is_failed());
    assert_eq!(source.calls_for("001.jpg"), 7);

    session.tick(now + SETTLE * 4);
    assert!(session.queue().is_empty());
    assert_eq!(session.active_downloads(), 0);
    assert!(!session.wait_for_download(Duration::from_millis(50), now));
    assert_eq!(source.calls_for("001.jpg"), 7);

    assert!(session.retry_page(0, now));
    assert!(!session.retry_page(0, now));
    session.tick(now + SETTLE * 5);
    assert!(session.wait_for_download(WAIT, now));
    assert_eq!(source.calls_for("001.jpg"), 14);
}

#[test]
fn failed_neighbour_does_not_block_the_rest() {
    let source = Arc::new(Scripted::failing(&["002.jpg"]));
    let store = prefs(|p| {
        p.max_preloads = 3;
        p.max_parallel = 3;
    });
    let (mut session, now) = open_with(3, "/chapters/1", store, source.clone());
    session.tick(now + SETTLE);
    for _ in 0..3 {
        assert!(session.wait_for_download(WAIT, now + SETTLE));
    }
    let pages = session.pages();
    assert!(pages[0].is_downloaded());
    assert!(pages[1].is_failed());
    assert!(pages[2].is_downloaded());
    assert_eq!(source.total.load(Ordering::SeqCst), 9);
}

#[test]
fn direction_toggle_keeps_current_page() {
    let (mut session, now) = open(5);
    session.jump(3, now);
    session.take_scroll_request();

    session.set_direction(Direction::TopToBottom, now).unwrap();
    assert_eq!(session.current_index(), 2);
    assert_eq!(viewing(&session), vec![2]);
    assert_eq!(session.tracker().subscriptions(), 5);
    // 还没有布局时请求保留在会话里
    assert_eq!(session.take_scroll_request(), None);
    session.set_layout(ScrollLayout::new(&[10; 5], 2), now);
    assert_eq!(
        session.take_scroll_request(),
        Some(ScrollRequest { page: 2, offset: 0 })
    );

    session.set_direction(Direction::LeftToRight, now).unwrap();
    assert_eq!(session.current_index(), 2);
    assert_eq!(session.tracker().subscriptions(), 0);
    assert_eq!(session.preferences().direction, Direction::LeftToRight);
}

#[test]
fn scroll_mode_follows_viewport_after_loading() {
    let store = prefs(|p| p.direction = Direction::TopToBottom);
    let (mut session, now) = open_with(3, "/chapters/1", store, Arc::new(Scripted::default()));
    session.set_layout(ScrollLayout::new(&[10, 10, 10], 2), now);

    // 加载期间的相交事件不改变当前页
    session.on_scroll(13, true, now);
    assert_eq!(session.current_index(), 0);

    let later = now + SETTLE;
    session.tick(later);
    session.on_scroll(25, true, later);
    assert_eq!(session.current_index(), 2);
    assert!(session.pages()[2].is_viewing);

    session.tick(later + SETTLE);
    assert_eq!(session.location_path(), "/chapters/1/3");
}

#[test]
fn layout_before_scroll_request_does_not_steal_current_page() {
    let (mut session, now) = open(5);
    let later = now + SETTLE;
    session.tick(later);
    session.jump(3, later);
    session.take_scroll_request();

    session.set_direction(Direction::TopToBottom, later).unwrap();
    // 前端先画（更新布局）再执行滚动请求；此时 scroll_top 还停在 0
    session.set_layout(ScrollLayout::new(&[10; 5], 2), later);
    assert_eq!(session.current_index(), 2);
    assert_eq!(viewing(&session), vec![2]);

    assert_eq!(follow_scroll_requests(&mut session, later), 1);
    assert_eq!(page_on_screen(&session), Some(2));
    assert_eq!(session.current_index(), 2);

    session.tick(later + SETTLE);
    assert_eq!(session.location_path(), "/chapters/1/3");
}

#[test]
fn deep_link_waits_for_a_slow_page_before_scrolling() {
    let (source, gate) = gated();
    let store = prefs(|p| {
        p.direction = Direction::TopToBottom;
        p.max_preloads = 1;
        p.max_parallel = 1;
    });
    let (mut session, now) = open_with(5, "/chapters/1/3", store, source);
    session.set_layout(ScrollLayout::new(&[10; 5], 2), now);

    let step = Duration::from_millis(100);
    let mut t = now;
    for _ in 0..30 {
        t += step;
        session.tick(t);
        assert_eq!(follow_scroll_requests(&mut session, t), 0);
    }
    assert_eq!(session.current_index(), 2);
    assert_eq!(page_on_screen(&session), Some(0));

    gate.send(()).unwrap();
    assert!(session.wait_for_download(WAIT, t));
    assert!(session.pages()[2].is_downloaded());

    let mut scrolls = 0;
    for _ in 0..20 {
        t += step;
        session.tick(t);
        scrolls += follow_scroll_requests(&mut session, t);
    }
    assert!(scrolls > 0);
    assert_eq!(page_on_screen(&session), Some(2));
    assert_eq!(session.current_index(), 2);
    assert_eq!(viewing(&session), vec![2]);
    assert_eq!(session.location_path(), "/chapters/1/3");
}

#[test]
fn scroll_offset_survives_direction_switch() {
    let store = prefs(|p| p.direction = Direction::TopToBottom);
    let (mut session, now) = open_with(3, "/chapters/1", store, Arc::new(Scripted::default()));
    session.set_layout(ScrollLayout::new(&[10, 10, 10], 2), now);
    let later = now + SETTLE;
    session.tick(later);
    session.on_scroll(15, true, later);
    assert_eq!(session.current_index(), 1);

    session.set_direction(Direction::RightToLeft, later).unwrap();
    assert_eq!(
        session.take_scroll_request(),
        Some(ScrollRequest { page: 1, offset: 3 })
    );
}

#[test]
fn location_sync_collapses_rapid_navigation() {
    let (mut session, now) = open(8);
    let step = Duration::from_millis(10);
    session.next(now);
    session.next(now + step);
    session.next(now + step * 2);

    session.tick(now + step * 2 + Duration::from_millis(100));
    assert_eq!(session.location_path(), "/chapters/1");

    session.tick(now + step * 2 + SETTLE);
    assert_eq!(session.location_path(), "/chapters/1/4");
}

#[test]
fn close_writes_final_location_and_ignores_late_downloads() {
    let (source, gate) = gated();
    let store = prefs(|p| p.max_parallel = 1);
    let (mut session, now) = open_with(3, "/chapters/1", store, source);
    session.tick(now + SETTLE);
    session.next(now + SETTLE);
    assert_eq!(session.active_downloads(), 1);

    session.close();
    assert!(session.is_closed());
    assert_eq!(session.location_path(), "/chapters/1/2");

    gate.send(()).unwrap();
    assert!(!session.tick(now + SETTLE * 4));
    assert!(!session.wait_for_download(Duration::from_millis(100), now));
    assert!(!session.next(now));
}

#[test]
fn click_halves_swap_in_right_to_left() {
    let (mut session, now) = open(5);
    session.jump(3, now);
    assert!(session.click(80, 100, now));
    assert_eq!(session.current_index(), 3);

    session.set_direction(Direction::RightToLeft, now).unwrap();
    assert!(session.click(80, 100, now));
    assert_eq!(session.current_index(), 2);

    session.update_preference(|p| p.navigate_on_click = false, now).unwrap();
    assert!(!session.click(10, 100, now));
    assert_eq!(session.current_index(), 2);
}

#[test]
fn preferences_outlive_the_session() {
    let (mut session, now) = open(4);
    session.set_preference("maxPreloads", "2", now).unwrap();
    assert!(session.set_preference("noSuchField", "1", now).is_err());
    session.tick(now + SETTLE);
    assert!(session.queue().len() <= 2);

    let prefs = session.into_preferences();
    assert_eq!(prefs.get().max_preloads, 2);
}

#[test]
fn renders_are_coalesced_until_due() {
    let (mut session, now) = open(4);
    assert!(session.tick(now));
    assert!(!session.tick(now));
    session.next(now);
    assert!(session.tick(now));
    assert!(!session.tick(now));
}

#[test]
fn next_deadline_tracks_pending_work() {
    let (mut session, now) = open(4);
    assert_eq!(session.next_deadline(), Some(now));
    session.tick(now);
    // 加载等待和位置写回都还没到
    assert_eq!(session.next_deadline(), Some(now + SETTLE));
}
