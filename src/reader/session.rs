//! 章节会话：持有页面列表与当前页，把偏好、翻页、视口追踪和预加载串起来。
//!
//! 会话只在一个线程上被驱动。下载在后台线程进行，结果由 [`ChapterSession::tick`]
//! 统一取回并落到页面状态上，所以页面列表和当前页不需要加锁。
//! 前端的循环大致是：处理输入 → `tick(now)` → 返回 true 时重绘。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::coalesce::{Debounced, RenderCoalescer};
use super::download_pool::{DownloadMsg, DownloadOutcome, DownloadPool};
use super::location::Location;
use super::models::{ChapterInfo, ChapterPagination, ReaderData};
use super::navigation::{NavCommand, click_command, focus_page, resolve_target};
use super::page::{Page, build_pages};
use super::prefetch::PrefetchScheduler;
use super::preference::{Direction, Preference, PreferenceError, PreferenceStore};
use super::viewport::{Intersection, RestoreStep, ScrollLayout, ScrollRestore, ViewportTracker};
use crate::base_system::chapter_link::chapter_path;
use crate::base_system::context::{BackwardScan, Config};
use crate::base_system::retry::RetryPolicy;
use crate::base_system::storage::StoreError;
use crate::network_parser::api::ImageSource;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// 重绘合并窗口。
    pub render_window: Duration,
    /// 打开后暂停预加载与视口追踪的时间。
    pub settle_delay: Duration,
    /// 当前页写回位置前的防抖。
    pub location_delay: Duration,
    pub retry: RetryPolicy,
    pub backward_scan: BackwardScan,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            render_window: Duration::from_millis(config.render_window_ms),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            location_delay: Duration::from_millis(config.location_delay_ms),
            retry: config.retry_policy(),
            backward_scan: config.backward_scan,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            render_window: Duration::from_millis(250),
            settle_delay: Duration::from_millis(250),
            location_delay: Duration::from_millis(250),
            retry: RetryPolicy::page_default(),
            backward_scan: BackwardScan::default(),
        }
    }
}

/// 请前端把某页滚到视口内；`offset` 是页内偏移。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollRequest {
    pub page: usize,
    pub offset: u32,
}

pub struct ChapterSession {
    data: ReaderData,
    pages: Vec<Page>,
    current: usize,
    prefs: PreferenceStore,
    location: Box<dyn Location>,

    scheduler: PrefetchScheduler,
    pool: DownloadPool,
    render: RenderCoalescer,
    location_sync: Debounced<usize>,

    tracker: ViewportTracker,
    layout: ScrollLayout,
    scroll_top: u32,
    page_offset: u32,
    restore: Option<ScrollRestore>,
    pending_scroll: Option<ScrollRequest>,
    /// 视口追踪暂停过；恢复时要重新报告一遍相交状态。
    tracking_paused: bool,

    loading_until: Option<Instant>,
    closed: bool,
}

impl ChapterSession {
    pub fn open(
        data: ReaderData,
        prefs: PreferenceStore,
        location: Box<dyn Location>,
        source: Arc<dyn ImageSource>,
        options: SessionOptions,
        now: Instant,
    ) -> Self {
        let mut pages = build_pages(&data.chapter.pages);
        let count = pages.len();
        let requested = location.current_page_number().unwrap_or(1);
        let current = requested.clamp(1, count.max(1)) - 1;
        if let Some(page) = pages.get_mut(current) {
            page.is_viewing = true;
        }

        info!(
            target: "reader",
            chapter_id = data.chapter.id,
            pages = count,
            "打开章节 {}，从第 {} 页开始",
            data.chapter.label(),
            current + 1
        );

        let pool = DownloadPool::new(source, data.chapter.id, options.retry);
        let mut session = Self {
            pages,
            current,
            prefs,
            location,
            scheduler: PrefetchScheduler::new(options.backward_scan),
            pool,
            render: RenderCoalescer::new(options.render_window),
            location_sync: Debounced::new(options.location_delay),
            tracker: ViewportTracker::new(),
            layout: ScrollLayout::default(),
            scroll_top: 0,
            page_offset: 0,
            restore: None,
            pending_scroll: None,
            tracking_paused: true,
            loading_until: Some(now + options.settle_delay),
            closed: false,
            data,
        };

        if session.direction().is_scroll() {
            session.subscribe_all();
            session.restore = Some(ScrollRestore::new(current, now));
        }
        if count > 0 {
            session.location_sync.schedule(current, now);
        }
        session.render.request_now(now);
        session
    }

    // ── 只读访问 ─────────────────────────────────────────────

    pub fn chapter(&self) -> &ChapterInfo {
        &self.data.chapter
    }

    pub fn chapters(&self) -> &[ChapterInfo] {
        &self.data.chapters
    }

    pub fn pagination(&self) -> &ChapterPagination {
        &self.data.pagination
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_page(&self) -> Option<&Page> {
        self.pages.get(self.current)
    }

    pub fn preferences(&self) -> &Preference {
        self.prefs.get()
    }

    pub fn direction(&self) -> Direction {
        self.prefs.get().direction
    }

    pub fn is_loading(&self) -> bool {
        self.loading_until.is_some()
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn queue(&self) -> &[usize] {
        self.scheduler.queue()
    }

    pub fn active_downloads(&self) -> usize {
        self.scheduler.active()
    }

    pub fn location_path(&self) -> &str {
        self.location.path()
    }

    pub fn scroll_top(&self) -> u32 {
        self.scroll_top
    }

    pub fn layout(&self) -> &ScrollLayout {
        &self.layout
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &ViewportTracker {
        &self.tracker
    }

    /// (重绘请求次数, 实际重绘次数)
    #[cfg(test)]
    pub fn render_stats(&self) -> (u64, u64) {
        self.render.stats()
    }

    /// 最近一个需要 `tick` 处理的时间点：加载等待结束、重绘到期或位置写回。
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.loading_until,
            self.render.deadline(),
            self.location_sync.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// `Page N: Vol. V Ch. C - Title`
    pub fn title(&self) -> String {
        format!("Page {}: {}", self.current + 1, self.data.chapter.label())
    }

    /// 最后一页（分页模式）或滚动模式下提示可以进入下一章。
    pub fn shows_next_chapter_hint(&self) -> bool {
        self.data.pagination.next.is_some()
            && (self.direction().is_scroll() || self.current + 1 == self.pages.len())
    }

    /// 还有进行中的下载，或者队列里还有可以开始的页。
    pub fn has_pending_downloads(&self) -> bool {
        self.scheduler.active() > 0
            || self
                .scheduler
                .queue()
                .iter()
                .any(|&i| self.pages.get(i).is_some_and(|p| !p.is_terminal()))
    }

    // ── 翻页 ─────────────────────────────────────────────────

    pub fn first(&mut self, now: Instant) -> bool {
        self.navigate(NavCommand::First, now)
    }

    pub fn prev(&mut self, now: Instant) -> bool {
        self.navigate(NavCommand::Previous, now)
    }

    pub fn next(&mut self, now: Instant) -> bool {
        self.navigate(NavCommand::Next, now)
    }

    pub fn last(&mut self, now: Instant) -> bool {
        self.navigate(NavCommand::Last, now)
    }

    /// 页码从 1 开始；越界或就是当前页时什么也不做。
    pub fn jump(&mut self, number: usize, now: Instant) -> bool {
        self.navigate(NavCommand::Jump(number), now)
    }

    pub fn navigate(&mut self, command: NavCommand, now: Instant) -> bool {
        if self.closed {
            return false;
        }
        let Some(target) = resolve_target(command, self.current, self.pages.len()) else {
            return false;
        };
        debug!(target: "reader", ?command, from = self.current + 1, to = target + 1, "翻页");

        focus_page(&mut self.pages, target);
        self.current = target;
        self.page_offset = 0;
        self.pending_scroll = Some(ScrollRequest {
            page: target,
            offset: 0,
        });
        self.location_sync.schedule(target, now);
        self.render.request_now(now);
        true
    }

    /// 点击页面导航；`x` 为点击位置相对页面左边的偏移。
    pub fn click(&mut self, x: u16, width: u16, now: Instant) -> bool {
        if !self.prefs.get().navigate_on_click || width == 0 {
            return false;
        }
        let command = click_command(self.direction(), x, width);
        self.navigate(command, now)
    }

    /// 失败页手动重试。
    pub fn retry_page(&mut self, index: usize, now: Instant) -> bool {
        if self.closed || !PrefetchScheduler::retry(&mut self.pages, index) {
            return false;
        }
        self.render.request_now(now);
        true
    }

    // ── 偏好 ─────────────────────────────────────────────────

    /// 修改偏好并保存；保存失败时修改依然生效。
    pub fn update_preference<F>(&mut self, mutate: F, now: Instant) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Preference),
    {
        let before = self.prefs.get().clone();
        let saved = self.prefs.update(mutate);
        self.after_preference_change(&before, now);
        saved
    }

    pub fn set_preference(&mut self, field: &str, value: &str, now: Instant) -> Result<(), PreferenceError> {
        let before = self.prefs.get().clone();
        let result = self.prefs.set(field, value);
        self.after_preference_change(&before, now);
        result
    }

    pub fn set_direction(&mut self, direction: Direction, now: Instant) -> Result<(), StoreError> {
        self.update_preference(|p| p.direction = direction, now)
    }

    fn after_preference_change(&mut self, before: &Preference, now: Instant) {
        let after = self.direction();
        if before.direction != after {
            self.switch_direction(before.direction, after, now);
        }
        self.render.request_now(now);
    }

    /// 切换方向时保持当前页和页内偏移。
    fn switch_direction(&mut self, from: Direction, to: Direction, now: Instant) {
        info!(target: "reader", "阅读方向: {} → {}", from.label(), to.label());
        if to.is_scroll() {
            self.subscribe_all();
            self.tracking_paused = true;
        } else {
            self.unsubscribe_all();
            self.restore = None;
        }
        focus_page(&mut self.pages, self.current);
        if !self.pages.is_empty() {
            self.pending_scroll = Some(ScrollRequest {
                page: self.current,
                offset: self.page_offset,
            });
        }
        self.render.request(now);
    }

    fn subscribe_all(&mut self) {
        for page in &self.pages {
            self.tracker.subscribe(page.region());
        }
    }

    fn unsubscribe_all(&mut self) {
        for page in &self.pages {
            self.tracker.unsubscribe(page.region());
        }
    }

    // ── 滚动与视口 ───────────────────────────────────────────

    /// 滚动模式下 `offset` 是整列页面的滚动位置，分页模式下是当前页内的偏移。
    /// `user_initiated` 为 true 时取消深链定位。
    pub fn on_scroll(&mut self, offset: u32, user_initiated: bool, now: Instant) {
        if self.closed {
            return;
        }
        if user_initiated && let Some(restore) = self.restore.as_mut() {
            restore.cancel();
        }
        if !self.direction().is_scroll() {
            self.page_offset = offset;
            return;
        }
        self.scroll_top = offset;
        self.observe_viewport(now);
        self.page_offset = self
            .layout
            .top_of(self.current)
            .map(|top| offset.saturating_sub(top))
            .unwrap_or(0);
    }

    /// 前端在页面高度变化（图片下载完成、缩放改变）后更新布局。
    pub fn set_layout(&mut self, layout: ScrollLayout, now: Instant) {
        if self.layout == layout {
            return;
        }
        self.layout = layout;
        if self.direction().is_scroll() {
            self.observe_viewport(now);
        }
    }

    /// 把滚动请求换算成整列滚动位置（仅滚动模式）。
    pub fn scroll_offset_for(&self, request: &ScrollRequest) -> Option<u32> {
        self.layout
            .top_of(request.page)
            .map(|top| top.saturating_add(request.offset))
    }

    /// 取出待执行的滚动请求。滚动模式下布局里还没有目标页时继续保留。
    pub fn take_scroll_request(&mut self) -> Option<ScrollRequest> {
        if self.direction().is_scroll()
            && let Some(request) = self.pending_scroll
            && self.layout.top_of(request.page).is_none()
        {
            return None;
        }
        self.pending_scroll.take()
    }

    /// 加载等待中、滚动请求尚未执行、深链定位进行中时，视口里看到的不代表当前页。
    fn tracking_suspended(&self) -> bool {
        self.loading_until.is_some()
            || self.pending_scroll.is_some()
            || self.restore.as_ref().is_some_and(|r| !r.is_finished())
    }

    fn observe_viewport(&mut self, now: Instant) {
        if self.layout.is_empty() {
            return;
        }
        if self.tracking_suspended() {
            self.tracking_paused = true;
            return;
        }
        if std::mem::take(&mut self.tracking_paused) {
            self.tracker.reset();
        }
        let events = self.tracker.observe(&self.layout, self.scroll_top);
        for event in events {
            self.apply_intersection(event, now);
        }
    }

    fn apply_intersection(&mut self, event: Intersection, now: Instant) {
        match event {
            Intersection::Enter(region) => {
                let Some(page) = self.pages.get_mut(region) else {
                    return;
                };
                if page.is_viewing {
                    return;
                }
                page.is_viewing = true;
                self.current = region;
                self.location_sync.schedule(region, now);
                self.render.request(now);
            }
            Intersection::Exit(region) => {
                let Some(page) = self.pages.get_mut(region) else {
                    return;
                };
                if page.is_viewing {
                    page.is_viewing = false;
                    self.render.request(now);
                }
            }
        }
    }

    // ── 驱动 ─────────────────────────────────────────────────

    /// 推进会话状态，返回是否需要重绘。
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.closed {
            return false;
        }

        if let Some(until) = self.loading_until
            && until <= now
        {
            self.loading_until = None;
            debug!(target: "reader", "加载等待结束，开始预加载");
            self.render.request_now(now);
        }

        while let Some(msg) = self.pool.try_recv() {
            self.apply_download(msg, now);
        }

        if self.loading_until.is_none() {
            self.pump_prefetch(now);
            self.poll_restore(now);
            if self.tracking_paused && self.direction().is_scroll() {
                self.observe_viewport(now);
            }
        }

        if let Some(index) = self.location_sync.take_due(now) {
            let path = chapter_path(self.data.chapter.id, index + 1);
            self.location.replace_path(&path);
        }

        self.render.take_due(now)
    }

    /// 阻塞等待一个下载结果并应用，超时返回 false。
    pub fn wait_for_download(&mut self, timeout: Duration, now: Instant) -> bool {
        if self.closed {
            return false;
        }
        match self.pool.recv_timeout(timeout) {
            Some(msg) => {
                self.apply_download(msg, now);
                self.pump_prefetch(now);
                true
            }
            None => false,
        }
    }

    fn pump_prefetch(&mut self, now: Instant) {
        if self.loading_until.is_some() {
            return;
        }
        let (max_preloads, max_parallel) = {
            let pref = self.prefs.get();
            (pref.max_preloads, pref.max_parallel)
        };
        if self
            .scheduler
            .recompute(&self.pages, self.current, max_preloads)
        {
            self.render.request(now);
        }
        for ticket in self.scheduler.fill_pool(&mut self.pages, max_parallel) {
            self.pool.launch(ticket);
            self.render.request(now);
        }
    }

    fn apply_download(&mut self, msg: DownloadMsg, now: Instant) {
        let image = match msg.outcome {
            DownloadOutcome::Downloaded(image) => Some(image),
            DownloadOutcome::Failed { attempts, reason } => {
                debug!(target: "prefetch", page = msg.index + 1, attempts, "下载失败: {reason}");
                None
            }
        };
        self.scheduler.complete(&mut self.pages, msg.index, image);
        self.render.request(now);
    }

    fn poll_restore(&mut self, now: Instant) {
        let Some(restore) = self.restore.as_mut() else {
            return;
        };
        let target = restore.target();
        let ready = self.layout.top_of(target).is_some()
            && self.pages.get(target).is_some_and(Page::is_downloaded);
        match restore.poll(now, ready) {
            RestoreStep::Wait => {}
            RestoreStep::Scroll(page) => {
                self.pending_scroll = Some(ScrollRequest { page, offset: 0 });
                self.render.request_now(now);
            }
            RestoreStep::Done => self.restore = None,
        }
    }

    // ── 结束 ─────────────────────────────────────────────────

    /// 关闭会话：停止接收下载结果、取消订阅，并把最后的位置写回。
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pool.close();
        self.unsubscribe_all();
        self.restore = None;
        if let Some(index) = self.location_sync.cancel() {
            let path = chapter_path(self.data.chapter.id, index + 1);
            self.location.replace_path(&path);
        }
        debug!(target: "reader", chapter_id = self.data.chapter.id, "会话已关闭");
    }

    /// 关闭并交还偏好，供下一个章节会话继续使用。
    pub fn into_preferences(mut self) -> PreferenceStore {
        self.close();
        std::mem::replace(&mut self.prefs, PreferenceStore::detached())
    }
}

impl Drop for ChapterSession {
    fn drop(&mut self) {
        self.close();
    }
}
