//! 预加载调度：决定哪些页进入队列，以及同时下载多少页。
//!
//! 队列是按优先级排列、不重复的页序号列表，长度不超过 `max_preloads`。
//! 每次重算：
//! 1. 移除已下载或已失败的页；
//! 2. 当前页未完成且不在队列中时插到最前；
//! 3. 交替取一个“前面的页”（页码小于当前页）和一个“后面的页”补满队列，
//!    先取前面的页。不符合条件的页直接跳过，不占用名额；一侧取尽后只从另一侧取。
//!
//! 前面的页按 [`BackwardScan`] 的顺序扫描，默认从章节第一页开始。

use tracing::{debug, info, warn};

use super::page::{Page, PageImage};
use crate::base_system::context::BackwardScan;

/// 交给下载线程的一页。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTicket {
    pub index: usize,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct PrefetchScheduler {
    queue: Vec<usize>,
    active: usize,
    max_parallel: usize,
    backward_scan: BackwardScan,
}

impl PrefetchScheduler {
    pub fn new(backward_scan: BackwardScan) -> Self {
        Self {
            queue: Vec::new(),
            active: 0,
            max_parallel: 1,
            backward_scan,
        }
    }

    pub fn queue(&self) -> &[usize] {
        &self.queue
    }

    #[cfg(test)]
    pub fn is_queued(&self, index: usize) -> bool {
        self.queue.contains(&index)
    }

    /// 进行中的下载数。
    pub fn active(&self) -> usize {
        self.active
    }

    /// 重算队列，返回队列（长度或顺序）是否变化。
    pub fn recompute(&mut self, pages: &[Page], current: usize, max_preloads: usize) -> bool {
        let max_preloads = max_preloads.max(1);
        let previous = self.queue.clone();

        self.queue
            .retain(|&i| pages.get(i).is_some_and(|page| !page.is_terminal()));

        if let Some(page) = pages.get(current) {
            if !page.is_terminal() && !self.queue.contains(&current) {
                self.queue.insert(0, current);
                self.log_enqueued(current, max_preloads);
            }
            self.fill_candidates(pages, current, max_preloads);
        }

        if self.queue.len() > max_preloads {
            self.queue.truncate(max_preloads);
        }

        let changed = self.queue != previous;
        if changed {
            debug!(target: "prefetch", queue = ?self.queue, "预加载队列已更新");
        }
        changed
    }

    fn fill_candidates(&mut self, pages: &[Page], current: usize, max_preloads: usize) {
        let backward: Vec<usize> = match self.backward_scan {
            BackwardScan::FromStart => (0..current).collect(),
            BackwardScan::NearestFirst => (0..current).rev().collect(),
        };
        let mut backward = backward.into_iter();
        let mut forward = (current + 1)..pages.len();

        let mut backward_done = false;
        let mut forward_done = false;
        let mut take_backward = true;

        while self.queue.len() < max_preloads && !(backward_done && forward_done) {
            if take_backward && !backward_done {
                match backward.find(|&i| self.is_candidate(&pages[i])) {
                    Some(i) => self.push_candidate(i, max_preloads),
                    None => backward_done = true,
                }
            } else if !take_backward && !forward_done {
                match forward.find(|&i| self.is_candidate(&pages[i])) {
                    Some(i) => self.push_candidate(i, max_preloads),
                    None => forward_done = true,
                }
            }
            take_backward = !take_backward;
        }
    }

    fn is_candidate(&self, page: &Page) -> bool {
        !page.is_terminal() && !page.is_downloading() && !self.queue.contains(&page.index)
    }

    fn push_candidate(&mut self, index: usize, max_preloads: usize) {
        self.queue.push(index);
        self.log_enqueued(index, max_preloads);
    }

    fn log_enqueued(&self, index: usize, max_preloads: usize) {
        info!(
            target: "prefetch",
            "第 {} 页已加入队列 | 队列: {}/{}",
            index + 1,
            self.queue.len(),
            max_preloads
        );
    }

    /// 在并发上限内为队列中的空闲页签发下载，并把它们标记为下载中。
    pub fn fill_pool(&mut self, pages: &mut [Page], max_parallel: usize) -> Vec<DownloadTicket> {
        self.max_parallel = max_parallel.max(1);
        let mut tickets = Vec::new();
        for &index in &self.queue {
            if self.active >= self.max_parallel {
                break;
            }
            let Some(page) = pages.get_mut(index) else {
                continue;
            };
            if page.is_downloading() || page.is_terminal() {
                continue;
            }
            page.mark_downloading();
            self.active += 1;
            info!(
                target: "prefetch",
                "预加载第 {} 页 | 并发: {}/{}",
                index + 1,
                self.active,
                self.max_parallel
            );
            tickets.push(DownloadTicket {
                index,
                file_name: page.file_name.clone(),
            });
        }
        tickets
    }

    /// 一次下载结束（成功或重试耗尽），`image` 为 None 表示失败。
    pub fn complete(&mut self, pages: &mut [Page], index: usize, image: Option<PageImage>) {
        self.active = self.active.saturating_sub(1);
        let Some(page) = pages.get_mut(index) else {
            return;
        };
        if !page.is_downloading() {
            debug!(target: "prefetch", page = index + 1, "忽略非下载中页面的完成通知");
            return;
        }
        match image {
            Some(image) => {
                page.mark_downloaded(image);
                info!(
                    target: "prefetch",
                    "第 {} 页预加载完成 | 并发: {}/{}",
                    index + 1,
                    self.active,
                    self.max_parallel
                );
            }
            None => {
                page.mark_failed();
                warn!(
                    target: "prefetch",
                    "第 {} 页预加载失败 | 并发: {}/{}",
                    index + 1,
                    self.active,
                    self.max_parallel
                );
            }
        }
    }

    /// 用户手动重试：`Failed → Idle`，下一次重算时重新入队。
    pub fn retry(pages: &mut [Page], index: usize) -> bool {
        let reset = pages.get_mut(index).is_some_and(Page::reset_failed);
        if reset {
            info!(target: "prefetch", "第 {} 页重新加入预加载", index + 1);
        }
        reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::page::build_pages;

    fn pages(n: usize) -> Vec<Page> {
        let names: Vec<String> = (1..=n).map(|i| format!("{i:03}.jpg")).collect();
        build_pages(&names)
    }

    fn image() -> PageImage {
        PageImage::from_bytes(vec![1, 2, 3])
    }

    #[test]
    fn scans_backward_candidates_from_chapter_start() {
        let pages = pages(10);
        let mut scheduler = PrefetchScheduler::new(BackwardScan::FromStart);
        assert!(scheduler.recompute(&pages, 4, 3));
        assert_eq!(scheduler.queue(), &[4, 0, 5]);
    }

    #[test]
    fn earlier_page_comes_before_later_page() {
        let pages = pages(10);
        let mut scheduler = PrefetchScheduler::new(BackwardScan::NearestFirst);
        scheduler.recompute(&pages, 4, 2);
        assert_eq!(scheduler.queue(), &[4, 3]);
    }

    #[test]
    fn nearest_first_scans_back_from_current() {
        let pages = pages(10);
        let mut scheduler = PrefetchScheduler::new(BackwardScan::NearestFirst);
        scheduler.recompute(&pages, 4, 5);
        assert_eq!(scheduler.queue(), &[4, 3, 5, 2, 6]);
    }

    #[test]
    fn skipped_pages_do_not_consume_slots() {
        let mut pages = pages(10);
        pages[0].mark_downloaded(image());
        pages[5].mark_failed();
        let mut scheduler = PrefetchScheduler::new(BackwardScan::FromStart);
        scheduler.recompute(&pages, 4, 4);
        assert_eq!(scheduler.queue(), &[4, 1, 6, 2]);
    }

    #[test]
    fn exhausted_side_lets_the_other_continue() {
        let pages = pages(6);
        let mut scheduler = PrefetchScheduler::new(BackwardScan::FromStart);
        scheduler.recompute(&pages, 0, 4);
        assert_eq!(scheduler.queue(), &[0, 1, 2, 3]);

        let mut scheduler = PrefetchScheduler::new(BackwardScan::FromStart);
        scheduler.recompute(&pages, 5, 4);
        assert_eq!(scheduler.queue(), &[5, 0, 1, 2]);
    }

    #[test]
    fn jump_puts_current_first_and_respects_bound() {
        let pages = pages(10);
        let mut scheduler = PrefetchScheduler::new(BackwardScan::FromStart);
        scheduler.recompute(&pages, 0, 3);
        assert_eq!(scheduler.queue(), &[0, 1, 2]);

        assert!(scheduler.recompute(&pages, 8, 3));
        assert_eq!(scheduler.queue(), &[8, 0, 1]);
        assert!(scheduler.queue().len() <= 3);

        // 调小上限后立即截断
        scheduler.recompute(&pages, 8, 1);
        assert_eq!(scheduler.queue(), &[8]);
    }

    #[test]
    fn unchanged_queue_reports_no_change() {
        let pages = pages(10);
        let mut scheduler = PrefetchScheduler::new(BackwardScan::FromStart);
        assert!(scheduler.recompute(&pages, 4, 3));
        assert!(!scheduler.recompute(&pages, 4, 3));
    }

    #[test]
    fn pool_never_exceeds_max_parallel() {
        let mut pages = pages(5);
        let mut scheduler = PrefetchScheduler::new(BackwardScan::FromStart);
        scheduler.recompute(&pages, 0, 5);

        let first = scheduler.fill_pool(&mut pages, 2);
        assert_eq!(first.iter().map(|t| t.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(scheduler.active(), 2);
        assert!(scheduler.fill_pool(&mut pages, 2).is_empty());

        scheduler.complete(&mut pages, 0, Some(image()));
        scheduler.recompute(&pages, 0, 5);
        let next = scheduler.fill_pool(&mut pages, 2);
        assert_eq!(next.iter().map(|t| t.index).collect::<Vec<_>>(), vec![2]);
        assert_eq!(scheduler.active(), 2);
    }

    #[test]
    fn downloaded_and_failed_pages_leave_the_queue() {
        let mut pages = pages(4);
        let mut scheduler = PrefetchScheduler::new(BackwardScan::FromStart);
        scheduler.recompute(&pages, 0, 4);
        scheduler.fill_pool(&mut pages, 4);
        scheduler.complete(&mut pages, 0, Some(image()));
        scheduler.complete(&mut pages, 1, None);
        assert_eq!(scheduler.active(), 2);

        scheduler.recompute(&pages, 0, 4);
        assert_eq!(scheduler.queue(), &[2, 3]);
        assert!(scheduler.fill_pool(&mut pages, 4).is_empty());

        assert!(PrefetchScheduler::retry(&mut pages, 1));
        assert!(!PrefetchScheduler::retry(&mut pages, 0));
        scheduler.recompute(&pages, 0, 4);
        assert!(scheduler.is_queued(1));
    }

    #[test]
    fn stale_completion_only_releases_the_slot() {
        let mut pages = pages(2);
        let mut scheduler = PrefetchScheduler::new(BackwardScan::FromStart);
        scheduler.complete(&mut pages, 1, Some(image()));
        assert_eq!(scheduler.active(), 0);
        assert!(!pages[1].is_downloaded());
    }
}
