//! 重绘合并、防抖与单槽动作保护。
//!
//! 时间一律由调用方传入 `Instant`，便于测试时不依赖真实睡眠。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(250);

/// 把窗口期内的多次重绘请求合并为一次。
///
/// 第一次请求决定截止时间，后续请求不会推迟它，所以连续事件下仍能按窗口节奏重绘。
#[derive(Debug, Clone)]
pub struct RenderCoalescer {
    window: Duration,
    due: Option<Instant>,
    requests: u64,
    renders: u64,
}

impl RenderCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            due: None,
            requests: 0,
            renders: 0,
        }
    }

    pub fn request(&mut self, now: Instant) {
        self.requests += 1;
        if self.due.is_none() {
            self.due = Some(now + self.window);
        }
    }

    /// 立即重绘（用户主动翻页）。
    pub fn request_now(&mut self, now: Instant) {
        self.requests += 1;
        self.due = Some(match self.due {
            Some(due) if due <= now => due,
            _ => now,
        });
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.due
    }

    /// 到期则消费该次重绘并返回 true。
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if due <= now => {
                self.due = None;
                self.renders += 1;
                true
            }
            _ => false,
        }
    }

    /// (请求次数, 实际重绘次数)
    #[cfg(test)]
    pub fn stats(&self) -> (u64, u64) {
        (self.requests, self.renders)
    }
}

impl Default for RenderCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// 尾部防抖：每次 `schedule` 都重置截止时间，只有最后一次的值会被交出。
#[derive(Debug, Clone)]
pub struct Debounced<T> {
    delay: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debounced<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn schedule(&mut self, value: T, now: Instant) {
        self.pending = Some((now + self.delay, value));
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(_, value)| value)
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(due, _)| *due)
    }

    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((due, _)) if *due <= now => self.pending.take().map(|(_, value)| value),
            _ => None,
        }
    }
}

/// 单槽动作保护：同一时间只允许一个进行中的动作，重复触发直接忽略。
#[derive(Debug, Clone, Default)]
pub struct ActionGuard {
    busy: Arc<AtomicBool>,
}

impl ActionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已有动作进行中时返回 None。
    pub fn try_begin(&self) -> Option<ActionTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ActionTicket {
                busy: Arc::clone(&self.busy),
            })
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// 持有期间动作视为进行中；可以移动到工作线程，drop 时释放。
#[derive(Debug)]
pub struct ActionTicket {
    busy: Arc<AtomicBool>,
}

impl Drop for ActionTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
