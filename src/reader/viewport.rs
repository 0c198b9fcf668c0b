//! 连续滚动模式下的视口追踪。
//!
//! 判定线是视口顶边：只有顶边落在某页范围内时该页才算“进入”。页间空隙里
//! 没有任何页相交。区域需要显式订阅，会话结束或离开滚动模式时逐个退订。

use std::collections::BTreeMap;
#[cfg(test)]
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use super::page::RegionId;

/// 滚动模式下各页的纵向布局（单位由前端决定，TUI 里是行）。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrollLayout {
    tops: Vec<u32>,
    heights: Vec<u32>,
    total: u32,
}

impl ScrollLayout {
    pub fn new(heights: &[u32], gap: u32) -> Self {
        let mut tops = Vec::with_capacity(heights.len());
        let mut cursor = 0u32;
        for (i, height) in heights.iter().enumerate() {
            if i > 0 {
                cursor = cursor.saturating_add(gap);
            }
            tops.push(cursor);
            cursor = cursor.saturating_add(*height);
        }
        Self {
            tops,
            heights: heights.to_vec(),
            total: cursor,
        }
    }

    pub fn len(&self) -> usize {
        self.tops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tops.is_empty()
    }

    pub fn top_of(&self, region: RegionId) -> Option<u32> {
        self.tops.get(region).copied()
    }

    pub fn height_of(&self, region: RegionId) -> Option<u32> {
        self.heights.get(region).copied()
    }

    pub fn total_height(&self) -> u32 {
        self.total
    }

    pub fn intersects(&self, region: RegionId, scroll_top: u32) -> bool {
        match (self.top_of(region), self.height_of(region)) {
            (Some(top), Some(height)) => top <= scroll_top && scroll_top < top.saturating_add(height),
            _ => false,
        }
    }

    pub fn region_at(&self, scroll_top: u32) -> Option<RegionId> {
        (0..self.len()).find(|&region| self.intersects(region, scroll_top))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intersection {
    Enter(RegionId),
    Exit(RegionId),
}

#[derive(Debug, Clone, Default)]
pub struct ViewportTracker {
    /// 已订阅区域 → 上次观察到的相交状态（None 表示尚未观察）。
    regions: BTreeMap<RegionId, Option<bool>>,
}

impl ViewportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, region: RegionId) {
        self.regions.entry(region).or_insert(None);
    }

    pub fn unsubscribe(&mut self, region: RegionId) {
        self.regions.remove(&region);
    }

    /// 忘掉上次观察到的状态，下一次 `observe` 重新报告每个区域。
    pub fn reset(&mut self) {
        for state in self.regions.values_mut() {
            *state = None;
        }
    }

    #[cfg(test)]
    pub fn is_subscribed(&self, region: RegionId) -> bool {
        self.regions.contains_key(&region)
    }

    #[cfg(test)]
    pub fn subscriptions(&self) -> usize {
        self.regions.len()
    }

    /// 新订阅的区域第一次观察时总会报告一次当前状态，之后只报告变化。
    pub fn observe(&mut self, layout: &ScrollLayout, scroll_top: u32) -> Vec<Intersection> {
        let mut events = Vec::new();
        for (&region, last) in self.regions.iter_mut() {
            let now = layout.intersects(region, scroll_top);
            if *last == Some(now) {
                continue;
            }
            *last = Some(now);
            events.push(if now {
                Intersection::Enter(region)
            } else {
                Intersection::Exit(region)
            });
        }
        events
    }

    #[cfg(test)]
    pub fn intersecting(&self) -> BTreeSet<RegionId> {
        self.regions
            .iter()
            .filter(|(_, state)| **state == Some(true))
            .map(|(region, _)| *region)
            .collect()
    }
}

const RESTORE_INITIAL_DELAY: Duration = Duration::from_millis(250);
const RESTORE_INTERVAL: Duration = Duration::from_millis(100);
/// 就绪后连续校正滚动的次数，抵消图片加载带来的布局变化。
const RESTORE_SETTLE_SCROLLS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStep {
    Wait,
    Scroll(RegionId),
    Done,
}

/// 深链打开时把当前页滚动到视口内。
///
/// 目标页就绪前一直轮询等待，不设上限；用户主动滚动后立即放弃。
#[derive(Debug, Clone)]
pub struct ScrollRestore {
    target: RegionId,
    next_poll: Instant,
    scrolls_left: u32,
    cancelled: bool,
}

impl ScrollRestore {
    pub fn new(target: RegionId, now: Instant) -> Self {
        Self {
            target,
            next_poll: now + RESTORE_INITIAL_DELAY,
            scrolls_left: RESTORE_SETTLE_SCROLLS,
            cancelled: false,
        }
    }

    pub fn target(&self) -> RegionId {
        self.target
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_finished(&self) -> bool {
        self.cancelled || self.scrolls_left == 0
    }

    /// `ready` 表示目标页的内容已经可以定位。
    pub fn poll(&mut self, now: Instant, ready: bool) -> RestoreStep {
        if self.is_finished() {
            return RestoreStep::Done;
        }
        if now < self.next_poll {
            return RestoreStep::Wait;
        }
        self.next_poll = now + RESTORE_INTERVAL;
        if !ready {
            return RestoreStep::Wait;
        }
        self.scrolls_left -= 1;
        RestoreStep::Scroll(self.target)
    }
}
