//! 翻页：first / prev / next / last / jump。
//!
//! 这一层不区分方向；RightToLeft 的“视觉左右”由点击处理交换。

use super::page::Page;
use super::preference::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavCommand {
    First,
    Previous,
    Next,
    Last,
    /// 从 1 开始的页码。
    Jump(usize),
}

/// 计算目标页序号；列表为空、越界或目标就是当前页时返回 None。
pub fn resolve_target(command: NavCommand, current: usize, count: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    let last = count - 1;
    let target = match command {
        NavCommand::First => 0,
        NavCommand::Previous => current.checked_sub(1)?,
        NavCommand::Next => current + 1,
        NavCommand::Last => last,
        NavCommand::Jump(number) => {
            if number == 0 || number > count {
                return None;
            }
            number - 1
        }
    };
    (target <= last && target != current).then_some(target)
}

/// 只让目标页处于 `is_viewing`。
pub fn focus_page(pages: &mut [Page], target: usize) {
    for page in pages.iter_mut() {
        page.is_viewing = page.index == target;
    }
}

/// 点击页面左半边为上一页、右半边为下一页，RightToLeft 下交换。
pub fn click_command(direction: Direction, x: u16, width: u16) -> NavCommand {
    let mut is_prev = u32::from(x) * 2 <= u32::from(width);
    if direction == Direction::RightToLeft {
        is_prev = !is_prev;
    }
    if is_prev {
        NavCommand::Previous
    } else {
        NavCommand::Next
    }
}
