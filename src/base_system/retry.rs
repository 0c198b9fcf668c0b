//! 固定间隔重试策略。
//!
//! 页面图片下载在传输失败时按固定间隔重试，重试耗尽后交给调用方落到页面状态上，
//! 不会向上抛出致命错误。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

/// 重试期间检查取消标记的粒度。
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次），至少为 1。
    pub max_attempts: u32,
    /// 两次尝试之间的固定等待。
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// 首次请求 + 6 次重试，间隔 1 秒。
    pub fn page_default() -> Self {
        Self::new(7, Duration::from_secs(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::page_default()
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display> {
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E: fmt::Display> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts } => {
                *attempts
            }
        }
    }
}

/// 反复执行 `op` 直到成功、次数耗尽或 `cancel` 被置位。
///
/// `op` 的参数是从 1 开始的尝试序号。取消只在两次尝试之间生效，进行中的请求不会被打断。
pub fn run_with_retry<T, E, F>(
    policy: &RetryPolicy,
    cancel: Option<&AtomicBool>,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        if is_cancelled(cancel) {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                tracing::debug!(
                    target: "retry",
                    attempt,
                    max_attempts,
                    "请求失败，{}ms 后重试: {err}",
                    policy.delay.as_millis()
                );
                if !sleep_unless_cancelled(policy.delay, cancel) {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            }
        }
    }
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false)
}

/// 分片睡眠，返回 false 表示期间收到取消。
fn sleep_unless_cancelled(delay: Duration, cancel: Option<&AtomicBool>) -> bool {
    if delay.is_zero() {
        return !is_cancelled(cancel);
    }
    let deadline = Instant::now() + delay;
    loop {
        if is_cancelled(cancel) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}
