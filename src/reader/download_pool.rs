//! 页面下载线程。
//!
//! 每张签发的下载单独开一个线程，带重试拉取图片，结果通过 channel 交回会话线程。
//! 会话关闭后线程不会被打断，但在两次重试之间以及发送结果前都会检查存活标记，
//! 关闭后的结果直接丢弃。并发数由 [`PrefetchScheduler`](super::prefetch::PrefetchScheduler) 控制。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::page::PageImage;
use super::prefetch::DownloadTicket;
use crate::base_system::retry::{RetryError, RetryPolicy, run_with_retry};
use crate::network_parser::api::ImageSource;

#[derive(Debug)]
pub enum DownloadOutcome {
    Downloaded(PageImage),
    Failed { attempts: u32, reason: String },
}

#[derive(Debug)]
pub struct DownloadMsg {
    pub index: usize,
    pub outcome: DownloadOutcome,
}

pub struct DownloadPool {
    source: Arc<dyn ImageSource>,
    chapter_id: i64,
    policy: RetryPolicy,
    closed: Arc<AtomicBool>,
    tx: Sender<DownloadMsg>,
    rx: Receiver<DownloadMsg>,
}

impl DownloadPool {
    pub fn new(source: Arc<dyn ImageSource>, chapter_id: i64, policy: RetryPolicy) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            source,
            chapter_id,
            policy,
            closed: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn launch(&self, ticket: DownloadTicket) {
        let source = Arc::clone(&self.source);
        let closed = Arc::clone(&self.closed);
        let tx = self.tx.clone();
        let policy = self.policy;
        let chapter_id = self.chapter_id;
        let index = ticket.index;

        let spawned = thread::Builder::new()
            .name(format!("page-{}", index + 1))
            .spawn(move || {
                let result = run_with_retry(&policy, Some(closed.as_ref()), |attempt| {
                    if attempt > 1 {
                        debug!(target: "prefetch", page = index + 1, attempt, "重试下载");
                    }
                    source.fetch_image(chapter_id, &ticket.file_name)
                });

                if closed.load(Ordering::SeqCst) {
                    debug!(target: "prefetch", page = index + 1, "会话已关闭，丢弃下载结果");
                    return;
                }

                let outcome = match result {
                    Ok(bytes) => DownloadOutcome::Downloaded(PageImage::from_bytes(bytes)),
                    Err(RetryError::Exhausted { attempts, last }) => DownloadOutcome::Failed {
                        attempts,
                        reason: last.to_string(),
                    },
                    Err(err @ RetryError::Cancelled { .. }) => {
                        debug!(target: "prefetch", page = index + 1, attempts = err.attempts(), "下载已取消");
                        return;
                    }
                };
                let _ = tx.send(DownloadMsg { index, outcome });
            });

        if let Err(err) = spawned {
            warn!(target: "prefetch", page = index + 1, "无法启动下载线程: {err}");
            let _ = self.tx.send(DownloadMsg {
                index,
                outcome: DownloadOutcome::Failed {
                    attempts: 0,
                    reason: err.to_string(),
                },
            });
        }
    }

    pub fn try_recv(&self) -> Option<DownloadMsg> {
        if self.is_closed() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// 阻塞等待下一条结果；超时或已关闭时返回 None。
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DownloadMsg> {
        if self.is_closed() {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// 标记关闭；进行中的线程自行结束。
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for DownloadPool {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_parser::api::ApiError;
    use std::sync::atomic::AtomicU32;

    struct Flaky {
        fail_first: u32,
        calls: AtomicU32,
    }

    impl ImageSource for Flaky {
        fn fetch_image(&self, _chapter_id: i64, _file_name: &str) -> Result<Vec<u8>, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                Err(ApiError::Status(503))
            } else {
                Ok(vec![0xff, 0xd8, 0xff])
            }
        }
    }

    fn ticket(index: usize) -> DownloadTicket {
        DownloadTicket {
            index,
            file_name: format!("{:03}.jpg", index + 1),
        }
    }

    #[test]
    fn delivers_success_after_retries() {
        let source = Arc::new(Flaky {
            fail_first: 2,
            calls: AtomicU32::new(0),
        });
        let pool = DownloadPool::new(source.clone(), 1, RetryPolicy::new(7, Duration::ZERO));
        pool.launch(ticket(3));

        let msg = pool.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.index, 3);
        assert!(matches!(msg.outcome, DownloadOutcome::Downloaded(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn reports_failure_after_all_attempts() {
        let source = Arc::new(Flaky {
            fail_first: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let pool = DownloadPool::new(source.clone(), 1, RetryPolicy::new(7, Duration::ZERO));
        pool.launch(ticket(0));

        let msg = pool.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            msg.outcome,
            DownloadOutcome::Failed { attempts: 7, .. }
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn closed_pool_yields_nothing() {
        let source = Arc::new(Flaky {
            fail_first: 0,
            calls: AtomicU32::new(0),
        });
        let pool = DownloadPool::new(source, 1, RetryPolicy::new(1, Duration::ZERO));
        pool.close();
        pool.launch(ticket(0));
        assert!(pool.recv_timeout(Duration::from_millis(50)).is_none());
        assert!(pool.try_recv().is_none());
    }
}
