//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。阅读偏好（方向、缩放、预加载等）
//! 不在这里，见 `reader::preference`。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};
use super::retry::RetryPolicy;

/// 预加载队列中“前面的页”（页码小于当前页）的扫描方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackwardScan {
    /// 从章节第一页开始顺序扫描（与网页版阅读器行为一致）。
    #[default]
    FromStart,
    /// 从当前页往回扫描，离当前页越近越优先。
    NearestFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 程序配置
    #[serde(default = "default_false")]
    pub old_cli: bool,

    // 网络配置
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_min_connect_timeout")]
    pub min_connect_timeout: f64,
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    // 调度配置
    #[serde(default = "default_window_ms")]
    pub render_window_ms: u64,
    #[serde(default = "default_window_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_window_ms")]
    pub location_delay_ms: u64,
    #[serde(default)]
    pub backward_scan: BackwardScan,

    #[serde(skip)]
    data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            old_cli: default_false(),
            server_url: default_server_url(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            min_connect_timeout: default_min_connect_timeout(),
            fetch_attempts: default_fetch_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            render_window_ms: default_window_ms(),
            settle_delay_ms: default_window_ms(),
            location_delay_ms: default_window_ms(),
            backward_scan: BackwardScan::default(),
            data_dir: None,
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 11] = [
            FieldMeta {
                name: "old_cli",
                description: "是否使用老版本命令行界面（逐行输入命令）",
            },
            FieldMeta {
                name: "server_url",
                description: "Kasen 服务器地址，例如 http://127.0.0.1:42072",
            },
            FieldMeta {
                name: "user_agent",
                description: "请求使用的 User-Agent",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "min_connect_timeout",
                description: "最小连接超时时间（秒）",
            },
            FieldMeta {
                name: "fetch_attempts",
                description: "单页图片最大尝试次数（含首次请求）",
            },
            FieldMeta {
                name: "retry_delay_ms",
                description: "单页图片重试间隔, 单位ms",
            },
            FieldMeta {
                name: "render_window_ms",
                description: "界面重绘合并窗口, 单位ms",
            },
            FieldMeta {
                name: "settle_delay_ms",
                description: "打开章节后暂停预加载/视口追踪的时间, 单位ms",
            },
            FieldMeta {
                name: "location_delay_ms",
                description: "页码写回阅读记录前的防抖时间, 单位ms",
            },
            FieldMeta {
                name: "backward_scan",
                description: "预加载时当前页之前的页的扫描方式, 可选: [from_start, nearest_first]",
            },
        ];
        &FIELDS
    }
}

impl Config {
    pub fn set_data_dir(&mut self, dir: Option<&Path>) {
        self.data_dir = dir.map(Path::to_path_buf);
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// 偏好与阅读记录的落盘目录。
    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir().join("storage")
    }

    pub fn server_base(&self) -> String {
        self.server_url.trim().trim_end_matches('/').to_string()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.min_connect_timeout <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(self.min_connect_timeout))
    }
}

fn default_false() -> bool {
    false
}

fn default_server_url() -> String {
    "http://127.0.0.1:42072".to_string()
}

fn default_user_agent() -> String {
    format!("kasen-reader/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    15
}

fn default_min_connect_timeout() -> f64 {
    3.0
}

fn default_fetch_attempts() -> u32 {
    7
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_window_ms() -> u64 {
    250
}
