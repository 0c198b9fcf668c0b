//! 基础设施：配置、日志、重试与章节链接解析。

pub mod chapter_link;
pub mod config;
pub mod context;
pub mod logging;
pub mod retry;
pub mod storage;
