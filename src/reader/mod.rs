//! 阅读器核心：页面状态、预加载、翻页、视口追踪与阅读偏好。
//!
//! 与界面无关，TUI 和命令行模式共用同一个 [`session::ChapterSession`]。

pub mod coalesce;
pub mod download_pool;
pub mod location;
pub mod models;
pub mod navigation;
pub mod page;
pub mod prefetch;
pub mod preference;
pub mod session;
pub mod viewport;

#[cfg(test)]
mod tests;
