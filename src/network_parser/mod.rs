//! 与 Kasen 服务器通信。

pub mod api;
