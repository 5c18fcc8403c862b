//! 家庭定位 SDK 核心
//!
//! 远端树的快照订阅、流组合、回家请求协调、聊天窗口与地理距离计算。

pub mod call_home;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod family;
pub mod functions;
pub mod geo;
pub mod serialization;
pub mod store;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;
