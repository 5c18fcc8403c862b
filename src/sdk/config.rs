//! SDK 配置与会话上下文

use chrono::{FixedOffset, Offset, Utc};

/// 回家请求自动清除半径（米）
pub const AUTO_CLEAR_RADIUS_METERS: i64 = 100;

/// 聊天默认分页大小
pub const DEFAULT_CHAT_PAGE_SIZE: usize = 20;

/// SDK 配置
#[derive(Clone, Debug)]
pub struct SdkConfig {
    /// 云函数 HTTP 基础地址
    pub functions_base_url: String,
    /// 聊天分页大小（实时尾页与历史分页共用）
    pub chat_page_size: usize,
    /// 日期分隔符使用的时区偏移（分钟）
    pub utc_offset_minutes: i32,
    /// 自动清除回家请求的距离阈值（米）
    pub auto_clear_radius_meters: i64,
}

impl SdkConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self {
            functions_base_url: "http://localhost:5001".to_string(),
            chat_page_size: DEFAULT_CHAT_PAGE_SIZE,
            utc_offset_minutes: 0,
            auto_clear_radius_meters: AUTO_CLEAR_RADIUS_METERS,
        }
    }

    /// 日期分隔符所用的固定时区；偏移超出范围时回退到 UTC
    pub fn calendar_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                tracing::warn!(
                    "[Config] 时区偏移 {} 分钟无效，回退到 UTC",
                    self.utc_offset_minutes
                );
                Utc.fix()
            })
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 当前登录用户上下文
///
/// 由宿主应用在登录完成后构造，并显式传入每个组件。
#[derive(Clone, Debug)]
pub struct SessionContext {
    /// 当前用户 ID
    pub user_id: String,
    /// 调用云函数使用的 token
    pub token: String,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let mut config = SdkConfig::new();
        config.utc_offset_minutes = 480;
        assert_eq!(config.calendar_offset().local_minus_utc(), 8 * 3600);

        config.utc_offset_minutes = 100_000;
        assert_eq!(config.calendar_offset().local_minus_utc(), 0);
    }
}
