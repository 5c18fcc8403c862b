//! 回家请求监听器回调接口

use crate::sdk::call_home::models::ClearedRequest;
use crate::sdk::error::SdkError;
use async_trait::async_trait;

/// 自动清除回调
#[async_trait]
pub trait CallHomeListener: Send + Sync {
    /// 目标成员到家，请求已被自动删除
    async fn on_request_cleared(&self, cleared: ClearedRequest);

    /// 自动清除观察流以错误结束
    async fn on_watch_failed(&self, error: SdkError);
}

/// 空实现（默认监听器）
pub struct EmptyCallHomeListener;

#[async_trait]
impl CallHomeListener for EmptyCallHomeListener {
    async fn on_request_cleared(&self, _cleared: ClearedRequest) {}
    async fn on_watch_failed(&self, _error: SdkError) {}
}
