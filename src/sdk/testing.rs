//! 单元测试公共工具

use crate::sdk::error::SdkResult;
use futures_util::{Stream, StreamExt};
use std::sync::Once;
use std::time::Duration;

static INIT_LOGGER: Once = Once::new();

pub(crate) fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,family_sdk_core=debug"));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    });
}

/// 取下一个元素，超时或流结束直接 panic
pub(crate) async fn next_item<S, T>(stream: &mut S) -> SdkResult<T>
where
    S: Stream<Item = SdkResult<T>> + Unpin,
{
    match tokio::time::timeout(Duration::from_secs(2), stream.next()).await {
        Ok(Some(item)) => item,
        Ok(None) => panic!("stream ended unexpectedly"),
        Err(_) => panic!("timed out waiting for stream item"),
    }
}

/// 断言短时间内没有新元素
pub(crate) async fn assert_quiet<S, T>(stream: &mut S)
where
    S: Stream<Item = SdkResult<T>> + Unpin,
    T: std::fmt::Debug,
{
    if let Ok(item) = tokio::time::timeout(Duration::from_millis(50), stream.next()).await {
        panic!("expected no emission, got {:?}", item);
    }
}

/// 轮询直到条件成立
pub(crate) async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
