//! 流组合
//!
//! 静态组合（固定输入的 combine-latest）和动态组合（按 key 集合切换内部订阅）。

pub mod combine;
pub mod switch_map;

use crate::sdk::error::{SdkError, SdkResult};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use std::task::{Context, Poll};

pub use combine::{combine_latest2, combine_latest_all, CombineLatest2, CombineLatestAll};
pub use switch_map::{switch_map_keyed, SwitchMapKeyed};

/// SDK 内部统一的装箱流
pub type SdkStream<T> = BoxStream<'static, SdkResult<T>>;

/// 单个输入被轮询一次的结果
pub(crate) enum SlotPoll {
    /// 产出了新值
    Updated,
    /// 元素级错误，原样转发
    ElementError(SdkError),
    /// 终止错误，整个组合流随之结束
    Terminal(SdkError),
    /// 输入已结束（或本来就已结束）
    Ended,
    Pending,
}

/// 轮询一个输入并记录最新值
pub(crate) fn poll_slot<T>(
    slot: &mut Option<SdkStream<T>>,
    latest: &mut Option<T>,
    cx: &mut Context<'_>,
) -> SlotPoll {
    let Some(stream) = slot.as_mut() else {
        return SlotPoll::Ended;
    };
    match stream.poll_next_unpin(cx) {
        Poll::Ready(Some(Ok(value))) => {
            *latest = Some(value);
            SlotPoll::Updated
        }
        Poll::Ready(Some(Err(e))) if e.is_terminal() => {
            *slot = None;
            SlotPoll::Terminal(e)
        }
        Poll::Ready(Some(Err(e))) => SlotPoll::ElementError(e),
        Poll::Ready(None) => {
            *slot = None;
            SlotPoll::Ended
        }
        Poll::Pending => SlotPoll::Pending,
    }
}

/// 给任意 `Stream<Item = SdkResult<T>>` 装箱
pub fn boxed<S, T>(stream: S) -> SdkStream<T>
where
    S: Stream<Item = SdkResult<T>> + Send + 'static,
{
    stream.boxed()
}
