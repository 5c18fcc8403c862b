//! combine-latest：任一输入产出时，用所有输入的最新值重新计算一次
//!
//! - 每个输入至少产出过一次之后才开始输出；
//! - 之后每次输入产出都输出一次，不做去重；
//! - 终止错误原样转发并结束；
//! - 某个输入在产出前就结束，或全部输入都结束时，组合流结束。

use crate::sdk::stream::{poll_slot, SdkStream, SlotPoll};
use crate::sdk::error::SdkResult;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// 两路 combine-latest
pub struct CombineLatest2<A, B, F> {
    a: Option<SdkStream<A>>,
    b: Option<SdkStream<B>>,
    latest_a: Option<A>,
    latest_b: Option<B>,
    combine: F,
    b_first: bool,
    done: bool,
}

/// 组合两路输入，`combine` 接收两路的最新值
pub fn combine_latest2<A, B, R, F>(a: SdkStream<A>, b: SdkStream<B>, combine: F) -> CombineLatest2<A, B, F>
where
    F: FnMut(&A, &B) -> R,
{
    CombineLatest2 {
        a: Some(a),
        b: Some(b),
        latest_a: None,
        latest_b: None,
        combine,
        b_first: false,
        done: false,
    }
}

impl<A, B, R, F> Stream for CombineLatest2<A, B, F>
where
    A: Unpin,
    B: Unpin,
    F: FnMut(&A, &B) -> R + Unpin,
{
    type Item = SdkResult<R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        // 轮流优先，避免一路持续就绪时饿死另一路
        let order = if this.b_first { [1, 0] } else { [0, 1] };
        this.b_first = !this.b_first;

        loop {
            let mut progressed = false;
            for idx in order {
                let polled = if idx == 0 {
                    poll_slot(&mut this.a, &mut this.latest_a, cx)
                } else {
                    poll_slot(&mut this.b, &mut this.latest_b, cx)
                };
                match polled {
                    SlotPoll::Updated => {
                        if let (Some(a), Some(b)) = (&this.latest_a, &this.latest_b) {
                            return Poll::Ready(Some(Ok((this.combine)(a, b))));
                        }
                        progressed = true;
                    }
                    SlotPoll::ElementError(e) => return Poll::Ready(Some(Err(e))),
                    SlotPoll::Terminal(e) => {
                        debug!("[Combine] 输入终止，组合流结束: {}", e);
                        this.done = true;
                        this.a = None;
                        this.b = None;
                        return Poll::Ready(Some(Err(e)));
                    }
                    SlotPoll::Ended | SlotPoll::Pending => {}
                }
            }
            if !progressed {
                break;
            }
        }

        let starved = (this.a.is_none() && this.latest_a.is_none())
            || (this.b.is_none() && this.latest_b.is_none());
        if starved || (this.a.is_none() && this.b.is_none()) {
            this.done = true;
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

/// N 路同类型 combine-latest
pub struct CombineLatestAll<T> {
    inputs: Vec<Option<SdkStream<T>>>,
    latest: Vec<Option<T>>,
    start: usize,
    done: bool,
}

/// 组合固定数量的同类型输入，输出与输入顺序一致
///
/// 没有输入时立即产出一个空列表并结束，而不是永远等待。
pub fn combine_latest_all<T>(inputs: Vec<SdkStream<T>>) -> CombineLatestAll<T> {
    let latest = inputs.iter().map(|_| None).collect();
    CombineLatestAll {
        inputs: inputs.into_iter().map(Some).collect(),
        latest,
        start: 0,
        done: false,
    }
}

impl<T: Clone + Unpin> Stream for CombineLatestAll<T> {
    type Item = SdkResult<Vec<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        let n = this.inputs.len();
        if n == 0 {
            this.done = true;
            return Poll::Ready(Some(Ok(Vec::new())));
        }

        let start = this.start;
        this.start = (this.start + 1) % n;

        loop {
            let mut progressed = false;
            for offset in 0..n {
                let i = (start + offset) % n;
                match poll_slot(&mut this.inputs[i], &mut this.latest[i], cx) {
                    SlotPoll::Updated => {
                        if this.latest.iter().all(Option::is_some) {
                            let values = this.latest.iter().flatten().cloned().collect();
                            return Poll::Ready(Some(Ok(values)));
                        }
                        progressed = true;
                    }
                    SlotPoll::ElementError(e) => return Poll::Ready(Some(Err(e))),
                    SlotPoll::Terminal(e) => {
                        debug!("[Combine] 第 {} 路输入终止，组合流结束: {}", i, e);
                        this.done = true;
                        this.inputs.clear();
                        return Poll::Ready(Some(Err(e)));
                    }
                    SlotPoll::Ended | SlotPoll::Pending => {}
                }
            }
            if !progressed {
                break;
            }
        }

        let starved = this
            .inputs
            .iter()
            .zip(&this.latest)
            .any(|(input, latest)| input.is_none() && latest.is_none());
        if starved || this.inputs.iter().all(Option::is_none) {
            this.done = true;
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::error::SdkError;
    use crate::sdk::testing::{assert_quiet, init_test_logger, next_item};
    use futures_util::StreamExt;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn channel<T: Send + 'static>() -> (mpsc::UnboundedSender<SdkResult<T>>, SdkStream<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, UnboundedReceiverStream::new(rx).boxed())
    }

    #[tokio::test]
    async fn latest_value_law_for_two_inputs() {
        init_test_logger();
        let (tx_a, a) = channel::<i32>();
        let (tx_b, b) = channel::<&'static str>();
        let mut combined = combine_latest2(a, b, |a, b| format!("{a}-{b}"));

        tx_a.send(Ok(1)).unwrap();
        assert_quiet(&mut combined).await;

        tx_b.send(Ok("x")).unwrap();
        assert_eq!(next_item(&mut combined).await.unwrap(), "1-x");

        // 只有 A 再次产出时复用 B 的最新值
        tx_a.send(Ok(1)).unwrap();
        assert_eq!(next_item(&mut combined).await.unwrap(), "1-x");

        tx_b.send(Ok("y")).unwrap();
        assert_eq!(next_item(&mut combined).await.unwrap(), "1-y");
    }

    #[tokio::test]
    async fn every_emission_produces_an_output() {
        let (tx_a, a) = channel::<i32>();
        let (tx_b, b) = channel::<i32>();
        let mut combined = combine_latest2(a, b, |a, b| a + b);

        tx_b.send(Ok(10)).unwrap();
        tx_a.send(Ok(1)).unwrap();
        tx_a.send(Ok(2)).unwrap();
        tx_a.send(Ok(3)).unwrap();

        assert_eq!(next_item(&mut combined).await.unwrap(), 11);
        assert_eq!(next_item(&mut combined).await.unwrap(), 12);
        assert_eq!(next_item(&mut combined).await.unwrap(), 13);
    }

    #[tokio::test]
    async fn terminal_error_ends_the_combined_stream() {
        let (tx_a, a) = channel::<i32>();
        let (tx_b, b) = channel::<i32>();
        let mut combined = combine_latest2(a, b, |a, b| a * b);

        tx_a.send(Ok(2)).unwrap();
        tx_b.send(Ok(3)).unwrap();
        assert_eq!(next_item(&mut combined).await.unwrap(), 6);

        tx_b.send(Err(SdkError::detached("families/f1", "revoked")))
            .unwrap();
        assert!(next_item(&mut combined).await.unwrap_err().is_terminal());
        assert!(combined.next().await.is_none());
    }

    #[tokio::test]
    async fn input_ending_before_first_value_ends_combination() {
        let (tx_a, a) = channel::<i32>();
        let (tx_b, b) = channel::<i32>();
        let mut combined = combine_latest2(a, b, |a, b| a + b);
        tx_a.send(Ok(1)).unwrap();
        drop(tx_b);
        assert!(combined.next().await.is_none());
        drop(tx_a);
    }

    #[tokio::test]
    async fn zero_inputs_emit_one_empty_value() {
        let mut combined = combine_latest_all::<i32>(Vec::new());
        assert_eq!(next_item(&mut combined).await.unwrap(), Vec::<i32>::new());
        assert!(combined.next().await.is_none());
    }

    #[tokio::test]
    async fn n_way_combination_keeps_input_order() {
        let (tx0, s0) = channel::<i32>();
        let (tx1, s1) = channel::<i32>();
        let (tx2, s2) = channel::<i32>();
        let mut combined = combine_latest_all(vec![s0, s1, s2]);

        tx2.send(Ok(30)).unwrap();
        tx0.send(Ok(10)).unwrap();
        assert_quiet(&mut combined).await;
        tx1.send(Ok(20)).unwrap();
        assert_eq!(next_item(&mut combined).await.unwrap(), vec![10, 20, 30]);

        tx1.send(Ok(21)).unwrap();
        assert_eq!(next_item(&mut combined).await.unwrap(), vec![10, 21, 30]);
    }

    #[tokio::test]
    async fn element_errors_pass_through_without_ending() {
        let (tx0, s0) = channel::<i32>();
        let mut combined = combine_latest_all(vec![s0]);
        tx0.send(Err(SdkError::decode("users/u1", "bad"))).unwrap();
        tx0.send(Ok(5)).unwrap();
        assert!(!next_item(&mut combined).await.unwrap_err().is_terminal());
        assert_eq!(next_item(&mut combined).await.unwrap(), vec![5]);
    }
}
