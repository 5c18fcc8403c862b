//! 按 key 集合动态切换内部订阅
//!
//! 外层流每次产出一组 `(key, 参数)`：
//! - 新出现的 key 启动内部订阅；
//! - 消失的 key 的内部订阅被 drop（随之注销远端监听）；
//! - 参数变化的 key 重启内部订阅；
//! - 其余 key 的订阅和最新值原样保留。
//!
//! 所有活跃 key 都有最新值时输出 `(key, 值)` 列表，顺序与外层一致；
//! key 集合为空时立即输出空列表。

use crate::sdk::error::SdkResult;
use crate::sdk::stream::{poll_slot, SdkStream, SlotPoll};
use futures_util::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

struct InnerSlot<P, R> {
    params: P,
    stream: Option<SdkStream<R>>,
    latest: Option<R>,
}

/// 动态 switch-map
pub struct SwitchMapKeyed<K, P, R, F> {
    outer: Option<SdkStream<Vec<(K, P)>>>,
    inners: BTreeMap<K, InnerSlot<P, R>>,
    order: Vec<K>,
    make_inner: F,
    has_outer: bool,
    done: bool,
}

/// 创建动态组合流，`make_inner` 为每个 key 构造内部订阅
pub fn switch_map_keyed<K, P, R, F>(
    outer: SdkStream<Vec<(K, P)>>,
    make_inner: F,
) -> SwitchMapKeyed<K, P, R, F>
where
    K: Ord + Clone + Debug,
    P: PartialEq,
    F: FnMut(&K, &P) -> SdkStream<R>,
{
    SwitchMapKeyed {
        outer: Some(outer),
        inners: BTreeMap::new(),
        order: Vec::new(),
        make_inner,
        has_outer: false,
        done: false,
    }
}

impl<K, P, R, F> SwitchMapKeyed<K, P, R, F>
where
    K: Ord + Clone + Debug,
    P: PartialEq,
    R: Clone,
    F: FnMut(&K, &P) -> SdkStream<R>,
{
    /// 当前活跃的内部订阅数量
    pub fn active_inner_count(&self) -> usize {
        self.inners.values().filter(|s| s.stream.is_some()).count()
    }

    fn apply_keys(&mut self, entries: Vec<(K, P)>) {
        let mut next = BTreeMap::new();
        let mut order = Vec::with_capacity(entries.len());
        for (key, params) in entries {
            if next.contains_key(&key) {
                continue;
            }
            let slot = match self.inners.remove(&key) {
                Some(slot) if slot.params == params => slot,
                previous => {
                    if previous.is_some() {
                        debug!("[SwitchMap] 参数变化，重启内部订阅 key={:?}", key);
                    } else {
                        debug!("[SwitchMap] 启动内部订阅 key={:?}", key);
                    }
                    let stream = (self.make_inner)(&key, &params);
                    InnerSlot {
                        params,
                        stream: Some(stream),
                        latest: None,
                    }
                }
            };
            order.push(key.clone());
            next.insert(key, slot);
        }
        for key in self.inners.keys() {
            debug!("[SwitchMap] 取消内部订阅 key={:?}", key);
        }
        // 旧 map 中剩余的 slot 在这里被 drop，对应的远端监听随之注销
        self.inners = next;
        self.order = order;
    }

    fn ready_output(&self) -> Option<Vec<(K, R)>> {
        if !self.has_outer {
            return None;
        }
        self.order
            .iter()
            .map(|key| {
                self.inners
                    .get(key)
                    .and_then(|slot| slot.latest.clone())
                    .map(|value| (key.clone(), value))
            })
            .collect()
    }

    fn finish(&mut self) {
        self.done = true;
        self.outer = None;
        self.inners.clear();
        self.order.clear();
    }
}

impl<K, P, R, F> Stream for SwitchMapKeyed<K, P, R, F>
where
    K: Ord + Clone + Debug + Unpin,
    P: PartialEq + Unpin,
    R: Clone + Unpin,
    F: FnMut(&K, &P) -> SdkStream<R> + Unpin,
{
    type Item = SdkResult<Vec<(K, R)>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            let mut progressed = false;

            if let Some(outer) = this.outer.as_mut() {
                match outer.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(entries))) => {
                        this.apply_keys(entries);
                        this.has_outer = true;
                        if let Some(output) = this.ready_output() {
                            return Poll::Ready(Some(Ok(output)));
                        }
                        progressed = true;
                    }
                    Poll::Ready(Some(Err(e))) if e.is_terminal() => {
                        debug!("[SwitchMap] 外层流终止: {}", e);
                        this.finish();
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                    Poll::Ready(None) => {
                        this.outer = None;
                    }
                    Poll::Pending => {}
                }
            }

            for key in this.order.clone() {
                let Some(slot) = this.inners.get_mut(&key) else {
                    continue;
                };
                match poll_slot(&mut slot.stream, &mut slot.latest, cx) {
                    SlotPoll::Updated => {
                        if let Some(output) = this.ready_output() {
                            return Poll::Ready(Some(Ok(output)));
                        }
                        progressed = true;
                    }
                    SlotPoll::ElementError(e) => return Poll::Ready(Some(Err(e))),
                    SlotPoll::Terminal(e) => {
                        debug!("[SwitchMap] 内部订阅终止 key={:?}: {}", key, e);
                        this.finish();
                        return Poll::Ready(Some(Err(e)));
                    }
                    SlotPoll::Ended | SlotPoll::Pending => {}
                }
            }

            if !progressed {
                break;
            }
        }

        let inners_done = this.inners.values().all(|s| s.stream.is_none());
        if this.outer.is_none() && (inners_done || !this.has_outer) {
            this.finish();
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
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type Senders = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SdkResult<i64>>>>>;

    fn outer_channel() -> (
        mpsc::UnboundedSender<SdkResult<Vec<(String, i64)>>>,
        SdkStream<Vec<(String, i64)>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, UnboundedReceiverStream::new(rx).boxed())
    }

    /// 每个 key 的内部流由测试手动推送；`delivered` 统计内部流实际交付的元素数
    fn make_inner(
        senders: Senders,
        delivered: Arc<HashMap<String, Arc<AtomicUsize>>>,
    ) -> impl FnMut(&String, &i64) -> SdkStream<i64> + Unpin {
        move |key: &String, _params: &i64| {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.lock().unwrap().insert(key.clone(), tx);
            let counter = delivered.get(key).cloned().unwrap_or_default();
            UnboundedReceiverStream::new(rx)
                .inspect(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .boxed()
        }
    }

    fn keys(entries: &[&str]) -> Vec<(String, i64)> {
        entries.iter().map(|k| (k.to_string(), 0)).collect()
    }

    #[tokio::test]
    async fn empty_key_set_emits_empty_result() {
        init_test_logger();
        let (tx, outer) = outer_channel();
        let senders: Senders = Arc::default();
        let mut stream = switch_map_keyed(outer, make_inner(senders, Arc::default()));

        tx.send(Ok(Vec::new())).unwrap();
        assert_eq!(next_item(&mut stream).await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn waits_for_every_inner_then_combines_latest() {
        let (tx, outer) = outer_channel();
        let senders: Senders = Arc::default();
        let mut stream = switch_map_keyed(outer, make_inner(senders.clone(), Arc::default()));

        tx.send(Ok(keys(&["m1", "m2"]))).unwrap();
        assert_quiet(&mut stream).await;

        senders.lock().unwrap()["m1"].send(Ok(500)).unwrap();
        assert_quiet(&mut stream).await;
        senders.lock().unwrap()["m2"].send(Ok(40)).unwrap();
        assert_eq!(
            next_item(&mut stream).await.unwrap(),
            vec![("m1".to_string(), 500), ("m2".to_string(), 40)]
        );

        senders.lock().unwrap()["m1"].send(Ok(80)).unwrap();
        assert_eq!(
            next_item(&mut stream).await.unwrap(),
            vec![("m1".to_string(), 80), ("m2".to_string(), 40)]
        );
    }

    #[tokio::test]
    async fn removed_key_stops_receiving_emissions() {
        let (tx, outer) = outer_channel();
        let senders: Senders = Arc::default();
        let m1_count = Arc::new(AtomicUsize::new(0));
        let mut delivered = HashMap::new();
        delivered.insert("m1".to_string(), m1_count.clone());
        let mut stream = switch_map_keyed(outer, make_inner(senders.clone(), Arc::new(delivered)));

        tx.send(Ok(keys(&["m1", "m2"]))).unwrap();
        // 内部流在轮询时才创建
        assert_quiet(&mut stream).await;
        senders.lock().unwrap()["m1"].send(Ok(1)).unwrap();
        senders.lock().unwrap()["m2"].send(Ok(2)).unwrap();
        next_item(&mut stream).await.unwrap();
        assert_eq!(m1_count.load(Ordering::SeqCst), 1);

        let m1_sender = senders.lock().unwrap()["m1"].clone();
        tx.send(Ok(keys(&["m2"]))).unwrap();
        assert_eq!(
            next_item(&mut stream).await.unwrap(),
            vec![("m2".to_string(), 2)]
        );
        assert_eq!(stream.active_inner_count(), 1);

        // m1 的内部流已被 drop，接收端关闭，后续推送不再被交付
        assert!(m1_sender.send(Ok(3)).is_err());
        assert_quiet(&mut stream).await;
        assert_eq!(m1_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn kept_keys_are_not_resubscribed() {
        let (tx, outer) = outer_channel();
        let started = Arc::new(AtomicUsize::new(0));
        let started_in = started.clone();
        let mut stream = switch_map_keyed(outer, move |_key: &String, params: &i64| {
            started_in.fetch_add(1, Ordering::SeqCst);
            futures_util::stream::iter(vec![Ok(*params)])
                .chain(futures_util::stream::pending())
                .boxed()
        });

        tx.send(Ok(vec![("a".to_string(), 1)])).unwrap();
        assert_eq!(next_item(&mut stream).await.unwrap(), vec![("a".to_string(), 1)]);

        tx.send(Ok(vec![("a".to_string(), 1), ("b".to_string(), 2)]))
            .unwrap();
        assert_eq!(
            next_item(&mut stream).await.unwrap(),
            vec![("a".to_string(), 1), ("b".to_string(), 2)]
        );
        assert_eq!(started.load(Ordering::SeqCst), 2);

        // 参数变化会重启该 key
        tx.send(Ok(vec![("a".to_string(), 5), ("b".to_string(), 2)]))
            .unwrap();
        assert_eq!(
            next_item(&mut stream).await.unwrap(),
            vec![("a".to_string(), 5), ("b".to_string(), 2)]
        );
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn inner_terminal_error_ends_everything() {
        let (tx, outer) = outer_channel();
        let senders: Senders = Arc::default();
        let mut stream = switch_map_keyed(outer, make_inner(senders.clone(), Arc::default()));

        tx.send(Ok(keys(&["m1"]))).unwrap();
        assert_quiet(&mut stream).await;
        senders.lock().unwrap()["m1"].send(Ok(1)).unwrap();
        next_item(&mut stream).await.unwrap();

        senders.lock().unwrap()["m1"]
            .send(Err(SdkError::detached("users/m1/lastLocation", "revoked")))
            .unwrap();
        assert!(next_item(&mut stream).await.unwrap_err().is_terminal());
        assert!(futures_util::StreamExt::next(&mut stream).await.is_none());
        assert_eq!(stream.active_inner_count(), 0);
    }
}
