//! 快照监听适配器
//!
//! 把一次远端路径监听包装成冷的、可取消的 `Stream`：
//! - 首次被轮询时才注册远端监听；
//! - 每个快照按远端推送顺序产出一个元素；
//! - 流被 drop 时同步注销远端监听，杜绝监听泄漏；
//! - 远端终止时产出一个终止错误并自行注销。

use crate::sdk::error::{SdkError, SdkResult};
use crate::sdk::store::path::DataPath;
use crate::sdk::store::query::StoreQuery;
use crate::sdk::store::remote::{ListenerRegistration, RemoteStore, ValueListener};
use crate::sdk::store::snapshot::DataSnapshot;
use futures_util::Stream;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

enum ListenerEvent {
    Data(DataSnapshot),
    Cancelled(SdkError),
}

/// 把远端回调转发到通道
struct ChannelListener {
    tx: mpsc::UnboundedSender<ListenerEvent>,
}

impl ValueListener for ChannelListener {
    fn on_data_change(&self, snapshot: DataSnapshot) {
        // 接收端已关闭说明流已被取消，丢弃即可
        let _ = self.tx.send(ListenerEvent::Data(snapshot));
    }

    fn on_cancelled(&self, error: SdkError) {
        let _ = self.tx.send(ListenerEvent::Cancelled(error));
    }
}

type Decoder<T> = Arc<dyn Fn(&DataSnapshot) -> SdkResult<T> + Send + Sync>;

enum AdapterState {
    Idle,
    Attached {
        registration: ListenerRegistration,
        events: UnboundedReceiverStream<ListenerEvent>,
    },
    Finished,
}

/// 单路径快照流
pub struct SnapshotStream<T> {
    store: Arc<dyn RemoteStore>,
    path: DataPath,
    query: Option<StoreQuery>,
    decode: Decoder<T>,
    state: AdapterState,
}

impl<T> SnapshotStream<T> {
    /// 使用自定义解析函数创建
    ///
    /// 解析函数返回的 `Decode` 错误作为单个元素产出，不会结束流。
    pub fn new(
        store: Arc<dyn RemoteStore>,
        path: DataPath,
        query: Option<StoreQuery>,
        decode: impl Fn(&DataSnapshot) -> SdkResult<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            path,
            query,
            decode: Arc::new(decode),
            state: AdapterState::Idle,
        }
    }

    pub fn path(&self) -> &DataPath {
        &self.path
    }

    /// 是否持有远端监听
    pub fn is_attached(&self) -> bool {
        matches!(self.state, AdapterState::Attached { .. })
    }

    fn attach(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn ValueListener> = Arc::new(ChannelListener { tx });
        let registration = self
            .store
            .add_listener(&self.path, self.query.clone(), listener);
        debug!(
            "[Store] 注册监听 #{} path={}",
            registration.id(),
            self.path
        );
        self.state = AdapterState::Attached {
            registration,
            events: UnboundedReceiverStream::new(rx),
        };
    }

    fn detach(&mut self) {
        if let AdapterState::Attached { registration, .. } =
            std::mem::replace(&mut self.state, AdapterState::Finished)
        {
            self.store.remove_listener(&registration);
            debug!(
                "[Store] 注销监听 #{} path={}",
                registration.id(),
                self.path
            );
        }
    }
}

impl<T> Stream for SnapshotStream<T> {
    type Item = SdkResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if matches!(this.state, AdapterState::Idle) {
            this.attach();
        }

        let event = match &mut this.state {
            AdapterState::Idle | AdapterState::Finished => return Poll::Ready(None),
            AdapterState::Attached { events, .. } => {
                match Pin::new(events).poll_next(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(event) => event,
                }
            }
        };

        match event {
            Some(ListenerEvent::Data(snapshot)) => Poll::Ready(Some((this.decode)(&snapshot))),
            Some(ListenerEvent::Cancelled(error)) => {
                warn!("[Store] 远端终止监听 path={}: {}", this.path, error);
                this.detach();
                Poll::Ready(Some(Err(error)))
            }
            None => {
                this.detach();
                Poll::Ready(Some(Err(SdkError::detached(
                    this.path.to_string(),
                    "listener dropped by store",
                ))))
            }
        }
    }
}

impl<T> Drop for SnapshotStream<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

/// 订阅原始快照
pub fn subscribe(store: Arc<dyn RemoteStore>, path: DataPath) -> SnapshotStream<DataSnapshot> {
    SnapshotStream::new(store, path, None, |snap| Ok(snap.clone()))
}

/// 订阅有序查询的原始快照
pub fn subscribe_query(
    store: Arc<dyn RemoteStore>,
    path: DataPath,
    query: StoreQuery,
) -> SnapshotStream<DataSnapshot> {
    SnapshotStream::new(store, path, Some(query), |snap| Ok(snap.clone()))
}

/// 订阅单个值
///
/// 节点不存在或格式错误时产出 `None`（格式错误会记录日志），不会让流失败。
pub fn subscribe_value<T>(store: Arc<dyn RemoteStore>, path: DataPath) -> SnapshotStream<Option<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    SnapshotStream::new(store, path, None, |snap| match snap.decode::<T>() {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("[Store] 快照解析失败，按空值处理: {}", e);
            Ok(None)
        }
    })
}

/// 订阅子节点列表，逐个映射，映射失败的子节点被过滤
pub fn subscribe_list<T, F>(
    store: Arc<dyn RemoteStore>,
    path: DataPath,
    query: Option<StoreQuery>,
    map: F,
) -> SnapshotStream<Vec<T>>
where
    T: Send + 'static,
    F: Fn(&DataSnapshot) -> Option<T> + Send + Sync + 'static,
{
    SnapshotStream::new(store, path, query, move |snap| {
        let children = snap.children();
        let total = children.len();
        let items: Vec<T> = children.iter().filter_map(&map).collect();
        if items.len() < total {
            debug!(
                "[Store] {} 过滤掉 {} 个无法解析的子节点",
                snap.path(),
                total - items.len()
            );
        }
        Ok(items)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::store::memory::MemoryStore;
    use crate::sdk::testing::{init_test_logger, next_item};
    use futures_util::StreamExt;
    use serde_json::json;

    fn store() -> Arc<MemoryStore> {
        init_test_logger();
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn emits_initial_value_then_every_change_in_order() {
        let store = store();
        let path = DataPath::parse("users/u1/batteryLevel");
        store.set(&path, json!(90)).await.unwrap();

        let mut stream = subscribe_value::<u8>(store.clone(), path.clone());
        assert_eq!(next_item(&mut stream).await.unwrap(), Some(90));

        store.set(&path, json!(80)).await.unwrap();
        store.set(&path, json!(70)).await.unwrap();
        assert_eq!(next_item(&mut stream).await.unwrap(), Some(80));
        assert_eq!(next_item(&mut stream).await.unwrap(), Some(70));
    }

    #[tokio::test]
    async fn stream_is_cold_until_polled() {
        let store = store();
        let stream = subscribe(store.clone(), DataPath::parse("families/f1"));
        assert_eq!(store.active_listener_count(), 0);
        assert!(!stream.is_attached());
        drop(stream);
        assert_eq!(store.active_listener_count(), 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_detaches_the_listener() {
        let store = store();
        let mut stream = subscribe(store.clone(), DataPath::parse("families/f1"));
        let first = next_item(&mut stream).await.unwrap();
        assert!(!first.exists());
        assert_eq!(store.active_listener_count(), 1);

        drop(stream);
        assert_eq!(store.active_listener_count(), 0);
    }

    #[tokio::test]
    async fn remote_cancel_ends_stream_with_terminal_error() {
        let store = store();
        let path = DataPath::parse("families/f1");
        let mut stream = subscribe(store.clone(), path.clone());
        next_item(&mut stream).await.unwrap();

        store.revoke(&path, "permission revoked");
        let err = next_item(&mut stream).await.unwrap_err();
        assert!(matches!(err, SdkError::ListenerDetached { .. }));
        assert!(err.is_terminal());
        assert!(stream.next().await.is_none());
        assert_eq!(store.active_listener_count(), 0);
    }

    #[tokio::test]
    async fn malformed_value_degrades_to_none() {
        let store = store();
        let path = DataPath::parse("users/u1/batteryLevel");
        store.set(&path, json!("not a number")).await.unwrap();

        let mut stream = subscribe_value::<u8>(store.clone(), path);
        assert_eq!(next_item(&mut stream).await.unwrap(), None);
    }

    #[tokio::test]
    async fn strict_decoder_reports_element_level_error_and_continues() {
        let store = store();
        let path = DataPath::parse("users/u1/batteryLevel");
        store.set(&path, json!("oops")).await.unwrap();

        let mut stream = SnapshotStream::new(store.clone(), path.clone(), None, |snap| {
            snap.decode::<u8>()
        });
        let err = next_item(&mut stream).await.unwrap_err();
        assert!(!err.is_terminal());

        store.set(&path, json!(42)).await.unwrap();
        assert_eq!(next_item(&mut stream).await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn list_subscription_filters_malformed_children() {
        let store = store();
        let path = DataPath::parse("families/f1/members");
        store
            .set(&path, json!({"u1": true, "u2": "yes", "u3": true}))
            .await
            .unwrap();

        let mut stream = subscribe_list(store.clone(), path, None, |child| {
            child
                .value()
                .and_then(|v| v.as_bool())
                .map(|_| child.key().to_string())
        });
        assert_eq!(next_item(&mut stream).await.unwrap(), vec!["u1", "u3"]);
    }
}
