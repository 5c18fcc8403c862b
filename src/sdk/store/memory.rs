//! 进程内远端树实现
//!
//! 行为与真实远端一致：注册即推送当前值，值变化才推送，`null` 即删除，
//! 空对象自动裁剪。用于 CLI 模拟和单元测试。

use crate::sdk::error::{SdkError, SdkResult};
use crate::sdk::store::path::DataPath;
use crate::sdk::store::query::StoreQuery;
use crate::sdk::store::remote::{ListenerRegistration, RemoteStore, ValueListener};
use crate::sdk::store::snapshot::DataSnapshot;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

struct RegisteredListener {
    path: DataPath,
    query: Option<StoreQuery>,
    listener: Arc<dyn ValueListener>,
    last: Option<DataSnapshot>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    listeners: HashMap<u64, RegisteredListener>,
    write_failure: Option<String>,
    read_failure: Option<String>,
}

/// 内存远端树
///
/// 回调在内部锁内同步触发，从而保证同一路径的推送顺序与写入顺序一致。
pub struct MemoryStore {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                root: Value::Object(Map::new()),
                ..Inner::default()
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // 回调不会回调存储，锁中毒只可能来自测试里的 panic，直接沿用数据
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 当前存活的监听数量
    pub fn active_listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// 某个路径上存活的监听数量
    pub fn listener_count_at(&self, path: &DataPath) -> usize {
        self.lock()
            .listeners
            .values()
            .filter(|l| &l.path == path)
            .count()
    }

    /// 模拟远端终止 `path` 及其子路径上的全部监听（例如权限被收回）
    pub fn revoke(&self, path: &DataPath, reason: &str) {
        let mut inner = self.lock();
        let ids: Vec<u64> = inner
            .listeners
            .iter()
            .filter(|(_, l)| path.contains(&l.path))
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(registered) = inner.listeners.remove(&id) {
                warn!("[MemoryStore] 终止监听 #{} path={}: {}", id, registered.path, reason);
                registered
                    .listener
                    .on_cancelled(SdkError::detached(registered.path.to_string(), reason));
            }
        }
    }

    /// 让后续所有写操作失败（`None` 恢复）
    pub fn set_write_failure(&self, reason: Option<&str>) {
        self.lock().write_failure = reason.map(str::to_string);
    }

    /// 让后续所有一次性读取（`get`、`query_once`）失败，监听不受影响
    pub fn set_read_failure(&self, reason: Option<&str>) {
        self.lock().read_failure = reason.map(str::to_string);
    }

    fn snapshot_of(root: &Value, path: &DataPath, query: Option<&StoreQuery>) -> DataSnapshot {
        let value = value_at(root, path);
        match query {
            None => DataSnapshot::new(path.clone(), value.cloned()),
            Some(q) => {
                let rows = match value {
                    Some(Value::Object(children)) => q.apply(children),
                    _ => Vec::new(),
                };
                DataSnapshot::from_query(path.clone(), rows)
            }
        }
    }

    /// 在锁内执行一次写入并推送受影响的监听
    fn write(&self, changes: Vec<(DataPath, Value)>) -> SdkResult<()> {
        let mut inner = self.lock();
        if let Some(reason) = &inner.write_failure {
            return Err(SdkError::Network(reason.clone()));
        }
        for (path, value) in &changes {
            set_at(&mut inner.root, path.segments(), value.clone());
        }

        let Inner {
            root, listeners, ..
        } = &mut *inner;
        let mut ids: Vec<u64> = listeners.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let Some(registered) = listeners.get_mut(&id) else {
                continue;
            };
            if !changes.iter().any(|(p, _)| p.overlaps(&registered.path)) {
                continue;
            }
            let snapshot = Self::snapshot_of(root, &registered.path, registered.query.as_ref());
            if registered.last.as_ref() == Some(&snapshot) {
                continue;
            }
            registered.last = Some(snapshot.clone());
            registered.listener.on_data_change(snapshot);
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn add_listener(
        &self,
        path: &DataPath,
        query: Option<StoreQuery>,
        listener: Arc<dyn ValueListener>,
    ) -> ListenerRegistration {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        let snapshot = Self::snapshot_of(&inner.root, path, query.as_ref());
        listener.on_data_change(snapshot.clone());
        inner.listeners.insert(
            id,
            RegisteredListener {
                path: path.clone(),
                query,
                listener,
                last: Some(snapshot),
            },
        );
        ListenerRegistration::new(id, path.clone())
    }

    fn remove_listener(&self, registration: &ListenerRegistration) {
        if self.lock().listeners.remove(&registration.id()).is_some() {
            debug!(
                "[MemoryStore] 移除监听 #{} path={}",
                registration.id(),
                registration.path()
            );
        }
    }

    async fn get(&self, path: &DataPath) -> SdkResult<DataSnapshot> {
        let inner = self.lock();
        if let Some(reason) = &inner.read_failure {
            return Err(SdkError::Network(reason.clone()));
        }
        Ok(Self::snapshot_of(&inner.root, path, None))
    }

    async fn query_once(&self, path: &DataPath, query: &StoreQuery) -> SdkResult<DataSnapshot> {
        let inner = self.lock();
        if let Some(reason) = &inner.read_failure {
            return Err(SdkError::Network(reason.clone()));
        }
        Ok(Self::snapshot_of(&inner.root, path, Some(query)))
    }

    async fn set(&self, path: &DataPath, value: Value) -> SdkResult<()> {
        self.write(vec![(path.clone(), value)])
    }

    async fn update(&self, path: &DataPath, fields: Map<String, Value>) -> SdkResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let changes = fields
            .into_iter()
            .map(|(rel, value)| (path.child(&rel), value))
            .collect();
        self.write(changes)
    }

    async fn remove(&self, path: &DataPath) -> SdkResult<()> {
        info!("[MemoryStore] 删除节点 {}", path);
        self.write(vec![(path.clone(), Value::Null)])
    }
}

fn value_at<'a>(root: &'a Value, path: &DataPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |node, seg| node.get(seg.as_str()))
        .filter(|v| !v.is_null())
}

/// 写入（或删除）节点，并裁剪因删除产生的空对象
fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if value.is_null() {
        let Value::Object(map) = node else {
            return;
        };
        if rest.is_empty() {
            map.remove(head);
        } else if let Some(child) = map.get_mut(head) {
            set_at(child, rest, Value::Null);
            if is_empty_node(child) {
                map.remove(head);
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

fn is_empty_node(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
