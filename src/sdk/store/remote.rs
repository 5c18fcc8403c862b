//! 远端树存储接口
//!
//! 远端只提供"注册监听 / 注销监听"的推送语义以及基本写操作，
//! 上层通过 `SnapshotStream` 把回调包装成可取消的流。

use crate::sdk::error::{SdkError, SdkResult};
use crate::sdk::store::path::DataPath;
use crate::sdk::store::query::StoreQuery;
use crate::sdk::store::snapshot::DataSnapshot;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// 值监听器回调接口
///
/// 回调可能在存储内部线程上同步触发，实现方不得阻塞，也不得回调存储。
pub trait ValueListener: Send + Sync {
    /// 首次注册以及每次值变化时收到完整快照
    fn on_data_change(&self, snapshot: DataSnapshot);

    /// 远端终止了该监听（例如权限被收回），之后不会再有回调
    fn on_cancelled(&self, error: SdkError);
}

/// 监听注册凭证，注销时原样交回
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerRegistration {
    id: u64,
    path: DataPath,
}

impl ListenerRegistration {
    pub fn new(id: u64, path: DataPath) -> Self {
        Self { id, path }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &DataPath {
        &self.path
    }
}

/// 远端树存储
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 注册监听；`query` 为空时监听整个节点的值
    fn add_listener(
        &self,
        path: &DataPath,
        query: Option<StoreQuery>,
        listener: Arc<dyn ValueListener>,
    ) -> ListenerRegistration;

    /// 注销监听（幂等）
    fn remove_listener(&self, registration: &ListenerRegistration);

    /// 读取一次
    async fn get(&self, path: &DataPath) -> SdkResult<DataSnapshot>;

    /// 执行一次有序查询
    async fn query_once(&self, path: &DataPath, query: &StoreQuery) -> SdkResult<DataSnapshot>;

    /// 覆盖写入；`null` 等同删除
    async fn set(&self, path: &DataPath, value: Value) -> SdkResult<()>;

    /// 合并写入多个子路径（key 可以是多级相对路径），整体原子生效
    async fn update(&self, path: &DataPath, fields: Map<String, Value>) -> SdkResult<()>;

    /// 删除节点
    async fn remove(&self, path: &DataPath) -> SdkResult<()>;
}
