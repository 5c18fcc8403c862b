//! 远端快照

use crate::sdk::error::{SdkError, SdkResult};
use crate::sdk::store::path::DataPath;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 某个路径在某一时刻的完整值
///
/// 查询快照会额外记录子节点的查询顺序，`children()` 按该顺序返回。
#[derive(Debug, Clone, PartialEq)]
pub struct DataSnapshot {
    path: DataPath,
    value: Option<Value>,
    order: Option<Vec<String>>,
}

impl DataSnapshot {
    /// 普通快照；`null` 视为不存在
    pub fn new(path: DataPath, value: Option<Value>) -> Self {
        Self {
            path,
            value: value.filter(|v| !v.is_null()),
            order: None,
        }
    }

    /// 查询快照，`children` 已按查询顺序排好
    pub fn from_query(path: DataPath, children: Vec<(String, Value)>) -> Self {
        let order = children.iter().map(|(k, _)| k.clone()).collect();
        let map: serde_json::Map<String, Value> = children.into_iter().collect();
        let value = if map.is_empty() {
            None
        } else {
            Some(Value::Object(map))
        };
        Self {
            path,
            value,
            order: Some(order),
        }
    }

    pub fn path(&self) -> &DataPath {
        &self.path
    }

    pub fn key(&self) -> &str {
        self.path.key()
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// 子节点快照（查询快照按查询顺序，否则按 key 顺序）
    pub fn children(&self) -> Vec<DataSnapshot> {
        let Some(Value::Object(map)) = &self.value else {
            return Vec::new();
        };
        match &self.order {
            Some(order) => order
                .iter()
                .filter_map(|k| {
                    map.get(k)
                        .map(|v| DataSnapshot::new(self.path.child(k), Some(v.clone())))
                })
                .collect(),
            None => map
                .iter()
                .map(|(k, v)| DataSnapshot::new(self.path.child(k), Some(v.clone())))
                .collect(),
        }
    }

    /// 子节点 key 列表（顺序同 `children()`）
    pub fn child_keys(&self) -> Vec<String> {
        match (&self.value, &self.order) {
            (Some(Value::Object(_)), Some(order)) => order.clone(),
            (Some(Value::Object(map)), None) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// 解析为目标类型；不存在返回 `Ok(None)`，格式错误返回 `Decode`
    pub fn decode<T: DeserializeOwned>(&self) -> SdkResult<Option<T>> {
        match &self.value {
            None => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| SdkError::decode(self.path.to_string(), e)),
        }
    }
}
