//! 有序查询（按子字段排序、游标、数量限制）

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// 远端有序查询
///
/// 只提供升序排序；需要倒序时由调用方写入取反后的排序字段。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreQuery {
    /// 排序字段；为空时按 key 排序
    pub order_by_child: Option<String>,
    /// 游标：只返回严格位于 (值, key) 之后的子节点
    pub start_after: Option<QueryCursor>,
    /// 最多返回的条数
    pub limit_to_first: Option<usize>,
}

/// 查询游标
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCursor {
    pub value: Value,
    /// 同值时用于区分的 key；为空则跳过所有同值节点
    pub key: Option<String>,
}

impl StoreQuery {
    pub fn order_by_child(field: &str) -> Self {
        Self {
            order_by_child: Some(field.to_string()),
            ..Self::default()
        }
    }

    pub fn start_after(mut self, value: Value, key: Option<String>) -> Self {
        self.start_after = Some(QueryCursor { value, key });
        self
    }

    pub fn limit_to_first(mut self, limit: usize) -> Self {
        self.limit_to_first = Some(limit);
        self
    }

    fn sort_value<'a>(&self, child: &'a Value) -> &'a Value {
        match &self.order_by_child {
            Some(field) => child.get(field).unwrap_or(&Value::Null),
            None => &Value::Null,
        }
    }

    /// 在子节点集合上执行查询，返回排好序的 (key, value)
    pub fn apply(&self, children: &Map<String, Value>) -> Vec<(String, Value)> {
        let mut rows: Vec<(&String, &Value)> = children.iter().collect();
        rows.sort_by(|(ka, va), (kb, vb)| {
            compare_values(self.sort_value(va), self.sort_value(vb)).then_with(|| ka.cmp(kb))
        });

        let rows = rows.into_iter().filter(|(k, v)| match &self.start_after {
            None => true,
            Some(cursor) => match compare_values(self.sort_value(v), &cursor.value) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => match &cursor.key {
                    Some(cursor_key) => k.as_str() > cursor_key.as_str(),
                    None => false,
                },
            },
        });

        let limit = self.limit_to_first.unwrap_or(usize::MAX);
        rows.take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) | Value::Object(_) => 4,
    }
}

/// 排序规则：null < bool < number < string < 复合值
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = x.as_f64().unwrap_or(0.0);
                    let y = y.as_f64().unwrap_or(0.0);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
