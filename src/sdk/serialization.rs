use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// 宽松的 map 反序列化：单个条目格式错误时丢弃该条目，而不是让整个对象失败
///
/// 同时支持 null 或缺失（返回空 map）。
pub fn deserialize_lenient_map<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw: Option<BTreeMap<String, Value>> = Deserialize::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<T>(value) {
            Ok(item) => Some((key, item)),
            Err(e) => {
                tracing::warn!("[Serde] 丢弃格式错误的条目 {}: {}", key, e);
                None
            }
        })
        .collect())
}

/// 成员集合反序列化：`{uid: true}` 形式，值不是 `true` 的条目视为不在集合中
pub fn deserialize_member_set<'de, D>(deserializer: D) -> Result<BTreeMap<String, bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Deserialize::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, v)| v.as_bool() == Some(true))
        .map(|(k, _)| (k, true))
        .collect())
}

/// 当前毫秒时间戳
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 生成消息 ID：毫秒时间戳 + 发送者 + 随机后缀
pub fn generate_msg_id(user_id: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}{}", now_millis(), user_id, &suffix[..8])
}
