//! 聊天消息模型

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Voice,
}

/// 聊天消息（对应 `chats/{familyId}/{messageId}`）
///
/// 除 `reactions` 外写入后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub sender_id: String,
    /// 发送时间（毫秒）
    pub timestamp: i64,
    /// `-timestamp`，远端按它升序查询得到新→旧的顺序
    #[serde(default)]
    pub neg_timestamp: i64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// 媒体引用（下载地址或存储路径）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    /// 音视频时长（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    /// 用户 ID → 表情
    #[serde(default)]
    pub reactions: BTreeMap<String, String>,
}

impl ChatMessage {
    /// 窗口内的排序：新消息在前，同一毫秒按 id 升序
    ///
    /// 与远端 `(negTimestamp, key)` 的升序查询顺序一致。
    pub fn cmp_newest_first(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }

    /// 消息在给定时区下的日历日期
    pub fn day(&self, offset: &FixedOffset) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp)
            .unwrap_or_default()
            .with_timezone(offset)
            .date_naive()
    }
}

/// 窗口渲染项
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatItem {
    Message(ChatMessage),
    /// 日期分隔符，位于该日最早一条消息之后
    DateSeparator(NaiveDate),
}

impl ChatItem {
    pub fn as_message(&self) -> Option<&ChatMessage> {
        match self {
            ChatItem::Message(message) => Some(message),
            ChatItem::DateSeparator(_) => None,
        }
    }
}

/// 分页游标：已加载的最早一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCursor {
    pub neg_timestamp: i64,
    pub message_id: String,
}

impl ChatCursor {
    pub fn after(message: &ChatMessage) -> Self {
        Self {
            neg_timestamp: -message.timestamp,
            message_id: message.id.clone(),
        }
    }
}

/// 一页历史消息（新→旧）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPage {
    pub messages: Vec<ChatMessage>,
    /// 是否还有更早的消息
    pub has_more: bool,
}
