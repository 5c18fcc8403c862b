//! 聊天远端读写
//!
//! 消息按 `negTimestamp` 升序查询（即新→旧），历史分页从游标之后继续。

use crate::sdk::chat::models::{ChatCursor, ChatMessage, ChatPage, MessageType};
use crate::sdk::config::SessionContext;
use crate::sdk::error::{SdkError, SdkResult};
use crate::sdk::serialization::{generate_msg_id, now_millis};
use crate::sdk::store::{paths, subscribe_list, DataSnapshot, RemoteStore, StoreQuery};
use crate::sdk::stream::{boxed, SdkStream};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ORDER_FIELD: &str = "negTimestamp";

/// 家庭聊天仓库
pub struct ChatRepository {
    store: Arc<dyn RemoteStore>,
    session: Arc<SessionContext>,
    family_id: String,
    page_size: usize,
}

impl ChatRepository {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        session: Arc<SessionContext>,
        family_id: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            session,
            family_id: family_id.into(),
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn family_id(&self) -> &str {
        &self.family_id
    }

    /// 最新一页消息的实时订阅（新→旧）
    pub fn live_tail(&self) -> SdkStream<Vec<ChatMessage>> {
        let query = StoreQuery::order_by_child(ORDER_FIELD).limit_to_first(self.page_size);
        boxed(subscribe_list(
            self.store.clone(),
            paths::chat(&self.family_id),
            Some(query),
            decode_message,
        ))
    }

    /// 拉取游标之前（更早）的一页
    ///
    /// 多取一条用于判断是否还有更多。
    pub async fn fetch_older(&self, cursor: &ChatCursor) -> SdkResult<ChatPage> {
        let query = StoreQuery::order_by_child(ORDER_FIELD)
            .start_after(json!(cursor.neg_timestamp), Some(cursor.message_id.clone()))
            .limit_to_first(self.page_size + 1);
        let snapshot = self
            .store
            .query_once(&paths::chat(&self.family_id), &query)
            .await?;

        let mut messages: Vec<ChatMessage> = snapshot
            .children()
            .iter()
            .filter_map(decode_message)
            .collect();
        let has_more = messages.len() > self.page_size;
        messages.truncate(self.page_size);
        debug!(
            "[Chat] 游标 {} 之后拉取 {} 条, has_more={}",
            cursor.neg_timestamp,
            messages.len(),
            has_more
        );
        Ok(ChatPage { messages, has_more })
    }

    /// 发送文本消息
    pub async fn send_text(&self, text: &str) -> SdkResult<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SdkError::InvalidArgument("empty text message".to_string()));
        }
        self.send(MessageType::Text, Some(text.to_string()), Vec::new(), None)
            .await
    }

    /// 发送媒体消息（媒体已由宿主上传，这里只写引用）
    pub async fn send_media(
        &self,
        message_type: MessageType,
        media: Vec<String>,
        duration: Option<u32>,
    ) -> SdkResult<ChatMessage> {
        if message_type == MessageType::Text {
            return Err(SdkError::InvalidArgument(
                "use send_text for text messages".to_string(),
            ));
        }
        if media.is_empty() {
            return Err(SdkError::InvalidArgument(
                "media message without references".to_string(),
            ));
        }
        self.send(message_type, None, media, duration).await
    }

    async fn send(
        &self,
        message_type: MessageType,
        text: Option<String>,
        media: Vec<String>,
        duration: Option<u32>,
    ) -> SdkResult<ChatMessage> {
        let timestamp = now_millis();
        let message = ChatMessage {
            id: generate_msg_id(&self.session.user_id),
            sender_id: self.session.user_id.clone(),
            timestamp,
            neg_timestamp: -timestamp,
            message_type,
            text,
            media,
            duration,
            reactions: BTreeMap::new(),
        };
        self.store
            .set(
                &paths::chat_message(&self.family_id, &message.id),
                json!(message),
            )
            .await?;
        info!(
            "[Chat] ✉️ {} 发送 {:?} 消息 {}",
            message.sender_id, message.message_type, message.id
        );
        Ok(message)
    }

    /// 设置或清除当前用户对某条消息的表情
    pub async fn set_reaction(&self, message_id: &str, emoji: Option<&str>) -> SdkResult<()> {
        let path = paths::chat_message(&self.family_id, message_id);
        if !self.store.get(&path).await?.exists() {
            return Err(SdkError::NotFound(format!("message {}", message_id)));
        }
        let mut fields = Map::new();
        fields.insert(
            format!("reactions/{}", self.session.user_id),
            emoji.map_or(Value::Null, |e| Value::String(e.to_string())),
        );
        self.store.update(&path, fields).await?;
        debug!(
            "[Chat] {} 对消息 {} 的表情: {:?}",
            self.session.user_id, message_id, emoji
        );
        Ok(())
    }
}

fn decode_message(child: &DataSnapshot) -> Option<ChatMessage> {
    match child.decode::<ChatMessage>() {
        Ok(Some(mut message)) => {
            message.id = child.key().to_string();
            Some(message)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("[Chat] 丢弃格式错误的消息: {}", e);
            None
        }
    }
}
