//! 聊天窗口
//!
//! 把实时尾页和按需拉取的历史页合并成一个严格新→旧、按 id 去重的序列，
//! 并在日期边界插入分隔符。

use crate::sdk::chat::models::{ChatCursor, ChatItem, ChatMessage, ChatPage};
use crate::sdk::chat::repository::ChatRepository;
use crate::sdk::error::{SdkError, SdkResult};
use crate::sdk::stream::SdkStream;
use chrono::FixedOffset;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// 窗口合并状态（纯数据，不涉及 IO）
#[derive(Debug, Clone)]
pub struct ChatWindowState {
    messages: Vec<ChatMessage>,
    offset: FixedOffset,
    page_size: usize,
    has_more: bool,
    loading: bool,
    paged: bool,
}

impl ChatWindowState {
    pub fn new(page_size: usize, offset: FixedOffset) -> Self {
        Self {
            messages: Vec::new(),
            offset,
            page_size,
            has_more: false,
            loading: false,
            paged: false,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// 合并实时尾页
    ///
    /// 已存在的消息原地替换（表情更新），新消息按顺序插入；
    /// 被挤出尾页的旧消息仍保留在窗口中。
    /// 拉取过历史之前，任何一次满页的尾页都打开 `has_more`（一次快照可能合并了多条新消息），
    /// 多余的一次空拉取会把它关掉。
    pub fn apply_live(&mut self, tail: Vec<ChatMessage>) {
        let tail_len = tail.len();
        for message in tail {
            self.upsert(message);
        }
        if !self.paged {
            self.has_more |= tail_len >= self.page_size;
        }
    }

    /// 合并一页历史消息，重复 id 被忽略
    pub fn apply_page(&mut self, page: ChatPage) {
        let before = self.messages.len();
        for message in page.messages {
            if !self.contains(&message.id) {
                self.insert_sorted(message);
            }
        }
        debug!(
            "[ChatWindow] 合并历史页，新增 {} 条",
            self.messages.len() - before
        );
        self.has_more = page.has_more;
        self.loading = false;
        self.paged = true;
    }

    /// 下一次历史拉取的游标
    pub fn cursor(&self) -> Option<ChatCursor> {
        self.messages.last().map(ChatCursor::after)
    }

    /// 是否应当拉取更早的消息：已滚动到最早一条、没有请求在途、且还有更多
    pub fn should_fetch(&self, visible_message_id: &str) -> bool {
        !self.loading
            && self.has_more
            && self
                .messages
                .last()
                .is_some_and(|oldest| oldest.id == visible_message_id)
    }

    /// 标记拉取开始，返回游标；条件不满足时返回 `None`
    pub fn begin_fetch(&mut self, visible_message_id: &str) -> Option<ChatCursor> {
        if !self.should_fetch(visible_message_id) {
            return None;
        }
        self.loading = true;
        self.cursor()
    }

    /// 拉取失败，允许之后重试
    pub fn fetch_failed(&mut self) {
        self.loading = false;
    }

    /// 渲染项：新→旧，每个日期的最早一条消息之后跟一个分隔符
    ///
    /// 相邻两天之间各有一个分隔符；最早一天额外带一个分隔符作为该日的标题，
    /// 且只在没有更多历史时才出现，避免该日更早的消息加载后分隔符移位。
    pub fn items(&self) -> Vec<ChatItem> {
        let mut items = Vec::with_capacity(self.messages.len() + 4);
        let mut iter = self.messages.iter().peekable();
        while let Some(message) = iter.next() {
            let day = message.day(&self.offset);
            items.push(ChatItem::Message(message.clone()));
            let boundary = match iter.peek() {
                Some(next) => next.day(&self.offset) != day,
                None => !self.has_more,
            };
            if boundary {
                items.push(ChatItem::DateSeparator(day));
            }
        }
        items
    }

    fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    fn upsert(&mut self, message: ChatMessage) {
        match self.messages.iter().position(|m| m.id == message.id) {
            Some(index) if self.messages[index].timestamp == message.timestamp => {
                self.messages[index] = message;
            }
            Some(index) => {
                warn!("[ChatWindow] 消息 {} 的时间戳发生变化，重新排序", message.id);
                self.messages.remove(index);
                self.insert_sorted(message);
            }
            None => self.insert_sorted(message),
        }
    }

    fn insert_sorted(&mut self, message: ChatMessage) {
        let index = self
            .messages
            .partition_point(|m| m.cmp_newest_first(&message).is_lt());
        self.messages.insert(index, message);
    }
}

/// 窗口的一次输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatWindowView {
    pub items: Vec<ChatItem>,
    pub has_more: bool,
    pub loading: bool,
    /// 最近一次历史拉取失败的原因（下次成功后清空）
    pub fetch_error: Option<SdkError>,
}

enum WindowCommand {
    ScrolledTo(String),
}

/// 窗口控制句柄
#[derive(Clone)]
pub struct ChatWindowHandle {
    tx: mpsc::UnboundedSender<WindowCommand>,
}

impl ChatWindowHandle {
    /// 通知窗口当前可见的最早消息；窗口已关闭时返回 `false`
    pub fn scrolled_to(&self, message_id: &str) -> bool {
        self.tx
            .send(WindowCommand::ScrolledTo(message_id.to_string()))
            .is_ok()
    }
}

/// 聊天窗口流
///
/// drop 即关闭窗口：实时订阅随之注销，在途的历史拉取被丢弃。
pub struct ChatWindow {
    repository: Arc<ChatRepository>,
    state: ChatWindowState,
    live: Option<SdkStream<Vec<ChatMessage>>>,
    commands: Option<UnboundedReceiverStream<WindowCommand>>,
    fetch: Option<BoxFuture<'static, SdkResult<ChatPage>>>,
    fetch_error: Option<SdkError>,
}

impl ChatWindow {
    pub fn open(repository: Arc<ChatRepository>, offset: FixedOffset) -> (Self, ChatWindowHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        info!("[ChatWindow] 打开家庭 {} 的聊天窗口", repository.family_id());
        let window = Self {
            live: Some(repository.live_tail()),
            state: ChatWindowState::new(repository.page_size(), offset),
            repository,
            commands: Some(UnboundedReceiverStream::new(rx)),
            fetch: None,
            fetch_error: None,
        };
        (window, ChatWindowHandle { tx })
    }

    pub fn state(&self) -> &ChatWindowState {
        &self.state
    }

    fn view(&self) -> ChatWindowView {
        ChatWindowView {
            items: self.state.items(),
            has_more: self.state.has_more(),
            loading: self.state.is_loading(),
            fetch_error: self.fetch_error.clone(),
        }
    }

    /// 处理积压的命令，发起了拉取时返回 `true`
    fn drain_commands(&mut self, cx: &mut Context<'_>) -> bool {
        let mut started = false;
        while let Some(commands) = self.commands.as_mut() {
            match commands.poll_next_unpin(cx) {
                Poll::Ready(Some(WindowCommand::ScrolledTo(id))) => {
                    match self.state.begin_fetch(&id) {
                        Some(cursor) => {
                            debug!("[ChatWindow] 滚动到 {}，拉取更早的消息", id);
                            let repository = self.repository.clone();
                            self.fetch = Some(
                                async move { repository.fetch_older(&cursor).await }.boxed(),
                            );
                            started = true;
                        }
                        None => debug!("[ChatWindow] 滚动到 {}，无需拉取", id),
                    }
                }
                Poll::Ready(None) => self.commands = None,
                Poll::Pending => break,
            }
        }
        started
    }
}

impl Stream for ChatWindow {
    type Item = SdkResult<ChatWindowView>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.live.is_none() {
            return Poll::Ready(None);
        }

        if this.drain_commands(cx) {
            return Poll::Ready(Some(Ok(this.view())));
        }

        if let Some(fetch) = this.fetch.as_mut() {
            if let Poll::Ready(result) = fetch.poll_unpin(cx) {
                this.fetch = None;
                match result {
                    Ok(page) => {
                        this.fetch_error = None;
                        this.state.apply_page(page);
                    }
                    Err(e) => {
                        warn!("[ChatWindow] 历史拉取失败: {}", e);
                        this.state.fetch_failed();
                        this.fetch_error = Some(e);
                    }
                }
                return Poll::Ready(Some(Ok(this.view())));
            }
        }

        let Some(live) = this.live.as_mut() else {
            return Poll::Ready(None);
        };
        match live.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(tail))) => {
                this.state.apply_live(tail);
                Poll::Ready(Some(Ok(this.view())))
            }
            Poll::Ready(Some(Err(e))) if e.is_terminal() => {
                warn!("[ChatWindow] 实时订阅结束: {}", e);
                this.live = None;
                this.fetch = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                this.live = None;
                this.fetch = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
