//! 家庭 SDK 客户端
//!
//! 持有远端存储、会话和配置，按需创建各业务组件。

use crate::sdk::call_home::{CallHomeCoordinator, CallHomeListener, EmptyCallHomeListener};
use crate::sdk::chat::{ChatRepository, ChatWindow, ChatWindowHandle};
use crate::sdk::config::{SdkConfig, SessionContext};
use crate::sdk::error::SdkResult;
use crate::sdk::family::{FamilyRepository, PresenceReporter};
use crate::sdk::functions::{CloudFunctions, EmptyCloudFunctions, HttpCloudFunctions};
use crate::sdk::store::RemoteStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// 家庭 SDK 客户端
#[derive(Clone)]
pub struct FamilyClient {
    pub(crate) config: SdkConfig,
    session: Arc<SessionContext>,
    store: Arc<dyn RemoteStore>,
    // 云函数（默认不发起调用）
    functions: Arc<dyn CloudFunctions>,
    // 回家请求自动清除回调（可由调用方注册）
    call_home_listener: Arc<dyn CallHomeListener>,
}

impl FamilyClient {
    pub fn new(config: SdkConfig, session: SessionContext, store: Arc<dyn RemoteStore>) -> Self {
        info!("[Client] 初始化家庭客户端，用户ID: {}", session.user_id);
        Self {
            config,
            session: Arc::new(session),
            store,
            functions: Arc::new(EmptyCloudFunctions),
            call_home_listener: Arc::new(EmptyCallHomeListener),
        }
    }

    /// 使用配置中的地址连接 HTTP 云函数
    pub fn connect_functions(&mut self) -> Result<()> {
        let functions = HttpCloudFunctions::connect(
            self.config.functions_base_url.clone(),
            self.session.clone(),
        )?;
        self.functions = Arc::new(functions);
        Ok(())
    }

    /// 注册云函数实现
    pub fn set_functions(&mut self, functions: Arc<dyn CloudFunctions>) {
        self.functions = functions;
    }

    /// 注册回家请求回调，对之后创建的协调器生效
    pub fn set_call_home_listener(&mut self, listener: Arc<dyn CallHomeListener>) {
        self.call_home_listener = listener;
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn families(&self) -> FamilyRepository {
        FamilyRepository::new(self.store.clone(), self.session.clone())
    }

    pub fn presence(&self) -> PresenceReporter {
        PresenceReporter::new(self.store.clone(), self.session.clone())
    }

    pub fn call_home(&self, family_id: &str) -> CallHomeCoordinator {
        CallHomeCoordinator::new(
            self.store.clone(),
            self.session.clone(),
            family_id,
            &self.config,
        )
        .with_functions(self.functions.clone())
        .with_listener(self.call_home_listener.clone())
    }

    /// 当前用户所在家庭的回家请求协调器
    pub async fn current_call_home(&self) -> SdkResult<CallHomeCoordinator> {
        let family_id = self.families().current_family_id().await?;
        Ok(self.call_home(&family_id))
    }

    pub fn chat(&self, family_id: &str) -> ChatRepository {
        ChatRepository::new(
            self.store.clone(),
            self.session.clone(),
            family_id,
            self.config.chat_page_size,
        )
    }

    /// 打开聊天窗口，日期分隔符按配置的时区计算
    pub fn open_chat_window(&self, family_id: &str) -> (ChatWindow, ChatWindowHandle) {
        ChatWindow::open(Arc::new(self.chat(family_id)), self.config.calendar_offset())
    }
}
