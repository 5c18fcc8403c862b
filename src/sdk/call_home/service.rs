//! 回家请求协调器
//!
//! 状态机：无请求 → REQUESTED → ACCEPTED / REJECTED → 无请求（记录被删除）。
//! 自动清除在后台任务中运行：任何状态的请求，只要目标到家距离小于阈值就删除记录。

use crate::sdk::call_home::listener::{CallHomeListener, EmptyCallHomeListener};
use crate::sdk::call_home::models::{CallHomeRequest, CallHomeStatus, ClearedRequest};
use crate::sdk::config::{SdkConfig, SessionContext};
use crate::sdk::error::{SdkError, SdkResult};
use crate::sdk::family::models::{Family, MemberDistance};
use crate::sdk::family::service::FamilyRepository;
use crate::sdk::functions::{CloudFunctions, EmptyCloudFunctions, SEND_CALL_HOME_NOTIFICATION};
use crate::sdk::serialization::now_millis;
use crate::sdk::store::{paths, subscribe_value, RemoteStore};
use crate::sdk::stream::{boxed, SdkStream};
use futures_util::StreamExt;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 回家请求协调器（绑定一个家庭）
pub struct CallHomeCoordinator {
    store: Arc<dyn RemoteStore>,
    session: Arc<SessionContext>,
    family_id: String,
    families: FamilyRepository,
    functions: Arc<dyn CloudFunctions>,
    listener: Arc<dyn CallHomeListener>,
    radius_meters: i64,
}

impl CallHomeCoordinator {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        session: Arc<SessionContext>,
        family_id: impl Into<String>,
        config: &SdkConfig,
    ) -> Self {
        Self {
            families: FamilyRepository::new(store.clone(), session.clone()),
            store,
            session,
            family_id: family_id.into(),
            functions: Arc::new(EmptyCloudFunctions),
            listener: Arc::new(EmptyCallHomeListener),
            radius_meters: config.auto_clear_radius_meters,
        }
    }

    /// 设置云函数客户端（用于发送回家通知）
    pub fn with_functions(mut self, functions: Arc<dyn CloudFunctions>) -> Self {
        self.functions = functions;
        self
    }

    /// 设置自动清除回调
    pub fn with_listener(mut self, listener: Arc<dyn CallHomeListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn family_id(&self) -> &str {
        &self.family_id
    }

    /// 当前用户请求 `target_id` 回家
    ///
    /// 先读后写，只做尽力而为的重复检查：两个请求者同时创建时后写者覆盖前者。
    /// 无法解析的残留节点（例如删除后又被写入的孤立 `status`）视为不存在，直接覆盖。
    pub async fn create(&self, target_id: &str) -> SdkResult<CallHomeRequest> {
        if target_id.is_empty() || target_id == self.session.user_id {
            return Err(SdkError::InvalidArgument(format!(
                "cannot call {:?} home",
                target_id
            )));
        }
        let path = paths::call_home_request(&self.family_id, target_id);
        match self.store.get(&path).await?.decode::<CallHomeRequest>() {
            Ok(Some(_)) => {
                warn!("[CallHome] {} 已有未结束的回家请求", target_id);
                return Err(SdkError::DuplicateRequest {
                    target_id: target_id.to_string(),
                });
            }
            Ok(None) => {}
            Err(e) => warn!("[CallHome] 覆盖 {} 的残留请求节点: {}", target_id, e),
        }

        let request = CallHomeRequest {
            requester_id: self.session.user_id.clone(),
            target_id: target_id.to_string(),
            created_at: now_millis(),
            status: CallHomeStatus::Requested,
        };
        self.store.set(&path, json!(request)).await?;
        info!(
            "[CallHome] 📣 {} 请求 {} 回家 (family={})",
            request.requester_id, target_id, self.family_id
        );

        let payload = json!({
            "familyId": self.family_id,
            "requesterId": request.requester_id,
            "targetId": target_id,
        });
        if let Err(e) = self
            .functions
            .call(SEND_CALL_HOME_NOTIFICATION, payload)
            .await
        {
            warn!("[CallHome] 回家通知发送失败（已忽略）: {:#}", e);
        }
        Ok(request)
    }

    /// 目标成员接受或拒绝请求
    ///
    /// 只写 `status` 字段。读写之间记录若被删除，会留下只有 `status` 的残留节点，
    /// 由 `create` 覆盖或由自动清除删除。
    pub async fn resolve(&self, target_id: &str, status: CallHomeStatus) -> SdkResult<()> {
        if target_id != self.session.user_id {
            return Err(SdkError::PermissionDenied(format!(
                "{} cannot resolve the request addressed to {}",
                self.session.user_id, target_id
            )));
        }
        if status == CallHomeStatus::Requested {
            return Err(SdkError::InvalidTransition(
                "a request can only be accepted or rejected".to_string(),
            ));
        }

        let path = paths::call_home_request(&self.family_id, target_id);
        let current = self
            .store
            .get(&path)
            .await?
            .decode::<CallHomeRequest>()?
            .ok_or_else(|| SdkError::NotFound(format!("call-home request for {}", target_id)))?;
        if current.status != CallHomeStatus::Requested {
            return Err(SdkError::InvalidTransition(format!(
                "{} -> {}",
                current.status, status
            )));
        }

        self.store.set(&path.child("status"), json!(status)).await?;
        info!("[CallHome] {} 将回家请求标记为 {}", target_id, status);
        Ok(())
    }

    /// 撤销请求，失败只记录日志
    pub async fn cancel(&self, target_id: &str) {
        let path = paths::call_home_request(&self.family_id, target_id);
        match self.store.remove(&path).await {
            Ok(()) => info!("[CallHome] 撤销 {} 的回家请求", target_id),
            Err(e) => error!("[CallHome] ❌ 撤销 {} 的回家请求失败: {}", target_id, e),
        }
    }

    /// 某个目标的请求状态
    pub fn request(&self, target_id: &str) -> SdkStream<Option<CallHomeRequest>> {
        boxed(subscribe_value::<CallHomeRequest>(
            self.store.clone(),
            paths::call_home_request(&self.family_id, target_id),
        ))
    }

    /// 启动自动清除后台任务，返回的句柄被 drop 时任务随之停止
    pub fn watch_auto_clear(&self) -> AutoClearHandle {
        let watcher = AutoClearWatcher {
            store: self.store.clone(),
            family_id: self.family_id.clone(),
            listener: self.listener.clone(),
            radius_meters: self.radius_meters,
        };
        let distances = self
            .families
            .distances_to_home(&self.family_id, Family::requested_ids);
        info!("[CallHome] 🔄 启动自动清除任务 (family={})", self.family_id);
        AutoClearHandle {
            task: tokio::spawn(watcher.run(distances)),
        }
    }
}

struct AutoClearWatcher {
    store: Arc<dyn RemoteStore>,
    family_id: String,
    listener: Arc<dyn CallHomeListener>,
    radius_meters: i64,
}

impl AutoClearWatcher {
    async fn run(self, mut distances: SdkStream<Vec<MemberDistance>>) {
        // 已删除但距离流还未反映的目标，避免重复删除
        let mut cleared: HashSet<String> = HashSet::new();
        while let Some(item) = distances.next().await {
            let snapshot = match item {
                Ok(snapshot) => snapshot,
                Err(e) if e.is_terminal() => {
                    error!("[CallHome] ❌ 自动清除观察结束: {}", e);
                    self.listener.on_watch_failed(e).await;
                    return;
                }
                Err(e) => {
                    warn!("[CallHome] 跳过无法解析的距离更新: {}", e);
                    continue;
                }
            };

            cleared.retain(|target| snapshot.iter().any(|d| &d.user_id == target));
            for distance in snapshot {
                let Some(meters) = distance.distance_meters else {
                    continue;
                };
                if meters >= self.radius_meters || cleared.contains(&distance.user_id) {
                    continue;
                }
                debug!(
                    "[CallHome] {} 距家 {} 米，小于 {} 米",
                    distance.user_id, meters, self.radius_meters
                );
                let path = paths::call_home_request(&self.family_id, &distance.user_id);
                match self.store.remove(&path).await {
                    Ok(()) => {
                        info!("[CallHome] ✅ {} 已到家，自动清除回家请求", distance.user_id);
                        cleared.insert(distance.user_id.clone());
                        self.listener
                            .on_request_cleared(ClearedRequest {
                                family_id: self.family_id.clone(),
                                target_id: distance.user_id,
                                distance_meters: meters,
                            })
                            .await;
                    }
                    Err(e) => error!(
                        "[CallHome] ❌ 自动清除 {} 失败，等待下次位置更新重试: {}",
                        distance.user_id, e
                    ),
                }
            }
        }
        debug!("[CallHome] 距离流结束，自动清除任务退出");
    }
}

/// 自动清除任务句柄
pub struct AutoClearHandle {
    task: JoinHandle<()>,
}

impl AutoClearHandle {
    /// 停止任务
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for AutoClearHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
