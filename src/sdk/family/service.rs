//! 家庭数据仓库
//!
//! 把家庭、成员、位置几个远端路径组合成界面直接可用的实时视图。

use crate::sdk::config::SessionContext;
use crate::sdk::error::{SdkError, SdkResult};
use crate::sdk::family::models::{
    Family, FamilyMember, Location, MemberDistance, MemberOverview, MemberStatus,
};
use crate::sdk::geo::{self, GeoPoint};
use crate::sdk::store::{
    paths, subscribe, subscribe_list, subscribe_value, DataPath, DataSnapshot, RemoteStore,
};
use crate::sdk::stream::{boxed, combine_latest2, combine_latest_all, switch_map_keyed, SdkStream};
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 家庭数据仓库
#[derive(Clone)]
pub struct FamilyRepository {
    store: Arc<dyn RemoteStore>,
    session: Arc<SessionContext>,
}

impl FamilyRepository {
    pub fn new(store: Arc<dyn RemoteStore>, session: Arc<SessionContext>) -> Self {
        Self { store, session }
    }

    /// 当前用户所属的家庭 ID
    pub async fn current_family_id(&self) -> SdkResult<String> {
        let snap = self
            .store
            .get(&paths::user_family(&self.session.user_id))
            .await?;
        match snap.value().and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(SdkError::NotFound(format!(
                "family of user {}",
                self.session.user_id
            ))),
        }
    }

    /// 家庭快照
    pub fn family(&self, family_id: &str) -> SdkStream<Option<Family>> {
        let id = family_id.to_string();
        subscribe(self.store.clone(), paths::family(family_id))
            .map(move |item| item.map(|snapshot| decode_family(&id, &snapshot)))
            .boxed()
    }

    /// 单个成员资料
    pub fn member(&self, user_id: &str) -> SdkStream<Option<FamilyMember>> {
        let id = user_id.to_string();
        subscribe_value::<FamilyMember>(self.store.clone(), paths::user(user_id))
            .map(move |item| {
                item.map(|member| {
                    member.map(|mut m| {
                        m.id = id.clone();
                        m
                    })
                })
            })
            .boxed()
    }

    /// 成员最近位置
    pub fn location(&self, user_id: &str) -> SdkStream<Option<Location>> {
        boxed(subscribe_value::<Location>(
            self.store.clone(),
            paths::user_location(user_id),
        ))
    }

    /// 家庭成员 ID 集合
    pub fn member_ids(&self, family_id: &str) -> SdkStream<Vec<String>> {
        boxed(subscribe_list(
            self.store.clone(),
            paths::family_members(family_id),
            None,
            |child| {
                (child.value().and_then(Value::as_bool) == Some(true))
                    .then(|| child.key().to_string())
            },
        ))
    }

    /// 固定的一组用户资料，顺序与 `user_ids` 一致，缺失的用户被过滤
    pub fn members_by_ids(&self, user_ids: &[String]) -> SdkStream<Vec<FamilyMember>> {
        let inputs = user_ids.iter().map(|id| self.member(id)).collect();
        combine_latest_all(inputs)
            .map(|item| item.map(|members| members.into_iter().flatten().collect()))
            .boxed()
    }

    /// 家庭成员资料列表
    ///
    /// 成员集合变化时只为新增成员建立订阅，离开的成员订阅随即注销。
    pub fn members(&self, family_id: &str) -> SdkStream<Vec<FamilyMember>> {
        let outer = self
            .member_ids(family_id)
            .map(|item| item.map(|ids| ids.into_iter().map(|id| (id, ())).collect()))
            .boxed();
        let repo = self.clone();
        switch_map_keyed(outer, move |user_id: &String, _: &()| repo.member(user_id))
            .map(|item| {
                item.map(|entries| {
                    entries
                        .into_iter()
                        .filter_map(|(_, member)| member)
                        .collect()
                })
            })
            .boxed()
    }

    /// 成员列表附带"正在回家"标记（已接受的回家请求）
    pub fn members_with_going_home(&self, family_id: &str) -> SdkStream<Vec<MemberStatus>> {
        combine_latest2(
            self.family(family_id),
            self.members(family_id),
            |family: &Option<Family>, members: &Vec<FamilyMember>| {
                members
                    .iter()
                    .map(|member| {
                        let request = family
                            .as_ref()
                            .and_then(|f| f.request_for(&member.id))
                            .cloned();
                        let going_home = family
                            .as_ref()
                            .map(|f| f.going_home_ids().contains(&member.id))
                            .unwrap_or(false);
                        MemberStatus {
                            member: member.clone(),
                            going_home,
                            request,
                        }
                    })
                    .collect::<Vec<_>>()
            },
        )
        .boxed()
    }

    /// 被选中成员到家的实时距离
    ///
    /// `select` 从家庭快照中挑出需要跟踪的成员；每个成员一个位置订阅，
    /// 家的坐标变化时对应订阅重启。
    pub fn distances_to_home<S>(&self, family_id: &str, select: S) -> SdkStream<Vec<MemberDistance>>
    where
        S: Fn(&Family) -> Vec<String> + Send + Sync + 'static,
    {
        let outer = self
            .family(family_id)
            .map(move |item| {
                item.map(|family| match family {
                    Some(f) => select(&f).into_iter().map(|id| (id, f.home)).collect(),
                    None => Vec::new(),
                })
            })
            .boxed();
        let repo = self.clone();
        switch_map_keyed(outer, move |user_id: &String, home: &Option<GeoPoint>| {
            let user_id = user_id.clone();
            let home = *home;
            repo.location(&user_id)
                .map(move |item| {
                    item.map(|location| MemberDistance {
                        user_id: user_id.clone(),
                        distance_meters: distance_to_home(location, home),
                    })
                })
                .boxed()
        })
        .map(|item| item.map(|entries| entries.into_iter().map(|(_, d)| d).collect()))
        .boxed()
    }

    /// 正在回家成员的距离
    pub fn going_home_distances(&self, family_id: &str) -> SdkStream<Vec<MemberDistance>> {
        self.distances_to_home(family_id, Family::going_home_ids)
    }

    /// 成员汇总：资料 + 回家标记 + 到家距离
    pub fn member_overview(&self, family_id: &str) -> SdkStream<Vec<MemberOverview>> {
        combine_latest2(
            self.members_with_going_home(family_id),
            self.going_home_distances(family_id),
            |statuses: &Vec<MemberStatus>, distances: &Vec<MemberDistance>| {
                statuses
                    .iter()
                    .map(|status| MemberOverview {
                        member: status.member.clone(),
                        going_home: status.going_home,
                        distance_to_home: distances
                            .iter()
                            .find(|d| d.user_id == status.member.id)
                            .and_then(|d| d.distance_meters),
                    })
                    .collect::<Vec<_>>()
            },
        )
        .boxed()
    }

    /// 设置家的位置
    pub async fn set_home(&self, family_id: &str, home: GeoPoint) -> SdkResult<()> {
        info!("[Family] 设置家庭 {} 的位置 {:?}", family_id, home);
        self.store
            .set(&paths::family_home(family_id), json!(home))
            .await
    }

    /// 当前用户加入家庭
    pub async fn join_family(&self, family_id: &str) -> SdkResult<()> {
        let user_id = &self.session.user_id;
        let mut fields = Map::new();
        fields.insert(
            format!("families/{}/members/{}", family_id, user_id),
            Value::Bool(true),
        );
        fields.insert(
            format!("users/{}/familyId", user_id),
            Value::String(family_id.to_string()),
        );
        self.store.update(&DataPath::root(), fields).await?;
        info!("[Family] 用户 {} 加入家庭 {}", user_id, family_id);
        Ok(())
    }

    /// 当前用户离开家庭（只移除成员关系，用户资料保留）
    pub async fn leave_family(&self, family_id: &str) -> SdkResult<()> {
        let user_id = &self.session.user_id;
        let mut fields = Map::new();
        fields.insert(
            format!("families/{}/members/{}", family_id, user_id),
            Value::Null,
        );
        fields.insert(
            format!("families/{}/callHomeRequests/{}", family_id, user_id),
            Value::Null,
        );
        fields.insert(format!("users/{}/familyId", user_id), Value::Null);
        self.store.update(&DataPath::root(), fields).await?;
        debug!("[Family] 用户 {} 离开家庭 {}", user_id, family_id);
        Ok(())
    }
}

/// 位置或家未知、或为零值坐标时返回 `None`
/// 解析家庭节点，格式错误按不存在处理；同时记下请求节点的原始 key
fn decode_family(family_id: &str, snapshot: &DataSnapshot) -> Option<Family> {
    let mut family = match snapshot.decode::<Family>() {
        Ok(family) => family?,
        Err(e) => {
            warn!("[Family] 家庭 {} 解析失败，按空值处理: {}", family_id, e);
            return None;
        }
    };
    family.id = family_id.to_string();
    family.request_targets = snapshot
        .value()
        .and_then(|v| v.get("callHomeRequests"))
        .and_then(Value::as_object)
        .map(|requests| requests.keys().cloned().collect())
        .unwrap_or_default();
    Some(family)
}

fn distance_to_home(location: Option<Location>, home: Option<GeoPoint>) -> Option<i64> {
    let point = location.map(|l| l.point()).filter(|p| !p.is_unset())?;
    let home = home.filter(|h| !h.is_unset())?;
    Some(geo::distance_meters(Some(point), Some(home)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::store::MemoryStore;
    use crate::sdk::testing::{init_test_logger, next_item};

    const HOME: GeoPoint = GeoPoint {
        latitude: 31.2304,
        longitude: 121.4737,
    };

    async fn seeded() -> (Arc<MemoryStore>, FamilyRepository) {
        init_test_logger();
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                &DataPath::root(),
                json!({
                    "users": {
                        "u1": {"name": "Dad", "familyId": "f1", "batteryLevel": 80},
                        "u2": {"name": "Kid", "familyId": "f1",
                               "lastLocation": {"latitude": 31.2349, "longitude": 121.4737}}
                    },
                    "families": {
                        "f1": {
                            "members": {"u1": true, "u2": true},
                            "home": {"latitude": HOME.latitude, "longitude": HOME.longitude}
                        }
                    }
                }),
            )
            .await
            .unwrap();
        let session = Arc::new(SessionContext::new("u1", "token"));
        let repo = FamilyRepository::new(store.clone(), session);
        (store, repo)
    }

    #[tokio::test]
    async fn current_family_id_resolves_or_reports_not_found() {
        let (store, repo) = seeded().await;
        assert_eq!(repo.current_family_id().await.unwrap(), "f1");

        store.remove(&paths::user_family("u1")).await.unwrap();
        assert!(matches!(
            repo.current_family_id().await,
            Err(SdkError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn members_follow_membership_changes() {
        let (store, repo) = seeded().await;
        let mut members = repo.members("f1");
        let names: Vec<_> = next_item(&mut members)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["Dad", "Kid"]);
        assert_eq!(store.listener_count_at(&paths::user("u2")), 1);

        store
            .set(&paths::family_members("f1").child("u2"), Value::Null)
            .await
            .unwrap();
        let remaining = next_item(&mut members).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "u1");
        assert_eq!(store.listener_count_at(&paths::user("u2")), 0);

        drop(members);
        assert_eq!(store.active_listener_count(), 0);
    }

    #[tokio::test]
    async fn going_home_flag_tracks_accepted_requests() {
        let (store, repo) = seeded().await;
        let mut statuses = repo.members_with_going_home("f1");
        let first = next_item(&mut statuses).await.unwrap();
        assert!(first.iter().all(|s| !s.going_home));

        store
            .set(
                &paths::call_home_request("f1", "u2"),
                json!({"requesterId": "u1", "targetId": "u2", "createdAt": 1, "status": "ACCEPTED"}),
            )
            .await
            .unwrap();
        let updated = next_item(&mut statuses).await.unwrap();
        let kid = updated.iter().find(|s| s.member.id == "u2").unwrap();
        assert!(kid.going_home);
        assert!(kid.request.is_some());
    }

    #[tokio::test]
    async fn distances_update_with_location_and_stop_when_deselected() {
        let (store, repo) = seeded().await;
        let mut distances = repo.distances_to_home("f1", Family::requested_ids);
        assert!(next_item(&mut distances).await.unwrap().is_empty());

        store
            .set(
                &paths::call_home_request("f1", "u2"),
                json!({"requesterId": "u1", "targetId": "u2", "createdAt": 1, "status": "REQUESTED"}),
            )
            .await
            .unwrap();
        let d = next_item(&mut distances).await.unwrap();
        assert_eq!(d.len(), 1);
        // 纬度相差 0.0045 度，约 500 米
        let meters = d[0].distance_meters.unwrap();
        assert!((495..=505).contains(&meters), "got {meters}");

        store
            .set(
                &paths::user_location("u2"),
                json!({"latitude": HOME.latitude, "longitude": HOME.longitude}),
            )
            .await
            .unwrap();
        assert_eq!(next_item(&mut distances).await.unwrap()[0].distance_meters, Some(0));

        store.remove(&paths::call_home_request("f1", "u2")).await.unwrap();
        assert!(next_item(&mut distances).await.unwrap().is_empty());
        assert_eq!(store.listener_count_at(&paths::user_location("u2")), 0);
    }

    #[test]
    fn unknown_location_yields_no_distance() {
        assert_eq!(distance_to_home(None, Some(HOME)), None);
        assert_eq!(
            distance_to_home(Some(Location::default()), Some(HOME)),
            None
        );
        assert_eq!(
            distance_to_home(
                Some(Location {
                    latitude: HOME.latitude,
                    longitude: HOME.longitude,
                    updated_at: 0
                }),
                None
            ),
            None
        );
    }

    #[tokio::test]
    async fn members_by_ids_keeps_requested_order() {
        let (_store, repo) = seeded().await;
        let mut stream = repo.members_by_ids(&["u2".to_string(), "ghost".to_string(), "u1".to_string()]);
        let names: Vec<_> = next_item(&mut stream)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["Kid", "Dad"]);
    }

    #[tokio::test]
    async fn join_and_leave_update_membership_and_user() {
        let (store, repo) = seeded().await;
        let newcomer = FamilyRepository::new(store.clone(), Arc::new(SessionContext::new("u3", "t")));
        newcomer.join_family("f1").await.unwrap();
        assert_eq!(newcomer.current_family_id().await.unwrap(), "f1");

        let mut ids = repo.member_ids("f1");
        assert_eq!(next_item(&mut ids).await.unwrap(), vec!["u1", "u2", "u3"]);

        newcomer.leave_family("f1").await.unwrap();
        assert_eq!(next_item(&mut ids).await.unwrap(), vec!["u1", "u2"]);
        assert!(newcomer.current_family_id().await.is_err());
    }
}
