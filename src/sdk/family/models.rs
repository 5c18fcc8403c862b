//! 家庭与成员模型

use crate::sdk::call_home::models::{CallHomeRequest, CallHomeStatus};
use crate::sdk::geo::GeoPoint;
use crate::sdk::serialization::{deserialize_lenient_map, deserialize_member_set};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 成员最近一次上报的位置
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// 上报时间（毫秒）
    #[serde(default)]
    pub updated_at: i64,
}

impl Location {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// 家庭成员（对应 `users/{userId}`）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_location: Option<Location>,
    /// 电量百分比
    #[serde(default)]
    pub battery_level: Option<u8>,
    /// 头像引用
    #[serde(default)]
    pub profile_image: Option<String>,
    /// 所属家庭
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
}

/// 家庭（对应 `families/{familyId}`）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_member_set")]
    pub members: BTreeMap<String, bool>,
    #[serde(default)]
    pub home: Option<GeoPoint>,
    /// 目标用户 ID → 回家请求
    #[serde(default, deserialize_with = "deserialize_lenient_map")]
    pub call_home_requests: BTreeMap<String, CallHomeRequest>,
    /// `callHomeRequests` 下的全部子节点 key，包括无法解析的残留节点
    #[serde(skip)]
    pub request_targets: BTreeSet<String>,
}

impl Family {
    pub fn member_ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn request_for(&self, target_id: &str) -> Option<&CallHomeRequest> {
        self.call_home_requests.get(target_id)
    }

    /// 已接受回家请求、正在回家的成员
    pub fn going_home_ids(&self) -> Vec<String> {
        self.call_home_requests
            .iter()
            .filter(|(_, r)| r.status == CallHomeStatus::Accepted)
            .map(|(target, _)| target.clone())
            .collect()
    }

    /// 存在任意状态回家请求节点的成员（残留节点也算在内，方便自动清除把它们删掉）
    pub fn requested_ids(&self) -> Vec<String> {
        self.call_home_requests
            .keys()
            .chain(self.request_targets.iter())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// 带回家标记的成员
#[derive(Debug, Clone, PartialEq)]
pub struct MemberStatus {
    pub member: FamilyMember,
    pub going_home: bool,
    pub request: Option<CallHomeRequest>,
}

/// 成员到家的实时距离
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDistance {
    pub user_id: String,
    /// 成员或家的坐标未知时为 `None`
    pub distance_meters: Option<i64>,
}

/// 成员列表页展示用的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct MemberOverview {
    pub member: FamilyMember,
    pub going_home: bool,
    pub distance_to_home: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn family_tolerates_malformed_requests() {
        let family: Family = serde_json::from_value(json!({
            "members": {"u1": true, "u2": true},
            "home": {"latitude": 1.0, "longitude": 2.0},
            "callHomeRequests": {
                "u2": {"requesterId": "u1", "targetId": "u2", "createdAt": 5, "status": "ACCEPTED"},
                "u3": {"status": "LOST"}
            }
        }))
        .unwrap();
        assert_eq!(family.member_ids(), vec!["u1", "u2"]);
        assert_eq!(family.requested_ids(), vec!["u2"]);

        let mut with_orphan = family.clone();
        with_orphan.request_targets = ["u2".to_string(), "u3".to_string()].into();
        assert_eq!(with_orphan.requested_ids(), vec!["u2", "u3"]);
        assert_eq!(with_orphan.going_home_ids(), vec!["u2"]);
        assert_eq!(family.going_home_ids(), vec!["u2"]);
        assert_eq!(family.home, Some(GeoPoint::new(1.0, 2.0)));
    }

    #[test]
    fn member_fields_are_optional() {
        let member: FamilyMember = serde_json::from_value(json!({"name": "Ann"})).unwrap();
        assert_eq!(member.name, "Ann");
        assert!(member.last_location.is_none());
        assert!(member.battery_level.is_none());
    }
}
