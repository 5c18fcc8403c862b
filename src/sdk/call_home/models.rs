//! 回家请求模型

use serde::{Deserialize, Serialize};
use std::fmt;

/// 回家请求状态
///
/// 记录被删除即回到"无请求"状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallHomeStatus {
    Requested,
    Accepted,
    Rejected,
}

impl fmt::Display for CallHomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallHomeStatus::Requested => "REQUESTED",
            CallHomeStatus::Accepted => "ACCEPTED",
            CallHomeStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// 回家请求（对应 `families/{familyId}/callHomeRequests/{targetUserId}`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHomeRequest {
    pub requester_id: String,
    pub target_id: String,
    /// 创建时间（毫秒）
    pub created_at: i64,
    pub status: CallHomeStatus,
}

/// 自动清除事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearedRequest {
    pub family_id: String,
    pub target_id: String,
    pub distance_meters: i64,
}
