//! 远端树路径

use std::fmt;

/// 远端树中的节点路径（以 `/` 分隔）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataPath {
    segments: Vec<String>,
}

impl DataPath {
    /// 根路径
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// 解析 `a/b/c` 形式的路径，忽略首尾及重复的 `/`
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// 子路径，`child` 本身也可以包含多级
    pub fn child(&self, child: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            child
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// 最后一级的 key；根路径返回空串
    pub fn key(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// `self` 是否为 `other` 的祖先或其本身
    pub fn contains(&self, other: &DataPath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// 两条路径是否在同一分支上（一方包含另一方）
    pub fn overlaps(&self, other: &DataPath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// 业务路径约定
pub mod paths {
    use super::DataPath;

    pub fn family(family_id: &str) -> DataPath {
        DataPath::parse("families").child(family_id)
    }

    pub fn family_members(family_id: &str) -> DataPath {
        family(family_id).child("members")
    }

    pub fn family_home(family_id: &str) -> DataPath {
        family(family_id).child("home")
    }

    pub fn call_home_requests(family_id: &str) -> DataPath {
        family(family_id).child("callHomeRequests")
    }

    pub fn call_home_request(family_id: &str, target_id: &str) -> DataPath {
        call_home_requests(family_id).child(target_id)
    }

    pub fn user(user_id: &str) -> DataPath {
        DataPath::parse("users").child(user_id)
    }

    pub fn user_location(user_id: &str) -> DataPath {
        user(user_id).child("lastLocation")
    }

    pub fn user_family(user_id: &str) -> DataPath {
        user(user_id).child("familyId")
    }

    pub fn chat(family_id: &str) -> DataPath {
        DataPath::parse("chats").child(family_id)
    }

    pub fn chat_message(family_id: &str, message_id: &str) -> DataPath {
        chat(family_id).child(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_normalise_slashes() {
        let p = DataPath::parse("/families//f1/members/");
        assert_eq!(p.to_string(), "families/f1/members");
        assert_eq!(p.key(), "members");
        assert_eq!(DataPath::root().key(), "");
    }

    #[test]
    fn containment_is_prefix_based() {
        let family = paths::family("f1");
        let request = paths::call_home_request("f1", "u2");
        assert!(family.contains(&request));
        assert!(!request.contains(&family));
        assert!(request.overlaps(&family));
        assert!(!paths::family("f10").overlaps(&family));
        assert_eq!(
            request.to_string(),
            "families/f1/callHomeRequests/u2"
        );
    }
}
