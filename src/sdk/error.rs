//! SDK 错误类型
//!
//! 所有流、协调器和仓库对外只暴露 `SdkError`，调用方必须显式检查结果。

use thiserror::Error;

/// SDK 统一错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdkError {
    /// 订阅已结束（远端取消、权限被收回或本地取消）
    #[error("listener detached at {path}: {reason}")]
    ListenerDetached { path: String, reason: String },

    /// 单个快照解析失败（非终止错误）
    #[error("failed to decode snapshot at {path}: {reason}")]
    Decode { path: String, reason: String },

    /// 同一目标已存在未结束的回家请求
    #[error("a call-home request for {target_id} already exists")]
    DuplicateRequest { target_id: String },

    /// 远端写入或查询失败
    #[error("network error: {0}")]
    Network(String),

    /// 目标数据不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// 当前用户无权执行该操作
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// 状态机不允许的状态变更
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// 调用方传入的参数不合法
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SdkError {
    /// 是否为终止性错误（流在发出该错误后结束）
    ///
    /// 只有 `Decode` 是元素级错误，其余都会终止所在的序列。
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SdkError::Decode { .. })
    }

    pub fn detached(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SdkError::ListenerDetached {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn decode(path: impl Into<String>, reason: impl ToString) -> Self {
        SdkError::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<anyhow::Error> for SdkError {
    fn from(err: anyhow::Error) -> Self {
        SdkError::Network(format!("{:#}", err))
    }
}

pub type SdkResult<T> = Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_decode_errors_are_element_level() {
        assert!(!SdkError::decode("chats/f1/m1", "bad type").is_terminal());
        assert!(SdkError::detached("families/f1", "permission revoked").is_terminal());
        assert!(SdkError::Network("timeout".into()).is_terminal());
        assert!(SdkError::DuplicateRequest {
            target_id: "u2".into()
        }
        .is_terminal());
    }

    #[test]
    fn anyhow_errors_become_network_errors() {
        let err: SdkError = anyhow::anyhow!("连接被拒绝").context("调用云函数失败").into();
        match err {
            SdkError::Network(msg) => {
                assert!(msg.contains("调用云函数失败"));
                assert!(msg.contains("连接被拒绝"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
