//! 云函数调用
//!
//! 通知类的副作用（推送回家请求等）交给服务端函数完成，SDK 只负责发起调用。

use crate::sdk::config::SessionContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// 回家请求推送
pub const SEND_CALL_HOME_NOTIFICATION: &str = "sendCallHomeNotification";

/// 云函数调用接口
#[async_trait]
pub trait CloudFunctions: Send + Sync {
    /// 调用名为 `name` 的函数，返回函数结果
    async fn call(&self, name: &str, payload: Value) -> Result<Value>;
}

/// 空实现：不发起任何调用
pub struct EmptyCloudFunctions;

#[async_trait]
impl CloudFunctions for EmptyCloudFunctions {
    async fn call(&self, name: &str, _payload: Value) -> Result<Value> {
        debug!("[Functions] 未配置云函数，跳过 {}", name);
        Ok(Value::Null)
    }
}

/// 基于 HTTP 的云函数客户端
///
/// 请求体为 `{"data": payload}`，响应体为 `{"result": ...}` 或 `{"error": {...}}`。
pub struct HttpCloudFunctions {
    client: reqwest::Client,
    base_url: String,
    session: Arc<SessionContext>,
}

#[derive(Deserialize)]
struct CallableError {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct CallableResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<CallableError>,
}

impl HttpCloudFunctions {
    /// 创建带认证头的客户端（token 通过 default_headers 自动添加）
    pub fn connect(base_url: String, session: Arc<SessionContext>) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("token"),
                    reqwest::header::HeaderValue::from_str(&session.token)
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self::new(client, base_url, session))
    }

    /// `client` 应该已经在外部配置好认证头
    pub fn new(client: reqwest::Client, base_url: String, session: Arc<SessionContext>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }
}

#[async_trait]
impl CloudFunctions for HttpCloudFunctions {
    async fn call(&self, name: &str, payload: Value) -> Result<Value> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url_for(name);

        info!("[Functions] 📡 调用云函数 {}", name);
        debug!(
            "[Functions]   请求URL: {}, 用户ID: {}, 操作ID: {}",
            url, self.session.user_id, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&json!({ "data": payload }))
            .send()
            .await
            .context("请求失败")?;

        let status = response.status();
        let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
        let body_str = String::from_utf8_lossy(&body_bytes);
        debug!("[Functions] {} 响应 Body: {}", name, body_str);

        if !status.is_success() {
            error!(
                "[Functions] {} 请求失败，HTTP状态: {}, 响应: {}",
                name, status, body_str
            );
            return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
        }

        let resp: CallableResponse = serde_json::from_slice(&body_bytes)
            .with_context(|| format!("反序列化 {} 响应失败: {}", name, body_str))?;

        if let Some(err) = resp.error {
            error!(
                "[Functions] {} 返回错误 {}: {}",
                name, err.status, err.message
            );
            return Err(anyhow::anyhow!("函数错误 {}: {}", err.status, err.message));
        }

        Ok(resp.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_functions_succeed_without_calling_out() {
        let functions = EmptyCloudFunctions;
        let result = functions
            .call(SEND_CALL_HOME_NOTIFICATION, json!({"targetId": "u2"}))
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn url_joins_base_and_name() {
        let functions = HttpCloudFunctions::new(
            reqwest::Client::new(),
            "https://fn.example.com/api/".to_string(),
            Arc::new(SessionContext::new("u1", "t")),
        );
        assert_eq!(
            functions.url_for("sendCallHomeNotification"),
            "https://fn.example.com/api/sendCallHomeNotification"
        );
    }

    #[test]
    fn connect_rejects_unprintable_token() {
        let session = Arc::new(SessionContext::new("u1", "bad\ntoken"));
        assert!(HttpCloudFunctions::connect("http://localhost".to_string(), session).is_err());
    }

    #[test]
    fn callable_response_shapes_parse() {
        let ok: CallableResponse = serde_json::from_value(json!({"result": {"sent": 2}})).unwrap();
        assert_eq!(ok.result, Some(json!({"sent": 2})));
        assert!(ok.error.is_none());

        let failed: CallableResponse = serde_json::from_value(
            json!({"error": {"status": "UNAUTHENTICATED", "message": "no token"}}),
        )
        .unwrap();
        let err = failed.error.unwrap();
        assert_eq!(err.status, "UNAUTHENTICATED");
        assert_eq!(err.message, "no token");
    }
}
