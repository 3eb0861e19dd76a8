use crate::archive::error::RemoteError;
use serde::Deserialize;
use tracing::{debug, error};

/// 会话 ID 偏移：群聊 peer_id = 2000000000 + chat_id
pub const CHAT_PEER_OFFSET: i64 = 2_000_000_000;

/// VK 接口错误体
#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub error_code: i64,
    #[serde(default)]
    pub error_msg: String,
}

/// 统一的 API 响应包装结构体
///
/// VK 成功时返回 `{"response": ...}`，失败时返回 `{"error": {...}}`，
/// 两个字段都可能缺失，因此都使用 Option
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub response: Option<T>,
    pub error: Option<ApiError>,
}

/// 通用 HTTP 响应处理函数：反序列化为统一的响应结构体并检查错误码
///
/// 所有 VK 方法都共用此方法，返回 `response` 字段的内容
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<T, RemoteError> {
    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response
        .bytes()
        .await
        .map_err(|e| RemoteError::transport(format!("读取响应 body 失败: {}", e)))?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body 长度: {}", operation_name, body_bytes.len());

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(RemoteError::transport(format!(
            "HTTP 错误 {}: {}",
            status, body_str
        )));
    }

    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        RemoteError::transport(format!("反序列化响应失败: {:?}", e))
    })?;

    if let Some(err) = api_resp.error {
        error!(
            "[HTTP] {}服务器错误，错误码: {}, 错误信息: {}",
            operation_name, err.error_code, err.error_msg
        );
        return Err(RemoteError::from_api(err.error_code, err.error_msg));
    }

    api_resp
        .response
        .ok_or_else(|| RemoteError::transport("响应中缺少 response 字段"))
}
