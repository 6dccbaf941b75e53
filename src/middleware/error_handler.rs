use axum::{
    body::{Body, to_bytes},
    http::{Request, header::CONTENT_LENGTH},
    middleware::Next,
    response::Response,
};
use tracing::error;

use crate::error::AppError;

// 记录日志时最多读取的响应体字节数
const MAX_LOGGED_BODY: usize = 4096;

/// 记录所有 5xx 响应，附带请求上下文
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let response = next.run(req).await;

    if !response.status().is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_LOGGED_BODY).await {
        Ok(b) => b,
        Err(e) => {
            error!(%method, %uri, "Failed to read error response body: {}", e);
            parts.headers.remove(CONTENT_LENGTH);
            return Response::from_parts(parts, Body::empty());
        }
    };

    error!(
        %method,
        %uri,
        user_agent = %user_agent,
        status = parts.status.as_u16(),
        body = %String::from_utf8_lossy(&bytes),
        "Server error occurred"
    );

    // 重置body以便重新构建响应
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}

/// 未匹配的 API 路由
pub async fn not_found() -> AppError {
    AppError::NotFound("Not found".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn server_error_body_survives_logging() {
        let app = Router::new()
            .route("/boom", get(|| async { AppError::Internal("db down".into()) }))
            .fallback(not_found)
            .layer(middleware::from_fn(log_errors));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"error":"Server error"}"#);

        let response = app
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
