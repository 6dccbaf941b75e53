use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::{Body, Bytes, to_bytes},
    extract::{OriginalUri, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, header::CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::{StreamExt, stream};
use serde_json::Value;

use crate::{
    cache::{ResponseCache, keys},
    error::AppError,
};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

// 超过此大小的响应体不缓存
const MAX_CACHEABLE_BODY: usize = 8 * 1024 * 1024;

/// GET 响应缓存的路由级配置
#[derive(Clone)]
pub struct CachePolicy {
    cache: ResponseCache,
    ttl: Duration,
}

impl CachePolicy {
    pub fn new(cache: ResponseCache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

fn original_path_and_query<B>(req: &Request<B>) -> String {
    let uri = req
        .extensions()
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or_else(|| req.uri());

    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

pub async fn cache_response(
    State(policy): State<CachePolicy>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let key = keys::response_key(&original_path_and_query(&req));

    if let Some(value) = policy.cache.get(&key) {
        tracing::debug!(%key, "Cache hit");
        let mut response = Json(value).into_response();
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("HIT"));
        return response;
    }

    let response = next.run(req).await;

    // 只缓存成功的 JSON 响应
    if !response.status().is_success() || !is_json(response.headers()) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_CACHEABLE_BODY).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(%key, "Failed to buffer response body for caching: {}", e);
            return AppError::Internal(e.to_string()).into_response();
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => {
            policy.cache.set(key.as_str(), value, policy.ttl);
            tracing::debug!(%key, ttl_secs = policy.ttl.as_secs(), "Cache miss, stored response");
        }
        Err(e) => tracing::warn!(%key, "Response is not valid JSON, not caching: {}", e),
    }

    parts
        .headers
        .insert(X_CACHE, HeaderValue::from_static("MISS"));
    Response::from_parts(parts, Body::from(bytes))
}

/// 变更成功后需要清除的缓存前缀
#[derive(Clone)]
pub struct Invalidation {
    cache: ResponseCache,
    prefixes: Arc<[String]>,
}

impl Invalidation {
    pub fn new<P: AsRef<str>>(cache: ResponseCache, prefixes: &[P]) -> Self {
        Self {
            cache,
            prefixes: prefixes.iter().map(|p| p.as_ref().to_string()).collect(),
        }
    }

    /// 删除所有匹配前缀的键，返回删除数量
    pub fn run(&self) -> usize {
        let stale = keys::matching_keys(self.cache.keys(), &self.prefixes[..]);
        if stale.is_empty() {
            return 0;
        }

        let removed = self.cache.delete_many(&stale);
        tracing::debug!(removed, prefixes = ?self.prefixes, "Invalidated cached responses");
        removed
    }
}

/// 成功（2xx）的响应体被完整读出后再清除缓存。
///
/// 失效操作挂在响应体流的末尾，因此不会增加客户端可见的延迟；
/// 客户端中途断开时响应没有完成，也就不会触发失效。
pub async fn invalidate_cache(
    State(invalidation): State<Invalidation>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(req).await;

    if !response.status().is_success() {
        tracing::debug!(status = response.status().as_u16(), "Mutation failed, cache left intact");
        return response;
    }

    let (parts, body) = response.into_parts();
    let on_finish = stream::once(async move {
        invalidation.run();
    })
    .filter_map(|()| async { None::<Result<Bytes, axum::Error>> });

    let body = Body::from_stream(body.into_data_stream().chain(on_finish));
    Response::from_parts(parts, body)
}
