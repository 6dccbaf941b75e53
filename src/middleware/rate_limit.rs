use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::time::Instant;

use crate::{
    config::{Config, RateLimitConfig},
    error::AppError,
    utils::periodic::PeriodicTask,
};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// 无法识别客户端时使用的标识
pub const UNKNOWN_CLIENT: &str = "unknown";

const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct RateWindowRecord {
    count: u32,
    window_start: Instant,
}

/// 单次限流判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// 仅在拒绝时给出，单位秒，至少为 1
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
    }
}

/// 按客户端 IP 计数的固定窗口限流器
pub struct RateLimiter {
    name: &'static str,
    window: Duration,
    max_requests: u32,
    message: String,
    trust_proxy: bool,
    records: DashMap<String, RateWindowRecord>,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, config: &RateLimitConfig) -> Self {
        Self {
            name,
            window: config.window(),
            max_requests: config.max_requests.max(1),
            message: config.message.clone(),
            trust_proxy: false,
            records: DashMap::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// 信任反向代理设置的 X-Real-IP / X-Forwarded-For
    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    pub fn tracked_clients(&self) -> usize {
        self.records.len()
    }

    /// 清理周期：等于窗口长度，限制在 1 秒到 60 秒之间
    pub fn sweep_period(&self) -> Duration {
        self.window.clamp(MIN_SWEEP_PERIOD, MAX_SWEEP_PERIOD)
    }

    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        let now = Instant::now();

        // entry 持有分片锁，同一客户端的判定和计数是原子的
        let mut record = self
            .records
            .entry(identifier.to_string())
            .or_insert(RateWindowRecord {
                count: 0,
                window_start: now,
            });

        if record.count == 0 || now.duration_since(record.window_start) > self.window {
            record.count = 1;
            record.window_start = now;
            return RateLimitDecision {
                allowed: true,
                limit: self.max_requests,
                remaining: self.max_requests - 1,
                retry_after_secs: None,
            };
        }

        if record.count < self.max_requests {
            record.count += 1;
            return RateLimitDecision {
                allowed: true,
                limit: self.max_requests,
                remaining: self.max_requests - record.count,
                retry_after_secs: None,
            };
        }

        let reset_in = (record.window_start + self.window).saturating_duration_since(now);
        let retry_after = (reset_in.as_millis().div_ceil(1000) as u64).max(1);

        RateLimitDecision {
            allowed: false,
            limit: self.max_requests,
            remaining: 0,
            retry_after_secs: Some(retry_after),
        }
    }

    /// 删除窗口已经过期的记录，返回删除数量
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records
            .retain(|_, record| now.duration_since(record.window_start) <= self.window);
        before.saturating_sub(self.records.len())
    }

    pub fn start_sweeper(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("rate-limit-sweeper", self.sweep_period(), move || {
            let Some(limiter) = weak.upgrade() else {
                return false;
            };
            let removed = limiter.cleanup();
            if removed > 0 {
                tracing::debug!(limiter = limiter.name, removed, "Removed stale rate limit records");
            }
            true
        });

        match self.sweeper.lock() {
            Ok(mut slot) => {
                if let Some(previous) = slot.replace(task) {
                    previous.stop();
                }
            }
            Err(e) => tracing::error!("Rate limiter sweeper lock poisoned: {}", e),
        }
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .map(|slot| slot.as_ref().is_some_and(PeriodicTask::is_running))
            .unwrap_or(false)
    }

    /// 停止清理任务并清空所有记录
    pub fn teardown(&self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(task) = slot.take() {
                task.stop();
            }
        }
        self.records.clear();
    }

    pub async fn check_rate_limit(self: Arc<Self>, req: Request<Body>, next: Next) -> Response {
        let ip = client_identifier(&req, self.trust_proxy);
        let decision = self.check(&ip);

        if !decision.allowed {
            tracing::warn!(
                limiter = self.name,
                client = %ip,
                retry_after = decision.retry_after_secs,
                "Rate limit exceeded"
            );
            let mut response = AppError::RateLimited {
                message: self.message.clone(),
                retry_after_secs: decision.retry_after_secs.unwrap_or(1),
            }
            .into_response();
            decision.apply_headers(response.headers_mut());
            return response;
        }

        let mut response = next.run(req).await;
        decision.apply_headers(response.headers_mut());
        response
    }
}

/// 取客户端标识，取不到时降级为 "unknown"
pub fn client_identifier<B>(req: &Request<B>, trust_proxy: bool) -> String {
    // 从连接信息获取原始IP
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    let forwarded = if trust_proxy {
        req.headers()
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .or_else(|| {
                req.headers()
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
            })
    } else {
        None
    };

    forwarded
        .or(remote_ip.as_deref())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    limiter.check_rate_limit(req, next).await
}

/// 各路由分组独立的限流器
#[derive(Clone)]
pub struct RateLimiters {
    pub mutation: Arc<RateLimiter>,
    pub auth: Arc<RateLimiter>,
    pub newsletter: Arc<RateLimiter>,
}

impl RateLimiters {
    pub fn from_config(config: &Config) -> Self {
        let build = |name, limit: &RateLimitConfig| {
            Arc::new(RateLimiter::new(name, limit).trust_proxy(config.trust_proxy))
        };
        Self {
            mutation: build("mutation", &config.mutation_rate_limit),
            auth: build("auth", &config.auth_rate_limit),
            newsletter: build("newsletter", &config.newsletter_rate_limit),
        }
    }

    fn all(&self) -> [&Arc<RateLimiter>; 3] {
        [&self.mutation, &self.auth, &self.newsletter]
    }

    pub fn start_sweepers(&self) {
        for limiter in self.all() {
            limiter.start_sweeper();
        }
    }

    pub fn teardown(&self) {
        for limiter in self.all() {
            limiter.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, middleware, routing::post};
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::time;
    use tower::ServiceExt;

    fn limiter(window_secs: u64, max: u32) -> RateLimiter {
        RateLimiter::new("test", &RateLimitConfig::new(window_secs, max, "slow down"))
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_request_is_rejected_until_window_resets() {
        let limiter = limiter(60, 5);
        for expected in (0..5).rev() {
            let decision = limiter.check("1.2.3.4");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let rejected = limiter.check("1.2.3.4");
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.retry_after_secs, Some(60));

        time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.check("1.2.3.4").retry_after_secs, Some(40));

        time::advance(Duration::from_secs(41)).await;
        let decision = limiter.check("1.2.3.4");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn window_boundary_is_inclusive() {
        let limiter = limiter(10, 1);
        assert!(limiter.check("a").allowed);

        // 恰好到达窗口长度时仍处于同一窗口
        time::advance(Duration::from_secs(10)).await;
        let decision = limiter.check("a");
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, Some(1));

        time::advance(Duration::from_millis(1)).await;
        assert!(limiter.check("a").allowed);
    }

    #[test]
    fn clients_are_counted_separately() {
        let limiter = limiter(60, 1);
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
        assert!(!limiter.check("a").allowed);
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn rejected_requests_do_not_increment() {
        let limiter = limiter(60, 2);
        limiter.check("a");
        limiter.check("a");
        for _ in 0..5 {
            assert!(!limiter.check("a").allowed);
        }
        assert_eq!(limiter.records.get("a").map(|r| r.count), Some(2));
    }

    #[test]
    fn sweep_period_is_clamped() {
        assert_eq!(limiter(0, 1).sweep_period(), Duration::from_secs(1));
        assert_eq!(limiter(30, 1).sweep_period(), Duration::from_secs(30));
        assert_eq!(limiter(3600, 1).sweep_period(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_drops_stale_records() {
        let limiter = limiter(10, 5);
        limiter.check("old");
        time::advance(Duration::from_secs(8)).await;
        limiter.check("new");
        time::advance(Duration::from_secs(3)).await;

        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_teardown() {
        let limiter = Arc::new(limiter(2, 5));
        limiter.start_sweeper();
        limiter.check("a");
        assert!(limiter.sweeper_running());

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(limiter.tracked_clients(), 0);

        limiter.check("b");
        limiter.teardown();
        assert_eq!(limiter.tracked_clients(), 0);
        assert!(!limiter.sweeper_running());
    }

    #[test]
    fn identifier_falls_back_to_unknown() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_identifier(&req, false), UNKNOWN_CLIENT);
    }

    #[test]
    fn proxy_headers_only_when_trusted() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 9000);
        let req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.5")
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_identifier(&req, false), "10.0.0.5");
        assert_eq!(client_identifier(&req, true), "203.0.113.9");
    }

    async fn ok_handler() -> &'static str {
        "ok"
    }

    #[tokio::test]
    async fn middleware_sets_quota_headers() {
        let limiter = Arc::new(limiter(300, 2));
        let app = Router::new()
            .route("/test", post(ok_handler))
            .layer(middleware::from_fn_with_state(limiter, rate_limit));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)), 1234);

        let request = || {
            Request::builder()
                .method("POST")
                .uri("/test")
                .extension(ConnectInfo(addr))
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "2");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "1");

        app.clone().oneshot(request()).await.unwrap();
        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");
        assert_eq!(response.headers()["retry-after"], "300");
    }
}
