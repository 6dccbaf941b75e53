use std::time::Duration;

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{
    AppState,
    cache::keys::AIRDROP_INVALIDATION_PREFIXES,
    config::Config,
    middleware::{
        AllowedRoles, CachePolicy, Invalidation, RateLimiters, auth_middleware, authorize_roles,
        cache_response, invalidate_cache, log_errors, not_found, rate_limit,
    },
    routes,
};

const CORS_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(CORS_MAX_AGE);

    if config.allowed_origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(Any);
    }

    if config.allowed_origins.is_empty() {
        // 开发模式下允许所有来源，生产环境必须显式配置
        #[cfg(debug_assertions)]
        {
            tracing::debug!("ALLOWED_ORIGINS not set, allowing any origin in debug build");
            return cors.allow_origin(Any);
        }
        #[cfg(not(debug_assertions))]
        {
            tracing::warn!("ALLOWED_ORIGINS not set, cross-origin requests will be rejected");
            return cors;
        }
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

fn stats_cache(state: &AppState) -> CachePolicy {
    CachePolicy::new(state.cache.clone(), state.config.cache_ttl())
}

fn airdrops_cache(state: &AppState) -> CachePolicy {
    CachePolicy::new(state.cache.clone(), state.config.airdrops_cache_ttl())
}

fn airdrop_routes(state: &AppState, limiters: &RateLimiters) -> Router<AppState> {
    let list = Router::new()
        .route("/airdrops", get(routes::airdrop::list_airdrops))
        .route_layer(from_fn_with_state(airdrops_cache(state), cache_response));

    let detail = Router::new()
        .route("/airdrops/stats", get(routes::airdrop::get_stats))
        .route("/airdrops/{id}", get(routes::airdrop::get_airdrop));

    // 限流 → 认证 → 管理员 → 成功后清缓存
    let mutations = Router::new()
        .route("/airdrops", post(routes::airdrop::create_airdrop))
        .route(
            "/airdrops/{id}",
            put(routes::airdrop::update_airdrop)
                .delete(routes::airdrop::delete_airdrop),
        )
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(limiters.mutation.clone(), rate_limit))
                .layer(from_fn_with_state(state.clone(), auth_middleware))
                .layer(from_fn_with_state(AllowedRoles::admin(), authorize_roles))
                .layer(from_fn_with_state(
                    Invalidation::new(state.cache.clone(), AIRDROP_INVALIDATION_PREFIXES),
                    invalidate_cache,
                )),
        );

    list.merge(detail).merge(mutations)
}

fn auth_routes(state: &AppState, limiters: &RateLimiters) -> Router<AppState> {
    let mut router = Router::new().route("/auth/login", post(routes::auth::login));

    if state.config.enable_registration {
        tracing::warn!("Public registration is enabled, this should only be used in development");
        router = router.route("/auth/register", post(routes::auth::register));
    }

    router.route_layer(from_fn_with_state(limiters.auth.clone(), rate_limit))
}

fn newsletter_routes(limiters: &RateLimiters) -> Router<AppState> {
    let subscribe = Router::new()
        .route("/newsletter/subscribe", post(routes::newsletter::subscribe))
        .route_layer(from_fn_with_state(limiters.newsletter.clone(), rate_limit));

    subscribe.route(
        "/newsletter/unsubscribe",
        post(routes::newsletter::unsubscribe),
    )
}

pub fn create_router(state: AppState, limiters: &RateLimiters) -> Router {
    let stats = Router::new()
        .route("/stats", get(routes::airdrop::get_stats))
        .route_layer(from_fn_with_state(stats_cache(&state), cache_response));

    let api = Router::new()
        .route("/health", get(routes::health))
        .merge(stats)
        .merge(airdrop_routes(&state, limiters))
        .merge(auth_routes(&state, limiters))
        .merge(newsletter_routes(limiters))
        .fallback(not_found);

    Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors_layer(&state.config))
                .layer(from_fn(log_errors)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, body::Body, http::Request};
    use serde_json::json;
    use tokio::time;
    use tower::ServiceExt;

    fn stub(policy: CachePolicy) -> Router {
        Router::new()
            .route("/api/stats", get(|| async { Json(json!({ "totalAirdrops": 1 })) }))
            .route_layer(from_fn_with_state(policy, cache_response))
    }

    #[tokio::test(start_paused = true)]
    async fn cached_reads_expire_after_configured_ttl() {
        let state = AppState::for_tests(Config {
            cache_ttl_secs: 1,
            airdrops_cache_ttl_secs: 4,
            ..Config::default()
        });

        let request = || Request::builder().uri("/api/stats").body(Body::empty()).unwrap();
        stub(stats_cache(&state)).oneshot(request()).await.unwrap();
        assert!(state.cache.has("cache:/api/stats"));

        time::advance(Duration::from_secs(1)).await;
        assert!(!state.cache.has("cache:/api/stats"));

        stub(airdrops_cache(&state)).oneshot(request()).await.unwrap();
        time::advance(Duration::from_secs(3)).await;
        assert!(state.cache.has("cache:/api/stats"));
        time::advance(Duration::from_secs(1)).await;
        assert!(!state.cache.has("cache:/api/stats"));
    }
}
