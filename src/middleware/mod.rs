mod auth;
mod cache;
mod error_handler;
mod rate_limit;

pub use auth::{AllowedRoles, auth_middleware, authorize_roles};
pub use cache::{CachePolicy, Invalidation, X_CACHE, cache_response, invalidate_cache};
pub use error_handler::{log_errors, not_found};
pub use rate_limit::{
    RateLimitDecision, RateLimiter, RateLimiters, UNKNOWN_CLIENT, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, client_identifier, rate_limit,
};
