use std::env;
use std::time::Duration;

/// 单个限流分组的配置
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    pub message: String,
}

impl RateLimitConfig {
    pub fn new(window_secs: u64, max_requests: u32, message: &str) -> Self {
        Self {
            window_secs,
            max_requests,
            message: message.to_string(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub server_host: String,
    pub server_port: u16,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub bcrypt_cost: u32,
    pub enable_registration: bool,
    pub allowed_origins: Vec<String>,
    pub trust_proxy: bool,
    pub cache_ttl_secs: u64,
    pub airdrops_cache_ttl_secs: u64,
    pub cache_check_period_secs: u64,
    pub mutation_rate_limit: RateLimitConfig,
    pub auth_rate_limit: RateLimitConfig,
    pub newsletter_rate_limit: RateLimitConfig,
    pub resend_api_key: Option<String>,
    pub resend_from_email: String,
    pub site_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            jwt_secret: String::new(),
            jwt_expiration_secs: 24 * 3600,
            server_host: "0.0.0.0".into(),
            server_port: 5000,
            admin_username: None,
            admin_password: None,
            bcrypt_cost: 10,
            enable_registration: false,
            allowed_origins: Vec::new(),
            trust_proxy: false,
            cache_ttl_secs: 300,
            airdrops_cache_ttl_secs: 180,
            cache_check_period_secs: 60,
            // 变更接口：5 分钟 20 次
            mutation_rate_limit: RateLimitConfig::new(
                5 * 60,
                20,
                "Too many requests, please slow down",
            ),
            // 登录：15 分钟 5 次
            auth_rate_limit: RateLimitConfig::new(
                15 * 60,
                5,
                "Too many login attempts, please try again after 15 minutes",
            ),
            // 订阅：1 小时 5 次
            newsletter_rate_limit: RateLimitConfig::new(
                60 * 60,
                5,
                "Too many subscription attempts, please try again later",
            ),
            resend_api_key: None,
            resend_from_email: "onboarding@resend.dev".into(),
            site_url: "http://localhost:5000".into(),
        }
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag(name: &str) -> bool {
    optional(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let defaults = Config::default();

        let jwt_expiration = optional("JWT_EXPIRATION")
            .and_then(|v| v.trim_end_matches('h').parse::<u64>().ok())
            .unwrap_or(24);

        // 生产环境不设置 ALLOWED_ORIGINS 时拒绝所有跨域请求
        let allowed_origins = optional("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            server_host: optional("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: optional("SERVER_PORT")
                .or_else(|| optional("PORT"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
            admin_username: optional("ADMIN_USERNAME"),
            admin_password: optional("ADMIN_PASSWORD"),
            bcrypt_cost: optional("BCRYPT_COST")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bcrypt_cost),
            enable_registration: flag("ENABLE_REGISTRATION"),
            allowed_origins,
            trust_proxy: flag("TRUST_PROXY"),
            cache_ttl_secs: optional("CACHE_TTL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_ttl_secs),
            airdrops_cache_ttl_secs: optional("AIRDROPS_CACHE_TTL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.airdrops_cache_ttl_secs),
            cache_check_period_secs: optional("CACHE_CHECK_PERIOD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_check_period_secs),
            mutation_rate_limit: defaults.mutation_rate_limit,
            auth_rate_limit: defaults.auth_rate_limit,
            newsletter_rate_limit: defaults.newsletter_rate_limit,
            resend_api_key: optional("RESEND_API_KEY"),
            resend_from_email: optional("RESEND_FROM_EMAIL").unwrap_or(defaults.resend_from_email),
            site_url: optional("SITE_URL").unwrap_or(defaults.site_url),
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    /// 统计接口的缓存时间
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// 空投列表的缓存时间
    pub fn airdrops_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.airdrops_cache_ttl_secs)
    }

    pub fn cache_check_period(&self) -> Duration {
        Duration::from_secs(self.cache_check_period_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_route_groups() {
        let config = Config::default();
        assert_eq!(config.mutation_rate_limit.window(), Duration::from_secs(300));
        assert_eq!(config.mutation_rate_limit.max_requests, 20);
        assert_eq!(config.auth_rate_limit.max_requests, 5);
        assert_eq!(config.newsletter_rate_limit.window_secs, 3600);
        assert_eq!(config.jwt_expiration(), Duration::from_secs(86_400));
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.airdrops_cache_ttl(), Duration::from_secs(180));
    }

    #[test]
    fn check_period_never_zero() {
        let config = Config {
            cache_check_period_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.cache_check_period(), Duration::from_secs(1));
    }
}
