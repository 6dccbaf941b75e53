use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::{
    config::Config,
    error::AppError,
    utils::{ROLE_ADMIN, hash_password},
};

const MIN_USERNAME_CHARS: usize = 3;
const MAX_USERNAME_CHARS: usize = 100;
const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub password: String,
    pub role: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub username: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
}

impl Credentials {
    /// 去除首尾空白后检查长度
    pub fn validate(self) -> Result<Self, AppError> {
        let username = self.username.trim().to_string();
        let password = self.password.trim().to_string();
        let mut errors = Vec::new();

        let username_len = username.chars().count();
        if username_len == 0 {
            errors.push("Username is required");
        } else if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&username_len) {
            errors.push("Username must be between 3 and 100 characters");
        }

        let password_len = password.chars().count();
        if password_len == 0 {
            errors.push("Password is required");
        } else if password_len < MIN_PASSWORD_CHARS {
            errors.push("Password must be at least 6 characters");
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors.join(", ")));
        }
        Ok(Self { username, password })
    }
}

impl User {
    /// 没有角色的用户不具备任何权限
    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or_default()
    }

    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            username: self.username.clone(),
            role: self.role().to_string(),
        }
    }

    pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(pool)
            .await
    }

    pub async fn create(
        pool: &PgPool,
        username: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (username, password, role) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(username)
        .bind(password_hash)
        .bind(role)
        .fetch_one(pool)
        .await
    }

    /// 根据 ADMIN_USERNAME / ADMIN_PASSWORD 创建默认管理员，已存在时跳过
    pub async fn ensure_admin(pool: &PgPool, config: &Config) -> Result<bool, AppError> {
        let Some(Credentials { username, password }) = seed_credentials(config)? else {
            tracing::info!("ADMIN_USERNAME/ADMIN_PASSWORD not set, skipping admin seeding");
            return Ok(false);
        };

        if Self::find_by_username(pool, &username).await?.is_some() {
            tracing::debug!(%username, "Admin user already exists");
            return Ok(false);
        }

        let hash = hash_password(&password, config.bcrypt_cost)?;
        Self::create(pool, &username, &hash, ROLE_ADMIN).await?;
        tracing::info!(%username, "Default admin user created");
        Ok(true)
    }
}

/// 种子管理员与登录使用同样的规则，保证之后能用同一组凭据登录
fn seed_credentials(config: &Config) -> Result<Option<Credentials>, AppError> {
    let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) else {
        return Ok(None);
    };

    Credentials {
        username: username.clone(),
        password: password.clone(),
    }
    .validate()
    .map(Some)
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    fn message(result: Result<Credentials, AppError>) -> String {
        match result {
            Err(AppError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn credentials_are_trimmed() {
        let valid = creds("  admin ", " secret1 ").validate().unwrap();
        assert_eq!(valid.username, "admin");
        assert_eq!(valid.password, "secret1");
    }

    #[test]
    fn short_values_are_rejected() {
        assert_eq!(
            message(creds("ab", "12345").validate()),
            "Username must be between 3 and 100 characters, Password must be at least 6 characters"
        );
        assert_eq!(
            message(creds(&"u".repeat(101), "secret1").validate()),
            "Username must be between 3 and 100 characters"
        );
    }

    #[test]
    fn missing_values_are_required() {
        assert_eq!(
            message(Credentials::default().validate()),
            "Username is required, Password is required"
        );
        // 只有空白也算缺失
        assert_eq!(message(creds("admin", "      ").validate()), "Password is required");
    }

    #[test]
    fn missing_role_grants_nothing() {
        let user = User {
            id: 1,
            username: "root".into(),
            password: String::new(),
            role: None,
            created_at: None,
        };
        assert_eq!(user.role(), "");
        assert_eq!(user.info().role, "");

        let admin = User {
            role: Some(ROLE_ADMIN.into()),
            ..user
        };
        assert_eq!(admin.role(), ROLE_ADMIN);
    }

    #[test]
    fn seeded_admin_uses_login_rules() {
        let config = Config {
            admin_username: Some(" root ".into()),
            admin_password: Some("  secret1\n".into()),
            ..Config::default()
        };
        let seed = seed_credentials(&config).unwrap().unwrap();
        assert_eq!(seed.username, "root");
        assert_eq!(seed.password, "secret1");

        // 登录时同样去掉空白，得到相同的密码
        let login = creds("root", " secret1 ").validate().unwrap();
        assert_eq!(login.password, seed.password);

        let short = Config {
            admin_password: Some("123".into()),
            ..config
        };
        assert!(matches!(seed_credentials(&short), Err(AppError::Validation(_))));

        assert!(seed_credentials(&Config::default()).unwrap().is_none());
    }
}
