use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::Config;

pub mod periodic;
pub mod validators;

pub const ROLE_ADMIN: &str = "admin";

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: i32,          // 用户ID
    pub username: String, // 用户名
    pub role: String,     // 角色
    pub iat: i64,         // 签发时间
    pub exp: i64,         // 过期时间
}

impl Claims {
    pub fn has_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| *role == self.role)
    }
}

pub fn generate_token(
    id: i32,
    username: &str,
    role: &str,
    config: &Config,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration = (now + Duration::seconds(config.jwt_expiration().as_secs() as i64)).timestamp();

    let claims = Claims {
        id,
        username: username.to_string(),
        role: role.to_string(),
        iat: now.timestamp(),
        exp: expiration,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    tracing::debug!(user_id = id, "Generated access token");
    Ok((token, expiration))
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            jwt_secret: "test-secret".into(),
            ..Config::default()
        }
    }

    #[test]
    fn token_round_trips_claims() {
        let config = config();
        let (token, exp) = generate_token(7, "alice", ROLE_ADMIN, &config).unwrap();
        let claims = verify_token(&token, &config).unwrap();
        assert_eq!(claims.id, 7);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, ROLE_ADMIN);
        assert_eq!(claims.exp, exp);
        assert!(claims.has_role(&[ROLE_ADMIN]));
        assert!(!claims.has_role(&["editor"]));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let (token, _) = generate_token(1, "bob", ROLE_ADMIN, &config()).unwrap();
        let other = Config {
            jwt_secret: "another-secret".into(),
            ..Config::default()
        };
        assert!(verify_token(&token, &other).is_err());
    }

    #[test]
    fn password_hash_verifies() {
        // 测试中使用最低成本，避免拖慢测试
        let hashed = hash_password("hunter22", 4).unwrap();
        assert!(verify_password("hunter22", &hashed).unwrap());
        assert!(!verify_password("hunter23", &hashed).unwrap());
    }
}
