use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::{error::AppError, utils::validators::is_valid_email};

pub const ALREADY_SUBSCRIBED: &str = "This email is already subscribed to our newsletter";

#[derive(Debug, Clone, FromRow)]
pub struct Subscriber {
    pub id: i32,
    pub email: String,
    pub subscribed_at: Option<NaiveDateTime>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    pub message: String,
    pub email: String,
    pub email_sent: bool,
}

#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub message: String,
    pub email: String,
}

/// 订阅结果：新订阅或重新激活
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Created,
    Reactivated,
}

impl Subscription {
    pub fn message(self, email_sent: bool) -> &'static str {
        match (self, email_sent) {
            (Subscription::Created, true) => {
                "Successfully subscribed to newsletter! Check your email for confirmation."
            }
            (Subscription::Created, false) => {
                "Successfully subscribed to newsletter! Welcome email could not be sent, but you will receive future airdrop alerts."
            }
            (Subscription::Reactivated, true) => {
                "Welcome back! Your subscription has been reactivated. Check your email for confirmation."
            }
            (Subscription::Reactivated, false) => {
                "Welcome back! Your subscription has been reactivated. Welcome email could not be sent, but you will receive future airdrop alerts."
            }
        }
    }
}

impl EmailRequest {
    /// 返回去空白、小写后的邮箱
    pub fn normalized(&self) -> Result<String, AppError> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(AppError::Validation("Email is required".into()));
        }
        if !is_valid_email(email) {
            return Err(AppError::Validation(
                "Please provide a valid email address".into(),
            ));
        }
        Ok(email.to_lowercase())
    }
}

impl Subscriber {
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Subscriber>("SELECT * FROM newsletter_subscribers WHERE email = $1")
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    /// 已激活的邮箱返回错误，停用的重新激活
    pub async fn subscribe(pool: &PgPool, email: &str) -> Result<Subscription, AppError> {
        if let Some(existing) = Self::find_by_email(pool, email).await? {
            if existing.active.unwrap_or(true) {
                return Err(AppError::Validation(ALREADY_SUBSCRIBED.into()));
            }

            sqlx::query(
                "UPDATE newsletter_subscribers SET active = TRUE, subscribed_at = NOW() WHERE email = $1",
            )
            .bind(email)
            .execute(pool)
            .await?;
            return Ok(Subscription::Reactivated);
        }

        let inserted = sqlx::query(
            "INSERT INTO newsletter_subscribers (email, active) VALUES ($1, TRUE) \
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(email)
        .execute(pool)
        .await?;

        // 并发订阅时另一个请求先插入了
        if inserted.rows_affected() == 0 {
            return Err(AppError::Validation(ALREADY_SUBSCRIBED.into()));
        }
        Ok(Subscription::Created)
    }

    pub async fn unsubscribe(pool: &PgPool, email: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE newsletter_subscribers SET active = FALSE WHERE email = $1")
            .bind(email)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn active_emails(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT email FROM newsletter_subscribers WHERE active = TRUE ORDER BY id",
        )
        .fetch_all(pool)
        .await
    }
}
