use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::{config::Config, routes::airdrop::Airdrop};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email delivery is not configured")]
    NotConfigured,
    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("email API rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Serialize)]
struct OutgoingEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: String,
    text: String,
}

/// 一次群发的结果汇总
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotificationReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Resend HTTP API 客户端，未配置 API key 时所有发送都会返回 `NotConfigured`
#[derive(Clone)]
pub struct EmailService {
    client: Client,
    api_key: Option<Arc<str>>,
    from: Arc<str>,
    site_url: Arc<str>,
    endpoint: Arc<str>,
}

impl EmailService {
    pub fn from_config(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: config.resend_api_key.as_deref().map(Arc::from),
            from: config.resend_from_email.as_str().into(),
            site_url: config.site_url.trim_end_matches('/').into(),
            endpoint: RESEND_ENDPOINT.into(),
        }
    }

    /// 指向其他兼容 Resend 的地址
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send(&self, to: &str, subject: String, text: String) -> Result<(), EmailError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(EmailError::NotConfigured);
        };

        let message = OutgoingEmail {
            from: &self.from,
            to: [to],
            subject,
            text,
        };

        let response = self
            .client
            .post(&*self.endpoint)
            .bearer_auth(api_key)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    pub async fn send_welcome(&self, recipient: &str) -> Result<(), EmailError> {
        let (subject, text) = welcome_message(&self.site_url);
        self.send(recipient, subject, text).await?;
        tracing::info!(%recipient, "Welcome email sent");
        Ok(())
    }

    /// 向所有订阅者发送新空投提醒，单个失败只记录日志
    pub async fn notify_new_airdrop(
        &self,
        airdrop: &Airdrop,
        recipients: &[String],
    ) -> NotificationReport {
        if recipients.is_empty() {
            tracing::info!("No active subscribers to notify");
            return NotificationReport::default();
        }

        let (subject, text) = airdrop_message(airdrop, &self.site_url);
        let results = join_all(recipients.iter().map(|recipient| {
            let subject = subject.clone();
            let text = text.clone();
            async move {
                match self.send(recipient, subject, text).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(%recipient, "Failed to send airdrop notification: {}", e);
                        false
                    }
                }
            }
        }))
        .await;

        let sent = results.iter().filter(|ok| **ok).count();
        let report = NotificationReport {
            total: recipients.len(),
            sent,
            failed: recipients.len() - sent,
        };
        tracing::info!(
            airdrop = %airdrop.name,
            sent = report.sent,
            failed = report.failed,
            total = report.total,
            "Airdrop notifications dispatched"
        );
        report
    }
}

fn welcome_message(site_url: &str) -> (String, String) {
    let subject = "Welcome to CryptoDrops - Your Airdrop Journey Starts Now!".to_string();
    let text = format!(
        "Thank you for subscribing!\n\n\
         You will get instant alerts when new airdrops are posted, along with \
         verified opportunities from trusted blockchain projects.\n\n\
         Explore airdrops now: {site_url}\n\n\
         The CryptoDrops Team\n\n\
         You are receiving this email because you subscribed to the CryptoDrops newsletter."
    );
    (subject, text)
}

fn airdrop_message(airdrop: &Airdrop, site_url: &str) -> (String, String) {
    let subject = format!(
        "New Airdrop Alert: {} on {}",
        airdrop.name, airdrop.blockchain
    );

    let mut text = format!(
        "A new airdrop has just been posted on CryptoDrops.\n\n{} ({}, {})\n\n{}\n",
        airdrop.name,
        airdrop.blockchain,
        airdrop.status.to_uppercase(),
        airdrop.description
    );

    let details = [
        ("Estimated reward", &airdrop.estimated_reward),
        ("Total value", &airdrop.total_value),
        ("Difficulty", &airdrop.difficulty),
        ("End date", &airdrop.end_date),
    ];
    for (label, value) in details {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            text.push_str(&format!("\n{label}: {value}"));
        }
    }

    text.push_str(&format!(
        "\n\nView full details: {site_url}#airdrop-{}\n\nThe CryptoDrops Team",
        airdrop.id
    ));
    (subject, text)
}
