use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

use crate::{
    error::AppError,
    utils::validators::{SocialPlatform, is_secure_url, is_social_media_link, sanitize_text},
};

pub const AIRDROP_TYPES: &[&str] = &[
    "social",
    "bounty-platforms",
    "testnet",
    "mainnet",
    "fill-form",
    "role",
    "liquidity",
    "mint-nft",
    "gaming",
    "staking",
    "trading",
    "node",
    "depin",
    "mint-domain",
    "hold",
    "ambassador",
    "wallet-airdrop",
    "contract-deployment",
    "taskbased",
];

pub const AIRDROP_STATUSES: &[&str] = &["active", "upcoming", "ended"];

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 500;
const MAX_NAME_CHARS: usize = 255;

#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Airdrop {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub blockchain: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub status: String,
    pub verified: Option<bool>,
    pub logo: Option<String>,
    pub airdrop_link: Option<String>,
    pub website: Option<String>,
    pub twitter: Option<String>,
    pub discord: Option<String>,
    pub telegram: Option<String>,
    pub total_value: Option<String>,
    pub estimated_reward: Option<String>,
    pub participants: Option<i32>,
    pub difficulty: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub requirements: Option<Value>,
    pub category: Option<String>,
    pub featured: Option<bool>,
    pub ended: Option<bool>,
    pub potential: Option<bool>,
    pub confirmed: Option<bool>,
    pub is_latest: Option<bool>,
    pub is_free: Option<bool>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

/// 创建/更新请求体，所有字段先按可选接收再统一校验
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirdropPayload {
    pub name: Option<String>,
    pub description: Option<String>,
    pub blockchain: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub verified: Option<bool>,
    pub logo: Option<String>,
    pub airdrop_link: Option<String>,
    pub website: Option<String>,
    pub twitter: Option<String>,
    pub discord: Option<String>,
    pub telegram: Option<String>,
    pub total_value: Option<String>,
    pub estimated_reward: Option<String>,
    pub participants: Option<i64>,
    pub difficulty: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub requirements: Option<Value>,
    pub category: Option<String>,
    pub featured: Option<bool>,
    pub ended: Option<bool>,
    pub potential: Option<bool>,
    pub confirmed: Option<bool>,
    pub is_latest: Option<bool>,
    pub is_free: Option<bool>,
}

/// 通过校验、可直接写库的空投数据
#[derive(Debug, Clone, PartialEq)]
pub struct NewAirdrop {
    pub name: String,
    pub description: String,
    pub blockchain: String,
    pub kind: String,
    pub status: String,
    pub verified: bool,
    pub logo: Option<String>,
    pub airdrop_link: Option<String>,
    pub website: Option<String>,
    pub twitter: Option<String>,
    pub discord: Option<String>,
    pub telegram: Option<String>,
    pub total_value: Option<String>,
    pub estimated_reward: Option<String>,
    pub participants: i32,
    pub difficulty: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub requirements: Option<Value>,
    pub category: Option<String>,
    pub featured: bool,
    pub ended: bool,
    pub potential: bool,
    pub confirmed: bool,
    pub is_latest: bool,
    pub is_free: bool,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn sanitized(value: Option<String>) -> Option<String> {
    trimmed(value).map(|v| sanitize_text(&v)).filter(|v| !v.is_empty())
}

impl AirdropPayload {
    /// 校验并清洗请求体，所有错误用 `, ` 合并成一条 400 消息
    pub fn validate(self) -> Result<NewAirdrop, AppError> {
        let mut errors: Vec<String> = Vec::new();

        let name = sanitized(self.name).unwrap_or_default();
        if name.is_empty() {
            errors.push("Name is required".into());
        } else if name.chars().count() > MAX_NAME_CHARS {
            errors.push("Name must be between 1 and 255 characters".into());
        }

        let description = sanitized(self.description).unwrap_or_default();
        if description.is_empty() {
            errors.push("Description is required".into());
        }

        let blockchain = sanitized(self.blockchain).unwrap_or_default();
        if blockchain.is_empty() {
            errors.push("Blockchain is required".into());
        }

        let kind = trimmed(self.kind).unwrap_or_default();
        if kind.is_empty() {
            errors.push("Type is required".into());
        } else if !AIRDROP_TYPES.contains(&kind.as_str()) {
            errors.push(format!("Type must be one of: {}", AIRDROP_TYPES.join(", ")));
        }

        let status = trimmed(self.status)
            .map(|s| s.to_lowercase())
            .unwrap_or_default();
        if !AIRDROP_STATUSES.contains(&status.as_str()) {
            errors.push("Status must be one of: active, upcoming, ended".into());
        }

        let participants = match self.participants {
            None => 0,
            Some(n) => match i32::try_from(n) {
                Ok(n) if n >= 0 => n,
                _ => {
                    errors.push("Participants must be a non-negative number".into());
                    0
                }
            },
        };

        let website = trimmed(self.website);
        if website.as_deref().is_some_and(|url| !is_secure_url(url)) {
            errors.push("Website must be a valid and secure URL".into());
        }

        let airdrop_link = trimmed(self.airdrop_link);
        if airdrop_link.as_deref().is_some_and(|url| !is_secure_url(url)) {
            errors.push("Airdrop link must be a valid and secure URL".into());
        }

        let twitter = trimmed(self.twitter);
        if twitter
            .as_deref()
            .is_some_and(|url| !is_social_media_link(url, SocialPlatform::Twitter))
        {
            errors.push("Twitter link must be a valid Twitter/X URL".into());
        }

        let discord = trimmed(self.discord);
        if discord
            .as_deref()
            .is_some_and(|url| !is_social_media_link(url, SocialPlatform::Discord))
        {
            errors.push("Discord link must be a valid Discord URL".into());
        }

        let telegram = trimmed(self.telegram);
        if telegram
            .as_deref()
            .is_some_and(|url| !is_social_media_link(url, SocialPlatform::Telegram))
        {
            errors.push("Telegram link must be a valid Telegram URL".into());
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors.join(", ")));
        }

        Ok(NewAirdrop {
            name,
            description,
            blockchain,
            kind,
            status,
            verified: self.verified.unwrap_or(false),
            logo: trimmed(self.logo),
            airdrop_link,
            website,
            twitter,
            discord,
            telegram,
            total_value: sanitized(self.total_value),
            estimated_reward: sanitized(self.estimated_reward),
            participants,
            difficulty: sanitized(self.difficulty),
            start_date: trimmed(self.start_date),
            end_date: trimmed(self.end_date),
            requirements: self.requirements.filter(|r| !r.is_null()),
            category: sanitized(self.category),
            featured: self.featured.unwrap_or(false),
            ended: self.ended.unwrap_or(false),
            potential: self.potential.unwrap_or(false),
            confirmed: self.confirmed.unwrap_or(false),
            is_latest: self.is_latest.unwrap_or(false),
            is_free: self.is_free.unwrap_or(false),
        })
    }
}

/// 列表查询参数，非法或为 0 的值按缺省处理
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

fn positive_int(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v != 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn from_query(query: &ListQuery) -> Self {
        let page = positive_int(query.page.as_deref()).unwrap_or(1).max(1);
        let limit = positive_int(query.limit.as_deref())
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: Page, total: i64) -> Self {
        let total_pages = (total + page.limit - 1) / page.limit;
        Self {
            page: page.page,
            limit: page.limit,
            total,
            total_pages,
            has_more: page.page < total_pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AirdropPage {
    pub airdrops: Vec<Airdrop>,
    pub pagination: Pagination,
}

/// 统计只需要的列
#[derive(Debug, Default, Clone, FromRow)]
pub struct StatsRow {
    pub status: String,
    pub participants: Option<i32>,
    pub total_value: Option<String>,
    pub verified: Option<bool>,
    pub ended: Option<bool>,
    pub confirmed: Option<bool>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AirdropStats {
    pub total_airdrops: usize,
    pub active_airdrops: usize,
    pub total_value_distributed: String,
    pub total_participants: String,
    pub successful_claims: String,
    pub upcoming_airdrops: usize,
    pub verified_airdrops: usize,
    pub confirmed_airdrops: usize,
}

// 解析字符串开头的数字部分，解析不出时为 0
fn leading_number(input: &str) -> f64 {
    let input = input.trim_start();
    let end = input
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && matches!(c, '-' | '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);

    (1..=end)
        .rev()
        .find_map(|len| input[..len].parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// "$1.5M"、"$500K"、"$2B"、"1,000" 这类金额转成美元数值
pub fn parse_usd_amount(raw: &str) -> f64 {
    let clean: String = raw.chars().filter(|c| !matches!(c, '$' | ',')).collect();
    let multiplier = if clean.contains('B') {
        1_000_000_000.0
    } else if clean.contains('M') {
        1_000_000.0
    } else if clean.contains('K') {
        1_000.0
    } else {
        1.0
    };
    let digits: String = clean
        .chars()
        .filter(|c| !matches!(c, 'B' | 'M' | 'K'))
        .collect();
    leading_number(&digits) * multiplier
}

pub fn format_usd_amount(value: f64) -> String {
    // 负数、NaN 和 -0.0 都按 $0 显示
    if value.is_nan() || value <= 0.0 {
        return "$0".into();
    }
    if value >= 1_000_000_000.0 {
        format!("${:.1}B", value / 1_000_000_000.0)
    } else if value >= 1_000_000.0 {
        format!("${:.1}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("${:.1}K", value / 1_000.0)
    } else {
        format!("${:.0}", value)
    }
}

pub fn format_participants(count: i64) -> String {
    let value = count as f64;
    if value >= 1_000_000.0 {
        format!("{:.1}M+", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("{:.1}K+", value / 1_000.0)
    } else {
        count.to_string()
    }
}

fn count(rows: &[StatsRow], pred: impl Fn(&StatsRow) -> bool) -> usize {
    rows.iter().filter(|r| pred(r)).count()
}

impl AirdropStats {
    pub fn from_rows(rows: &[StatsRow]) -> Self {

        let total_participants: i64 = rows
            .iter()
            .map(|r| i64::from(r.participants.unwrap_or(0)))
            .sum();
        let total_value: f64 = rows
            .iter()
            .filter_map(|r| r.total_value.as_deref())
            .filter(|v| !v.is_empty())
            .map(parse_usd_amount)
            .fold(0.0, |acc, v| acc + v);

        let ended = count(rows, |r| r.ended.unwrap_or(false) || r.status == "ended");
        let confirmed = count(rows, |r| r.confirmed.unwrap_or(false));
        let success_rate = if ended > 0 {
            (confirmed as f64 / ended as f64 * 100.0).round() as i64
        } else {
            0
        };

        Self {
            total_airdrops: rows.len(),
            active_airdrops: count(rows, |r| r.status == "active"),
            total_value_distributed: format_usd_amount(total_value),
            total_participants: format_participants(total_participants),
            successful_claims: format!("{success_rate}%"),
            upcoming_airdrops: count(rows, |r| r.status == "upcoming"),
            verified_airdrops: count(rows, |r| r.verified.unwrap_or(false)),
            confirmed_airdrops: confirmed,
        }
    }
}

const INSERT_COLUMNS: &str = "name, description, blockchain, type, status, verified, logo, \
    airdrop_link, website, twitter, discord, telegram, total_value, estimated_reward, \
    participants, difficulty, start_date, end_date, requirements, category, featured, ended, \
    potential, confirmed, is_latest, is_free";

type AirdropQuery<'q> =
    sqlx::query::QueryAs<'q, sqlx::Postgres, Airdrop, sqlx::postgres::PgArguments>;

fn bind_fields<'q>(query: AirdropQuery<'q>, data: &'q NewAirdrop) -> AirdropQuery<'q> {
    query
        .bind(&data.name)
        .bind(&data.description)
        .bind(&data.blockchain)
        .bind(&data.kind)
        .bind(&data.status)
        .bind(data.verified)
        .bind(&data.logo)
        .bind(&data.airdrop_link)
        .bind(&data.website)
        .bind(&data.twitter)
        .bind(&data.discord)
        .bind(&data.telegram)
        .bind(&data.total_value)
        .bind(&data.estimated_reward)
        .bind(data.participants)
        .bind(&data.difficulty)
        .bind(&data.start_date)
        .bind(&data.end_date)
        .bind(&data.requirements)
        .bind(&data.category)
        .bind(data.featured)
        .bind(data.ended)
        .bind(data.potential)
        .bind(data.confirmed)
        .bind(data.is_latest)
        .bind(data.is_free)
}

impl Airdrop {
    pub async fn list(pool: &PgPool, page: Page) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let rows = sqlx::query_as::<_, Airdrop>(
            "SELECT * FROM airdrops ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool);

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM airdrops").fetch_one(pool);

        let (rows, total) = tokio::try_join!(rows, total)?;
        Ok((rows, total))
    }

    pub async fn find_by_id(pool: &PgPool, id: i32) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Airdrop>("SELECT * FROM airdrops WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn create(pool: &PgPool, data: &NewAirdrop) -> Result<Self, sqlx::Error> {
        let sql = format!(
            "INSERT INTO airdrops ({INSERT_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
             $19::json, $20, $21, $22, $23, $24, $25, $26) RETURNING *"
        );
        bind_fields(sqlx::query_as::<_, Airdrop>(&sql), data)
            .fetch_one(pool)
            .await
    }

    /// 整行替换，同时刷新 updated_at
    pub async fn update(
        pool: &PgPool,
        id: i32,
        data: &NewAirdrop,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql = "UPDATE airdrops SET \
             name = $1, description = $2, blockchain = $3, type = $4, status = $5, \
             verified = $6, logo = $7, airdrop_link = $8, website = $9, twitter = $10, \
             discord = $11, telegram = $12, total_value = $13, estimated_reward = $14, \
             participants = $15, difficulty = $16, start_date = $17, end_date = $18, \
             requirements = $19::json, category = $20, featured = $21, ended = $22, \
             potential = $23, confirmed = $24, is_latest = $25, is_free = $26, \
             updated_at = NOW() \
             WHERE id = $27 RETURNING *";
        bind_fields(sqlx::query_as::<_, Airdrop>(sql), data)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn delete(pool: &PgPool, id: i32) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM airdrops WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn stats(pool: &PgPool) -> Result<AirdropStats, sqlx::Error> {
        let rows = sqlx::query_as::<_, StatsRow>(
            "SELECT status, participants, total_value, verified, ended, confirmed FROM airdrops",
        )
        .fetch_all(pool)
        .await?;
        Ok(AirdropStats::from_rows(&rows))
    }
}
