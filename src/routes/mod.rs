use axum::Json;
use serde_json::{Value, json};

pub mod airdrop;
pub mod auth;
pub mod newsletter;

/// 给外部探活服务用的轻量响应
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
