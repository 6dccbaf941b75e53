use axum::{
    extract::{
        Json, Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::{
    AppState,
    error::{AIRDROP_NOT_FOUND, AppError, AppResult},
    routes::newsletter::Subscriber,
};

use super::model::{Airdrop, AirdropPage, AirdropPayload, ListQuery, Page, Pagination};

// 非数字 id 与不存在的 id 同样视为 404
fn parse_id(raw: &str) -> AppResult<i32> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| AppError::NotFound(AIRDROP_NOT_FOUND.into()))
}

#[axum::debug_handler]
pub async fn list_airdrops(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Json<AirdropPage>> {
    let Query(query) = query?;
    let page = Page::from_query(&query);
    let (airdrops, total) = Airdrop::list(&state.pool, page).await?;

    Ok(Json(AirdropPage {
        airdrops,
        pagination: Pagination::new(page, total),
    }))
}

#[axum::debug_handler]
pub async fn get_airdrop(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> AppResult<Json<Airdrop>> {
    let Path(id) = id?;
    let id = parse_id(&id)?;
    Airdrop::find_by_id(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(AIRDROP_NOT_FOUND.into()))
}

#[axum::debug_handler]
pub async fn create_airdrop(
    State(state): State<AppState>,
    payload: Result<Json<AirdropPayload>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(payload) = payload?;
    let data = payload.validate()?;

    let airdrop = Airdrop::create(&state.pool, &data).await?;
    tracing::info!(id = airdrop.id, name = %airdrop.name, "Airdrop created");

    // 通知订阅者放到后台，不拖慢响应
    if state.email.is_enabled() {
        let notified = airdrop.clone();
        tokio::spawn(async move {
            match Subscriber::active_emails(&state.pool).await {
                Ok(recipients) => {
                    let report = state.email.notify_new_airdrop(&notified, &recipients).await;
                    if report.total > 0 && report.sent == 0 {
                        tracing::error!(
                            airdrop = %notified.name,
                            total = report.total,
                            "Failed to notify any subscriber about new airdrop"
                        );
                    }
                }
                Err(e) => tracing::error!("Failed to load subscribers for notification: {}", e),
            }
        });
    }

    Ok((StatusCode::CREATED, Json(airdrop)))
}

#[axum::debug_handler]
pub async fn update_airdrop(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<AirdropPayload>, JsonRejection>,
) -> AppResult<Json<Airdrop>> {
    let Path(id) = id?;
    let id = parse_id(&id)?;
    let Json(payload) = payload?;
    let data = payload.validate()?;

    let airdrop = Airdrop::update(&state.pool, id, &data)
        .await?
        .ok_or_else(|| AppError::NotFound(AIRDROP_NOT_FOUND.into()))?;
    tracing::info!(id, "Airdrop updated");
    Ok(Json(airdrop))
}

#[axum::debug_handler]
pub async fn delete_airdrop(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> AppResult<impl IntoResponse> {
    let Path(id) = id?;
    let id = parse_id(&id)?;
    if !Airdrop::delete(&state.pool, id).await? {
        return Err(AppError::NotFound(AIRDROP_NOT_FOUND.into()));
    }

    tracing::info!(id, "Airdrop deleted");
    Ok(Json(json!({ "message": "Airdrop deleted successfully" })))
}

#[axum::debug_handler]
pub async fn get_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let stats = Airdrop::stats(&state.pool).await?;
    Ok(Json(stats))
}
