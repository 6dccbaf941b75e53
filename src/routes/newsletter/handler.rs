use axum::{
    extract::{Json, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{AppState, error::AppResult};

use super::model::{EmailRequest, SubscribeResponse, Subscriber, UnsubscribeResponse};

#[axum::debug_handler]
pub async fn subscribe(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(request) = payload?;
    let email = request.normalized()?;

    let subscription = Subscriber::subscribe(&state.pool, &email).await?;
    tracing::info!(%email, ?subscription, "Newsletter subscription stored");

    // 欢迎邮件失败不影响订阅结果
    let email_sent = match state.email.send_welcome(&email).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(%email, "Failed to send welcome email: {}", e);
            false
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(SubscribeResponse {
            message: subscription.message(email_sent).to_string(),
            email,
            email_sent,
        }),
    ))
}

#[axum::debug_handler]
pub async fn unsubscribe(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> AppResult<Json<UnsubscribeResponse>> {
    let Json(request) = payload?;
    let email = request.normalized()?;

    Subscriber::unsubscribe(&state.pool, &email).await?;
    tracing::info!(%email, "Newsletter subscription deactivated");

    Ok(Json(UnsubscribeResponse {
        message: "Successfully unsubscribed from newsletter".into(),
        email,
    }))
}
