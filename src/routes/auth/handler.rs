use axum::{
    extract::{Json, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    error::{AppError, AppResult, INVALID_CREDENTIALS, USERNAME_EXISTS},
    utils::{ROLE_ADMIN, generate_token, hash_password, verify_password},
};

use super::model::{Credentials, LoginResponse, User, is_unique_violation};

fn issue_token(state: &AppState, user: &User) -> AppResult<LoginResponse> {
    let (token, _expires_at) = generate_token(user.id, &user.username, user.role(), &state.config)?;
    Ok(LoginResponse {
        token,
        user: user.info(),
    })
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> AppResult<Json<LoginResponse>> {
    let Json(credentials) = payload?;
    let credentials = credentials.validate()?;

    let Some(user) = User::find_by_username(&state.pool, &credentials.username).await? else {
        tracing::info!(username = %credentials.username, "Login failed: unknown user");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    };

    if !verify_password(&credentials.password, &user.password)? {
        tracing::info!(username = %user.username, "Login failed: wrong password");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    tracing::info!(user_id = user.id, "User logged in");
    Ok(Json(issue_token(&state, &user)?))
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(credentials) = payload?;
    let credentials = credentials.validate()?;

    if User::find_by_username(&state.pool, &credentials.username)
        .await?
        .is_some()
    {
        return Err(AppError::Validation(USERNAME_EXISTS.into()));
    }

    let hash = hash_password(&credentials.password, state.config.bcrypt_cost)?;
    let user = match User::create(&state.pool, &credentials.username, &hash, ROLE_ADMIN).await {
        Ok(user) => user,
        // 并发注册同名用户
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::Validation(USERNAME_EXISTS.into()));
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(user_id = user.id, username = %user.username, "User registered");
    Ok((StatusCode::CREATED, Json(issue_token(&state, &user)?)))
}
