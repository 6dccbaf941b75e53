use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::{
    AppState,
    error::{ACCESS_DENIED, AppError, INSUFFICIENT_PERMISSIONS, INVALID_TOKEN},
    utils::{Claims, ROLE_ADMIN, verify_token},
};

/// 校验 Bearer token，并把 Claims 放入请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(Authorization(bearer)) = request.headers().typed_get::<Authorization<Bearer>>() else {
        return Err(AppError::Unauthorized(ACCESS_DENIED.into()));
    };

    let claims = verify_token(bearer.token(), &state.config).map_err(|e| {
        tracing::debug!("Token verification failed: {}", e);
        AppError::Forbidden(INVALID_TOKEN.into())
    })?;

    tracing::debug!(user_id = claims.id, role = %claims.role, "Authenticated request");
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// 允许访问的角色列表
#[derive(Clone)]
pub struct AllowedRoles(Arc<[&'static str]>);

impl AllowedRoles {
    pub fn new(roles: &[&'static str]) -> Self {
        Self(roles.into())
    }

    pub fn admin() -> Self {
        Self::new(&[ROLE_ADMIN])
    }
}

/// 必须放在 `auth_middleware` 之后
pub async fn authorize_roles(
    State(allowed): State<AllowedRoles>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(claims) = request.extensions().get::<Claims>() else {
        return Err(AppError::Forbidden(ACCESS_DENIED.into()));
    };

    if !claims.has_role(&allowed.0) {
        tracing::warn!(user_id = claims.id, role = %claims.role, "Insufficient permissions");
        return Err(AppError::Forbidden(INSUFFICIENT_PERMISSIONS.into()));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, utils::generate_token};
    use axum::{
        Extension, Router,
        http::{StatusCode, header::AUTHORIZATION},
        middleware,
        routing::get,
    };
    use tower::ServiceExt;

    fn config() -> Config {
        Config {
            jwt_secret: "auth-test-secret".into(),
            ..Config::default()
        }
    }

    async fn whoami(Extension(claims): Extension<Claims>) -> String {
        claims.username
    }

    fn app(roles: AllowedRoles) -> Router {
        let state = AppState::for_tests(config());
        Router::new()
            .route("/admin", get(whoami))
            .route_layer(middleware::from_fn_with_state(roles, authorize_roles))
            .route_layer(middleware::from_fn_with_state(state, auth_middleware))
    }

    fn request(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/admin");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let response = app(AllowedRoles::admin()).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn garbage_token_is_forbidden() {
        let response = app(AllowedRoles::admin())
            .oneshot(request(Some("not-a-jwt")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_passes() {
        let (token, _) = generate_token(1, "root", ROLE_ADMIN, &config()).unwrap();
        let response = app(AllowedRoles::admin())
            .oneshot(request(Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_role_is_forbidden() {
        let (token, _) = generate_token(2, "viewer", "viewer", &config()).unwrap();
        let response = app(AllowedRoles::admin())
            .oneshot(request(Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app(AllowedRoles::new(&[ROLE_ADMIN, "viewer"]))
            .oneshot(request(Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
