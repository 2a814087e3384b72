use crate::crypto;
use crate::db::{self, DbUser};
use crate::domain::models::{AcademicYear, AssignmentSet};
use crate::domain::validation::Validator;
use crate::error::{AppError, AppResult};
use crate::middleware::RequestScope;
use crate::state::SharedState;
use crate::web::session;
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: DbUser,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: DbUser,
    pub academic_year: Option<AcademicYear>,
    pub assignments: AssignmentSet,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .with_state(state)
}

async fn login(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let ip = addr.ip().to_string();
    if !state.login_limiter.check(&ip).await {
        tracing::warn!("Login rate limit exceeded for IP: {}", ip);
        return Err(AppError::TooManyRequests);
    }

    let mut v = Validator::new();
    v.non_empty("username", &payload.username)
        .non_empty("password", &payload.password);
    v.finish()?;

    let Some(user) = db::find_user_by_username(&state.pool, payload.username.trim()).await? else {
        tracing::warn!("Login failed for unknown username from {}", ip);
        return Err(AppError::Unauthorized);
    };
    let verified = crypto::verify_password(&payload.password, &user.hash).map_err(|e| {
        tracing::error!("Stored hash for user {} is unusable: {}", user.id, e);
        AppError::Unauthorized
    })?;
    if !verified || !user.is_active {
        tracing::warn!("Login failed for user {} from {}", user.id, ip);
        return Err(AppError::Unauthorized);
    }

    let issued = session::sign_session(
        user.id,
        user.role,
        &state.config.session_key,
        state.config.session_ttl,
        Utc::now(),
    )
    .map_err(|e| AppError::Internal(format!("cannot sign session: {e}")))?;
    db::insert_session(&state.pool, issued.claims.session_id, user.id, issued.expires_at).await?;
    db::audit::record(
        &state.pool,
        Some(user.id),
        "auth.login",
        "session",
        Some(issued.claims.session_id),
        json!({ "ip": ip }),
    )
    .await?;

    let cookie = session::session_cookie(&issued.token, state.config.session_ttl, state.config.secure_cookies);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(|e| AppError::Internal(e.to_string()))?,
    );

    tracing::info!("User {} logged in (session {})", user.id, issued.claims.session_id);
    Ok((
        headers,
        Json(LoginResponse {
            token: issued.token,
            user,
            expires_at: issued.expires_at,
        }),
    ))
}

async fn logout(scope: RequestScope, State(state): State<SharedState>) -> AppResult<impl IntoResponse> {
    db::revoke_session(&state.pool, scope.session_id).await?;
    tracing::info!("User {} logged out (session {})", scope.user.id, scope.session_id);

    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, HeaderValue::from_static(session::clear_session_cookie()));
    Ok((headers, Json(json!({ "ok": true }))))
}

async fn me(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<MeResponse>> {
    let assignments = db::load_assignments(&state.pool, scope.user.id)
        .await?
        .for_year(scope.year.as_ref().map(|y| y.id));
    Ok(Json(MeResponse {
        user: scope.user,
        academic_year: scope.year,
        assignments,
    }))
}
