//! Per-request capability context.
//!
//! Every authenticated handler takes a [`RequestScope`]. It is the only way
//! to obtain an [`AccessScope`], so data access cannot run without one.

use crate::db::{self, DbUser};
use crate::domain::models::{AcademicYear, UserRole};
use crate::domain::visibility::AccessScope;
use crate::error::{AppError, AppResult};
use crate::state::SharedState;
use crate::web::session;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use chrono::Utc;
use uuid::Uuid;

pub const YEAR_HEADER: &str = "x-academic-year";

#[derive(Debug, Clone)]
pub struct RequestScope {
    pub user: DbUser,
    pub session_id: Uuid,
    /// `None` when no year is active and none was requested.
    pub year: Option<AcademicYear>,
    pub access: AccessScope,
}

impl RequestScope {
    pub fn require_role(&self, allowed: &[UserRole]) -> AppResult<()> {
        if allowed.contains(&self.user.role) {
            Ok(())
        } else {
            tracing::warn!(
                "User {} with role {} refused (needs one of {:?})",
                self.user.id,
                self.user.role.as_str(),
                allowed
            );
            Err(AppError::Forbidden)
        }
    }

    pub fn year_id(&self) -> AppResult<Uuid> {
        self.year
            .as_ref()
            .map(|y| y.id)
            .ok_or_else(|| AppError::BadRequest("no academic year is active".to_string()))
    }
}

fn requested_year(headers: &HeaderMap) -> AppResult<Option<Uuid>> {
    let Some(raw) = headers.get(YEAR_HEADER) else {
        return Ok(None);
    };
    let raw = raw
        .to_str()
        .map_err(|_| AppError::BadRequest("invalid X-Academic-Year header".to_string()))?;
    Uuid::parse_str(raw.trim())
        .map(Some)
        .map_err(|_| AppError::BadRequest("X-Academic-Year must be a UUID".to_string()))
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestScope
where
    S: Send + Sync,
    SharedState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = SharedState::from_ref(state);

        let token = session::extract_token(&parts.headers).ok_or(AppError::Unauthorized)?;
        let claims = session::verify_session(&token, &state.config.session_key, Utc::now()).map_err(|e| {
            tracing::warn!("Session verification failed: {}", e);
            AppError::Unauthorized
        })?;

        let stored = db::find_session(&state.pool, claims.session_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        if stored.user_id != claims.user_id || stored.revoked_at.is_some() || stored.expires_at <= Utc::now() {
            tracing::warn!("Session {} is revoked or expired", claims.session_id);
            return Err(AppError::Unauthorized);
        }

        let user = db::find_user_by_id(&state.pool, claims.user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        if !user.is_active || user.role != claims.role {
            return Err(AppError::Unauthorized);
        }

        let year = match requested_year(&parts.headers)? {
            Some(id) => Some(db::find_year(&state.pool, id).await?.ok_or(AppError::NotFound("academic year"))?),
            None => db::active_year(&state.pool).await?,
        };

        let assignments = match user.role {
            UserRole::Teacher | UserRole::Inspector | UserRole::Sg => db::load_assignments(&state.pool, user.id).await?,
            UserRole::Founder | UserRole::Admin => Default::default(),
        };
        let access = AccessScope::build(user.id, user.role, &assignments, year.as_ref().map(|y| y.id));

        Ok(RequestScope {
            user,
            session_id: claims.session_id,
            year,
            access,
        })
    }
}
