//! Authentication extractors.
//!
//! Bearer tokens are verified on every request; there is no session.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::db::Store;
use crate::error::{AppError, set_sentry_user};
use crate::identity::AuthUser;
use crate::state::AppState;

/// Extractor that requires an authenticated caller.
///
/// Rejects with 401 if the bearer token is missing or invalid.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(RequireAuth(user): RequireAuth) -> impl IntoResponse {
///     format!("Hello, {}!", user.user_id)
/// }
/// ```
pub struct RequireAuth(pub AuthUser);

impl<S: Store> FromRequestParts<AppState<S>> for RequireAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let user = state.tokens().verify_header(header).map_err(|e| {
            tracing::warn!(target: "security", error = %e, path = %parts.uri.path(), "Token rejected");
            AppError::from(e)
        })?;

        set_sentry_user(user.user_id.as_str());
        Ok(Self(user))
    }
}

/// Extractor that requires an administrator.
///
/// Rejects with 401 without a valid token and 403 for non-administrators.
pub struct RequireAdmin(pub AuthUser);

impl<S: Store> FromRequestParts<AppState<S>> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let RequireAuth(user) = RequireAuth::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            tracing::warn!(
                target: "security",
                user_id = %user.user_id,
                path = %parts.uri.path(),
                "Admin route denied"
            );
            return Err(AppError::Forbidden("administrator access required".to_string()));
        }
        Ok(Self(user))
    }
}
