use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use crate::auth::dto::PublicUser;
use crate::auth::error::AuthError;
use crate::auth::service::AuthService;
use crate::state::AppState;

/// Extracts the bearer access token, verifies it and resolves the user.
pub struct AuthUser(pub PublicUser);

/// Pulls the token out of an `Authorization` header value. The scheme is
/// matched case-insensitively per RFC 9110.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim_start();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::Unauthenticated)?;

        let token = bearer_token(auth).ok_or(AuthError::Unauthenticated)?;

        let service = AuthService::from_ref(state);
        let user = service.verify_access_token(token).await?;
        Ok(AuthUser(user))
    }
}
