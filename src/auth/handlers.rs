use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{
            LoginRequest, LoginResponse, MessageResponse, PublicUser, RefreshRequest,
            RefreshResponse, RegisterRequest, RegisterResponse,
        },
        error::AuthError,
        extractors::AuthUser,
        service::AuthService,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

// Emails are matched case-sensitively; only surrounding whitespace is glue.
fn validate_credentials(email: &mut String, password: &str) -> Result<(), AuthError> {
    *email = email.trim().to_string();

    if !is_valid_email(email) {
        warn!(email = %email, "invalid email");
        return Err(AuthError::BadRequest("Invalid email".into()));
    }
    if password.len() < 8 {
        warn!("password too short");
        return Err(AuthError::BadRequest("Password too short".into()));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AuthError> {
    validate_credentials(&mut payload.email, &payload.password)?;

    let service = AuthService::from_ref(&state);
    let user = service.register(&payload.email, &payload.password).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".into(),
            user,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    payload.email = payload.email.trim().to_string();

    let service = AuthService::from_ref(&state);
    let (user, pair) = service.login(&payload.email, &payload.password).await?;

    Ok(Json(LoginResponse {
        message: "Login successful".into(),
        user,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AuthError> {
    let service = AuthService::from_ref(&state);
    let (user, pair) = service.refresh(&payload.refresh_token).await?;

    Ok(Json(RefreshResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user,
    }))
}

#[instrument(skip(state, user))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<MessageResponse>, AuthError> {
    let service = AuthService::from_ref(&state);
    service.logout(user.id).await?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully".into(),
    }))
}

#[instrument(skip(user))]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<PublicUser> {
    Json(user)
}
