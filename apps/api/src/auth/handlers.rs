use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::password::{hash_password_blocking, verify_password_blocking};
use crate::auth::{issue_token_pair, verify_token, AuthUser, TokenKind};
use crate::errors::AppError;
use crate::models::user::User;
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 6;
const SUPPORTED_LOCALES: &[&str] = &["en", "ru", "uz"];

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub locale: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Email or username.
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ValidRegistration {
    pub name: String,
    pub email: String,
    pub username: String,
    pub locale: String,
}

/// Normalizes and checks a registration payload. Passwords are checked for
/// length only.
pub fn validate_registration(req: &RegisterRequest) -> Result<ValidRegistration, AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }

    let email = req.email.trim().to_lowercase();
    let valid_email = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
        .unwrap_or(false);
    if !valid_email {
        return Err(AppError::Validation("email is not valid".into()));
    }

    let username = req.username.trim().to_lowercase();
    if username.is_empty()
        || !username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    {
        return Err(AppError::Validation(
            "username may only contain a-z, 0-9, '.', '_' and '-'".into(),
        ));
    }

    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let locale = req
        .locale
        .as_deref()
        .map(str::trim)
        .filter(|l| SUPPORTED_LOCALES.contains(l))
        .unwrap_or("ru")
        .to_string();

    Ok(ValidRegistration {
        name: name.to_string(),
        email,
        username,
        locale,
    })
}

/// POST /api/auth/register
pub async fn handle_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    if state.config.disable_signups || state.config.disable_email_auth {
        return Err(AppError::Forbidden("signups are disabled".into()));
    }

    let valid = validate_registration(&req)?;
    let password_hash = hash_password_blocking(req.password.clone()).await?;

    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, email, username, password_hash, locale)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&valid.name)
    .bind(&valid.email)
    .bind(&valid.username)
    .bind(&password_hash)
    .bind(&valid.locale)
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_unique_violation(e, "email or username is already taken"))?;

    info!(user_id = %user.id, "User registered");

    let tokens = issue_token_pair(&state.config, user.id, user.role, Utc::now())?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }),
    ))
}

/// POST /api/auth/login
pub async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    if state.config.disable_email_auth {
        return Err(AppError::Forbidden("email authentication is disabled".into()));
    }

    let identifier = req.identifier.trim().to_lowercase();
    let user: Option<User> =
        sqlx::query_as("SELECT * FROM users WHERE email = $1 OR username = $1 LIMIT 1")
            .bind(&identifier)
            .fetch_optional(&state.db)
            .await?;

    let Some(user) = user else {
        return Err(AppError::Unauthorized("invalid credentials".into()));
    };
    if !verify_password_blocking(req.password, user.password_hash.clone()).await? {
        return Err(AppError::Unauthorized("invalid credentials".into()));
    }

    let tokens = issue_token_pair(&state.config, user.id, user.role, Utc::now())?;
    Ok(Json(AuthResponse {
        user,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}

/// POST /api/auth/refresh
pub async fn handle_refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let claims = verify_token(&state.config, &req.refresh_token, TokenKind::Refresh)?;

    // the role may have changed since the refresh token was issued
    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(claims.sub)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::Unauthorized("user no longer exists".into()))?;

    let tokens = issue_token_pair(&state.config, user.id, user.role, Utc::now())?;
    Ok(Json(AuthResponse {
        user,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }))
}

/// GET /api/auth/me
pub async fn handle_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<User>, AppError> {
    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    Ok(Json(user))
}
