//! JWT issuing/validation and the `AuthUser` / `AdminUser` extractors.
//!
//! Access and refresh tokens are HS256 JWTs signed with separate secrets and
//! tagged with a `kind` claim, so one can never stand in for the other.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::user::UserRole;
use crate::state::AppState;

pub mod handlers;
pub mod password;

pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: UserRole,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

fn secret_for(config: &Config, kind: TokenKind) -> &[u8] {
    match kind {
        TokenKind::Access => config.access_token_secret.as_bytes(),
        TokenKind::Refresh => config.refresh_token_secret.as_bytes(),
    }
}

pub fn issue_token(
    config: &Config,
    user_id: Uuid,
    role: UserRole,
    kind: TokenKind,
    now: DateTime<Utc>,
) -> Result<String, AppError> {
    let ttl = match kind {
        TokenKind::Access => Duration::minutes(ACCESS_TOKEN_TTL_MINUTES),
        TokenKind::Refresh => Duration::days(REFRESH_TOKEN_TTL_DAYS),
    };
    let claims = Claims {
        sub: user_id,
        role,
        kind,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret_for(config, kind)),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to sign token: {e}")))
}

pub fn issue_token_pair(
    config: &Config,
    user_id: Uuid,
    role: UserRole,
    now: DateTime<Utc>,
) -> Result<TokenPair, AppError> {
    Ok(TokenPair {
        access_token: issue_token(config, user_id, role, TokenKind::Access, now)?,
        refresh_token: issue_token(config, user_id, role, TokenKind::Refresh, now)?,
    })
}

pub fn verify_token(config: &Config, token: &str, kind: TokenKind) -> Result<Claims, AppError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret_for(config, kind)),
        &validation,
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))?;

    if data.claims.kind != kind {
        return Err(AppError::Unauthorized("wrong token kind".into()));
    }
    Ok(data.claims)
}

/// The authenticated caller, taken from `Authorization: Bearer <access token>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or_else(|| AppError::Unauthorized("missing Authorization header".into()))?
            .to_str()
            .map_err(|_| AppError::Unauthorized("invalid Authorization header".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("expected a Bearer token".into()))?;

        let claims = verify_token(&state.config, token.trim(), TokenKind::Access)?;
        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}

/// An authenticated caller with the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != UserRole::Admin {
            return Err(AppError::Forbidden("admin role required".into()));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_config;

    #[test]
    fn test_access_token_round_trip() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = issue_token(&config, user_id, UserRole::Admin, TokenKind::Access, Utc::now())
            .unwrap();
        let claims = verify_token(&config, &token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, UserRole::Admin);
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_TTL_MINUTES * 60);
    }

    #[test]
    fn test_refresh_token_is_not_an_access_token() {
        let config = test_config();
        let pair = issue_token_pair(&config, Uuid::new_v4(), UserRole::User, Utc::now()).unwrap();
        assert!(verify_token(&config, &pair.refresh_token, TokenKind::Access).is_err());
        assert!(verify_token(&config, &pair.access_token, TokenKind::Refresh).is_err());
        assert!(verify_token(&config, &pair.refresh_token, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn test_expired_access_token_rejected() {
        let config = test_config();
        let issued = Utc::now() - Duration::hours(1);
        let token =
            issue_token(&config, Uuid::new_v4(), UserRole::User, TokenKind::Access, issued).unwrap();
        let err = verify_token(&config, &token, TokenKind::Access).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let config = test_config();
        let token = issue_token(
            &config,
            Uuid::new_v4(),
            UserRole::User,
            TokenKind::Access,
            Utc::now(),
        )
        .unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(verify_token(&config, &tampered, TokenKind::Access).is_err());
    }
}
