use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts, OptionalFromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::auth::models::AuthenticatedUser;
use crate::auth::token::TokenService;
use crate::db::models::UserStatus;
use crate::db::repository::UserRepository;
use crate::error::AppError;

/// Pull the token out of an `Authorization: Bearer <token>` header.
///
/// `Ok(None)` when the header is absent; an error when it is present but
/// not a bearer credential.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AppError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::Auth("Malformed Authorization header".into()))?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(Some(token.trim()))
        }
        _ => Err(AppError::Auth("Expected a Bearer token".into())),
    }
}

/// Verify `token` and check the account behind it is still active.
///
/// The role comes from the stored account, so a demotion applies to tokens
/// already issued.
pub async fn resolve_caller(
    tokens: &TokenService,
    users: &dyn UserRepository,
    token: &str,
) -> Result<AuthenticatedUser, AppError> {
    let claimed = tokens.verify(token)?;
    let account = users
        .get_user(&claimed.user_id)
        .await?
        .ok_or_else(|| AppError::Auth("Account no longer exists".into()))?;
    if account.status != UserStatus::Active {
        return Err(AppError::Auth("Account is inactive".into()));
    }
    Ok(AuthenticatedUser {
        user_id: account.id,
        username: account.username,
        role: account.role,
    })
}

/// Requires a valid bearer token for an active account.
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    Arc<TokenService>: FromRef<S>,
    Arc<dyn UserRepository>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tokens = Arc::<TokenService>::from_ref(state);
        let users = Arc::<dyn UserRepository>::from_ref(state);
        let token = bearer_token(&parts.headers)?
            .ok_or_else(|| AppError::Auth("Missing bearer token".into()))?;
        resolve_caller(&tokens, users.as_ref(), token).await
    }
}

/// Anonymous callers pass through as `None`; a token that is present but
/// invalid is still rejected.
impl<S> OptionalFromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    Arc<TokenService>: FromRef<S>,
    Arc<dyn UserRepository>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers)? else {
            return Ok(None);
        };
        let tokens = Arc::<TokenService>::from_ref(state);
        let users = Arc::<dyn UserRepository>::from_ref(state);
        resolve_caller(&tokens, users.as_ref(), token).await.map(Some)
    }
}
