use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::errors::ApiJson;
use crate::auth::models::AuthenticatedUser;
use crate::auth::password::{verify_against_dummy, verify_password};
use crate::auth::token::TokenService;
use crate::db::models::{User, UserStatus};
use crate::db::repository::UserRepository;
use crate::error::AppError;

/// Login request body.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Login response body.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

const INVALID_CREDENTIALS: &str = "Invalid username or password";

/// Core login flow, separated from the HTTP layer for testability.
///
/// Each step ends the attempt on failure: fields present, user exists,
/// account active, password matches. Only then is `last_login` written and
/// a token minted. Unknown users and wrong passwords get the same message.
pub async fn authenticate(
    users: &dyn UserRepository,
    tokens: &TokenService,
    request: LoginRequest,
) -> Result<LoginResponse, AppError> {
    let username = request.username.trim();
    if username.is_empty() || request.password.is_empty() {
        return Err(AppError::BadRequest(
            "Username and password are required".into(),
        ));
    }

    let Some(mut user) = users.find_by_username(username).await? else {
        verify_against_dummy(&request.password);
        tracing::info!(%username, "login rejected: unknown user");
        return Err(AppError::Auth(INVALID_CREDENTIALS.into()));
    };

    if user.status != UserStatus::Active {
        tracing::info!(%username, user_id = %user.id, "login rejected: account inactive");
        return Err(AppError::Auth("Account is inactive".into()));
    }

    if !verify_password(&request.password, &user.password_hash) {
        tracing::info!(%username, user_id = %user.id, "login rejected: wrong password");
        return Err(AppError::Auth(INVALID_CREDENTIALS.into()));
    }

    let now = Utc::now();
    users.record_login(&user.id, now).await?;
    user.last_login = Some(now);

    let issued = tokens.issue(&user)?;
    tracing::info!(%username, user_id = %user.id, "login succeeded");

    Ok(LoginResponse {
        user,
        token: issued.token,
        expires_at: issued.expires_at,
    })
}

/// `POST /api/users/login`
pub async fn login_handler(
    axum::extract::State(state): axum::extract::State<crate::app::AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<axum::Json<LoginResponse>, AppError> {
    let response = authenticate(state.user_repo.as_ref(), &state.tokens, request).await?;
    Ok(axum::Json(response))
}

/// `GET /api/users/me`: the account behind the presented token.
pub async fn me_handler(
    axum::extract::State(state): axum::extract::State<crate::app::AppState>,
    caller: AuthenticatedUser,
) -> Result<axum::Json<User>, AppError> {
    let user = state
        .user_repo
        .get_user(&caller.user_id)
        .await?
        .ok_or_else(|| AppError::Auth("Account no longer exists".into()))?;
    Ok(axum::Json(user))
}
