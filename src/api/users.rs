use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::api::errors::ApiJson;
use crate::app::AppState;
use crate::auth::models::{AuthenticatedUser, Role};
use crate::auth::password::hash_password;
use crate::db::models::{generate_id, NewUser, User, UserChanges, UserPatch, UserStatus};
use crate::db::repository::{user_not_found, UserRepository};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: UserStatus,
}

pub async fn process_create_user(
    repo: &dyn UserRepository,
    caller: &AuthenticatedUser,
    request: NewUser,
) -> Result<User, AppError> {
    caller.require(Role::Admin)?;
    request.validate()?;

    let now = Utc::now();
    let user = User {
        id: generate_id("user"),
        username: request.username.trim().to_string(),
        full_name: request.full_name.trim().to_string(),
        email: request.email.trim().to_string(),
        password_hash: hash_password(&request.password)?,
        role: request.role,
        status: request.status,
        phone: request.phone,
        created_at: now,
        updated_at: now,
        last_login: None,
    };

    let user = repo.create_user(user).await?;
    tracing::info!(user_id = %user.id, username = %user.username, by = %caller.username, "user created");
    Ok(user)
}

pub async fn process_update_user(
    repo: &dyn UserRepository,
    caller: &AuthenticatedUser,
    id: &str,
    patch: UserPatch,
) -> Result<User, AppError> {
    caller.require(Role::Admin)?;
    patch.validate()?;

    if caller.user_id == id && matches!(patch.status, Some(UserStatus::Inactive)) {
        return Err(AppError::BadRequest(
            "You cannot deactivate your own account".into(),
        ));
    }

    let password_hash = patch
        .password
        .as_deref()
        .map(hash_password)
        .transpose()?;

    let changes = UserChanges {
        username: patch.username.map(|u| u.trim().to_string()),
        full_name: patch.full_name,
        email: patch.email.map(|e| e.trim().to_string()),
        password_hash,
        role: patch.role,
        status: patch.status,
        phone: patch.phone,
    };

    let user = repo.update_user(id, changes).await?;
    tracing::info!(user_id = %id, by = %caller.username, "user updated");
    Ok(user)
}

pub async fn process_delete_user(
    repo: &dyn UserRepository,
    caller: &AuthenticatedUser,
    id: &str,
) -> Result<(), AppError> {
    caller.require(Role::Admin)?;
    if caller.user_id == id {
        return Err(AppError::BadRequest(
            "You cannot delete your own account".into(),
        ));
    }
    repo.delete_user(id).await?;
    tracing::info!(user_id = %id, by = %caller.username, "user deleted");
    Ok(())
}

pub async fn process_set_status(
    repo: &dyn UserRepository,
    caller: &AuthenticatedUser,
    id: &str,
    status: UserStatus,
) -> Result<User, AppError> {
    caller.require(Role::Admin)?;
    if caller.user_id == id && status == UserStatus::Inactive {
        return Err(AppError::BadRequest(
            "You cannot deactivate your own account".into(),
        ));
    }
    let user = repo.set_status(id, status).await?;
    tracing::info!(user_id = %id, %status, by = %caller.username, "user status changed");
    Ok(user)
}

/// Axum handler for `GET /api/users`.
pub async fn list_users_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> Result<Json<Vec<User>>, AppError> {
    caller.require(Role::Admin)?;
    Ok(Json(state.user_repo.list_users().await?))
}

/// Axum handler for `GET /api/users/{id}`.
pub async fn get_user_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    caller.require(Role::Admin)?;
    let user = state
        .user_repo
        .get_user(&id)
        .await?
        .ok_or_else(|| user_not_found(&id))?;
    Ok(Json(user))
}

/// Axum handler for `POST /api/users`.
pub async fn create_user_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    ApiJson(request): ApiJson<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = process_create_user(state.user_repo.as_ref(), &caller, request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Axum handler for `PUT /api/users/{id}`.
pub async fn update_user_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<UserPatch>,
) -> Result<Json<User>, AppError> {
    let user = process_update_user(state.user_repo.as_ref(), &caller, &id, patch).await?;
    Ok(Json(user))
}

/// Axum handler for `DELETE /api/users/{id}`.
pub async fn delete_user_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    process_delete_user(state.user_repo.as_ref(), &caller, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Axum handler for `PATCH /api/users/{id}/status`.
pub async fn set_status_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
    ApiJson(change): ApiJson<StatusChange>,
) -> Result<Json<User>, AppError> {
    let user = process_set_status(state.user_repo.as_ref(), &caller, &id, change.status).await?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::verify_password;
    use crate::db::repository::MockUserRepository;

    fn admin() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: "user_admin".into(),
            username: "admin".into(),
            role: Role::Admin,
        }
    }

    fn editor() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: "user_editor".into(),
            username: "editor".into(),
            role: Role::Editor,
        }
    }

    fn new_user() -> NewUser {
        serde_json::from_value(serde_json::json!({
            "username": " otieno ",
            "email": "otieno@example.org",
            "password": "long-enough"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_user_hashes_password() {
        let mut repo = MockUserRepository::new();
        repo.expect_create_user()
            .withf(|u| {
                u.username == "otieno"
                    && u.role == Role::Editor
                    && u.status == UserStatus::Active
                    && verify_password("long-enough", &u.password_hash)
            })
            .times(1)
            .returning(|u| Ok(u));

        let user = process_create_user(&repo, &admin(), new_user()).await.unwrap();
        assert!(user.id.starts_with("user_"));

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_editor_cannot_manage_users() {
        let mut repo = MockUserRepository::new();
        repo.expect_create_user().never();
        repo.expect_delete_user().never();

        let result = process_create_user(&repo, &editor(), new_user()).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
        let result = process_delete_user(&repo, &editor(), "user_x").await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_update_rehashes_only_present_password() {
        let mut repo = MockUserRepository::new();
        repo.expect_update_user()
            .withf(|id, c| id == "user_x" && c.password_hash.is_none() && c.phone.as_deref() == Some("0700"))
            .times(1)
            .returning(|_, _| Err(AppError::NotFound("User 'user_x' not found".into())));

        let patch = UserPatch {
            phone: Some("0700".into()),
            ..Default::default()
        };
        let result = process_update_user(&repo, &admin(), "user_x", patch).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let mut repo = MockUserRepository::new();
        repo.expect_update_user()
            .withf(|_, c| {
                c.password_hash
                    .as_deref()
                    .is_some_and(|h| verify_password("new-password", h))
            })
            .times(1)
            .returning(|_, _| Err(AppError::NotFound("gone".into())));
        let patch = UserPatch {
            password: Some("new-password".into()),
            ..Default::default()
        };
        let _ = process_update_user(&repo, &admin(), "user_x", patch).await;
    }

    #[tokio::test]
    async fn test_admin_cannot_lock_themselves_out() {
        let mut repo = MockUserRepository::new();
        repo.expect_set_status().never();
        repo.expect_delete_user().never();

        let result = process_set_status(&repo, &admin(), "user_admin", UserStatus::Inactive).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        let result = process_delete_user(&repo, &admin(), "user_admin").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
