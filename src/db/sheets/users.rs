use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::api::SheetsApi;
use super::row_store::{cell_to_string, Record, RowStore};
use super::stories::parse_timestamp;
use crate::auth::models::Role;
use crate::db::models::{User, UserChanges, UserStatus};
use crate::db::repository::{user_not_found, UserRepository};
use crate::error::AppError;

/// Column layout of the users tab.
pub const USER_COLUMNS: &[&str] = &[
    "id",
    "username",
    "full_name",
    "email",
    "password_hash",
    "role",
    "status",
    "phone",
    "created_at",
    "updated_at",
    "last_login",
];

/// CMS accounts kept in a spreadsheet tab.
///
/// Username and email uniqueness is checked by scanning the tab under the
/// row store's write lock.
pub struct SheetsUserRepository {
    store: RowStore,
}

impl SheetsUserRepository {
    pub fn new(api: Arc<dyn SheetsApi>, sheet: impl Into<String>) -> Self {
        Self {
            store: RowStore::new(api, sheet, USER_COLUMNS),
        }
    }

    pub async fn ensure_header(&self) -> Result<(), AppError> {
        self.store.ensure_header().await
    }

    /// Every readable account. Rows that fail to parse are logged and skipped.
    async fn load_all(&self) -> Result<Vec<User>, AppError> {
        let users = self
            .store
            .get_all()
            .await?
            .iter()
            .filter(|r| !cell_to_string(r.get("id").unwrap_or(&Value::Null)).is_empty())
            .filter_map(|r| match record_to_user(r) {
                Ok(user) => Some(user),
                Err(e) => {
                    let cell = |key: &str| r.get(key).map(cell_to_string).unwrap_or_default();
                    tracing::warn!(
                        id = %cell("id"),
                        role = %cell("role"),
                        error = %e,
                        "skipping unreadable user row"
                    );
                    None
                }
            })
            .collect();
        Ok(users)
    }

    async fn patch(&self, id: &str, partial: Record) -> Result<User, AppError> {
        let record = self
            .store
            .update(id, &partial)
            .await
            .map_err(|e| not_found_as_user(id, e))?;
        record_to_user(&record)
    }
}

fn not_found_as_user(id: &str, err: AppError) -> AppError {
    match err {
        AppError::NotFound(_) => user_not_found(id),
        other => other,
    }
}

/// Reject `candidate` if another account already uses its username or email.
fn check_unique(candidate: &User, existing: &[Record]) -> Result<(), AppError> {
    for record in existing {
        let text = |key: &str| record.get(key).map(cell_to_string).unwrap_or_default();
        if text("id") == candidate.id {
            continue;
        }
        if text("email").eq_ignore_ascii_case(&candidate.email) {
            return Err(AppError::Conflict(
                "A record with the same email already exists".into(),
            ));
        }
        if text("username").eq_ignore_ascii_case(&candidate.username) {
            return Err(AppError::Conflict(
                "A record with the same username already exists".into(),
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl UserRepository for SheetsUserRepository {
    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        self.load_all().await
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        Ok(self.load_all().await?.into_iter().find(|u| u.id == id))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .find(|u| u.username.eq_ignore_ascii_case(username)))
    }

    async fn create_user(&self, user: User) -> Result<User, AppError> {
        self.store
            .insert_with(&user_to_record(&user), |existing| {
                check_unique(&user, existing)
            })
            .await?;
        tracing::info!(id = %user.id, username = %user.username, "user appended");
        Ok(user)
    }

    async fn update_user(&self, id: &str, changes: UserChanges) -> Result<User, AppError> {
        let record = self
            .store
            .update_with(id, |existing, all| {
                let mut user = record_to_user(&existing)?;
                user.apply_changes(changes, Utc::now());
                check_unique(&user, all)?;
                Ok(user_to_record(&user))
            })
            .await
            .map_err(|e| not_found_as_user(id, e))?;
        record_to_user(&record)
    }

    async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        self.store
            .delete(id)
            .await
            .map_err(|e| not_found_as_user(id, e))
    }

    async fn set_status(&self, id: &str, status: UserStatus) -> Result<User, AppError> {
        let mut partial = Record::new();
        partial.insert("status".into(), Value::from(status.as_str()));
        partial.insert("updated_at".into(), Value::from(Utc::now().to_rfc3339()));
        self.patch(id, partial).await
    }

    async fn record_login(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut partial = Record::new();
        partial.insert("last_login".into(), Value::from(at.to_rfc3339()));
        self.patch(id, partial).await.map(|_| ())
    }
}

pub fn user_to_record(user: &User) -> Record {
    let mut r = Record::new();
    r.insert("id".into(), Value::from(user.id.clone()));
    r.insert("username".into(), Value::from(user.username.clone()));
    r.insert("full_name".into(), Value::from(user.full_name.clone()));
    r.insert("email".into(), Value::from(user.email.clone()));
    r.insert("password_hash".into(), Value::from(user.password_hash.clone()));
    r.insert("role".into(), Value::from(user.role.to_string()));
    r.insert("status".into(), Value::from(user.status.as_str()));
    r.insert("phone".into(), Value::from(user.phone.clone()));
    r.insert("created_at".into(), Value::from(user.created_at.to_rfc3339()));
    r.insert("updated_at".into(), Value::from(user.updated_at.to_rfc3339()));
    r.insert(
        "last_login".into(),
        Value::from(user.last_login.map(|t| t.to_rfc3339()).unwrap_or_default()),
    );
    r
}

/// Read an account back from sheet cells.
///
/// An unknown role is an error. An unknown status reads as inactive.
pub fn record_to_user(r: &Record) -> Result<User, AppError> {
    let text = |key: &str| r.get(key).map(cell_to_string).unwrap_or_default();
    let id = text("id");

    let role = Role::from_str_ci(&text("role")).ok_or_else(|| {
        AppError::Internal(format!("User '{}' has unknown role '{}'", id, text("role")))
    })?;
    let status = UserStatus::from_str_ci(&text("status")).unwrap_or(UserStatus::Inactive);

    Ok(User {
        username: text("username"),
        full_name: text("full_name"),
        email: text("email"),
        password_hash: text("password_hash"),
        role,
        status,
        phone: text("phone"),
        created_at: parse_timestamp(&text("created_at")).unwrap_or_default(),
        updated_at: parse_timestamp(&text("updated_at")).unwrap_or_default(),
        last_login: parse_timestamp(&text("last_login")),
        id,
    })
}
