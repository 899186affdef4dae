use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{Story, StoryPatch, User, UserChanges, UserStatus};
use crate::error::AppError;

/// Repository trait for story operations.
///
/// Implemented by the spreadsheet row store and by Postgres; a deployment
/// wires exactly one of them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoryRepository: Send + Sync {
    /// Every story, newest first.
    async fn get_all_stories(&self) -> Result<Vec<Story>, AppError>;

    /// Stories created by the given CMS user, newest first.
    async fn get_stories_by_user(&self, user_id: &str) -> Result<Vec<Story>, AppError>;

    async fn get_story_by_id(&self, id: &str) -> Result<Option<Story>, AppError>;

    /// Persist a new story. The identifier is already set.
    async fn add_story(&self, story: Story) -> Result<Story, AppError>;

    /// Merge `patch` into the stored story. Absent fields are preserved.
    async fn update_story(&self, id: &str, patch: StoryPatch) -> Result<Story, AppError>;

    async fn delete_story(&self, id: &str) -> Result<(), AppError>;

    /// Flip `draft` and `published`.
    async fn toggle_status(&self, id: &str) -> Result<Story, AppError>;

    async fn toggle_featured(&self, id: &str) -> Result<Story, AppError>;

    /// Add one to the view counter and return the new count.
    async fn increment_view_count(&self, id: &str) -> Result<i64, AppError>;
}

/// Repository trait for CMS accounts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>, AppError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    /// Persist a new account. Fails with `Conflict` on a duplicate email or username.
    async fn create_user(&self, user: User) -> Result<User, AppError>;

    async fn update_user(&self, id: &str, changes: UserChanges) -> Result<User, AppError>;

    async fn delete_user(&self, id: &str) -> Result<(), AppError>;

    async fn set_status(&self, id: &str, status: UserStatus) -> Result<User, AppError>;

    async fn record_login(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError>;
}

pub(crate) fn story_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Story '{}' not found", id))
}

pub(crate) fn user_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("User '{}' not found", id))
}
