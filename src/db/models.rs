use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::auth::models::Role;
use crate::error::AppError;

/// Publication state of a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoryStatus {
    #[default]
    Draft,
    Published,
}

impl StoryStatus {
    /// Parse a status from a string (case-insensitive).
    pub fn from_str_ci(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Some(StoryStatus::Draft),
            "published" => Some(StoryStatus::Published),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            StoryStatus::Draft => StoryStatus::Published,
            StoryStatus::Published => StoryStatus::Draft,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Draft => "draft",
            StoryStatus::Published => "published",
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a CMS account may log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
}

impl UserStatus {
    /// Parse a status from a string (case-insensitive).
    pub fn from_str_ci(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(UserStatus::Active),
            "inactive" => Some(UserStatus::Inactive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A story published on the public site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    /// Free-text author name as shown on the site.
    pub author: String,
    /// The CMS user that created the story, if known.
    #[serde(default)]
    pub author_id: Option<String>,
    pub location: String,
    #[serde(default)]
    pub publish_date: Option<NaiveDate>,
    /// Image URL or uploaded file name.
    pub image: String,
    pub category: String,
    /// Free text, e.g. "5 min read".
    pub read_time: String,
    /// HTML body.
    pub content: String,
    /// Comma-separated tags.
    pub tags: String,
    pub featured: bool,
    pub status: StoryStatus,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request payload for creating a story.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewStory {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub publish_date: Option<NaiveDate>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub read_time: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default, deserialize_with = "deserialize_flexible_bool")]
    pub featured: bool,
    #[serde(default)]
    pub status: StoryStatus,
}

impl NewStory {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::BadRequest("Title is required".into()));
        }
        Ok(())
    }

    /// Materialize the story with a fresh identifier.
    pub fn into_story(self, author_id: Option<String>, now: DateTime<Utc>) -> Story {
        Story {
            id: generate_id("story"),
            title: self.title,
            excerpt: self.excerpt,
            author: self.author,
            author_id,
            location: self.location,
            publish_date: self.publish_date,
            image: self.image,
            category: self.category,
            read_time: self.read_time,
            content: self.content,
            tags: self.tags,
            featured: self.featured,
            status: self.status,
            view_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial story update. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// `None` keeps the stored date, `Some(None)` clears it.
    #[serde(
        default,
        deserialize_with = "deserialize_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub publish_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub read_time: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flexible_bool_opt")]
    pub featured: Option<bool>,
    #[serde(default)]
    pub status: Option<StoryStatus>,
}

impl StoryPatch {
    pub fn validate(&self) -> Result<(), AppError> {
        if matches!(&self.title, Some(t) if t.trim().is_empty()) {
            return Err(AppError::BadRequest("Title cannot be empty".into()));
        }
        Ok(())
    }
}

impl Story {
    /// Merge `patch` into this story and bump `updated_at`.
    pub fn apply_patch(&mut self, patch: StoryPatch, now: DateTime<Utc>) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *slot = v;
            }
        }

        set(&mut self.title, patch.title);
        set(&mut self.excerpt, patch.excerpt);
        set(&mut self.author, patch.author);
        set(&mut self.location, patch.location);
        set(&mut self.publish_date, patch.publish_date);
        set(&mut self.image, patch.image);
        set(&mut self.category, patch.category);
        set(&mut self.read_time, patch.read_time);
        set(&mut self.content, patch.content);
        set(&mut self.tags, patch.tags);
        set(&mut self.featured, patch.featured);
        set(&mut self.status, patch.status);
        self.updated_at = now;
    }
}

/// Query filters for story listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoryFilter {
    #[serde(default)]
    pub status: Option<StoryStatus>,
    #[serde(default, deserialize_with = "deserialize_flexible_bool_opt")]
    pub featured: Option<bool>,
    #[serde(default)]
    pub category: Option<String>,
    /// Restrict to stories created by this user id.
    #[serde(default)]
    pub user: Option<String>,
}

impl StoryFilter {
    pub fn matches(&self, story: &Story) -> bool {
        self.status.is_none_or(|s| story.status == s)
            && self.featured.is_none_or(|f| story.featured == f)
            && self
                .category
                .as_deref()
                .is_none_or(|c| story.category.eq_ignore_ascii_case(c))
            && self
                .user
                .as_deref()
                .is_none_or(|u| story.author_id.as_deref() == Some(u))
    }
}

/// A CMS account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub email: String,
    /// Argon2 PHC string. Never serialized.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

/// Request payload for creating a CMS account.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub phone: String,
}

fn default_role() -> Role {
    Role::Editor
}

pub const MIN_PASSWORD_LEN: usize = 8;

impl NewUser {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.username.trim().is_empty() {
            return Err(AppError::BadRequest("Username is required".into()));
        }
        validate_email(&self.email)?;
        validate_password(&self.password)?;
        Ok(())
    }
}

/// Partial account update as received over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Plain-text replacement password; hashed before storage.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub status: Option<UserStatus>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl UserPatch {
    pub fn validate(&self) -> Result<(), AppError> {
        if matches!(&self.username, Some(u) if u.trim().is_empty()) {
            return Err(AppError::BadRequest("Username cannot be empty".into()));
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
        }
        Ok(())
    }
}

/// Storage-level account changes; the password is already hashed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserChanges {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub phone: Option<String>,
}

impl User {
    /// Merge `changes` into this account and bump `updated_at`.
    pub fn apply_changes(&mut self, changes: UserChanges, now: DateTime<Utc>) {
        if let Some(v) = changes.username {
            self.username = v;
        }
        if let Some(v) = changes.full_name {
            self.full_name = v;
        }
        if let Some(v) = changes.email {
            self.email = v;
        }
        if let Some(v) = changes.password_hash {
            self.password_hash = v;
        }
        if let Some(v) = changes.role {
            self.role = v;
        }
        if let Some(v) = changes.status {
            self.status = v;
        }
        if let Some(v) = changes.phone {
            self.phone = v;
        }
        self.updated_at = now;
    }
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AppError::BadRequest("A valid email is required".into())),
    }
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Generate a record identifier: `<prefix>_<unix-millis>_<9 random chars>`.
pub fn generate_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}

/// Interpret a stored cell as a boolean.
///
/// Accepts native booleans, `1`, and the strings `true`/`1`/`yes` in any case.
/// Everything else, including empty cells, is `false`.
pub fn normalize_bool(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_i64() == Some(1),
        serde_json::Value::String(s) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        }
        _ => false,
    }
}

fn parse_inbound_bool(value: serde_json::Value) -> Result<Option<bool>, String> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Bool(b) => Ok(Some(b)),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(format!("expected a boolean, got \"{other}\"")),
        },
        other => Err(format!("expected a boolean, got {other}")),
    }
}

/// Accept `true`, `false`, `"true"` or `"false"`.
pub fn deserialize_flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    parse_inbound_bool(value)
        .map(|b| b.unwrap_or(false))
        .map_err(D::Error::custom)
}

pub fn deserialize_flexible_bool_opt<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    parse_inbound_bool(value).map_err(D::Error::custom)
}

/// Distinguish an explicit `null` (`Some(None)`) from an absent field (`None`).
pub fn deserialize_nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_story() -> Story {
        NewStory {
            title: "Clean water for Kibera".into(),
            excerpt: "How a borehole changed a school".into(),
            author: "Amina".into(),
            tags: "water,schools".into(),
            ..Default::default()
        }
        .into_story(Some("user_1".into()), Utc::now())
    }

    #[test]
    fn test_generate_id_format() {
        let id = generate_id("story");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "story");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_generate_id_unique() {
        assert_ne!(generate_id("user"), generate_id("user"));
    }

    #[test]
    fn test_normalize_bool() {
        assert!(normalize_bool(&json!(true)));
        assert!(normalize_bool(&json!("TRUE")));
        assert!(normalize_bool(&json!("true")));
        assert!(normalize_bool(&json!(" yes ")));
        assert!(normalize_bool(&json!(1)));
        assert!(!normalize_bool(&json!("")));
        assert!(!normalize_bool(&json!("FALSE")));
        assert!(!normalize_bool(&json!(null)));
    }

    #[test]
    fn test_new_story_accepts_string_featured() {
        let story: NewStory =
            serde_json::from_value(json!({"title": "A", "featured": "true"})).unwrap();
        assert!(story.featured);

        let story: NewStory =
            serde_json::from_value(json!({"title": "A", "featured": true})).unwrap();
        assert!(story.featured);

        let story: NewStory = serde_json::from_value(json!({"title": "A"})).unwrap();
        assert!(!story.featured);
        assert_eq!(story.status, StoryStatus::Draft);
    }

    #[test]
    fn test_new_story_rejects_garbage_featured() {
        let result: Result<NewStory, _> =
            serde_json::from_value(json!({"title": "A", "featured": "maybe"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_new_story_requires_title() {
        let story = NewStory {
            title: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(story.validate(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_story_serializes_featured_as_bool() {
        let mut story = sample_story();
        story.featured = true;
        let value = serde_json::to_value(&story).unwrap();
        assert_eq!(value["featured"], json!(true));
        assert_eq!(value["status"], json!("draft"));
    }

    #[test]
    fn test_apply_patch_keeps_absent_fields() {
        let mut story = sample_story();
        let before = story.clone();
        let later = before.updated_at + chrono::Duration::seconds(5);

        story.apply_patch(
            StoryPatch {
                title: Some("New title".into()),
                featured: Some(true),
                ..Default::default()
            },
            later,
        );

        assert_eq!(story.title, "New title");
        assert!(story.featured);
        assert_eq!(story.excerpt, before.excerpt);
        assert_eq!(story.author, before.author);
        assert_eq!(story.tags, before.tags);
        assert_eq!(story.status, before.status);
        assert_eq!(story.created_at, before.created_at);
        assert_eq!(story.updated_at, later);
    }

    #[test]
    fn test_patch_null_clears_publish_date() {
        let mut story = sample_story();
        story.publish_date = NaiveDate::from_ymd_opt(2025, 1, 1);

        let absent: StoryPatch = serde_json::from_value(json!({ "title": "Kept date" })).unwrap();
        assert_eq!(absent.publish_date, None);
        story.apply_patch(absent, Utc::now());
        assert_eq!(story.publish_date, NaiveDate::from_ymd_opt(2025, 1, 1));

        let moved: StoryPatch =
            serde_json::from_value(json!({ "publish_date": "2025-02-03" })).unwrap();
        story.apply_patch(moved, Utc::now());
        assert_eq!(story.publish_date, NaiveDate::from_ymd_opt(2025, 2, 3));

        let cleared: StoryPatch = serde_json::from_value(json!({ "publish_date": null })).unwrap();
        assert_eq!(cleared.publish_date, Some(None));
        story.apply_patch(cleared, Utc::now());
        assert_eq!(story.publish_date, None);
    }

    #[test]
    fn test_story_filter() {
        let mut story = sample_story();
        story.status = StoryStatus::Published;
        story.category = "Health".into();

        assert!(StoryFilter::default().matches(&story));
        assert!(StoryFilter {
            status: Some(StoryStatus::Published),
            category: Some("health".into()),
            user: Some("user_1".into()),
            ..Default::default()
        }
        .matches(&story));
        assert!(!StoryFilter {
            featured: Some(true),
            ..Default::default()
        }
        .matches(&story));
        assert!(!StoryFilter {
            user: Some("user_2".into()),
            ..Default::default()
        }
        .matches(&story));
    }

    #[test]
    fn test_status_toggle() {
        assert_eq!(StoryStatus::Draft.toggled(), StoryStatus::Published);
        assert_eq!(StoryStatus::Published.toggled(), StoryStatus::Draft);
        assert_eq!(StoryStatus::from_str_ci("PUBLISHED"), Some(StoryStatus::Published));
        assert_eq!(UserStatus::from_str_ci("Inactive"), Some(UserStatus::Inactive));
    }

    #[test]
    fn test_user_password_hash_never_serialized() {
        let now = Utc::now();
        let user = User {
            id: "user_1".into(),
            username: "amina".into(),
            full_name: "Amina W.".into(),
            email: "amina@example.org".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::Editor,
            status: UserStatus::Active,
            phone: String::new(),
            created_at: now,
            updated_at: now,
            last_login: None,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn test_new_user_validation() {
        let mut user: NewUser = serde_json::from_value(json!({
            "username": "amina",
            "email": "amina@example.org",
            "password": "long-enough"
        }))
        .unwrap();
        assert!(user.validate().is_ok());
        assert_eq!(user.role, Role::Editor);
        assert_eq!(user.status, UserStatus::Active);

        user.email = "not-an-email".into();
        assert!(matches!(user.validate(), Err(AppError::BadRequest(_))));

        user.email = "amina@example.org".into();
        user.password = "short".into();
        assert!(matches!(user.validate(), Err(AppError::BadRequest(_))));
    }
}
