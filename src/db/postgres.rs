use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::auth::models::Role;
use crate::db::models::{Story, StoryPatch, StoryStatus, User, UserChanges, UserStatus};
use crate::db::repository::{story_not_found, user_not_found, StoryRepository, UserRepository};
use crate::error::AppError;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS stories (
        id           TEXT PRIMARY KEY,
        title        TEXT NOT NULL,
        excerpt      TEXT NOT NULL DEFAULT '',
        author       TEXT NOT NULL DEFAULT '',
        author_id    TEXT,
        location     TEXT NOT NULL DEFAULT '',
        publish_date DATE,
        image        TEXT NOT NULL DEFAULT '',
        category     TEXT NOT NULL DEFAULT '',
        read_time    TEXT NOT NULL DEFAULT '',
        content      TEXT NOT NULL DEFAULT '',
        tags         TEXT NOT NULL DEFAULT '',
        featured     BOOLEAN NOT NULL DEFAULT FALSE,
        status       TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'published')),
        view_count   BIGINT NOT NULL DEFAULT 0,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS stories_author_id_idx ON stories (author_id)",
    r#"CREATE TABLE IF NOT EXISTS users (
        id            TEXT PRIMARY KEY,
        username      TEXT NOT NULL,
        full_name     TEXT NOT NULL DEFAULT '',
        email         TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        role          TEXT NOT NULL CHECK (role IN ('admin', 'editor')),
        status        TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive')),
        phone         TEXT NOT NULL DEFAULT '',
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_login    TIMESTAMPTZ
    )"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS users_email_key ON users (LOWER(email))",
    "CREATE UNIQUE INDEX IF NOT EXISTS users_username_key ON users (LOWER(username))",
];

const STORY_FIELDS: &str = "id, title, excerpt, author, author_id, location, publish_date, \
     image, category, read_time, content, tags, featured, status, view_count, created_at, updated_at";

const USER_FIELDS: &str = "id, username, full_name, email, password_hash, role, status, phone, \
     created_at, updated_at, last_login";

/// Open a connection pool.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, AppError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(|e| AppError::Database(format!("Failed to connect to Postgres: {e}")))
}

/// Create the `stories` and `users` tables and their indexes if missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), AppError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct StoryRow {
    id: String,
    title: String,
    excerpt: String,
    author: String,
    author_id: Option<String>,
    location: String,
    publish_date: Option<NaiveDate>,
    image: String,
    category: String,
    read_time: String,
    content: String,
    tags: String,
    featured: bool,
    status: String,
    view_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StoryRow> for Story {
    type Error = AppError;

    fn try_from(row: StoryRow) -> Result<Self, Self::Error> {
        let status = StoryStatus::from_str_ci(&row.status).ok_or_else(|| {
            AppError::Database(format!("Story '{}' has invalid status '{}'", row.id, row.status))
        })?;
        Ok(Story {
            id: row.id,
            title: row.title,
            excerpt: row.excerpt,
            author: row.author,
            author_id: row.author_id,
            location: row.location,
            publish_date: row.publish_date,
            image: row.image,
            category: row.category,
            read_time: row.read_time,
            content: row.content,
            tags: row.tags,
            featured: row.featured,
            status,
            view_count: row.view_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    full_name: String,
    email: String,
    password_hash: String,
    role: String,
    status: String,
    phone: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = Role::from_str_ci(&row.role).ok_or_else(|| {
            AppError::Database(format!("User '{}' has invalid role '{}'", row.id, row.role))
        })?;
        let status = UserStatus::from_str_ci(&row.status).ok_or_else(|| {
            AppError::Database(format!("User '{}' has invalid status '{}'", row.id, row.status))
        })?;
        Ok(User {
            id: row.id,
            username: row.username,
            full_name: row.full_name,
            email: row.email,
            password_hash: row.password_hash,
            role,
            status,
            phone: row.phone,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login: row.last_login,
        })
    }
}

fn stories_from(rows: Vec<StoryRow>) -> Result<Vec<Story>, AppError> {
    rows.into_iter().map(Story::try_from).collect()
}

/// Stories in the `stories` table.
///
/// Every method runs one statement on a pooled connection; the connection
/// goes back to the pool when the query future completes or is dropped.
pub struct PgStoryRepository {
    pool: PgPool,
}

impl PgStoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoryRepository for PgStoryRepository {
    async fn get_all_stories(&self) -> Result<Vec<Story>, AppError> {
        let rows: Vec<StoryRow> = sqlx::query_as(&format!(
            "SELECT {STORY_FIELDS} FROM stories ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        stories_from(rows)
    }

    async fn get_stories_by_user(&self, user_id: &str) -> Result<Vec<Story>, AppError> {
        let rows: Vec<StoryRow> = sqlx::query_as(&format!(
            "SELECT {STORY_FIELDS} FROM stories WHERE author_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        stories_from(rows)
    }

    async fn get_story_by_id(&self, id: &str) -> Result<Option<Story>, AppError> {
        let row: Option<StoryRow> = sqlx::query_as(&format!(
            "SELECT {STORY_FIELDS} FROM stories WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Story::try_from).transpose()
    }

    async fn add_story(&self, story: Story) -> Result<Story, AppError> {
        let row: StoryRow = sqlx::query_as(&format!(
            "INSERT INTO stories ({STORY_FIELDS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {STORY_FIELDS}"
        ))
        .bind(&story.id)
        .bind(&story.title)
        .bind(&story.excerpt)
        .bind(&story.author)
        .bind(&story.author_id)
        .bind(&story.location)
        .bind(story.publish_date)
        .bind(&story.image)
        .bind(&story.category)
        .bind(&story.read_time)
        .bind(&story.content)
        .bind(&story.tags)
        .bind(story.featured)
        .bind(story.status.as_str())
        .bind(story.view_count)
        .bind(story.created_at)
        .bind(story.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Story::try_from(row)
    }

    async fn update_story(&self, id: &str, patch: StoryPatch) -> Result<Story, AppError> {
        let clear_publish_date = matches!(patch.publish_date, Some(None));
        let row: Option<StoryRow> = sqlx::query_as(&format!(
            "UPDATE stories SET \
                title        = COALESCE($2, title), \
                excerpt      = COALESCE($3, excerpt), \
                author       = COALESCE($4, author), \
                location     = COALESCE($5, location), \
                publish_date = CASE WHEN $14 THEN NULL ELSE COALESCE($6, publish_date) END, \
                image        = COALESCE($7, image), \
                category     = COALESCE($8, category), \
                read_time    = COALESCE($9, read_time), \
                content      = COALESCE($10, content), \
                tags         = COALESCE($11, tags), \
                featured     = COALESCE($12, featured), \
                status       = COALESCE($13, status), \
                updated_at   = NOW() \
             WHERE id = $1 \
             RETURNING {STORY_FIELDS}"
        ))
        .bind(id)
        .bind(patch.title)
        .bind(patch.excerpt)
        .bind(patch.author)
        .bind(patch.location)
        .bind(patch.publish_date.flatten())
        .bind(patch.image)
        .bind(patch.category)
        .bind(patch.read_time)
        .bind(patch.content)
        .bind(patch.tags)
        .bind(patch.featured)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(clear_publish_date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Story::try_from)
            .transpose()?
            .ok_or_else(|| story_not_found(id))
    }

    async fn delete_story(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM stories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(story_not_found(id));
        }
        Ok(())
    }

    async fn toggle_status(&self, id: &str) -> Result<Story, AppError> {
        let row: Option<StoryRow> = sqlx::query_as(&format!(
            "UPDATE stories SET \
                status = CASE WHEN status = 'published' THEN 'draft' ELSE 'published' END, \
                updated_at = NOW() \
             WHERE id = $1 RETURNING {STORY_FIELDS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Story::try_from)
            .transpose()?
            .ok_or_else(|| story_not_found(id))
    }

    async fn toggle_featured(&self, id: &str) -> Result<Story, AppError> {
        let row: Option<StoryRow> = sqlx::query_as(&format!(
            "UPDATE stories SET featured = NOT featured, updated_at = NOW() \
             WHERE id = $1 RETURNING {STORY_FIELDS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Story::try_from)
            .transpose()?
            .ok_or_else(|| story_not_found(id))
    }

    async fn increment_view_count(&self, id: &str) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE stories SET view_count = view_count + 1 WHERE id = $1 RETURNING view_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| story_not_found(id))
    }
}

/// CMS accounts in the `users` table. Email and username are unique
/// (case-insensitive) by index.
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_FIELDS} FROM users ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_FIELDS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_FIELDS} FROM users WHERE LOWER(username) = LOWER($1)"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn create_user(&self, user: User) -> Result<User, AppError> {
        let row: UserRow = sqlx::query_as(&format!(
            "INSERT INTO users ({USER_FIELDS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {USER_FIELDS}"
        ))
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(user.status.as_str())
        .bind(&user.phone)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.last_login)
        .fetch_one(&self.pool)
        .await?;
        User::try_from(row)
    }

    async fn update_user(&self, id: &str, changes: UserChanges) -> Result<User, AppError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET \
                username      = COALESCE($2, username), \
                full_name     = COALESCE($3, full_name), \
                email         = COALESCE($4, email), \
                password_hash = COALESCE($5, password_hash), \
                role          = COALESCE($6, role), \
                status        = COALESCE($7, status), \
                phone         = COALESCE($8, phone), \
                updated_at    = NOW() \
             WHERE id = $1 RETURNING {USER_FIELDS}"
        ))
        .bind(id)
        .bind(changes.username)
        .bind(changes.full_name)
        .bind(changes.email)
        .bind(changes.password_hash)
        .bind(changes.role.map(|r| r.to_string()))
        .bind(changes.status.map(|s| s.as_str()))
        .bind(changes.phone)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from)
            .transpose()?
            .ok_or_else(|| user_not_found(id))
    }

    async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(user_not_found(id));
        }
        Ok(())
    }

    async fn set_status(&self, id: &str, status: UserStatus) -> Result<User, AppError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_FIELDS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from)
            .transpose()?
            .ok_or_else(|| user_not_found(id))
    }

    async fn record_login(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(user_not_found(id));
        }
        Ok(())
    }
}
