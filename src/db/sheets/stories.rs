use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::api::SheetsApi;
use super::row_store::{cell_to_string, Record, RowStore};
use crate::db::models::{normalize_bool, Story, StoryPatch, StoryStatus};
use crate::db::repository::{story_not_found, StoryRepository};
use crate::error::AppError;

/// Column layout of the stories tab.
pub const STORY_COLUMNS: &[&str] = &[
    "id",
    "title",
    "excerpt",
    "author",
    "author_id",
    "location",
    "publish_date",
    "image",
    "category",
    "read_time",
    "content",
    "tags",
    "featured",
    "status",
    "view_count",
    "created_at",
    "updated_at",
];

/// Stories kept in a spreadsheet tab.
pub struct SheetsStoryRepository {
    store: RowStore,
}

impl SheetsStoryRepository {
    pub fn new(api: Arc<dyn SheetsApi>, sheet: impl Into<String>) -> Self {
        Self {
            store: RowStore::new(api, sheet, STORY_COLUMNS),
        }
    }

    pub async fn ensure_header(&self) -> Result<(), AppError> {
        self.store.ensure_header().await
    }

    async fn load_all(&self) -> Result<Vec<Story>, AppError> {
        let mut stories: Vec<Story> = self
            .store
            .get_all()
            .await?
            .iter()
            .filter(|r| !cell_to_string(r.get("id").unwrap_or(&Value::Null)).is_empty())
            .map(record_to_story)
            .collect();
        stories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stories)
    }

    async fn modify<F>(&self, id: &str, f: F) -> Result<Story, AppError>
    where
        F: FnOnce(&mut Story) + Send,
    {
        let record = self
            .store
            .update_with(id, |existing, _| {
                let mut story = record_to_story(&existing);
                f(&mut story);
                story.updated_at = Utc::now();
                Ok(story_to_record(&story))
            })
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => story_not_found(id),
                other => other,
            })?;
        Ok(record_to_story(&record))
    }
}

#[async_trait]
impl StoryRepository for SheetsStoryRepository {
    async fn get_all_stories(&self) -> Result<Vec<Story>, AppError> {
        self.load_all().await
    }

    async fn get_stories_by_user(&self, user_id: &str) -> Result<Vec<Story>, AppError> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| s.author_id.as_deref() == Some(user_id))
            .collect())
    }

    async fn get_story_by_id(&self, id: &str) -> Result<Option<Story>, AppError> {
        Ok(self.load_all().await?.into_iter().find(|s| s.id == id))
    }

    async fn add_story(&self, story: Story) -> Result<Story, AppError> {
        self.store.append(&story_to_record(&story)).await?;
        tracing::info!(id = %story.id, sheet = %self.store.sheet(), "story appended");
        Ok(story)
    }

    async fn update_story(&self, id: &str, patch: StoryPatch) -> Result<Story, AppError> {
        let now = Utc::now();
        self.modify(id, move |story| story.apply_patch(patch, now))
            .await
    }

    async fn delete_story(&self, id: &str) -> Result<(), AppError> {
        self.store.delete(id).await.map_err(|e| match e {
            AppError::NotFound(_) => story_not_found(id),
            other => other,
        })
    }

    async fn toggle_status(&self, id: &str) -> Result<Story, AppError> {
        self.modify(id, |story| story.status = story.status.toggled())
            .await
    }

    async fn toggle_featured(&self, id: &str) -> Result<Story, AppError> {
        self.modify(id, |story| story.featured = !story.featured)
            .await
    }

    async fn increment_view_count(&self, id: &str) -> Result<i64, AppError> {
        let record = self
            .store
            .update_with(id, |mut existing, _| {
                let count = cell_to_i64(existing.get("view_count")) + 1;
                existing.insert("view_count".into(), Value::from(count));
                Ok(existing)
            })
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => story_not_found(id),
                other => other,
            })?;
        Ok(cell_to_i64(record.get("view_count")))
    }
}

/// Serialize a story into sheet cells. `featured` is always written as the
/// lowercase string `true`/`false`.
pub fn story_to_record(story: &Story) -> Record {
    let mut r = Record::new();
    r.insert("id".into(), Value::from(story.id.clone()));
    r.insert("title".into(), Value::from(story.title.clone()));
    r.insert("excerpt".into(), Value::from(story.excerpt.clone()));
    r.insert("author".into(), Value::from(story.author.clone()));
    r.insert(
        "author_id".into(),
        Value::from(story.author_id.clone().unwrap_or_default()),
    );
    r.insert("location".into(), Value::from(story.location.clone()));
    r.insert(
        "publish_date".into(),
        Value::from(
            story
                .publish_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        ),
    );
    r.insert("image".into(), Value::from(story.image.clone()));
    r.insert("category".into(), Value::from(story.category.clone()));
    r.insert("read_time".into(), Value::from(story.read_time.clone()));
    r.insert("content".into(), Value::from(story.content.clone()));
    r.insert("tags".into(), Value::from(story.tags.clone()));
    r.insert(
        "featured".into(),
        Value::from(if story.featured { "true" } else { "false" }),
    );
    r.insert("status".into(), Value::from(story.status.as_str()));
    r.insert("view_count".into(), Value::from(story.view_count));
    r.insert("created_at".into(), Value::from(story.created_at.to_rfc3339()));
    r.insert("updated_at".into(), Value::from(story.updated_at.to_rfc3339()));
    r
}

/// Read a story back from sheet cells, normalizing legacy encodings.
pub fn record_to_story(r: &Record) -> Story {
    let text = |key: &str| r.get(key).map(cell_to_string).unwrap_or_default();

    let status_raw = text("status");
    let status = StoryStatus::from_str_ci(&status_raw).unwrap_or_else(|| {
        if !status_raw.is_empty() {
            tracing::warn!(id = %text("id"), status = %status_raw, "unknown story status, treating as draft");
        }
        StoryStatus::Draft
    });

    let author_id = text("author_id");

    Story {
        id: text("id"),
        title: text("title"),
        excerpt: text("excerpt"),
        author: text("author"),
        author_id: (!author_id.is_empty()).then_some(author_id),
        location: text("location"),
        publish_date: parse_date(&text("publish_date")),
        image: text("image"),
        category: text("category"),
        read_time: text("read_time"),
        content: text("content"),
        tags: text("tags"),
        featured: r.get("featured").map(normalize_bool).unwrap_or(false),
        status,
        view_count: cell_to_i64(r.get("view_count")),
        created_at: parse_timestamp(&text("created_at")).unwrap_or_default(),
        updated_at: parse_timestamp(&text("updated_at")).unwrap_or_default(),
    }
}

pub(crate) fn cell_to_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            parse_date(s)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.date_naive())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewStory;
    use crate::db::sheets::memory::MemorySheets;
    use serde_json::json;

    fn header() -> Vec<Value> {
        STORY_COLUMNS.iter().map(|c| json!(c)).collect()
    }

    async fn repo() -> (Arc<MemorySheets>, SheetsStoryRepository) {
        let sheets = Arc::new(MemorySheets::new());
        let repo = SheetsStoryRepository::new(sheets.clone(), "Stories");
        repo.ensure_header().await.unwrap();
        (sheets, repo)
    }

    fn new_story(title: &str, featured: bool) -> Story {
        NewStory {
            title: title.into(),
            author: "Grace".into(),
            category: "Education".into(),
            featured,
            ..Default::default()
        }
        .into_story(Some("user_7".into()), Utc::now())
    }

    #[tokio::test]
    async fn test_featured_round_trips_as_bool() {
        let (sheets, repo) = repo().await;
        let story = repo.add_story(new_story("Feature", true)).await.unwrap();

        // Stored as the canonical string...
        let rows = sheets.snapshot("Stories");
        assert_eq!(rows[1][12], json!("true"));

        // ...and read back as a boolean.
        let loaded = repo.get_story_by_id(&story.id).await.unwrap().unwrap();
        assert!(loaded.featured);
        assert_eq!(serde_json::to_value(&loaded).unwrap()["featured"], json!(true));
    }

    #[tokio::test]
    async fn test_legacy_rows_normalize() {
        let mut legacy = vec![json!(""); STORY_COLUMNS.len()];
        legacy[0] = json!("story_legacy");
        legacy[1] = json!("Old story");
        legacy[6] = json!("2023-04-01");
        legacy[12] = json!("TRUE");
        legacy[13] = json!("Published");
        legacy[14] = json!("17");
        let sheets = Arc::new(MemorySheets::new().with_sheet("Stories", vec![header(), legacy]));
        let repo = SheetsStoryRepository::new(sheets, "Stories");

        let story = repo.get_story_by_id("story_legacy").await.unwrap().unwrap();
        assert!(story.featured);
        assert_eq!(story.status, StoryStatus::Published);
        assert_eq!(story.view_count, 17);
        assert_eq!(story.publish_date, NaiveDate::from_ymd_opt(2023, 4, 1));
        assert_eq!(story.author_id, None);
    }

    #[tokio::test]
    async fn test_update_story_merges() {
        let (_, repo) = repo().await;
        let story = repo.add_story(new_story("Before", false)).await.unwrap();

        let updated = repo
            .update_story(
                &story.id,
                StoryPatch {
                    title: Some("After".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "After");
        assert_eq!(updated.author, "Grace");
        assert_eq!(updated.category, "Education");
        assert_eq!(updated.created_at.timestamp(), story.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_toggles_and_views() {
        let (_, repo) = repo().await;
        let story = repo.add_story(new_story("Toggle", false)).await.unwrap();

        let toggled = repo.toggle_featured(&story.id).await.unwrap();
        assert!(toggled.featured);
        let toggled = repo.toggle_status(&story.id).await.unwrap();
        assert_eq!(toggled.status, StoryStatus::Published);

        assert_eq!(repo.increment_view_count(&story.id).await.unwrap(), 1);
        assert_eq!(repo.increment_view_count(&story.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_by_user_and_delete() {
        let (_, repo) = repo().await;
        let mine = repo.add_story(new_story("Mine", false)).await.unwrap();
        let mut theirs = new_story("Theirs", false);
        theirs.author_id = Some("user_other".into());
        repo.add_story(theirs).await.unwrap();

        let by_user = repo.get_stories_by_user("user_7").await.unwrap();
        assert_eq!(by_user.len(), 1);
        assert_eq!(by_user[0].id, mine.id);

        repo.delete_story(&mine.id).await.unwrap();
        assert!(repo.get_story_by_id(&mine.id).await.unwrap().is_none());
        assert!(matches!(
            repo.delete_story(&mine.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2024-02-03T10:00:00Z").is_some());
        assert!(parse_timestamp("2024-02-03").is_some());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
