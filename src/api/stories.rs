use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::api::errors::ApiJson;
use crate::app::AppState;
use crate::auth::models::{AuthenticatedUser, Role};
use crate::db::models::{generate_id, NewStory, Story, StoryFilter, StoryPatch, StoryStatus};
use crate::db::repository::{story_not_found, StoryRepository};
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct ViewCount {
    pub id: String,
    pub view_count: i64,
}

/// List stories matching `filter`. Anonymous callers only ever see
/// published stories, whatever status they ask for.
pub async fn process_list_stories(
    repo: &dyn StoryRepository,
    caller: Option<&AuthenticatedUser>,
    mut filter: StoryFilter,
) -> Result<Vec<Story>, AppError> {
    if caller.is_none() {
        filter.status = Some(StoryStatus::Published);
    }

    let stories = match filter.user.as_deref() {
        Some(user_id) => repo.get_stories_by_user(user_id).await?,
        None => repo.get_all_stories().await?,
    };

    Ok(stories.into_iter().filter(|s| filter.matches(s)).collect())
}

/// Drafts are reported as missing to anonymous callers.
pub async fn process_get_story(
    repo: &dyn StoryRepository,
    caller: Option<&AuthenticatedUser>,
    id: &str,
) -> Result<Story, AppError> {
    match repo.get_story_by_id(id).await? {
        Some(story) if caller.is_some() || story.status == StoryStatus::Published => Ok(story),
        _ => Err(story_not_found(id)),
    }
}

pub async fn process_create_story(
    repo: &dyn StoryRepository,
    caller: &AuthenticatedUser,
    request: NewStory,
) -> Result<Story, AppError> {
    caller.require(Role::Editor)?;
    request.validate()?;

    let story = request.into_story(Some(caller.user_id.clone()), Utc::now());
    let story = repo.add_story(story).await?;
    tracing::info!(story_id = %story.id, user = %caller.username, "story created");
    Ok(story)
}

pub async fn process_update_story(
    repo: &dyn StoryRepository,
    caller: &AuthenticatedUser,
    id: &str,
    patch: StoryPatch,
) -> Result<Story, AppError> {
    caller.require(Role::Editor)?;
    patch.validate()?;

    let story = repo.update_story(id, patch).await?;
    tracing::info!(story_id = %id, user = %caller.username, "story updated");
    Ok(story)
}

pub async fn process_delete_story(
    repo: &dyn StoryRepository,
    caller: &AuthenticatedUser,
    id: &str,
) -> Result<(), AppError> {
    caller.require(Role::Editor)?;
    repo.delete_story(id).await?;
    tracing::info!(story_id = %id, user = %caller.username, "story deleted");
    Ok(())
}

/// Axum handler for `GET /api/stories`.
pub async fn list_stories_handler(
    State(state): State<AppState>,
    caller: Option<AuthenticatedUser>,
    Query(filter): Query<StoryFilter>,
) -> Result<Json<Vec<Story>>, AppError> {
    let stories = process_list_stories(state.story_repo.as_ref(), caller.as_ref(), filter).await?;
    Ok(Json(stories))
}

/// Axum handler for `GET /api/stories/{id}`.
pub async fn get_story_handler(
    State(state): State<AppState>,
    caller: Option<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<Story>, AppError> {
    let story = process_get_story(state.story_repo.as_ref(), caller.as_ref(), &id).await?;
    Ok(Json(story))
}

/// Axum handler for `POST /api/stories`.
pub async fn create_story_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    ApiJson(request): ApiJson<NewStory>,
) -> Result<(StatusCode, Json<Story>), AppError> {
    let story = process_create_story(state.story_repo.as_ref(), &caller, request).await?;
    Ok((StatusCode::CREATED, Json(story)))
}

/// Axum handler for `PUT /api/stories/{id}`.
pub async fn update_story_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<StoryPatch>,
) -> Result<Json<Story>, AppError> {
    let story = process_update_story(state.story_repo.as_ref(), &caller, &id, patch).await?;
    Ok(Json(story))
}

/// Axum handler for `DELETE /api/stories/{id}`.
pub async fn delete_story_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    process_delete_story(state.story_repo.as_ref(), &caller, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Axum handler for `PATCH /api/stories/{id}/status`.
pub async fn toggle_status_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<Story>, AppError> {
    caller.require(Role::Editor)?;
    let story = state.story_repo.toggle_status(&id).await?;
    tracing::info!(story_id = %id, status = %story.status, "story status toggled");
    Ok(Json(story))
}

/// Axum handler for `PATCH /api/stories/{id}/featured`.
pub async fn toggle_featured_handler(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<Story>, AppError> {
    caller.require(Role::Editor)?;
    let story = state.story_repo.toggle_featured(&id).await?;
    Ok(Json(story))
}

/// Axum handler for `POST /api/stories/{id}/views`.
pub async fn record_view_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ViewCount>, AppError> {
    let view_count = state.story_repo.increment_view_count(&id).await?;
    Ok(Json(ViewCount { id, view_count }))
}
