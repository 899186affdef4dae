use std::sync::Arc;

use axum::extract::FromRef;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::auth::login;
use crate::auth::token::TokenService;
use crate::db::repository::{StoryRepository, UserRepository};
use crate::payments::PesapalClient;

/// Shared handles every request handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub story_repo: Arc<dyn StoryRepository>,
    pub user_repo: Arc<dyn UserRepository>,
    pub tokens: Arc<TokenService>,
    pub payments: Arc<PesapalClient>,
    /// Deployment label echoed by the health endpoint.
    pub environment: String,
    pub backend: &'static str,
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl FromRef<AppState> for Arc<dyn UserRepository> {
    fn from_ref(state: &AppState) -> Self {
        state.user_repo.clone()
    }
}

/// Assemble every route with permissive CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(api::health::health_handler))
        // Users
        .route("/api/users/login", post(login::login_handler))
        .route("/api/users/me", get(login::me_handler))
        .route(
            "/api/users",
            get(api::users::list_users_handler).post(api::users::create_user_handler),
        )
        .route(
            "/api/users/{id}",
            get(api::users::get_user_handler)
                .put(api::users::update_user_handler)
                .delete(api::users::delete_user_handler),
        )
        .route(
            "/api/users/{id}/status",
            patch(api::users::set_status_handler),
        )
        // Stories
        .route(
            "/api/stories",
            get(api::stories::list_stories_handler).post(api::stories::create_story_handler),
        )
        .route(
            "/api/stories/{id}",
            get(api::stories::get_story_handler)
                .put(api::stories::update_story_handler)
                .delete(api::stories::delete_story_handler),
        )
        .route(
            "/api/stories/{id}/status",
            patch(api::stories::toggle_status_handler),
        )
        .route(
            "/api/stories/{id}/featured",
            patch(api::stories::toggle_featured_handler),
        )
        .route(
            "/api/stories/{id}/views",
            post(api::stories::record_view_handler),
        )
        // Payments
        .route(
            "/.netlify/functions/pesapal-api",
            post(api::payments::payment_action_handler),
        )
        .route(
            "/.netlify/functions/pesapal-ipn",
            get(api::payments::ipn_handler).post(api::payments::ipn_handler),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
