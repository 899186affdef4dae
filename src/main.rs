use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rand::RngCore;

use hearth::app::{build_router, AppState};
use hearth::auth::token::TokenService;
use hearth::config::{Settings, StorageBackend, MIN_TOKEN_SECRET_LEN};
use hearth::db::postgres::{self, PgStoryRepository, PgUserRepository};
use hearth::db::repository::{StoryRepository, UserRepository};
use hearth::db::sheets::api::SHEETS_SCOPE;
use hearth::db::sheets::{
    GoogleSheetsClient, MemorySheets, SheetsApi, SheetsStoryRepository, SheetsUserRepository,
};
use hearth::payments::PesapalClient;
use hearth::token_cache::{GcpTokenSource, TokenSource};

/// Content and donations backend for the website and its CMS.
#[derive(Debug, Parser)]
#[command(name = "hearth", version)]
struct Args {
    /// Configuration file (TOML). Missing files are ignored.
    #[arg(long, env = "HEARTH_CONFIG", default_value = "hearth.toml")]
    config: PathBuf,
}

type Repositories = (Arc<dyn StoryRepository>, Arc<dyn UserRepository>);

async fn sheets_repositories(
    api: Arc<dyn SheetsApi>,
    settings: &Settings,
) -> anyhow::Result<Repositories> {
    let stories = SheetsStoryRepository::new(api.clone(), settings.sheets.stories_sheet.clone());
    let users = SheetsUserRepository::new(api, settings.sheets.users_sheet.clone());
    stories.ensure_header().await?;
    users.ensure_header().await?;
    Ok((Arc::new(stories), Arc::new(users)))
}

async fn connect_storage(settings: &Settings) -> anyhow::Result<Repositories> {
    match settings.storage.backend {
        StorageBackend::Sheets => {
            let token_source: Arc<dyn TokenSource> = Arc::new(
                GcpTokenSource::from_credentials(
                    settings.sheets.credentials_path.as_deref(),
                    vec![SHEETS_SCOPE],
                )
                .await?,
            );
            let api: Arc<dyn SheetsApi> = Arc::new(GoogleSheetsClient::new(
                reqwest::Client::new(),
                settings.sheets.spreadsheet_id.clone(),
                token_source,
            ));
            let repos = sheets_repositories(api, settings).await?;
            tracing::info!(
                spreadsheet = %settings.sheets.spreadsheet_id,
                "Connected to Google Sheets"
            );
            Ok(repos)
        }
        StorageBackend::Postgres => {
            let pool =
                postgres::connect(&settings.postgres.url, settings.postgres.max_connections)
                    .await?;
            postgres::ensure_schema(&pool).await?;
            tracing::info!("Connected to Postgres");
            Ok((
                Arc::new(PgStoryRepository::new(pool.clone())),
                Arc::new(PgUserRepository::new(pool)),
            ))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            sheets_repositories(Arc::new(MemorySheets::new()), settings).await
        }
    }
}

fn token_secret(settings: &Settings) -> Vec<u8> {
    if settings.auth.token_secret.len() >= MIN_TOKEN_SECRET_LEN {
        return settings.auth.token_secret.as_bytes().to_vec();
    }
    // Only reachable in demo mode; validation rejects short secrets otherwise.
    tracing::warn!("No token secret configured; tokens will not survive a restart");
    let mut secret = vec![0u8; MIN_TOKEN_SECRET_LEN];
    rand::rng().fill_bytes(&mut secret);
    secret
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    // reqwest and gcp_auth both pull in rustls; pick the provider once.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    tracing::info!("Starting hearth server...");
    let settings = Settings::load(&args.config)?;

    let (story_repo, user_repo) = connect_storage(&settings).await?;

    if settings.demo_mode {
        tracing::info!("Demo mode is enabled");
        hearth::demo_seeder::seed_demo_data(user_repo.as_ref(), story_repo.as_ref()).await?;
    }

    let tokens = Arc::new(TokenService::new(
        &token_secret(&settings),
        settings.token_ttl(),
    ));
    let payments = Arc::new(PesapalClient::new(&settings.pesapal)?);

    let app_state = AppState {
        story_repo,
        user_repo,
        tokens,
        payments,
        environment: settings.environment.clone(),
        backend: settings.storage.backend.as_str(),
    };

    let app = build_router(app_state);

    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
