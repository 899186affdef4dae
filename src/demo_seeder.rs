use chrono::{NaiveDate, Utc};

use crate::auth::models::Role;
use crate::auth::password::hash_password;
use crate::db::models::{generate_id, NewStory, StoryStatus, User, UserStatus};
use crate::db::repository::{StoryRepository, UserRepository};
use crate::error::AppError;

/// Password given to every seeded demo account.
pub const DEMO_PASSWORD: &str = "hearth-demo";

/// Seed demo accounts and stories. Accounts that already exist and a
/// non-empty story list are left untouched, so restarts are harmless.
pub async fn seed_demo_data(
    users: &dyn UserRepository,
    stories: &dyn StoryRepository,
) -> Result<(), AppError> {
    tracing::info!("Starting demo data seeding...");

    let mut admin_id = None;
    for (username, full_name, role) in [
        ("admin", "Demo Admin", Role::Admin),
        ("editor", "Demo Editor", Role::Editor),
    ] {
        if let Some(existing) = users.find_by_username(username).await? {
            tracing::info!("User '{}' already exists, skipping.", username);
            if role == Role::Admin {
                admin_id = Some(existing.id);
            }
            continue;
        }

        let now = Utc::now();
        let user = users
            .create_user(User {
                id: generate_id("user"),
                username: username.to_string(),
                full_name: full_name.to_string(),
                email: format!("{username}@demo.hearth.local"),
                password_hash: hash_password(DEMO_PASSWORD)?,
                role,
                status: UserStatus::Active,
                phone: String::new(),
                created_at: now,
                updated_at: now,
                last_login: None,
            })
            .await?;
        tracing::info!(username, %role, "seeded demo user");
        if role == Role::Admin {
            admin_id = Some(user.id);
        }
    }

    if !stories.get_all_stories().await?.is_empty() {
        tracing::info!("Stories already present, skipping story seeding.");
        return Ok(());
    }

    let demo_stories = [
        (
            "A borehole for Mukuru Primary",
            "Clean water changed the school day.",
            "Water",
            "Nairobi",
            include_str!("../demo_data/borehole.html"),
            "water,schools",
            true,
            StoryStatus::Published,
        ),
        (
            "Tailoring class graduates",
            "Twelve mothers, twelve sewing machines.",
            "Livelihoods",
            "Kisumu",
            include_str!("../demo_data/tailoring.html"),
            "livelihoods,women",
            false,
            StoryStatus::Published,
        ),
        (
            "Volunteer week",
            "Notes from the field.",
            "Community",
            "Nakuru",
            include_str!("../demo_data/volunteers.html"),
            "volunteers",
            false,
            StoryStatus::Draft,
        ),
    ];

    for (title, excerpt, category, location, content, tags, featured, status) in demo_stories {
        let story = NewStory {
            title: title.to_string(),
            excerpt: excerpt.to_string(),
            author: "Demo Admin".into(),
            location: location.to_string(),
            publish_date: NaiveDate::from_ymd_opt(2025, 3, 14),
            category: category.to_string(),
            read_time: "3 min read".into(),
            content: content.to_string(),
            tags: tags.to_string(),
            featured,
            status,
            ..Default::default()
        }
        .into_story(admin_id.clone(), Utc::now());

        stories.add_story(story).await?;
        tracing::info!("Seeded story '{}'.", title);
    }

    tracing::info!("Demo data seeding complete.");
    Ok(())
}
