pub mod api {
    pub mod errors;
    pub mod health;
    pub mod payments;
    pub mod stories;
    pub mod users;
}
pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod demo_seeder;
pub mod error;
pub mod payments;
pub mod token_cache;
