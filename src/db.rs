pub mod models;
pub mod postgres;
pub mod repository;
pub mod sheets;
