pub mod config;
pub mod discover;
pub mod matcher;
pub mod plan;
pub mod reconcile;
pub mod render;
pub mod store;
