pub mod app;
pub mod config;
pub mod error;
pub mod identity;
pub mod limiter;
pub mod models;
pub mod photos;
pub mod ratings;
pub mod reports;
pub mod store;
pub mod utils;
pub mod vehicles;
