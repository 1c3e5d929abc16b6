pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod mailer;
pub mod models;
pub mod server;
pub mod sweep;
