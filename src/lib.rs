// src/lib.rs
//! AI-assisted visual diff between a design reference and an implementation
//! screenshot.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod overlay;
pub mod services;

use services::{DiffAnalyzer, ProfileStore, RedisService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub redis_service: Arc<RedisService>,
    pub analyzer: Arc<DiffAnalyzer>,
    pub profiles: Arc<dyn ProfileStore>,
}
