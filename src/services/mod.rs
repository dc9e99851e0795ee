// src/services/mod.rs
pub mod diff_analyzer;
pub mod image_processor;
pub mod json_output;
pub mod model_client;
pub mod profile_store;
pub mod redis_service;
pub mod style_extractor;

#[cfg(test)]
pub(crate) mod testing;

pub use diff_analyzer::DiffAnalyzer;
pub use image_processor::ImageProcessor;
pub use model_client::GeminiClient;
pub use profile_store::{InMemoryProfileStore, ProfileStore};
pub use redis_service::RedisService;
