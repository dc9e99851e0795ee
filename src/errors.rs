// src/errors.rs
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiffError {
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("{message}")]
    AllTiersFailed { message: String },

    #[error("The model returned an empty response")]
    EmptyResponse,

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ResponseError for DiffError {
    fn error_response(&self) -> HttpResponse {
        match self {
            DiffError::ConfigurationMissing(_) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "Configuration missing",
                    "message": self.to_string()
                }))
            }
            DiffError::AllTiersFailed { .. } | DiffError::EmptyResponse => {
                HttpResponse::BadGateway().json(serde_json::json!({
                    "error": "AI service error",
                    "message": self.to_string()
                }))
            }
            DiffError::ImageProcessing(_) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Image processing error",
                "message": self.to_string()
            })),
            DiffError::Redis(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "message": self.to_string()
            })),
            DiffError::Serialization(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Data processing error",
                    "message": self.to_string()
                }))
            }
            DiffError::Validation(_) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Validation error",
                "message": self.to_string()
            })),
            DiffError::NotFound(_) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "Not found",
                "message": self.to_string()
            })),
        }
    }
}
