// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use design_diff::AppState;
use design_diff::config::AppConfig;
use design_diff::handlers::configure;
use design_diff::services::{
    DiffAnalyzer, GeminiClient, ImageProcessor, InMemoryProfileStore, ProfileStore, RedisService,
};
use log::{info, warn};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting design-diff service...");

    let config = AppConfig::from_env()?;
    if config.api_key.is_empty() {
        warn!("GEMINI_API_KEY is not set; analyses need a profile with an API key");
    }

    // Initialize services
    let redis_service = Arc::new(RedisService::new(&config.redis_url).await?);
    let profiles: Arc<dyn ProfileStore> = Arc::new(InMemoryProfileStore::new(config.env_profile()));
    let client = Arc::new(GeminiClient::new(config.request_timeout)?);
    let analyzer = Arc::new(DiffAnalyzer::new(
        client,
        profiles.clone(),
        ImageProcessor::new(),
    ));

    let app_state = AppState {
        redis_service,
        analyzer,
        profiles,
    };

    info!("Starting HTTP server on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(configure)
            .route("/health", web::get().to(health_check))
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "design-diff",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
