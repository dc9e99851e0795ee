// src/handlers.rs
use crate::overlay::{NormalizedBox, crop_transform, project_markers, render_annotated};
use crate::services::diff_analyzer::AnalysisRequest;
use crate::services::profile_store::{NewProfile, ProfileUpdate};
use crate::services::redis_service::ImageSide;
use crate::services::style_extractor::format_style_info;
use crate::{AppState, errors::DiffError, models::*};
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use bytes::Bytes;
use futures_util::TryStreamExt;
use image::ImageOutputFormat;
use log::{info, warn};
use serde::Deserialize;
use std::io::Cursor;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

#[derive(Default)]
struct AnalyzeForm {
    design: Option<Bytes>,
    implementation: Option<Bytes>,
    figma_url: Option<String>,
    profile_id: Option<String>,
    style_info: Option<FigmaStyleInfo>,
}

async fn read_field(field: &mut actix_multipart::Field, limit: usize) -> Result<Vec<u8>, Error> {
    let mut data = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        if data.len() + chunk.len() > limit {
            return Err(DiffError::Validation(format!(
                "field '{}' exceeds {} bytes",
                field.name(),
                limit
            ))
            .into());
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

fn text_field(name: &str, data: Vec<u8>) -> Result<Option<String>, DiffError> {
    let text = String::from_utf8(data)
        .map_err(|_| DiffError::Validation(format!("field '{}' is not valid UTF-8", name)))?;
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/analyze", web::post().to(analyze))
            .route("/analysis/{analysis_id}", web::get().to(get_analysis))
            .route(
                "/analysis/{analysis_id}/issues/{index}",
                web::patch().to(update_issue),
            )
            .route(
                "/analysis/{analysis_id}/issues/{index}/comparison",
                web::get().to(issue_comparison),
            )
            .route("/analysis/{analysis_id}/overlay", web::get().to(overlay))
            .route(
                "/analysis/{analysis_id}/annotated",
                web::get().to(annotated_image),
            )
            .route("/style", web::post().to(extract_style))
            .route("/history", web::get().to(url_history))
            .route("/profiles", web::get().to(list_profiles))
            .route("/profiles", web::post().to(create_profile))
            .route("/profiles/{id}", web::put().to(update_profile))
            .route("/profiles/{id}", web::delete().to(delete_profile))
            .route(
                "/profiles/{id}/default",
                web::post().to(set_default_profile),
            ),
    );
}

pub async fn analyze(
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let mut form = AnalyzeForm::default();

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().to_string();
        match name.as_str() {
            "design" => {
                form.design = Some(Bytes::from(read_field(&mut field, MAX_UPLOAD_BYTES).await?));
            }
            "implementation" => {
                form.implementation =
                    Some(Bytes::from(read_field(&mut field, MAX_UPLOAD_BYTES).await?));
            }
            "figma_url" => {
                let raw = read_field(&mut field, MAX_TEXT_FIELD_BYTES).await?;
                form.figma_url = text_field(&name, raw)?;
            }
            "profile_id" => {
                let raw = read_field(&mut field, MAX_TEXT_FIELD_BYTES).await?;
                form.profile_id = text_field(&name, raw)?;
            }
            "style_info" => {
                let raw = read_field(&mut field, MAX_TEXT_FIELD_BYTES).await?;
                form.style_info = Some(serde_json::from_slice(&raw).map_err(|e| {
                    DiffError::Validation(format!("style_info is not valid JSON: {}", e))
                })?);
            }
            other => {
                warn!("Ignoring unexpected multipart field '{}'", other);
                read_field(&mut field, MAX_UPLOAD_BYTES).await?;
            }
        }
    }

    let design = form
        .design
        .filter(|d| !d.is_empty())
        .ok_or_else(|| DiffError::Validation("design image is required".to_string()))?;
    let implementation = form
        .implementation
        .filter(|d| !d.is_empty())
        .ok_or_else(|| DiffError::Validation("implementation image is required".to_string()))?;

    let outcome = data
        .analyzer
        .analyze(AnalysisRequest {
            design,
            implementation,
            figma_url: form.figma_url.clone(),
            profile_id: form.profile_id,
            style_info: form.style_info,
        })
        .await?;

    let stored = StoredAnalysis {
        id: Uuid::new_v4(),
        created_at: chrono::Utc::now(),
        figma_url: form.figma_url,
        profile_id: outcome.profile_id,
        model_used: outcome.model_used,
        style_context: outcome.style_context,
        result: outcome.result,
        design: ImageMeta {
            width: outcome.design.width,
            height: outcome.design.height,
        },
        implementation: ImageMeta {
            width: outcome.implementation.width,
            height: outcome.implementation.height,
        },
    };

    data.redis_service
        .store_analysis(&stored, &outcome.design, &outcome.implementation)
        .await?;

    if let Some(url) = &stored.figma_url {
        if let Err(e) = data.redis_service.push_url_history(url).await {
            warn!("Failed to record URL history: {}", e);
        }
    }

    info!(
        "Stored analysis {} (score {}, {} issues)",
        stored.id,
        stored.result.score,
        stored.result.issues.len()
    );
    Ok(HttpResponse::Ok().json(&stored))
}

pub async fn get_analysis(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let analysis = data.redis_service.get_analysis(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(&analysis))
}

pub async fn update_issue(
    path: web::Path<(Uuid, usize)>,
    data: web::Data<AppState>,
    body: web::Json<IssueUpdate>,
) -> Result<HttpResponse, Error> {
    let (analysis_id, index) = path.into_inner();
    let analysis = data
        .redis_service
        .update_issue(&analysis_id, index, &body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(&analysis))
}

/// Selected and hovered issue indices, owned by the client.
#[derive(Debug, Default, Deserialize)]
pub struct MarkerQuery {
    pub active: Option<usize>,
    pub hovered: Option<usize>,
}

fn overlay_body(analysis: &StoredAnalysis, query: &MarkerQuery) -> serde_json::Value {
    let markers = project_markers(&analysis.result.issues, query.active, query.hovered);
    serde_json::json!({
        "analysisId": analysis.id,
        "image": analysis.implementation,
        "markers": markers
    })
}

pub async fn overlay(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    query: web::Query<MarkerQuery>,
) -> Result<HttpResponse, Error> {
    let analysis = data.redis_service.get_analysis(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(overlay_body(&analysis, &query)))
}

pub async fn annotated_image(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    query: web::Query<MarkerQuery>,
) -> Result<HttpResponse, Error> {
    let analysis_id = path.into_inner();
    let analysis = data.redis_service.get_analysis(&analysis_id).await?;
    let raw = data
        .redis_service
        .get_image(&analysis_id, ImageSide::Implementation)
        .await?;
    let active = query.active;

    let png = web::block(move || -> Result<Vec<u8>, DiffError> {
        let img = image::load_from_memory(&raw)
            .map_err(|e| DiffError::ImageProcessing(format!("Failed to load image: {}", e)))?;
        let canvas = render_annotated(&img, &analysis.result.issues, active);
        let mut output = Vec::new();
        image::DynamicImage::ImageRgba8(canvas)
            .write_to(&mut Cursor::new(&mut output), ImageOutputFormat::Png)
            .map_err(|e| DiffError::ImageProcessing(format!("Failed to encode image: {}", e)))?;
        Ok(output)
    })
    .await??;

    Ok(HttpResponse::Ok().content_type("image/png").body(png))
}

fn comparison_body(
    analysis: &StoredAnalysis,
    index: usize,
) -> Result<serde_json::Value, DiffError> {
    let issue = analysis.result.issues.get(index).ok_or_else(|| {
        DiffError::NotFound(format!("issue {} of analysis {}", index, analysis.id))
    })?;
    let bbox = NormalizedBox::of_issue(issue).ok_or_else(|| {
        DiffError::Validation(format!("issue {} has no usable bounding box", index))
    })?;

    Ok(serde_json::json!({
        "index": index,
        "boundingBox": bbox,
        "overlay": bbox.overlay_rect(),
        "design": crop_transform(&bbox, analysis.design.width, analysis.design.height),
        "implementation": crop_transform(
            &bbox,
            analysis.implementation.width,
            analysis.implementation.height
        )
    }))
}

pub async fn issue_comparison(
    path: web::Path<(Uuid, usize)>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (analysis_id, index) = path.into_inner();
    let analysis = data.redis_service.get_analysis(&analysis_id).await?;
    Ok(HttpResponse::Ok().json(comparison_body(&analysis, index)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleRequest {
    pub url: String,
    #[serde(default)]
    pub profile_id: Option<String>,
}

pub async fn extract_style(
    data: web::Data<AppState>,
    body: web::Json<StyleRequest>,
) -> Result<HttpResponse, Error> {
    let style = data
        .analyzer
        .extractor()
        .extract(&body.url, body.profile_id.as_deref())
        .await;
    let formatted = style.as_ref().map(format_style_info).unwrap_or_default();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "style": style,
        "formatted": formatted
    })))
}

pub async fn url_history(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let urls = data.redis_service.url_history().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "urls": urls })))
}

pub async fn list_profiles(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let snapshot = data.profiles.snapshot().await;
    let profiles: Vec<ModelProfile> = snapshot
        .profiles()
        .iter()
        .map(ModelProfile::masked)
        .collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({ "profiles": profiles })))
}

pub async fn create_profile(
    data: web::Data<AppState>,
    body: web::Json<NewProfile>,
) -> Result<HttpResponse, Error> {
    let profile = data.profiles.create(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(profile.masked()))
}

pub async fn update_profile(
    path: web::Path<String>,
    data: web::Data<AppState>,
    body: web::Json<ProfileUpdate>,
) -> Result<HttpResponse, Error> {
    let profile = data.profiles.update(&path.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(profile.masked()))
}

pub async fn delete_profile(
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    data.profiles.delete(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn set_default_profile(
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    data.profiles.set_default(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
