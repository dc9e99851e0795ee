// src/services/redis_service.rs
use crate::errors::DiffError;
use crate::models::{IssueUpdate, StoredAnalysis};
use crate::services::image_processor::NormalizedImage;
use redis::{AsyncCommands, Client};
use uuid::Uuid;

const ANALYSIS_TTL_SECS: usize = 86400;
const URL_HISTORY_KEY: &str = "design_diff:url_history";
pub const URL_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSide {
    Design,
    Implementation,
}

impl ImageSide {
    fn key(self, analysis_id: &Uuid) -> String {
        match self {
            ImageSide::Design => format!("analysis:{}:design", analysis_id),
            ImageSide::Implementation => format!("analysis:{}:implementation", analysis_id),
        }
    }
}

pub struct RedisService {
    client: Client,
}

impl RedisService {
    pub async fn new(redis_url: &str) -> Result<Self, DiffError> {
        let service = Self::open(redis_url)?;

        // Test connection
        let mut conn = service.connection().await?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| DiffError::Redis(e.to_string()))?;

        Ok(service)
    }

    /// Parses the URL without connecting; the first command opens the connection.
    pub fn open(redis_url: &str) -> Result<Self, DiffError> {
        let client = Client::open(redis_url).map_err(|e| DiffError::Redis(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::Connection, DiffError> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| DiffError::Redis(e.to_string()))
    }

    pub async fn store_analysis(
        &self,
        analysis: &StoredAnalysis,
        design: &NormalizedImage,
        implementation: &NormalizedImage,
    ) -> Result<(), DiffError> {
        let mut conn = self.connection().await?;

        let value = serde_json::to_string(analysis)
            .map_err(|e| DiffError::Serialization(e.to_string()))?;

        redis::pipe()
            .atomic()
            .set_ex(analysis_key(&analysis.id), value, ANALYSIS_TTL_SECS)
            .ignore()
            .set_ex(
                ImageSide::Design.key(&analysis.id),
                design.data.as_ref(),
                ANALYSIS_TTL_SECS,
            )
            .ignore()
            .set_ex(
                ImageSide::Implementation.key(&analysis.id),
                implementation.data.as_ref(),
                ANALYSIS_TTL_SECS,
            )
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| DiffError::Redis(e.to_string()))?;

        Ok(())
    }

    pub async fn get_analysis(&self, analysis_id: &Uuid) -> Result<StoredAnalysis, DiffError> {
        let mut conn = self.connection().await?;

        let value: Option<String> = conn
            .get(analysis_key(analysis_id))
            .await
            .map_err(|e| DiffError::Redis(e.to_string()))?;
        let value = value.ok_or_else(|| DiffError::NotFound(format!("analysis {}", analysis_id)))?;

        serde_json::from_str(&value).map_err(|e| DiffError::Serialization(e.to_string()))
    }

    pub async fn get_image(
        &self,
        analysis_id: &Uuid,
        side: ImageSide,
    ) -> Result<Vec<u8>, DiffError> {
        let mut conn = self.connection().await?;

        let data: Option<Vec<u8>> = conn
            .get(side.key(analysis_id))
            .await
            .map_err(|e| DiffError::Redis(e.to_string()))?;
        data.ok_or_else(|| {
            DiffError::NotFound(format!("{:?} image of analysis {}", side, analysis_id))
        })
    }

    /// Applies a severity override or ignore flag to one issue, addressed by its
    /// index in the original issue list.
    pub async fn update_issue(
        &self,
        analysis_id: &Uuid,
        index: usize,
        update: &IssueUpdate,
    ) -> Result<StoredAnalysis, DiffError> {
        let mut analysis = self.get_analysis(analysis_id).await?;
        if !analysis.apply_issue_update(index, update) {
            return Err(DiffError::NotFound(format!(
                "issue {} of analysis {}",
                index, analysis_id
            )));
        }

        let mut conn = self.connection().await?;
        let value = serde_json::to_string(&analysis)
            .map_err(|e| DiffError::Serialization(e.to_string()))?;
        // KEEPTTL so an edit does not extend the analysis lifetime.
        redis::cmd("SET")
            .arg(analysis_key(analysis_id))
            .arg(value)
            .arg("KEEPTTL")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| DiffError::Redis(e.to_string()))?;

        Ok(analysis)
    }

    /// Moves `url` to the front of the history, keeping at most ten entries.
    pub async fn push_url_history(&self, url: &str) -> Result<(), DiffError> {
        let Some(pipe) = url_history_pipeline(url) else {
            return Ok(());
        };
        let mut conn = self.connection().await?;

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| DiffError::Redis(e.to_string()))?;

        Ok(())
    }

    pub async fn url_history(&self) -> Result<Vec<String>, DiffError> {
        let mut conn = self.connection().await?;
        conn.lrange(URL_HISTORY_KEY, 0, URL_HISTORY_LIMIT as isize - 1)
            .await
            .map_err(|e| DiffError::Redis(e.to_string()))
    }
}

fn analysis_key(analysis_id: &Uuid) -> String {
    format!("analysis:{}", analysis_id)
}

fn normalize_history_url(url: &str) -> Option<String> {
    let url = url.trim();
    (!url.is_empty()).then(|| url.to_string())
}

/// Drops any earlier copy of `url`, pushes it to the head of the list and trims
/// the list to `URL_HISTORY_LIMIT`, all in one transaction.
fn url_history_pipeline(url: &str) -> Option<redis::Pipeline> {
    let url = normalize_history_url(url)?;
    let mut pipe = redis::pipe();
    pipe.atomic()
        .lrem(URL_HISTORY_KEY, 0, &url)
        .ignore()
        .lpush(URL_HISTORY_KEY, &url)
        .ignore()
        .ltrim(URL_HISTORY_KEY, 0, URL_HISTORY_LIMIT as isize - 1)
        .ignore();
    Some(pipe)
}
