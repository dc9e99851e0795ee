// src/services/diff_analyzer.rs
use crate::errors::DiffError;
use crate::models::{AnalysisResult, FigmaStyleInfo, ModelProfile, ModelSpec};
use crate::services::image_processor::{ImageProcessor, NormalizedImage};
use crate::services::json_output::parse_model_json;
use crate::services::model_client::{GenerateRequest, InlineImage, ModelClient, ProviderError};
use crate::services::profile_store::{ProfileStore, ResolvedProfile};
use crate::services::style_extractor::{StyleExtractor, format_style_info};
use bytes::Bytes;
use log::{info, warn};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

const SYSTEM_INSTRUCTION: &str = r#"You are a meticulous UI quality auditor. You receive two images:
the FIRST image is the design reference, the SECOND image is the implementation screenshot.
Compare them and report every visual discrepancy a designer would reject in review.

Scoring: 100 means pixel-perfect, 90+ only minor polish left, 70-89 noticeable but
contained differences, below 70 layout or content is visibly wrong.

Output contract:
- Respond with strict JSON only: {"score": int, "summary": string, "issues": [...]}.
- Each issue has category (Text|Color|Spacing|Image|Size|Other), severity (High|Medium|Low),
  description, suggestion, location (a short human label) and boundingBox.
- boundingBox is [ymin, xmin, ymax, xmax] as integers from 0 to 1000, measured as a
  fraction of the SECOND (implementation) image's height and width."#;

const RAW_JSON_INSTRUCTIONS: &str = r#"

IMPORTANT: your model does not support structured output, so follow this format exactly.
Output raw JSON only. Do NOT wrap it in markdown code fences and do NOT add any text
before or after it. The JSON must match:
{
  "score": 0-100 integer,
  "summary": "one paragraph overview",
  "issues": [
    {
      "category": "Text" | "Color" | "Spacing" | "Image" | "Size" | "Other",
      "severity": "High" | "Medium" | "Low",
      "description": "what differs",
      "suggestion": "how to fix it",
      "location": "where on the page",
      "boundingBox": [ymin, xmin, ymax, xmax]
    }
  ]
}"#;

/// Builds the per-call prompt, embedding the link and extracted style facts when present.
pub fn build_prompt(figma_url: Option<&str>, style_context: Option<&str>) -> String {
    let mut prompt =
        String::from("Compare the design (first image) with the implementation (second image).\n");

    if let Some(url) = figma_url.map(str::trim).filter(|u| !u.is_empty()) {
        prompt.push_str(&format!("Design source link: {}\n", url));
    }

    if let Some(context) = style_context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(
            "\nDesign specifications extracted from the design file. Treat these values as ground truth:\n",
        );
        prompt.push_str(context);
        prompt.push('\n');
    }

    prompt.push_str(
        r#"
Check explicitly, and report each mismatch as its own issue:
1. Colors: backgrounds, text, borders, buttons, icons (quote hex values when visible).
2. Spacing: padding, margins, gaps and alignment between elements.
3. Size: element widths, heights, corner radii and icon sizes.
4. Typography: font family, size, weight, line height and letter spacing.
5. Text content: missing, extra or different wording, including truncation.
6. Images: missing, cropped, distorted or wrong imagery.
Give every issue a boundingBox on the implementation image."#,
    );
    prompt
}

/// `responseSchema` constraining output to the analysis result shape.
pub fn analysis_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "score": { "type": "INTEGER", "description": "Fidelity score from 0 to 100" },
            "summary": { "type": "STRING" },
            "issues": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "category": {
                            "type": "STRING",
                            "enum": ["Text", "Color", "Spacing", "Image", "Size", "Other"]
                        },
                        "severity": { "type": "STRING", "enum": ["High", "Medium", "Low"] },
                        "description": { "type": "STRING" },
                        "suggestion": { "type": "STRING" },
                        "location": { "type": "STRING" },
                        "boundingBox": {
                            "type": "ARRAY",
                            "description": "[ymin, xmin, ymax, xmax] on a 0-1000 scale of the second image",
                            "items": { "type": "INTEGER" }
                        }
                    },
                    "required": ["category", "severity", "description", "suggestion", "location", "boundingBox"]
                }
            }
        },
        "required": ["score", "summary", "issues"]
    })
}

/// Why a single tier did not produce a result.
#[derive(Debug)]
enum TierError {
    Provider(ProviderError),
    Parse(String),
    Empty,
}

impl TierError {
    fn user_message(&self) -> String {
        match self {
            TierError::Provider(e) => e.user_message(),
            TierError::Parse(detail) => {
                ProviderError::Unknown(format!("the model returned malformed JSON ({})", detail))
                    .user_message()
            }
            TierError::Empty => "The model returned an empty response".to_string(),
        }
    }
}

impl std::fmt::Display for TierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierError::Provider(e) => write!(f, "{}", e),
            TierError::Parse(detail) => write!(f, "unparseable output: {}", detail),
            TierError::Empty => write!(f, "empty response"),
        }
    }
}

pub struct AnalysisRequest {
    pub design: Bytes,
    pub implementation: Bytes,
    pub figma_url: Option<String>,
    pub profile_id: Option<String>,
    pub style_info: Option<FigmaStyleInfo>,
}

pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub model_used: String,
    pub profile_id: String,
    /// Formatted style facts that were embedded in the prompt.
    pub style_context: Option<String>,
    pub design: NormalizedImage,
    pub implementation: NormalizedImage,
}

pub struct DiffAnalyzer {
    client: Arc<dyn ModelClient>,
    profiles: Arc<dyn ProfileStore>,
    extractor: StyleExtractor,
    image_processor: ImageProcessor,
}

impl DiffAnalyzer {
    pub fn new(
        client: Arc<dyn ModelClient>,
        profiles: Arc<dyn ProfileStore>,
        image_processor: ImageProcessor,
    ) -> Self {
        let extractor = StyleExtractor::new(client.clone(), profiles.clone());
        Self {
            client,
            profiles,
            extractor,
            image_processor,
        }
    }

    pub fn extractor(&self) -> &StyleExtractor {
        &self.extractor
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, DiffError> {
        let start = Instant::now();

        // One snapshot for the whole call; later profile edits do not apply.
        let resolved = self
            .profiles
            .snapshot()
            .await
            .resolve(request.profile_id.as_deref())?;

        let (design, implementation) = self
            .image_processor
            .normalize_pair(request.design, request.implementation)
            .await?;

        let figma_url = request
            .figma_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        let style_info = match (request.style_info, figma_url) {
            (Some(info), _) => Some(info),
            (None, Some(url)) => self.extractor.extract_with(&resolved, url).await,
            (None, None) => None,
        };
        let style_context = style_info
            .as_ref()
            .map(format_style_info)
            .filter(|text| !text.is_empty());

        let base_prompt = build_prompt(figma_url, style_context.as_deref());
        let images = vec![
            InlineImage {
                mime_type: NormalizedImage::MIME_TYPE,
                data: design.data.clone(),
            },
            InlineImage {
                mime_type: NormalizedImage::MIME_TYPE,
                data: implementation.data.clone(),
            },
        ];

        let (result, model_used) = self.run_chain(&resolved, &base_prompt, images).await?;
        info!(
            "Analysis finished with {} in {} ms: score {}, {} issues",
            model_used,
            start.elapsed().as_millis(),
            result.score,
            result.issues.len()
        );

        Ok(AnalysisOutcome {
            result,
            model_used,
            profile_id: resolved.profile.id,
            style_context,
            design,
            implementation,
        })
    }

    /// Tries each model in order until one yields a valid result.
    async fn run_chain(
        &self,
        resolved: &ResolvedProfile,
        base_prompt: &str,
        images: Vec<InlineImage>,
    ) -> Result<(AnalysisResult, String), DiffError> {
        let total = resolved.models.len();
        let mut last_error = None;

        for (tier, model) in resolved.models.iter().enumerate() {
            info!(
                "Tier {}/{}: analyzing with {} (schema: {})",
                tier + 1,
                total,
                model.name,
                model.structured_output
            );
            let request = tier_request(model, base_prompt, images.clone());
            match self.attempt(&resolved.profile, model, &request).await {
                Ok(result) => return Ok((result, model.name.clone())),
                Err(e) => {
                    warn!("Tier {}/{} ({}) failed: {}", tier + 1, total, model.name, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(TierError::Empty) => DiffError::EmptyResponse,
            Some(e) => DiffError::AllTiersFailed {
                message: e.user_message(),
            },
            None => DiffError::ConfigurationMissing("profile lists no model names".to_string()),
        })
    }

    async fn attempt(
        &self,
        profile: &ModelProfile,
        model: &ModelSpec,
        request: &GenerateRequest,
    ) -> Result<AnalysisResult, TierError> {
        let text = self
            .client
            .generate(profile, &model.name, request)
            .await
            .map_err(TierError::Provider)?;
        if text.trim().is_empty() {
            return Err(TierError::Empty);
        }
        parse_model_json::<AnalysisResult>(&text).map_err(TierError::Parse)
    }
}

fn tier_request(model: &ModelSpec, base_prompt: &str, images: Vec<InlineImage>) -> GenerateRequest {
    let (prompt, response_schema) = if model.structured_output {
        (base_prompt.to_string(), Some(analysis_schema()))
    } else {
        (format!("{}{}", base_prompt, RAW_JSON_INSTRUCTIONS), None)
    };
    GenerateRequest {
        system_instruction: Some(SYSTEM_INSTRUCTION.to_string()),
        prompt,
        images,
        response_schema,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssueCategory, Severity, StyleColors};
    use crate::overlay::NormalizedBox;
    use crate::services::image_processor::tests::png_bytes;
    use crate::services::profile_store::InMemoryProfileStore;
    use crate::services::testing::ScriptedClient;
    use image::Rgba;

    const VALID_REPORT: &str = r#"{
        "score": 85,
        "summary": "Mostly faithful",
        "issues": [{
            "category": "Color",
            "severity": "High",
            "description": "CTA is darker",
            "suggestion": "Use #1A73E8",
            "location": "Hero button",
            "boundingBox": [100, 100, 200, 200]
        }]
    }"#;

    fn profile(models: Vec<ModelSpec>, key: &str) -> ModelProfile {
        ModelProfile {
            id: String::new(),
            name: "Environment".into(),
            api_key: key.into(),
            base_url: None,
            models,
            is_default: true,
        }
    }

    fn spec(name: &str, structured_output: bool) -> ModelSpec {
        ModelSpec {
            name: name.into(),
            structured_output,
        }
    }

    fn analyzer(client: Arc<ScriptedClient>, profile: ModelProfile) -> DiffAnalyzer {
        DiffAnalyzer::new(
            client,
            Arc::new(InMemoryProfileStore::new(profile)),
            ImageProcessor::new(),
        )
    }

    fn request(url: Option<&str>) -> AnalysisRequest {
        AnalysisRequest {
            design: Bytes::from(png_bytes(2000, 2000, Rgba([255, 255, 255, 255]))),
            implementation: Bytes::from(png_bytes(2000, 2000, Rgba([240, 240, 240, 255]))),
            figma_url: url.map(str::to_string),
            profile_id: None,
            style_info: None,
        }
    }

    #[tokio::test]
    async fn first_tier_success_skips_the_rest() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(VALID_REPORT.to_string())]));
        let analyzer = analyzer(
            client.clone(),
            profile(vec![spec("A", true), spec("B", true)], "key"),
        );

        let outcome = analyzer.analyze(request(None)).await.unwrap();
        assert_eq!(outcome.result.score, 85);
        assert_eq!(outcome.model_used, "A");
        assert_eq!((outcome.design.width, outcome.design.height), (1024, 1024));
        assert_eq!(outcome.implementation.width, 1024);

        let issue = &outcome.result.issues[0];
        assert_eq!(issue.category, IssueCategory::Color);
        assert_eq!(issue.severity, Severity::High);
        let rect = NormalizedBox::from_components(issue.bounding_box.as_deref().unwrap())
            .unwrap()
            .overlay_rect();
        assert_eq!((rect.top, rect.left, rect.height, rect.width), (10.0, 10.0, 10.0, 10.0));

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].schema);
        assert_eq!(calls[0].image_count, 2);
        assert!(!calls[0].prompt.contains("Design source link"));
        assert!(calls[0].system_instruction.as_deref().unwrap().contains("0 to 1000"));
    }

    #[tokio::test]
    async fn fenced_output_from_free_text_tier_is_accepted() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(ProviderError::Network("connection reset".into())),
            Ok(format!("```json\n{}\n```", VALID_REPORT)),
        ]));
        let analyzer = analyzer(
            client.clone(),
            profile(vec![spec("A", true), spec("B", false)], "key"),
        );

        let outcome = analyzer.analyze(request(None)).await.unwrap();
        assert_eq!(outcome.model_used, "B");
        assert_eq!(outcome.result.issues.len(), 1);

        let calls = client.calls();
        assert!(calls[0].schema);
        assert!(!calls[0].prompt.contains("Output raw JSON only"));
        assert!(!calls[1].schema);
        assert!(calls[1].prompt.contains("Output raw JSON only"));
    }

    #[tokio::test]
    async fn last_of_n_tiers_wins_silently() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(ProviderError::RateLimited("429".into())),
            Ok("not json at all".into()),
            Ok(String::new()),
            Ok(VALID_REPORT.to_string()),
        ]));
        let analyzer = analyzer(
            client.clone(),
            profile(
                vec![spec("A", true), spec("B", false), spec("C", true), spec("D", false)],
                "key",
            ),
        );
        let outcome = analyzer.analyze(request(None)).await.unwrap();
        assert_eq!(outcome.model_used, "D");
        assert_eq!(client.calls().len(), 4);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_the_last_failure() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(ProviderError::RateLimited("429".into())),
            Err(ProviderError::Forbidden("403 PERMISSION_DENIED".into())),
        ]));
        let analyzer = analyzer(
            client.clone(),
            profile(vec![spec("A", true), spec("B", true)], "key"),
        );
        let err = analyzer.analyze(request(None)).await.err().unwrap();
        match err {
            DiffError::AllTiersFailed { message } => {
                assert!(message.contains("invalid or forbidden"), "{}", message)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unmapped_failure_gets_generic_message() {
        let client = Arc::new(ScriptedClient::new(vec![Ok("{\"score\": \"high\"}".into())]));
        let analyzer = analyzer(client, profile(vec![spec("A", false)], "key"));
        match analyzer.analyze(request(None)).await.err().unwrap() {
            DiffError::AllTiersFailed { message } => {
                assert!(message.starts_with("Analysis failed: "), "{}", message)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_final_tier_is_empty_response() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(ProviderError::Overloaded("503".into())),
            Ok("   ".into()),
        ]));
        let analyzer = analyzer(client, profile(vec![spec("A", true), spec("B", true)], "key"));
        assert!(matches!(
            analyzer.analyze(request(None)).await,
            Err(DiffError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn blank_model_list_fails_before_any_call() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(VALID_REPORT.to_string())]));
        let analyzer = analyzer(
            client.clone(),
            profile(vec![spec("  ", true), spec("", false)], "key"),
        );
        assert!(matches!(
            analyzer.analyze(request(None)).await,
            Err(DiffError::ConfigurationMissing(_))
        ));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_call() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(VALID_REPORT.to_string())]));
        let analyzer = analyzer(client.clone(), profile(vec![spec("A", true)], ""));
        assert!(matches!(
            analyzer.analyze(request(None)).await,
            Err(DiffError::ConfigurationMissing(_))
        ));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn url_triggers_extraction_and_failure_is_not_fatal() {
        let client = Arc::new(ScriptedClient::new(vec![
            // extraction: one model, fails
            Err(ProviderError::Network("offline".into())),
            // analysis
            Ok(VALID_REPORT.to_string()),
        ]));
        let analyzer = analyzer(client.clone(), profile(vec![spec("A", true)], "key"));
        let outcome = analyzer
            .analyze(request(Some("https://www.figma.com/file/xyz")))
            .await
            .unwrap();
        assert!(outcome.style_context.is_none());

        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].image_count, 0);
        assert!(calls[1].prompt.contains("https://www.figma.com/file/xyz"));
    }

    #[tokio::test]
    async fn extracted_style_lands_in_prompt() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(r##"{"colors": {"primary": "#1A73E8"}}"##.into()),
            Ok(VALID_REPORT.to_string()),
        ]));
        let analyzer = analyzer(client.clone(), profile(vec![spec("A", true)], "key"));
        let outcome = analyzer
            .analyze(request(Some("https://www.figma.com/file/xyz")))
            .await
            .unwrap();
        assert_eq!(
            outcome.style_context.as_deref(),
            Some("Colors:\n- Primary: #1A73E8")
        );
        assert!(client.calls()[1].prompt.contains("- Primary: #1A73E8"));
    }

    #[tokio::test]
    async fn supplied_style_skips_extraction() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(VALID_REPORT.to_string())]));
        let analyzer = analyzer(client.clone(), profile(vec![spec("A", true)], "key"));
        let mut req = request(Some("https://www.figma.com/file/xyz"));
        req.style_info = Some(FigmaStyleInfo {
            colors: Some(StyleColors {
                background: Some("#FFF".into()),
                ..StyleColors::default()
            }),
            ..FigmaStyleInfo::default()
        });
        let outcome = analyzer.analyze(req).await.unwrap();
        assert_eq!(client.calls().len(), 1);
        assert!(outcome.style_context.unwrap().contains("#FFF"));
    }

    #[test]
    fn prompt_includes_optional_parts_only_when_present() {
        let bare = build_prompt(Some("   "), None);
        assert!(!bare.contains("Design source link"));
        assert!(!bare.contains("ground truth"));
        assert!(bare.contains("Typography"));

        let full = build_prompt(Some("https://figma.com/f"), Some("Colors:\n- Text: #111"));
        assert!(full.contains("Design source link: https://figma.com/f"));
        assert!(full.contains("- Text: #111"));
    }

    #[test]
    fn schema_requires_every_issue_field() {
        let schema = analysis_schema();
        let required = schema["properties"]["issues"]["items"]["required"]
            .as_array()
            .unwrap();
        for field in ["category", "severity", "description", "suggestion", "location", "boundingBox"] {
            assert!(required.iter().any(|r| r == field), "missing {}", field);
        }
        assert_eq!(schema["required"], json!(["score", "summary", "issues"]));
    }
}
