// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Model name fragments known to honour `responseSchema`.
const SCHEMA_CAPABLE_FRAGMENTS: &[&str] = &["gemini-1.5", "gemini-2", "gemini-exp"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(deserialize_with = "de_score")]
    pub score: u8,
    pub summary: String,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
    /// Human label such as "Header, left of the logo".
    #[serde(default)]
    pub location: String,
    /// `[ymin, xmin, ymax, xmax]` on a 0-1000 scale of the implementation image.
    #[serde(
        default,
        deserialize_with = "de_bounding_box",
        skip_serializing_if = "Option::is_none"
    )]
    pub bounding_box: Option<Vec<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ignored: Option<bool>,
}

impl Issue {
    pub fn ignored(&self) -> bool {
        self.is_ignored.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum IssueCategory {
    Text,
    Color,
    Spacing,
    Image,
    Size,
    Other,
}

impl From<String> for IssueCategory {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "typography" => IssueCategory::Text,
            "color" | "colour" => IssueCategory::Color,
            "spacing" => IssueCategory::Spacing,
            "image" => IssueCategory::Image,
            "size" => IssueCategory::Size,
            _ => IssueCategory::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl From<String> for Severity {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" => Severity::High,
            "low" | "minor" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

fn de_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(raw.round().clamp(0.0, 100.0) as u8)
}

fn de_bounding_box<'de, D>(deserializer: D) -> Result<Option<Vec<i32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        v.as_array()?
            .iter()
            .map(|c| c.as_f64().map(|n| n.round() as i32))
            .collect::<Option<Vec<_>>>()
    }))
}

/// User-driven mutation applied to a single issue of a stored analysis.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueUpdate {
    pub severity: Option<Severity>,
    pub is_ignored: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ModelSpecRepr")]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub name: String,
    pub structured_output: bool,
}

impl ModelSpec {
    /// Builds a spec from a bare model name. Unrecognized names are treated as
    /// free-text only.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let lower = name.to_ascii_lowercase();
        let structured_output = SCHEMA_CAPABLE_FRAGMENTS
            .iter()
            .any(|fragment| lower.contains(fragment));
        Self {
            name,
            structured_output,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelSpecRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default, rename = "structuredOutput")]
        structured_output: Option<bool>,
    },
}

impl From<ModelSpecRepr> for ModelSpec {
    fn from(repr: ModelSpecRepr) -> Self {
        match repr {
            ModelSpecRepr::Name(name) => ModelSpec::from_name(name),
            ModelSpecRepr::Full {
                name,
                structured_output: Some(flag),
            } => ModelSpec {
                name,
                structured_output: flag,
            },
            ModelSpecRepr::Full { name, .. } => ModelSpec::from_name(name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProfile {
    pub id: String,
    pub name: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub is_default: bool,
}

impl ModelProfile {
    /// Model list in trial order with blank names dropped and the rest trimmed.
    pub fn usable_models(&self) -> Vec<ModelSpec> {
        self.models
            .iter()
            .filter(|m| !m.name.trim().is_empty())
            .map(|m| ModelSpec {
                name: m.name.trim().to_string(),
                structured_output: m.structured_output,
            })
            .collect()
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Copy safe to hand back over the API.
    pub fn masked(&self) -> Self {
        let key: Vec<char> = self.api_key.trim().chars().collect();
        let api_key = if key.len() > 8 {
            let head: String = key[..4].iter().collect();
            let tail: String = key[key.len() - 4..].iter().collect();
            format!("{head}…{tail}")
        } else if key.is_empty() {
            String::new()
        } else {
            "****".to_string()
        };
        Self {
            api_key,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FigmaStyleInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<StyleColors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spacing: Option<StyleSpacing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<StyleDimensions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typography: Option<StyleTypography>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text_content: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<StyleElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleColors {
    #[serde(default, deserialize_with = "de_loose_string")]
    pub background: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub primary: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub secondary: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub border: Option<String>,
    #[serde(default)]
    pub others: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleSpacing {
    #[serde(default, deserialize_with = "de_loose_string")]
    pub padding: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub margin: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub gap: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleDimensions {
    #[serde(default, deserialize_with = "de_loose_string")]
    pub width: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub height: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub border_radius: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleTypography {
    #[serde(default, deserialize_with = "de_loose_string")]
    pub font_family: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub font_size: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub font_weight: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub line_height: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub letter_spacing: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleElement {
    #[serde(default, deserialize_with = "de_loose_string")]
    pub name: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "de_loose_string")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<Value>,
}

/// Models answer `16` as often as `"16px"`; keep whichever they send as text.
fn de_loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnalysis {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub figma_url: Option<String>,
    pub profile_id: String,
    pub model_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_context: Option<String>,
    pub result: AnalysisResult,
    pub design: ImageMeta,
    pub implementation: ImageMeta,
}

impl StoredAnalysis {
    /// Applies a user override to the issue at `index` in the original order.
    pub fn apply_issue_update(&mut self, index: usize, update: &IssueUpdate) -> bool {
        let Some(issue) = self.result.issues.get_mut(index) else {
            return false;
        };
        if let Some(severity) = update.severity {
            issue.severity = severity;
        }
        if let Some(ignored) = update.is_ignored {
            issue.is_ignored = Some(ignored);
        }
        true
    }
}
