// src/services/style_extractor.rs
use crate::models::FigmaStyleInfo;
use crate::services::json_output::parse_model_json;
use crate::services::model_client::{GenerateRequest, ModelClient};
use crate::services::profile_store::{ProfileStore, ResolvedProfile};
use log::{info, warn};
use std::fmt::Write as _;
use std::sync::Arc;

fn extraction_prompt(url: &str) -> String {
    format!(
        r##"You are a design-system analyst. Look at this design link: {url}

If you can open the link, read the design directly. Otherwise infer the most
plausible values from the link, its file/node names and common UI conventions.

Return ONLY a raw JSON object (no markdown fences, no commentary) with this shape.
Omit any field you cannot determine:
{{
  "colors": {{ "background": "#hex", "text": "#hex", "primary": "#hex", "secondary": "#hex", "border": "#hex", "others": ["#hex"] }},
  "spacing": {{ "padding": "e.g. 16px 24px", "margin": "e.g. 0 auto", "gap": "e.g. 8px" }},
  "dimensions": {{ "width": "e.g. 375px", "height": "e.g. 812px", "borderRadius": "e.g. 8px" }},
  "typography": {{ "fontFamily": "name", "fontSize": "e.g. 16px", "fontWeight": "e.g. 600", "lineHeight": "e.g. 24px", "letterSpacing": "e.g. 0.2px" }},
  "textContent": ["every literal text string visible in the design"],
  "elements": [{{ "name": "layer name", "type": "FRAME|TEXT|RECTANGLE|...", "styles": {{}} }}]
}}"##
    )
}

/// Asks the model for structured style facts about a design-tool link.
#[derive(Clone)]
pub struct StyleExtractor {
    client: Arc<dyn ModelClient>,
    profiles: Arc<dyn ProfileStore>,
}

impl StyleExtractor {
    pub fn new(client: Arc<dyn ModelClient>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self { client, profiles }
    }

    /// Never fails: every failure path is logged and yields `None`.
    pub async fn extract(&self, url: &str, profile_id: Option<&str>) -> Option<FigmaStyleInfo> {
        if url.trim().is_empty() {
            return None;
        }
        match self.profiles.snapshot().await.resolve(profile_id) {
            Ok(resolved) => self.extract_with(&resolved, url).await,
            Err(e) => {
                warn!("Style extraction skipped: {}", e);
                None
            }
        }
    }

    /// Runs the extraction against an already resolved profile.
    pub async fn extract_with(
        &self,
        resolved: &ResolvedProfile,
        url: &str,
    ) -> Option<FigmaStyleInfo> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }

        let request = GenerateRequest {
            prompt: extraction_prompt(url),
            ..GenerateRequest::default()
        };

        for model in &resolved.models {
            info!("Extracting design styles with {}", model.name);
            let text = match self
                .client
                .generate(&resolved.profile, &model.name, &request)
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!("Style extraction with {} failed: {}", model.name, e);
                    continue;
                }
            };
            if text.trim().is_empty() {
                warn!("Style extraction with {} returned no text", model.name);
                continue;
            }
            match parse_model_json::<FigmaStyleInfo>(&text) {
                Ok(info) => return Some(info),
                Err(e) => warn!(
                    "Style extraction with {} returned invalid JSON: {}",
                    model.name, e
                ),
            }
        }

        warn!("Style extraction failed on every model; continuing without style context");
        None
    }
}

/// Flattens style facts into a readable block. Absent fields and empty sections
/// are left out; empty info formats to an empty string.
pub fn format_style_info(info: &FigmaStyleInfo) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(colors) = &info.colors {
        let mut lines = labelled(&[
            ("Background", &colors.background),
            ("Text", &colors.text),
            ("Primary", &colors.primary),
            ("Secondary", &colors.secondary),
            ("Border", &colors.border),
        ]);
        if !colors.others.is_empty() {
            lines.push(format!("- Others: {}", colors.others.join(", ")));
        }
        push_section(&mut sections, "Colors", lines);
    }

    if let Some(spacing) = &info.spacing {
        push_section(
            &mut sections,
            "Spacing",
            labelled(&[
                ("Padding", &spacing.padding),
                ("Margin", &spacing.margin),
                ("Gap", &spacing.gap),
            ]),
        );
    }

    if let Some(dimensions) = &info.dimensions {
        push_section(
            &mut sections,
            "Dimensions",
            labelled(&[
                ("Width", &dimensions.width),
                ("Height", &dimensions.height),
                ("Border radius", &dimensions.border_radius),
            ]),
        );
    }

    if let Some(typography) = &info.typography {
        push_section(
            &mut sections,
            "Typography",
            labelled(&[
                ("Font family", &typography.font_family),
                ("Font size", &typography.font_size),
                ("Font weight", &typography.font_weight),
                ("Line height", &typography.line_height),
                ("Letter spacing", &typography.letter_spacing),
            ]),
        );
    }

    let text_lines = info
        .text_content
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| format!("- \"{}\"", t))
        .collect();
    push_section(&mut sections, "Text content", text_lines);

    let element_lines = info
        .elements
        .iter()
        .filter_map(|element| {
            let name = element.name.as_deref()?;
            let mut line = format!("- {}", name);
            if let Some(kind) = &element.kind {
                let _ = write!(line, " ({})", kind);
            }
            if let Some(styles) = element.styles.as_ref().filter(|s| !is_empty_json(s)) {
                let _ = write!(line, ": {}", styles);
            }
            Some(line)
        })
        .collect();
    push_section(&mut sections, "Elements", element_lines);

    sections.join("\n")
}

fn labelled(fields: &[(&str, &Option<String>)]) -> Vec<String> {
    fields
        .iter()
        .filter_map(|(label, value)| value.as_ref().map(|v| format!("- {}: {}", label, v)))
        .collect()
}

fn push_section(sections: &mut Vec<String>, title: &str, lines: Vec<String>) {
    if !lines.is_empty() {
        sections.push(format!("{}:\n{}", title, lines.join("\n")));
    }
}

fn is_empty_json(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
