// src/overlay/mod.rs
//! Maps normalized issue boxes onto rendered images.
//!
//! Boxes arrive as `[ymin, xmin, ymax, xmax]` on a fixed 0-1000 scale of the
//! implementation image. Overlay positions are expressed in percent of the
//! rendered image box, so they stay correct at any display size as long as the
//! overlay container matches the image exactly.

mod interaction;
mod render;

pub use interaction::{HOVER_DEBOUNCE, HoverTracker};
pub use render::{render_annotated, severity_color};

use crate::models::{Issue, IssueCategory, Severity};
use serde::Serialize;

/// Upper bound of the normalized coordinate space.
pub const SCALE: i32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBox {
    pub ymin: i32,
    pub xmin: i32,
    pub ymax: i32,
    pub xmax: i32,
}

/// Position of an overlay in percent of the rendered image box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverlayRect {
    pub top: f64,
    pub left: f64,
    pub height: f64,
    pub width: f64,
}

/// Region in natural pixel coordinates of a loaded image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Presentational transform that makes a cropped region fill its container:
/// size the full image to `width_pct`/`height_pct` of the container and shift
/// it by `translate_*_pct` of its own scaled size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropTransform {
    pub width_pct: f64,
    pub height_pct: f64,
    pub translate_x_pct: f64,
    pub translate_y_pct: f64,
}

impl NormalizedBox {
    /// Accepts exactly four components. Values are clamped to the 0-1000 range
    /// and inverted axes are swapped so that min <= max.
    pub fn from_components(components: &[i32]) -> Option<Self> {
        let [y0, x0, y1, x1] = <[i32; 4]>::try_from(components).ok()?;
        let clamp = |v: i32| v.clamp(0, SCALE);
        let (y0, x0, y1, x1) = (clamp(y0), clamp(x0), clamp(y1), clamp(x1));
        Some(Self {
            ymin: y0.min(y1),
            xmin: x0.min(x1),
            ymax: y0.max(y1),
            xmax: x0.max(x1),
        })
    }

    pub fn of_issue(issue: &Issue) -> Option<Self> {
        issue.bounding_box.as_deref().and_then(Self::from_components)
    }

    pub fn overlay_rect(&self) -> OverlayRect {
        OverlayRect {
            top: self.ymin as f64 / 10.0,
            left: self.xmin as f64 / 10.0,
            height: (self.ymax - self.ymin) as f64 / 10.0,
            width: (self.xmax - self.xmin) as f64 / 10.0,
        }
    }

    pub fn pixel_rect(&self, natural_width: u32, natural_height: u32) -> PixelRect {
        let (w, h, scale) = (natural_width as f64, natural_height as f64, SCALE as f64);
        PixelRect {
            x: self.xmin as f64 * w / scale,
            y: self.ymin as f64 * h / scale,
            width: (self.xmax - self.xmin) as f64 * w / scale,
            height: (self.ymax - self.ymin) as f64 * h / scale,
        }
    }
}

/// Returns `None` for zero-area crops or images with no pixels.
pub fn crop_transform(
    bbox: &NormalizedBox,
    natural_width: u32,
    natural_height: u32,
) -> Option<CropTransform> {
    if natural_width == 0 || natural_height == 0 {
        return None;
    }
    let crop = bbox.pixel_rect(natural_width, natural_height);
    if crop.width <= 0.0 || crop.height <= 0.0 {
        return None;
    }
    let (w, h) = (natural_width as f64, natural_height as f64);
    Some(CropTransform {
        width_pct: w / crop.width * 100.0,
        height_pct: h / crop.height * 100.0,
        translate_x_pct: -(crop.x / w) * 100.0,
        translate_y_pct: -(crop.y / h) * 100.0,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerState {
    Active,
    Hovered,
    Idle,
}

impl MarkerState {
    /// Active selection always wins over hover.
    pub fn resolve(index: usize, active: Option<usize>, hovered: Option<usize>) -> Self {
        if active == Some(index) {
            MarkerState::Active
        } else if hovered == Some(index) {
            MarkerState::Hovered
        } else {
            MarkerState::Idle
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayMarker {
    /// Position of the issue in the original, unfiltered issue list.
    pub index: usize,
    pub rect: OverlayRect,
    pub bounding_box: NormalizedBox,
    pub severity: Severity,
    pub category: IssueCategory,
    pub state: MarkerState,
}

/// Projects issues to overlay markers. Ignored issues and issues without a
/// valid box produce no marker; indices always refer to `issues`.
pub fn project_markers(
    issues: &[Issue],
    active: Option<usize>,
    hovered: Option<usize>,
) -> Vec<OverlayMarker> {
    issues
        .iter()
        .enumerate()
        .filter(|(_, issue)| !issue.ignored())
        .filter_map(|(index, issue)| {
            let bounding_box = NormalizedBox::of_issue(issue)?;
            Some(OverlayMarker {
                index,
                rect: bounding_box.overlay_rect(),
                bounding_box,
                severity: issue.severity,
                category: issue.category,
                state: MarkerState::resolve(index, active, hovered),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn issue(bbox: Option<Vec<i32>>, ignored: bool) -> Issue {
        Issue {
            category: IssueCategory::Spacing,
            severity: Severity::Medium,
            description: "gap".into(),
            suggestion: String::new(),
            location: String::new(),
            bounding_box: bbox,
            is_ignored: ignored.then_some(true),
        }
    }

    #[test]
    fn overlay_rect_is_tenth_of_components() {
        let rect = NormalizedBox::from_components(&[100, 100, 200, 200])
            .unwrap()
            .overlay_rect();
        assert_eq!(
            rect,
            OverlayRect {
                top: 10.0,
                left: 10.0,
                height: 10.0,
                width: 10.0
            }
        );
    }

    #[test]
    fn overlay_rect_stays_in_percent_range() {
        for components in [[0, 0, 1000, 1000], [999, 1, 1000, 2], [250, 750, 600, 1000]] {
            let bbox = NormalizedBox::from_components(&components).unwrap();
            let rect = bbox.overlay_rect();
            assert_eq!(rect, bbox.overlay_rect());
            for v in [rect.top, rect.left, rect.height, rect.width] {
                assert!((0.0..=100.0).contains(&v), "{:?}", rect);
            }
            assert!(rect.top + rect.height <= 100.0);
            assert!(rect.left + rect.width <= 100.0);
        }
    }

    #[test]
    fn wrong_arity_is_rejected() {
        assert!(NormalizedBox::from_components(&[]).is_none());
        assert!(NormalizedBox::from_components(&[1, 2, 3]).is_none());
        assert!(NormalizedBox::from_components(&[1, 2, 3, 4, 5]).is_none());
    }

    #[test]
    fn inverted_and_out_of_range_boxes_are_normalized() {
        let bbox = NormalizedBox::from_components(&[400, 900, 100, -50]).unwrap();
        assert_eq!(
            bbox,
            NormalizedBox {
                ymin: 100,
                xmin: 0,
                ymax: 400,
                xmax: 900
            }
        );
        let clamped = NormalizedBox::from_components(&[0, 0, 1400, 1000]).unwrap();
        assert_eq!(clamped.ymax, 1000);
    }

    #[test]
    fn crop_transform_fills_container_with_region() {
        let bbox = NormalizedBox::from_components(&[250, 500, 750, 1000]).unwrap();
        let t = crop_transform(&bbox, 800, 400).unwrap();
        // crop = x 400, y 100, 400 x 200
        assert_eq!(t.width_pct, 200.0);
        assert_eq!(t.height_pct, 200.0);
        assert_eq!(t.translate_x_pct, -50.0);
        assert_eq!(t.translate_y_pct, -25.0);
    }

    #[test]
    fn crop_transform_guards_zero_area() {
        let flat = NormalizedBox::from_components(&[100, 100, 100, 300]).unwrap();
        assert!(crop_transform(&flat, 800, 600).is_none());
        let bbox = NormalizedBox::from_components(&[0, 0, 500, 500]).unwrap();
        assert!(crop_transform(&bbox, 0, 600).is_none());
    }

    #[test]
    fn markers_skip_ignored_and_invalid_but_keep_indices() {
        let issues = vec![
            issue(Some(vec![0, 0, 100, 100]), false),
            issue(None, false),
            issue(Some(vec![1, 2, 3]), false),
            issue(Some(vec![10, 10, 20, 20]), true),
            issue(Some(vec![500, 500, 600, 600]), false),
        ];
        let markers = project_markers(&issues, None, None);
        let indices: Vec<usize> = markers.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 4]);
        assert_eq!(markers[1].rect.top, 50.0);
    }

    #[test]
    fn active_wins_over_hover() {
        let issues = vec![
            issue(Some(vec![0, 0, 100, 100]), false),
            issue(Some(vec![0, 0, 100, 100]), false),
        ];
        let markers = project_markers(&issues, Some(0), Some(0));
        assert_eq!(markers[0].state, MarkerState::Active);
        assert_eq!(markers[1].state, MarkerState::Idle);

        let markers = project_markers(&issues, Some(0), Some(1));
        assert_eq!(markers[1].state, MarkerState::Hovered);
    }
}
