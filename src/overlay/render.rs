// src/overlay/render.rs
use super::{MarkerState, NormalizedBox, project_markers};
use crate::models::{Issue, Severity};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

pub fn severity_color(severity: Severity) -> Rgba<u8> {
    match severity {
        Severity::High => Rgba([239, 68, 68, 255]),
        Severity::Medium => Rgba([249, 115, 22, 255]),
        Severity::Low => Rgba([59, 130, 246, 255]),
    }
}

/// Draws an outline for every visible issue onto a copy of the implementation
/// image. The active issue is drawn last, with a heavier stroke and a tint.
pub fn render_annotated(
    image: &DynamicImage,
    issues: &[Issue],
    active: Option<usize>,
) -> RgbaImage {
    let mut canvas = image.to_rgba8();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return canvas;
    }

    let base_stroke = (width.max(height) / 400).max(2);
    let mut markers = project_markers(issues, active, None);
    markers.sort_by_key(|m| m.state == MarkerState::Active);

    for marker in markers {
        let color = severity_color(marker.severity);
        let is_active = marker.state == MarkerState::Active;
        let Some((x0, y0, x1, y1)) = pixel_bounds(&marker.bounding_box, width, height) else {
            continue;
        };
        if is_active {
            tint(&mut canvas, (x0, y0, x1, y1), color, 0.18);
        }
        let stroke = if is_active { base_stroke * 2 } else { base_stroke };
        outline(&mut canvas, (x0, y0, x1, y1), color, stroke);
    }
    canvas
}

/// Inclusive pixel bounds of a box, or `None` when it covers no pixel.
fn pixel_bounds(bbox: &NormalizedBox, width: u32, height: u32) -> Option<Bounds> {
    let rect = bbox.pixel_rect(width, height);
    let x0 = rect.x.floor() as u32;
    let y0 = rect.y.floor() as u32;
    let x1 = ((rect.x + rect.width).ceil() as u32).min(width);
    let y1 = ((rect.y + rect.height).ceil() as u32).min(height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, x1 - 1, y1 - 1))
}

type Bounds = (u32, u32, u32, u32);

fn outline(canvas: &mut RgbaImage, (x0, y0, x1, y1): Bounds, color: Rgba<u8>, stroke: u32) {
    for y in y0..=y1 {
        for x in x0..=x1 {
            let on_edge = x - x0 < stroke || x1 - x < stroke || y - y0 < stroke || y1 - y < stroke;
            if on_edge {
                canvas.put_pixel(x, y, color);
            }
        }
    }
}

fn tint(canvas: &mut RgbaImage, (x0, y0, x1, y1): Bounds, color: Rgba<u8>, alpha: f32) {
    for y in y0..=y1 {
        for x in x0..=x1 {
            let pixel = canvas.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = pixel.0[c] as f32 * (1.0 - alpha) + color.0[c] as f32 * alpha;
                pixel.0[c] = blended.round() as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::tests::issue;

    fn white(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])))
    }

    #[test]
    fn outlines_land_on_box_edges() {
        let issues = vec![issue(Some(vec![100, 100, 500, 500]), false)];
        let canvas = render_annotated(&white(100, 100), &issues, None);
        let color = severity_color(Severity::Medium);
        assert_eq!(*canvas.get_pixel(10, 30), color);
        assert_eq!(*canvas.get_pixel(30, 10), color);
        assert_eq!(*canvas.get_pixel(49, 30), color);
        assert_eq!(*canvas.get_pixel(30, 30), Rgba([255, 255, 255, 255]));
        assert_eq!(*canvas.get_pixel(5, 5), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn ignored_and_invalid_issues_are_not_drawn() {
        let issues = vec![
            issue(Some(vec![0, 0, 1000, 1000]), true),
            issue(Some(vec![0, 0, 1000]), false),
            issue(None, false),
        ];
        let canvas = render_annotated(&white(20, 20), &issues, None);
        assert!(canvas.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
    }

    #[test]
    fn active_issue_is_tinted() {
        let issues = vec![issue(Some(vec![0, 0, 1000, 1000]), false)];
        let canvas = render_annotated(&white(100, 100), &issues, Some(0));
        let center = canvas.get_pixel(50, 50);
        assert_ne!(*center, Rgba([255, 255, 255, 255]));
        // heavier stroke: 4px for a 100px image
        assert_eq!(*canvas.get_pixel(3, 50), severity_color(Severity::Medium));
    }

    #[test]
    fn output_keeps_image_size() {
        let canvas = render_annotated(&white(37, 19), &[], None);
        assert_eq!(canvas.dimensions(), (37, 19));
    }
}
