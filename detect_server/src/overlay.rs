//! Overlay rendering of detection results.
//!
//! Detections arrive in the natural pixel space of the source image or frame. The
//! overlays are positioned in the displayed space of the element showing it, so
//! every coordinate is multiplied by `displayed_height / natural_height`. Image and
//! video overlays use the same scaling.

use common::{Detection, DetectionResult};
use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use serde::Serialize;

/// Horizontal space taken from the label so it stays inside the box outline.
const LABEL_WIDTH_INSET: f32 = 10.0;

const HIGHLIGHT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Intrinsic and displayed size of the element a result belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementGeometry {
    pub natural_width: u32,
    pub natural_height: u32,
    pub displayed_width: f32,
    pub displayed_height: f32,
}

impl ElementGeometry {
    pub fn new(
        natural_width: u32,
        natural_height: u32,
        displayed_width: f32,
        displayed_height: f32,
    ) -> Self {
        Self {
            natural_width,
            natural_height,
            displayed_width,
            displayed_height,
        }
    }

    /// Geometry of an element shown at its natural size.
    pub fn unscaled(width: u32, height: u32) -> Self {
        Self::new(width, height, width as f32, height as f32)
    }

    /// Scale from natural to displayed pixels.
    ///
    /// An element without natural height has nothing to scale, the ratio is 1 then.
    pub fn ratio(&self) -> f32 {
        if self.natural_height == 0 {
            return 1.0;
        }
        self.displayed_height / self.natural_height as f32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayKind {
    /// Rectangle outlining the detected object.
    Highlighter,
    /// Text naming the top category and its confidence.
    Label,
}

/// One absolutely positioned overlay node, coordinates in displayed pixels.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayElement {
    pub kind: OverlayKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
}

impl OverlayElement {
    fn highlighter(detection: &Detection, ratio: f32) -> Self {
        let bbox = &detection.bounding_box;
        Self {
            kind: OverlayKind::Highlighter,
            text: None,
            left: bbox.origin_x * ratio,
            top: bbox.origin_y * ratio,
            width: bbox.width * ratio,
            height: Some(bbox.height * ratio),
        }
    }

    fn label(detection: &Detection, ratio: f32) -> Self {
        let bbox = &detection.bounding_box;
        Self {
            kind: OverlayKind::Label,
            text: Some(label_text(detection)),
            left: bbox.origin_x * ratio,
            top: bbox.origin_y * ratio,
            width: f32::max(bbox.width * ratio - LABEL_WIDTH_INSET, 0.0),
            height: None,
        }
    }

    /// HTML node for the overlay, positioned by inline style.
    pub fn to_html(&self) -> String {
        let height = match self.height {
            Some(height) => format!(" height: {height}px;"),
            None => String::new(),
        };
        let style = format!(
            "left: {}px; top: {}px; width: {}px;{height}",
            self.left, self.top, self.width
        );

        match self.kind {
            OverlayKind::Highlighter => {
                format!(r#"<div class="highlighter" style="{style}"></div>"#)
            }
            OverlayKind::Label => format!(
                r#"<p class="label" style="{style}">{}</p>"#,
                escape_html(self.text.as_deref().unwrap_or_default())
            ),
        }
    }
}

/// Text shown for a detection: `"<category> - <percent>% confidence."`.
pub fn label_text(detection: &Detection) -> String {
    match detection.top_category() {
        Some(category) => format!(
            "{} - {}% confidence.",
            category.category_name,
            (category.score * 100.0).round() as i64
        ),
        None => "unknown - 0% confidence.".to_owned(),
    }
}

/// Overlays for a still image: a highlighter and a label per detection.
pub fn render_image_detections(
    result: &DetectionResult,
    geometry: &ElementGeometry,
) -> Vec<OverlayElement> {
    let ratio = geometry.ratio();
    result
        .iter()
        .flat_map(|detection| {
            [
                OverlayElement::highlighter(detection, ratio),
                OverlayElement::label(detection, ratio),
            ]
        })
        .collect()
}

/// Overlays for a video frame: a highlighter per detection.
pub fn render_video_detections(
    result: &DetectionResult,
    geometry: &ElementGeometry,
) -> Vec<OverlayElement> {
    let ratio = geometry.ratio();
    result
        .iter()
        .map(|detection| OverlayElement::highlighter(detection, ratio))
        .collect()
}

/// Concatenated HTML of a set of overlays.
pub fn to_html(elements: &[OverlayElement]) -> String {
    elements.iter().map(OverlayElement::to_html).collect()
}

/// Draw the highlighters onto a frame in its natural pixel space.
///
/// `ratio` is the one the elements were rendered with.
pub fn draw_overlays(frame: &mut RgbImage, elements: &[OverlayElement], ratio: f32) {
    let ratio = if ratio > 0.0 { ratio } else { 1.0 };
    for element in elements
        .iter()
        .filter(|element| element.kind == OverlayKind::Highlighter)
    {
        let width = (element.width / ratio).round() as u32;
        let height = (element.height.unwrap_or_default() / ratio).round() as u32;
        if width == 0 || height == 0 {
            continue;
        }
        let rect = Rect::at(
            (element.left / ratio).round() as i32,
            (element.top / ratio).round() as i32,
        )
        .of_size(width, height);
        draw_hollow_rect_mut(frame, rect, HIGHLIGHT_COLOR);
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
