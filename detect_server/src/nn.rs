//! Object detection backend running an SSD-style ONNX model with tract.
//!
//! The model is expected to take a `1x3xHxW` float tensor and to produce two
//! outputs: class scores of shape `1xNxC` and boxes of shape `1xNx4` holding
//! normalized `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`.
use std::{path::Path, sync::Arc};

use anyhow::{bail, Context, Result};
use common::{BoundingBox, Category, Detection, DetectionResult};
use image::RgbImage;
use ndarray::s;
use smallvec::SmallVec;
use tract_onnx::prelude::*;

use crate::detector::{DetectorOptions, InferModel, ModelFactory};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = SmallVec<[TValue; 4]>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Number of ranked categories kept per detection.
const MAX_CATEGORIES: usize = 3;

/// Static properties of the network.
#[derive(Clone, Debug)]
pub struct SsdConfig {
    pub width: u32,
    pub height: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Index of the background class, ignored when ranking categories.
    pub background_class: Option<usize>,
    pub max_iou: f32,
}

impl Default for SsdConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 320,
            // Mean/std are from MobileNet
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            background_class: Some(0),
            max_iou: 0.5,
        }
    }
}

pub struct SsdModel {
    model: NnModel,
    config: SsdConfig,
    labels: Vec<String>,
    min_confidence: f32,
}

impl SsdModel {
    pub fn new(options: &DetectorOptions, config: SsdConfig) -> Result<Self> {
        let model = load_model(Path::new(&options.model_asset), &config)?;
        let labels = match options.labels_asset.as_deref() {
            Some(path) => load_labels(Path::new(path))?,
            None => Vec::new(),
        };

        log::info!(
            "Loaded model {} ({}x{}, {} labels)",
            &options.model_asset,
            config.width,
            config.height,
            labels.len()
        );

        Ok(Self {
            model,
            config,
            labels,
            min_confidence: options.score_threshold,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let (width, height) = (self.config.width, self.config.height);
        let resized: RgbImage = image::imageops::resize(
            input,
            width,
            height,
            image::imageops::FilterType::Triangle,
        );

        let (mean, std) = (self.config.mean, self.config.std);
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, c, y, x)| (resized[(x as _, y as _)][c] as f32 / 255.0 - mean[c]) / std[c],
        )
        .into()
    }

    fn postproc(&self, raw_nn_out: NnOut, width: u32, height: u32) -> Result<DetectionResult> {
        if raw_nn_out.len() < 2 {
            bail!("expected scores and boxes, model has {} outputs", raw_nn_out.len());
        }

        let scores = raw_nn_out[0].to_array_view::<f32>()?;
        let bboxes = raw_nn_out[1].to_array_view::<f32>()?;
        if scores.ndim() != 3 || bboxes.ndim() != 3 || bboxes.shape()[2] != 4 {
            bail!(
                "unexpected output shapes {:?} and {:?}",
                scores.shape(),
                bboxes.shape()
            );
        }

        let (width, height) = (width as f32, height as f32);
        let mut candidates: Vec<(Vec<Category>, BoundingBox)> = scores
            .slice(s![0, .., ..])
            .outer_iter()
            .zip(bboxes.slice(s![0, .., ..]).outer_iter())
            .filter_map(|(class_scores, bbox)| {
                let categories = self.rank_categories(class_scores.iter().copied());
                match categories.first() {
                    Some(top) if top.score >= self.min_confidence => {
                        let corners: Vec<f32> = bbox.iter().copied().collect();
                        let bbox = BoundingBox::from_corners(
                            corners[0] * width,
                            corners[1] * height,
                            corners[2] * width,
                            corners[3] * height,
                        );
                        Some((categories, bbox))
                    }
                    _ => None,
                }
            })
            .collect();

        // Ascending, the most confident candidate is popped first
        candidates.sort_by(|a, b| a.0[0].score.total_cmp(&b.0[0].score));

        let detections = non_maximum_suppression(candidates, self.config.max_iou)
            .into_iter()
            .map(|(categories, bbox)| Detection::new(categories, bbox))
            .collect();

        Ok(DetectionResult::new(detections))
    }

    fn rank_categories(&self, class_scores: impl Iterator<Item = f32>) -> Vec<Category> {
        let mut ranked: Vec<(usize, f32)> = class_scores
            .enumerate()
            .filter(|(index, _)| Some(*index) != self.config.background_class)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(MAX_CATEGORIES);

        ranked
            .into_iter()
            .map(|(index, score)| {
                let name = self
                    .labels
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{index}"));
                Category::new(index as i32, score, name)
            })
            .collect()
    }
}

impl InferModel for SsdModel {
    fn run(&self, input: &RgbImage) -> Result<DetectionResult> {
        let (width, height) = input.dimensions();
        let tensor: TValue = self.preproc(input).into();
        let raw_nn_out = self.model.run(tvec!(tensor))?;
        self.postproc(raw_nn_out, width, height)
    }
}

/// Builds [`SsdModel`]s with a fixed network configuration.
#[derive(Clone, Debug, Default)]
pub struct SsdModelFactory {
    pub config: SsdConfig,
}

impl ModelFactory for SsdModelFactory {
    fn create(&self, options: &DetectorOptions) -> Result<Arc<dyn InferModel>> {
        Ok(Arc::new(SsdModel::new(options, self.config.clone())?))
    }
}

fn load_model(path: &Path, config: &SsdConfig) -> Result<NnModel> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(1, 3, config.height as usize, config.width as usize),
    );
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to read model {}", path.display()))?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Read one label per line, the line number is the class index.
fn load_labels(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels {}", path.display()))?;
    Ok(content.lines().map(|line| line.trim().to_owned()).collect())
}

/// Run non-maximum-suppression on candidate detections.
///
/// Start with the most confident candidate and iterate over all others in the order
/// of sinking confidence. Keep only those candidates which do not overlap an already
/// selected box by more than `max_iou`.
fn non_maximum_suppression<T>(
    mut sorted_candidates: Vec<(T, BoundingBox)>,
    max_iou: f32,
) -> Vec<(T, BoundingBox)> {
    let mut selected: Vec<(T, BoundingBox)> = vec![];
    'candidates: while let Some((item, bbox)) = sorted_candidates.pop() {
        for (_, selected_bbox) in selected.iter() {
            if iou(&bbox, selected_bbox) > max_iou {
                continue 'candidates;
            }
        }
        selected.push((item, bbox));
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &BoundingBox, bbox_b: &BoundingBox) -> f32 {
    // Non-overlapping boxes produce an inverted overlap box with zero area
    let overlap = BoundingBox::from_corners(
        f32::max(bbox_a.origin_x, bbox_b.origin_x),
        f32::max(bbox_a.origin_y, bbox_b.origin_y),
        f32::min(bbox_a.origin_x + bbox_a.width, bbox_b.origin_x + bbox_b.width),
        f32::min(bbox_a.origin_y + bbox_a.height, bbox_b.origin_y + bbox_b.height),
    );

    let overlap_area = overlap.area();

    // Avoid division-by-zero with `EPS`
    overlap_area / (bbox_a.area() + bbox_b.area() - overlap_area + EPS)
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1.0e-4);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_keeps_most_confident_of_overlapping_boxes() {
        // Sorted by ascending confidence
        let candidates = vec![
            (0.6, BoundingBox::new(1.0, 1.0, 10.0, 10.0)),
            (0.7, BoundingBox::new(50.0, 50.0, 10.0, 10.0)),
            (0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
        ];

        let selected = non_maximum_suppression(candidates, 0.5);
        let scores: Vec<f64> = selected.iter().map(|(score, _)| *score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn load_labels_by_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("labels.txt");
        std::fs::write(&path, "background\nperson\ncat\n")?;

        assert_eq!(load_labels(&path)?, vec!["background", "person", "cat"]);
        Ok(())
    }

    #[test]
    fn missing_model_fails_to_load() {
        let options = DetectorOptions::new("does-not-exist.onnx");
        assert!(SsdModel::new(&options, SsdConfig::default()).is_err());
    }
}
