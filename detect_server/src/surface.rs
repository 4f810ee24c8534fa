//! State of the demo page: clickable images with their overlays and the live view.
//!
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use image::RgbImage;

use crate::overlay::{ElementGeometry, OverlayElement};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Default)]
struct TargetState {
    generation: u64,
    overlays: Vec<OverlayElement>,
}

/// A clickable image together with the overlays drawn on top of it.
///
/// Every click starts a new generation. Overlays computed for an older generation
/// are never committed, so a slow detection cannot overwrite a newer one.
pub struct ImageTarget {
    name: String,
    path: PathBuf,
    pixels: Arc<RgbImage>,
    state: Mutex<TargetState>,
}

impl ImageTarget {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, pixels: RgbImage) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            pixels: Arc::new(pixels),
            state: Mutex::new(TargetState::default()),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("invalid image file name {}", path.display()))?;
        let pixels = image::open(path)
            .with_context(|| format!("failed to open image {}", path.display()))?
            .to_rgb8();
        Ok(Self::new(name, path, pixels))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pixels(&self) -> Arc<RgbImage> {
        Arc::clone(&self.pixels)
    }

    pub fn natural_size(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Geometry when displayed at the given size.
    pub fn geometry(&self, displayed_width: f32, displayed_height: f32) -> ElementGeometry {
        let (width, height) = self.natural_size();
        ElementGeometry::new(width, height, displayed_width, displayed_height)
    }

    /// Remove all overlays and invalidate pending detections.
    ///
    /// Returns the generation the caller may later commit to.
    pub fn begin(&self) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.overlays.clear();
        state.generation
    }

    /// Store overlays if `generation` is still the latest, returns whether it was.
    pub fn commit(&self, generation: u64, overlays: Vec<OverlayElement>) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        state.overlays = overlays;
        true
    }

    pub fn overlays(&self) -> Vec<OverlayElement> {
        self.lock().overlays.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Default)]
struct LiveViewState {
    overlays: Vec<OverlayElement>,
    geometry: Option<ElementGeometry>,
}

/// Container of the overlays drawn on top of the webcam video.
#[derive(Default)]
pub struct LiveView {
    state: Mutex<LiveViewState>,
}

impl LiveView {
    /// Replace the whole content of the container.
    pub fn replace(&self, overlays: Vec<OverlayElement>, geometry: ElementGeometry) {
        let mut state = self.lock();
        state.overlays = overlays;
        state.geometry = Some(geometry);
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.overlays.clear();
    }

    pub fn overlays(&self) -> Vec<OverlayElement> {
        self.lock().overlays.clone()
    }

    pub fn geometry(&self) -> Option<ElementGeometry> {
        self.lock().geometry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LiveViewState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Everything the demo page shows.
#[derive(Default)]
pub struct Surface {
    images: BTreeMap<String, Arc<ImageTarget>>,
    live_view: Arc<LiveView>,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every image file of a directory as clickable target.
    ///
    /// Files that cannot be decoded are skipped with a warning.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut surface = Self::new();

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_image {
                continue;
            }

            match ImageTarget::open(&path) {
                Ok(target) => surface.add_image(target),
                Err(err) => log::warn!("Skipping {}: {err:#}", path.display()),
            }
        }

        log::info!("Loaded {} images from {}", surface.images.len(), dir.display());
        Ok(surface)
    }

    pub fn add_image(&mut self, target: ImageTarget) {
        self.images.insert(target.name().to_owned(), Arc::new(target));
    }

    pub fn image(&self, name: &str) -> Option<Arc<ImageTarget>> {
        self.images.get(name).cloned()
    }

    pub fn images(&self) -> impl Iterator<Item = &Arc<ImageTarget>> {
        self.images.values()
    }

    pub fn live_view(&self) -> &Arc<LiveView> {
        &self.live_view
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::overlay::OverlayKind;

    fn element(left: f32) -> OverlayElement {
        OverlayElement {
            kind: OverlayKind::Highlighter,
            text: None,
            left,
            top: 0.0,
            width: 1.0,
            height: Some(1.0),
        }
    }

    #[test]
    fn stale_generation_is_not_committed() {
        let target = ImageTarget::new("a.jpg", "a.jpg", RgbImage::new(4, 2));
        let first = target.begin();
        let second = target.begin();

        assert!(target.commit(second, vec![element(2.0)]));
        assert!(!target.commit(first, vec![element(1.0)]));
        assert_eq!(target.overlays(), vec![element(2.0)]);
    }

    #[test]
    fn begin_clears_overlays() {
        let target = ImageTarget::new("a.jpg", "a.jpg", RgbImage::new(4, 2));
        let generation = target.begin();
        assert!(target.commit(generation, vec![element(1.0)]));

        target.begin();
        assert!(target.overlays().is_empty());
        assert_eq!(target.geometry(2.0, 1.0).ratio(), 0.5);
    }

    #[test]
    fn live_view_is_replaced_as_a_whole() {
        let live_view = LiveView::default();
        let geometry = ElementGeometry::unscaled(4, 4);
        live_view.replace(vec![element(1.0), element(2.0)], geometry);
        live_view.replace(vec![element(3.0)], geometry);
        assert_eq!(live_view.overlays(), vec![element(3.0)]);
        assert_eq!(live_view.geometry(), Some(geometry));
    }

    #[test]
    fn from_dir_loads_images_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        RgbImage::new(8, 6).save(dir.path().join("cat.png"))?;
        std::fs::write(dir.path().join("notes.txt"), "not an image")?;
        std::fs::write(dir.path().join("broken.jpg"), "not a jpeg either")?;

        let surface = Surface::from_dir(dir.path())?;
        let names: Vec<_> = surface.images().map(|target| target.name()).collect();
        assert_eq!(names, vec!["cat.png"]);
        assert_eq!(surface.image("cat.png").map(|t| t.natural_size()), Some((8, 6)));

        Ok(())
    }
}
