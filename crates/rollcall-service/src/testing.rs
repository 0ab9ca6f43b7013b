//! Test doubles shared by the service tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rollcall_core::{DetectedFace, EmbeddingProvider, FaceRegion, NormalizedImage, ProviderError};

/// Solid-colour 8x8 PNG. The colour is the key [`FakeProvider`] uses to
/// decide which faces the image "contains".
pub(crate) fn png(color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 8, Rgb(color));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

/// Provider that answers from a colour → faces table.
#[derive(Clone)]
pub(crate) struct FakeProvider {
    dimension: usize,
    faces: HashMap<[u8; 3], Vec<DetectedFace>>,
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl FakeProvider {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            faces: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    pub(crate) fn face(self, color: [u8; 3], values: &[f32]) -> Self {
        self.faces(color, vec![((0, 0, 10), values.to_vec())])
    }

    pub(crate) fn no_face(self, color: [u8; 3]) -> Self {
        self.faces(color, vec![])
    }

    /// Faces as `((left, top, size), embedding)` in detection order.
    pub(crate) fn faces(mut self, color: [u8; 3], faces: Vec<((i64, i64, i64), Vec<f32>)>) -> Self {
        let faces = faces
            .into_iter()
            .map(|((left, top, size), values)| DetectedFace {
                region: FaceRegion {
                    left,
                    top,
                    right: left + size,
                    bottom: top + size,
                },
                embedding: values.into(),
            })
            .collect();
        self.faces.insert(color, faces);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for FakeProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn extract(&self, image: &NormalizedImage) -> Result<Vec<DetectedFace>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Failed("fake embedder offline".into()));
        }
        let decoded = image::load_from_memory(&image.png)
            .map_err(|e| ProviderError::MalformedOutput(e.to_string()))?
            .to_rgb8();
        let key = decoded.get_pixel(0, 0).0;
        Ok(self.faces.get(&key).cloned().unwrap_or_default())
    }
}
