//! The external embedding capability.

use crate::normalize::NormalizedImage;
use crate::types::DetectedFace;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embedding provider failed: {0}")]
    Failed(String),
    #[error("embedding provider timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("embedding provider returned malformed output: {0}")]
    MalformedOutput(String),
    #[error("embedding provider produced {actual}-dim embedding, expected {expected}")]
    Dimension { expected: usize, actual: usize },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces zero or more faces, each with a region and a fixed-length
/// embedding, from a normalized image.
///
/// Implementations must document their dimensionality and emit vectors for
/// which Euclidean distance is the intended similarity measure. Faces are
/// returned in the provider's detection order; callers apply their own
/// selection policy.
#[allow(async_fn_in_trait)]
pub trait EmbeddingProvider {
    /// Embedding length every returned face must have.
    fn dimension(&self) -> usize;

    async fn extract(&self, image: &NormalizedImage) -> Result<Vec<DetectedFace>, ProviderError>;
}

impl<P: EmbeddingProvider> EmbeddingProvider for Arc<P> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    async fn extract(&self, image: &NormalizedImage) -> Result<Vec<DetectedFace>, ProviderError> {
        (**self).extract(image).await
    }
}
