use rollcall_core::{EmbeddingProvider, Identity, ImageNormalizer};
use rollcall_store::IdentityStore;

use crate::error::EnrollmentError;
use crate::selection::{select_face, MultiFacePolicy, Selection};

const MAX_ID_LEN: usize = 128;

/// Check that `id` is usable as a stable storage key.
///
/// Ids are opaque, but they must never be able to address a path: no
/// separators, no NUL, no `.`/`..`.
pub fn validate_identity_id(id: &str) -> Result<(), EnrollmentError> {
    let invalid = |reason| EnrollmentError::InvalidId {
        id: id.to_string(),
        reason,
    };

    if id.trim().is_empty() {
        return Err(invalid("must not be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(invalid("must be at most 128 bytes"));
    }
    if id.contains(['/', '\\']) {
        return Err(invalid("must not contain path separators"));
    }
    if id.contains('\0') {
        return Err(invalid("must not contain NUL"));
    }
    if id == "." || id == ".." {
        return Err(invalid("must not be a relative path component"));
    }
    Ok(())
}

/// Registers identities: image → single embedding → gallery entry.
pub struct EnrollmentService<P> {
    provider: P,
    store: IdentityStore,
    normalizer: ImageNormalizer,
    policy: MultiFacePolicy,
    allow_reenrollment: bool,
}

impl<P: EmbeddingProvider> EnrollmentService<P> {
    pub fn new(provider: P, store: IdentityStore, normalizer: ImageNormalizer) -> Self {
        Self {
            provider,
            store,
            normalizer,
            policy: MultiFacePolicy::default(),
            allow_reenrollment: true,
        }
    }

    pub fn with_policy(mut self, policy: MultiFacePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// When `false`, enrolling an existing id fails with
    /// [`EnrollmentError::EnrollmentConflict`] instead of overwriting it.
    pub fn with_reenrollment(mut self, allow: bool) -> Self {
        self.allow_reenrollment = allow;
        self
    }

    /// Enroll (or re-enroll) `id` from a photo containing its face.
    ///
    /// Nothing is written unless a face was extracted, so a failed attempt
    /// leaves any existing entry for `id` untouched. The identity is
    /// matchable as soon as this returns.
    pub async fn enroll(
        &self,
        id: &str,
        display_name: &str,
        image: &[u8],
    ) -> Result<Identity, EnrollmentError> {
        validate_identity_id(id)?;
        if display_name.trim().is_empty() {
            return Err(EnrollmentError::InvalidName("must not be empty"));
        }

        let normalized = self.normalizer.normalize(image)?;
        let faces = self.provider.extract(&normalized).await?;
        tracing::debug!(id, faces = faces.len(), "enroll: faces extracted");

        let face = match select_face(faces, self.policy) {
            Selection::One(face) => face,
            Selection::NoFace => {
                tracing::warn!(id, "enroll: no face detected");
                return Err(EnrollmentError::NoFaceDetected);
            }
            Selection::Ambiguous { count } => {
                tracing::warn!(id, count, "enroll: multiple faces rejected");
                return Err(EnrollmentError::AmbiguousFace { count });
            }
        };

        if face.embedding.dimension() != self.store.dimension() {
            return Err(EnrollmentError::Config(format!(
                "embedder produced {}-dim embedding, gallery stores {}",
                face.embedding.dimension(),
                self.store.dimension()
            )));
        }

        let identity = if self.allow_reenrollment {
            self.store.put(id, display_name, &face.embedding).await?
        } else {
            self.store.insert(id, display_name, &face.embedding).await?
        };

        tracing::info!(
            id,
            name = display_name,
            reenrolled = identity.enrolled_at != identity.updated_at,
            "identity enrolled"
        );
        Ok(identity)
    }
}
