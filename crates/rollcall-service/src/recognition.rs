use chrono::{SubsecRound, Utc};
use rollcall_core::{
    AttendanceRecord, EmbeddingProvider, EuclideanMatcher, ImageNormalizer, MatchResult, Matcher,
    NormalizedImage,
};
use rollcall_store::{AttendanceLedger, EvidenceStore, IdentityStore, StoreError};

use crate::error::RecognitionError;
use crate::selection::{select_face, MultiFacePolicy, Selection};

/// Processes attendance attempts: image → single embedding → gallery match
/// → ledger row.
///
/// One attempt moves through
/// `Received → FaceExtracted → {NoFaceDetected | GalleryMatched → {Matched | NoMatch}}`.
/// Only `Matched` writes anything. Retrying is the caller's decision.
pub struct RecognitionService<P, M = EuclideanMatcher> {
    provider: P,
    matcher: M,
    store: IdentityStore,
    ledger: AttendanceLedger,
    evidence: EvidenceStore,
    normalizer: ImageNormalizer,
    policy: MultiFacePolicy,
    threshold: f32,
}

impl<P: EmbeddingProvider> RecognitionService<P, EuclideanMatcher> {
    pub fn new(
        provider: P,
        store: IdentityStore,
        ledger: AttendanceLedger,
        evidence: EvidenceStore,
        normalizer: ImageNormalizer,
        threshold: f32,
    ) -> Self {
        Self {
            provider,
            matcher: EuclideanMatcher,
            store,
            ledger,
            evidence,
            normalizer,
            policy: MultiFacePolicy::default(),
            threshold,
        }
    }
}

impl<P: EmbeddingProvider, M: Matcher> RecognitionService<P, M> {
    pub fn with_policy(mut self, policy: MultiFacePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_matcher<M2: Matcher>(self, matcher: M2) -> RecognitionService<P, M2> {
        RecognitionService {
            provider: self.provider,
            matcher,
            store: self.store,
            ledger: self.ledger,
            evidence: self.evidence,
            normalizer: self.normalizer,
            policy: self.policy,
            threshold: self.threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Identify the person in `image` and record their attendance.
    pub async fn recognize(
        &self,
        image: &[u8],
        source_tag: &str,
    ) -> Result<AttendanceRecord, RecognitionError> {
        if source_tag.trim().is_empty() {
            return Err(RecognitionError::InvalidSource("must not be empty"));
        }

        let normalized = self.normalizer.normalize(image)?;
        let faces = self.provider.extract(&normalized).await?;
        tracing::debug!(source = source_tag, faces = faces.len(), "recognize: faces extracted");

        let face = match select_face(faces, self.policy) {
            Selection::One(face) => face,
            Selection::NoFace => {
                tracing::info!(source = source_tag, "recognize: no face detected");
                return Err(RecognitionError::NoFaceDetected);
            }
            Selection::Ambiguous { count } => {
                tracing::info!(source = source_tag, count, "recognize: multiple faces rejected");
                return Err(RecognitionError::AmbiguousFace { count });
            }
        };

        let gallery = self.store.get_all().await?;
        let result = self.matcher.compare(&face.embedding, &gallery, self.threshold)?;

        let (identity_id, distance) = match result {
            MatchResult::Matched { identity_id, distance } => (identity_id, distance),
            MatchResult::NoMatch { closest } => {
                tracing::info!(
                    source = source_tag,
                    gallery = gallery.len(),
                    ?closest,
                    threshold = self.threshold,
                    "recognize: face not recognized"
                );
                return Err(RecognitionError::FaceNotRecognized { closest });
            }
        };

        let display_name = gallery
            .iter()
            .find(|identity| identity.id == identity_id)
            .map(|identity| identity.display_name.clone())
            .unwrap_or_else(|| identity_id.clone());

        let record = self
            .commit(identity_id, display_name, source_tag, normalized)
            .await?;

        tracing::info!(
            identity = %record.identity_id,
            name = %record.display_name,
            distance,
            source = %record.source,
            evidence = %record.evidence,
            "attendance marked"
        );
        Ok(record)
    }

    /// Append the ledger row and publish the probe image under the
    /// reference it records.
    ///
    /// The image is staged first and only renamed into place once the row is
    /// durable, so a failed append leaves no file behind. The work runs on
    /// its own task and completes even if the caller stops waiting.
    async fn commit(
        &self,
        identity_id: String,
        display_name: String,
        source_tag: &str,
        normalized: NormalizedImage,
    ) -> Result<AttendanceRecord, RecognitionError> {
        let timestamp = Utc::now().trunc_subsecs(0);
        let ledger = self.ledger.clone();
        let evidence = self.evidence.clone();
        let source = source_tag.to_string();

        let task = tokio::spawn(async move {
            let staged = evidence
                .stage(normalized.png, NormalizedImage::EXTENSION, timestamp)
                .await?;
            let record = AttendanceRecord {
                identity_id,
                display_name,
                timestamp,
                source,
                evidence: staged.reference().to_string(),
            };
            ledger.append(&record).await?;

            // The row is already durable; a missing image does not undo it.
            if let Err(err) = evidence.commit(staged).await {
                tracing::error!(
                    evidence = %record.evidence,
                    error = %err,
                    "attendance recorded but evidence image could not be published"
                );
            }
            Ok::<_, StoreError>(record)
        });

        let record = task
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        Ok(record)
    }

    /// Every attendance record in append order.
    pub async fn list_attendance(&self) -> Result<Vec<AttendanceRecord>, RecognitionError> {
        Ok(self.ledger.read_all().await?)
    }
}
