use std::sync::Arc;

use rollcall_core::{AttendanceRecord, EmbeddingProvider, Identity, ImageNormalizer};
use rollcall_store::{AttendanceLedger, EvidenceStore, IdentityStore, StoreError};

use crate::config::Config;
use crate::enrollment::EnrollmentService;
use crate::error::{ConfigError, EnrollmentError, OpenError, RecognitionError};
use crate::recognition::RecognitionService;

/// Everything a front end needs, opened from one [`Config`].
///
/// Both services share the provider and the identity store, so an identity
/// is matchable by recognition as soon as `enroll` returns.
pub struct AttendanceSystem<P> {
    config: Config,
    store: IdentityStore,
    enrollment: EnrollmentService<Arc<P>>,
    recognition: RecognitionService<Arc<P>>,
}

impl<P: EmbeddingProvider> AttendanceSystem<P> {
    pub async fn open(config: &Config, provider: P) -> Result<Self, OpenError> {
        config.validate()?;
        if provider.dimension() != config.embedding_dimension {
            return Err(ConfigError::InvalidValue {
                key: "embedding_dimension",
                message: format!(
                    "configured {} but the embedder produces {}",
                    config.embedding_dimension,
                    provider.dimension()
                ),
            }
            .into());
        }

        let store = IdentityStore::open(config.identities_path(), config.embedding_dimension).await?;
        let ledger = AttendanceLedger::open(config.ledger_path())?;
        let evidence = EvidenceStore::open(config.evidence_dir())?;
        let normalizer = ImageNormalizer::new(config.max_image_dimension);
        let provider = Arc::new(provider);

        let enrollment = EnrollmentService::new(provider.clone(), store.clone(), normalizer)
            .with_policy(config.multi_face_policy)
            .with_reenrollment(config.allow_reenrollment);
        let recognition = RecognitionService::new(
            provider,
            store.clone(),
            ledger,
            evidence,
            normalizer,
            config.match_threshold,
        )
        .with_policy(config.multi_face_policy);

        tracing::info!(
            data_dir = %config.data_dir.display(),
            dimension = config.embedding_dimension,
            threshold = config.match_threshold,
            policy = %config.multi_face_policy,
            "attendance system opened"
        );

        Ok(Self {
            config: config.clone(),
            store,
            enrollment,
            recognition,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn enroll(
        &self,
        id: &str,
        display_name: &str,
        image: &[u8],
    ) -> Result<Identity, EnrollmentError> {
        self.enrollment.enroll(id, display_name, image).await
    }

    pub async fn recognize(
        &self,
        image: &[u8],
        source_tag: &str,
    ) -> Result<AttendanceRecord, RecognitionError> {
        self.recognition.recognize(image, source_tag).await
    }

    pub async fn list_attendance(&self) -> Result<Vec<AttendanceRecord>, RecognitionError> {
        self.recognition.list_attendance().await
    }

    pub async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        self.store.get_all().await
    }

    /// Remove `id` from the gallery. Past attendance rows are kept.
    pub async fn remove_identity(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.store.remove(id).await?;
        tracing::info!(id, removed, "identity removal");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::MultiFacePolicy;
    use crate::testing::{png, FakeProvider};
    use tempfile::TempDir;

    const ALICE: [u8; 3] = [200, 10, 10];
    const ALICE_AGAIN: [u8; 3] = [201, 10, 10];
    const STRANGER: [u8; 3] = [10, 10, 200];

    fn provider() -> FakeProvider {
        FakeProvider::new(2)
            .face(ALICE, &[0.10, 0.10])
            .face(ALICE_AGAIN, &[0.12, 0.11])
            .face(STRANGER, &[0.90, 0.90])
    }

    fn config(dir: &TempDir) -> Config {
        Config {
            data_dir: dir.path().to_path_buf(),
            embedding_dimension: 2,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn enroll_then_recognize() {
        let dir = TempDir::new().unwrap();
        let system = AttendanceSystem::open(&config(&dir), provider()).await.unwrap();

        system.enroll("S1", "Alice", &png(ALICE)).await.unwrap();
        let record = system.recognize(&png(ALICE_AGAIN), "room-101").await.unwrap();
        assert_eq!(record.identity_id, "S1");
        assert_eq!(record.display_name, "Alice");

        let err = system.recognize(&png(STRANGER), "room-101").await.unwrap_err();
        assert!(matches!(err, RecognitionError::FaceNotRecognized { .. }));
        assert_eq!(system.list_attendance().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let system = AttendanceSystem::open(&config(&dir), provider()).await.unwrap();
            system.enroll("S1", "Alice", &png(ALICE)).await.unwrap();
            system.recognize(&png(ALICE), "gate").await.unwrap();
        }

        let system = AttendanceSystem::open(&config(&dir), provider()).await.unwrap();
        let ids: Vec<_> = system
            .list_identities()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["S1"]);
        assert_eq!(system.list_attendance().await.unwrap().len(), 1);

        assert!(dir.path().join("identities.db").exists());
        assert!(dir.path().join("attendance.csv").exists());
    }

    #[tokio::test]
    async fn removed_identity_is_no_longer_matched() {
        let dir = TempDir::new().unwrap();
        let system = AttendanceSystem::open(&config(&dir), provider()).await.unwrap();
        system.enroll("S1", "Alice", &png(ALICE)).await.unwrap();
        system.recognize(&png(ALICE), "gate").await.unwrap();

        assert!(system.remove_identity("S1").await.unwrap());
        assert!(!system.remove_identity("S1").await.unwrap());

        let err = system.recognize(&png(ALICE), "gate").await.unwrap_err();
        assert!(matches!(err, RecognitionError::FaceNotRecognized { closest: None }));
        assert_eq!(system.list_attendance().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn provider_dimension_must_match_config() {
        let dir = TempDir::new().unwrap();
        let result = AttendanceSystem::open(&config(&dir), FakeProvider::new(128)).await;
        assert!(matches!(
            result,
            Err(OpenError::Config(ConfigError::InvalidValue {
                key: "embedding_dimension",
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn config_policies_are_applied() {
        let dir = TempDir::new().unwrap();
        let cfg = Config {
            allow_reenrollment: false,
            multi_face_policy: MultiFacePolicy::Reject,
            ..config(&dir)
        };
        let group: [u8; 3] = [50, 50, 50];
        let provider = provider().faces(
            group,
            vec![((0, 0, 10), vec![0.1, 0.1]), ((20, 0, 10), vec![0.9, 0.9])],
        );
        let system = AttendanceSystem::open(&cfg, provider).await.unwrap();

        system.enroll("S1", "Alice", &png(ALICE)).await.unwrap();
        assert!(matches!(
            system.enroll("S1", "Alice", &png(ALICE_AGAIN)).await,
            Err(EnrollmentError::EnrollmentConflict(_))
        ));
        assert!(matches!(
            system.recognize(&png(group), "gate").await,
            Err(RecognitionError::AmbiguousFace { count: 2 })
        ));
    }
}
