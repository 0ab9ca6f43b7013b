//! [`EvidenceStore`] — probe images backing attendance rows.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::{Result, StoreError};

/// An image written to disk but not yet published under its reference.
#[derive(Debug)]
pub struct StagedEvidence {
    reference: String,
    file: NamedTempFile,
}

impl StagedEvidence {
    /// The name the image will have once committed.
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

/// Directory of probe images. Each saved image gets a fresh,
/// collision-free name of the form `<UTC timestamp>_<uuid>.<ext>`, and that
/// name is the reference recorded in the ledger.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    dir: PathBuf,
}

impl EvidenceStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `bytes` atomically and return the reference.
    pub async fn save(&self, bytes: Vec<u8>, extension: &str, at: DateTime<Utc>) -> Result<String> {
        let staged = self.stage(bytes, extension, at).await?;
        self.commit(staged).await
    }

    /// Write `bytes` to a hidden temporary file in the evidence directory.
    ///
    /// Nothing is visible under the returned reference until
    /// [`commit`](Self::commit). Dropping the [`StagedEvidence`] deletes the
    /// temporary file.
    pub async fn stage(&self, bytes: Vec<u8>, extension: &str, at: DateTime<Utc>) -> Result<StagedEvidence> {
        validate_extension(extension)?;
        let reference = format!(
            "{}_{}.{extension}",
            at.format("%Y%m%dT%H%M%SZ"),
            Uuid::new_v4().simple()
        );
        let dir = self.dir.clone();

        let file = tokio::task::spawn_blocking(move || write_temp(&dir, &bytes))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        Ok(StagedEvidence { reference, file })
    }

    /// Move a staged image to its final name and return the reference.
    pub async fn commit(&self, staged: StagedEvidence) -> Result<String> {
        let StagedEvidence { reference, file } = staged;
        let target = self.dir.join(&reference);

        tokio::task::spawn_blocking(move || {
            file.persist_noclobber(&target)
                .map(drop)
                .map_err(|e| StoreError::io(&target, e.error))
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

        tracing::debug!(reference = %reference, "evidence image saved");
        Ok(reference)
    }

    /// Resolve a reference returned by [`save`](Self::save).
    pub fn path_of(&self, reference: &str) -> Result<PathBuf> {
        if reference.is_empty()
            || reference.contains(['/', '\\', '\0'])
            || reference == "."
            || reference == ".."
        {
            return Err(StoreError::InvalidReference(reference.to_string()));
        }
        Ok(self.dir.join(reference))
    }
}

fn validate_extension(extension: &str) -> Result<()> {
    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StoreError::InvalidReference(format!(
            "unsupported extension {extension:?}"
        )));
    }
    Ok(())
}

fn write_temp(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_writes_named_file() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::open(dir.path().join("evidence")).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 5).unwrap();

        let reference = store.save(b"png-bytes".to_vec(), "png", at).await.unwrap();
        assert!(reference.starts_with("20261018T093005Z_"), "{reference}");
        assert!(reference.ends_with(".png"));

        let path = store.path_of(&reference).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn references_are_unique() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::open(dir.path()).unwrap();
        let at = Utc::now();
        let a = store.save(vec![1], "png", at).await.unwrap();
        let b = store.save(vec![2], "png", at).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn staged_image_is_invisible_until_committed() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::open(dir.path()).unwrap();

        let staged = store.stage(b"abc".to_vec(), "png", Utc::now()).await.unwrap();
        let reference = staged.reference().to_string();
        assert!(!store.path_of(&reference).unwrap().exists());

        assert_eq!(store.commit(staged).await.unwrap(), reference);
        assert_eq!(std::fs::read(store.path_of(&reference).unwrap()).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn dropped_stage_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::open(dir.path().join("evidence")).unwrap();

        let staged = store.stage(b"abc".to_vec(), "png", Utc::now()).await.unwrap();
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 1);
        drop(staged);
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn rejects_bad_extension() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.save(vec![1], "../png", Utc::now()).await,
            Err(StoreError::InvalidReference(_))
        ));
    }

    #[test]
    fn path_of_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::open(dir.path()).unwrap();
        for bad in ["", "..", "../etc/passwd", "a/b.png", "a\\b.png"] {
            assert!(store.path_of(bad).is_err(), "{bad:?}");
        }
        assert!(store.path_of("ok.png").is_ok());
    }
}
