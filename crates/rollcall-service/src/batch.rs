//! Directory-at-a-time enrollment and attendance.
//!
//! Both operations are plain loops over [`AttendanceSystem::enroll`] and
//! [`AttendanceSystem::recognize`]. One file failing never stops the rest,
//! and each file's typed outcome is kept in the report.

use std::path::{Path, PathBuf};

use rollcall_core::{AttendanceRecord, EmbeddingProvider, Identity};

use crate::error::{BatchError, EnrollmentError, RecognitionError};
use crate::system::AttendanceSystem;

/// File extensions picked up from a batch directory (case-insensitive).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug)]
pub enum FileOutcome<T, E> {
    Done(T),
    Failed(E),
    /// The file could not be read at all.
    Unreadable(std::io::Error),
}

#[derive(Debug)]
pub struct FileReport<T, E> {
    pub file: PathBuf,
    pub outcome: FileOutcome<T, E>,
}

impl<T, E> FileReport<T, E> {
    pub fn is_done(&self) -> bool {
        matches!(self.outcome, FileOutcome::Done(_))
    }
}

pub type EnrollReport = Vec<FileReport<Identity, EnrollmentError>>;
pub type AttendanceReport = Vec<FileReport<AttendanceRecord, RecognitionError>>;

/// Image files directly inside `dir`, sorted by file name.
pub async fn image_files(dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
    let read_dir_err = |source| BatchError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_dir_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)));
        if is_image && entry.file_type().await.map_err(read_dir_err)?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl<P: EmbeddingProvider> AttendanceSystem<P> {
    /// Enroll every image in `dir`. The file stem is both the identity id
    /// and the display name.
    pub async fn enroll_dir(&self, dir: &Path) -> Result<EnrollReport, BatchError> {
        let mut report = Vec::new();
        for file in image_files(dir).await? {
            let outcome = match tokio::fs::read(&file).await {
                Err(e) => FileOutcome::Unreadable(e),
                Ok(bytes) => {
                    let id = file
                        .file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    match self.enroll(&id, &id, &bytes).await {
                        Ok(identity) => FileOutcome::Done(identity),
                        Err(err) => {
                            tracing::warn!(file = %file.display(), error = %err, "batch enroll: skipped");
                            FileOutcome::Failed(err)
                        }
                    }
                }
            };
            report.push(FileReport { file, outcome });
        }

        tracing::info!(
            dir = %dir.display(),
            files = report.len(),
            enrolled = report.iter().filter(|r| r.is_done()).count(),
            "batch enroll finished"
        );
        Ok(report)
    }

    /// Run recognition on every image in `dir`, tagging records with
    /// `source_tag`.
    pub async fn recognize_dir(
        &self,
        dir: &Path,
        source_tag: &str,
    ) -> Result<AttendanceReport, BatchError> {
        let mut report = Vec::new();
        for file in image_files(dir).await? {
            let outcome = match tokio::fs::read(&file).await {
                Err(e) => FileOutcome::Unreadable(e),
                Ok(bytes) => match self.recognize(&bytes, source_tag).await {
                    Ok(record) => FileOutcome::Done(record),
                    Err(err) => FileOutcome::Failed(err),
                },
            };
            report.push(FileReport { file, outcome });
        }

        tracing::info!(
            dir = %dir.display(),
            files = report.len(),
            marked = report.iter().filter(|r| r.is_done()).count(),
            "batch attendance finished"
        );
        Ok(report)
    }
}
