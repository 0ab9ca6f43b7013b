use std::path::PathBuf;

use rollcall_core::{MatchError, NormalizeError, ProviderError};
use rollcall_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
    #[error("no embedder configured; set embedder_command or $ROLLCALL_EMBEDDER_COMMAND")]
    MissingEmbedder,
}

/// Failures opening an [`AttendanceSystem`](crate::AttendanceSystem).
#[derive(Error, Debug)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("invalid identity id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },
    #[error("invalid display name: {0}")]
    InvalidName(&'static str),
    #[error("no face detected in the image; try again with a clearer face photo")]
    NoFaceDetected,
    #[error("{count} faces detected; enrollment needs exactly one")]
    AmbiguousFace { count: usize },
    #[error("identity {0} is already enrolled and re-enrollment is disabled")]
    EnrollmentConflict(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("image error: {0}")]
    Image(#[from] NormalizeError),
    #[error("embedding provider error: {0}")]
    Provider(#[source] ProviderError),
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
}

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("invalid source tag: {0}")]
    InvalidSource(&'static str),
    #[error("no face detected in the image; please try again")]
    NoFaceDetected,
    #[error("{count} faces detected; attendance needs exactly one")]
    AmbiguousFace { count: usize },
    #[error("face not recognized")]
    FaceNotRecognized {
        /// Distance to the nearest enrolled identity, if any were enrolled.
        closest: Option<f32>,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("image error: {0}")]
    Image(#[from] NormalizeError),
    #[error("embedding provider error: {0}")]
    Provider(#[source] ProviderError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<ProviderError> for EnrollmentError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Dimension { .. } => EnrollmentError::Config(err.to_string()),
            other => EnrollmentError::Provider(other),
        }
    }
}

impl From<StoreError> for EnrollmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(id) => EnrollmentError::EnrollmentConflict(id),
            other => EnrollmentError::Storage(other),
        }
    }
}

impl From<ProviderError> for RecognitionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Dimension { .. } => RecognitionError::Config(err.to_string()),
            other => RecognitionError::Provider(other),
        }
    }
}

impl From<MatchError> for RecognitionError {
    fn from(err: MatchError) -> Self {
        RecognitionError::Config(err.to_string())
    }
}

impl EnrollmentError {
    /// Process exit status for command-line callers.
    pub fn exit_code(&self) -> u8 {
        match self {
            EnrollmentError::NoFaceDetected => 2,
            EnrollmentError::AmbiguousFace { .. } => 4,
            EnrollmentError::EnrollmentConflict(_) => 5,
            EnrollmentError::InvalidId { .. } | EnrollmentError::InvalidName(_) => 64,
            EnrollmentError::Image(_) => 65,
            EnrollmentError::Provider(_) => 69,
            EnrollmentError::Storage(_) => 74,
            EnrollmentError::Config(_) => 78,
        }
    }

    /// Whether the failure is about this one photo rather than the system.
    pub fn is_per_image(&self) -> bool {
        !matches!(
            self,
            EnrollmentError::Provider(_) | EnrollmentError::Storage(_) | EnrollmentError::Config(_)
        )
    }
}

impl RecognitionError {
    /// Process exit status for command-line callers.
    pub fn exit_code(&self) -> u8 {
        match self {
            RecognitionError::NoFaceDetected => 2,
            RecognitionError::FaceNotRecognized { .. } => 3,
            RecognitionError::AmbiguousFace { .. } => 4,
            RecognitionError::InvalidSource(_) => 64,
            RecognitionError::Image(_) => 65,
            RecognitionError::Provider(_) => 69,
            RecognitionError::Storage(_) => 74,
            RecognitionError::Config(_) => 78,
        }
    }

    /// Whether the failure is about this one photo rather than the system.
    pub fn is_per_image(&self) -> bool {
        !matches!(
            self,
            RecognitionError::Provider(_) | RecognitionError::Storage(_) | RecognitionError::Config(_)
        )
    }
}
