//! rollcall-service — enrollment, recognition and attendance bookkeeping.
//!
//! [`AttendanceSystem`] is the usual entry point: open it from a [`Config`]
//! and an [`EmbeddingProvider`](rollcall_core::EmbeddingProvider), then
//! call `enroll` and `recognize`.

pub mod batch;
pub mod command_provider;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod recognition;
pub mod selection;
pub mod system;

#[cfg(test)]
mod testing;

pub use batch::{image_files, AttendanceReport, EnrollReport, FileOutcome, FileReport};
pub use command_provider::CommandEmbeddingProvider;
pub use config::{Config, CONFIG_PATH_ENV};
pub use enrollment::{validate_identity_id, EnrollmentService};
pub use error::{BatchError, ConfigError, EnrollmentError, OpenError, RecognitionError};
pub use recognition::RecognitionService;
pub use selection::{select_face, MultiFacePolicy, Selection};
pub use system::AttendanceSystem;
