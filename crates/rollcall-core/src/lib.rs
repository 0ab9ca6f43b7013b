//! rollcall-core — identity types and the gallery matching engine.
//!
//! Embedding extraction itself is an external capability, modelled by the
//! [`EmbeddingProvider`] trait. Everything in this crate is pure apart from
//! image decoding in [`normalize`].

pub mod matcher;
pub mod normalize;
pub mod provider;
pub mod types;

pub use matcher::{EuclideanMatcher, MatchError, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use normalize::{ImageNormalizer, NormalizeError, NormalizedImage};
pub use provider::{EmbeddingProvider, ProviderError};
pub use types::{AttendanceRecord, DetectedFace, Embedding, FaceRegion, Identity};
