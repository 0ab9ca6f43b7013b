//! Choosing the single face an operation acts on.

use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use rollcall_core::DetectedFace;
use serde::{Deserialize, Serialize};

/// Policy for images with more than one detected face. The same policy
/// governs enrollment and recognition; one photo never marks several
/// people present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiFacePolicy {
    /// Use the face with the largest region. Ties go to the top-most, then
    /// left-most region, then to detection order.
    #[default]
    Primary,
    /// Refuse the image as ambiguous.
    Reject,
}

impl FromStr for MultiFacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown multi-face policy {other:?} (expected primary|reject)")),
        }
    }
}

impl fmt::Display for MultiFacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Reject => "reject",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    NoFace,
    Ambiguous { count: usize },
    One(DetectedFace),
}

pub fn select_face(faces: Vec<DetectedFace>, policy: MultiFacePolicy) -> Selection {
    let count = faces.len();
    match (count, policy) {
        (0, _) => Selection::NoFace,
        (1, _) => faces.into_iter().next().map_or(Selection::NoFace, Selection::One),
        (_, MultiFacePolicy::Reject) => Selection::Ambiguous { count },
        (_, MultiFacePolicy::Primary) => {
            let chosen = faces
                .into_iter()
                .enumerate()
                .max_by_key(|(i, face)| {
                    (
                        face.region.area(),
                        Reverse(face.region.top),
                        Reverse(face.region.left),
                        Reverse(*i),
                    )
                })
                .map(|(i, face)| {
                    tracing::debug!(count, chosen = i, region = ?face.region, "primary face selected");
                    face
                });
            chosen.map_or(Selection::NoFace, Selection::One)
        }
    }
}
