//! Embedding provider backed by an external executable.
//!
//! The executable receives the normalized PNG on stdin and prints JSON on
//! stdout:
//!
//! ```json
//! {"faces": [{"region": {"left": 10, "top": 12, "right": 90, "bottom": 96},
//!             "embedding": [0.013, -0.092, ...]}]}
//! ```
//!
//! Faces must be listed in detection order. Embeddings must have the
//! configured dimension and be comparable by Euclidean distance.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use rollcall_core::{DetectedFace, EmbeddingProvider, FaceRegion, NormalizedImage, ProviderError};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::Config;
use crate::error::ConfigError;

#[derive(Deserialize)]
struct EmbedderOutput {
    faces: Vec<EmbedderFace>,
}

#[derive(Deserialize)]
struct EmbedderFace {
    region: FaceRegion,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct CommandEmbeddingProvider {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    dimension: usize,
}

impl CommandEmbeddingProvider {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration, dimension: usize) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            dimension,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let program = config
            .embedder_command
            .clone()
            .ok_or(ConfigError::MissingEmbedder)?;
        Ok(Self::new(
            program,
            config.embedder_args.clone(),
            config.embedder_timeout(),
            config.embedding_dimension,
        ))
    }

    async fn run(&self, png: &[u8]) -> Result<Vec<u8>, ProviderError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Unavailable(format!("{}: {e}", self.program.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Unavailable("embedder stdin not captured".into()))?;

        let feed = async move {
            let result = stdin.write_all(png).await;
            drop(stdin);
            match result {
                // The embedder may exit without draining stdin; its exit
                // status decides the outcome.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Failed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    fn parse(&self, stdout: &[u8]) -> Result<Vec<DetectedFace>, ProviderError> {
        let output: EmbedderOutput = serde_json::from_slice(stdout)
            .map_err(|e| ProviderError::MalformedOutput(e.to_string()))?;

        output
            .faces
            .into_iter()
            .map(|face| {
                if face.embedding.len() != self.dimension {
                    return Err(ProviderError::Dimension {
                        expected: self.dimension,
                        actual: face.embedding.len(),
                    });
                }
                if face.embedding.iter().any(|v| !v.is_finite()) {
                    return Err(ProviderError::MalformedOutput(
                        "embedding contains non-finite values".into(),
                    ));
                }
                Ok(DetectedFace {
                    region: face.region,
                    embedding: face.embedding.into(),
                })
            })
            .collect()
    }
}

impl EmbeddingProvider for CommandEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn extract(&self, image: &NormalizedImage) -> Result<Vec<DetectedFace>, ProviderError> {
        let stdout = tokio::time::timeout(self.timeout, self.run(&image.png))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;
        let faces = self.parse(&stdout)?;
        tracing::debug!(
            program = %self.program.display(),
            faces = faces.len(),
            width = image.width,
            height = image.height,
            "embedder finished"
        );
        Ok(faces)
    }
}
