//! Error taxonomy for the generation and assembly pipeline.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The backend rejected or never received a generation request.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("request could not be sent: {0}")]
    Network(String),

    #[error("authentication failed (HTTP {status})")]
    Auth { status: u16 },

    #[error("request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("response carried no operation name")]
    MissingOperation,
}

/// An operation did not yield a usable asset.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("operation still pending after {attempts} polls ({waited:?})")]
    TimedOut { attempts: u32, waited: Duration },

    #[error("operation finished without a video asset")]
    EmptyResult,

    #[error("operation failed: {0}")]
    Failed(String),
}

/// One attempt at one scene went wrong.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("download of {uri} failed: {reason}")]
    Download { uri: String, reason: String },
}

/// A scene exhausted its retry budget; the chain is unusable.
#[derive(Debug, Error)]
#[error("scene {scene_number} failed after {attempts} attempts: {last_error}")]
pub struct ChainGenerationError {
    pub scene_number: u32,
    pub attempts: u32,
    #[source]
    pub last_error: SceneError,
}

/// Every composition strategy failed.
#[derive(Debug, Error)]
pub struct CompositionError {
    pub failures: Vec<(String, String)>,
}

impl fmt::Display for CompositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no composition strategy accepted the clips");
        }
        write!(f, "all composition strategies failed")?;
        for (strategy, reason) in &self.failures {
            write!(f, "; {strategy}: {reason}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("caption {index} skipped: {reason}")]
    Layer { index: usize, reason: String },

    #[error("caption render failed: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Blueprint,
    Setup,
    SceneChain,
    Composition,
    Overlay,
    Metadata,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Blueprint => "blueprint",
            Stage::Setup => "setup",
            Stage::SceneChain => "scene chain",
            Stage::Composition => "composition",
            Stage::Overlay => "caption overlay",
            Stage::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

/// A run stopped at `stage`.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: anyhow::Error,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    /// Scene number and attempt count when the chain aborted.
    pub fn chain_failure(&self) -> Option<(u32, u32)> {
        self.source
            .downcast_ref::<ChainGenerationError>()
            .map(|e| (e.scene_number, e.attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_failure_reports_scene_and_attempts() {
        let err = PipelineError::new(
            Stage::SceneChain,
            ChainGenerationError {
                scene_number: 3,
                attempts: 4,
                last_error: SceneError::Poll(PollError::EmptyResult),
            },
        );
        let text = err.to_string();
        assert!(text.starts_with("scene chain stage failed"));
        assert!(text.contains("scene 3 failed after 4 attempts"));
        assert_eq!(err.chain_failure(), Some((3, 4)));
    }

    #[test]
    fn composition_error_lists_each_strategy() {
        let err = CompositionError {
            failures: vec![
                ("crossfade".into(), "xfade exited 1".into()),
                ("concat".into(), "missing input".into()),
            ],
        };
        assert_eq!(
            err.to_string(),
            "all composition strategies failed; crossfade: xfade exited 1; concat: missing input"
        );
    }
}
