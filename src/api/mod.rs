//! Boundary types shared by every generative video backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SubmissionError;

pub mod veo;

/// Image handed to the backend so the next scene continues from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuityImage {
    pub base64_data: String,
    pub mime_type: String,
}

/// Everything one scene submission needs. Built fresh per attempt.
#[derive(Debug, Clone)]
pub struct SceneRequest {
    pub scene_number: u32,
    pub prompt: String,
    pub duration_secs: u32,
    pub aspect_ratio: String,
    pub continuity: Option<ContinuityImage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    /// Finished; `asset_uri` is `None` when the backend produced nothing usable.
    Done { asset_uri: Option<String> },
    Failed(String),
}

#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn submit(&self, request: &SceneRequest) -> Result<OperationHandle, SubmissionError>;

    /// `Err` means the status could not be fetched this time (transport
    /// trouble); the poller keeps going. Backend-reported failures come back
    /// as `OperationStatus::Failed`.
    async fn fetch_status(&self, handle: &OperationHandle) -> anyhow::Result<OperationStatus>;
}
