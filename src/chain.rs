//! Sequential, frame-continuous generation of every scene in a blueprint.

use crate::api::{ContinuityImage, VideoBackend};
use crate::blueprint::Blueprint;
use crate::config::{BACKEND_MAX_SCENE_SECONDS, Config};
use crate::error::{ChainGenerationError, SceneError};
use crate::ffmpeg;
use crate::poller::{OperationPoller, PollPolicy, Sleeper};
use crate::storage::ObjectStore;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub use crate::api::SceneRequest;

const SPEAKING_DIRECTION: &str = "The video should show the person speaking these words naturally with appropriate facial expressions and body language.";

/// Last image of a scene, ready to seed the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuityFrame {
    pub path: PathBuf,
    pub base64_data: String,
    pub mime_type: String,
}

impl ContinuityFrame {
    pub fn to_image(&self) -> ContinuityImage {
        ContinuityImage {
            base64_data: self.base64_data.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Clip {
    pub scene_number: u32,
    pub path: PathBuf,
    pub duration: f64,
    pub last_frame: Option<ContinuityFrame>,
}

#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub clips: Vec<Clip>,
    /// Attempts spent per scene, in scene order.
    pub attempts: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneState {
    Pending,
    Submitted,
    Polling,
    Succeeded,
    Failed,
    Retry,
    Aborted,
}

impl fmt::Display for SceneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SceneState::Pending => "pending",
            SceneState::Submitted => "submitted",
            SceneState::Polling => "polling",
            SceneState::Succeeded => "succeeded",
            SceneState::Failed => "failed",
            SceneState::Retry => "retry",
            SceneState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract_last_frame(&self, clip: &Path, dest: &Path) -> Result<ContinuityFrame>;
}

/// `ffmpeg -sseof -1` to a JPEG, then base64 for the request body.
pub struct FfmpegFrameExtractor;

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract_last_frame(&self, clip: &Path, dest: &Path) -> Result<ContinuityFrame> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        ffmpeg::ffmpeg_extract_last_frame(clip, dest).await?;
        let bytes = fs::read(dest)
            .await
            .with_context(|| format!("read frame: {}", dest.display()))?;
        if bytes.is_empty() {
            anyhow::bail!("extracted frame {} is empty", dest.display());
        }
        Ok(ContinuityFrame {
            path: dest.to_path_buf(),
            base64_data: STANDARD.encode(&bytes),
            mime_type: "image/jpeg".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub poll: PollPolicy,
    pub aspect_ratio: String,
}

impl ChainSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_retries: cfg.generation.max_retries,
            retry_delay: cfg.generation.retry_delay(),
            poll: PollPolicy {
                interval: cfg.generation.poll_interval(),
                max_attempts: cfg.generation.max_poll_attempts,
            },
            aspect_ratio: cfg.aspect_ratio.clone(),
        }
    }
}

/// Request for the scene at `index`: its visual prompt plus every script
/// line starting inside the scene's time window.
pub fn build_request(
    blueprint: &Blueprint,
    index: usize,
    aspect_ratio: &str,
    continuity: Option<ContinuityImage>,
) -> SceneRequest {
    let scene = &blueprint.scene_breakdown[index];
    let (start, end) = blueprint.scene_window(index);

    let dialogue: Vec<String> = blueprint
        .segments_in_window(start, end)
        .into_iter()
        .map(|seg| {
            let cue = seg.broll_cue.trim();
            if cue.is_empty() {
                format!("The {} says: \"{}\"", seg.speaker, seg.line)
            } else {
                format!("The {} says: \"{}\" while {}", seg.speaker, seg.line, cue.to_lowercase())
            }
        })
        .collect();

    let prompt = if dialogue.is_empty() {
        scene.prompt_text.clone()
    } else {
        format!("{} {} {}", scene.prompt_text, dialogue.join(" "), SPEAKING_DIRECTION)
    };

    let duration_secs = scene.duration_sec.min(BACKEND_MAX_SCENE_SECONDS).round().max(1.0) as u32;

    SceneRequest {
        scene_number: scene.scene_number,
        prompt,
        duration_secs,
        aspect_ratio: aspect_ratio.to_string(),
        continuity,
    }
}

pub struct SceneChainGenerator<'a> {
    backend: &'a dyn VideoBackend,
    store: &'a dyn ObjectStore,
    frames: &'a dyn FrameExtractor,
    sleeper: &'a dyn Sleeper,
    settings: ChainSettings,
    scenes_dir: PathBuf,
    frames_dir: PathBuf,
}

impl<'a> SceneChainGenerator<'a> {
    pub fn new(
        backend: &'a dyn VideoBackend,
        store: &'a dyn ObjectStore,
        frames: &'a dyn FrameExtractor,
        sleeper: &'a dyn Sleeper,
        settings: ChainSettings,
        run_dir: &Path,
    ) -> Self {
        Self {
            backend,
            store,
            frames,
            sleeper,
            settings,
            scenes_dir: run_dir.join("scenes"),
            frames_dir: run_dir.join("frames"),
        }
    }

    fn transition(&self, scene_number: u32, state: SceneState, detail: &str) {
        let line = if detail.is_empty() {
            format!("Scene {}: {}", scene_number, state)
        } else {
            format!("Scene {}: {} ({})", scene_number, state, detail)
        };
        match state {
            SceneState::Failed | SceneState::Retry | SceneState::Aborted => logw(line),
            SceneState::Succeeded => logok(line),
            _ => logi(line),
        }
    }

    /// Generates every scene in order. Any scene that exhausts its retries
    /// aborts the whole chain; no partial clip list comes back.
    pub async fn generate(&self, blueprint: &Blueprint) -> Result<ChainOutput, ChainGenerationError> {
        let total = blueprint.scene_breakdown.len();
        logi(format!(
            "Chain for {}: {} scenes, {} script lines",
            blueprint.id,
            total,
            blueprint.script.len()
        ));

        let mut clips: Vec<Clip> = Vec::with_capacity(total);
        let mut attempts = Vec::with_capacity(total);

        for index in 0..total {
            let scene_number = blueprint.scene_breakdown[index].scene_number;
            let continuity = clips
                .last()
                .and_then(|prev| prev.last_frame.as_ref())
                .map(ContinuityFrame::to_image);
            let request = build_request(blueprint, index, &self.settings.aspect_ratio, continuity);
            let dest = self.scenes_dir.join(format!("scene_{:02}.mp4", scene_number));

            self.transition(
                scene_number,
                SceneState::Pending,
                &format!(
                    "{}/{}, {}s, continuity {}",
                    index + 1,
                    total,
                    request.duration_secs,
                    if request.continuity.is_some() { "yes" } else { "no" }
                ),
            );

            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match self.attempt_scene(&request, &dest).await {
                    Ok(()) => break,
                    Err(err) => {
                        self.transition(scene_number, SceneState::Failed, &err.to_string());
                        if attempt > self.settings.max_retries {
                            self.transition(
                                scene_number,
                                SceneState::Aborted,
                                &format!("{} attempts used", attempt),
                            );
                            return Err(ChainGenerationError {
                                scene_number,
                                attempts: attempt,
                                last_error: err,
                            });
                        }
                        self.transition(
                            scene_number,
                            SceneState::Retry,
                            &format!("{}/{} in {:?}", attempt, self.settings.max_retries, self.settings.retry_delay),
                        );
                        self.sleeper.sleep(self.settings.retry_delay).await;
                    }
                }
            }
            self.transition(scene_number, SceneState::Succeeded, &dest.display().to_string());
            attempts.push(attempt);

            let last_frame = if index + 1 < total {
                let frame_path = self.frames_dir.join(format!("scene_{:02}_last_frame.jpg", scene_number));
                match self.frames.extract_last_frame(&dest, &frame_path).await {
                    Ok(frame) => {
                        logok(format!("Last frame of scene {} ready for scene {}", scene_number, scene_number + 1));
                        Some(frame)
                    }
                    Err(err) => {
                        logw(format!(
                            "Frame extraction failed for scene {} ({:#}); next scene runs without continuity",
                            scene_number, err
                        ));
                        None
                    }
                }
            } else {
                None
            };

            clips.push(Clip {
                scene_number,
                path: dest,
                duration: f64::from(request.duration_secs),
                last_frame,
            });
        }

        logok(format!("Chain complete: {} clips", clips.len()));
        Ok(ChainOutput { clips, attempts })
    }

    async fn attempt_scene(&self, request: &SceneRequest, dest: &Path) -> Result<(), SceneError> {
        let handle = self.backend.submit(request).await?;
        self.transition(request.scene_number, SceneState::Submitted, &handle.name);

        self.transition(request.scene_number, SceneState::Polling, "");
        let poller = OperationPoller::new(self.backend, self.sleeper, self.settings.poll);
        let uri = poller.wait(handle).await?;

        self.store
            .download(&uri, dest)
            .await
            .map_err(|e| SceneError::Download { uri: uri.clone(), reason: format!("{:#}", e) })?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::blueprint::fixtures::five_scene_blueprint;
    use crate::error::PollError;
    use crate::poller::testing::RecordingSleeper;

    #[test]
    fn request_merges_only_lines_inside_the_window() {
        let bp = five_scene_blueprint();
        let req = build_request(&bp, 1, "9:16", None);
        assert_eq!(req.scene_number, 2);
        assert_eq!(req.duration_secs, 8);
        assert!(req.prompt.starts_with("Scene 2 visual The host says: \"Line 2\" while pointing at the tv"));
        assert!(req.prompt.ends_with(SPEAKING_DIRECTION));
        assert!(!req.prompt.contains("Line 1"));
        assert!(!req.prompt.contains("Line 3"));
    }

    #[test]
    fn request_without_dialogue_uses_visual_prompt_and_caps_duration() {
        let mut bp = five_scene_blueprint();
        bp.script.clear();
        bp.scene_breakdown[0].duration_sec = 12.0;
        let req = build_request(&bp, 0, "16:9", None);
        assert_eq!(req.prompt, "Scene 1 visual");
        assert_eq!(req.duration_secs, 8);
        assert_eq!(req.aspect_ratio, "16:9");
    }

    #[tokio::test]
    async fn five_scenes_chain_in_order_with_continuity() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::default();
        let frames = FakeFrames::default();
        let sleeper = RecordingSleeper::default();
        let chain = SceneChainGenerator::new(&backend, &FakeStore, &frames, &sleeper, settings(), dir.path());

        let out = chain.generate(&five_scene_blueprint()).await.unwrap();

        let numbers: Vec<u32> = out.clips.iter().map(|c| c.scene_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(out.attempts, vec![1; 5]);
        assert!(out.clips[0].path.ends_with("scenes/scene_01.mp4"));
        assert_eq!(fs::read_to_string(&out.clips[4].path).await.unwrap(), "mem://scene-5");
        assert!(out.clips[4].last_frame.is_none());

        let requests = backend.requests();
        assert!(requests[0].continuity.is_none());
        for (k, req) in requests.iter().enumerate().skip(1) {
            let expected = STANDARD.encode(format!("frame-of-scene_{:02}", k));
            assert_eq!(req.continuity.as_ref().unwrap().base64_data, expected);
        }
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn failed_extraction_drops_continuity_for_next_scene_only() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::default();
        let frames = FakeFrames { fail_for: Some(2) };
        let sleeper = RecordingSleeper::default();
        let chain = SceneChainGenerator::new(&backend, &FakeStore, &frames, &sleeper, settings(), dir.path());

        let out = chain.generate(&five_scene_blueprint()).await.unwrap();
        assert_eq!(out.clips.len(), 5);

        let with_image: Vec<bool> = backend.requests().iter().map(|r| r.continuity.is_some()).collect();
        assert_eq!(with_image, vec![false, true, false, true, true]);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_after_fixed_delay() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::default();
        backend.fail_times(2, vec![Fault::Submit, Fault::Empty]);
        let frames = FakeFrames::default();
        let sleeper = RecordingSleeper::default();
        let chain = SceneChainGenerator::new(&backend, &FakeStore, &frames, &sleeper, settings(), dir.path());

        let out = chain.generate(&five_scene_blueprint()).await.unwrap();
        assert_eq!(out.attempts, vec![1, 3, 1, 1, 1]);
        assert_eq!(backend.submissions_for(2), 3);
        assert_eq!(sleeper.recorded(), vec![Duration::from_secs(30); 2]);

        let scene2: Vec<SceneRequest> = backend.requests().into_iter().filter(|r| r.scene_number == 2).collect();
        assert!(scene2.iter().all(|r| r.continuity.is_some()));
    }

    #[tokio::test]
    async fn exhausted_scene_aborts_whole_chain() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::default();
        backend.always_fail(3);
        let frames = FakeFrames::default();
        let sleeper = RecordingSleeper::default();
        let chain = SceneChainGenerator::new(&backend, &FakeStore, &frames, &sleeper, settings(), dir.path());

        let err = chain.generate(&five_scene_blueprint()).await.unwrap_err();
        assert_eq!(err.scene_number, 3);
        assert_eq!(err.attempts, 4);
        assert_eq!(backend.submissions_for(3), 4);
        assert_eq!(backend.submissions_for(4), 0);
        assert_eq!(backend.submissions_for(5), 0);
        assert_eq!(sleeper.recorded().len(), 3);
        assert!(!dir.path().join("scenes/scene_04.mp4").exists());
    }

    #[tokio::test]
    async fn empty_results_exhaust_like_failures() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::default();
        backend.fail_times(1, vec![Fault::Empty; 4]);
        let frames = FakeFrames::default();
        let sleeper = RecordingSleeper::default();
        let chain = SceneChainGenerator::new(&backend, &FakeStore, &frames, &sleeper, settings(), dir.path());

        let err = chain.generate(&five_scene_blueprint()).await.unwrap_err();
        assert_eq!(err.scene_number, 1);
        assert!(matches!(err.last_error, SceneError::Poll(PollError::EmptyResult)));
        assert_eq!(backend.submissions_for(2), 0);
    }
}
