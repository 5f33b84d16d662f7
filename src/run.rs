//! One blueprint in, one finished short out.
//!
//! Stages run in a fixed order: blueprint validation, run directory setup,
//! the scene chain, composition, caption overlay, then thumbnail and
//! metadata. A failure in any stage before metadata ends the run with a
//! `PipelineError` naming that stage, and no final video is written.

use crate::api::VideoBackend;
use crate::blueprint::Blueprint;
use crate::captions::CaptionOverlayEngine;
use crate::chain::{ChainOutput, ChainSettings, FrameExtractor, SceneChainGenerator};
use crate::compositor::{Composed, TransitionCompositor};
use crate::config::Config;
use crate::error::{PipelineError, Stage};
use crate::ffmpeg;
use crate::init::{self, RunLayout};
use crate::poller::Sleeper;
use crate::storage::ObjectStore;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

const THUMBNAIL_AT_SECS: f64 = 5.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneRecord {
    pub scene_number: u32,
    pub file: String,
    pub duration_sec: f64,
    pub attempts: u32,
    #[serde(default)]
    pub continuity_frame: Option<String>,
}

/// Contents of `metadata.json`. Paths are relative to the run directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub blueprint_id: String,
    pub timestamp: String,
    pub final_video: String,
    pub thumbnail: Option<String>,
    pub scenes: Vec<SceneRecord>,
    pub duration_sec: f64,
    pub file_size_bytes: u64,
    pub composition: String,
    pub captions_applied: usize,
    pub captions_skipped: usize,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub final_video: PathBuf,
    pub thumbnail: Option<PathBuf>,
    pub metadata: RunMetadata,
}

#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<(PathBuf, Result<RunReport, PipelineError>)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

fn relative_name(path: &Path, root: &Path) -> String {
    pathdiff::diff_paths(path, root)
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

pub struct RunAssembler<'a> {
    config: &'a Config,
    backend: &'a dyn VideoBackend,
    store: &'a dyn ObjectStore,
    frames: &'a dyn FrameExtractor,
    sleeper: &'a dyn Sleeper,
    compositor: TransitionCompositor,
    captions: CaptionOverlayEngine,
}

impl<'a> RunAssembler<'a> {
    pub fn new(
        config: &'a Config,
        backend: &'a dyn VideoBackend,
        store: &'a dyn ObjectStore,
        frames: &'a dyn FrameExtractor,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            frames,
            sleeper,
            compositor: TransitionCompositor::standard(config.composition.clone()),
            captions: CaptionOverlayEngine::new(config.captions.clone()),
        }
    }

    pub fn with_compositor(mut self, compositor: TransitionCompositor) -> Self {
        self.compositor = compositor;
        self
    }

    pub async fn run_file(&self, path: &Path) -> Result<RunReport, PipelineError> {
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("read blueprint {}", path.display()))
            .map_err(|e| PipelineError::new(Stage::Blueprint, e))?;
        let blueprint = Blueprint::from_json(&raw).map_err(|e| PipelineError::new(Stage::Blueprint, e))?;
        self.run_inner(&blueprint, Some(&raw)).await
    }

    pub async fn run(&self, blueprint: &Blueprint) -> Result<RunReport, PipelineError> {
        self.run_inner(blueprint, None).await
    }

    /// Runs each blueprint in turn; a failed run is recorded and the batch
    /// moves on.
    pub async fn run_batch(&self, paths: &[PathBuf]) -> BatchReport {
        let mut outcomes = Vec::with_capacity(paths.len());
        for (i, path) in paths.iter().enumerate() {
            logi(format!("\n=== Batch {}/{}: {} ===", i + 1, paths.len(), path.display()));
            let result = self.run_file(path).await;
            match &result {
                Ok(report) => logok(format!("DONE: {}", report.final_video.display())),
                Err(err) => logw(format!("FAILED: {}: {}", path.display(), err)),
            }
            outcomes.push((path.clone(), result));
        }

        let report = BatchReport { outcomes };
        logi(format!("Batch finished: {} ok, {} failed", report.succeeded(), report.failed()));
        report
    }

    async fn run_inner(&self, blueprint: &Blueprint, raw: Option<&str>) -> Result<RunReport, PipelineError> {
        blueprint.validate().map_err(|e| PipelineError::new(Stage::Blueprint, e))?;

        let started = Utc::now();
        let layout = self
            .setup(blueprint, raw, started)
            .await
            .map_err(|e| PipelineError::new(Stage::Setup, e))?;

        let settings = ChainSettings::from_config(self.config);
        let chain = SceneChainGenerator::new(
            self.backend,
            self.store,
            self.frames,
            self.sleeper,
            settings,
            &layout.root,
        );
        let output = chain
            .generate(blueprint)
            .await
            .map_err(|e| PipelineError::new(Stage::SceneChain, e))?;

        let composed = self
            .compositor
            .compose(&output.clips, &layout.composed_video(), &layout.temp())
            .await
            .map_err(|e| PipelineError::new(Stage::Composition, e))?;

        let overlay = self
            .captions
            .apply(&composed.path, &blueprint.caption_overlay, &layout.final_video(), &layout.temp())
            .await
            .map_err(|e| PipelineError::new(Stage::Overlay, e))?;

        if let Err(err) = init::clear_directory_contents(&layout.temp()).await {
            logw(format!("Could not clear {}: {:#}", layout.temp().display(), err));
        }

        let thumbnail = match ffmpeg::ffmpeg_make_thumbnail(&overlay.path, THUMBNAIL_AT_SECS, &layout.thumbnail()).await
        {
            Ok(true) => Some(layout.thumbnail()),
            _ => None,
        };

        let metadata = self
            .write_metadata(
                &layout,
                blueprint,
                started,
                &output,
                &composed,
                thumbnail.as_deref(),
                overlay.placements.len(),
                overlay.skipped,
            )
            .await
            .map_err(|e| PipelineError::new(Stage::Metadata, e))?;

        logok(format!(
            "Run {} finished: {} ({:.2}s, {} bytes)",
            metadata.run_id,
            overlay.path.display(),
            metadata.duration_sec,
            metadata.file_size_bytes
        ));

        Ok(RunReport {
            run_dir: layout.root.clone(),
            final_video: overlay.path,
            thumbnail,
            metadata,
        })
    }

    async fn setup(&self, blueprint: &Blueprint, raw: Option<&str>, at: chrono::DateTime<Utc>) -> Result<RunLayout> {
        let runs_dir = self.config.runs_dir();
        fs::create_dir_all(&runs_dir)
            .await
            .with_context(|| format!("create {}", runs_dir.display()))?;
        let layout = RunLayout::create(&runs_dir, &blueprint.id, at).await?;

        let body = match raw {
            Some(text) => text.to_string(),
            None => serde_json::to_string_pretty(blueprint)?,
        };
        fs::write(layout.blueprint_copy(), body)
            .await
            .with_context(|| format!("write {}", layout.blueprint_copy().display()))?;
        Ok(layout)
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_metadata(
        &self,
        layout: &RunLayout,
        blueprint: &Blueprint,
        started: chrono::DateTime<Utc>,
        output: &ChainOutput,
        composed: &Composed,
        thumbnail: Option<&Path>,
        captions_applied: usize,
        captions_skipped: usize,
    ) -> Result<RunMetadata> {
        let final_video = layout.final_video();
        let file_size_bytes = fs::metadata(&final_video)
            .await
            .with_context(|| format!("stat {}", final_video.display()))?
            .len();

        let scenes = output
            .clips
            .iter()
            .zip(&output.attempts)
            .map(|(clip, &attempts)| SceneRecord {
                scene_number: clip.scene_number,
                file: relative_name(&clip.path, &layout.root),
                duration_sec: clip.duration,
                attempts,
                continuity_frame: clip.last_frame.as_ref().map(|f| relative_name(&f.path, &layout.root)),
            })
            .collect();

        let metadata = RunMetadata {
            run_id: layout.run_id.clone(),
            blueprint_id: blueprint.id.clone(),
            timestamp: started.to_rfc3339(),
            final_video: relative_name(&final_video, &layout.root),
            thumbnail: thumbnail.map(|p| relative_name(p, &layout.root)),
            scenes,
            duration_sec: composed.timeline.total_duration,
            file_size_bytes,
            composition: composed.strategy.clone(),
            captions_applied,
            captions_skipped,
        };

        let json = serde_json::to_string_pretty(&metadata)?;
        fs::write(layout.metadata(), json)
            .await
            .with_context(|| format!("write {}", layout.metadata().display()))?;
        Ok(metadata)
    }
}
