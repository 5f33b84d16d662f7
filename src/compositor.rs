//! Merging an ordered clip list into one video.
//!
//! Strategies are tried in order and the first success wins, so crossfading
//! falls back to a plain join without any special casing.

use crate::chain::Clip;
use crate::config::CompositionSettings;
use crate::error::CompositionError;
use crate::ffmpeg;
use crate::timeline::Timeline;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct Composed {
    pub path: PathBuf,
    pub strategy: String,
    pub timeline: Timeline,
}

#[async_trait]
pub trait CompositionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn accepts(&self, clip_count: usize) -> bool;

    /// Writes the composed video to `output`, using `work_dir` for
    /// intermediates it removes again before returning.
    async fn compose(&self, clips: &[Clip], output: &Path, work_dir: &Path) -> Result<Timeline>;
}

async fn probe_durations(paths: &[PathBuf], nominal: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(paths.len());
    for (path, &fallback) in paths.iter().zip(nominal) {
        match ffmpeg::ffprobe_duration_seconds(path).await {
            Ok(d) => out.push(d),
            Err(err) => {
                logw(format!(
                    "Duration probe failed for {} ({:#}); assuming {:.2}s",
                    path.display(),
                    err,
                    fallback
                ));
                out.push(fallback);
            }
        }
    }
    out
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path).await;
    }
}

/// A single clip is copied through untouched.
pub struct PassThrough;

#[async_trait]
impl CompositionStrategy for PassThrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn accepts(&self, clip_count: usize) -> bool {
        clip_count == 1
    }

    async fn compose(&self, clips: &[Clip], output: &Path, _work_dir: &Path) -> Result<Timeline> {
        let clip = &clips[0];
        fs::copy(&clip.path, output)
            .await
            .with_context(|| format!("copy {} -> {}", clip.path.display(), output.display()))?;
        Ok(Timeline::concatenated(&[clip.duration]))
    }
}

/// Normalizes every clip, then renders synchronized xfade/acrossfade chains.
pub struct Crossfade {
    pub settings: CompositionSettings,
}

#[async_trait]
impl CompositionStrategy for Crossfade {
    fn name(&self) -> &'static str {
        "crossfade"
    }

    fn accepts(&self, clip_count: usize) -> bool {
        clip_count >= 2
    }

    async fn compose(&self, clips: &[Clip], output: &Path, work_dir: &Path) -> Result<Timeline> {
        let s = &self.settings;
        let mut normalized = Vec::with_capacity(clips.len());

        let result = async {
            for (i, clip) in clips.iter().enumerate() {
                let dest = work_dir.join(format!("normalized_{}.mp4", i));
                normalized.push(dest.clone());
                ffmpeg::ffmpeg_normalize_clip(&clip.path, &dest, s.width, s.height, s.fps)
                    .await
                    .with_context(|| format!("normalize scene {}", clip.scene_number))?;
            }
            logok(format!("Normalized {} clips to {}x{} @ {}fps", clips.len(), s.width, s.height, s.fps));

            let nominal: Vec<f64> = clips.iter().map(|c| c.duration).collect();
            let durations = probe_durations(&normalized, &nominal).await;
            let timeline = Timeline::crossfaded(&durations, s.crossfade_secs)?;
            for t in &timeline.transitions {
                logi(format!(
                    "Crossfade {}: offset {:.3}s, {:.3}s long, composed {:.3}s",
                    t.after + 1,
                    t.offset,
                    t.duration,
                    t.cumulative
                ));
            }

            ffmpeg::ffmpeg_render_filter_graph(&normalized, &timeline.filter_graph(), output).await?;
            Ok::<Timeline, anyhow::Error>(timeline)
        }
        .await;

        remove_files(&normalized).await;
        result
    }
}

/// Concat demuxer with stream copy.
pub struct Concat;

#[async_trait]
impl CompositionStrategy for Concat {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn accepts(&self, clip_count: usize) -> bool {
        clip_count >= 1
    }

    async fn compose(&self, clips: &[Clip], output: &Path, work_dir: &Path) -> Result<Timeline> {
        let paths: Vec<PathBuf> = clips.iter().map(|c| c.path.clone()).collect();
        let list = work_dir.join("scenes_concat.txt");
        ffmpeg::write_concat_list(&paths, &list).await?;

        let result = ffmpeg::ffmpeg_concat_copy(&list, output).await;
        let _ = fs::remove_file(&list).await;
        result?;

        let nominal: Vec<f64> = clips.iter().map(|c| c.duration).collect();
        Ok(Timeline::concatenated(&probe_durations(&paths, &nominal).await))
    }
}

pub struct TransitionCompositor {
    strategies: Vec<Box<dyn CompositionStrategy>>,
}

impl TransitionCompositor {
    pub fn new(strategies: Vec<Box<dyn CompositionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Pass-through, then crossfade, then concatenation.
    pub fn standard(settings: CompositionSettings) -> Self {
        Self::new(vec![
            Box::new(PassThrough),
            Box::new(Crossfade { settings }),
            Box::new(Concat),
        ])
    }

    pub async fn compose(&self, clips: &[Clip], output: &Path, work_dir: &Path) -> Result<Composed, CompositionError> {
        let mut failures = Vec::new();

        if let Some(parent) = output.parent() {
            if let Err(err) = fs::create_dir_all(parent).await {
                failures.push(("setup".to_string(), err.to_string()));
                return Err(CompositionError { failures });
            }
        }
        if let Err(err) = fs::create_dir_all(work_dir).await {
            failures.push(("setup".to_string(), err.to_string()));
            return Err(CompositionError { failures });
        }

        for strategy in self.strategies.iter().filter(|s| s.accepts(clips.len())) {
            logi(format!("Composing {} clips with {}", clips.len(), strategy.name()));
            match strategy.compose(clips, output, work_dir).await {
                Ok(timeline) => {
                    logok(format!(
                        "{} composed {} ({:.2}s)",
                        strategy.name(),
                        output.display(),
                        timeline.total_duration
                    ));
                    return Ok(Composed {
                        path: output.to_path_buf(),
                        strategy: strategy.name().to_string(),
                        timeline,
                    });
                }
                Err(err) => {
                    logw(format!("{} failed: {:#}; trying next strategy", strategy.name(), err));
                    failures.push((strategy.name().to_string(), format!("{:#}", err)));
                }
            }
        }

        Err(CompositionError { failures })
    }
}
