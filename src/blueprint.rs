use crate::captions::StylePreset;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

const DURATION_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub video_spec: Option<VideoSpec>,
    #[serde(default)]
    pub script: Vec<ScriptSegment>,
    pub scene_breakdown: Vec<SceneDescriptor>,
    #[serde(default)]
    pub caption_overlay: Vec<CaptionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSpec {
    pub duration_sec: f64,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSegment {
    pub t_start: f64,
    pub t_end: f64,
    #[serde(default = "default_speaker")]
    pub speaker: String,
    #[serde(default)]
    pub line: String,
    /// Visual cue shown while the line is spoken.
    #[serde(default)]
    pub broll_cue: String,
    #[serde(default)]
    pub on_screen_text: String,
}

fn default_speaker() -> String {
    "host".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneType {
    Initial,
    Continuation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub scene_number: u32,
    pub duration_sec: f64,
    pub scene_type: SceneType,
    pub prompt_text: String,
    #[serde(default)]
    pub continuity_notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub t_start: f64,
    pub t_end: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub emphasis_tokens: Vec<String>,
    /// Explicit preset; otherwise chosen from the emphasis tokens.
    #[serde(default)]
    pub style: Option<StylePreset>,
}

impl CaptionRecord {
    pub fn duration(&self) -> f64 {
        self.t_end - self.t_start
    }
}

impl Blueprint {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse blueprint JSON")
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read blueprint: {}", path.as_ref().display()))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            anyhow::bail!("blueprint: id missing");
        }
        if self.scene_breakdown.is_empty() {
            anyhow::bail!("blueprint {}: scene_breakdown is empty", self.id);
        }

        for (idx, scene) in self.scene_breakdown.iter().enumerate() {
            let expected = idx as u32 + 1;
            if scene.scene_number != expected {
                anyhow::bail!(
                    "blueprint {}: scene numbers must be contiguous from 1 (found {} at position {})",
                    self.id,
                    scene.scene_number,
                    expected
                );
            }
            if scene.duration_sec <= 0.0 {
                anyhow::bail!(
                    "blueprint {}: scene {} has non-positive duration",
                    self.id,
                    scene.scene_number
                );
            }
        }

        let mut prev_end = f64::NEG_INFINITY;
        for (idx, seg) in self.script.iter().enumerate() {
            if seg.t_end < seg.t_start {
                anyhow::bail!("blueprint {}: script segment {} ends before it starts", self.id, idx + 1);
            }
            if seg.t_start < prev_end {
                anyhow::bail!(
                    "blueprint {}: script segment {} overlaps or precedes the previous one",
                    self.id,
                    idx + 1
                );
            }
            prev_end = seg.t_end;
        }

        if let Some(spec) = &self.video_spec {
            let total = self.total_duration();
            if (total - spec.duration_sec).abs() > DURATION_TOLERANCE {
                anyhow::bail!(
                    "blueprint {}: scene durations sum to {:.2}s but video_spec says {:.2}s",
                    self.id,
                    total,
                    spec.duration_sec
                );
            }
        }

        Ok(())
    }

    pub fn total_duration(&self) -> f64 {
        self.scene_breakdown.iter().map(|s| s.duration_sec).sum()
    }

    /// Time span `[start, end)` of the scene at `index` (0-based) on the
    /// blueprint's script clock.
    pub fn scene_window(&self, index: usize) -> (f64, f64) {
        let end: f64 = self
            .scene_breakdown
            .iter()
            .take(index + 1)
            .map(|s| s.duration_sec)
            .sum();
        let duration = self
            .scene_breakdown
            .get(index)
            .map(|s| s.duration_sec)
            .unwrap_or(0.0);
        (end - duration, end)
    }

    pub fn segments_in_window(&self, start: f64, end: f64) -> Vec<&ScriptSegment> {
        self.script
            .iter()
            .filter(|seg| seg.t_start >= start && seg.t_start < end)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Five 8-second scenes with one script line per scene.
    pub fn five_scene_blueprint() -> Blueprint {
        let scenes = (1..=5)
            .map(|n| SceneDescriptor {
                scene_number: n,
                duration_sec: 8.0,
                scene_type: if n == 1 { SceneType::Initial } else { SceneType::Continuation },
                prompt_text: format!("Scene {n} visual"),
                continuity_notes: String::new(),
            })
            .collect();
        let script = (0..5)
            .map(|i| ScriptSegment {
                t_start: i as f64 * 8.0 + 1.0,
                t_end: i as f64 * 8.0 + 6.0,
                speaker: "host".into(),
                line: format!("Line {}", i + 1),
                broll_cue: "Pointing At The TV".into(),
                on_screen_text: String::new(),
            })
            .collect();
        Blueprint {
            id: "side-hustle-v1".into(),
            theme: None,
            video_spec: Some(VideoSpec { duration_sec: 40.0, aspect_ratio: Some("9:16".into()) }),
            script,
            scene_breakdown: scenes,
            caption_overlay: vec![],
        }
    }
}
