use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Longest clip Veo 3 produces per request.
pub const BACKEND_MAX_SCENE_SECONDS: f64 = 8.0;

/// Caption font used for both layout and drawtext unless configured.
pub const DEFAULT_FONT_FILE: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project_id: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Overrides the regional Vertex AI host, e.g. for a local mock.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Bucket Veo writes results into. Defaults to `{project_id}-scenes`.
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,

    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub composition: CompositionSettings,
    #[serde(default)]
    pub captions: CaptionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
    pub submit_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 30,
            poll_interval_secs: 15,
            max_poll_attempts: 40,
            submit_timeout_secs: 60,
        }
    }
}

impl GenerationSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionSettings {
    pub crossfade_secs: f64,
    pub nominal_scene_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CompositionSettings {
    fn default() -> Self {
        Self {
            crossfade_secs: 0.5,
            nominal_scene_secs: 8.0,
            width: 1080,
            height: 1920,
            fps: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionSettings {
    pub canvas_width_fraction: f64,
    pub canvas_height_multiple: f64,
    pub vertical_anchor: f64,
    /// Font captions are measured with and drawn in.
    pub font_file: PathBuf,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            canvas_width_fraction: 0.8,
            canvas_height_multiple: 2.0,
            vertical_anchor: 0.85,
            font_file: PathBuf::from(DEFAULT_FONT_FILE),
        }
    }
}

fn default_location() -> String {
    "us-central1".to_string()
}

fn default_model_id() -> String {
    "veo-3.0-generate-001".to_string()
}

fn default_access_token_env() -> String {
    "VEO_ACCESS_TOKEN".to_string()
}

fn default_output_root() -> PathBuf {
    PathBuf::from("generated")
}

fn default_aspect_ratio() -> String {
    "9:16".to_string()
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content).context("config.json: invalid JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_id.is_empty() {
            anyhow::bail!("config.json: project_id missing");
        }
        if self.generation.poll_interval_secs == 0 || self.generation.max_poll_attempts == 0 {
            anyhow::bail!("config.json: polling needs a positive interval and attempt count");
        }
        let c = &self.composition;
        if c.crossfade_secs <= 0.0 || c.crossfade_secs >= c.nominal_scene_secs {
            anyhow::bail!(
                "config.json: crossfade_secs must be in (0, {})",
                c.nominal_scene_secs
            );
        }
        let cap = &self.captions;
        if !(0.0 < cap.canvas_width_fraction && cap.canvas_width_fraction <= 1.0) {
            anyhow::bail!("config.json: canvas_width_fraction must be in (0, 1]");
        }
        if !(0.0..=1.0).contains(&cap.vertical_anchor) {
            anyhow::bail!("config.json: vertical_anchor must be in [0, 1]");
        }
        Ok(())
    }

    pub fn bucket_name(&self) -> String {
        self.bucket
            .clone()
            .unwrap_or_else(|| format!("{}-scenes", self.project_id))
    }

    pub fn api_base(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", self.location))
    }

    pub fn model_path(&self) -> String {
        format!(
            "/v1/projects/{}/locations/{}/publishers/google/models/{}",
            self.project_id, self.location, self.model_id
        )
    }

    /// Reads the bearer token from the configured environment variable.
    pub fn access_token(&self) -> Result<String> {
        let token = std::env::var(&self.access_token_env)
            .with_context(|| format!("{} is not set", self.access_token_env))?;
        if token.trim().is_empty() {
            anyhow::bail!("{} is empty", self.access_token_env);
        }
        Ok(token.trim().to_string())
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.output_root.join("runs")
    }
}
