use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

static SLUG_JUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_-]+").unwrap());

const RUN_SUBDIRS: &[&str] = &["scenes", "frames", "finals", "temp"];

/// Lowercase, filesystem-safe form of a blueprint id.
pub fn slugify(id: &str) -> String {
    let lowered = id.trim().to_lowercase();
    let slug = SLUG_JUNK.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "blueprint".to_string()
    } else {
        slug.to_string()
    }
}

pub fn run_id(blueprint_id: &str, at: DateTime<Utc>) -> String {
    format!("run_{}_{}", at.format("%Y%m%d_%H%M%S"), slugify(blueprint_id))
}

/// Directory tree owned by one run.
#[derive(Debug, Clone)]
pub struct RunLayout {
    pub run_id: String,
    pub root: PathBuf,
}

impl RunLayout {
    pub fn scenes(&self) -> PathBuf {
        self.root.join("scenes")
    }

    pub fn frames(&self) -> PathBuf {
        self.root.join("frames")
    }

    pub fn finals(&self) -> PathBuf {
        self.root.join("finals")
    }

    pub fn temp(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn composed_video(&self) -> PathBuf {
        self.finals().join("composed.mp4")
    }

    pub fn final_video(&self) -> PathBuf {
        self.finals().join("final_video.mp4")
    }

    pub fn thumbnail(&self) -> PathBuf {
        self.finals().join("final_video.jpg")
    }

    pub fn blueprint_copy(&self) -> PathBuf {
        self.root.join("blueprint.json")
    }

    pub fn metadata(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    /// Creates a fresh run directory under `runs_dir`. A second run of the
    /// same blueprint within one second gets a numeric suffix.
    pub async fn create(runs_dir: &Path, blueprint_id: &str, at: DateTime<Utc>) -> Result<Self> {
        let base = run_id(blueprint_id, at);
        let mut run_id = base.clone();
        let mut suffix = 2;
        while fs::metadata(runs_dir.join(&run_id)).await.is_ok() {
            run_id = format!("{}_{}", base, suffix);
            suffix += 1;
        }

        let layout = Self { root: runs_dir.join(&run_id), run_id };
        for sub in RUN_SUBDIRS {
            let dir = layout.root.join(sub);
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
        logi(format!("Run directory: {}", layout.root.display()));
        Ok(layout)
    }
}

/// Empties `dir` without removing it.
pub async fn clear_directory_contents(dir: &Path) -> Result<()> {
    if fs::metadata(dir).await.is_err() {
        return Ok(());
    }

    for entry in WalkDir::new(dir).min_depth(1).contents_first(true) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            fs::remove_dir(path).await.ok();
        } else {
            fs::remove_file(path).await.ok();
        }
    }
    Ok(())
}

pub async fn check_ffmpeg() -> bool {
    let found = match tokio::process::Command::new("ffmpeg").arg("-version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    };
    if found {
        logok("ffmpeg found on PATH");
    } else {
        logw("ffmpeg not found on PATH; composition and captions will fail");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 14, 5, 9).unwrap()
    }

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(slugify("side-hustle-v1"), "side-hustle-v1");
        assert_eq!(slugify("  Side Hustle: $80/day! "), "side-hustle-80-day");
        assert_eq!(slugify("../../etc"), "etc");
        assert_eq!(slugify("???"), "blueprint");
    }

    #[test]
    fn run_id_carries_timestamp_and_slug() {
        assert_eq!(run_id("Side Hustle", at()), "run_20261019_140509_side-hustle");
    }

    #[tokio::test]
    async fn create_builds_subdirs_and_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunLayout::create(dir.path(), "bp", at()).await.unwrap();
        let second = RunLayout::create(dir.path(), "bp", at()).await.unwrap();

        assert_eq!(first.run_id, "run_20261019_140509_bp");
        assert_eq!(second.run_id, "run_20261019_140509_bp_2");
        for sub in RUN_SUBDIRS {
            assert!(first.root.join(sub).is_dir());
        }
        assert_eq!(first.final_video(), first.root.join("finals/final_video.mp4"));
    }

    #[tokio::test]
    async fn clearing_keeps_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("temp");
        fs::create_dir_all(temp.join("nested")).await.unwrap();
        fs::write(temp.join("nested/a.mp4"), b"x").await.unwrap();
        fs::write(temp.join("list.txt"), b"y").await.unwrap();

        clear_directory_contents(&temp).await.unwrap();
        assert!(temp.is_dir());
        assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);
        clear_directory_contents(&dir.path().join("missing")).await.unwrap();
    }
}
