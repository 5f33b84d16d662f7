use crate::logw;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

const STDERR_TAIL_CHARS: usize = 600;

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let output = cmd.output().await.context("Command execution failed")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let start = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(0);
        return Err(anyhow::anyhow!(
            "{} failed ({}): {}",
            args[0],
            output.status,
            &stderr[start..]
        ));
    }

    Ok(())
}

pub async fn ffprobe_video_dimensions(path: &Path) -> Result<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe execution failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    parse_dimensions(&text).ok_or_else(|| anyhow::anyhow!("Invalid dimensions: {:?}", text))
}

fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let mut parts = text.lines().next()?.split('x');
    let w = parts.next()?.trim().parse::<u32>().ok()?;
    let h = parts.next()?.trim().parse::<u32>().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.1 {
        return Err(anyhow::anyhow!("Invalid duration"));
    }
    Ok(duration)
}

/// Grabs the frame one second before the end of `video` as a JPEG.
pub async fn ffmpeg_extract_last_frame(video: &Path, out_jpg: &Path) -> Result<()> {
    let mut args = strings(&["ffmpeg", "-y", "-hide_banner", "-loglevel", "error", "-sseof", "-1", "-i"]);
    args.push(video.display().to_string());
    args.extend(strings(&["-vframes", "1", "-update", "1", "-q:v", "2"]));
    args.push(out_jpg.display().to_string());

    run_cmd(&args).await?;
    if fs::metadata(out_jpg).await.is_err() {
        anyhow::bail!("no frame written to {}", out_jpg.display());
    }
    Ok(())
}

/// Re-encodes a clip to a common size, frame rate and pixel format so xfade
/// accepts it.
pub async fn ffmpeg_normalize_clip(
    in_mp4: &Path,
    out_mp4: &Path,
    width: u32,
    height: u32,
    fps: u32,
) -> Result<()> {
    let filter = format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black,setsar=1",
        w = width,
        h = height
    );

    let mut args = strings(&["ffmpeg", "-y", "-hide_banner", "-loglevel", "error", "-i"]);
    args.push(in_mp4.display().to_string());
    args.extend(strings(&["-vf"]));
    args.push(filter);
    args.extend(strings(&["-r"]));
    args.push(fps.to_string());
    args.extend(strings(&[
        "-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset", "veryfast", "-crf", "20", "-c:a", "aac",
        "-ar", "48000", "-ac", "2", "-b:a", "192k",
    ]));
    args.push(out_mp4.display().to_string());

    run_cmd(&args).await
}

/// Writes an ffmpeg concat demuxer list for `clips`.
pub async fn write_concat_list(clips: &[PathBuf], list_txt: &Path) -> Result<()> {
    let mut body = String::new();
    for clip in clips {
        let abs = if clip.is_absolute() {
            clip.clone()
        } else {
            std::env::current_dir()
                .context("current dir unavailable")?
                .join(clip)
        };
        let escaped = abs.display().to_string().replace('\'', "'\\''");
        body.push_str(&format!("file '{}'\n", escaped));
    }
    fs::write(list_txt, body)
        .await
        .with_context(|| format!("write concat list: {}", list_txt.display()))
}

pub async fn ffmpeg_concat_copy(list_txt: &Path, out_mp4: &Path) -> Result<()> {
    let mut args = strings(&[
        "ffmpeg", "-y", "-hide_banner", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i",
    ]);
    args.push(list_txt.display().to_string());
    args.extend(strings(&["-c", "copy", "-movflags", "+faststart"]));
    args.push(out_mp4.display().to_string());

    run_cmd(&args).await?;
    if fs::metadata(out_mp4).await.is_err() {
        anyhow::bail!("concat produced no file at {}", out_mp4.display());
    }
    Ok(())
}

/// Runs one filter graph over several inputs, mapping `[v]` and `[a]`.
pub async fn ffmpeg_render_filter_graph(inputs: &[PathBuf], filter_complex: &str, out_mp4: &Path) -> Result<()> {
    let mut args = strings(&["ffmpeg", "-y", "-hide_banner", "-loglevel", "error"]);
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.display().to_string());
    }
    args.push("-filter_complex".to_string());
    args.push(filter_complex.to_string());
    args.extend(strings(&[
        "-map", "[v]", "-map", "[a]", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset", "fast", "-crf",
        "18", "-c:a", "aac", "-b:a", "192k", "-movflags", "+faststart",
    ]));
    args.push(out_mp4.display().to_string());

    run_cmd(&args).await?;
    if fs::metadata(out_mp4).await.is_err() {
        anyhow::bail!("filter graph produced no file at {}", out_mp4.display());
    }
    Ok(())
}

/// Applies a video-only filter chain, copying the audio stream.
pub async fn ffmpeg_apply_video_filter(in_mp4: &Path, filter: &str, out_mp4: &Path) -> Result<()> {
    let mut args = strings(&["ffmpeg", "-y", "-hide_banner", "-loglevel", "error", "-i"]);
    args.push(in_mp4.display().to_string());
    args.push("-vf".to_string());
    args.push(filter.to_string());
    args.extend(strings(&[
        "-map", "0:v", "-map", "0:a?", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset", "veryfast",
        "-crf", "20", "-c:a", "copy", "-movflags", "+faststart",
    ]));
    args.push(out_mp4.display().to_string());

    run_cmd(&args).await?;
    if fs::metadata(out_mp4).await.is_err() {
        anyhow::bail!("filter produced no file at {}", out_mp4.display());
    }
    Ok(())
}

/// Best-effort still from `at_secs` into the video.
pub async fn ffmpeg_make_thumbnail(video: &Path, at_secs: f64, out_jpg: &Path) -> Result<bool> {
    let mut args = strings(&["ffmpeg", "-y", "-hide_banner", "-loglevel", "error", "-ss"]);
    args.push(format!("{:.3}", at_secs));
    args.push("-i".to_string());
    args.push(video.display().to_string());
    args.extend(strings(&["-frames:v", "1"]));
    args.push(out_jpg.display().to_string());

    if let Err(err) = run_cmd(&args).await {
        logw(format!("Thumbnail failed: {:#}", err));
        return Ok(false);
    }
    Ok(out_jpg.exists())
}
