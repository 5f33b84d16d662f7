//! Timed caption layers placed so no text leaves the frame.

use crate::blueprint::CaptionRecord;
use crate::config::CaptionSettings;
use crate::error::OverlayError;
use crate::ffmpeg;
use crate::text_layout::{FontMeasurer, TextMeasurer};
use crate::{logi, logok, logw};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;

const LINE_SPACING: f64 = 1.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StylePreset {
    Default,
    Emphasis,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptionStyle {
    pub font_size: u32,
    pub color: &'static str,
    pub stroke_color: &'static str,
    pub stroke_width: u32,
}

impl StylePreset {
    pub const ALL: [StylePreset; 3] = [StylePreset::Default, StylePreset::Emphasis, StylePreset::Large];

    pub fn style(self) -> CaptionStyle {
        match self {
            StylePreset::Default => CaptionStyle {
                font_size: 48,
                color: "white",
                stroke_color: "black",
                stroke_width: 2,
            },
            StylePreset::Emphasis => CaptionStyle {
                font_size: 52,
                color: "0xFFD700",
                stroke_color: "black",
                stroke_width: 3,
            },
            StylePreset::Large => CaptionStyle {
                font_size: 56,
                color: "white",
                stroke_color: "black",
                stroke_width: 2,
            },
        }
    }

    pub fn for_caption(caption: &CaptionRecord) -> Self {
        if let Some(preset) = caption.style {
            preset
        } else if caption.emphasis_tokens.iter().any(|t| !t.trim().is_empty()) {
            StylePreset::Emphasis
        } else {
            StylePreset::Default
        }
    }
}

fn line_height(style: &CaptionStyle) -> f64 {
    f64::from(style.font_size) * LINE_SPACING + 2.0 * f64::from(style.stroke_width)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionPlacement {
    pub index: usize,
    pub preset: StylePreset,
    pub canvas_width: f64,
    pub canvas_height: f64,
    pub text_width: f64,
    pub text_height: f64,
    pub x: f64,
    pub y: f64,
    pub start: f64,
    pub end: f64,
    pub lines: Vec<PlacedLine>,
}

pub struct CaptionOverlayEngine {
    settings: CaptionSettings,
    measurer: Box<dyn TextMeasurer>,
}

#[derive(Debug, Clone)]
pub struct OverlayOutcome {
    pub path: PathBuf,
    pub placements: Vec<CaptionPlacement>,
    pub skipped: usize,
}

impl CaptionOverlayEngine {
    pub fn new(settings: CaptionSettings) -> Self {
        let measurer = FontMeasurer::new(settings.font_file.clone());
        Self::with_measurer(settings, Box::new(measurer))
    }

    pub fn with_measurer(settings: CaptionSettings, measurer: Box<dyn TextMeasurer>) -> Self {
        Self { settings, measurer }
    }

    /// `Ok(None)` for captions that are skipped by rule (blank text or
    /// non-positive duration); `Err` when the caption cannot fit the frame.
    pub fn place(
        &self,
        index: usize,
        caption: &CaptionRecord,
        video_width: u32,
        video_height: u32,
    ) -> Result<Option<CaptionPlacement>, OverlayError> {
        if !is_renderable(caption) {
            return Ok(None);
        }
        let text = caption.text.trim();

        let preset = StylePreset::for_caption(caption);
        let style = preset.style();
        let (vw, vh) = (f64::from(video_width), f64::from(video_height));

        let canvas_width = (vw * self.settings.canvas_width_fraction).floor();
        if canvas_width < 1.0 {
            return Err(OverlayError::Layer { index, reason: "video too narrow for captions".into() });
        }

        // The stroke extends past the glyph advance on both sides.
        let stroke = 2.0 * f64::from(style.stroke_width);
        let wrap_width = canvas_width - stroke;
        if wrap_width < 1.0 {
            return Err(OverlayError::Layer { index, reason: "caption canvas narrower than the text stroke".into() });
        }

        let wrapped = self
            .measurer
            .break_lines(text, style.font_size as f32, Some(wrap_width as f32))
            .map_err(|e| OverlayError::Layer { index, reason: format!("{:#}", e) })?;
        if wrapped.is_empty() {
            return Ok(None);
        }
        if let Some(wide) = wrapped.iter().find(|l| l.width + stroke > canvas_width) {
            return Err(OverlayError::Layer {
                index,
                reason: format!(
                    "'{}' is {:.0}px wide but the caption canvas is {:.0}px",
                    wide.text,
                    wide.width + stroke,
                    canvas_width
                ),
            });
        }

        let line_height = line_height(&style);
        let line_widths: Vec<f64> = wrapped.iter().map(|l| l.width + stroke).collect();

        let text_width = line_widths.iter().cloned().fold(0.0, f64::max);
        let text_height = line_height * wrapped.len() as f64;
        if text_height > vh {
            return Err(OverlayError::Layer {
                index,
                reason: format!("{} wrapped lines need {:.0}px but the frame is {:.0}px tall", wrapped.len(), text_height, vh),
            });
        }
        let canvas_height = (f64::from(style.font_size) * self.settings.canvas_height_multiple).max(text_height);

        let x = ((vw - text_width) / 2.0).max(0.0);
        let max_y = vh - text_height;
        let y = (vh * self.settings.vertical_anchor - text_height / 2.0).clamp(0.0, max_y);

        let lines = wrapped
            .into_iter()
            .zip(line_widths)
            .enumerate()
            .map(|(i, (line, width))| PlacedLine {
                text: line.text,
                x: x + (text_width - width) / 2.0,
                y: y + line_height * i as f64,
            })
            .collect();

        Ok(Some(CaptionPlacement {
            index,
            preset,
            canvas_width,
            canvas_height,
            text_width,
            text_height,
            x,
            y,
            start: caption.t_start,
            end: caption.t_end,
            lines,
        }))
    }

    /// Placements for every usable caption plus the number skipped.
    pub fn plan(&self, captions: &[CaptionRecord], video_width: u32, video_height: u32) -> (Vec<CaptionPlacement>, usize) {
        let mut placements = Vec::new();
        let mut skipped = 0;

        for (index, caption) in captions.iter().enumerate() {
            match self.place(index, caption, video_width, video_height) {
                Ok(Some(p)) => {
                    logi(format!(
                        "Caption {}: '{}' {:.2}-{:.2}s at ({:.0}, {:.0}) box {:.0}x{:.0}",
                        index + 1,
                        caption.text.trim(),
                        p.start,
                        p.end,
                        p.x,
                        p.y,
                        p.text_width,
                        p.text_height
                    ));
                    placements.push(p);
                }
                Ok(None) => {
                    logi(format!("Caption {} skipped (blank text or no duration)", index + 1));
                    skipped += 1;
                }
                Err(err) => {
                    logw(err.to_string());
                    skipped += 1;
                }
            }
        }

        (placements, skipped)
    }

    /// drawtext positions the glyph box; the border is drawn around it, so
    /// the box sits one stroke width inside the placed line.
    fn drawtext(&self, line: &PlacedLine, placement: &CaptionPlacement, textfile: &Path) -> String {
        let style = placement.preset.style();
        let stroke = i64::from(style.stroke_width);
        format!(
            "drawtext=textfile='{}':expansion=none:fontfile='{}':fontsize={}:fontcolor={}:borderw={}:bordercolor={}:x={}:y={}:enable='between(t,{:.3},{:.3})'",
            escape_filter_path(textfile),
            escape_filter_path(self.measurer.font_file()),
            style.font_size,
            style.color,
            style.stroke_width,
            style.stroke_color,
            line.x.floor() as i64 + stroke,
            line.y.floor() as i64 + stroke,
            placement.start,
            placement.end
        )
    }

    /// Burns every usable caption into `input`, writing `output`.
    pub async fn apply(
        &self,
        input: &Path,
        captions: &[CaptionRecord],
        output: &Path,
        work_dir: &Path,
    ) -> Result<OverlayOutcome, OverlayError> {
        let (planned, mut skipped) = if captions.iter().any(is_renderable) {
            self.measurer
                .ready()
                .map_err(|e| OverlayError::Render(format!("caption font: {:#}", e)))?;
            let (w, h) = ffmpeg::ffprobe_video_dimensions(input)
                .await
                .map_err(|e| OverlayError::Render(format!("{:#}", e)))?;
            self.plan(captions, w, h)
        } else {
            (Vec::new(), captions.len())
        };

        if !planned.is_empty() {
            fs::create_dir_all(work_dir)
                .await
                .map_err(|e| OverlayError::Render(format!("create {}: {}", work_dir.display(), e)))?;
        }

        let mut textfiles: Vec<NamedTempFile> = Vec::new();
        let mut layers: Vec<String> = Vec::new();
        let mut placements = Vec::new();

        for placement in planned {
            match self.prepare_layers(&placement, work_dir) {
                Ok((files, filters)) => {
                    textfiles.extend(files);
                    layers.extend(filters);
                    placements.push(placement);
                }
                Err(err) => {
                    logw(err.to_string());
                    skipped += 1;
                }
            }
        }

        if layers.is_empty() {
            logw("No caption layers to draw; keeping the composed video as final.");
            fs::copy(input, output)
                .await
                .map_err(|e| OverlayError::Render(format!("copy {}: {}", input.display(), e)))?;
            return Ok(OverlayOutcome { path: output.to_path_buf(), placements, skipped });
        }

        ffmpeg::ffmpeg_apply_video_filter(input, &layers.join(","), output)
            .await
            .map_err(|e| OverlayError::Render(format!("{:#}", e)))?;
        drop(textfiles);

        logok(format!(
            "Captions applied: {} drawn, {} skipped -> {}",
            placements.len(),
            skipped,
            output.display()
        ));
        Ok(OverlayOutcome { path: output.to_path_buf(), placements, skipped })
    }

    fn prepare_layers(
        &self,
        placement: &CaptionPlacement,
        work_dir: &Path,
    ) -> Result<(Vec<NamedTempFile>, Vec<String>), OverlayError> {
        let layer_err = |reason: String| OverlayError::Layer { index: placement.index, reason };
        let mut files = Vec::with_capacity(placement.lines.len());
        let mut filters = Vec::with_capacity(placement.lines.len());

        for line in &placement.lines {
            let mut file = tempfile::Builder::new()
                .prefix("caption_")
                .suffix(".txt")
                .tempfile_in(work_dir)
                .map_err(|e| layer_err(format!("text file: {}", e)))?;
            file.write_all(line.text.as_bytes())
                .map_err(|e| layer_err(format!("text file write: {}", e)))?;
            filters.push(self.drawtext(line, placement, file.path()));
            files.push(file);
        }

        Ok((files, filters))
    }
}

fn is_renderable(caption: &CaptionRecord) -> bool {
    !caption.text.trim().is_empty() && caption.duration() > 0.0
}

fn escape_filter_path(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}
