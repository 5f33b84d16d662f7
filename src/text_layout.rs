//! Line breaking and advance measurement against the font ffmpeg renders with.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use parley::fontique::Blob;
use parley::style::{FontStack, StyleProperty};
use parley::{FontContext, Layout, LayoutContext};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// One broken line and its advance width in pixels, without stroke.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredLine {
    pub text: String,
    pub width: f64,
}

pub trait TextMeasurer: Send + Sync {
    /// Font the renderer must draw with for the measurements to hold.
    fn font_file(&self) -> &Path;

    /// Fails when the font cannot be used at all.
    fn ready(&self) -> Result<()> {
        Ok(())
    }

    /// Breaks `text` at word boundaries so lines fit `max_width` where
    /// possible. A single word wider than `max_width` stays on its own line
    /// and reports its full width.
    fn break_lines(&self, text: &str, font_size: f32, max_width: Option<f32>) -> Result<Vec<MeasuredLine>>;
}

/// Shapes text with parley using the bytes of one font file.
pub struct FontMeasurer {
    path: PathBuf,
    bytes: OnceCell<Vec<u8>>,
}

struct Shaper {
    font_ctx: FontContext,
    layout_ctx: LayoutContext<()>,
    family: String,
}

impl Shaper {
    fn new(font_bytes: &[u8], path: &Path) -> Result<Self> {
        let mut font_ctx = FontContext::default();
        let families = font_ctx
            .collection
            .register_fonts(Blob::from(font_bytes.to_vec()), None);
        let family_id = families
            .first()
            .map(|(id, _)| *id)
            .ok_or_else(|| anyhow::anyhow!("no font families in {}", path.display()))?;
        let family = font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| anyhow::anyhow!("font family in {} has no name", path.display()))?
            .to_string();

        Ok(Self {
            font_ctx,
            layout_ctx: LayoutContext::new(),
            family,
        })
    }

    fn layout(&mut self, text: &str, font_size: f32, max_width: Option<f32>) -> Layout<()> {
        let family = self.family.clone();
        let mut builder = self.layout_ctx.ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(StyleProperty::FontStack(FontStack::Source(Cow::Owned(family))));
        builder.push_default(StyleProperty::FontSize(font_size));

        let mut layout: Layout<()> = builder.build(text);
        layout.break_all_lines(max_width);
        layout
    }
}

fn widest_line(layout: &Layout<()>) -> f64 {
    layout
        .lines()
        .map(|line| f64::from(line.metrics().advance))
        .fold(0.0, f64::max)
}

impl FontMeasurer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bytes: OnceCell::new(),
        }
    }

    fn font_bytes(&self) -> Result<&[u8]> {
        self.bytes
            .get_or_try_init(|| {
                std::fs::read(&self.path).with_context(|| format!("read font {}", self.path.display()))
            })
            .map(Vec::as_slice)
    }
}

impl TextMeasurer for FontMeasurer {
    fn font_file(&self) -> &Path {
        &self.path
    }

    fn ready(&self) -> Result<()> {
        Shaper::new(self.font_bytes()?, &self.path).map(|_| ())
    }

    fn break_lines(&self, text: &str, font_size: f32, max_width: Option<f32>) -> Result<Vec<MeasuredLine>> {
        if !font_size.is_finite() || font_size <= 0.0 {
            anyhow::bail!("font size must be finite and > 0");
        }
        let mut shaper = Shaper::new(self.font_bytes()?, &self.path)?;

        let wrapped = shaper.layout(text, font_size, max_width);
        let mut lines = Vec::new();
        for line in wrapped.lines() {
            let piece = text.get(line.text_range()).unwrap_or_default().trim();
            if piece.is_empty() {
                continue;
            }
            // Trailing spaces at the break count toward the wrapped advance.
            let single = shaper.layout(piece, font_size, None);
            lines.push(MeasuredLine {
                text: piece.to_string(),
                width: widest_line(&single),
            });
        }
        Ok(lines)
    }
}
