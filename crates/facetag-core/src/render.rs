//! Overlay rendering: face boxes with a name bar underneath the face.

use crate::types::Detection;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const LABEL_HEIGHT: u32 = 35;
const LABEL_PAD_X: i32 = 6;
const TEXT_SCALE: f32 = 24.0;

/// Fonts tried by [`LabelFont::discover`], in order.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to read font {path}: {source}")]
    FontRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a usable TrueType/OpenType font")]
    InvalidFont(PathBuf),
}

/// Font used for name labels.
pub struct LabelFont {
    font: FontVec,
    path: PathBuf,
}

impl LabelFont {
    pub fn load(path: &Path) -> Result<Self, RenderError> {
        let bytes = std::fs::read(path).map_err(|source| RenderError::FontRead {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes).map_err(|_| RenderError::InvalidFont(path.to_path_buf()))?;
        Ok(Self {
            font,
            path: path.to_path_buf(),
        })
    }

    /// First loadable font from a list of common system locations.
    pub fn discover() -> Option<Self> {
        let found = FONT_CANDIDATES
            .iter()
            .map(Path::new)
            .filter(|p| p.exists())
            .find_map(|p| Self::load(p).ok());
        match &found {
            Some(font) => tracing::debug!(path = %font.path.display(), "using label font"),
            None => tracing::warn!("no label font found; overlays will show boxes without names"),
        }
        found
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Draw every detection onto `frame`.
///
/// Each face gets a box and a filled bar along the inside of its bottom edge
/// carrying the label. Text is skipped when no font is available.
pub fn draw(frame: &mut RgbImage, detections: &[Detection], font: Option<&LabelFont>) {
    let (fw, fh) = frame.dimensions();

    for det in detections {
        let rect = det.bbox.to_rect(fw, fh);
        let (w, h) = (rect.width(), rect.height());
        if w == 0 || h == 0 {
            continue;
        }
        let color = if det.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR };

        for inset in 0..BOX_THICKNESS.min(w / 2).min(h / 2) {
            let outline = Rect::at((rect.left + inset) as i32, (rect.top + inset) as i32)
                .of_size(w - 2 * inset, h - 2 * inset);
            draw_hollow_rect_mut(frame, outline, color);
        }

        let bar_h = LABEL_HEIGHT.min(h);
        let bar_top = rect.bottom - bar_h;
        draw_filled_rect_mut(frame, Rect::at(rect.left as i32, bar_top as i32).of_size(w, bar_h), color);

        if let Some(font) = font {
            let text_y = bar_top as i32 + (bar_h as i32 - TEXT_SCALE as i32) / 2;
            draw_text_mut(
                frame,
                TEXT_COLOR,
                rect.left as i32 + LABEL_PAD_X,
                text_y,
                PxScale::from(TEXT_SCALE),
                &font.font,
                det.label(),
            );
        }
    }
}

/// One-line summary of a frame: the distinct known names, or a miss.
pub fn status_line(detections: &[Detection]) -> String {
    let mut names: Vec<&str> = Vec::new();
    for det in detections.iter().filter(|d| d.is_known()) {
        if !names.contains(&det.label()) {
            names.push(det.label());
        }
    }

    if names.is_empty() {
        "No known faces".to_string()
    } else {
        format!("Detected: {}", names.join(", "))
    }
}
