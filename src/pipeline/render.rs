//! First-page rasterization of resume PDFs via Google PDFium.
//!
//! `PdfiumRenderer` is stateless (`Send + Sync`). Each call binds a fresh
//! `Pdfium` instance because the upstream type is `!Send`; the OS caches
//! the dynamic library load.

use std::io::Cursor;

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

/// Resolution used for the image attached to each request.
pub const DEFAULT_RENDER_DPI: u32 = 200;

/// Upper bound on either side of a rendered page.
const MAX_DIMENSION_PX: u32 = 4096;

const POINTS_PER_INCH: f32 = 72.0;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("PDFium library unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("PDF is password protected")]
    Encrypted,

    #[error("Failed to load PDF: {0}")]
    Load(String),

    #[error("PDF has no pages")]
    NoPages,

    #[error("Rendering failed: {0}")]
    Rendering(String),

    #[error("PNG encoding failed: {0}")]
    Encoding(String),
}

/// Turns the first page of a PDF into PNG bytes.
pub trait PageRenderer: Send + Sync {
    fn render_first_page(&self, pdf_bytes: &[u8], dpi: u32) -> Result<Vec<u8>, RenderError>;
}

pub struct PdfiumRenderer;

impl PdfiumRenderer {
    /// Fails fast when the library cannot be located.
    ///
    /// Discovery order: `PDFIUM_DYNAMIC_LIB_PATH`, then the executable's
    /// directory, then system search paths.
    pub fn new() -> Result<Self, RenderError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

fn load_pdfium() -> Result<Pdfium, RenderError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            RenderError::LibraryUnavailable(format!("Failed to load PDFium from {path}: {e}"))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let lib_path =
                Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!(dir = %exe_dir.display(), "Loaded PDFium next to executable");
                return Ok(Pdfium::new(bindings));
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        RenderError::LibraryUnavailable(format!(
            "Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(e: PdfiumError) -> RenderError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        RenderError::Encrypted
    } else {
        RenderError::Load(msg)
    }
}

/// Pixel size for a page, both sides clamped to [1, MAX_DIMENSION_PX]
/// with aspect ratio kept when capping.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render_first_page(&self, pdf_bytes: &[u8], dpi: u32) -> Result<Vec<u8>, RenderError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;

        let pages = document.pages();
        if pages.len() == 0 {
            return Err(RenderError::NoPages);
        }
        let page = pages
            .get(0)
            .map_err(|e| RenderError::Rendering(e.to_string()))?;

        let width_points = page.width().value;
        let height_points = page.height().value;
        let (target_w, target_h) = compute_render_dimensions(width_points, height_points, dpi);

        let uncapped_w = (width_points * dpi as f32 / POINTS_PER_INCH) as u32;
        if target_w < uncapped_w {
            warn!(
                raw_width = uncapped_w,
                capped_width = target_w,
                capped_height = target_h,
                "Page dimensions capped to {MAX_DIMENSION_PX}px",
            );
        }

        let config = PdfRenderConfig::new()
            .set_target_width(target_w as i32)
            .set_maximum_height(target_h as i32);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| RenderError::Rendering(e.to_string()))?;

        let mut cursor = Cursor::new(Vec::new());
        bitmap
            .as_image()
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .map_err(|e| RenderError::Encoding(e.to_string()))?;

        let png_bytes = cursor.into_inner();
        debug!(
            width = target_w,
            height = target_h,
            png_size = png_bytes.len(),
            "Rendered first PDF page"
        );
        Ok(png_bytes)
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Renderer that returns a 1x1 PNG, or fails when built with `failing()`.
pub struct MockPageRenderer {
    fail: bool,
}

impl MockPageRenderer {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Default for MockPageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRenderer for MockPageRenderer {
    fn render_first_page(&self, _pdf_bytes: &[u8], _dpi: u32) -> Result<Vec<u8>, RenderError> {
        if self.fail {
            return Err(RenderError::Load("mock renderer configured to fail".into()));
        }
        Ok(minimal_png())
    }
}

/// Minimal valid 1x1 white pixel PNG.
pub fn minimal_png() -> Vec<u8> {
    vec![
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
        0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1
        0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, // 8-bit RGB
        0xDE, // IHDR CRC
        0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, // IDAT chunk
        0x08, 0xD7, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, // compressed
        0x00, 0x02, 0x00, 0x01, 0xE2, 0x21, 0xBC, 0x33, // IDAT CRC
        0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, // IEND chunk
        0xAE, 0x42, 0x60, 0x82, // IEND CRC
    ]
}
