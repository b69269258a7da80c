use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, ImageEncoder, ImageError, ImageFormat, Rgb, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::ops::letterbox::Letterbox;

/// Background every page is composed on before the line art is drawn.
pub const PAGE_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

// ============================================================================
// ERRORS
// ============================================================================

/// Loading a page into a buffer failed. The page shows a placeholder.
#[derive(Debug)]
pub enum ImageLoadError {
    /// The source could not be read (missing file, unreachable locator).
    Fetch(std::io::Error),
    /// The bytes are not a decodable raster image.
    Decode(ImageError),
    /// The source decoded to a zero-sized image.
    EmptySource,
    /// Requested canvas has a zero dimension.
    InvalidTarget { width: u32, height: u32 },
    /// Page has neither line art nor a saved snapshot.
    MissingSource,
}

impl std::fmt::Display for ImageLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageLoadError::Fetch(e) => write!(f, "could not fetch image: {}", e),
            ImageLoadError::Decode(e) => write!(f, "could not decode image: {}", e),
            ImageLoadError::EmptySource => write!(f, "image has no pixels"),
            ImageLoadError::InvalidTarget { width, height } => {
                write!(f, "invalid canvas size {}x{}", width, height)
            }
            ImageLoadError::MissingSource => write!(f, "page has no line art"),
        }
    }
}

impl std::error::Error for ImageLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImageLoadError::Fetch(e) => Some(e),
            ImageLoadError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ImageLoadError {
    fn from(e: std::io::Error) -> Self {
        ImageLoadError::Fetch(e)
    }
}

impl From<ImageError> for ImageLoadError {
    fn from(e: ImageError) -> Self {
        ImageLoadError::Decode(e)
    }
}

/// Snapshot export failed. Callers keep their previous snapshot.
#[derive(Debug)]
pub enum EncodeError {
    /// No page has been loaded into the buffer yet.
    Uninitialized,
    /// The buffer holds pixels from a source that forbids read-back.
    Tainted,
    Png(ImageError),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::Uninitialized => write!(f, "canvas is not initialized"),
            EncodeError::Tainted => write!(f, "canvas is tainted by a cross-origin source"),
            EncodeError::Png(e) => write!(f, "PNG encode error: {}", e),
        }
    }
}

impl std::error::Error for EncodeError {}

impl From<ImageError> for EncodeError {
    fn from(e: ImageError) -> Self {
        EncodeError::Png(e)
    }
}

// ============================================================================
// PIXEL BUFFER
// ============================================================================

/// RGBA8 raster holding one page's current coloured state.
///
/// Backed by an [`RgbaImage`], so the byte length is always `width × height × 4`.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    image: RgbaImage,
    tainted: bool,
}

impl Default for PixelBuffer {
    fn default() -> Self {
        Self::from_rgba(RgbaImage::new(0, 0))
    }
}

impl PixelBuffer {
    /// Opaque white buffer.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::from_rgba(RgbaImage::from_pixel(width, height, PAGE_BACKGROUND))
    }

    pub fn from_rgba(image: RgbaImage) -> Self {
        Self {
            image,
            tainted: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// A 0×0 buffer has never had a page drawn into it.
    pub fn is_initialized(&self) -> bool {
        self.image.width() > 0 && self.image.height() > 0
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    /// RGB of an in-bounds pixel. Panics if `(x, y)` is outside the buffer.
    #[inline]
    pub fn rgb_at(&self, x: u32, y: u32) -> Rgb<u8> {
        let p = self.image.get_pixel(x, y).0;
        Rgb([p[0], p[1], p[2]])
    }

    /// Overwrite RGB and force alpha to 255.
    #[inline]
    pub fn set_rgb_opaque(&mut self, x: u32, y: u32, color: Rgb<u8>) {
        let [r, g, b] = color.0;
        self.image.put_pixel(x, y, Rgba([r, g, b, 255]));
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    fn force_opaque(&mut self) {
        for p in self.image.pixels_mut() {
            p.0[3] = 255;
        }
    }
}

/// A decoded line-art source. `tainted` marks sources whose pixels may be
/// shown but never read back (cross-origin images).
#[derive(Clone, Debug)]
pub struct LineArt {
    pub image: RgbaImage,
    pub tainted: bool,
}

impl LineArt {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            tainted: false,
        }
    }

    pub fn tainted(image: RgbaImage) -> Self {
        Self {
            image,
            tainted: true,
        }
    }
}

// ============================================================================
// LOAD / LETTERBOX
// ============================================================================

/// Compose a line-art source onto a fresh white `target_width × target_height`
/// buffer: uniform scale `min(tw/sw, th/sh)`, centred on both axes.
pub fn load_source(
    source: &LineArt,
    target_width: u32,
    target_height: u32,
) -> Result<PixelBuffer, ImageLoadError> {
    let mut buffer = letterbox_into(&source.image, target_width, target_height)?;
    buffer.tainted = source.tainted;
    Ok(buffer)
}

/// Decode a previously exported snapshot into a buffer, preserving the
/// colouring it captured. A snapshot of a different size is letterboxed like
/// a source.
pub fn load_from_snapshot(
    snapshot: &CanvasSnapshot,
    target_width: u32,
    target_height: u32,
) -> Result<PixelBuffer, ImageLoadError> {
    let decoded = snapshot.decode()?;
    if decoded.dimensions() == (target_width, target_height) {
        let mut buffer = PixelBuffer::from_rgba(decoded);
        buffer.force_opaque();
        return Ok(buffer);
    }
    letterbox_into(&decoded, target_width, target_height)
}

fn letterbox_into(
    source: &RgbaImage,
    target_width: u32,
    target_height: u32,
) -> Result<PixelBuffer, ImageLoadError> {
    if target_width == 0 || target_height == 0 {
        return Err(ImageLoadError::InvalidTarget {
            width: target_width,
            height: target_height,
        });
    }
    let fit = Letterbox::fit(source.width(), source.height(), target_width, target_height)
        .ok_or(ImageLoadError::EmptySource)?;

    let mut canvas = RgbaImage::from_pixel(target_width, target_height, PAGE_BACKGROUND);
    let (x, y) = fit.origin();
    if (fit.draw_width, fit.draw_height) == source.dimensions() {
        imageops::overlay(&mut canvas, source, x, y);
    } else {
        let scaled = imageops::resize(
            source,
            fit.draw_width,
            fit.draw_height,
            FilterType::Triangle,
        );
        imageops::overlay(&mut canvas, &scaled, x, y);
    }

    // Translucent line art blends onto white; the result is always opaque.
    let mut buffer = PixelBuffer::from_rgba(canvas);
    buffer.force_opaque();
    Ok(buffer)
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// PNG-encoded image of a full buffer at one point in time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    png: Vec<u8>,
}

impl std::fmt::Debug for CanvasSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CanvasSnapshot({} bytes)", self.png.len())
    }
}

impl CanvasSnapshot {
    /// Wrap PNG bytes produced elsewhere. Not validated until decoded.
    pub fn from_png_bytes(png: Vec<u8>) -> Self {
        Self { png }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn len(&self) -> usize {
        self.png.len()
    }

    pub fn is_empty(&self) -> bool {
        self.png.is_empty()
    }

    pub fn decode(&self) -> Result<RgbaImage, ImageError> {
        Ok(image::load_from_memory_with_format(&self.png, ImageFormat::Png)?.to_rgba8())
    }

    /// Downscaled copy for page-strip display. Never upscales.
    pub fn thumbnail(&self, max_edge: u32) -> Result<RgbaImage, ImageLoadError> {
        let full = self.decode()?;
        let (w, h) = full.dimensions();
        let longest = w.max(h);
        if longest == 0 {
            return Err(ImageLoadError::EmptySource);
        }
        if max_edge == 0 || longest <= max_edge {
            return Ok(full);
        }
        let scale = max_edge as f64 / longest as f64;
        let tw = ((w as f64 * scale).round() as u32).max(1);
        let th = ((h as f64 * scale).round() as u32).max(1);
        Ok(imageops::resize(&full, tw, th, FilterType::Triangle))
    }
}

/// Encode the buffer as a PNG snapshot.
pub fn export_snapshot(buffer: &PixelBuffer) -> Result<CanvasSnapshot, EncodeError> {
    if !buffer.is_initialized() {
        return Err(EncodeError::Uninitialized);
    }
    if buffer.is_tainted() {
        return Err(EncodeError::Tainted);
    }

    let mut png = Vec::with_capacity(buffer.as_raw().len() / 8);
    PngEncoder::new(&mut png).write_image(
        buffer.as_raw(),
        buffer.width(),
        buffer.height(),
        ColorType::Rgba8,
    )?;
    Ok(CanvasSnapshot { png })
}

// ============================================================================
// POINTER MAPPING
// ============================================================================

/// On-screen rectangle the canvas element is displayed in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl DisplayRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Rect showing the buffer 1:1 at the origin.
    pub fn identity(buffer: &PixelBuffer) -> Self {
        Self::new(0.0, 0.0, buffer.width() as f64, buffer.height() as f64)
    }
}

/// Pointer input in screen coordinates.
#[derive(Clone, Debug, PartialEq)]
pub enum PointerEvent {
    Mouse { client_x: f64, client_y: f64 },
    /// Multi-touch gestures are not supported; only the first point counts.
    Touch { points: Vec<(f64, f64)> },
}

impl PointerEvent {
    pub fn primary_point(&self) -> Option<(f64, f64)> {
        match self {
            PointerEvent::Mouse { client_x, client_y } => Some((*client_x, *client_y)),
            PointerEvent::Touch { points } => points.first().copied(),
        }
    }
}

/// Buffer coordinate that no buffer contains; produced for non-finite input.
pub const OFF_CANVAS: i32 = i32::MIN;

/// Map screen coordinates to buffer pixels:
/// `x = floor((client_x - left) / width * buffer_width)`, likewise for y.
///
/// No clamping: out-of-range results are legal and rejected by the fill.
pub fn map_pointer_to_buffer(
    client_x: f64,
    client_y: f64,
    rect: &DisplayRect,
    buffer: &PixelBuffer,
) -> (i32, i32) {
    (
        map_axis(client_x, rect.left, rect.width, buffer.width()),
        map_axis(client_y, rect.top, rect.height, buffer.height()),
    )
}

fn map_axis(client: f64, start: f64, extent: f64, size: u32) -> i32 {
    let v = ((client - start) / extent * size as f64).floor();
    if v.is_finite() {
        // `as` saturates; huge values stay out of bounds.
        v as i32
    } else {
        OFF_CANVAS
    }
}
