// ============================================================================
// FLOOD FILL: tolerance-bounded, 4-connected region fill with line protection
// ============================================================================

use image::Rgb;

use crate::canvas::PixelBuffer;

/// Default per-channel tolerance for a fill.
pub const DEFAULT_TOLERANCE: u8 = 40;

/// A seed whose R, G and B are all below this value sits on a line stroke.
pub const DEFAULT_LINE_THRESHOLD: u8 = 80;

/// One fill request. Coordinates are buffer-space and may be out of range;
/// the fill rejects them instead of the caller clamping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillRequest {
    pub seed_x: i32,
    pub seed_y: i32,
    pub fill_color: Rgb<u8>,
    pub tolerance: u8,
    pub line_threshold: u8,
}

impl FillRequest {
    pub fn new(seed_x: i32, seed_y: i32, fill_color: Rgb<u8>) -> Self {
        Self {
            seed_x,
            seed_y,
            fill_color,
            tolerance: DEFAULT_TOLERANCE,
            line_threshold: DEFAULT_LINE_THRESHOLD,
        }
    }

    pub fn with_tolerance(mut self, tolerance: u8) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_line_threshold(mut self, line_threshold: u8) -> Self {
        self.line_threshold = line_threshold;
        self
    }
}

/// Result of a fill. Only `Filled` mutates the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// Seed outside `[0, width) × [0, height)`.
    OutOfBounds,
    /// Seed on a dark outline stroke.
    HitLine,
    /// Region recoloured; `pixels` counts the pixels written.
    Filled { pixels: usize },
}

impl FillOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, FillOutcome::Filled { .. })
    }
}

/// Per-fill scratch bitmap, one flag per buffer pixel.
pub struct VisitedMask {
    width: usize,
    bits: Vec<bool>,
}

impl VisitedMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as usize,
            bits: vec![false; width as usize * height as usize],
        }
    }

    /// Mark `(x, y)` visited. Returns `false` if it already was.
    #[inline]
    pub fn visit(&mut self, x: u32, y: u32) -> bool {
        let idx = y as usize * self.width + x as usize;
        !std::mem::replace(&mut self.bits[idx], true)
    }

    pub fn is_visited(&self, x: u32, y: u32) -> bool {
        self.bits[y as usize * self.width + x as usize]
    }
}

/// Per-channel (Chebyshev) colour match: every channel within `tolerance`,
/// inclusive.
#[inline]
pub fn within_tolerance(current: Rgb<u8>, start: Rgb<u8>, tolerance: u8) -> bool {
    let tol = tolerance as i16;
    current
        .0
        .iter()
        .zip(start.0.iter())
        .all(|(&c, &s)| (c as i16 - s as i16).abs() <= tol)
}

/// True when every channel is strictly below `threshold`.
#[inline]
pub fn is_line_pixel(color: Rgb<u8>, threshold: u8) -> bool {
    color.0.iter().all(|&c| c < threshold)
}

/// Recolour the 4-connected region around the seed whose pixels are within
/// `tolerance` of the seed's original colour.
///
/// Iterative DFS on an explicit `Vec` stack. Neighbours are pushed without
/// checks; bounds and the visited flag are tested on pop. A popped in-bounds
/// pixel is marked visited before the colour test, so rejected boundary pixels
/// are never re-examined. The buffer is mutated in place; exporting a
/// snapshot afterwards is the caller's job.
pub fn fill(buffer: &mut PixelBuffer, request: &FillRequest) -> FillOutcome {
    let width = buffer.width();
    let height = buffer.height();

    if !in_bounds(request.seed_x, request.seed_y, width, height) {
        return FillOutcome::OutOfBounds;
    }

    let start = buffer.rgb_at(request.seed_x as u32, request.seed_y as u32);
    if is_line_pixel(start, request.line_threshold) {
        return FillOutcome::HitLine;
    }

    let mut visited = VisitedMask::new(width, height);
    let mut stack: Vec<(i32, i32)> = Vec::with_capacity(4096);
    stack.push((request.seed_x, request.seed_y));
    let mut filled = 0usize;

    while let Some((x, y)) = stack.pop() {
        if !in_bounds(x, y, width, height) {
            continue;
        }
        let (ux, uy) = (x as u32, y as u32);
        if !visited.visit(ux, uy) {
            continue;
        }

        if !within_tolerance(buffer.rgb_at(ux, uy), start, request.tolerance) {
            continue;
        }

        buffer.set_rgb_opaque(ux, uy, request.fill_color);
        filled += 1;

        stack.push((x + 1, y));
        stack.push((x - 1, y));
        stack.push((x, y + 1));
        stack.push((x, y - 1));
    }

    FillOutcome::Filled { pixels: filled }
}

#[inline]
fn in_bounds(x: i32, y: i32, width: u32, height: u32) -> bool {
    x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height
}
