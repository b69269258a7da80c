// ============================================================================
// LETTERBOX: aspect-preserving fit of a source image into a target canvas
// ============================================================================

/// Placement of a scaled source inside a target canvas.
///
/// `ratio` is the uniform scale `min(target_w / src_w, target_h / src_h)`.
/// The offsets are the exact (fractional) centering offsets; [`Letterbox::origin`]
/// gives the integer pixel the scaled image is drawn at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub ratio: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub draw_width: u32,
    pub draw_height: u32,
    target_width: u32,
    target_height: u32,
}

impl Letterbox {
    /// Fit `src_w × src_h` into `target_w × target_h`. Returns `None` when any
    /// dimension is zero.
    pub fn fit(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> Option<Self> {
        if src_w == 0 || src_h == 0 || target_w == 0 || target_h == 0 {
            return None;
        }

        let (sw, sh) = (src_w as f64, src_h as f64);
        let (tw, th) = (target_w as f64, target_h as f64);
        let ratio = (tw / sw).min(th / sh);

        let scaled_w = sw * ratio;
        let scaled_h = sh * ratio;

        Some(Self {
            ratio,
            offset_x: (tw - scaled_w) / 2.0,
            offset_y: (th - scaled_h) / 2.0,
            draw_width: (scaled_w.round() as u32).clamp(1, target_w),
            draw_height: (scaled_h.round() as u32).clamp(1, target_h),
            target_width: target_w,
            target_height: target_h,
        })
    }

    /// Top-left pixel of the draw rectangle.
    ///
    /// Computed from the rounded draw size so float noise in `ratio` can never
    /// shift the image by a pixel.
    pub fn origin(&self) -> (i64, i64) {
        (
            (self.target_width - self.draw_width) as i64 / 2,
            (self.target_height - self.draw_height) as i64 / 2,
        )
    }
}
