//! Unit conversions for DVI coordinates.
//!
//! DVI positions are scaled points (sp): 2^16 sp = 1 TeX point, and
//! 72.27 TeX points = 1 inch. Page events are reported in TeX points;
//! backends that work in PostScript (big) points multiply by
//! [`PT_TO_BP`].

/// Scaled points → TeX points.
pub const SP_TO_PT: f64 = 1.0 / 65536.0;

/// TeX points → PostScript points (72 bp = 72.27 pt).
pub const PT_TO_BP: f64 = 72.0 / 72.27;

/// Scaled points → PostScript points.
pub const SP_TO_BP: f64 = SP_TO_PT * PT_TO_BP;

/// Convert a scaled-point coordinate to TeX points.
#[must_use]
pub fn sp_to_pt(v: i64) -> f64 {
    v as f64 * SP_TO_PT
}
