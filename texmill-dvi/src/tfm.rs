//! TeX font metric (TFM) decoding.
//!
//! A TFM file opens with twelve 16-bit section lengths
//! (`lf lh bc ec nw nh nd ni nl nk ne np`), followed by `lh` 32-bit
//! header words (word 1 is the design size as a 20.12 fixword), one
//! 4-byte char_info record per character in `bc..=ec`, and the width,
//! height and depth tables. Table entries are fixwords scaled into DVI
//! units with Knuth's alpha/beta scheme so that the arithmetic stays in
//! integers of bounded width.

use std::collections::HashMap;

use crate::cursor::{ByteSource, SliceCursor};
use crate::error::{DviError, DviResult};

/// A font definition as decoded from a `fnt_def` opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontDef {
    /// DVI font number.
    pub index: u32,
    /// TFM checksum (unverified; engines disagree about stale files).
    pub checksum: u32,
    /// Scaled (at) size in DVI units.
    pub scaled_size: u32,
    /// Design size in DVI units.
    pub design_size: u32,
    /// Font resource name (area + name).
    pub name: String,
}

/// Per-character extents in DVI units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharDim {
    pub width: i64,
    pub height: i64,
    pub depth: i64,
}

/// Decoded metrics for one font at one scale.
///
/// Immutable after construction; shared as `Arc<FontMetrics>` across
/// every page that references the same font.
#[derive(Debug, Clone)]
pub struct FontMetrics {
    /// Font resource name.
    pub name: String,
    /// DVI font number this font was defined as.
    pub index: u32,
    /// Scaled size from the defining opcode (DVI units).
    pub scale: u32,
    /// Design size from the defining opcode (DVI units).
    pub design: u32,
    /// Point size: design size fixword × (scale / design).
    pub at_size: f64,
    chars: HashMap<u32, CharDim>,
}

impl FontMetrics {
    /// Decode a TFM file scaled by the (scale, design) pair from the
    /// font definition that referenced it.
    ///
    /// # Errors
    ///
    /// [`DviError::TruncatedStream`] when the file is shorter than its
    /// own section lengths claim, [`DviError::InvalidFontMetric`] for
    /// malformed content (bad fixword top byte, out-of-range table
    /// index, header too short, unusable scale).
    pub fn decode(
        bytes: &[u8],
        name: &str,
        index: u32,
        scale: u32,
        design: u32,
    ) -> DviResult<Self> {
        let mut src = SliceCursor::new(bytes);

        let mut lengths = [0u32; 12];
        for slot in &mut lengths {
            *slot = src.read_unsigned(2)?;
        }
        let [_lf, lh, bc, ec, nw, nh, nd, ..] = lengths;

        if lh < 2 {
            return Err(DviError::InvalidFontMetric(format!(
                "header has {lh} words, need at least 2"
            )));
        }
        if design == 0 {
            return Err(DviError::InvalidFontMetric(
                "zero design-size denominator".to_owned(),
            ));
        }
        if ec < bc && !(bc == 1 && ec == 0) {
            return Err(DviError::InvalidFontMetric(format!(
                "character range {bc}..{ec} is inverted"
            )));
        }

        let mut header = Vec::with_capacity(lh as usize);
        for _ in 0..lh {
            header.push(src.read_unsigned(4)?);
        }
        let at_size =
            (f64::from(header[1]) / f64::from(1u32 << 20)) * (f64::from(scale) / f64::from(design));

        let nc = if ec < bc { 0 } else { ec - bc + 1 };
        let char_info = src.read_bytes(4 * nc as usize)?;

        let z = i64::from(scale);
        let widths = scaled_table(&mut src, nw as usize, z)?;
        let heights = scaled_table(&mut src, nh as usize, z)?;
        let depths = scaled_table(&mut src, nd as usize, z)?;

        let mut chars = HashMap::with_capacity(nc as usize);
        for (i, record) in char_info.chunks_exact(4).enumerate() {
            let width_ix = record[0] as usize;
            let height_ix = ((record[1] & 0xF0) >> 4) as usize;
            let depth_ix = (record[1] & 0x0F) as usize;
            let dim = CharDim {
                width: table_entry(&widths, width_ix, "width")?,
                height: table_entry(&heights, height_ix, "height")?,
                depth: table_entry(&depths, depth_ix, "depth")?,
            };
            chars.insert(bc + i as u32, dim);
        }

        Ok(Self {
            name: name.to_owned(),
            index,
            scale,
            design,
            at_size,
            chars,
        })
    }

    /// Build metrics from already-decoded parts (for consumers deriving
    /// metrics from sources other than TFM files, and for tests).
    #[must_use]
    pub fn from_parts(
        name: &str,
        index: u32,
        at_size: f64,
        chars: HashMap<u32, CharDim>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            index,
            scale: 0,
            design: 0,
            at_size,
            chars,
        }
    }

    /// Extents for a character code, if the font covers it.
    #[must_use]
    pub fn char_dim(&self, code: u32) -> Option<&CharDim> {
        self.chars.get(&code)
    }

    /// Width for a character code.
    ///
    /// # Errors
    ///
    /// [`DviError::MissingChar`] when the font has no entry for `code`.
    pub fn char_width(&self, code: u32) -> DviResult<i64> {
        self.chars
            .get(&code)
            .map(|dim| dim.width)
            .ok_or_else(|| DviError::MissingChar {
                font: self.name.clone(),
                code,
            })
    }
}

fn table_entry(table: &[i64], ix: usize, what: &str) -> DviResult<i64> {
    table
        .get(ix)
        .copied()
        .ok_or_else(|| DviError::InvalidFontMetric(format!("{what} index {ix} out of range")))
}

/// Decode one table of `count` scaled fixwords.
///
/// `alpha` starts at 16 and doubles while `z` (the scale) stays at or
/// above 2^23, halving `z` in step; `beta = 256/alpha`; each raw entry
/// `b0 b1 b2 b3` becomes `(((b3·z)/256 + b2·z)/256 + b1·z)/beta`, with
/// top byte 255 subtracting `alpha·z` (sign extension for the largest
/// magnitude class) and any other nonzero top byte invalid.
fn scaled_table(src: &mut SliceCursor<'_>, count: usize, z0: i64) -> DviResult<Vec<i64>> {
    let mut z = z0;
    let mut alpha: i64 = 16;
    while z >= 0o40_000_000 {
        z /= 2;
        alpha *= 2;
    }
    let beta = 256 / alpha;
    if beta == 0 {
        return Err(DviError::InvalidFontMetric(format!(
            "scale factor {z0} out of range"
        )));
    }
    let alpha = alpha * z;

    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let b0 = i64::from(src.next_byte()?);
        let b1 = i64::from(src.next_byte()?);
        let b2 = i64::from(src.next_byte()?);
        let b3 = i64::from(src.next_byte()?);
        let mut value = (((b3 * z) / 256 + b2 * z) / 256 + b1 * z) / beta;
        match b0 {
            0 => {}
            255 => value -= alpha,
            other => {
                return Err(DviError::InvalidFontMetric(format!(
                    "fixword top byte {other} outside {{0, 255}}"
                )));
            }
        }
        out.push(value);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    /// A one-character TFM: code 65, width table entries given raw.
    fn fixture(width_entries: &[[u8; 4]]) -> Vec<u8> {
        let mut buf = Vec::new();
        // lf lh bc ec nw nh nd ni nl nk ne np
        let sections: [u16; 12] = [0, 2, 65, 65, width_entries.len() as u16, 1, 1, 0, 0, 0, 0, 0];
        for s in sections {
            push_u16(&mut buf, s);
        }
        push_u32(&mut buf, 0xDEAD_BEEF); // checksum
        push_u32(&mut buf, 10 << 20); // design size 10pt as 20.12 fixword
        // char_info for code 65: width index = last entry, h/d indices 0
        buf.extend_from_slice(&[(width_entries.len() - 1) as u8, 0x00, 0, 0]);
        for entry in width_entries {
            buf.extend_from_slice(entry);
        }
        push_u32(&mut buf, 0); // heights[0]
        push_u32(&mut buf, 0); // depths[0]
        buf
    }

    const Z: u32 = 1 << 20; // scale 1.0 in fixword terms, below 2^23

    #[test]
    fn plain_width_scales_by_z() {
        // b1 = 16 with alpha=16, beta=16: value = 16·z/16 = z.
        let bytes = fixture(&[[0, 0, 0, 0], [0, 16, 0, 0]]);
        let fm = FontMetrics::decode(&bytes, "cmr10", 0, Z, Z).expect("decode");
        assert_eq!(fm.char_width(65).expect("width"), i64::from(Z));
        assert!((fm.at_size - 10.0).abs() < 1e-9, "at size is 10pt");
    }

    #[test]
    fn top_byte_255_subtracts_alpha() {
        // alpha·z = 16·z: a zero body with top byte 255 decodes to -16·z.
        let bytes = fixture(&[[0, 0, 0, 0], [255, 0, 0, 0]]);
        let fm = FontMetrics::decode(&bytes, "cmr10", 0, Z, Z).expect("decode");
        assert_eq!(fm.char_width(65).expect("width"), -16 * i64::from(Z));
    }

    #[test]
    fn top_byte_in_middle_range_is_invalid() {
        let bytes = fixture(&[[0, 0, 0, 0], [7, 0, 0, 0]]);
        let err = FontMetrics::decode(&bytes, "cmr10", 0, Z, Z).unwrap_err();
        assert!(
            matches!(err, DviError::InvalidFontMetric(_)),
            "got {err:?}"
        );
    }

    #[test]
    fn short_file_is_truncated() {
        let bytes = fixture(&[[0, 0, 0, 0], [0, 16, 0, 0]]);
        let err = FontMetrics::decode(&bytes[..bytes.len() - 2], "cmr10", 0, Z, Z).unwrap_err();
        assert_eq!(err, DviError::TruncatedStream);
    }

    #[test]
    fn missing_char_is_reported_with_font_name() {
        let bytes = fixture(&[[0, 0, 0, 0], [0, 16, 0, 0]]);
        let fm = FontMetrics::decode(&bytes, "cmr10", 0, Z, Z).expect("decode");
        assert_eq!(
            fm.char_width(66),
            Err(DviError::MissingChar {
                font: "cmr10".to_owned(),
                code: 66
            })
        );
    }

    #[test]
    fn large_scale_takes_the_halving_path() {
        // z ≥ 2^23 forces at least one halving round; the identity
        // value = b1·z/beta must still hold with the adjusted pair.
        let big = 1u32 << 24;
        let bytes = fixture(&[[0, 0, 0, 0], [0, 16, 0, 0]]);
        let fm = FontMetrics::decode(&bytes, "cmbig", 0, big, Z).expect("decode");
        // alpha doubles twice (z halves to 2^22), beta = 4, z' = 2^22:
        // width = 16·2^22/4 = 2^24 = the original z.
        assert_eq!(fm.char_width(65).expect("width"), i64::from(big));
    }
}
