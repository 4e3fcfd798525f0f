//! Virtual-font (VF) files: parsing and device-font resolution.
//!
//! A virtual font maps each character code to a packet of DVI opcodes
//! drawn in its own private font table. Packets are stored raw here; the
//! page assembler replays them through the shared page reader when a
//! virtual glyph is typeset.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use texmill_dvi::cursor::{ByteSource, SliceCursor};
use texmill_dvi::error::{DviError, DviResult};
use texmill_dvi::tfm::{FontDef, FontMetrics};
use tracing::debug;

use crate::error::{FontError, FontResult};
use crate::locate::FontLocator;

/// Maximum depth of virtual fonts defined in terms of virtual fonts.
pub const MAX_VF_DEPTH: usize = 8;

/// An outline (Type 1) font ready for a rendering backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineFont {
    /// TeX font name the outline was resolved from.
    pub name: String,
    /// Located outline file.
    pub path: PathBuf,
    /// Point size after all virtual-font scaling.
    pub size: f64,
    /// Glyph-name vector, position = character code.
    pub encoding: Option<Arc<Vec<String>>>,
}

/// A font as the output device sees it.
#[derive(Debug, Clone)]
pub enum DeviceFont {
    /// Glyphs render directly from an outline file.
    Outline(Arc<OutlineFont>),
    /// Glyphs expand to nested DVI packets.
    Virtual(Arc<VirtualFont>),
}

/// Raw sections of a parsed VF file.
#[derive(Debug)]
struct VfParts {
    chars: HashMap<u32, Vec<u8>>,
    font_defs: Vec<FontDef>,
}

impl VfParts {
    fn parse(bytes: &[u8]) -> FontResult<Self> {
        Self::parse_inner(&mut SliceCursor::new(bytes)).map_err(|e| match e {
            DviError::TruncatedStream => {
                FontError::MalformedVirtualFont("file ends before postamble".to_owned())
            }
            other => FontError::Dvi(other),
        })
    }

    fn parse_inner(src: &mut SliceCursor<'_>) -> DviResult<Self> {
        // Preamble: opcode 247, id byte, comment, checksum, design size.
        let first = src.next_byte()?;
        if first != 247 {
            return Err(DviError::UnexpectedOpcode(first));
        }
        let _id = src.read_unsigned(1)?;
        let comment_len = src.read_unsigned(1)? as usize;
        src.skip(comment_len)?;
        let _checksum = src.read_unsigned(4)?;
        let _design = src.read_unsigned(4)?;

        let mut chars = HashMap::new();
        let mut font_defs = Vec::new();

        loop {
            let opcode = src.next_byte()?;
            match opcode {
                // Short packet: the opcode is the packet length.
                0..=241 => {
                    let code = src.read_unsigned(1)?;
                    let _tfm_width = src.read_unsigned(3)?;
                    chars.insert(code, src.read_bytes(opcode as usize)?);
                }
                // Long packet.
                242 => {
                    let len = src.read_unsigned(4)? as usize;
                    let code = src.read_unsigned(4)?;
                    let _tfm_width = src.read_unsigned(4)?;
                    chars.insert(code, src.read_bytes(len)?);
                }
                // Local font definitions, same layout as in DVI.
                243..=246 => {
                    let index = src.read_unsigned(opcode - 242)?;
                    let checksum = src.read_unsigned(4)?;
                    let scaled_size = src.read_unsigned(4)?;
                    let design_size = src.read_unsigned(4)?;
                    let area_len = src.read_unsigned(1)?;
                    let name_len = src.read_unsigned(1)?;
                    let name = src.read_string((area_len + name_len) as usize)?;
                    font_defs.push(FontDef {
                        index,
                        checksum,
                        scaled_size,
                        design_size,
                        name,
                    });
                }
                247 => return Err(DviError::UnexpectedOpcode(247)),
                248 => break,
                249..=255 => {}
            }
        }

        Ok(Self { chars, font_defs })
    }
}

/// A loaded virtual font: character packets plus the private font tables
/// its packets draw in.
#[derive(Debug)]
pub struct VirtualFont {
    /// TeX font name the file was resolved from.
    pub name: String,
    chars: HashMap<u32, Vec<u8>>,
    metrics: HashMap<u32, Arc<FontMetrics>>,
    device: HashMap<u32, DeviceFont>,
    initial: Option<u32>,
}

impl VirtualFont {
    /// Parse a VF file and resolve its local fonts, recursively.
    ///
    /// `size_factor` accumulates the at-sizes of the enclosing fonts so
    /// that every outline down the chain ends up at its absolute size.
    ///
    /// # Errors
    ///
    /// [`FontError::MalformedVirtualFont`] for structural problems,
    /// [`FontError::RecursionLimit`] past [`MAX_VF_DEPTH`] levels, plus
    /// any error resolving a local font.
    pub fn load(
        name: &str,
        bytes: &[u8],
        size_factor: f64,
        locator: &mut FontLocator,
        depth: usize,
    ) -> FontResult<Self> {
        let parts = VfParts::parse(bytes)?;
        debug!(
            font = name,
            chars = parts.chars.len(),
            locals = parts.font_defs.len(),
            depth,
            "virtual font loaded"
        );

        let mut metrics = HashMap::with_capacity(parts.font_defs.len());
        let mut device = HashMap::with_capacity(parts.font_defs.len());
        let mut initial = None;
        for def in &parts.font_defs {
            let (m, d) = resolve_device_font(locator, def, size_factor, depth)?;
            metrics.insert(def.index, m);
            device.insert(def.index, d);
            if initial.is_none() {
                initial = Some(def.index);
            }
        }

        Ok(Self {
            name: name.to_owned(),
            chars: parts.chars,
            metrics,
            device,
            initial,
        })
    }

    /// The packet bytes for a character code.
    #[must_use]
    pub fn packet(&self, code: u32) -> Option<&[u8]> {
        self.chars.get(&code).map(Vec::as_slice)
    }

    /// The private metric table for packet interpretation.
    #[must_use]
    pub fn metric_table(&self) -> HashMap<u32, Arc<FontMetrics>> {
        self.metrics.clone()
    }

    /// The private device-font table for packet interpretation.
    #[must_use]
    pub fn device_table(&self) -> HashMap<u32, DeviceFont> {
        self.device.clone()
    }

    /// The first-defined local font, current when a packet starts.
    #[must_use]
    pub fn initial_font(&self) -> Option<u32> {
        self.initial
    }

    /// Build a virtual font from already-resolved parts.
    #[cfg(test)]
    pub(crate) fn from_parts(
        name: &str,
        chars: HashMap<u32, Vec<u8>>,
        metrics: HashMap<u32, Arc<FontMetrics>>,
        device: HashMap<u32, DeviceFont>,
        initial: Option<u32>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            chars,
            metrics,
            device,
            initial,
        }
    }
}

/// Load the TFM metrics a font definition refers to.
///
/// # Errors
///
/// [`FontError::NotFound`]/[`FontError::Io`] locating or reading the
/// file, [`FontError::Dvi`] when it fails to decode.
pub fn load_metrics(locator: &FontLocator, def: &FontDef) -> FontResult<Arc<FontMetrics>> {
    let bytes = locator.read(&format!("{}.tfm", def.name))?;
    let metrics = FontMetrics::decode(
        &bytes,
        &def.name,
        def.index,
        def.scaled_size,
        def.design_size,
    )?;
    Ok(Arc::new(metrics))
}

/// Resolve a font definition to its metrics and device font.
///
/// The font map is consulted first; a name the map cannot place falls
/// back to `<name>.vf`, loaded recursively. Only when both fail does
/// [`FontError::NotFound`] surface.
pub fn resolve_device_font(
    locator: &mut FontLocator,
    def: &FontDef,
    size_factor: f64,
    depth: usize,
) -> FontResult<(Arc<FontMetrics>, DeviceFont)> {
    let metrics = load_metrics(locator, def)?;

    let raw = Arc::clone(locator.raw());
    if let Some(mapped) = locator.map()?.resolve(&def.name, raw.as_ref())? {
        let outline = OutlineFont {
            name: def.name.clone(),
            path: mapped.outline.clone(),
            size: metrics.at_size * size_factor,
            encoding: mapped.encoding.clone(),
        };
        return Ok((metrics, DeviceFont::Outline(Arc::new(outline))));
    }

    if depth >= MAX_VF_DEPTH {
        return Err(FontError::RecursionLimit(def.name.clone()));
    }
    let vf_bytes = locator
        .read(&format!("{}.vf", def.name))
        .map_err(|e| match e {
            FontError::NotFound(_) => FontError::NotFound(def.name.clone()),
            other => other,
        })?;
    let vf = VirtualFont::load(
        &def.name,
        &vf_bytes,
        metrics.at_size * size_factor,
        locator,
        depth + 1,
    )?;
    Ok((metrics, DeviceFont::Virtual(Arc::new(vf))))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TableLocator;

    fn preamble(comment: &[u8]) -> Vec<u8> {
        let mut buf = vec![247, 202, comment.len() as u8];
        buf.extend_from_slice(comment);
        buf.extend_from_slice(&0u32.to_be_bytes()); // checksum
        buf.extend_from_slice(&(10u32 << 20).to_be_bytes()); // design size
        buf
    }

    fn fnt_def1(index: u8, name: &str) -> Vec<u8> {
        let mut buf = vec![243, index];
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&(1u32 << 20).to_be_bytes());
        buf.extend_from_slice(&(1u32 << 20).to_be_bytes());
        buf.push(0);
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());
        buf
    }

    #[test]
    fn parse_extracts_packets_and_local_fonts() {
        let mut bytes = preamble(b"vf");
        bytes.extend_from_slice(&fnt_def1(3, "cmr10"));
        // Short packet for code 65, 2 opcode bytes.
        bytes.push(2);
        bytes.push(65);
        bytes.extend_from_slice(&[0, 8, 0]); // tfm width, u24
        bytes.extend_from_slice(&[141, 142]);
        // Long packet for code 300, 1 opcode byte.
        bytes.push(242);
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&300u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.push(138);
        bytes.push(250); // reserved, ignored
        bytes.push(248); // post
        bytes.extend_from_slice(&[223; 4]); // padding after post, never read

        let parts = VfParts::parse(&bytes).expect("parse");
        assert_eq!(parts.chars[&65], vec![141, 142]);
        assert_eq!(parts.chars[&300], vec![138]);
        assert_eq!(parts.font_defs.len(), 1);
        assert_eq!(parts.font_defs[0].index, 3);
        assert_eq!(parts.font_defs[0].name, "cmr10");
    }

    #[test]
    fn missing_preamble_is_rejected() {
        let err = VfParts::parse(&[0, 65, 0, 0, 0, 248]).unwrap_err();
        assert_eq!(err, FontError::Dvi(DviError::UnexpectedOpcode(0)));
    }

    #[test]
    fn nested_preamble_is_rejected() {
        let mut bytes = preamble(b"");
        bytes.push(247);
        let err = VfParts::parse(&bytes).unwrap_err();
        assert_eq!(err, FontError::Dvi(DviError::UnexpectedOpcode(247)));
    }

    #[test]
    fn truncation_before_post_is_malformed() {
        let mut bytes = preamble(b"");
        bytes.push(2); // short packet claiming 2 bytes
        bytes.push(65);
        let err = VfParts::parse(&bytes).unwrap_err();
        assert!(
            matches!(err, FontError::MalformedVirtualFont(_)),
            "got {err:?}"
        );
    }

    #[test]
    fn unresolvable_font_surfaces_the_tex_name() {
        let mut loc = FontLocator::new(std::sync::Arc::new(TableLocator(Vec::new())));
        let def = FontDef {
            index: 0,
            checksum: 0,
            scaled_size: 1 << 20,
            design_size: 1 << 20,
            name: "ghost".to_owned(),
        };
        assert_eq!(
            resolve_device_font(&mut loc, &def, 1.0, 0).unwrap_err(),
            FontError::NotFound("ghost.tfm".to_owned()),
            "metrics are required before any fallback"
        );
    }
}
