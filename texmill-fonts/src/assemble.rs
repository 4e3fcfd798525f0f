//! Turning interpreter callbacks into device-independent page events.
//!
//! [`PageAssembler`] sits behind the DVI interpreter's handler interface.
//! It resolves font definitions (map hit → outline, fallback → virtual
//! font), emits positioned glyph and rule events in TeX points, expands
//! virtual glyphs by replaying their packets through the shared page
//! reader, and tracks the page's bounding box.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use texmill_dvi::cursor::SliceCursor;
use texmill_dvi::dispatch::Reader;
use texmill_dvi::error::{DviError, DviResult};
use texmill_dvi::state::{DviState, PageHandler};
use texmill_dvi::tfm::{CharDim, FontDef};
use texmill_dvi::units::sp_to_pt;
use tracing::debug;

use crate::error::FontError;
use crate::locate::FontLocator;
use crate::vf::{resolve_device_font, DeviceFont, OutlineFont, VirtualFont, MAX_VF_DEPTH};

/// One positioned mark on a page. Coordinates are TeX points, origin at
/// the DVI reference point, y growing downward.
#[derive(Debug, Clone)]
pub enum PageEvent {
    /// A glyph at its reference point.
    Glyph {
        x: f64,
        y: f64,
        /// Character code in the outline font's encoding.
        code: u32,
        font: Arc<OutlineFont>,
    },
    /// A solid rectangle extending right and up from (x, y).
    Rule {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
}

/// A fully assembled page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Marks in emission order.
    pub events: Vec<PageEvent>,
    /// Bounding-box width, TeX points.
    pub width: f64,
    /// Bounding-box height, TeX points.
    pub height: f64,
    /// Bottom-left corner of the bounding box.
    pub origin: (f64, f64),
}

/// Running bounding box in scaled points.
///
/// Rules always contribute; glyphs only outside virtual-font packets,
/// where their metrics describe real ink.
#[derive(Debug, Default)]
struct PageExtent {
    left: i64,
    right: i64,
    top: i64,
    bottom: i64,
}

impl PageExtent {
    fn include_glyph(&mut self, h: i64, v: i64, dim: &CharDim) {
        self.left = self.left.min(h).min(h + dim.width);
        self.right = self.right.max(h).max(h + dim.width);
        self.top = self.top.min(v - dim.height);
        self.bottom = self.bottom.max(v + dim.depth);
    }

    fn include_rule(&mut self, h: i64, v: i64, height: i64, width: i64) {
        self.left = self.left.min(h).min(h + width);
        self.right = self.right.max(h).max(h + width);
        self.top = self.top.min(v).min(v + height);
        self.bottom = self.bottom.max(v).max(v + height);
    }

    /// Size and bottom-left corner, then reset for the next page.
    fn reset(&mut self) -> ((i64, i64), (i64, i64)) {
        let size = (self.right - self.left, self.bottom - self.top);
        let bl = (self.left, self.bottom);
        *self = Self::default();
        (size, bl)
    }
}

/// The page-event consumer a session's result-reader thread drives.
pub struct PageAssembler {
    locator: FontLocator,
    /// Device table parallel to the interpreter's metric table.
    device: HashMap<u32, DeviceFont>,
    /// Device font matching the interpreter's current font.
    font: Option<DeviceFont>,
    events: Vec<PageEvent>,
    extent: PageExtent,
    /// Shared page reader, re-entered for virtual-font packets.
    page_reader: Reader,
    vf_depth: usize,
}

impl PageAssembler {
    /// Assembler over a locator and the page reader of a built program.
    #[must_use]
    pub fn new(locator: FontLocator, page_reader: Reader) -> Self {
        Self {
            locator,
            device: HashMap::new(),
            font: None,
            events: Vec::new(),
            extent: PageExtent::default(),
            page_reader,
            vf_depth: 0,
        }
    }

    /// Drain the accumulated events and extent into a page.
    #[must_use]
    pub fn take_page(&mut self) -> RenderedPage {
        let events = mem::take(&mut self.events);
        let ((w, h), (left, bottom)) = self.extent.reset();
        RenderedPage {
            events,
            width: sp_to_pt(w),
            height: sp_to_pt(h),
            origin: (sp_to_pt(left), sp_to_pt(bottom)),
        }
    }

    /// Replay a virtual glyph's packet against the same interpreter
    /// state, under the virtual font's private tables.
    ///
    /// Registers are pushed and the relative-movement ones zeroed, so
    /// packet output lands relative to the outer (h, v) and the outer
    /// position is untouched afterwards. Packets terminate at `eop` or
    /// by running out of bytes; any other error abandons the page.
    fn render_virtual(
        &mut self,
        state: &mut DviState,
        vf: &Arc<VirtualFont>,
        code: u32,
    ) -> DviResult<()> {
        if self.vf_depth >= MAX_VF_DEPTH {
            return Err(FontError::RecursionLimit(vf.name.clone()).into());
        }
        let packet = vf.packet(code).ok_or_else(|| DviError::MissingChar {
            font: vf.name.clone(),
            code,
        })?;

        let saved_metrics = mem::replace(&mut state.fonts, vf.metric_table());
        let saved_metric_font = state.font.take();
        state.font = vf
            .initial_font()
            .and_then(|i| state.fonts.get(&i).cloned());
        let saved_device = mem::replace(&mut self.device, vf.device_table());
        let saved_font = self.font.take();
        self.font = vf
            .initial_font()
            .and_then(|i| self.device.get(&i).cloned());

        state.push()?;
        state.regs.w = 0;
        state.regs.x = 0;
        state.regs.y = 0;
        state.regs.z = 0;

        let reader = self.page_reader.clone();
        let mut cursor = SliceCursor::new(packet);
        self.vf_depth += 1;
        let result = reader.run(&mut cursor, state, self);
        self.vf_depth -= 1;
        match result {
            Ok(()) | Err(DviError::TruncatedStream) => {}
            Err(fatal) => return Err(fatal),
        }

        state.pop()?;
        state.fonts = saved_metrics;
        state.font = saved_metric_font;
        self.device = saved_device;
        self.font = saved_font;
        Ok(())
    }
}

impl PageHandler for PageAssembler {
    fn on_glyph(&mut self, state: &mut DviState, code: u32) -> DviResult<()> {
        let device = self.font.clone().ok_or(DviError::NoFontSelected)?;
        match device {
            DeviceFont::Outline(outline) => {
                let (h, v) = (state.regs.h, state.regs.v);
                self.events.push(PageEvent::Glyph {
                    x: sp_to_pt(h),
                    y: sp_to_pt(v),
                    code,
                    font: outline,
                });
                if self.vf_depth == 0 {
                    let font = state.current_font()?;
                    let dim = *font.char_dim(code).ok_or_else(|| DviError::MissingChar {
                        font: font.name.clone(),
                        code,
                    })?;
                    self.extent.include_glyph(h, v, &dim);
                }
            }
            DeviceFont::Virtual(vf) => self.render_virtual(state, &vf, code)?,
        }
        Ok(())
    }

    fn on_rule(&mut self, state: &mut DviState, height: i64, width: i64) -> DviResult<()> {
        let (h, v) = (state.regs.h, state.regs.v);
        self.events.push(PageEvent::Rule {
            x: sp_to_pt(h),
            y: sp_to_pt(v),
            width: sp_to_pt(width),
            height: sp_to_pt(height),
        });
        self.extent.include_rule(h, v, height, width);
        Ok(())
    }

    fn on_font_define(&mut self, state: &mut DviState, def: &FontDef) -> DviResult<()> {
        debug!(font = %def.name, index = def.index, "defining font");
        let (metrics, device) = resolve_device_font(&mut self.locator, def, 1.0, 0)?;
        state.fonts.insert(def.index, metrics);
        self.device.insert(def.index, device);
        Ok(())
    }

    fn on_font_select(&mut self, _state: &mut DviState, index: u32) -> DviResult<()> {
        self.font = Some(
            self.device
                .get(&index)
                .cloned()
                .ok_or(DviError::UndefinedFont(index))?,
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
