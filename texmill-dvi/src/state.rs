//! Interpreter state and the page-event capability interface.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DviError, DviResult};
use crate::tfm::{FontDef, FontMetrics};

/// Maximum register-stack nesting depth.
///
/// TeX announces its real maximum in the postamble, which a streaming
/// session never reads; this bound is far above anything TeX produces.
pub const MAX_STACK_DEPTH: usize = 256;

/// The six DVI registers, in scaled points (2^-16 pt).
///
/// `h`/`v` are the current position; `w`/`x` are remembered horizontal
/// deltas and `y`/`z` remembered vertical ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub h: i64,
    pub v: i64,
    pub w: i64,
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

/// Mutable state for one DVI interpretation pass.
///
/// Owned exclusively by a single pass (the session's result-reader
/// thread); it is never shared across threads.
#[derive(Debug, Default)]
pub struct DviState {
    /// Current register values.
    pub regs: Registers,
    /// Snapshot stack for `push`/`pop`.
    stack: Vec<Registers>,
    /// Font table: DVI font number → metrics. Populated by the
    /// page-event consumer from `on_font_define`.
    pub fonts: HashMap<u32, Arc<FontMetrics>>,
    /// Currently selected font.
    pub font: Option<Arc<FontMetrics>>,
    /// Preamble unit numerator.
    pub num: u32,
    /// Preamble unit denominator.
    pub den: u32,
    /// Preamble magnification (×1000).
    pub mag: u32,
}

impl DviState {
    /// Fresh state with empty font table and zeroed registers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the registers.
    ///
    /// # Errors
    ///
    /// [`DviError::StackOverflow`] past [`MAX_STACK_DEPTH`] frames.
    pub fn push(&mut self) -> DviResult<()> {
        if self.stack.len() >= MAX_STACK_DEPTH {
            return Err(DviError::StackOverflow);
        }
        self.stack.push(self.regs);
        Ok(())
    }

    /// Restore the most recent snapshot.
    ///
    /// # Errors
    ///
    /// [`DviError::StackUnderflow`] on an empty stack.
    pub fn pop(&mut self) -> DviResult<()> {
        self.regs = self.stack.pop().ok_or(DviError::StackUnderflow)?;
        Ok(())
    }

    /// Current stack depth (snapshots not yet popped).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Reset registers and stack at a page boundary (`bop`).
    pub fn begin_page(&mut self) {
        self.regs = Registers::default();
        self.stack.clear();
    }

    /// The currently selected font.
    ///
    /// # Errors
    ///
    /// [`DviError::NoFontSelected`] when no font-selection opcode has run.
    pub fn current_font(&self) -> DviResult<&Arc<FontMetrics>> {
        self.font.as_ref().ok_or(DviError::NoFontSelected)
    }
}

/// Capability interface for page-event consumers.
///
/// Every method has an explicit no-op default, so a consumer implements
/// only what it observes. Handlers receive the interpreter state so that
/// a font-defining consumer can insert metrics into `state.fonts` (the
/// `fnt_def` opcode delegates resolution entirely to `on_font_define`;
/// a later selection of an index the consumer did not insert fails with
/// [`DviError::UndefinedFont`]) and so that a virtual-font consumer can
/// re-enter the interpreter against the same state.
pub trait PageHandler {
    /// A glyph placed at the current `(h, v)`. Called before any width
    /// advance, so the position is the glyph's reference point.
    fn on_glyph(&mut self, state: &mut DviState, code: u32) -> DviResult<()> {
        let _ = (state, code);
        Ok(())
    }

    /// A rule of the given signed `height` and `width` (scaled points)
    /// at the current `(h, v)`.
    fn on_rule(&mut self, state: &mut DviState, height: i64, width: i64) -> DviResult<()> {
        let _ = (state, height, width);
        Ok(())
    }

    /// A font definition. The consumer resolves the resource name and
    /// inserts the resulting metrics into `state.fonts[def.index]`.
    fn on_font_define(&mut self, state: &mut DviState, def: &FontDef) -> DviResult<()> {
        let _ = (state, def);
        Ok(())
    }

    /// The font at `index` became current.
    fn on_font_select(&mut self, state: &mut DviState, index: u32) -> DviResult<()> {
        let _ = (state, index);
        Ok(())
    }
}

/// A consumer that ignores every event.
pub struct NullHandler;

impl PageHandler for NullHandler {}
