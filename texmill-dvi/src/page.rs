//! The DVI opcode program: handlers, dispatch table, scoped readers.
//!
//! Opcode numbering follows the DVI standard. Runs that share a handler
//! lean on the dispatch offset convention: `set_char_0..127` receive
//! the character code as their offset, the parameterized families
//! (`set1..4`, `right1..4`, `fnt_def1..4`, …) receive the operand byte
//! count, and `w/x/y/z` receive 0 for the "reuse the remembered delta"
//! form.

use crate::cursor::ByteSource;
use crate::dispatch::{Declaration, Dispatcher, Reader};
use crate::error::{DviError, DviResult};
use crate::state::{DviState, PageHandler};
use crate::tfm::FontDef;

// Declaration starts (DVI standard numbering).
const SET_CHAR_0: u8 = 0;
const SET_CHAR_1: u8 = 1;
const SET1: u8 = 128;
const SET_RULE: u8 = 132;
const PUT1: u8 = 133;
const PUT_RULE: u8 = 137;
const NOP: u8 = 138;
const BOP: u8 = 139;
const EOP: u8 = 140;
const PUSH: u8 = 141;
const POP: u8 = 142;
const RIGHT1: u8 = 143;
const W0: u8 = 147;
const W1: u8 = 148;
const X0: u8 = 152;
const X1: u8 = 153;
const DOWN1: u8 = 157;
const Y0: u8 = 161;
const Y1: u8 = 162;
const Z0: u8 = 166;
const Z1: u8 = 167;
const FNT_NUM_0: u8 = 171;
const FNT_NUM_1: u8 = 172;
const FNT1: u8 = 235;
const XXX1: u8 = 239;
const FNT_DEF1: u8 = 243;
const PRE: u8 = 247;
const POST: u8 = 248;
const POST_POST: u8 = 249;
const UNDEFINED: u8 = 250;

/// The built DVI dispatcher plus the scoped readers a session uses.
pub struct DviProgram {
    /// The full dispatch table (exposed for custom readers).
    pub dispatcher: Dispatcher,
    /// One-shot preamble reader: `nop*` then `pre`.
    pub preamble: Reader,
    /// Between-pages reader: `nop`/`fnt_def` until `bop`.
    pub begin_page: Reader,
    /// Page-body reader: everything but preamble/postamble, until `eop`.
    /// Also drives virtual-font packet sub-renders.
    pub page: Reader,
}

impl DviProgram {
    /// Build the dispatch table and readers.
    ///
    /// # Errors
    ///
    /// Only configuration bugs surface here ([`DviError::DuplicateOpcode`],
    /// [`DviError::UnknownHandler`]); a successful build never fails at
    /// interpretation time for table reasons.
    pub fn new() -> DviResult<Self> {
        let dispatcher = Dispatcher::build(&declarations())?;
        let preamble = dispatcher.allow_reader(&["pre", "nop"], &["pre"])?;
        let begin_page = dispatcher.allow_reader(&["bop", "nop", "fnt_def"], &["bop"])?;
        let page = dispatcher.deny_reader(&["pre", "post", "post_post"], &["eop"])?;
        Ok(Self {
            dispatcher,
            preamble,
            begin_page,
            page,
        })
    }
}

fn declarations() -> Vec<Declaration> {
    vec![
        // A singleton at 0 then the run 1..=127: the offset is the
        // character code in both cases.
        Declaration { start: SET_CHAR_0, name: "set_char", handler: set_char_direct },
        Declaration { start: SET_CHAR_1, name: "set_char", handler: set_char_direct },
        Declaration { start: SET1, name: "set", handler: set_char_param },
        Declaration { start: SET_RULE, name: "set_rule", handler: set_rule },
        Declaration { start: PUT1, name: "put", handler: put_char_param },
        Declaration { start: PUT_RULE, name: "put_rule", handler: put_rule },
        Declaration { start: NOP, name: "nop", handler: nop },
        Declaration { start: BOP, name: "bop", handler: bop },
        Declaration { start: EOP, name: "eop", handler: eop },
        Declaration { start: PUSH, name: "push", handler: push },
        Declaration { start: POP, name: "pop", handler: pop },
        Declaration { start: RIGHT1, name: "right", handler: right },
        Declaration { start: W0, name: "w", handler: w_move },
        Declaration { start: W1, name: "w", handler: w_move },
        Declaration { start: X0, name: "x", handler: x_move },
        Declaration { start: X1, name: "x", handler: x_move },
        Declaration { start: DOWN1, name: "down", handler: down },
        Declaration { start: Y0, name: "y", handler: y_move },
        Declaration { start: Y1, name: "y", handler: y_move },
        Declaration { start: Z0, name: "z", handler: z_move },
        Declaration { start: Z1, name: "z", handler: z_move },
        // Singleton at 171 (font 0) then the run to 234 (fonts 1..=63).
        Declaration { start: FNT_NUM_0, name: "fnt_num", handler: fnt_num },
        Declaration { start: FNT_NUM_1, name: "fnt_num", handler: fnt_num },
        Declaration { start: FNT1, name: "fnt", handler: fnt_param },
        Declaration { start: XXX1, name: "xxx", handler: xxx },
        Declaration { start: FNT_DEF1, name: "fnt_def", handler: fnt_def },
        Declaration { start: PRE, name: "pre", handler: pre },
        Declaration { start: POST, name: "post", handler: post },
        Declaration { start: POST_POST, name: "post_post", handler: post_post },
        Declaration { start: UNDEFINED, name: "undefined", handler: undefined },
    ]
}

// ---------------------------------------------------------------------------
// Glyphs and rules
// ---------------------------------------------------------------------------

/// Typeset `code` at the current position, then advance `h` by its width.
fn set_char_direct(
    code: u32,
    _src: &mut dyn ByteSource,
    state: &mut DviState,
    handler: &mut dyn PageHandler,
) -> DviResult<()> {
    handler.on_glyph(state, code)?;
    let width = state.current_font()?.char_width(code)?;
    state.regs.h += width;
    Ok(())
}

fn set_char_param(
    n: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    handler: &mut dyn PageHandler,
) -> DviResult<()> {
    let code = src.read_unsigned(n as u8)?;
    set_char_direct(code, src, state, handler)
}

fn put_char_param(
    n: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    handler: &mut dyn PageHandler,
) -> DviResult<()> {
    let code = src.read_unsigned(n as u8)?;
    handler.on_glyph(state, code)
}

fn read_rule(src: &mut dyn ByteSource) -> DviResult<(i64, i64)> {
    let height = i64::from(src.read_signed(4)?);
    let width = i64::from(src.read_signed(4)?);
    Ok((height, width))
}

fn put_rule(
    _: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    handler: &mut dyn PageHandler,
) -> DviResult<()> {
    let (height, width) = read_rule(src)?;
    handler.on_rule(state, height, width)
}

fn set_rule(
    _: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    handler: &mut dyn PageHandler,
) -> DviResult<()> {
    let (height, width) = read_rule(src)?;
    handler.on_rule(state, height, width)?;
    state.regs.h += width;
    Ok(())
}

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

fn nop(
    _: u32,
    _: &mut dyn ByteSource,
    _: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    Ok(())
}

/// Begin a page: ten count registers and the previous-bop pointer are
/// consumed; registers reset and the stack clears per the DVI standard.
fn bop(
    _: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    for _ in 0..10 {
        src.read_unsigned(4)?;
    }
    src.read_signed(4)?;
    state.begin_page();
    Ok(())
}

fn eop(
    _: u32,
    _: &mut dyn ByteSource,
    _: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    Ok(())
}

fn push(
    _: u32,
    _: &mut dyn ByteSource,
    state: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    state.push()
}

fn pop(
    _: u32,
    _: &mut dyn ByteSource,
    state: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    state.pop()
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

fn right(
    n: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    state.regs.h += i64::from(src.read_signed(n as u8)?);
    Ok(())
}

fn down(
    n: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    state.regs.v += i64::from(src.read_signed(n as u8)?);
    Ok(())
}

fn w_move(
    n: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    if n > 0 {
        state.regs.w = i64::from(src.read_signed(n as u8)?);
    }
    state.regs.h += state.regs.w;
    Ok(())
}

fn x_move(
    n: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    if n > 0 {
        state.regs.x = i64::from(src.read_signed(n as u8)?);
    }
    state.regs.h += state.regs.x;
    Ok(())
}

fn y_move(
    n: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    if n > 0 {
        state.regs.y = i64::from(src.read_signed(n as u8)?);
    }
    state.regs.v += state.regs.y;
    Ok(())
}

fn z_move(
    n: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    if n > 0 {
        state.regs.z = i64::from(src.read_signed(n as u8)?);
    }
    state.regs.v += state.regs.z;
    Ok(())
}

// ---------------------------------------------------------------------------
// Fonts
// ---------------------------------------------------------------------------

fn select_font(state: &mut DviState, handler: &mut dyn PageHandler, index: u32) -> DviResult<()> {
    let font = state
        .fonts
        .get(&index)
        .cloned()
        .ok_or(DviError::UndefinedFont(index))?;
    state.font = Some(font);
    handler.on_font_select(state, index)
}

fn fnt_num(
    index: u32,
    _: &mut dyn ByteSource,
    state: &mut DviState,
    handler: &mut dyn PageHandler,
) -> DviResult<()> {
    select_font(state, handler, index)
}

fn fnt_param(
    n: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    handler: &mut dyn PageHandler,
) -> DviResult<()> {
    let index = src.read_unsigned(n as u8)?;
    select_font(state, handler, index)
}

fn fnt_def(
    n: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    handler: &mut dyn PageHandler,
) -> DviResult<()> {
    let index = src.read_unsigned(n as u8)?;
    let checksum = src.read_unsigned(4)?;
    let scaled_size = src.read_unsigned(4)?;
    let design_size = src.read_unsigned(4)?;
    let area_len = src.read_unsigned(1)?;
    let name_len = src.read_unsigned(1)?;
    let name = src.read_string((area_len + name_len) as usize)?;
    let def = FontDef {
        index,
        checksum,
        scaled_size,
        design_size,
        name,
    };
    handler.on_font_define(state, &def)
}

// ---------------------------------------------------------------------------
// Escapes, preamble, postamble
// ---------------------------------------------------------------------------

/// Specials are decoded to keep the stream aligned and then discarded.
fn xxx(
    n: u32,
    src: &mut dyn ByteSource,
    _: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    let len = src.read_unsigned(n as u8)? as usize;
    src.skip(len)
}

fn pre(
    _: u32,
    src: &mut dyn ByteSource,
    state: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    let _version = src.read_unsigned(1)?;
    state.num = src.read_unsigned(4)?;
    state.den = src.read_unsigned(4)?;
    state.mag = src.read_unsigned(4)?;
    let comment_len = src.read_unsigned(1)? as usize;
    src.skip(comment_len)
}

/// A streaming session reads pages in order and never visits the
/// postamble; meeting one mid-stream means the framing is lost.
fn post(
    _: u32,
    _: &mut dyn ByteSource,
    _: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    Err(DviError::UnexpectedPostamble)
}

fn post_post(
    _: u32,
    _: &mut dyn ByteSource,
    _: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    Err(DviError::UnexpectedPostamble)
}

fn undefined(
    offset: u32,
    _: &mut dyn ByteSource,
    _: &mut DviState,
    _: &mut dyn PageHandler,
) -> DviResult<()> {
    // The run starts at 250 with offset 1, so the opcode is 249 + offset.
    let opcode = u8::try_from(249 + offset).unwrap_or(u8::MAX);
    Err(DviError::UndefinedOpcode(opcode))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::SliceCursor;
    use crate::state::NullHandler;
    use crate::tfm::{CharDim, FontMetrics};
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Records glyph and rule callbacks with their positions.
    #[derive(Default)]
    struct Recorder {
        glyphs: Vec<(i64, i64, u32)>,
        rules: Vec<(i64, i64, i64, i64)>,
        selected: Vec<u32>,
    }

    impl PageHandler for Recorder {
        fn on_glyph(&mut self, state: &mut DviState, code: u32) -> DviResult<()> {
            self.glyphs.push((state.regs.h, state.regs.v, code));
            Ok(())
        }

        fn on_rule(&mut self, state: &mut DviState, height: i64, width: i64) -> DviResult<()> {
            self.rules.push((state.regs.h, state.regs.v, height, width));
            Ok(())
        }

        fn on_font_select(&mut self, _: &mut DviState, index: u32) -> DviResult<()> {
            self.selected.push(index);
            Ok(())
        }
    }

    fn fixed_width_font(width: i64) -> Arc<FontMetrics> {
        let mut chars = HashMap::new();
        for code in 0..128u32 {
            chars.insert(
                code,
                CharDim {
                    width,
                    height: width / 2,
                    depth: width / 4,
                },
            );
        }
        Arc::new(FontMetrics::from_parts("testfont", 0, 10.0, chars))
    }

    fn state_with_font(width: i64) -> DviState {
        let mut st = DviState::new();
        let font = fixed_width_font(width);
        st.fonts.insert(0, Arc::clone(&font));
        st.font = Some(font);
        st
    }

    fn run_page(bytes: &[u8], state: &mut DviState, rec: &mut Recorder) -> DviResult<()> {
        let program = DviProgram::new().expect("program builds");
        let mut src = SliceCursor::new(bytes);
        program.page.run(&mut src, state, rec)
    }

    #[test]
    fn push_set_right_pop_restores_registers() {
        let mut st = state_with_font(100);
        st.regs.h = 7;
        st.regs.v = 11;
        let before = st.regs;
        let mut rec = Recorder::default();

        // push, set_char(65), right1(10), pop, eop
        run_page(&[141, 65, 143, 10, 142, 140], &mut st, &mut rec).expect("page");

        assert_eq!(rec.glyphs, vec![(7, 11, 65)], "one glyph at pre-push (h, v)");
        assert_eq!(st.regs, before, "pop restores the snapshot exactly");
    }

    #[test]
    fn nested_push_pop_to_depth() {
        let mut st = state_with_font(4);
        let mut rec = Recorder::default();
        // 8 nested pushes with a right1(1) inside each, then 8 pops.
        let mut bytes = Vec::new();
        for _ in 0..8 {
            bytes.extend_from_slice(&[141, 143, 1]);
        }
        bytes.extend_from_slice(&[142; 8]);
        bytes.push(140);
        run_page(&bytes, &mut st, &mut rec).expect("page");
        assert_eq!(st.regs.h, 0, "outermost pop undoes every move");
        assert_eq!(st.depth(), 0);
    }

    #[test]
    fn set_advances_but_put_does_not() {
        let mut st = state_with_font(50);
        let mut rec = Recorder::default();
        // set_char(65), put1(66), eop
        run_page(&[65, 133, 66, 140], &mut st, &mut rec).expect("page");
        assert_eq!(rec.glyphs, vec![(0, 0, 65), (50, 0, 66)]);
        assert_eq!(st.regs.h, 50, "only set advances h");
    }

    #[test]
    fn set_rule_advances_by_width() {
        let mut st = state_with_font(1);
        let mut rec = Recorder::default();
        let mut bytes = vec![132]; // set_rule
        bytes.extend_from_slice(&3i32.to_be_bytes()); // height
        bytes.extend_from_slice(&20i32.to_be_bytes()); // width
        bytes.push(137); // put_rule
        bytes.extend_from_slice(&5i32.to_be_bytes());
        bytes.extend_from_slice(&(-7i32).to_be_bytes());
        bytes.push(140);
        run_page(&bytes, &mut st, &mut rec).expect("page");
        assert_eq!(rec.rules, vec![(0, 0, 3, 20), (20, 0, 5, -7)]);
        assert_eq!(st.regs.h, 20, "put_rule leaves h alone");
    }

    #[test]
    fn w_and_x_remember_their_deltas() {
        let mut st = state_with_font(1);
        let mut rec = Recorder::default();
        // w1(6), w0, x1(-2), x0, eop
        run_page(&[148, 6, 147, 153, 0xFE, 152, 140], &mut st, &mut rec).expect("page");
        assert_eq!(st.regs.h, 6 + 6 - 2 - 2);
        assert_eq!(st.regs.w, 6);
        assert_eq!(st.regs.x, -2);
    }

    #[test]
    fn y_and_z_move_vertically() {
        let mut st = state_with_font(1);
        let mut rec = Recorder::default();
        // down1(5), y1(3), y0, z1(-1), z0, eop
        run_page(&[157, 5, 162, 3, 161, 167, 0xFF, 166, 140], &mut st, &mut rec).expect("page");
        assert_eq!(st.regs.v, 5 + 3 + 3 - 1 - 1);
    }

    #[test]
    fn pop_on_empty_stack_is_fatal() {
        let mut st = state_with_font(1);
        let mut rec = Recorder::default();
        assert_eq!(
            run_page(&[142, 140], &mut st, &mut rec),
            Err(DviError::StackUnderflow)
        );
    }

    #[test]
    fn postamble_inside_page_is_forbidden() {
        let mut st = state_with_font(1);
        let mut rec = Recorder::default();
        assert_eq!(
            run_page(&[248], &mut st, &mut rec),
            Err(DviError::ForbiddenOpcode(248))
        );
    }

    #[test]
    fn reserved_opcodes_are_undefined() {
        let mut st = state_with_font(1);
        let mut rec = Recorder::default();
        for opcode in [250u8, 252, 255] {
            assert_eq!(
                run_page(&[opcode], &mut st, &mut rec),
                Err(DviError::UndefinedOpcode(opcode)),
                "opcode {opcode}"
            );
        }
    }

    #[test]
    fn glyph_without_font_is_fatal() {
        let mut st = DviState::new();
        let mut rec = Recorder::default();
        assert_eq!(
            run_page(&[65, 140], &mut st, &mut rec),
            Err(DviError::NoFontSelected)
        );
    }

    #[test]
    fn selecting_undefined_font_is_fatal() {
        let mut st = DviState::new();
        let mut rec = Recorder::default();
        // fnt_num for font 5 with nothing defined.
        assert_eq!(
            run_page(&[171 + 5, 140], &mut st, &mut rec),
            Err(DviError::UndefinedFont(5))
        );
    }

    #[test]
    fn fnt_num_offset_is_the_font_index() {
        let mut st = state_with_font(1);
        let font = fixed_width_font(1);
        st.fonts.insert(3, font);
        let mut rec = Recorder::default();
        // fnt_num_0, fnt_num_3, eop
        run_page(&[171, 174, 140], &mut st, &mut rec).expect("page");
        assert_eq!(rec.selected, vec![0, 3]);
    }

    #[test]
    fn specials_are_skipped_and_stream_stays_aligned() {
        let mut st = state_with_font(9);
        let mut rec = Recorder::default();
        // xxx1 with a 3-byte payload, then a glyph, then eop.
        run_page(&[239, 3, b'a', b'b', b'c', 65, 140], &mut st, &mut rec).expect("page");
        assert_eq!(rec.glyphs.len(), 1, "payload bytes are not opcodes");
    }

    #[test]
    fn preamble_reader_records_scale_triple() {
        let program = DviProgram::new().expect("program");
        let mut st = DviState::new();
        let mut sink = NullHandler;
        let mut bytes = vec![138, 247, 2]; // nop, pre, version
        bytes.extend_from_slice(&25_400_000u32.to_be_bytes());
        bytes.extend_from_slice(&473_628_672u32.to_be_bytes());
        bytes.extend_from_slice(&1000u32.to_be_bytes());
        bytes.extend_from_slice(&[2, b'h', b'i']);
        let mut src = SliceCursor::new(&bytes);
        program
            .preamble
            .run(&mut src, &mut st, &mut sink)
            .expect("preamble");
        assert_eq!((st.num, st.den, st.mag), (25_400_000, 473_628_672, 1000));
        assert!(src.is_exhausted(), "comment consumed");
    }

    #[test]
    fn begin_page_reader_accepts_font_defs_and_stops_at_bop() {
        struct Defines;
        impl PageHandler for Defines {
            fn on_font_define(
                &mut self,
                state: &mut DviState,
                def: &FontDef,
            ) -> DviResult<()> {
                state
                    .fonts
                    .insert(def.index, fixed_width_font(i64::from(def.scaled_size)));
                Ok(())
            }
        }

        let program = DviProgram::new().expect("program");
        let mut st = DviState::new();
        let mut sink = Defines;

        let mut bytes = vec![243, 0]; // fnt_def1, font 0
        bytes.extend_from_slice(&0u32.to_be_bytes()); // checksum
        bytes.extend_from_slice(&655_360u32.to_be_bytes()); // scaled
        bytes.extend_from_slice(&655_360u32.to_be_bytes()); // design
        bytes.extend_from_slice(&[0, 5]); // area 0, name 5
        bytes.extend_from_slice(b"cmr10");
        bytes.push(139); // bop
        bytes.extend_from_slice(&[0; 40]); // counts
        bytes.extend_from_slice(&(-1i32).to_be_bytes()); // prev pointer
        bytes.push(65); // page content, not read by this reader

        let mut src = SliceCursor::new(&bytes);
        program
            .begin_page
            .run(&mut src, &mut st, &mut sink)
            .expect("begin_page");
        assert!(st.fonts.contains_key(&0), "fnt_def reached the handler");
        assert_eq!(src.remaining(), 1, "reader stopped right after bop");
    }

    #[test]
    fn bop_resets_registers_between_pages() {
        let program = DviProgram::new().expect("program");
        let mut st = state_with_font(10);
        st.regs.h = 500;
        st.regs.v = 600;
        let mut sink = NullHandler;
        let mut bytes = vec![139];
        bytes.extend_from_slice(&[0; 40]);
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        let mut src = SliceCursor::new(&bytes);
        program
            .begin_page
            .run(&mut src, &mut st, &mut sink)
            .expect("bop");
        assert_eq!(st.regs.h, 0);
        assert_eq!(st.regs.v, 0);
    }
}
