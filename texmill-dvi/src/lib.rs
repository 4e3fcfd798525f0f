//! Device-independent (DVI) page-stream interpretation for `TexMill`.
//!
//! This crate decodes the byte-oriented instruction stream a TeX engine
//! emits for each typeset page. It is deliberately free of I/O policy:
//! bytes come in through [`ByteSource`], positioned glyphs and rules go
//! out through the [`PageHandler`] capability interface, and everything
//! in between (registers, the snapshot stack, the font table) lives in
//! [`DviState`], owned by exactly one interpretation pass.
//!
//! The layers, leaf to root:
//! - [`cursor`] — fixed-width big-endian signed/unsigned primitive readers;
//! - [`dispatch`] — dense opcode dispatch tables and scoped allow/deny readers;
//! - [`state`] — interpreter registers, stack, and the handler interface;
//! - [`tfm`] — TeX font metric (TFM) decoding;
//! - [`page`] — the DVI opcode program itself.

pub mod cursor;
pub mod dispatch;
pub mod error;
pub mod page;
pub mod state;
pub mod tfm;
pub mod units;

pub use cursor::{ByteSource, SliceCursor, StreamSource};
pub use dispatch::{Declaration, Dispatcher, Reader};
pub use error::{DviError, DviResult};
pub use page::DviProgram;
pub use state::{DviState, NullHandler, PageHandler, Registers};
pub use tfm::{CharDim, FontDef, FontMetrics};
