//! Font resolution and page assembly for `TexMill`.
//!
//! Everything between the DVI interpreter's callbacks and a list of
//! positioned, device-ready marks: locating resources through
//! `kpsewhich`, the dvips font map and its encoding vectors, virtual
//! fonts and their recursive packet expansion, and the page assembler
//! that ties it all to the [`texmill_dvi`] handler interface.

pub mod assemble;
pub mod error;
pub mod locate;
pub mod map;
pub mod vf;

#[cfg(test)]
pub(crate) mod testutil;

pub use assemble::{PageAssembler, PageEvent, RenderedPage};
pub use error::{FontError, FontResult};
pub use locate::{FontLocator, Kpsewhich, ResourceLocator};
pub use map::{FontMap, MapFont};
pub use vf::{DeviceFont, OutlineFont, VirtualFont};
