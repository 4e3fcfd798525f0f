//! Error types for DVI stream decoding.

use std::fmt;

/// An error produced while decoding a DVI stream or building its
/// dispatch tables.
///
/// All variants except [`DviError::TruncatedStream`] inside a
/// virtual-font packet are fatal to the current page: DVI has no
/// self-describing frame boundaries that would make resynchronization
/// safe, so the interpreter never attempts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DviError {
    /// The byte source ran out mid-instruction.
    TruncatedStream,
    /// An I/O failure on the underlying stream (other than clean EOF).
    Io(String),
    /// Two opcode declarations claim the same opcode (build-time only).
    DuplicateOpcode(u8),
    /// A reader constructor referenced a handler name that was never
    /// declared (build-time only).
    UnknownHandler(String),
    /// An allow-list reader met an opcode outside its allow set.
    UnexpectedOpcode(u8),
    /// A deny-list reader met an opcode in its deny set.
    ForbiddenOpcode(u8),
    /// An opcode with no dispatch entry, or in the reserved 250..=255 range.
    UndefinedOpcode(u8),
    /// `pop` on an empty register stack.
    StackUnderflow,
    /// `push` past the register stack capacity.
    StackOverflow,
    /// Postamble opcodes encountered inside a page.
    UnexpectedPostamble,
    /// A font-selection opcode referenced an index with no prior definition.
    UndefinedFont(u32),
    /// A glyph or rule opcode arrived before any font was selected.
    NoFontSelected,
    /// The current font's metrics carry no entry for a character code.
    MissingChar {
        /// Font resource name.
        font: String,
        /// Character code with no metric entry.
        code: u32,
    },
    /// A TFM file failed validation.
    InvalidFontMetric(String),
    /// A font definition could not be resolved by the page-event consumer.
    FontResolution(String),
}

impl fmt::Display for DviError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedStream => write!(f, "byte stream exhausted mid-instruction"),
            Self::Io(msg) => write!(f, "I/O error on DVI stream: {msg}"),
            Self::DuplicateOpcode(op) => write!(f, "opcode {op} claimed by two declarations"),
            Self::UnknownHandler(name) => write!(f, "no opcode handler named \"{name}\""),
            Self::UnexpectedOpcode(op) => write!(f, "opcode {op} not in allow set"),
            Self::ForbiddenOpcode(op) => write!(f, "opcode {op} in deny set"),
            Self::UndefinedOpcode(op) => write!(f, "undefined opcode {op}"),
            Self::StackUnderflow => write!(f, "pop on empty register stack"),
            Self::StackOverflow => write!(f, "register stack capacity exceeded"),
            Self::UnexpectedPostamble => write!(f, "postamble inside page stream"),
            Self::UndefinedFont(k) => write!(f, "font {k} selected before definition"),
            Self::NoFontSelected => write!(f, "glyph opcode before any font selection"),
            Self::MissingChar { font, code } => {
                write!(f, "font \"{font}\" has no metrics for character {code}")
            }
            Self::InvalidFontMetric(msg) => write!(f, "invalid font metric file: {msg}"),
            Self::FontResolution(msg) => write!(f, "font resolution failed: {msg}"),
        }
    }
}

impl std::error::Error for DviError {}

/// Convenience alias for results using [`DviError`].
pub type DviResult<T> = Result<T, DviError>;
