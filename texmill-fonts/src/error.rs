//! Error types for font location and resolution.

use std::fmt;

use texmill_dvi::DviError;

/// An error produced while locating, decoding or resolving fonts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontError {
    /// A font resource could not be located.
    ///
    /// Recoverable only at the map-lookup stage, where it triggers the
    /// virtual-font fallback; everywhere else it is fatal.
    NotFound(String),
    /// An I/O failure reading a located resource.
    Io {
        /// Resource being read.
        name: String,
        /// Underlying error text.
        message: String,
    },
    /// A font map entry that cannot be interpreted.
    MalformedMap(String),
    /// A virtual-font file that cannot be interpreted.
    MalformedVirtualFont(String),
    /// Virtual fonts nested beyond the supported depth.
    RecursionLimit(String),
    /// A decode error from the DVI layer (TFM files, VF packets).
    Dvi(DviError),
}

impl fmt::Display for FontError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "font resource \"{name}\" not found"),
            Self::Io { name, message } => write!(f, "reading \"{name}\": {message}"),
            Self::MalformedMap(msg) => write!(f, "malformed font map entry: {msg}"),
            Self::MalformedVirtualFont(msg) => write!(f, "malformed virtual font: {msg}"),
            Self::RecursionLimit(name) => {
                write!(f, "virtual font \"{name}\" nested too deeply")
            }
            Self::Dvi(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FontError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dvi(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DviError> for FontError {
    fn from(e: DviError) -> Self {
        Self::Dvi(e)
    }
}

/// Font failures crossing the page-handler boundary become DVI-level
/// resolution errors, except DVI errors, which pass through unchanged so
/// that variants like `TruncatedStream` keep their meaning.
impl From<FontError> for DviError {
    fn from(e: FontError) -> Self {
        match e {
            FontError::Dvi(inner) => inner,
            other => Self::FontResolution(other.to_string()),
        }
    }
}

/// Convenience alias for results using [`FontError`].
pub type FontResult<T> = Result<T, FontError>;
