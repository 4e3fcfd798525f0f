//! dvips font map (`psfonts.map`) and encoding-vector parsing.
//!
//! A map line is `texname <rest>`; the rest mixes PostScript names,
//! download directives and a quoted option string. Lookups are resolved
//! once and cached, as are parsed encoding vectors and located outline
//! paths.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{FontError, FontResult};
use crate::locate::ResourceLocator;

/// Encoding assumed when a map entry lists none.
pub const DEFAULT_ENCODING: &str = "dvips.enc";

/// A resolved map entry: the outline file and its encoding vector.
#[derive(Debug, Clone)]
pub struct MapFont {
    /// Located outline file (pfb/pfa).
    pub outline: PathBuf,
    /// Glyph-name vector, position = character code.
    pub encoding: Option<Arc<Vec<String>>>,
}

/// Tokenized fields of one map entry.
#[derive(Debug, Default, PartialEq, Eq)]
struct EntryTokens {
    names: Vec<String>,
    outlines: Vec<String>,
    encodings: Vec<String>,
    options: Vec<String>,
}

/// Split a map entry into its field classes.
///
/// A bare `"` token toggles verbatim option mode; `<<` prefixes an
/// outline file, `<[` an encoding file, and a bare `<` dispatches on the
/// extension. Anything else is a name token.
fn tokenize_entry(entry: &str) -> EntryTokens {
    let mut out = EntryTokens::default();
    let mut in_quote = false;
    for token in entry.split_whitespace() {
        if in_quote {
            if token == "\"" {
                in_quote = false;
            } else {
                out.options.push(token.to_owned());
            }
        } else if token == "\"" {
            in_quote = true;
        } else if let Some(rest) = token.strip_prefix("<<") {
            out.outlines.push(rest.to_owned());
        } else if let Some(rest) = token.strip_prefix("<[") {
            out.encodings.push(rest.to_owned());
        } else if let Some(rest) = token.strip_prefix('<') {
            if rest.ends_with(".enc") {
                out.encodings.push(rest.to_owned());
            } else if rest.ends_with(".pfb") || rest.ends_with(".pfa") {
                out.outlines.push(rest.to_owned());
            }
        } else {
            out.names.push(token.to_owned());
        }
    }
    out
}

/// Parse an encoding-vector file into glyph names.
///
/// Comments open with `%`; the surviving non-empty lines are word lists.
/// The first line (the vector's PostScript name) and the last (the
/// `def` terminator) are dropped, and each glyph name loses its leading
/// slash.
#[must_use]
pub fn parse_encoding_text(text: &str) -> Vec<String> {
    let lines: Vec<Vec<&str>> = text
        .lines()
        .map(|line| line.split('%').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.split_whitespace().collect())
        .collect();

    let body = if lines.len() > 2 {
        &lines[1..lines.len() - 1]
    } else {
        &[]
    };

    body.iter()
        .flatten()
        .map(|w| w.trim_start_matches('/').to_owned())
        .collect()
}

/// The parsed map plus resolution caches.
#[derive(Default)]
pub struct FontMap {
    entries: HashMap<String, String>,
    resolved: HashMap<String, Option<Arc<MapFont>>>,
    encodings: HashMap<String, Option<Arc<Vec<String>>>>,
    outlines: HashMap<String, PathBuf>,
}

impl FontMap {
    /// Parse map text. Names ending in `--base` alias the bare name too.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let Some((name, rest)) = line.split_once(' ') else {
                continue;
            };
            if let Some(bare) = name.strip_suffix("--base") {
                entries.insert(bare.to_owned(), rest.to_owned());
            }
            entries.insert(name.to_owned(), rest.to_owned());
        }
        Self {
            entries,
            ..Self::default()
        }
    }

    /// Whether the map has no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a TeX font name through the map.
    ///
    /// `Ok(None)` means the name is absent from the map (or its entry
    /// names no outline file) and the caller should try virtual-font
    /// resolution instead.
    ///
    /// # Errors
    ///
    /// [`FontError::NotFound`] when a listed outline or an explicitly
    /// listed encoding cannot be located, [`FontError::Io`] when a
    /// located encoding file cannot be read.
    pub fn resolve(
        &mut self,
        name: &str,
        locator: &dyn ResourceLocator,
    ) -> FontResult<Option<Arc<MapFont>>> {
        if let Some(cached) = self.resolved.get(name) {
            return Ok(cached.clone());
        }

        let result = self.resolve_uncached(name, locator)?;
        self.resolved.insert(name.to_owned(), result.clone());
        Ok(result)
    }

    fn resolve_uncached(
        &mut self,
        name: &str,
        locator: &dyn ResourceLocator,
    ) -> FontResult<Option<Arc<MapFont>>> {
        let Some(entry) = self.entries.get(name) else {
            return Ok(None);
        };
        let tokens = tokenize_entry(entry);

        let Some(outline_name) = tokens.outlines.first() else {
            // Resident printer fonts list no download file; the caller
            // falls back to virtual-font resolution.
            warn!(font = name, "map entry has no outline file");
            return Ok(None);
        };

        let outline = match self.outlines.get(outline_name) {
            Some(path) => path.clone(),
            None => {
                let path = locator
                    .locate(outline_name)
                    .ok_or_else(|| FontError::NotFound(outline_name.clone()))?;
                self.outlines.insert(outline_name.clone(), path.clone());
                path
            }
        };

        let (enc_name, enc_required) = match tokens.encodings.first() {
            Some(explicit) => (explicit.as_str(), true),
            None => (DEFAULT_ENCODING, false),
        };
        let encoding = self.encoding(enc_name, enc_required, locator)?;

        debug!(font = name, outline = %outline.display(), "map entry resolved");
        Ok(Some(Arc::new(MapFont { outline, encoding })))
    }

    /// Load an encoding vector, caching per filename. A missing required
    /// encoding is an error; the missing default is a warning.
    fn encoding(
        &mut self,
        enc_name: &str,
        required: bool,
        locator: &dyn ResourceLocator,
    ) -> FontResult<Option<Arc<Vec<String>>>> {
        if let Some(cached) = self.encodings.get(enc_name) {
            return Ok(cached.clone());
        }

        let vector = match locator.locate(enc_name) {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|e| FontError::Io {
                    name: enc_name.to_owned(),
                    message: e.to_string(),
                })?;
                Some(Arc::new(parse_encoding_text(&text)))
            }
            None if required => {
                return Err(FontError::NotFound(enc_name.to_owned()));
            }
            None => {
                warn!(encoding = enc_name, "default encoding not found, skipping");
                None
            }
        };

        self.encodings.insert(enc_name.to_owned(), vector.clone());
        Ok(vector)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
