//! Locating font resources on the host system.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{FontError, FontResult};
use crate::map::FontMap;

/// Resolves a resource name (`cmr10.tfm`, `psfonts.map`, …) to a path.
///
/// Implementations must be cheap to share across threads; the session
/// hands one locator to its result-reader worker.
pub trait ResourceLocator: Send + Sync {
    /// Path of the named resource, or `None` when it cannot be found.
    fn locate(&self, name: &str) -> Option<PathBuf>;
}

/// Locator backed by the external `kpsewhich` utility, the standard way
/// of finding files in a TeX installation.
#[derive(Debug, Default)]
pub struct Kpsewhich;

impl ResourceLocator for Kpsewhich {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        let output = Command::new("kpsewhich").arg(name).output().ok()?;
        let path = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}

/// Name of the standard dvips font map.
pub const DEFAULT_MAP: &str = "psfonts.map";

/// A locator plus the lazily-loaded font map and its caches.
///
/// The map is read on first use so that sessions which never define a
/// mapped font (or run against a stub engine in tests) need no TeX
/// installation at all.
pub struct FontLocator {
    locator: Arc<dyn ResourceLocator>,
    map_name: String,
    map: Option<FontMap>,
}

impl FontLocator {
    /// Wrap a locator, deferring the map load.
    #[must_use]
    pub fn new(locator: Arc<dyn ResourceLocator>) -> Self {
        Self {
            locator,
            map_name: DEFAULT_MAP.to_owned(),
            map: None,
        }
    }

    /// Use a map file other than [`DEFAULT_MAP`].
    #[must_use]
    pub fn with_map_name(mut self, name: &str) -> Self {
        self.map_name = name.to_owned();
        self
    }

    /// Locate a resource by name.
    #[must_use]
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        self.locator.locate(name)
    }

    /// Locate and read a resource.
    ///
    /// # Errors
    ///
    /// [`FontError::NotFound`] when the locator cannot place the name,
    /// [`FontError::Io`] when the located file cannot be read.
    pub fn read(&self, name: &str) -> FontResult<Vec<u8>> {
        let path = self
            .locate(name)
            .ok_or_else(|| FontError::NotFound(name.to_owned()))?;
        debug!(name, path = %path.display(), "reading font resource");
        std::fs::read(&path).map_err(|e| FontError::Io {
            name: name.to_owned(),
            message: e.to_string(),
        })
    }

    /// The font map, loading it on first access.
    ///
    /// A map file the locator cannot place degrades to an empty map with
    /// a warning; every lookup then takes the virtual-font fallback.
    ///
    /// # Errors
    ///
    /// [`FontError::Io`] when a located map file cannot be read.
    pub fn map(&mut self) -> FontResult<&mut FontMap> {
        if self.map.is_none() {
            let map = match self.locate(&self.map_name) {
                Some(path) => {
                    debug!(path = %path.display(), "loading font map");
                    let text = std::fs::read_to_string(&path).map_err(|e| FontError::Io {
                        name: self.map_name.clone(),
                        message: e.to_string(),
                    })?;
                    FontMap::parse(&text)
                }
                None => {
                    warn!(map = %self.map_name, "font map not found, using empty map");
                    FontMap::default()
                }
            };
            self.map = Some(map);
        }
        // The branch above just filled the slot.
        self.map.as_mut().ok_or_else(|| FontError::Io {
            name: self.map_name.clone(),
            message: "font map slot empty after load".to_owned(),
        })
    }

    /// The underlying locator handle, for map-side lookups.
    #[must_use]
    pub fn raw(&self) -> &Arc<dyn ResourceLocator> {
        &self.locator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TableLocator;

    #[test]
    fn missing_resource_is_not_found() {
        let loc = FontLocator::new(Arc::new(TableLocator(Vec::new())));
        assert_eq!(
            loc.read("nope.tfm"),
            Err(FontError::NotFound("nope.tfm".to_owned()))
        );
    }

    #[test]
    fn missing_map_degrades_to_empty() {
        let mut loc = FontLocator::new(Arc::new(TableLocator(Vec::new())));
        let map = loc.map().expect("empty map");
        assert!(map.is_empty(), "no entries without a map file");
    }

    #[test]
    fn read_round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cmr10.tfm");
        std::fs::write(&path, b"\x00\x12").expect("write");
        let loc = FontLocator::new(Arc::new(TableLocator(vec![(
            "cmr10.tfm".to_owned(),
            path,
        )])));
        assert_eq!(loc.read("cmr10.tfm").expect("read"), vec![0x00, 0x12]);
    }
}
