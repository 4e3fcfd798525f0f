//! Shared test fixtures.

use std::path::PathBuf;

use crate::locate::ResourceLocator;

/// Locator over a fixed name → path table.
pub(crate) struct TableLocator(pub(crate) Vec<(String, PathBuf)>);

impl ResourceLocator for TableLocator {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
    }
}
