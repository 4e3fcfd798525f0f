//! LaTeX source templates wrapping submitted fragments.
//!
//! A template splits on `\pages`: everything before is sent once at
//! session start, everything after at close. Each submitted fragment is
//! wrapped in the start/stop page markers, which a template may override
//! with `\def\startpage{...}` / `\def\stoppage{...}` lines in its
//! preamble.

use crate::error::{DaemonError, DaemonResult};

/// The built-in template: every fragment becomes one `preview` page.
const DEFAULT_PREAMBLE: &str = r"\documentclass[12pt]{article}
\usepackage[T1]{fontenc}
\usepackage[active]{preview}

\def\startpage{\begin{preview}}
\def\stoppage{\end{preview}}

\additionalpackages

\begin{document}
";

const DEFAULT_POSTAMBLE: &str = r"
\end{document}
";

/// Placeholder replaced by the accumulated `\usepackage` lines.
const PACKAGES_MARKER: &str = r"\additionalpackages";

#[derive(Debug, Clone)]
pub struct TexTemplate {
    pre: String,
    post: String,
    start_page: String,
    stop_page: String,
    packages: Vec<(String, Vec<String>)>,
}

impl Default for TexTemplate {
    fn default() -> Self {
        Self {
            pre: DEFAULT_PREAMBLE.to_owned(),
            post: DEFAULT_POSTAMBLE.to_owned(),
            start_page: r"\begin{preview}".to_owned(),
            stop_page: r"\end{preview}".to_owned(),
            packages: Vec::new(),
        }
    }
}

impl TexTemplate {
    /// Parse a template string.
    ///
    /// # Errors
    ///
    /// [`DaemonError::Template`] when the string has no `\pages` marker.
    pub fn parse(text: &str) -> DaemonResult<Self> {
        let (pre, post) = text
            .split_once(r"\pages")
            .ok_or_else(|| DaemonError::Template(r"missing \pages marker".to_owned()))?;

        let mut template = Self {
            pre: pre.to_owned(),
            post: post.to_owned(),
            ..Self::default()
        };
        for line in pre.lines() {
            if let Some((name, value)) = parse_def(line) {
                match name {
                    "startpage" => template.start_page = value.to_owned(),
                    "stoppage" => template.stop_page = value.to_owned(),
                    _ => {}
                }
            }
        }
        Ok(template)
    }

    /// Queue a `\usepackage` line for the preamble.
    #[must_use]
    pub fn add_package(mut self, name: &str, options: &[&str]) -> Self {
        self.packages
            .push((name.to_owned(), options.iter().map(|s| (*s).to_owned()).collect()));
        self
    }

    /// The preamble with the package placeholder expanded.
    #[must_use]
    pub fn preamble(&self) -> String {
        let packages = self
            .packages
            .iter()
            .map(|(name, opts)| {
                if opts.is_empty() {
                    format!("\\usepackage{{{name}}}")
                } else {
                    format!("\\usepackage[{}]{{{name}}}", opts.join(","))
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.pre.replace(PACKAGES_MARKER, &packages)
    }

    /// Everything after `\pages`.
    #[must_use]
    pub fn postamble(&self) -> &str {
        &self.post
    }

    /// Wrap a fragment in the page markers.
    #[must_use]
    pub fn page(&self, content: &str) -> String {
        format!("{}\n{}\n{}", self.start_page, content, self.stop_page)
    }
}

/// Parse a `\def\name{value}` line; the value runs to the line's last
/// closing brace, so nested groups survive.
fn parse_def(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix(r"\def\")?;
    let open = rest.find('{')?;
    let close = rest.rfind('}')?;
    if close <= open {
        return None;
    }
    Some((&rest[..open], &rest[open + 1..close]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
