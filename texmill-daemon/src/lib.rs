//! A persistent typesetting session for `TexMill`.
//!
//! One long-lived `latex` process typesets submitted fragments page by
//! page. LaTeX source flows in through a named pipe, DVI bytes flow
//! back through another, and the engine's log stream is classified
//! incrementally to pair each page with its diagnostics.

pub mod error;
pub mod logparse;
pub mod session;
pub mod template;
pub mod workspace;

pub use error::{DaemonError, DaemonResult};
pub use texmill_fonts::assemble::{PageEvent, RenderedPage};
pub use logparse::{Diagnostic, LogParser, TexEvent};
pub use session::{SessionConfig, TexSession, TypesetPage};
pub use template::TexTemplate;
pub use workspace::Workspace;
