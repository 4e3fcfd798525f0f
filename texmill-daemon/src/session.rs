//! The persistent typesetting session.
//!
//! Three workers surround the engine process: a feeder writing queued
//! LaTeX into the source pipe, a watcher classifying the engine's
//! stdout, and a reader decoding DVI pages off the result pipe. The
//! reader is paced by a token channel carrying one unit per submitted
//! page, so it never reads ahead of the engine and page order follows
//! submission order. `submit` is the only place that waits, and a
//! timeout there is treated as a crash.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::ChildStdout;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use texmill_dvi::cursor::StreamSource;
use texmill_dvi::page::DviProgram;
use texmill_dvi::state::DviState;
use texmill_fonts::assemble::{PageAssembler, RenderedPage};
use texmill_fonts::locate::{FontLocator, Kpsewhich, ResourceLocator};
use tracing::{debug, warn};

use crate::error::{DaemonError, DaemonResult};
use crate::logparse::{Diagnostic, LogParser, TexEvent, FATAL_SENTINEL};
use crate::template::TexTemplate;
use crate::workspace::{EngineProcess, Workspace};

/// Session parameters.
pub struct SessionConfig {
    /// Engine executable.
    pub program: String,
    /// Template wrapping submitted fragments.
    pub template: TexTemplate,
    /// Bound on each wait inside `submit` and on `close`.
    pub timeout: Duration,
    /// Pause after opening the source pipe, giving the engine time to
    /// finish starting up before the preamble arrives.
    pub settle: Duration,
    /// Log line after which the engine is considered unusable.
    pub fatal_sentinel: String,
    /// Locator for font resources referenced by the pages.
    pub locator: Arc<dyn ResourceLocator>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: "latex".to_owned(),
            template: TexTemplate::default(),
            timeout: Duration::from_secs(5),
            settle: Duration::from_millis(200),
            fatal_sentinel: FATAL_SENTINEL.to_owned(),
            locator: Arc::new(Kpsewhich),
        }
    }
}

/// One successfully typeset fragment.
#[derive(Debug, Clone)]
pub struct TypesetPage {
    /// Engine page number (counting the warm-up page).
    pub number: u32,
    /// Error lines the engine logged while building this page.
    pub log: Vec<String>,
    /// The decoded page.
    pub page: RenderedPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Crashed,
    Closed,
}

/// A live session around one engine process.
pub struct TexSession {
    // Engine before workspace: kill the process before its output
    // directory disappears.
    engine: EngineProcess,
    _workspace: Workspace,
    template: TexTemplate,
    timeout: Duration,
    source_tx: Option<SyncSender<String>>,
    token_tx: Option<SyncSender<()>>,
    diag_rx: Receiver<Diagnostic>,
    page_rx: Receiver<Result<RenderedPage, String>>,
    feeder: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    state: State,
}

impl fmt::Debug for TexSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TexSession")
            .field("dir", &self._workspace.path())
            .field("timeout", &self.timeout)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TexSession {
    /// Create the workspace, spawn the engine and its three workers,
    /// send the template preamble, and prime the engine with a
    /// throwaway page so the first real submit sees a warm pipeline.
    ///
    /// # Errors
    ///
    /// Resource or spawn failures, or [`DaemonError::EngineCrashed`]
    /// when the engine dies before typesetting the warm-up page.
    pub fn start(config: SessionConfig) -> DaemonResult<Self> {
        let workspace = Workspace::create()?;
        let mut engine = EngineProcess::spawn(&config.program, &workspace)?;

        let (source_tx, source_rx) = mpsc::sync_channel::<String>(32);
        let (token_tx, token_rx) = mpsc::sync_channel::<()>(64);
        let (diag_tx, diag_rx) = mpsc::sync_channel::<Diagnostic>(64);
        let (page_tx, page_rx) = mpsc::sync_channel::<Result<RenderedPage, String>>(16);

        let source_path = workspace.source().to_path_buf();
        let settle = config.settle;
        let feeder = thread::Builder::new()
            .name("texmill-feeder".to_owned())
            .spawn(move || feed_source(&source_path, settle, &source_rx))?;

        let stdout = engine
            .take_stdout()
            .ok_or_else(|| DaemonError::Io(std::io::Error::other("engine stdout not captured")))?;
        let sentinel = config.fatal_sentinel.clone();
        let watcher = thread::Builder::new()
            .name("texmill-watcher".to_owned())
            .spawn(move || watch_log(stdout, &sentinel, &diag_tx))?;

        let result_path = workspace.result().to_path_buf();
        let locator = Arc::clone(&config.locator);
        let reader = thread::Builder::new()
            .name("texmill-reader".to_owned())
            .spawn(move || read_pages(&result_path, locator, &token_rx, &page_tx))?;

        let mut session = Self {
            engine,
            _workspace: workspace,
            template: config.template,
            timeout: config.timeout,
            source_tx: Some(source_tx),
            token_tx: Some(token_tx),
            diag_rx,
            page_rx,
            feeder: Some(feeder),
            watcher: Some(watcher),
            reader: Some(reader),
            state: State::Ready,
        };

        let preamble = session.template.preamble();
        session.send_source(format!("{preamble}\n"))?;
        let warmup = session.submit(r"\LaTeX")?;
        debug!(page = warmup.number, "session ready");
        Ok(session)
    }

    /// Typeset one fragment and wait for its page.
    ///
    /// # Errors
    ///
    /// [`DaemonError::SessionClosed`] after a crash or close;
    /// [`DaemonError::EngineCrashed`] on a fatal diagnostic, a decode
    /// failure, or any timeout. A crash kills the engine and poisons
    /// the session.
    pub fn submit(&mut self, fragment: &str) -> DaemonResult<TypesetPage> {
        if self.state != State::Ready {
            return Err(DaemonError::SessionClosed);
        }

        let page_src = self.template.page(fragment);
        self.send_source(format!("{page_src}\n\n"))?;
        let released = self
            .token_tx
            .as_ref()
            .is_some_and(|tx| tx.send(()).is_ok());
        if !released {
            return Err(self.crash("page reader stopped", Vec::new()));
        }

        let diagnostic = match self.diag_rx.recv_timeout(self.timeout) {
            Ok(d) => d,
            Err(_) => {
                return Err(self.crash("no response from engine within the timeout", Vec::new()))
            }
        };
        let (number, log) = match diagnostic {
            Diagnostic::Fatal { errors } => return Err(self.crash("engine gave up", errors)),
            Diagnostic::Page { number, errors } => (number, errors),
        };

        match self.page_rx.recv_timeout(self.timeout) {
            Ok(Ok(page)) => Ok(TypesetPage { number, log, page }),
            Ok(Err(decode)) => Err(self.crash(&format!("page decode failed: {decode}"), log)),
            Err(_) => Err(self.crash("page stream stalled", log)),
        }
    }

    /// Send the postamble and wait (bounded) for the engine to exit,
    /// killing it if it does not. Resource release does not depend on
    /// this being called.
    ///
    /// # Errors
    ///
    /// I/O failures polling the engine.
    pub fn close(mut self) -> DaemonResult<()> {
        if self.state == State::Ready {
            let postamble = self.template.postamble().to_owned();
            // The engine may already be gone; that is fine at close.
            let _ = self.send_source(postamble);
            self.source_tx = None;
            self.token_tx = None;
            if !self.engine.wait_deadline(self.timeout)? {
                warn!("engine ignored the postamble, killing it");
                self.engine.kill();
            }
        }
        self.state = State::Closed;
        self.shutdown_workers();
        Ok(())
    }

    fn send_source(&mut self, text: String) -> DaemonResult<()> {
        let sent = self
            .source_tx
            .as_ref()
            .is_some_and(|tx| tx.send(text).is_ok());
        if sent {
            Ok(())
        } else {
            Err(self.crash("source feeder stopped", Vec::new()))
        }
    }

    fn crash(&mut self, message: &str, log: Vec<String>) -> DaemonError {
        warn!(message, "session crashed, killing engine");
        self.engine.kill();
        self.state = State::Crashed;
        self.shutdown_workers();
        DaemonError::EngineCrashed {
            message: message.to_owned(),
            log,
        }
    }

    /// Wind down all three workers. Dropping the senders ends their
    /// queue loops; a worker still blocked opening its pipe (the engine
    /// never opened the other end) is released by briefly opening that
    /// end ourselves. Idempotent, so the crash and close paths can both
    /// call it.
    fn shutdown_workers(&mut self) {
        self.source_tx = None;
        self.token_tx = None;
        unblock_fifo(self._workspace.source(), false);
        unblock_fifo(self._workspace.result(), true);
        for worker in [
            self.feeder.take(),
            self.watcher.take(),
            self.reader.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = worker.join();
        }
    }
}

/// Open (and at once close) one end of a FIFO without blocking, so a
/// thread stuck in a blocking open of the other end gets to proceed.
fn unblock_fifo(path: &Path, write: bool) {
    let mut options = OpenOptions::new();
    options.read(!write).write(write);
    let _ = options.custom_flags(nix::libc::O_NONBLOCK).open(path);
}

/// Feeder worker: open the source pipe (blocks until the engine opens
/// its end), nudge it with a newline, wait out the settle delay, then
/// forward queued source strings until the queue closes.
fn feed_source(path: &Path, settle: Duration, rx: &Receiver<String>) {
    let mut pipe = match OpenOptions::new().write(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "source pipe unavailable");
            return;
        }
    };
    if pipe.write_all(b"\n").is_err() {
        return;
    }
    thread::sleep(settle);
    for text in rx.iter() {
        if let Err(e) = pipe.write_all(text.as_bytes()) {
            warn!(error = %e, "engine stopped reading source");
            return;
        }
    }
    debug!("feeder finished");
}

/// Watcher worker: classify engine stdout, accumulating error blocks
/// and attaching them to the page (or fatal) diagnostic they precede.
fn watch_log(mut stdout: ChildStdout, sentinel: &str, tx: &SyncSender<Diagnostic>) {
    let mut parser = LogParser::new(sentinel);
    let mut errors: Vec<String> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match stdout.read(&mut buf) {
            Ok(0) | Err(_) => {
                debug!("engine log closed");
                return;
            }
            Ok(n) => n,
        };
        for event in parser.push(&buf[..n]) {
            let sent = match event {
                TexEvent::PageDone(number) => tx
                    .send(Diagnostic::Page {
                        number,
                        errors: std::mem::take(&mut errors),
                    })
                    .is_ok(),
                TexEvent::Error(text) => {
                    errors.push(text);
                    true
                }
                TexEvent::Fatal(line) => {
                    errors.push(line);
                    tx.send(Diagnostic::Fatal {
                        errors: std::mem::take(&mut errors),
                    })
                    .is_ok()
                }
            };
            if !sent {
                return;
            }
        }
    }
}

/// Reader worker: decode the DVI preamble once, then one page per
/// token. The state and assembler live here exclusively; a decode
/// error is forwarded as a string and ends the worker.
fn read_pages(
    path: &Path,
    locator: Arc<dyn ResourceLocator>,
    token_rx: &Receiver<()>,
    tx: &SyncSender<Result<RenderedPage, String>>,
) {
    let program = match DviProgram::new() {
        Ok(p) => p,
        Err(e) => {
            let _ = tx.send(Err(e.to_string()));
            return;
        }
    };
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            let _ = tx.send(Err(e.to_string()));
            return;
        }
    };
    let mut source = StreamSource::new(BufReader::new(file));
    let mut state = DviState::new();
    let mut assembler = PageAssembler::new(FontLocator::new(locator), program.page.clone());

    if let Err(e) = program.preamble.run(&mut source, &mut state, &mut assembler) {
        let _ = tx.send(Err(e.to_string()));
        return;
    }
    debug!(num = state.num, den = state.den, mag = state.mag, "DVI preamble read");

    while token_rx.recv().is_ok() {
        let result = program
            .begin_page
            .run(&mut source, &mut state, &mut assembler)
            .and_then(|()| program.page.run(&mut source, &mut state, &mut assembler));
        match result {
            Ok(()) => {
                if tx.send(Ok(assembler.take_page())).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e.to_string()));
                return;
            }
        }
    }
    debug!("reader finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_the_engine_conventions() {
        let config = SessionConfig::default();
        assert_eq!(config.program, "latex");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.settle, Duration::from_millis(200));
        assert_eq!(config.fatal_sentinel, FATAL_SENTINEL);
    }
}
