//! Scoped session resources: the working directory, its two named
//! pipes, and the engine process. Every guard releases on drop, so any
//! construction or operation failure still tears the session down.

use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{mkfifo, Pid};
use tempfile::TempDir;
use tracing::debug;

use crate::error::DaemonResult;

/// Source pipe the engine reads LaTeX from.
///
/// The engine derives its jobname from the first input file, and writes
/// `<jobname>.dvi` into the output directory; keeping both names on the
/// `texmill` stem is what routes the DVI output onto the result pipe.
pub const SOURCE_FIFO: &str = "texmill.tex";

/// Result pipe the engine writes DVI bytes to.
pub const RESULT_FIFO: &str = "texmill.dvi";

/// A temporary directory holding exactly the two session pipes.
pub struct Workspace {
    dir: TempDir,
    source: PathBuf,
    result: PathBuf,
}

impl Workspace {
    /// Create the directory and both pipes.
    ///
    /// # Errors
    ///
    /// I/O failures creating the directory or the FIFOs.
    pub fn create() -> DaemonResult<Self> {
        let dir = tempfile::Builder::new().prefix("texmill_").tempdir()?;
        let source = dir.path().join(SOURCE_FIFO);
        let result = dir.path().join(RESULT_FIFO);
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;
        mkfifo(&source, mode)?;
        mkfifo(&result, mode)?;
        debug!(dir = %dir.path().display(), "session workspace created");
        Ok(Self { dir, source, result })
    }

    /// The directory path (the engine's output directory).
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the source pipe.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Path of the result pipe.
    #[must_use]
    pub fn result(&self) -> &Path {
        &self.result
    }
}

/// The engine process, killed and reaped on drop.
pub struct EngineProcess {
    child: Child,
}

impl EngineProcess {
    /// Spawn `program` against a workspace.
    ///
    /// The engine runs in its own process group with stdout piped for
    /// the log watcher and stderr discarded (nothing drains it, and an
    /// undrained pipe would eventually block the engine). A burst of
    /// `X` bytes on stdin defuses any interactive prompt the
    /// nonstopmode flag fails to suppress.
    ///
    /// # Errors
    ///
    /// Spawn failures (program missing, permissions).
    pub fn spawn(program: &str, workspace: &Workspace) -> DaemonResult<Self> {
        let mut child = Command::new(program)
            .arg("-output-directory")
            .arg(workspace.path())
            .arg("-interaction=nonstopmode")
            .arg("-ipc")
            .arg(workspace.source())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()?;
        debug!(program, pid = child.id(), "engine spawned");
        if let Some(stdin) = child.stdin.as_mut() {
            // Best effort: a program that exits at once closes the pipe
            // first, and that is its own failure mode.
            let _ = stdin.write_all(b"XXXXXXXXXX");
        }
        Ok(Self { child })
    }

    /// Take the stdout handle for the log watcher thread.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Kill the engine and everything it forked, ignoring an
    /// already-dead process. The whole group must go: a child holding
    /// the stdout pipe open would keep the log watcher alive.
    pub fn kill(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            let group = Pid::from_raw(self.child.id() as i32);
            let _ = killpg(group, Signal::SIGKILL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Poll for exit until the deadline passes. Returns whether the
    /// process exited on its own.
    ///
    /// # Errors
    ///
    /// I/O failures polling the child.
    pub fn wait_deadline(&mut self, timeout: Duration) -> DaemonResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.child.try_wait()?.is_some() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;

    #[test]
    fn workspace_creates_both_fifos() {
        let ws = Workspace::create().expect("workspace");
        for path in [ws.source(), ws.result()] {
            let meta = std::fs::metadata(path).expect("metadata");
            assert!(meta.file_type().is_fifo(), "{} is a fifo", path.display());
        }
        assert_eq!(ws.source().parent(), Some(ws.path()));
    }

    #[test]
    fn workspace_cleans_up_on_drop() {
        let ws = Workspace::create().expect("workspace");
        let dir = ws.path().to_path_buf();
        drop(ws);
        assert!(!dir.exists(), "directory removed with the guard");
    }

    #[test]
    fn short_lived_engine_is_detected_by_wait() {
        let ws = Workspace::create().expect("workspace");
        let mut engine = EngineProcess::spawn("true", &ws).expect("spawn");
        assert!(
            engine.wait_deadline(Duration::from_secs(2)).expect("wait"),
            "true exits immediately"
        );
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let ws = Workspace::create().expect("workspace");
        assert!(EngineProcess::spawn("/nonexistent/texmill-engine", &ws).is_err());
    }
}
