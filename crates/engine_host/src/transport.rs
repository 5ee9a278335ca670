//! Process handle abstraction.
//!
//! The supervisor never touches pipes directly. It talks to an
//! [`EngineTransport`]: write one line, receive output lines from a channel,
//! ask whether the process is still alive. [`ChildProcess`] is the real
//! implementation; tests substitute a scripted one.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver};
use tracing::{debug, info, warn};

use crate::EngineError;

/// Line-oriented connection to an engine.
pub trait EngineTransport: Send {
    /// Writes one command line. The newline is appended by the transport.
    fn write_line(&mut self, line: &str) -> Result<(), EngineError>;

    /// Receiver for the engine's output lines.
    ///
    /// Every call hands out a clone of the same channel: each line is
    /// delivered to exactly one receiver. The channel disconnects when the
    /// engine closes its output.
    fn output(&self) -> Receiver<String>;

    /// Whether the engine process is still running.
    fn is_alive(&mut self) -> bool;
}

/// Creates fresh transports; called at start-up and after every crash.
pub type TransportFactory =
    Box<dyn FnMut() -> Result<Box<dyn EngineTransport>, EngineError> + Send>;

/// An engine running as a child process with piped stdin/stdout.
///
/// A pump thread forwards stdout lines into a channel so that readers can
/// wait on them with a timeout.
pub struct ChildProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    lines: Receiver<String>,
    _pump: JoinHandle<()>,
}

impl ChildProcess {
    pub fn spawn(path: &Path, args: &[String]) -> Result<Self, EngineError> {
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(EngineError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(EngineError::MissingPipe("stdout"))?;

        let (tx, rx) = unbounded();
        let pump = thread::Builder::new()
            .name("engine-stdout".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    debug!(target: "engine_host::io", "<< {}", line);
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                debug!("engine stdout closed");
            })?;

        info!(path = %path.display(), pid = child.id(), "engine process started");
        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            lines: rx,
            _pump: pump,
        })
    }

    /// Factory spawning `path args...` each time it is called.
    pub fn factory(path: PathBuf, args: Vec<String>) -> TransportFactory {
        Box::new(move || {
            let process = ChildProcess::spawn(&path, &args)?;
            Ok(Box::new(process) as Box<dyn EngineTransport>)
        })
    }
}

impl EngineTransport for ChildProcess {
    fn write_line(&mut self, line: &str) -> Result<(), EngineError> {
        debug!(target: "engine_host::io", ">> {}", line);
        writeln!(self.stdin, "{line}")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn output(&self) -> Receiver<String> {
        self.lines.clone()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("engine kill on drop: {}", e);
        }
        match self.child.wait() {
            Ok(status) => debug!(%status, "engine process reaped"),
            Err(e) => warn!("failed to reap engine process: {}", e),
        }
    }
}
