//! In-memory engine for tests.
//!
//! An [`EngineScript`] answers every command written to it with the lines
//! its responder returns and records the commands for later inspection.
//! Its factory hands out [`ScriptedTransport`]s that can be "killed" to
//! exercise crash recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::transport::{EngineTransport, TransportFactory};
use crate::EngineError;

type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

#[derive(Default)]
struct ScriptLog {
    commands: Vec<String>,
    spawned: usize,
    current: Option<(Sender<String>, Arc<AtomicBool>)>,
}

/// Shared handle to a scripted engine and everything written to it.
#[derive(Clone)]
pub struct EngineScript {
    log: Arc<Mutex<ScriptLog>>,
    responder: Responder,
}

impl EngineScript {
    pub fn new(responder: impl Fn(&str) -> Vec<String> + Send + Sync + 'static) -> Self {
        Self {
            log: Arc::new(Mutex::new(ScriptLog::default())),
            responder: Arc::new(responder),
        }
    }

    fn log(&self) -> MutexGuard<'_, ScriptLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Factory producing a fresh scripted process on every call.
    pub fn factory(&self) -> TransportFactory {
        let script = self.clone();
        Box::new(move || {
            let (tx, rx) = unbounded();
            let alive = Arc::new(AtomicBool::new(true));
            {
                let mut log = script.log();
                log.spawned += 1;
                log.current = Some((tx.clone(), Arc::clone(&alive)));
            }
            Ok(Box::new(ScriptedTransport {
                script: script.clone(),
                tx,
                rx,
                alive,
            }) as Box<dyn EngineTransport>)
        })
    }

    /// Every command written so far, across all processes.
    pub fn commands(&self) -> Vec<String> {
        self.log().commands.clone()
    }

    /// Number of processes the factory has created.
    pub fn spawned(&self) -> usize {
        self.log().spawned
    }

    /// Marks the current process as exited.
    pub fn kill(&self) {
        if let Some((_, alive)) = &self.log().current {
            alive.store(false, Ordering::SeqCst);
        }
    }

    /// Pushes an unsolicited output line from the current process.
    pub fn emit(&self, line: &str) {
        if let Some((tx, _)) = &self.log().current {
            let _ = tx.send(line.to_string());
        }
    }
}

/// One scripted engine process.
pub struct ScriptedTransport {
    script: EngineScript,
    tx: Sender<String>,
    rx: Receiver<String>,
    alive: Arc<AtomicBool>,
}

impl EngineTransport for ScriptedTransport {
    fn write_line(&mut self, line: &str) -> Result<(), EngineError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::Disconnected);
        }
        self.script.log().commands.push(line.to_string());
        for reply in (self.script.responder)(line) {
            let _ = self.tx.send(reply);
        }
        Ok(())
    }

    fn output(&self) -> Receiver<String> {
        self.rx.clone()
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
