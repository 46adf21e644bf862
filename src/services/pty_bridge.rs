//! The single interactive shell session shared by every terminal tab.

use crate::config::Config;
use crate::error::AppError;
use crate::protocol::messages::{EventSink, Outbound, TerminalSpawnParams, TerminalSpawnedPayload};
use crate::services::process_slot::ProcessSlot;
use crate::utils::path_utils::terminal_cwd;
use crate::utils::utf8_stream::Utf8Decoder;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, instrument, warn};

struct PtySession {
    id: u64,
    terminal_id: String,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

/// Where a `terminal-write` ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    Emulator,
    Pty,
    Dropped,
}

pub struct PtyBridge {
    config: Arc<Config>,
    emulator: Arc<ProcessSlot>,
    events: EventSink,
    session: Arc<Mutex<Option<PtySession>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for PtyBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyBridge")
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}

fn pty_error(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::PtyError(format!("{}: {}", context, e))
}

impl PtyBridge {
    pub fn new(config: Arc<Config>, emulator: Arc<ProcessSlot>, events: EventSink) -> Self {
        Self {
            config,
            emulator,
            events,
            session: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replaces the live shell with a new one. Failures are reported inline on the output stream.
    #[instrument(skip(self, params), fields(terminal_id = ?params.terminal_id, profile = ?params.profile))]
    pub fn spawn(&self, params: &TerminalSpawnParams) {
        self.kill();
        let terminal_id = params
            .terminal_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        match self.open_session(params.cwd.as_deref(), &terminal_id) {
            Ok(()) => self.events.emit(Outbound::TerminalSpawned(TerminalSpawnedPayload {
                success: true,
                terminal_id: Some(terminal_id),
                error: None,
            })),
            Err(e) => {
                error!(error = %e, "Failed to start terminal");
                self.events.terminal(format!("\r\n[Failed to start terminal: {}]\r\n", e));
                self.events.emit(Outbound::TerminalSpawned(TerminalSpawnedPayload {
                    success: false,
                    terminal_id: Some(terminal_id),
                    error: Some(e.to_string()),
                }));
            }
        }
    }

    fn open_session(&self, cwd: Option<&str>, terminal_id: &str) -> Result<(), AppError> {
        let cwd = terminal_cwd(cwd);
        let shell = self.config.interactive_shell();
        info!(shell = %shell, cwd = %cwd.display(), "Spawning terminal shell");

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: self.config.terminal_rows,
                cols: self.config.terminal_cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| pty_error("Failed to open PTY", e))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.cwd(&cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| pty_error(&format!("Failed to spawn '{}'", shell), e))?;
        // The reader only sees EOF once no slave handle is left open here.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| pty_error("Failed to clone PTY reader", e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| pty_error("Failed to take PTY writer", e))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.session.lock() = Some(PtySession {
            id,
            terminal_id: terminal_id.to_string(),
            master: pair.master,
            writer,
            child,
        });

        let session = self.session.clone();
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name(format!("pty-reader-{}", id))
            .spawn(move || pump_pty(reader, id, session, events));
        if let Err(e) = spawned {
            self.kill();
            return Err(pty_error("Failed to start PTY reader", e));
        }
        Ok(())
    }

    /// Keystrokes go to a running emulator first, then to the shell.
    pub fn write(&self, data: &str) -> WriteTarget {
        if self.emulator.write_stdin(data.as_bytes()) {
            return WriteTarget::Emulator;
        }
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            debug!(bytes = data.len(), "No terminal session, dropping input");
            return WriteTarget::Dropped;
        };
        let result = session
            .writer
            .write_all(data.as_bytes())
            .and_then(|_| session.writer.flush());
        if let Err(e) = result {
            warn!(error = %e, "Failed to write to terminal");
        }
        WriteTarget::Pty
    }

    /// Returns false when there is no live PTY.
    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        let guard = self.session.lock();
        let Some(session) = guard.as_ref() else {
            return false;
        };
        if let Err(e) = session.master.resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 }) {
            warn!(cols, rows, error = %e, "Failed to resize terminal");
        }
        true
    }

    /// Kills the shell only if `terminal_id` still owns it.
    pub fn cleanup(&self, terminal_id: &str) -> bool {
        if self.owner().as_deref() != Some(terminal_id) {
            debug!(terminal_id, "Cleanup for a terminal that does not own the PTY");
            return false;
        }
        self.kill()
    }

    /// There is one shared shell, so focusing a tab changes nothing on this side.
    pub fn focus(&self, terminal_id: &str) {
        debug!(terminal_id, owner = ?self.owner(), "Terminal focus");
    }

    pub fn kill(&self) -> bool {
        let Some(session) = self.session.lock().take() else {
            return false;
        };
        info!(terminal_id = %session.terminal_id, "Killing terminal session");
        let reaper = thread::Builder::new()
            .name("pty-reaper".to_string())
            .spawn(move || terminate_session(session));
        if let Err(e) = reaper {
            warn!(error = %e, "Failed to start PTY reaper thread");
        }
        true
    }

    pub fn is_alive(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn owner(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.terminal_id.clone())
    }
}

fn pump_pty(mut reader: Box<dyn Read + Send>, id: u64, session: Arc<Mutex<Option<PtySession>>>, events: EventSink) {
    let mut buf = [0u8; 4096];
    let mut decoder = Utf8Decoder::new();
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    events.terminal(text);
                }
            }
            Err(e) => {
                debug!(error = %e, "PTY read ended");
                break;
            }
        }
    }
    let tail = decoder.finish();
    if !tail.is_empty() {
        events.terminal(tail);
    }

    // A killed or replaced session has already been taken out of the slot.
    let finished = {
        let mut guard = session.lock();
        match guard.as_ref() {
            Some(s) if s.id == id => guard.take(),
            _ => None,
        }
    };
    if let Some(mut finished) = finished {
        let code = match finished.child.wait() {
            Ok(status) => status.exit_code().to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to reap terminal shell");
                "unknown".to_string()
            }
        };
        info!(terminal_id = %finished.terminal_id, code = %code, "Terminal shell exited");
        events.terminal(format!("\r\n[Process exited with code {}]\r\n", code));
    }
}

fn terminate_session(mut session: PtySession) {
    #[cfg(unix)]
    if let Some(pid) = session.child.process_id().and_then(|p| i32::try_from(p).ok()) {
        // SAFETY: kill(2) has no memory-safety preconditions; the shell leads its own group.
        unsafe {
            libc::kill(-pid, libc::SIGHUP);
        }
    }
    if let Err(e) = session.child.kill() {
        debug!(error = %e, "Terminal shell already gone");
    }
    if let Err(e) = session.child.wait() {
        debug!(error = %e, "Failed to reap killed shell");
    }
}
