//! A process-wide slot holding at most one live child process.
//!
//! `acquire` preempts whatever the slot held before, so "last request wins".
//! The task that owns the child calls `finish` when the child exits; the
//! returned [`SlotOutcome`] tells it whether the exit was natural or the result
//! of a kill issued through the slot.

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Running { pid: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    Exited(Option<i32>),
    Killed,
}

#[derive(Debug)]
struct SlotHolder {
    generation: u64,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    stdin_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[derive(Debug, Default)]
struct SlotInner {
    next_generation: u64,
    holder: Option<SlotHolder>,
}

/// Handed to the task that owns the child process.
#[derive(Debug)]
pub struct SlotLease {
    pub generation: u64,
    /// Fires when the slot asks for a direct kill of the child.
    pub kill_rx: oneshot::Receiver<()>,
}

#[derive(Debug)]
pub struct ProcessSlot {
    label: &'static str,
    inner: Mutex<SlotInner>,
}

impl ProcessSlot {
    pub fn new(label: &'static str) -> Self {
        Self { label, inner: Mutex::new(SlotInner::default()) }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Installs a new holder, killing the previous one first.
    pub fn acquire(&self, pid: Option<u32>, stdin_tx: Option<mpsc::UnboundedSender<Vec<u8>>>) -> SlotLease {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (previous, generation) = {
            let mut inner = self.inner.lock();
            inner.next_generation += 1;
            let generation = inner.next_generation;
            let previous = inner.holder.replace(SlotHolder {
                generation,
                pid,
                kill_tx: Some(kill_tx),
                stdin_tx,
            });
            debug!(slot = self.label, generation, pid = ?pid, "Slot acquired");
            (previous, generation)
        };
        if let Some(old) = previous {
            info!(slot = self.label, pid = ?old.pid, "Preempting previous process");
            terminate(self.label, old);
        }
        SlotLease { generation, kill_rx }
    }

    /// Kills the current holder, if any. Returns whether something was running.
    pub fn kill(&self) -> bool {
        let holder = self.inner.lock().holder.take();
        match holder {
            Some(holder) => {
                terminate(self.label, holder);
                true
            }
            None => false,
        }
    }

    /// Called by the owning task once its child has exited.
    pub fn finish(&self, generation: u64, code: Option<i32>) -> SlotOutcome {
        let mut inner = self.inner.lock();
        match &inner.holder {
            Some(holder) if holder.generation == generation => {
                inner.holder = None;
                debug!(slot = self.label, generation, code = ?code, "Process exited");
                SlotOutcome::Exited(code)
            }
            _ => {
                debug!(slot = self.label, generation, "Exit of a killed process");
                SlotOutcome::Killed
            }
        }
    }

    pub fn state(&self) -> SlotState {
        match &self.inner.lock().holder {
            Some(holder) => SlotState::Running { pid: holder.pid },
            None => SlotState::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().holder.is_some()
    }

    /// Forwards `data` to the child's stdin. Returns false when nothing can take it.
    pub fn write_stdin(&self, data: &[u8]) -> bool {
        let inner = self.inner.lock();
        let Some(stdin_tx) = inner.holder.as_ref().and_then(|h| h.stdin_tx.as_ref()) else {
            return false;
        };
        if stdin_tx.send(data.to_vec()).is_err() {
            warn!(slot = self.label, "Child stdin is closed");
        }
        true
    }
}

/// Terminates the holder's whole process group, falling back to a direct kill.
fn terminate(label: &'static str, mut holder: SlotHolder) {
    if group_kill(holder.pid) {
        info!(slot = label, pid = ?holder.pid, "Sent SIGTERM to process group");
        return;
    }
    if let Some(kill_tx) = holder.kill_tx.take() {
        if kill_tx.send(()).is_err() {
            debug!(slot = label, pid = ?holder.pid, "Process already gone");
        } else {
            info!(slot = label, pid = ?holder.pid, "Requested direct kill");
        }
    }
}

#[cfg(unix)]
fn group_kill(pid: Option<u32>) -> bool {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()).filter(|p| *p > 0) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid targets the group.
    unsafe { libc::kill(-pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn group_kill(_pid: Option<u32>) -> bool {
    false
}
