use crate::config::Config;
use crate::error::AppError;
use crate::protocol::messages::{
    BuildCompletePayload, CompilationErrorsPayload, EmulatorClosedPayload, EventSink, Outbound,
    RunGameParams,
};
use crate::services::diagnostics::classify_output;
use crate::services::emulator_paths::{resolve_rom_artifact, EmulatorResolver, TOOLKIT_RUNNER};
use crate::services::process_slot::{ProcessSlot, SlotLease, SlotOutcome};
use crate::utils::config_store::ConfigStore;
use crate::utils::line_ending_handler::for_terminal;
use crate::utils::path_utils::existing_dir;
use crate::utils::utf8_stream::Utf8Decoder;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Owns the build slot and the emulator slot and drives the build → emulator pipeline.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    config: Arc<Config>,
    resolver: Arc<EmulatorResolver>,
    store: Arc<ConfigStore>,
    build: Arc<ProcessSlot>,
    emulator: Arc<ProcessSlot>,
    /// Bumped by every accepted run and every stop. Only the latest run may launch an emulator.
    current_run: Arc<Mutex<u64>>,
    events: EventSink,
}

fn shell_command(script: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(script);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

fn describe_code(code: Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
}

/// Waits for the child, honouring a direct-kill request from its slot.
async fn wait_or_kill(child: &mut Child, kill_rx: &mut oneshot::Receiver<()>) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Direct kill failed, child probably exited");
            }
            child.wait().await
        }
    }
}

/// Streams one pipe to the terminal surface, optionally accumulating the raw bytes.
fn pump_output<R>(
    mut reader: R,
    stream: &'static str,
    accumulated: Option<Arc<Mutex<Vec<u8>>>>,
    events: EventSink,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut decoder = Utf8Decoder::new();
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    trace!(stream, bytes = n, "Output chunk");
                    let text = for_terminal(&decoder.decode(&buf[..n]));
                    match &accumulated {
                        // Append and emit under one lock so both keep arrival order.
                        Some(acc) => {
                            let mut acc = acc.lock();
                            acc.extend_from_slice(&buf[..n]);
                            events.terminal(text);
                        }
                        None => events.terminal(text),
                    }
                }
                Err(e) => {
                    warn!(stream, error = %e, "Failed to read child output");
                    break;
                }
            }
        }
        let tail = decoder.finish();
        if !tail.is_empty() {
            events.terminal(for_terminal(&tail));
        }
    })
}

/// Waits for every output reader so the pipes are fully drained.
async fn drain_readers(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        if let Err(e) = reader.await {
            warn!(error = %e, "Output reader task failed");
        }
    }
}

fn pump_child_output(child: &mut Child, accumulated: Option<Arc<Mutex<Vec<u8>>>>, events: &EventSink) -> Vec<JoinHandle<()>> {
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(pump_output(stdout, "stdout", accumulated.clone(), events.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(pump_output(stderr, "stderr", accumulated, events.clone()));
    }
    readers
}

fn spawn_stdin_writer(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = stdin.write_all(&data).await {
                debug!(error = %e, "Emulator stdin closed");
                break;
            }
            if let Err(e) = stdin.flush().await {
                debug!(error = %e, "Failed to flush emulator stdin");
                break;
            }
        }
    });
}

impl ProcessSupervisor {
    pub fn new(
        config: Arc<Config>,
        resolver: Arc<EmulatorResolver>,
        store: Arc<ConfigStore>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            resolver,
            store,
            build: Arc::new(ProcessSlot::new("build")),
            emulator: Arc::new(ProcessSlot::new("emulator")),
            current_run: Arc::new(Mutex::new(0)),
            events,
        }
    }

    pub fn build_slot(&self) -> Arc<ProcessSlot> {
        self.build.clone()
    }

    pub fn emulator_slot(&self) -> Arc<ProcessSlot> {
        self.emulator.clone()
    }

    /// Validates paths, preempts any running build or emulator and starts a new build.
    ///
    /// Errors are precondition or spawn failures; nothing is left running when one is returned.
    #[instrument(skip(self, params), fields(project = %params.path, toolkit = %params.toolkit_path))]
    pub fn run_game(&self, params: &RunGameParams) -> Result<(), AppError> {
        let toolkit = existing_dir(&params.toolkit_path, "Toolkit")?;
        let project = existing_dir(&params.path, "Project")?;

        let run = {
            let mut current = self.current_run.lock();
            *current += 1;
            *current
        };
        if self.build.kill() {
            info!("Stopped previous build");
        }
        if self.emulator.kill() {
            info!("Stopped previous emulator");
        }

        let command_line = format!(
            "{}=\"{}\" {}",
            self.config.toolkit_env_var,
            toolkit.display(),
            self.config.build_command
        );
        info!(run, command = %command_line, "Starting build");
        self.events.terminal(format!("\r\n> Starting build: {}\r\n", command_line));

        let mut cmd = shell_command(&self.config.build_command);
        cmd.current_dir(&project)
            .env(&self.config.toolkit_env_var, &toolkit)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        own_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            error!(error = %e, "Failed to spawn build");
            AppError::CommandExecutionError(format!("Failed to start build '{}': {}", self.config.build_command, e))
        })?;

        let lease = self.build.acquire(child.id(), None);
        let accumulated = Arc::new(Mutex::new(Vec::new()));
        let readers = pump_child_output(&mut child, Some(accumulated.clone()), &self.events);

        let this = self.clone();
        tokio::spawn(async move {
            this.monitor_build(run, child, lease, readers, accumulated, project, toolkit).await;
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn monitor_build(
        self,
        run: u64,
        mut child: Child,
        mut lease: SlotLease,
        readers: Vec<JoinHandle<()>>,
        accumulated: Arc<Mutex<Vec<u8>>>,
        project: PathBuf,
        toolkit: PathBuf,
    ) {
        let code = match wait_or_kill(&mut child, &mut lease.kill_rx).await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(error = %e, "Failed to wait for build");
                None
            }
        };
        // Helpers that outlive the shell keep the pipes open. The slot stays
        // held until they close so a stop can still reach the whole group.
        drain_readers(readers).await;
        if self.build.finish(lease.generation, code) == SlotOutcome::Killed {
            info!(code = ?code, "Build was stopped, skipping exit handling");
            return;
        }

        let output = String::from_utf8_lossy(&accumulated.lock()).into_owned();

        let errors = classify_output(&output);
        if !errors.is_empty() {
            info!(count = errors.len(), "Build produced diagnostics");
            self.events.emit(Outbound::CompilationErrors(CompilationErrorsPayload { errors, output }));
        }

        if code != Some(0) {
            warn!(code = ?code, "Build failed");
            self.events.run_game_error(format!("Build failed with exit code {}.", describe_code(code)));
            return;
        }

        let Some(rom_path) = resolve_rom_artifact(&project) else {
            warn!(project = %project.display(), "No ROM artifact after successful build");
            self.events.run_game_error("ROM not found after build.");
            return;
        };
        self.launch_emulator(run, &project, &toolkit, rom_path);
    }

    /// Selected emulator, then the default one, then the toolkit's own runner.
    fn select_emulator(&self, toolkit: &Path) -> PathBuf {
        let selected = self
            .store
            .emulator_config()
            .selected_emulator
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.config.default_emulator.clone());

        self.resolver
            .resolve_executable(&selected, Some(toolkit))
            .or_else(|| self.resolver.resolve_executable(&self.config.default_emulator, Some(toolkit)))
            .unwrap_or_else(|| {
                debug!(selected = %selected, "Falling back to toolkit runner");
                toolkit.join(TOOLKIT_RUNNER)
            })
    }

    /// Starts the emulator for `run` unless a stop or a newer run came in first.
    fn launch_emulator(&self, run: u64, project: &Path, toolkit: &Path, rom_path: PathBuf) {
        // Held until build-complete is out, so a stop lands either before the
        // launch or after it with the emulator in its slot.
        let current = self.current_run.lock();
        if *current != run {
            info!(run, latest = *current, "Run was cancelled before the emulator started");
            return;
        }

        let emulator = self.select_emulator(toolkit);
        info!(emulator = %emulator.display(), rom = %rom_path.display(), "Launching emulator");
        self.events.terminal(format!(
            "\r\n> Running: \"{}\" \"{}\"\r\n",
            emulator.display(),
            rom_path.display()
        ));

        let mut cmd = Command::new(&emulator);
        cmd.arg(&rom_path)
            .current_dir(project)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        own_process_group(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, emulator = %emulator.display(), "Failed to spawn emulator");
                self.events
                    .run_game_error(AppError::EmulatorLaunchError(format!("{}: {}", emulator.display(), e)).to_string());
                return;
            }
        };

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        if let Some(stdin) = child.stdin.take() {
            spawn_stdin_writer(stdin, stdin_rx);
        }
        let lease = self.emulator.acquire(child.id(), Some(stdin_tx));

        self.events.emit(Outbound::RunGameBuildComplete(BuildCompletePayload {
            rom_path,
            emulator,
        }));
        drop(current);

        let readers = pump_child_output(&mut child, None, &self.events);
        let this = self.clone();
        tokio::spawn(async move {
            this.monitor_emulator(child, lease, readers).await;
        });
    }

    async fn monitor_emulator(self, mut child: Child, mut lease: SlotLease, readers: Vec<JoinHandle<()>>) {
        match wait_or_kill(&mut child, &mut lease.kill_rx).await {
            Ok(status) => {
                let code = status.code();
                drain_readers(readers).await;
                if self.emulator.finish(lease.generation, code) == SlotOutcome::Killed {
                    debug!(code = ?code, "Emulator was stopped");
                    return;
                }
                info!(code = ?code, "Emulator exited");
                self.events.emit(Outbound::EmulatorClosed(EmulatorClosedPayload { code, interrupted: None }));
            }
            Err(e) => {
                if self.emulator.finish(lease.generation, None) == SlotOutcome::Killed {
                    return;
                }
                error!(error = %e, "Emulator process error");
                self.events.run_game_error(format!("Emulator error: {}", e));
            }
        }
    }

    /// Kills whatever is running and reports a synthetic interrupted close.
    #[instrument(skip(self))]
    pub fn stop_game(&self) {
        *self.current_run.lock() += 1;
        let build_was_running = self.build.kill();
        let emulator_was_running = self.emulator.kill();
        info!(build_was_running, emulator_was_running, "Stop requested");
        self.events.emit(Outbound::EmulatorClosed(EmulatorClosedPayload {
            code: Some(0),
            interrupted: Some(true),
        }));
    }
}
