#![cfg(unix)]

use retro_studio::config::Config;
use retro_studio::protocol::handler::OrchestratorHandler;
use retro_studio::protocol::messages::{EventSink, Inbound, Outbound, RunGameParams};
use retro_studio::services::diagnostics::DiagnosticKind;
use retro_studio::services::process_slot::SlotState;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const EVENT_TIMEOUT: Duration = Duration::from_secs(20);

struct Fixture {
    _home: TempDir,
    project: TempDir,
    toolkit: TempDir,
    handler: OrchestratorHandler,
    events: UnboundedReceiver<Outbound>,
}

fn fixture(build_command: &str) -> Fixture {
    let home = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let toolkit = tempfile::tempdir().unwrap();

    let mut config = Config::with_home(home.path());
    config.build_command = build_command.to_string();
    config.toolkit_env_var = "RETRO_TOOLKIT".to_string();
    let (sink, events) = EventSink::channel();
    let handler = OrchestratorHandler::new(Arc::new(config), sink);

    Fixture { _home: home, project, toolkit, handler, events }
}

impl Fixture {
    fn run_game(&self) {
        self.handler.handle(Inbound::RunGame(RunGameParams {
            path: self.project.path().to_string_lossy().into_owned(),
            toolkit_path: self.toolkit.path().to_string_lossy().into_owned(),
        }));
    }

    fn use_emulator(&self, path: &Path) {
        let mut paths = BTreeMap::new();
        paths.insert("gen_sdl2".to_string(), path.to_string_lossy().into_owned());
        self.handler.handle(Inbound::SetCustomEmulatorPaths(paths));
    }

    async fn next_event(&mut self) -> Outbound {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream closed")
    }

    /// Collects events up to and including the first one matching `done`.
    async fn events_until(&mut self, done: impl Fn(&Outbound) -> bool) -> Vec<Outbound> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let finished = done(&event);
            seen.push(event);
            if finished {
                return seen;
            }
        }
    }

    async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some(event)) = tokio::time::timeout(window, self.events.recv()).await {
            panic!("unexpected event {:?}", event);
        }
    }
}

fn terminal_text(events: &[Outbound]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            Outbound::TerminalIncomingData(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn position(events: &[Outbound], channel: &str) -> Option<usize> {
    events.iter().position(|e| e.channel() == channel)
}

#[tokio::test]
async fn successful_build_launches_emulator() {
    let mut f = fixture("mkdir -p out && printf rom > out/rom.bin && echo \"built with $RETRO_TOOLKIT\"");
    let emulator = which::which("true").unwrap();
    f.use_emulator(&emulator);
    assert!(matches!(f.next_event().await, Outbound::CustomEmulatorPaths(_)));

    f.run_game();
    let events = f.events_until(|e| matches!(e, Outbound::EmulatorClosed(_))).await;

    let complete = position(&events, "run-game-build-complete").expect("build-complete event");
    match &events[complete] {
        Outbound::RunGameBuildComplete(p) => {
            let project = std::fs::canonicalize(f.project.path()).unwrap();
            assert_eq!(p.rom_path, project.join("out/rom.bin"));
            assert_eq!(p.emulator, emulator);
        }
        _ => unreachable!(),
    }
    match events.last().unwrap() {
        Outbound::EmulatorClosed(p) => {
            assert_eq!(p.code, Some(0));
            assert_eq!(p.interrupted, None);
        }
        _ => unreachable!(),
    }
    assert!(position(&events, "run-game-error").is_none());
    assert!(position(&events, "compilation-errors").is_none());

    let before_launch = terminal_text(&events[..complete]);
    let toolkit = std::fs::canonicalize(f.toolkit.path()).unwrap();
    assert!(before_launch.contains("> Starting build: RETRO_TOOLKIT="));
    assert!(before_launch.contains(&format!("built with {}\r\n", toolkit.display())));
    assert!(before_launch.contains("> Running:"));
    assert_eq!(f.handler.services().supervisor.emulator_slot().state(), SlotState::Idle);
}

#[tokio::test]
async fn failed_build_reports_diagnostics_then_error() {
    let mut f = fixture("echo 'src/main.c:3:1: error: boom' >&2; exit 1");
    f.run_game();
    let events = f.events_until(|e| matches!(e, Outbound::RunGameError(_))).await;

    let diagnostics = position(&events, "compilation-errors").expect("compilation-errors event");
    match &events[diagnostics] {
        Outbound::CompilationErrors(p) => {
            assert_eq!(p.errors.len(), 1);
            let d = &p.errors[0];
            assert_eq!((d.file.as_str(), d.line, d.column), ("src/main.c", 3, 1));
            assert_eq!(d.kind, DiagnosticKind::Error);
            assert_eq!(d.message, "boom");
            assert!(p.output.contains("boom"));
        }
        _ => unreachable!(),
    }
    match events.last().unwrap() {
        Outbound::RunGameError(p) => assert!(p.message.contains("exit code 1")),
        _ => unreachable!(),
    }
    assert!(position(&events, "run-game-build-complete").is_none());
    f.assert_quiet(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn successful_build_without_rom_is_reported() {
    let mut f = fixture("echo nothing to link");
    f.run_game();
    let events = f.events_until(|e| matches!(e, Outbound::RunGameError(_))).await;
    match events.last().unwrap() {
        Outbound::RunGameError(p) => assert_eq!(p.message, "ROM not found after build."),
        _ => unreachable!(),
    }
    assert!(position(&events, "run-game-build-complete").is_none());
}

#[tokio::test]
async fn stop_during_build_is_not_a_failure() {
    let mut f = fixture("sleep 30");
    f.run_game();
    f.handler.handle(Inbound::StopGame);
    f.handler.handle(Inbound::StopGame);

    let events = f.events_until(|e| matches!(e, Outbound::EmulatorClosed(_))).await;
    assert!(position(&events, "run-game-error").is_none());
    match f.next_event().await {
        Outbound::EmulatorClosed(p) => assert_eq!(p.interrupted, Some(true)),
        other => panic!("unexpected event {:?}", other),
    }
    f.assert_quiet(Duration::from_millis(500)).await;
    assert_eq!(f.handler.services().supervisor.build_slot().state(), SlotState::Idle);
}

#[tokio::test]
async fn new_run_preempts_running_build() {
    let mut f = fixture("sleep 30");
    f.run_game();
    f.run_game();
    f.handler.handle(Inbound::StopGame);

    let events = f.events_until(|e| matches!(e, Outbound::EmulatorClosed(_))).await;
    let announcements = terminal_text(&events).matches("> Starting build:").count();
    assert_eq!(announcements, 2);
    f.assert_quiet(Duration::from_millis(500)).await;
}

#[tokio::test]
async fn stop_after_build_exit_cancels_launch() {
    // The backgrounded sleep keeps the output pipes open after the shell exits.
    let mut f = fixture("mkdir -p out && printf rom > out/rom.bin && (sleep 2 &) && echo done");
    f.use_emulator(&which::which("true").unwrap());
    assert!(matches!(f.next_event().await, Outbound::CustomEmulatorPaths(_)));

    f.run_game();
    tokio::time::sleep(Duration::from_millis(700)).await;
    f.handler.handle(Inbound::StopGame);

    let mut events = f.events_until(|e| matches!(e, Outbound::EmulatorClosed(_))).await;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(3), f.events.recv()).await {
        events.push(event);
    }

    assert!(position(&events, "run-game-build-complete").is_none());
    assert!(position(&events, "run-game-error").is_none());
    assert!(!terminal_text(&events).contains("> Running:"));
    let closes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Outbound::EmulatorClosed(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].interrupted, Some(true));
    let supervisor = &f.handler.services().supervisor;
    assert_eq!(supervisor.build_slot().state(), SlotState::Idle);
    assert_eq!(supervisor.emulator_slot().state(), SlotState::Idle);
}

#[tokio::test]
async fn emulator_launch_failure_is_reported() {
    // No emulator is installed and the toolkit has no runner either.
    let mut f = fixture("mkdir -p out && printf rom > out/rom.bin");
    f.run_game();
    let events = f.events_until(|e| matches!(e, Outbound::RunGameError(_))).await;

    match events.last().unwrap() {
        Outbound::RunGameError(p) => assert!(p.message.starts_with("Emulator launch failed"), "{}", p.message),
        _ => unreachable!(),
    }
    assert!(terminal_text(&events).contains("> Running:"));
    assert!(position(&events, "run-game-build-complete").is_none());
    f.assert_quiet(Duration::from_millis(300)).await;
    assert_eq!(f.handler.services().supervisor.emulator_slot().state(), SlotState::Idle);
}

#[tokio::test]
async fn stop_while_emulator_runs() {
    // `sh` plays the emulator and runs the "ROM" as a script.
    let mut f = fixture("mkdir -p out && printf 'sleep 30\\n' > out/rom.bin");
    f.use_emulator(&which::which("sh").unwrap());
    assert!(matches!(f.next_event().await, Outbound::CustomEmulatorPaths(_)));

    f.run_game();
    f.events_until(|e| matches!(e, Outbound::RunGameBuildComplete(_))).await;
    let emulator = f.handler.services().supervisor.emulator_slot();
    assert!(emulator.is_active());

    f.handler.handle(Inbound::StopGame);
    let events = f.events_until(|e| matches!(e, Outbound::EmulatorClosed(_))).await;
    match events.last().unwrap() {
        Outbound::EmulatorClosed(p) => {
            assert_eq!(p.code, Some(0));
            assert_eq!(p.interrupted, Some(true));
        }
        _ => unreachable!(),
    }
    assert!(position(&events, "run-game-error").is_none());
    f.assert_quiet(Duration::from_millis(500)).await;
    assert_eq!(emulator.state(), SlotState::Idle);
}
