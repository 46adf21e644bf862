//! Channel payloads exchanged between the orchestrator and the presentation
//! process. On the wire every message is `{"channel": "<name>", "payload": ...}`.

use crate::services::diagnostics::Diagnostic;
use crate::services::emulator_paths::AvailableEmulators;
use crate::services::terminal_profiles::ProfileId;
use crate::utils::config_store::{CustomEmulatorPaths, EmulatorConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunGameParams {
    pub path: String,
    pub toolkit_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalSpawnParams {
    pub cwd: Option<String>,
    pub terminal_id: Option<String>,
    pub profile: Option<ProfileId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalResizeParams {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalRef {
    pub terminal_id: String,
}

/// Presentation → orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum Inbound {
    RunGame(RunGameParams),
    StopGame,
    TerminalSpawn(TerminalSpawnParams),
    TerminalWrite(String),
    TerminalResize(TerminalResizeParams),
    TerminalCleanup(TerminalRef),
    TerminalFocus(TerminalRef),
    GetAvailableEmulators,
    GetEmulatorConfig,
    SetEmulatorConfig(EmulatorConfig),
    GetCustomEmulatorPaths,
    SetCustomEmulatorPaths(CustomEmulatorPaths),
}

impl Inbound {
    pub fn channel(&self) -> &'static str {
        match self {
            Inbound::RunGame(_) => "run-game",
            Inbound::StopGame => "stop-game",
            Inbound::TerminalSpawn(_) => "terminal-spawn",
            Inbound::TerminalWrite(_) => "terminal-write",
            Inbound::TerminalResize(_) => "terminal-resize",
            Inbound::TerminalCleanup(_) => "terminal-cleanup",
            Inbound::TerminalFocus(_) => "terminal-focus",
            Inbound::GetAvailableEmulators => "get-available-emulators",
            Inbound::GetEmulatorConfig => "get-emulator-config",
            Inbound::SetEmulatorConfig(_) => "set-emulator-config",
            Inbound::GetCustomEmulatorPaths => "get-custom-emulator-paths",
            Inbound::SetCustomEmulatorPaths(_) => "set-custom-emulator-paths",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCompletePayload {
    pub rom_path: PathBuf,
    pub emulator: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationErrorsPayload {
    pub errors: Vec<Diagnostic>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorClosedPayload {
    pub code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSpawnedPayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessPayload {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorConfigPayload {
    pub success: bool,
    pub config: EmulatorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEmulatorPathsPayload {
    pub success: bool,
    pub paths: CustomEmulatorPaths,
}

/// Orchestrator → presentation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum Outbound {
    TerminalIncomingData(String),
    RunGameError(ErrorPayload),
    RunGameBuildComplete(BuildCompletePayload),
    CompilationErrors(CompilationErrorsPayload),
    EmulatorClosed(EmulatorClosedPayload),
    TerminalSpawned(TerminalSpawnedPayload),
    AvailableEmulators(AvailableEmulators),
    EmulatorConfig(EmulatorConfigPayload),
    EmulatorConfigUpdated(SuccessPayload),
    CustomEmulatorPaths(CustomEmulatorPathsPayload),
}

impl Outbound {
    pub fn channel(&self) -> &'static str {
        match self {
            Outbound::TerminalIncomingData(_) => "terminal-incoming-data",
            Outbound::RunGameError(_) => "run-game-error",
            Outbound::RunGameBuildComplete(_) => "run-game-build-complete",
            Outbound::CompilationErrors(_) => "compilation-errors",
            Outbound::EmulatorClosed(_) => "emulator-closed",
            Outbound::TerminalSpawned(_) => "terminal-spawned",
            Outbound::AvailableEmulators(_) => "available-emulators",
            Outbound::EmulatorConfig(_) => "emulator-config",
            Outbound::EmulatorConfigUpdated(_) => "emulator-config-updated",
            Outbound::CustomEmulatorPaths(_) => "custom-emulator-paths",
        }
    }
}

/// Ordered outbound stream shared by every producer in the orchestrator.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Drops the event when the presentation side has gone away.
    pub fn emit(&self, event: Outbound) {
        if let Err(e) = self.tx.send(event) {
            debug!(channel = e.0.channel(), "Presentation receiver closed, dropping event");
        }
    }

    pub fn terminal(&self, text: impl Into<String>) {
        self.emit(Outbound::TerminalIncomingData(text.into()));
    }

    pub fn run_game_error(&self, message: impl Into<String>) {
        self.emit(Outbound::RunGameError(ErrorPayload { message: message.into() }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_run_game_from_wire() {
        let msg: Inbound = serde_json::from_value(json!({
            "channel": "run-game",
            "payload": {"path": "/proj", "toolkitPath": "/toolkit"}
        }))
        .unwrap();
        assert_eq!(
            msg,
            Inbound::RunGame(RunGameParams { path: "/proj".into(), toolkit_path: "/toolkit".into() })
        );
    }

    #[test]
    fn inbound_unit_channels_need_no_payload() {
        let msg: Inbound = serde_json::from_value(json!({"channel": "stop-game"})).unwrap();
        assert_eq!(msg, Inbound::StopGame);
    }

    #[test]
    fn inbound_terminal_write_is_raw_text() {
        let msg: Inbound =
            serde_json::from_value(json!({"channel": "terminal-write", "payload": "ls\r"})).unwrap();
        assert_eq!(msg, Inbound::TerminalWrite("ls\r".into()));
    }

    #[test]
    fn inbound_spawn_tolerates_missing_fields() {
        let msg: Inbound =
            serde_json::from_value(json!({"channel": "terminal-spawn", "payload": {}})).unwrap();
        assert_eq!(msg, Inbound::TerminalSpawn(TerminalSpawnParams::default()));
    }

    #[test]
    fn outbound_wire_shapes() {
        let closed = serde_json::to_value(Outbound::EmulatorClosed(EmulatorClosedPayload {
            code: Some(0),
            interrupted: Some(true),
        }))
        .unwrap();
        assert_eq!(
            closed,
            json!({"channel": "emulator-closed", "payload": {"code": 0, "interrupted": true}})
        );

        let complete = serde_json::to_value(Outbound::RunGameBuildComplete(BuildCompletePayload {
            rom_path: "/proj/out/rom.bin".into(),
            emulator: "/emu/gen_sdl2".into(),
        }))
        .unwrap();
        assert_eq!(complete["payload"]["romPath"], "/proj/out/rom.bin");
        assert_eq!(complete["channel"], "run-game-build-complete");
    }

    #[test]
    fn channel_names_match_serialized_tags() {
        let event = Outbound::TerminalIncomingData("hi".into());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["channel"], event.channel());
    }

    #[tokio::test]
    async fn sink_survives_closed_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.terminal("nobody listening");
    }
}
