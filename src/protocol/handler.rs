use crate::config::Config;
use crate::error::AppError;
use crate::protocol::messages::{
    CustomEmulatorPathsPayload, EmulatorConfigPayload, EventSink, Inbound, Outbound, SuccessPayload,
};
use crate::services::emulator_paths::EmulatorResolver;
use crate::services::process_supervisor::ProcessSupervisor;
use crate::services::pty_bridge::PtyBridge;
use crate::utils::config_store::ConfigStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Every service the orchestrator owns, built from one config.
#[derive(Debug)]
pub struct AppServices {
    pub config: Arc<Config>,
    pub store: Arc<ConfigStore>,
    pub resolver: Arc<EmulatorResolver>,
    pub supervisor: ProcessSupervisor,
    pub pty: Arc<PtyBridge>,
}

impl AppServices {
    pub fn new(config: Arc<Config>, events: EventSink) -> Self {
        let store = Arc::new(ConfigStore::new(config.config_dir.clone()));
        let resolver = Arc::new(EmulatorResolver::new(config.clone(), store.clone()));
        let supervisor = ProcessSupervisor::new(config.clone(), resolver.clone(), store.clone(), events.clone());
        let pty = Arc::new(PtyBridge::new(config.clone(), supervisor.emulator_slot(), events));
        Self { config, store, resolver, supervisor, pty }
    }
}

/// Dispatches inbound channel messages one at a time and turns failures into events.
#[derive(Debug)]
pub struct OrchestratorHandler {
    services: Arc<AppServices>,
    events: EventSink,
}

impl OrchestratorHandler {
    pub fn new(config: Arc<Config>, events: EventSink) -> Self {
        Self {
            services: Arc::new(AppServices::new(config, events.clone())),
            events,
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.services
    }

    #[instrument(skip(self, message), fields(channel = message.channel()))]
    pub fn handle(&self, message: Inbound) {
        let channel = message.channel();
        debug!("Handling inbound message");
        if let Err(e) = self.dispatch(message) {
            self.recover(channel, e);
        }
    }

    fn dispatch(&self, message: Inbound) -> Result<(), AppError> {
        let services = &self.services;
        match message {
            Inbound::RunGame(params) => services.supervisor.run_game(&params)?,
            Inbound::StopGame => services.supervisor.stop_game(),
            Inbound::TerminalSpawn(params) => services.pty.spawn(&params),
            Inbound::TerminalWrite(data) => {
                services.pty.write(&data);
            }
            Inbound::TerminalResize(size) => {
                if size.cols == 0 || size.rows == 0 {
                    return Err(AppError::InvalidInputArgument(format!(
                        "Terminal size must be non-zero, got {}x{}",
                        size.cols, size.rows
                    )));
                }
                if !services.pty.resize(size.cols, size.rows) {
                    debug!(cols = size.cols, rows = size.rows, "Resize without a live terminal ignored");
                }
            }
            Inbound::TerminalCleanup(target) => {
                services.pty.cleanup(&target.terminal_id);
            }
            Inbound::TerminalFocus(target) => services.pty.focus(&target.terminal_id),
            Inbound::GetAvailableEmulators => {
                let available = services.resolver.available_emulators(None);
                info!(count = available.emulators.len(), "Reporting available emulators");
                self.events.emit(Outbound::AvailableEmulators(available));
            }
            Inbound::GetEmulatorConfig => self.events.emit(Outbound::EmulatorConfig(EmulatorConfigPayload {
                success: true,
                config: services.store.emulator_config(),
            })),
            Inbound::SetEmulatorConfig(config) => {
                services.store.save_emulator_config(&config)?;
                info!(selected = ?config.selected_emulator, "Emulator selection saved");
                self.events.emit(Outbound::EmulatorConfigUpdated(SuccessPayload { success: true }));
            }
            Inbound::GetCustomEmulatorPaths => {
                self.events.emit(Outbound::CustomEmulatorPaths(CustomEmulatorPathsPayload {
                    success: true,
                    paths: services.resolver.custom_paths_with_defaults(),
                }))
            }
            Inbound::SetCustomEmulatorPaths(paths) => {
                services.store.save_custom_emulator_paths(&paths)?;
                self.events.emit(Outbound::CustomEmulatorPaths(CustomEmulatorPathsPayload {
                    success: true,
                    paths: services.resolver.custom_paths_with_defaults(),
                }));
            }
        }
        Ok(())
    }

    /// Translates a failed request into the reply its channel expects.
    fn recover(&self, channel: &'static str, e: AppError) {
        match channel {
            "run-game" => {
                warn!(error = %e, precondition = e.is_precondition(), "Run request rejected");
                self.events.run_game_error(e.to_string());
            }
            "set-emulator-config" => {
                error!(error = %e, "Failed to save emulator selection");
                self.events.emit(Outbound::EmulatorConfigUpdated(SuccessPayload { success: false }));
            }
            "set-custom-emulator-paths" => {
                error!(error = %e, "Failed to save custom emulator paths");
                self.events.emit(Outbound::CustomEmulatorPaths(CustomEmulatorPathsPayload {
                    success: false,
                    paths: self.services.store.custom_emulator_paths(),
                }));
            }
            _ => error!(channel, error = %e, "Request failed"),
        }
    }

    pub async fn run(&self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(message) = inbound.recv().await {
            self.handle(message);
        }
        self.shutdown();
    }

    /// Kills every child without reporting anything.
    pub fn shutdown(&self) {
        let services = &self.services;
        let build = services.supervisor.build_slot().kill();
        let emulator = services.supervisor.emulator_slot().kill();
        let terminal = services.pty.kill();
        info!(build, emulator, terminal, "Orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{RunGameParams, TerminalRef, TerminalResizeParams};
    use crate::utils::config_store::EmulatorConfig;
    use std::collections::BTreeMap;

    fn handler(home: &std::path::Path) -> (OrchestratorHandler, mpsc::UnboundedReceiver<Outbound>) {
        let (events, rx) = EventSink::channel();
        (OrchestratorHandler::new(Arc::new(Config::with_home(home)), events), rx)
    }

    #[tokio::test]
    async fn invalid_run_request_becomes_run_game_error() {
        let home = tempfile::tempdir().unwrap();
        let (h, mut rx) = handler(home.path());
        h.handle(Inbound::RunGame(RunGameParams { path: "/no/project".into(), toolkit_path: "/no/toolkit".into() }));
        match rx.try_recv().unwrap() {
            Outbound::RunGameError(p) => assert!(p.message.contains("Toolkit")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emulator_selection_round_trip() {
        let home = tempfile::tempdir().unwrap();
        let (h, mut rx) = handler(home.path());
        h.handle(Inbound::SetEmulatorConfig(EmulatorConfig { selected_emulator: Some("blastem".into()) }));
        assert!(matches!(rx.try_recv().unwrap(), Outbound::EmulatorConfigUpdated(SuccessPayload { success: true })));

        h.handle(Inbound::GetEmulatorConfig);
        match rx.try_recv().unwrap() {
            Outbound::EmulatorConfig(p) => assert_eq!(p.config.selected_emulator.as_deref(), Some("blastem")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn custom_paths_are_saved_and_reported() {
        let home = tempfile::tempdir().unwrap();
        let (h, mut rx) = handler(home.path());
        let mut paths = BTreeMap::new();
        paths.insert("blastem".to_string(), " /opt/blastem/blastem ".to_string());
        h.handle(Inbound::SetCustomEmulatorPaths(paths));

        match rx.try_recv().unwrap() {
            Outbound::CustomEmulatorPaths(p) => {
                assert!(p.success);
                assert_eq!(p.paths["blastem"], "/opt/blastem/blastem");
                assert_eq!(p.paths["gen_sdl2"], "");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn available_emulators_reply_lists_catalogue() {
        let home = tempfile::tempdir().unwrap();
        let (h, mut rx) = handler(home.path());
        h.handle(Inbound::GetAvailableEmulators);
        match rx.try_recv().unwrap() {
            Outbound::AvailableEmulators(a) => {
                assert!(a.emulators.is_empty());
                assert_eq!(a.list.len(), 4);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn terminal_requests_without_session_are_silent() {
        let home = tempfile::tempdir().unwrap();
        let (h, mut rx) = handler(home.path());
        h.handle(Inbound::TerminalWrite("ls\r".into()));
        h.handle(Inbound::TerminalResize(TerminalResizeParams { cols: 100, rows: 30 }));
        h.handle(Inbound::TerminalCleanup(TerminalRef { terminal_id: "t".into() }));
        h.handle(Inbound::TerminalFocus(TerminalRef { terminal_id: "t".into() }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_loop_ends_with_channel() {
        let home = tempfile::tempdir().unwrap();
        let (h, mut rx) = handler(home.path());
        let (tx, inbound) = mpsc::unbounded_channel();
        tx.send(Inbound::StopGame).unwrap();
        drop(tx);
        h.run(inbound).await;
        assert!(matches!(rx.try_recv().unwrap(), Outbound::EmulatorClosed(_)));
    }
}
