//! Logical terminal tabs layered over the shared PTY session.
//!
//! Tabs are kept in insertion order. At most one is active. Every mutating
//! operation persists a snapshot through a [`TabStore`]; history and the
//! backend correlation id are session-scoped and never persisted.

use crate::error::AppError;
use crate::protocol::messages::{Inbound, TerminalRef, TerminalSpawnParams};
use crate::services::diagnostics::{annotate_output, AnnotatedLine};
use crate::services::pty_bridge::PtyBridge;
use crate::services::terminal_profiles::{prepare_command, ProfileId};
use crate::utils::path_utils::home_dir;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

pub const MAX_HISTORY: usize = 1000;
pub const DEFAULT_FONT_SIZE: u32 = 13;
pub const DEFAULT_THEME: &str = "dark";

static TAB_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"term_(\d+)").expect("tab id pattern must compile"));

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_terminal_id() -> String {
    format!("terminal_{}", uuid::Uuid::new_v4().simple())
}

/// Bounded command history with a recall cursor.
///
/// A cursor of `None` has not been touched yet and behaves like `len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    position: Option<usize>,
}

impl CommandHistory {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Appends unless `command` repeats the last entry. Always resets the cursor.
    pub fn push(&mut self, command: &str) {
        if self.entries.back().map(String::as_str) != Some(command) {
            self.entries.push_back(command.to_string());
            if self.entries.len() > MAX_HISTORY {
                self.entries.pop_front();
            }
        }
        self.reset();
    }

    pub fn previous(&mut self) -> Option<String> {
        let pos = self.position.unwrap_or(self.entries.len());
        if pos == 0 {
            return None;
        }
        self.position = Some(pos - 1);
        self.entries.get(pos - 1).cloned()
    }

    /// Moves toward the end; yields an empty string once the end is reached.
    pub fn next(&mut self) -> String {
        let pos = self.position.unwrap_or(self.entries.len());
        if pos + 1 < self.entries.len() {
            self.position = Some(pos + 1);
            return self.entries[pos + 1].clone();
        }
        self.reset();
        String::new()
    }

    pub fn reset(&mut self) {
        self.position = Some(self.entries.len());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalTab {
    pub id: String,
    pub terminal_id: String,
    pub name: String,
    pub profile: ProfileId,
    pub cwd: String,
    pub is_active: bool,
    #[serde(skip)]
    pub history: CommandHistory,
    pub font_size: u32,
    pub theme: String,
    pub created: i64,
    pub last_active: i64,
}

impl TerminalTab {
    fn restore(saved: PersistedTab) -> Self {
        Self {
            id: saved.id,
            terminal_id: new_terminal_id(),
            name: saved.name,
            profile: saved.profile,
            cwd: saved.cwd,
            is_active: false,
            history: CommandHistory::default(),
            font_size: saved.font_size,
            theme: saved.theme,
            created: saved.created,
            last_active: saved.last_active,
        }
    }

    fn to_persisted(&self) -> PersistedTab {
        PersistedTab {
            id: self.id.clone(),
            name: self.name.clone(),
            profile: self.profile,
            cwd: self.cwd.clone(),
            font_size: self.font_size,
            theme: self.theme.clone(),
            created: self.created,
            last_active: self.last_active,
        }
    }

    fn spawn_params(&self) -> TerminalSpawnParams {
        TerminalSpawnParams {
            cwd: Some(self.cwd.clone()),
            terminal_id: Some(self.terminal_id.clone()),
            profile: Some(self.profile),
        }
    }
}

/// Durable part of a tab. Missing fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedTab {
    pub id: String,
    pub name: String,
    pub profile: ProfileId,
    pub cwd: String,
    pub font_size: u32,
    pub theme: String,
    pub created: i64,
    pub last_active: i64,
}

impl Default for PersistedTab {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: ProfileId::Custom.tab_base_name().to_string(),
            profile: ProfileId::Custom,
            cwd: String::new(),
            font_size: DEFAULT_FONT_SIZE,
            theme: DEFAULT_THEME.to_string(),
            created: 0,
            last_active: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TabRegistrySnapshot {
    pub terminals: Vec<PersistedTab>,
    pub active_tab_id: Option<String>,
    pub last_saved: i64,
}

/// Where registry snapshots live.
pub trait TabStore {
    fn load(&self) -> Result<Option<TabRegistrySnapshot>, AppError>;
    fn save(&self, snapshot: &TabRegistrySnapshot) -> Result<(), AppError>;
    fn clear(&self) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct JsonFileTabStore {
    path: PathBuf,
}

impl JsonFileTabStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TabStore for JsonFileTabStore {
    fn load(&self) -> Result<Option<TabRegistrySnapshot>, AppError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| AppError::PersistenceError(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&self, snapshot: &TabRegistrySnapshot) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(snapshot)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), AppError> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Keeps the serialized snapshot in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTabStore {
    raw: Arc<Mutex<Option<String>>>,
}

impl MemoryTabStore {
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self { raw: Arc::new(Mutex::new(Some(raw.into()))) }
    }

    pub fn raw(&self) -> Option<String> {
        self.raw.lock().clone()
    }
}

impl TabStore for MemoryTabStore {
    fn load(&self) -> Result<Option<TabRegistrySnapshot>, AppError> {
        match self.raw.lock().as_deref() {
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| AppError::PersistenceError(e.to_string())),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &TabRegistrySnapshot) -> Result<(), AppError> {
        *self.raw.lock() = Some(serde_json::to_string(snapshot)?);
        Ok(())
    }

    fn clear(&self) -> Result<(), AppError> {
        *self.raw.lock() = None;
        Ok(())
    }
}

/// The terminal session side of the registry.
pub trait TerminalBackend {
    fn spawn(&self, params: TerminalSpawnParams);
    fn cleanup(&self, terminal_id: &str);
    fn focus(&self, terminal_id: &str);
}

impl TerminalBackend for PtyBridge {
    fn spawn(&self, params: TerminalSpawnParams) {
        PtyBridge::spawn(self, &params);
    }

    fn cleanup(&self, terminal_id: &str) {
        PtyBridge::cleanup(self, terminal_id);
    }

    fn focus(&self, terminal_id: &str) {
        PtyBridge::focus(self, terminal_id);
    }
}

impl<T: TerminalBackend + ?Sized> TerminalBackend for Arc<T> {
    fn spawn(&self, params: TerminalSpawnParams) {
        (**self).spawn(params)
    }

    fn cleanup(&self, terminal_id: &str) {
        (**self).cleanup(terminal_id)
    }

    fn focus(&self, terminal_id: &str) {
        (**self).focus(terminal_id)
    }
}

/// Forwards backend requests as channel messages, for a registry running on the presentation side.
impl TerminalBackend for mpsc::UnboundedSender<Inbound> {
    fn spawn(&self, params: TerminalSpawnParams) {
        if self.send(Inbound::TerminalSpawn(params)).is_err() {
            debug!("Orchestrator channel closed, dropping terminal-spawn");
        }
    }

    fn cleanup(&self, terminal_id: &str) {
        let msg = Inbound::TerminalCleanup(TerminalRef { terminal_id: terminal_id.to_string() });
        if self.send(msg).is_err() {
            debug!("Orchestrator channel closed, dropping terminal-cleanup");
        }
    }

    fn focus(&self, terminal_id: &str) {
        let msg = Inbound::TerminalFocus(TerminalRef { terminal_id: terminal_id.to_string() });
        if self.send(msg).is_err() {
            debug!("Orchestrator channel closed, dropping terminal-focus");
        }
    }
}

/// Partial update for [`TerminalTabRegistry::update_tab`].
#[derive(Debug, Clone, Default)]
pub struct TabUpdate {
    pub name: Option<String>,
    pub cwd: Option<String>,
    pub font_size: Option<u32>,
    pub theme: Option<String>,
}

pub struct TerminalTabRegistry<S: TabStore, B: TerminalBackend> {
    tabs: Vec<TerminalTab>,
    active_tab_id: Option<String>,
    next_id: u64,
    project_root: Option<String>,
    store: S,
    backend: B,
}

impl<S: TabStore, B: TerminalBackend> TerminalTabRegistry<S, B> {
    /// Restores the persisted tabs, or creates a default tab when there are none.
    #[instrument(skip_all)]
    pub fn load(store: S, backend: B) -> Self {
        let mut registry = Self {
            tabs: Vec::new(),
            active_tab_id: None,
            next_id: 1,
            project_root: None,
            store,
            backend,
        };

        let snapshot = match registry.store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable terminal registry");
                None
            }
        };
        let Some(snapshot) = snapshot else {
            registry.create_tab(ProfileId::Custom, Some(ProfileId::Custom.tab_base_name()), None);
            return registry;
        };

        for saved in snapshot.terminals {
            if saved.id.is_empty() || registry.index_of(&saved.id).is_some() {
                warn!(tab_id = %saved.id, "Skipping persisted tab with missing or duplicate id");
                continue;
            }
            let tab = TerminalTab::restore(saved);
            if let Some(n) = TAB_ID_PATTERN
                .captures(&tab.id)
                .and_then(|caps| caps[1].parse::<u64>().ok())
            {
                registry.next_id = registry.next_id.max(n.saturating_add(1));
            }
            registry.backend.spawn(tab.spawn_params());
            registry.tabs.push(tab);
        }
        info!(count = registry.tabs.len(), next_id = registry.next_id, "Restored terminal tabs");

        match snapshot.active_tab_id {
            Some(active) if registry.index_of(&active).is_some() => {
                registry.switch_tab(&active);
            }
            _ if registry.tabs.is_empty() => {
                registry.create_tab(ProfileId::Custom, Some(ProfileId::Custom.tab_base_name()), None);
            }
            _ => {}
        }
        registry
    }

    fn index_of(&self, tab_id: &str) -> Option<usize> {
        self.tabs.iter().position(|t| t.id == tab_id)
    }

    fn tab_mut(&mut self, tab_id: &str) -> Option<&mut TerminalTab> {
        self.tabs.iter_mut().find(|t| t.id == tab_id)
    }

    fn generate_name(&self, profile: ProfileId) -> String {
        let base = profile.tab_base_name();
        let count = self.tabs.iter().filter(|t| t.profile == profile).count() + 1;
        if count > 1 {
            format!("{} {}", base, count)
        } else {
            base.to_string()
        }
    }

    fn default_cwd(&self) -> String {
        self.project_root
            .clone()
            .filter(|root| !root.is_empty())
            .unwrap_or_else(|| home_dir().to_string_lossy().into_owned())
    }

    pub fn set_project_root(&mut self, root: Option<String>) {
        self.project_root = root;
    }

    #[instrument(skip(self))]
    pub fn create_tab(&mut self, profile: ProfileId, name: Option<&str>, cwd: Option<&str>) -> &TerminalTab {
        let id = format!("term_{}", self.next_id);
        self.next_id += 1;
        let now = now_millis();
        let tab = TerminalTab {
            id: id.clone(),
            terminal_id: new_terminal_id(),
            name: name.map(str::to_string).unwrap_or_else(|| self.generate_name(profile)),
            profile,
            cwd: cwd
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| self.default_cwd()),
            is_active: false,
            history: CommandHistory::default(),
            font_size: DEFAULT_FONT_SIZE,
            theme: DEFAULT_THEME.to_string(),
            created: now,
            last_active: now,
        };
        info!(tab_id = %tab.id, name = %tab.name, "Created terminal tab");
        let params = tab.spawn_params();
        self.tabs.push(tab);
        self.switch_tab(&id);
        self.backend.spawn(params);

        let index = self.tabs.len() - 1;
        &self.tabs[index]
    }

    /// Returns false for an unknown tab.
    #[instrument(skip(self))]
    pub fn close_tab(&mut self, tab_id: &str) -> bool {
        let Some(index) = self.index_of(tab_id) else {
            return false;
        };
        let tab = self.tabs.remove(index);
        self.backend.cleanup(&tab.terminal_id);
        info!(tab_id, "Closed terminal tab");

        if self.active_tab_id.as_deref() == Some(tab_id) {
            self.active_tab_id = None;
            if let Some(last) = self.tabs.last().map(|t| t.id.clone()) {
                self.switch_tab(&last);
            }
        }
        self.persist();
        true
    }

    /// No-op for an unknown tab.
    pub fn switch_tab(&mut self, tab_id: &str) -> bool {
        if self.index_of(tab_id).is_none() {
            debug!(tab_id, "Switch to unknown tab ignored");
            return false;
        }
        let now = now_millis();
        for tab in &mut self.tabs {
            tab.is_active = tab.id == tab_id;
            if tab.is_active {
                tab.last_active = now;
            }
        }
        self.active_tab_id = Some(tab_id.to_string());
        self.persist();

        if let Some(terminal_id) = self.active_tab().map(|t| t.terminal_id.clone()) {
            self.backend.focus(&terminal_id);
        }
        true
    }

    pub fn update_tab(&mut self, tab_id: &str, update: TabUpdate) -> bool {
        let Some(tab) = self.tab_mut(tab_id) else {
            return false;
        };
        if let Some(name) = update.name {
            tab.name = name;
        }
        if let Some(cwd) = update.cwd {
            tab.cwd = cwd;
        }
        if let Some(font_size) = update.font_size {
            tab.font_size = font_size;
        }
        if let Some(theme) = update.theme {
            tab.theme = theme;
        }
        self.persist();
        true
    }

    pub fn add_to_history(&mut self, tab_id: &str, command: &str) {
        let Some(tab) = self.tab_mut(tab_id) else {
            return;
        };
        tab.history.push(command);
        self.persist();
    }

    pub fn previous_command(&mut self, tab_id: &str) -> Option<String> {
        self.tab_mut(tab_id)?.history.previous()
    }

    /// `None` only for an unknown tab.
    pub fn next_command(&mut self, tab_id: &str) -> Option<String> {
        self.tab_mut(tab_id).map(|t| t.history.next())
    }

    pub fn reset_history_position(&mut self, tab_id: &str) {
        if let Some(tab) = self.tab_mut(tab_id) {
            tab.history.reset();
        }
    }

    /// Applies the tab profile's command rewriting.
    pub fn prepare_command(&self, tab_id: &str, command: &str) -> String {
        match self.tab(tab_id) {
            Some(tab) => prepare_command(command, tab.profile),
            None => command.to_string(),
        }
    }

    /// Highlights output for profiles that opt into SGDK parsing.
    pub fn annotate_output(&self, tab_id: &str, output: &str) -> Option<Vec<AnnotatedLine>> {
        let tab = self.tab(tab_id)?;
        tab.profile.profile().sgdk_optimized.then(|| annotate_output(output))
    }

    pub fn tab(&self, tab_id: &str) -> Option<&TerminalTab> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }

    pub fn tabs(&self) -> &[TerminalTab] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn tabs_by_profile(&self, profile: ProfileId) -> Vec<&TerminalTab> {
        self.tabs.iter().filter(|t| t.profile == profile).collect()
    }

    pub fn active_tab_id(&self) -> Option<&str> {
        self.active_tab_id.as_deref()
    }

    pub fn active_tab(&self) -> Option<&TerminalTab> {
        self.active_tab_id.as_deref().and_then(|id| self.tab(id))
    }

    pub fn snapshot(&self) -> TabRegistrySnapshot {
        TabRegistrySnapshot {
            terminals: self.tabs.iter().map(TerminalTab::to_persisted).collect(),
            active_tab_id: self.active_tab_id.clone(),
            last_saved: now_millis(),
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.snapshot()) {
            warn!(error = %e, "Failed to persist terminal tabs");
        }
    }

    pub fn clear_storage(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear terminal tab storage");
        }
    }
}
