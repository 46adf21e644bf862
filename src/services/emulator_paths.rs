use crate::config::Config;
use crate::utils::config_store::ConfigStore;
use crate::utils::path_utils::{existing_file, expand_tilde_path_buf};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, instrument, warn};

/// Where a tool lives relative to an installation.
#[derive(Debug, Clone, Copy)]
pub enum ToolLocation {
    /// Shipped with the IDE under `toolkit/emulators/...`.
    Bundled(&'static [&'static str]),
    /// Shipped inside the third-party toolkit installation.
    ToolkitRelative(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct ToolDefinition {
    pub id: &'static str,
    pub display_name: &'static str,
    pub location: ToolLocation,
}

pub const KNOWN_TOOLS: &[ToolDefinition] = &[
    ToolDefinition {
        id: "gen_sdl2",
        display_name: "Genesis SDL2",
        location: ToolLocation::Bundled(&["toolkit", "emulators", "md", "gen_sdl2"]),
    },
    ToolDefinition {
        id: "blastem",
        display_name: "BlastEm",
        location: ToolLocation::Bundled(&["toolkit", "emulators", "blastem", "blastem"]),
    },
    ToolDefinition {
        id: "picodrive",
        display_name: "PicoDrive",
        location: ToolLocation::Bundled(&["toolkit", "emulators", "PicoDrive", "picodrive"]),
    },
    ToolDefinition {
        id: "md",
        display_name: "MD (DGen)",
        location: ToolLocation::ToolkitRelative(&["dgen"]),
    },
];

/// Executable the toolkit ships as its own runner.
pub const TOOLKIT_RUNNER: &str = "dgen";

pub fn tool_definition(tool_id: &str) -> Option<&'static ToolDefinition> {
    KNOWN_TOOLS.iter().find(|t| t.id == tool_id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulatorInfo {
    pub id: String,
    pub display_name: String,
    pub toolkit_relative: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableEmulators {
    pub emulators: Vec<String>,
    pub paths: BTreeMap<String, PathBuf>,
    pub list: Vec<EmulatorInfo>,
}

fn join_all(base: &Path, segments: &[&str]) -> PathBuf {
    segments.iter().fold(base.to_path_buf(), |acc, s| acc.join(s))
}

#[derive(Debug, Clone)]
pub struct EmulatorResolver {
    config: Arc<Config>,
    store: Arc<ConfigStore>,
}

impl EmulatorResolver {
    pub fn new(config: Arc<Config>, store: Arc<ConfigStore>) -> Self {
        Self { config, store }
    }

    fn custom_override(&self, tool_id: &str) -> Option<PathBuf> {
        let paths = self.store.custom_emulator_paths();
        let raw = paths.get(tool_id).map(|s| s.trim()).filter(|s| !s.is_empty())?;
        match expand_tilde_path_buf(raw) {
            Ok(path) => {
                let found = existing_file(&path);
                if found.is_none() {
                    warn!(tool = tool_id, path = %path.display(), "Custom emulator path does not exist");
                }
                found
            }
            Err(e) => {
                warn!(tool = tool_id, error = %e, "Custom emulator path is unusable");
                None
            }
        }
    }

    fn install_candidates(&self, segments: &[&str]) -> Vec<PathBuf> {
        // The user-level directory mirrors everything after `toolkit/emulators`.
        let mut candidates = vec![join_all(&self.config.emulators_dir, segments.get(2..).unwrap_or(&[]))];
        for root in &self.config.install_roots {
            candidates.push(join_all(root, segments));
            candidates.push(join_all(&root.join("src"), segments));
            candidates.push(join_all(&root.join("resources"), segments));
        }
        candidates
    }

    /// Resolves a tool id to an executable on disk, or `None` when it is unavailable.
    #[instrument(skip(self), fields(tool = %tool_id))]
    pub fn resolve_executable(&self, tool_id: &str, toolkit_root: Option<&Path>) -> Option<PathBuf> {
        let Some(definition) = tool_definition(tool_id) else {
            debug!("Unknown tool id");
            return None;
        };

        if let Some(path) = self.custom_override(tool_id) {
            debug!(path = %path.display(), "Resolved from custom override");
            return Some(path);
        }

        let candidates = match definition.location {
            ToolLocation::ToolkitRelative(segments) => {
                let root = toolkit_root.unwrap_or(self.config.toolkit_dir.as_path());
                vec![join_all(root, segments)]
            }
            ToolLocation::Bundled(segments) => self.install_candidates(segments),
        };

        let found = candidates.iter().find_map(|c| existing_file(c));
        match &found {
            Some(path) => debug!(path = %path.display(), "Resolved executable"),
            None => debug!(candidates = candidates.len(), "No candidate exists"),
        }
        found
    }

    #[instrument(skip(self))]
    pub fn available_emulators(&self, toolkit_root: Option<&Path>) -> AvailableEmulators {
        let mut available = AvailableEmulators::default();
        for tool in KNOWN_TOOLS {
            available.list.push(EmulatorInfo {
                id: tool.id.to_string(),
                display_name: tool.display_name.to_string(),
                toolkit_relative: matches!(tool.location, ToolLocation::ToolkitRelative(_)),
            });
            if let Some(path) = self.resolve_executable(tool.id, toolkit_root) {
                available.emulators.push(tool.id.to_string());
                available.paths.insert(tool.id.to_string(), path);
            }
        }
        available
    }

    /// Custom override paths with every known id present.
    pub fn custom_paths_with_defaults(&self) -> BTreeMap<String, String> {
        let mut paths: BTreeMap<String, String> =
            KNOWN_TOOLS.iter().map(|t| (t.id.to_string(), String::new())).collect();
        paths.extend(self.store.custom_emulator_paths());
        paths
    }
}

const PREFERRED_ROM_LOCATIONS: &[&[&str]] = &[&["out", "rom.bin"], &["rom.bin"], &["out", "out.bin"], &["out.bin"]];

fn is_rom_file_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".bin") || lower.ends_with(".32x")
}

/// Locates the ROM produced by a build in `project_dir`.
pub fn resolve_rom_artifact(project_dir: &Path) -> Option<PathBuf> {
    for segments in PREFERRED_ROM_LOCATIONS {
        let candidate = join_all(project_dir, segments);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for dir in [project_dir.to_path_buf(), project_dir.join("out")] {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !is_rom_file_name(&name.to_string_lossy()) {
                continue;
            }
            // Follows symlinks, unlike `DirEntry::metadata`.
            let metadata = match std::fs::metadata(entry.path()) {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Failed to inspect ROM candidate");
                    continue;
                }
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if latest.as_ref().map_or(true, |(time, _)| modified >= *time) {
                latest = Some((modified, entry.path()));
            }
        }
    }
    latest.map(|(_, path)| path)
}
