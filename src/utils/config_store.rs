use crate::error::AppError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

pub const EMULATOR_CONFIG_FILE: &str = "emulator-config.json";
pub const CUSTOM_EMULATOR_PATHS_FILE: &str = "custom-emulator-paths.json";

/// Persisted emulator choice (`emulator-config.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmulatorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_emulator: Option<String>,
}

/// Per-tool override paths (`custom-emulator-paths.json`), keyed by tool id.
pub type CustomEmulatorPaths = BTreeMap<String, String>;

/// JSON documents stored in the application config directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Loads `filename`, returning `T::default()` when it is missing or unreadable.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, filename: &str) -> T {
        let path = self.dir.join(filename);
        if !path.exists() {
            return T::default();
        }
        match std::fs::read_to_string(&path)
            .map_err(AppError::from)
            .and_then(|raw| serde_json::from_str::<T>(&raw).map_err(AppError::from))
        {
            Ok(value) => value,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load config file");
                T::default()
            }
        }
    }

    pub fn save<T: Serialize>(&self, filename: &str, value: &T) -> Result<(), AppError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        let body = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, body)?;
        debug!(path = %path.display(), "Saved config file");
        Ok(())
    }

    pub fn emulator_config(&self) -> EmulatorConfig {
        self.load_or_default(EMULATOR_CONFIG_FILE)
    }

    pub fn save_emulator_config(&self, config: &EmulatorConfig) -> Result<(), AppError> {
        self.save(EMULATOR_CONFIG_FILE, config)
    }

    pub fn custom_emulator_paths(&self) -> CustomEmulatorPaths {
        self.load_or_default(CUSTOM_EMULATOR_PATHS_FILE)
    }

    pub fn save_custom_emulator_paths(&self, paths: &CustomEmulatorPaths) -> Result<(), AppError> {
        let cleaned: CustomEmulatorPaths = paths
            .iter()
            .map(|(id, path)| (id.trim().to_string(), path.trim().to_string()))
            .filter(|(id, _)| {
                if id.is_empty() {
                    warn!("Dropping custom emulator path with empty tool id");
                }
                !id.is_empty()
            })
            .collect();
        self.save(CUSTOM_EMULATOR_PATHS_FILE, &cleaned)
    }
}
