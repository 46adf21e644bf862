use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_EMULATOR_ID: &str = "gen_sdl2";
pub const DEFAULT_TERMINAL_COLS: u16 = 80;
pub const DEFAULT_TERMINAL_ROWS: u16 = 24;

#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub emulators_dir: PathBuf,
    pub toolkit_dir: PathBuf,
    pub install_roots: Vec<PathBuf>,
    pub default_shell: Option<String>,
    pub log_level: String,
    pub build_command: String,
    pub toolkit_env_var: String,
    pub default_emulator: String,
    pub terminal_cols: u16,
    pub terminal_rows: u16,
}

fn expand_tilde(path_str: &str) -> Result<PathBuf, anyhow::Error> {
    shellexpand::full(path_str)
        .map(|expanded| PathBuf::from(expanded.as_ref()))
        .map_err(|e| anyhow::anyhow!("Failed to expand path '{}': {}", path_str, e))
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn default_install_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        roots.push(exe_dir);
    }
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    roots
}

impl Config {
    /// Defaults rooted at `config_dir`, without consulting the environment.
    pub fn with_home(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Config {
            emulators_dir: config_dir.join("emulators"),
            toolkit_dir: config_dir.join("toolkit"),
            config_dir,
            install_roots: Vec::new(),
            default_shell: None,
            log_level: "info".to_string(),
            build_command: "make".to_string(),
            toolkit_env_var: "MARSDEV".to_string(),
            default_emulator: DEFAULT_EMULATOR_ID.to_string(),
            terminal_cols: DEFAULT_TERMINAL_COLS,
            terminal_rows: DEFAULT_TERMINAL_ROWS,
        }
    }

    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let home_str = std::env::var("RETRO_STUDIO_HOME").unwrap_or_else(|_| "~/.retrostudio".to_string());
        let config_dir = expand_tilde(&home_str)?;
        std::fs::create_dir_all(&config_dir)
            .context(format!("Failed to create config directory: {}", config_dir.display()))?;

        let mut config = Config::with_home(config_dir);
        std::fs::create_dir_all(&config.emulators_dir)
            .context(format!("Failed to create emulators directory: {}", config.emulators_dir.display()))?;
        std::fs::create_dir_all(&config.toolkit_dir)
            .context(format!("Failed to create toolkit directory: {}", config.toolkit_dir.display()))?;

        let mut install_roots = Vec::new();
        for key in ["APP_PATH", "RESOURCES_PATH"] {
            if let Some(raw) = env_non_empty(key) {
                match expand_tilde(&raw) {
                    Ok(path) => install_roots.push(path),
                    Err(e) => warn!(variable = key, error = %e, "Ignoring unusable install root"),
                }
            }
        }
        install_roots.extend(default_install_roots());
        install_roots.dedup();
        config.install_roots = install_roots;

        config.default_shell = env_non_empty("DEFAULT_SHELL");
        config.log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        if let Some(build_command) = env_non_empty("BUILD_COMMAND") {
            config.build_command = build_command;
        }
        if let Some(toolkit_env_var) = env_non_empty("TOOLKIT_ENV_VAR") {
            config.toolkit_env_var = toolkit_env_var;
        }
        if let Some(default_emulator) = env_non_empty("DEFAULT_EMULATOR") {
            config.default_emulator = default_emulator;
        }

        config.terminal_cols = std::env::var("TERMINAL_COLS")
            .unwrap_or_else(|_| DEFAULT_TERMINAL_COLS.to_string())
            .parse::<u16>()
            .context("Invalid TERMINAL_COLS")?;
        config.terminal_rows = std::env::var("TERMINAL_ROWS")
            .unwrap_or_else(|_| DEFAULT_TERMINAL_ROWS.to_string())
            .parse::<u16>()
            .context("Invalid TERMINAL_ROWS")?;
        if config.terminal_cols == 0 || config.terminal_rows == 0 {
            anyhow::bail!(
                "Terminal geometry must be non-zero, got {}x{}",
                config.terminal_cols,
                config.terminal_rows
            );
        }

        Ok(config)
    }

    /// Shell used for interactive PTY sessions.
    pub fn interactive_shell(&self) -> String {
        if let Some(shell) = &self.default_shell {
            return shell.clone();
        }
        if cfg!(windows) {
            return "powershell.exe".to_string();
        }
        if let Some(shell) = env_non_empty("SHELL") {
            return shell;
        }
        which::which("bash")
            .or_else(|_| which::which("sh"))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/bin/sh".to_string())
    }

    pub fn terminals_file(&self) -> PathBuf {
        self.config_dir.join("terminals.json")
    }
}
