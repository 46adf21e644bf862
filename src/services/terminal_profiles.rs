use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProfileId {
    Build,
    Debug,
    Git,
    Custom,
}

impl ProfileId {
    pub const ALL: [ProfileId; 4] = [ProfileId::Build, ProfileId::Debug, ProfileId::Git, ProfileId::Custom];

    pub fn as_str(self) -> &'static str {
        match self {
            ProfileId::Build => "BUILD",
            ProfileId::Debug => "DEBUG",
            ProfileId::Git => "GIT",
            ProfileId::Custom => "CUSTOM",
        }
    }

    pub fn profile(self) -> &'static TerminalProfile {
        match self {
            ProfileId::Build => &BUILD,
            ProfileId::Debug => &DEBUG,
            ProfileId::Git => &GIT,
            ProfileId::Custom => &CUSTOM,
        }
    }

    /// Base name for auto-named tabs.
    pub fn tab_base_name(self) -> &'static str {
        match self {
            ProfileId::Build => "Build Terminal",
            ProfileId::Debug => "Debug Terminal",
            ProfileId::Git => "Git Terminal",
            ProfileId::Custom => "Terminal",
        }
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        ProfileId::Custom
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileId {
    type Err = std::convert::Infallible;

    /// Unknown ids fall back to `CUSTOM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "BUILD" => ProfileId::Build,
            "DEBUG" => ProfileId::Debug,
            "GIT" => ProfileId::Git,
            _ => ProfileId::Custom,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProfileTheme {
    pub background: &'static str,
    pub foreground: &'static str,
    pub cursor: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Shortcut {
    pub key: &'static str,
    pub action: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalProfile {
    pub id: ProfileId,
    pub name: &'static str,
    pub icon: &'static str,
    pub color: &'static str,
    pub default_commands: &'static [&'static str],
    pub shortcuts: &'static [Shortcut],
    pub theme: ProfileTheme,
    pub sgdk_optimized: bool,
    pub description: &'static str,
}

pub static BUILD: TerminalProfile = TerminalProfile {
    id: ProfileId::Build,
    name: "Build",
    icon: "fa-hammer",
    color: "#4CAF50",
    default_commands: &["make clean", "make", "make run", "make debug"],
    shortcuts: &[
        Shortcut { key: "Ctrl+B", action: "build" },
        Shortcut { key: "Ctrl+Shift+B", action: "rebuild" },
    ],
    theme: ProfileTheme { background: "#1a1a1a", foreground: "#4CAF50", cursor: "#81C784" },
    sgdk_optimized: true,
    description: "Optimized for SGDK build processes",
};

pub static DEBUG: TerminalProfile = TerminalProfile {
    id: ProfileId::Debug,
    name: "Debug",
    icon: "fa-bug",
    color: "#2196F3",
    default_commands: &["gdb out/rom.out", "make debug", "objdump -d out/rom.out"],
    shortcuts: &[
        Shortcut { key: "F9", action: "breakpoint" },
        Shortcut { key: "F5", action: "continue" },
        Shortcut { key: "F10", action: "step" },
        Shortcut { key: "F11", action: "step_into" },
    ],
    theme: ProfileTheme { background: "#0d1117", foreground: "#58A6FF", cursor: "#79C0FF" },
    sgdk_optimized: true,
    description: "Ready for debugging with GDB",
};

pub static GIT: TerminalProfile = TerminalProfile {
    id: ProfileId::Git,
    name: "Git",
    icon: "fa-code-branch",
    color: "#FF6B35",
    default_commands: &[
        "git status",
        "git add .",
        "git commit -m \"\"",
        "git push",
        "git pull",
        "git log --oneline -10",
    ],
    shortcuts: &[
        Shortcut { key: "Ctrl+G", action: "git_status" },
        Shortcut { key: "Ctrl+Shift+C", action: "git_commit" },
    ],
    theme: ProfileTheme { background: "#0f0f0f", foreground: "#FF6B35", cursor: "#FF8A65" },
    sgdk_optimized: false,
    description: "Git version control operations",
};

pub static CUSTOM: TerminalProfile = TerminalProfile {
    id: ProfileId::Custom,
    name: "Terminal",
    icon: "fa-terminal",
    color: "#9C27B0",
    default_commands: &[],
    shortcuts: &[],
    theme: ProfileTheme { background: "#121212", foreground: "#cccccc", cursor: "#00ff00" },
    sgdk_optimized: false,
    description: "General purpose terminal",
};

pub fn profiles() -> impl Iterator<Item = &'static TerminalProfile> {
    ProfileId::ALL.into_iter().map(ProfileId::profile)
}

/// Rewrites well-known make invocations into their SGDK-tuned forms.
pub fn optimize_sgdk_command(command: &str) -> String {
    match command.trim() {
        "make" => "make -j4".to_string(),
        "make clean" => "make clean && rm -f out/*".to_string(),
        "make run" => "make && gen_sdl2 out/rom.bin".to_string(),
        "make debug" => "make DEBUG=1".to_string(),
        _ => command.to_string(),
    }
}

/// The command a tab of `profile` should actually send to the shell.
pub fn prepare_command(command: &str, profile: ProfileId) -> String {
    if profile.profile().sgdk_optimized {
        optimize_sgdk_command(command)
    } else {
        command.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_profile_id_falls_back_to_custom() {
        assert_eq!("build".parse::<ProfileId>().unwrap(), ProfileId::Build);
        assert_eq!("SOMETHING".parse::<ProfileId>().unwrap(), ProfileId::Custom);
    }

    #[test]
    fn profiles_are_closed_set() {
        let ids: Vec<_> = profiles().map(|p| p.id).collect();
        assert_eq!(ids, ProfileId::ALL.to_vec());
        assert!(profiles().all(|p| p.id.profile().id == p.id));
    }

    #[test]
    fn only_sgdk_profiles_rewrite_commands() {
        assert_eq!(prepare_command("make", ProfileId::Build), "make -j4");
        assert_eq!(prepare_command(" make debug ", ProfileId::Debug), "make DEBUG=1");
        assert_eq!(prepare_command("make", ProfileId::Git), "make");
        assert_eq!(prepare_command("ls -la", ProfileId::Build), "ls -la");
    }

    #[test]
    fn profile_ids_serialize_uppercase() {
        assert_eq!(serde_json::to_string(&ProfileId::Git).unwrap(), "\"GIT\"");
        let id: ProfileId = serde_json::from_str("\"DEBUG\"").unwrap();
        assert_eq!(id, ProfileId::Debug);
    }
}
