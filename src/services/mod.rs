pub mod diagnostics;
pub mod emulator_paths;
pub mod process_slot;
pub mod process_supervisor;
pub mod pty_bridge;
pub mod terminal_profiles;
pub mod terminal_tabs;
