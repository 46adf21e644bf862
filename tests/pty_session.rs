#![cfg(unix)]

use retro_studio::config::Config;
use retro_studio::protocol::messages::{EventSink, Outbound, TerminalSpawnParams};
use retro_studio::services::process_slot::ProcessSlot;
use retro_studio::services::pty_bridge::{PtyBridge, WriteTarget};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const EVENT_TIMEOUT: Duration = Duration::from_secs(20);

async fn next_event(events: &mut UnboundedReceiver<Outbound>) -> Outbound {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}

/// Accumulates terminal output until it contains `needle`.
async fn read_until(events: &mut UnboundedReceiver<Outbound>, needle: &str) -> String {
    let mut text = String::new();
    while !text.contains(needle) {
        if let Outbound::TerminalIncomingData(chunk) = next_event(events).await {
            text.push_str(&chunk);
        }
    }
    text
}

#[tokio::test]
async fn shell_round_trip_and_exit_code() {
    let home = tempfile::tempdir().unwrap();
    let cwd = tempfile::tempdir().unwrap();
    let mut config = Config::with_home(home.path());
    config.default_shell = Some("/bin/sh".to_string());
    let (sink, mut events) = EventSink::channel();
    let bridge = PtyBridge::new(Arc::new(config), Arc::new(ProcessSlot::new("emulator")), sink);

    bridge.spawn(&TerminalSpawnParams {
        cwd: Some(cwd.path().to_string_lossy().into_owned()),
        terminal_id: Some("t1".to_string()),
        profile: None,
    });
    loop {
        match next_event(&mut events).await {
            Outbound::TerminalSpawned(p) => {
                assert!(p.success, "{:?}", p.error);
                assert_eq!(p.terminal_id.as_deref(), Some("t1"));
                break;
            }
            Outbound::TerminalIncomingData(_) => {}
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(bridge.is_alive());
    assert_eq!(bridge.owner().as_deref(), Some("t1"));

    // Only the shell's arithmetic produces the literal result, not the echoed input.
    assert_eq!(bridge.write("echo retro_$((40+2))\r"), WriteTarget::Pty);
    read_until(&mut events, "retro_42").await;

    assert_eq!(bridge.write("exit 3\r"), WriteTarget::Pty);
    read_until(&mut events, "[Process exited with code 3]").await;
    assert!(!bridge.is_alive());
    assert_eq!(bridge.write("ls\r"), WriteTarget::Dropped);
}
