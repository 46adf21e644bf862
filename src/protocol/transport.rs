//! JSON-lines transport: one channel message per line on each direction.

use crate::protocol::handler::OrchestratorHandler;
use crate::protocol::messages::{Inbound, Outbound};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long outbound events may keep draining after the input side closes.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

fn spawn_writer<W>(mut output: W, mut events: mpsc::UnboundedReceiver<Outbound>) -> JoinHandle<Result<W>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let mut line = serde_json::to_vec(&event).context("Failed to serialize outbound event")?;
            line.push(b'\n');
            output.write_all(&line).await.context("Failed to write outbound event")?;
            output.flush().await.context("Failed to flush outbound stream")?;
        }
        Ok(output)
    })
}

/// Feeds `input` lines to the handler and writes events to `output` until `input` closes.
pub async fn serve<R, W>(
    handler: OrchestratorHandler,
    events: mpsc::UnboundedReceiver<Outbound>,
    input: R,
    output: W,
) -> Result<Option<W>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = spawn_writer(output, events);
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read inbound stream")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Inbound>(line) {
            Ok(message) => handler.handle(message),
            Err(e) => warn!(error = %e, "Ignoring malformed inbound message"),
        }
    }

    info!("Inbound stream closed");
    handler.shutdown();
    drop(handler);

    // Background tasks may still hold event senders; give them a moment to finish.
    match tokio::time::timeout(DRAIN_TIMEOUT, writer).await {
        Ok(joined) => Ok(Some(joined.context("Writer task panicked")??)),
        Err(_) => {
            debug!("Outbound stream still open after shutdown");
            Ok(None)
        }
    }
}

pub async fn serve_stdio(handler: OrchestratorHandler, events: mpsc::UnboundedReceiver<Outbound>) -> Result<()> {
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    serve(handler, events, input, tokio::io::stdout()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::messages::EventSink;
    use std::sync::Arc;

    #[tokio::test]
    async fn requests_in_replies_out() {
        let home = tempfile::tempdir().unwrap();
        let (events, rx) = EventSink::channel();
        let handler = OrchestratorHandler::new(Arc::new(Config::with_home(home.path())), events);

        let input: &[u8] = b"{\"channel\":\"get-emulator-config\"}\nnot json\n\n{\"channel\":\"stop-game\"}\n";
        let output = serve(handler, rx, input, Vec::new()).await.unwrap().unwrap();
        let text = String::from_utf8(output).unwrap();

        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["channel"], "emulator-config");
        assert_eq!(lines[0]["payload"]["success"], true);
        assert_eq!(lines[1]["channel"], "emulator-closed");
        assert_eq!(lines[1]["payload"]["interrupted"], true);
    }
}
