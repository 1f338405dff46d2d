use super::rpc;
use crate::dispatch::Dispatcher;
use crate::error::{CrewError, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Line-delimited JSON-RPC over stdin/stdout.
///
/// Each request runs in its own task; responses funnel through a single
/// writer task so frames never interleave. The client credential arrives
/// out-of-band via `CREWD_API_KEY` at boot.
pub async fn run(dispatcher: Arc<Dispatcher>) -> Result<()> {
    let credential = dispatcher
        .context()
        .current_config()
        .stdio_api_key
        .clone();
    info!("stdio transport ready");

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = rx.recv().await {
            if stdout.write_all(frame.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await.map_err(CrewError::Io)? {
        if line.trim().is_empty() {
            continue;
        }
        let dispatcher = Arc::clone(&dispatcher);
        let credential = credential.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response =
                rpc::handle_frame(&dispatcher, credential.as_deref(), &line).await;
            if let Some(response) = response {
                let _ = tx.send(response.to_string()).await;
            } else {
                debug!("notification frame, no response");
            }
        });
    }

    drop(tx);
    let _ = writer.await;
    info!("stdin closed, stdio transport stopping");
    Ok(())
}
