#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod http;
pub mod rpc;
pub mod stdio;

use crate::app::AppContext;
use crate::config::TransportKind;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use std::sync::Arc;

/// Runs the configured transport until the peer disconnects or the
/// process is told to stop.
///
/// # Errors
/// Transport setup failures (bind errors, broken stdio).
pub async fn run(ctx: AppContext) -> Result<()> {
    let transport = ctx.current_config().transport;
    let dispatcher = Arc::new(Dispatcher::new(ctx));
    match transport {
        TransportKind::Stdio => stdio::run(dispatcher).await,
        TransportKind::Http => http::run(dispatcher).await,
    }
}
