//! Per-server check driver (spec.md §4.E).
//!
//! The original's `process_chk` is one function that both starts a new
//! probe and, via `goto new_chk`, immediately starts the next one when a
//! check resolves synchronously (e.g. the FD layer reports a connect
//! failure before the task ever suspends). Here `run_check` drives exactly
//! one probe attempt to a [`CheckOutcome`]; the caller (the task loop in
//! `health-agent`) is the `new_chk` loop, re-invoking `run_check` after
//! sleeping for the server's interval.
//!
//! `run_check` takes its inputs by value/reference rather than `&mut
//! Server` deliberately: the whole attempt lives inside one suspended
//! `async fn` frame, which is this crate's Rust-native replacement for the
//! original's callback-resumed `curfd`/`result` fields — there is nothing
//! to persist on the shared [`crate::model::Server`] for the duration of
//! the await, so callers never need to hold a lock on shared topology
//! state across an `.await` point (see `health-agent`'s task loop, which
//! reads what it needs, drops the borrow, awaits, then re-borrows briefly
//! to apply the result).

use crate::error::CheckError;
use crate::flags::SourcePolicy;
use crate::handlers;
use crate::probe::Probe;
use crate::transport::{self, ConnectOutcome, TransparentProxy};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Result of driving one probe to completion.
#[derive(Debug)]
pub enum CheckOutcome {
    Ok,
    Fail(CheckError),
}

impl CheckOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CheckOutcome::Ok)
    }
}

/// Runs a single check attempt against `dest`: connect, then the probe
/// exchange, all under one deadline equal to `interval` (spec.md §5:
/// "there is no separate connect/send/recv timeout; all three share the
/// single `interval`-based deadline"). `server_source` and `proxy_source`
/// are distinct per spec.md §4.B steps 3-4: the server's own source/tproxy
/// policy takes precedence, falling back to the proxy's only when the
/// server doesn't set `BIND_SRC`.
pub async fn run_check(
    dest: SocketAddr,
    server_source: &SourcePolicy,
    proxy_source: &SourcePolicy,
    interval: Duration,
    probe: &Probe,
    tproxy: &dyn TransparentProxy,
) -> CheckOutcome {
    trace!(%dest, "starting health check");

    let attempt = async {
        let ConnectOutcome::InProgress(stream) =
            transport::connect(dest, server_source, proxy_source, tproxy).await?;
        handlers::run_probe_exchange(&stream, probe).await
    };

    match timeout(interval, attempt).await {
        Ok(Ok(())) => {
            debug!(%dest, "check passed");
            CheckOutcome::Ok
        }
        Ok(Err(e)) => {
            debug!(%dest, error = %e, "check failed");
            CheckOutcome::Fail(e)
        }
        Err(_) => {
            debug!(%dest, "check timed out");
            CheckOutcome::Fail(CheckError::Timeout(interval))
        }
    }
}
