//! State-transition logging (spec.md §4.F step 4, §6; SPEC_FULL.md §8).
//!
//! `tracing` is the only logging facade this crate uses, matching every
//! linkerd crate in the teacher pack. The original's two-severity scheme —
//! `Warning`+`LOG_NOTICE` on UP, `Warning`+`LOG_ALERT` on DOWN, escalating
//! to `Alert`+`LOG_EMERG` when a proxy loses its last server — is carried
//! through as a `notice` field on each event rather than a dependency on
//! syslog: a downstream subscriber can route on it without this crate
//! knowing what syslog is. Message text mirrors the original's `sprintf`
//! wording (built once, then handed to `Warning()`/`send_log()` together)
//! by building a `String` and passing it as the single formatted argument.

use crate::model::{Proxy, Server};

fn running_on_backup(proxy: &Proxy) -> &'static str {
    if proxy.srv_bck > 0 && proxy.srv_act == 0 {
        " Running on backup."
    } else {
        ""
    }
}

/// Logs a DOWN -> UP transition. `requeued` is how many proxy-queued
/// sessions were just handed to this server; `in_queue` is how many remain
/// queued on the server afterwards.
pub fn log_up(server: &Server, proxy: &Proxy, requeued: u32, in_queue: usize) {
    let backup = if server.is_backup() { "Backup " } else { "" };
    let message = format!(
        "{backup}Server {proxy}/{server} is UP. {act} active and {bck} backup servers online.{running} {requeued} sessions requeued, {in_queue} total in queue.",
        backup = backup,
        proxy = proxy.name,
        server = server.id,
        act = proxy.srv_act,
        bck = proxy.srv_bck,
        running = running_on_backup(proxy),
        requeued = requeued,
        in_queue = in_queue,
    );
    tracing::warn!(
        target: "healthcheck::transition",
        notice = "notice",
        proxy = %proxy.name,
        server = %server.id,
        srv_act = proxy.srv_act,
        srv_bck = proxy.srv_bck,
        "{}", message,
    );
}

/// Logs an UP -> DOWN transition that still leaves at least one server
/// available on the proxy (the "no server available" escalation is a
/// separate call, [`log_no_server_available`]). `requeued` is how many
/// REDISP-eligible sessions were just migrated off this server.
pub fn log_down(server: &Server, proxy: &Proxy, requeued: usize) {
    let backup = if server.is_backup() { "Backup " } else { "" };
    let message = format!(
        "{backup}Server {proxy}/{server} is DOWN. {act} active and {bck} backup servers left.{running} {sess} sessions active, {requeued} requeued, {in_queue} remaining in queue.",
        backup = backup,
        proxy = proxy.name,
        server = server.id,
        act = proxy.srv_act,
        bck = proxy.srv_bck,
        running = running_on_backup(proxy),
        sess = server.cur_sess,
        requeued = requeued,
        in_queue = server.pending.len(),
    );
    tracing::warn!(
        target: "healthcheck::transition",
        notice = "alert",
        proxy = %proxy.name,
        server = %server.id,
        srv_act = proxy.srv_act,
        srv_bck = proxy.srv_bck,
        "{}", message,
    );
}

/// Logs the LOG_EMERG escalation: a DOWN transition left the proxy with
/// zero active and zero backup servers.
pub fn log_no_server_available(proxy: &Proxy) {
    let message = format!("{} has no server available !", proxy.name);
    tracing::error!(
        target: "healthcheck::transition",
        notice = "emerg",
        proxy = %proxy.name,
        "{}", message,
    );
}

/// Per-probe failures that don't cross the DOWN threshold: noise-suppressed
/// to `debug` so `RUST_LOG=healthcheck=warn` only sees actual transitions.
pub fn log_probe_failed(server: &Server, error: &crate::error::CheckError) {
    tracing::debug!(
        target: "healthcheck::probe",
        server = %server.id,
        health = server.health.value(),
        error = %error,
        "health check probe failed",
    );
}
