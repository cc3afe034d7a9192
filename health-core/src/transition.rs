//! UP/DOWN state transitions and pending-session redispatch (spec.md §4.F).
//!
//! Mirrors `set_server_down`/the UP half of `health_adjust` in the
//! original: flip `RUNNING`, recompute the proxy's `srv_act`/`srv_bck`
//! tally, and — on DOWN, only when `PR_O_REDISP` is set — migrate the
//! server's pending sessions onto the proxy-wide queue so they get
//! reassigned to a different server instead of failing outright.

use crate::backend::Backend;
use crate::flags::ProxyOptions;
use crate::health::Crossing;
use crate::ids::ServerId;
use crate::log;
use crate::model::Topology;

/// What happened as a result of folding one check outcome into a server's
/// hysteresis counter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub went_up: bool,
    pub went_down: bool,
    /// Set alongside `went_down` iff the proxy now has zero running
    /// servers of either class (spec.md §4.F: "last server lost" escalates
    /// the log to Alert/LOG_EMERG instead of Warning/LOG_ALERT).
    pub last_server_lost: bool,
}

/// Folds one check outcome (`ok` = probe succeeded) into `server`'s health
/// counter and applies whatever UP/DOWN transition results, including the
/// proxy tally recount and, on DOWN, pending-session redispatch.
pub fn apply_check_result(
    topology: &mut Topology,
    server_id: ServerId,
    ok: bool,
    backend: &mut dyn Backend,
) -> Transition {
    let crossing = {
        let server = topology.server_mut(server_id);
        if ok {
            server.failed_checks = 0;
            server.health.record_ok()
        } else {
            server.failed_checks += 1;
            server.health.record_fail()
        }
    };

    match crossing {
        Crossing::None => Transition::default(),
        Crossing::Up => {
            topology.server_mut(server_id).health.clamp_running();
            apply_up(topology, server_id, backend);
            Transition {
                went_up: true,
                ..Transition::default()
            }
        }
        Crossing::Down => {
            topology.server_mut(server_id).health.reset_to_zero();
            let last_server_lost = apply_down(topology, server_id, backend);
            Transition {
                went_down: true,
                last_server_lost,
                ..Transition::default()
            }
        }
    }
}

fn apply_up(topology: &mut Topology, server_id: ServerId, backend: &mut dyn Backend) {
    let proxy_id = topology.server(server_id).proxy;
    topology
        .server_mut(server_id)
        .flags
        .insert(crate::flags::ServerFlags::RUNNING);
    topology.recount_servers(proxy_id);
    backend.recalc_server_map(proxy_id);

    let limit = backend.srv_dynamic_maxconn(server_id);
    let mut requeued = 0u32;
    loop {
        if let Some(limit) = limit {
            if requeued >= limit {
                break;
            }
        }
        let conn = match topology.proxy_mut(proxy_id).pending.pop_front() {
            Some(conn) => conn,
            None => break,
        };
        topology.server_mut(server_id).pending.push_back(conn);
        backend.wake_session(conn.session);
        requeued += 1;
    }

    let in_queue = topology.server(server_id).pending.len();
    let server = topology.server(server_id);
    let proxy = topology.proxy(proxy_id);
    log::log_up(server, proxy, requeued, in_queue);
}

/// Returns `true` iff the proxy lost its last available server as a result
/// of this transition.
fn apply_down(topology: &mut Topology, server_id: ServerId, backend: &mut dyn Backend) -> bool {
    let proxy_id = topology.server(server_id).proxy;
    topology
        .server_mut(server_id)
        .flags
        .remove(crate::flags::ServerFlags::RUNNING);
    topology.server_mut(server_id).down_trans += 1;
    topology.recount_servers(proxy_id);
    backend.recalc_server_map(proxy_id);

    let requeued = if topology.proxy(proxy_id).options.contains(ProxyOptions::REDISP) {
        redispatch_pending(topology, server_id, backend)
    } else {
        0
    };

    let last_server_lost = topology.proxy(proxy_id).has_no_server_available();

    let server = topology.server(server_id);
    let proxy = topology.proxy(proxy_id);
    log::log_down(server, proxy, requeued);
    if last_server_lost {
        log::log_no_server_available(proxy);
    }
    last_server_lost
}

/// Drains a DOWNed server's pending-connection queue onto its proxy's
/// queue and wakes each session so the scheduler gets another chance to
/// place it on a different server (spec.md §4.F: "redispatch", grounded on
/// the original's `pendconn_grab_from_px`/`task_wakeup` pairing). Returns
/// the number of sessions migrated, for the DOWN log line's "requeued" count.
fn redispatch_pending(topology: &mut Topology, server_id: ServerId, backend: &mut dyn Backend) -> usize {
    let proxy_id = topology.server(server_id).proxy;
    let moved: Vec<_> = topology.server_mut(server_id).pending.drain(..).collect();
    for conn in &moved {
        topology.proxy_mut(proxy_id).pending.push_back(*conn);
    }
    let count = moved.len();
    for conn in moved {
        backend.wake_session(conn.session);
    }
    count
}
