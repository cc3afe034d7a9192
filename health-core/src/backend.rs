//! The seam between this crate and the rest of the load balancer (spec.md
//! §6 External Interfaces). Session scheduling, connection pools, and the
//! load-balancing map recompute all live outside this crate's scope; a
//! `Backend` is however this crate reaches back into that world when a
//! health-check transition needs to wake something up.

use crate::ids::{ProxyId, ServerId, SessionId};

/// Callback surface a health-check driver needs from the rest of the
/// balancer (spec.md §6: "recount_servers, recalc_server_map,
/// pendconn_from_px, srv_dynamic_maxconn" are all supplied by the backend).
/// `Topology::recount_servers` absorbed the tally half of that list (see
/// DESIGN.md — it only touches data this crate already owns); the pendconn
/// queues themselves live on `Server`/`Proxy` directly rather than behind a
/// `pendconn_from_px` call, so what's left here is the load-balancing map
/// recompute and the maxconn query, plus waking sessions.
pub trait Backend {
    /// Called once per pending session migrated or requeued onto a
    /// different server/proxy, so the scheduler gets a chance to place it
    /// (spec.md §4.F redispatch, §4.E UP-transition requeue).
    fn wake_session(&mut self, session: SessionId);

    /// Notifies the backend that `proxy`'s active/backup tallies changed
    /// and its load-balancing map should be recomputed. A no-op for
    /// backends with no map to recompute.
    fn recalc_server_map(&mut self, proxy: ProxyId);

    /// The dynamic connection bound used to cap how many proxy-queued
    /// sessions a newly-UP server absorbs in one pass. `None` means
    /// unbounded (spec.md §4.E: "or unbounded if maxconn == 0").
    fn srv_dynamic_maxconn(&self, server: ServerId) -> Option<u32>;
}

/// An in-process `Backend` for single-binary deployments and tests: pending
/// wakeups just accumulate in a `Vec` for the caller to drain. Grounded on
/// the in-memory stub services used in `linkerd2-proxy`'s control-plane
/// tests (e.g. `linkerd-proxy-api-resolve`'s mock resolution streams) —
/// same shape, a channel/queue standing in for the real service.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    woken: Vec<SessionId>,
    maxconn: std::collections::HashMap<ServerId, u32>,
    recalcs: Vec<ProxyId>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains and returns every session woken since the last drain.
    pub fn drain_woken(&mut self) -> Vec<SessionId> {
        std::mem::take(&mut self.woken)
    }

    /// Drains and returns every proxy that had a map recompute requested.
    pub fn drain_recalcs(&mut self) -> Vec<ProxyId> {
        std::mem::take(&mut self.recalcs)
    }

    pub fn set_maxconn(&mut self, server: ServerId, limit: u32) {
        self.maxconn.insert(server, limit);
    }
}

impl Backend for MemoryBackend {
    fn wake_session(&mut self, session: SessionId) {
        self.woken.push(session);
    }

    fn recalc_server_map(&mut self, proxy: ProxyId) {
        self.recalcs.push(proxy);
    }

    fn srv_dynamic_maxconn(&self, server: ServerId) -> Option<u32> {
        self.maxconn.get(&server).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_records_and_drains_wakeups() {
        let mut backend = MemoryBackend::new();
        backend.wake_session(SessionId(1));
        backend.wake_session(SessionId(2));
        assert_eq!(backend.drain_woken(), vec![SessionId(1), SessionId(2)]);
        assert!(backend.drain_woken().is_empty());
    }
}
