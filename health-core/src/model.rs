//! Arena-owned entities: [`Server`], [`Proxy`], and the [`Topology`] that
//! holds them. Handles ([`ServerId`]/[`ProxyId`]) stand in for the cyclic
//! pointers the original keeps between servers, proxies, and check tasks.

use crate::flags::{ProxyOptions, ServerFlags, SourcePolicy};
use crate::health::Health;
use crate::ids::{ProxyId, ServerId, SessionId};
use slab::Slab;
use std::collections::VecDeque;
use std::net::SocketAddr;

/// A session queued on a server or proxy, waiting for a free slot
/// (spec.md Data Model: "Pendconn").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PendConn {
    pub session: SessionId,
}

/// One backend server: the probe target, its hysteresis state, and its
/// pending-connection queue.
pub struct Server {
    pub id: ServerId,
    pub proxy: ProxyId,
    pub addr: SocketAddr,
    pub check_addr: Option<SocketAddr>,
    pub check_port: u16,
    pub interval: std::time::Duration,
    pub source: SourcePolicy,
    pub flags: ServerFlags,
    pub health: Health,
    pub failed_checks: u64,
    pub down_trans: u64,
    pub cur_sess: u64,
    pub pending: VecDeque<PendConn>,
}

impl Server {
    pub fn is_checked(&self) -> bool {
        self.flags.contains(ServerFlags::CHECKED)
    }

    pub fn is_running(&self) -> bool {
        self.flags.contains(ServerFlags::RUNNING)
    }

    pub fn is_backup(&self) -> bool {
        self.flags.contains(ServerFlags::BACKUP)
    }

    /// Destination to connect to for this check: `check_addr` overrides
    /// `addr`, with the port always forced to `check_port` (spec.md §4.B
    /// step 2).
    pub fn check_destination(&self) -> SocketAddr {
        let mut addr = self.check_addr.unwrap_or(self.addr);
        addr.set_port(self.check_port);
        addr
    }
}

/// A proxy (backend): shared probe configuration plus the proxy-wide
/// pending queue and the active/backup tallies used to decide whether the
/// whole proxy has lost service.
pub struct Proxy {
    pub id: ProxyId,
    pub name: String,
    pub options: ProxyOptions,
    pub probe: Probe,
    pub source: SourcePolicy,
    pub stopped: bool,
    pub srv_act: u32,
    pub srv_bck: u32,
    pub pending: VecDeque<PendConn>,
}

impl Proxy {
    pub fn has_no_server_available(&self) -> bool {
        self.srv_act == 0 && self.srv_bck == 0
    }
}

/// Owns every [`Server`] and [`Proxy`] in the topology, addressed by
/// stable integer handles.
///
/// `max_sockets`/`sockets_in_flight` stand in for the original's
/// `global.maxsock` check against the process-wide fd table (spec.md §4.B
/// step 1: "fail the probe ... if the fd exceeds `global.maxsock`"). This
/// crate has no real fd table, so the bound is instead a simple live count
/// of in-flight probe attempts across every server, acquired and released
/// by the caller around each check (see `health-agent::check_loop`).
#[derive(Default)]
pub struct Topology {
    servers: Slab<Server>,
    proxies: Slab<Proxy>,
    max_sockets: Option<u32>,
    sockets_in_flight: u32,
}

impl Topology {
    pub fn new() -> Self {
        Self {
            servers: Slab::new(),
            proxies: Slab::new(),
            max_sockets: None,
            sockets_in_flight: 0,
        }
    }

    pub fn with_max_sockets(max_sockets: Option<u32>) -> Self {
        Self {
            max_sockets,
            ..Self::new()
        }
    }

    /// Reserves one fd slot for an about-to-start probe attempt. Returns
    /// `false` (spec.md §4.B step 1's `result = -1` path) when doing so
    /// would exceed the configured bound; the caller must not start the
    /// probe in that case.
    pub fn try_acquire_socket(&mut self) -> bool {
        match self.max_sockets {
            Some(max) if self.sockets_in_flight >= max => false,
            _ => {
                self.sockets_in_flight += 1;
                true
            }
        }
    }

    /// Releases the slot reserved by a matching [`Topology::try_acquire_socket`]
    /// once the probe attempt (success or failure) has finished.
    pub fn release_socket(&mut self) {
        self.sockets_in_flight = self.sockets_in_flight.saturating_sub(1);
    }

    pub fn max_sockets(&self) -> Option<u32> {
        self.max_sockets
    }

    pub fn insert_proxy(&mut self, build: impl FnOnce(ProxyId) -> Proxy) -> ProxyId {
        let entry = self.proxies.vacant_entry();
        let id = ProxyId::from_key(entry.key());
        entry.insert(build(id));
        id
    }

    pub fn insert_server(&mut self, build: impl FnOnce(ServerId) -> Server) -> ServerId {
        let entry = self.servers.vacant_entry();
        let id = ServerId::from_key(entry.key());
        entry.insert(build(id));
        id
    }

    pub fn server(&self, id: ServerId) -> &Server {
        &self.servers[id.key()]
    }

    pub fn server_mut(&mut self, id: ServerId) -> &mut Server {
        &mut self.servers[id.key()]
    }

    pub fn proxy(&self, id: ProxyId) -> &Proxy {
        &self.proxies[id.key()]
    }

    pub fn proxy_mut(&mut self, id: ProxyId) -> &mut Proxy {
        &mut self.proxies[id.key()]
    }

    pub fn server_ids(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.servers.iter().map(|(key, _)| ServerId::from_key(key))
    }

    pub fn servers_of(&self, proxy: ProxyId) -> impl Iterator<Item = &Server> + '_ {
        self.servers.iter().filter_map(move |(_, s)| {
            if s.proxy == proxy {
                Some(s)
            } else {
                None
            }
        })
    }

    /// Recomputes `srv_act`/`srv_bck` for a proxy from its servers' current
    /// RUNNING/BACKUP flags (`recount_servers` in spec.md §6 — modeled as a
    /// `Topology` method rather than a `Backend` trait method because it
    /// only touches data this crate already owns; see DESIGN.md).
    pub fn recount_servers(&mut self, proxy: ProxyId) {
        let (mut act, mut bck) = (0u32, 0u32);
        for s in self.servers_of(proxy) {
            if s.is_running() {
                if s.is_backup() {
                    bck += 1;
                } else {
                    act += 1;
                }
            }
        }
        let p = self.proxy_mut(proxy);
        p.srv_act = act;
        p.srv_bck = bck;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_budget_rejects_past_the_limit_and_frees_on_release() {
        let mut topology = Topology::with_max_sockets(Some(2));
        assert!(topology.try_acquire_socket());
        assert!(topology.try_acquire_socket());
        assert!(!topology.try_acquire_socket());

        topology.release_socket();
        assert!(topology.try_acquire_socket());
    }

    #[test]
    fn unbounded_socket_budget_never_rejects() {
        let mut topology = Topology::new();
        for _ in 0..1000 {
            assert!(topology.try_acquire_socket());
        }
    }

    #[test]
    fn acquire_release_pairs_never_leak() {
        // spec.md §8: "over N probes, fd_insert calls == fd_delete calls" —
        // here, acquire/release counts must stay balanced across any mix of
        // successes and budget rejections.
        let mut topology = Topology::with_max_sockets(Some(3));
        for _ in 0..50 {
            if topology.try_acquire_socket() {
                topology.release_socket();
            }
        }
        assert!(topology.try_acquire_socket());
        assert!(topology.try_acquire_socket());
        assert!(topology.try_acquire_socket());
        assert!(!topology.try_acquire_socket());
    }
}
