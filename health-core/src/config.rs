//! Serde-deserializable configuration shape (SPEC_FULL.md §9). spec.md
//! itself treats configuration parsing as an out-of-scope sink; this gives
//! it a concrete shape so `health-agent` (and tests) can build a
//! [`Topology`] from a real file instead of constructing one by hand.

use crate::flags::{ProxyOptions, SourcePolicy, Tproxy};
use crate::health::Health;
use crate::ids::ProxyId;
use crate::model::{Proxy, Server, Topology};
use crate::probe::{default_http_request, default_smtp_request, Probe};
use serde::Deserialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("proxy {proxy}: rise must be at least 1")]
    RiseTooLow { proxy: String },

    #[error("proxy {proxy}: fall must be at least 1")]
    FallTooLow { proxy: String },

    #[error("proxy {proxy} server {server}: initial health {health} exceeds rise+fall-1 ({max})")]
    HealthOutOfRange {
        proxy: String,
        server: String,
        health: u32,
        max: u32,
    },

    #[error("proxy {proxy}: more than one check protocol option set (http-chk/ssl3-chk/smtp-chk are mutually exclusive)")]
    ConflictingCheckProtocols { proxy: String },

    #[error("invalid source address {0}")]
    InvalidSourceAddr(#[source] std::net::AddrParseError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    /// Process-wide cap on concurrently in-flight probe sockets, the
    /// configurable analogue of the original's `global.maxsock` (spec.md
    /// §4.B step 1). `None`/absent means unbounded.
    #[serde(default)]
    pub max_sockets: Option<u32>,
    #[serde(rename = "proxy", default)]
    pub proxies: Vec<ProxyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub id: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub check_request: Option<String>,
    #[serde(default)]
    pub source_addr: Option<String>,
    #[serde(rename = "server", default)]
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub addr: String,
    #[serde(default)]
    pub check_addr: Option<String>,
    #[serde(default)]
    pub check_port: Option<u16>,
    pub rise: u32,
    pub fall: u32,
    #[serde(default)]
    pub initial_health: Option<u32>,
    pub interval_ms: u64,
    #[serde(default)]
    pub backup: bool,
    #[serde(default)]
    pub source_addr: Option<String>,
}

fn parse_options(proxy_id: &str, raw: &[String]) -> Result<ProxyOptions, ConfigError> {
    let mut options = ProxyOptions::empty();
    let mut protocol_count = 0;
    for flag in raw {
        match flag.as_str() {
            "http-chk" => {
                options.insert(ProxyOptions::HTTP_CHK);
                protocol_count += 1;
            }
            "ssl3-chk" => {
                options.insert(ProxyOptions::SSL3_CHK);
                protocol_count += 1;
            }
            "smtp-chk" => {
                options.insert(ProxyOptions::SMTP_CHK);
                protocol_count += 1;
            }
            "redisp" => options.insert(ProxyOptions::REDISP),
            _ => {}
        }
    }
    if protocol_count > 1 {
        return Err(ConfigError::ConflictingCheckProtocols {
            proxy: proxy_id.to_string(),
        });
    }
    Ok(options)
}

fn parse_source_policy(addr: &Option<String>) -> Result<SourcePolicy, ConfigError> {
    match addr {
        None => Ok(SourcePolicy::default()),
        Some(raw) => {
            let parsed: SocketAddr = raw.parse().map_err(ConfigError::InvalidSourceAddr)?;
            Ok(SourcePolicy {
                source_addr: Some(parsed),
                tproxy: Tproxy::None,
            })
        }
    }
}

fn probe_for(options: ProxyOptions, check_request: &Option<String>) -> Probe {
    if options.contains(ProxyOptions::HTTP_CHK) {
        match check_request {
            Some(s) => Probe::http(s.clone()),
            None => Probe::http(default_http_request()),
        }
    } else if options.contains(ProxyOptions::SSL3_CHK) {
        Probe::ssl3(vec![0u8; 128])
    } else if options.contains(ProxyOptions::SMTP_CHK) {
        match check_request {
            Some(s) => Probe::smtp(s.clone()),
            None => Probe::smtp(default_smtp_request()),
        }
    } else {
        Probe::tcp()
    }
}

impl RootConfig {
    /// Parses and validates a complete config into a fresh [`Topology`].
    pub fn build(&self) -> Result<Topology, ConfigError> {
        let mut topology = Topology::with_max_sockets(self.max_sockets);
        for proxy_cfg in &self.proxies {
            let options = parse_options(&proxy_cfg.id, &proxy_cfg.options)?;
            let proxy_source = parse_source_policy(&proxy_cfg.source_addr)?;
            let probe = probe_for(options, &proxy_cfg.check_request);
            let proxy_id = topology.insert_proxy(|id| Proxy {
                id,
                name: proxy_cfg.id.clone(),
                options,
                probe,
                source: proxy_source,
                stopped: false,
                srv_act: 0,
                srv_bck: 0,
                pending: VecDeque::new(),
            });
            for server_cfg in &proxy_cfg.servers {
                build_server(&mut topology, proxy_id, &proxy_cfg.id, server_cfg)?;
            }
        }
        Ok(topology)
    }
}

fn build_server(
    topology: &mut Topology,
    proxy_id: ProxyId,
    proxy_name: &str,
    cfg: &ServerConfig,
) -> Result<(), ConfigError> {
    if cfg.rise < 1 {
        return Err(ConfigError::RiseTooLow {
            proxy: proxy_name.to_string(),
        });
    }
    if cfg.fall < 1 {
        return Err(ConfigError::FallTooLow {
            proxy: proxy_name.to_string(),
        });
    }
    let max = cfg.rise + cfg.fall - 1;
    let initial = cfg.initial_health.unwrap_or(cfg.rise);
    if initial > max {
        return Err(ConfigError::HealthOutOfRange {
            proxy: proxy_name.to_string(),
            server: cfg.id.clone(),
            health: initial,
            max,
        });
    }

    let addr: SocketAddr = cfg
        .addr
        .parse()
        .map_err(ConfigError::InvalidSourceAddr)?;
    let check_addr = cfg
        .check_addr
        .as_ref()
        .map(|raw| raw.parse())
        .transpose()
        .map_err(ConfigError::InvalidSourceAddr)?;
    let source = parse_source_policy(&cfg.source_addr)?;

    let mut flags = crate::flags::ServerFlags::empty();
    if cfg.backup {
        flags.insert(crate::flags::ServerFlags::BACKUP);
    }
    flags.insert(crate::flags::ServerFlags::CHECKED);
    if initial >= cfg.rise {
        flags.insert(crate::flags::ServerFlags::RUNNING);
    }

    topology.insert_server(|id| Server {
        id,
        proxy: proxy_id,
        addr,
        check_addr,
        check_port: cfg.check_port.unwrap_or(addr.port()),
        interval: Duration::from_millis(cfg.interval_ms),
        source,
        flags,
        health: Health::new(cfg.rise, cfg.fall, initial),
        failed_checks: 0,
        down_trans: 0,
        cur_sess: 0,
        pending: VecDeque::new(),
    });
    topology.recount_servers(proxy_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[proxy]]
        id = "web"
        options = ["http-chk", "redisp"]
        check_request = "OPTIONS / HTTP/1.0\r\n\r\n"

        [[proxy.server]]
        id = "web1"
        addr = "127.0.0.1:8080"
        rise = 2
        fall = 3
        interval_ms = 1000
    "#;

    #[test]
    fn parses_and_builds_topology() {
        let root: RootConfig = toml::from_str(SAMPLE).unwrap();
        let topology = root.build().unwrap();
        let server_id = topology.server_ids().next().unwrap();
        let server = topology.server(server_id);
        assert!(server.is_running());
        assert_eq!(server.check_port, 8080);
        let proxy = topology.proxy(server.proxy);
        assert_eq!(proxy.srv_act, 1);
    }

    #[test]
    fn rejects_rise_zero() {
        let toml = r#"
            [[proxy]]
            id = "web"
            [[proxy.server]]
            id = "web1"
            addr = "127.0.0.1:8080"
            rise = 0
            fall = 3
            interval_ms = 1000
        "#;
        let root: RootConfig = toml::from_str(toml).unwrap();
        assert!(matches!(root.build(), Err(ConfigError::RiseTooLow { .. })));
    }

    #[test]
    fn max_sockets_defaults_to_unbounded_and_can_be_set() {
        let root: RootConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(root.max_sockets, None);

        let with_limit: RootConfig = toml::from_str("max_sockets = 4\n").unwrap();
        let mut topology = with_limit.build().unwrap();
        assert_eq!(topology.max_sockets(), Some(4));
        for _ in 0..4 {
            assert!(topology.try_acquire_socket());
        }
        assert!(!topology.try_acquire_socket());
    }

    #[test]
    fn rejects_conflicting_protocols() {
        let toml = r#"
            [[proxy]]
            id = "web"
            options = ["http-chk", "smtp-chk"]
        "#;
        let root: RootConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            root.build(),
            Err(ConfigError::ConflictingCheckProtocols { .. })
        ));
    }
}
