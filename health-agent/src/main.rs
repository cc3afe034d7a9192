//! Thin runnable driver for `healthcheck-core`: loads a TOML topology and
//! runs one check task per server until interrupted.
//!
//! Not part of spec.md's scope (which stops at "the subsystem"), but every
//! example in the corpus ships a runnable entry point, and this gives the
//! checker somewhere to run end to end. It has no real proxying/session
//! layer behind it, so `MemoryBackend`'s pending queues simply start
//! empty.

use clap::Parser;
use healthcheck_core::backend::MemoryBackend;
use healthcheck_core::config::RootConfig;
use healthcheck_core::driver;
use healthcheck_core::ids::ServerId;
use healthcheck_core::model::Topology;
use healthcheck_core::transition;
#[cfg(not(target_os = "linux"))]
use healthcheck_core::transport::UnsupportedTransparentProxy;
#[cfg(target_os = "linux")]
use healthcheck_core::transport::LinuxTransparentProxy;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use thiserror::Error;
use tokio::task::LocalSet;

#[derive(Debug, Parser)]
#[command(name = "health-agent", about = "Runs the backend health checker against a TOML topology")]
struct Args {
    /// Path to a topology TOML file (see healthcheck_core::config).
    #[arg(long)]
    config: PathBuf,
}

#[derive(Debug, Error)]
enum AgentError {
    #[error("failed to read {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid topology: {0}")]
    BuildTopology(#[from] healthcheck_core::config::ConfigError),
}

fn load_topology(path: &PathBuf) -> Result<Topology, AgentError> {
    let contents = std::fs::read_to_string(path).map_err(|source| AgentError::ReadConfig {
        path: path.clone(),
        source,
    })?;
    let root: RootConfig = toml::from_str(&contents).map_err(|source| AgentError::ParseConfig {
        path: path.clone(),
        source,
    })?;
    Ok(root.build()?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let topology = load_topology(&args.config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();
    local.block_on(&runtime, run(topology))?;
    Ok(())
}

async fn run(topology: Topology) -> Result<(), Box<dyn std::error::Error>> {
    let server_ids: Vec<ServerId> = topology.server_ids().collect();
    let topology = Rc::new(RefCell::new(topology));
    let backend = Rc::new(RefCell::new(MemoryBackend::new()));

    #[cfg(target_os = "linux")]
    let tproxy: Rc<dyn healthcheck_core::transport::TransparentProxy> = Rc::new(LinuxTransparentProxy);
    #[cfg(not(target_os = "linux"))]
    let tproxy: Rc<dyn healthcheck_core::transport::TransparentProxy> = Rc::new(UnsupportedTransparentProxy);

    tracing::info!(servers = server_ids.len(), "starting health checks");

    for server_id in server_ids {
        let topology = topology.clone();
        let backend = backend.clone();
        let tproxy = tproxy.clone();
        tokio::task::spawn_local(check_loop(topology, backend, tproxy, server_id));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}

/// One server's `new_chk` loop: read what `run_check` needs, drop the
/// borrow, run the check unlocked, then briefly re-borrow to fold the
/// outcome into the shared topology (health, transitions, redispatch).
async fn check_loop(
    topology: Rc<RefCell<Topology>>,
    backend: Rc<RefCell<MemoryBackend>>,
    tproxy: Rc<dyn healthcheck_core::transport::TransparentProxy>,
    server_id: ServerId,
) {
    loop {
        let (dest, source, proxy_source, interval, probe, skip) = {
            let topo = topology.borrow();
            let server = topo.server(server_id);
            let proxy = topo.proxy(server.proxy);
            let skip = proxy.stopped || !server.is_checked();
            (
                server.check_destination(),
                server.source.clone(),
                proxy.source.clone(),
                server.interval,
                proxy.probe.clone(),
                skip,
            )
        };

        // spec.md §4.E idle branch: never probe a stopped proxy or an
        // unchecked server; just keep advancing in place.
        if skip {
            tokio::time::sleep(interval).await;
            continue;
        }

        // spec.md §4.B step 1: fail the probe outright if doing so would
        // exceed the configured socket budget, without ever opening a fd.
        let acquired = topology.borrow_mut().try_acquire_socket();
        let outcome = if acquired {
            let outcome = driver::run_check(dest, &source, &proxy_source, interval, &probe, tproxy.as_ref()).await;
            topology.borrow_mut().release_socket();
            outcome
        } else {
            healthcheck_core::driver::CheckOutcome::Fail(
                healthcheck_core::error::CheckError::SocketLimitExceeded {
                    limit: topology.borrow().max_sockets().unwrap_or(0),
                },
            )
        };
        let ok = outcome.is_ok();

        {
            let mut topo = topology.borrow_mut();
            let mut backend = backend.borrow_mut();
            let transition = transition::apply_check_result(&mut topo, server_id, ok, &mut *backend);
            if let healthcheck_core::driver::CheckOutcome::Fail(error) = &outcome {
                if !transition.went_down {
                    healthcheck_core::log::log_probe_failed(topo.server(server_id), error);
                }
            }
        }

        tokio::time::sleep(interval).await;
    }
}
