#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! NoiseFS node entrypoint (systemd-friendly).
//! Starts the coordinator and gossip host and keeps the process alive.

use std::sync::Arc;

use axum::{extract::State, routing::get, Router};
use prometheus::Encoder;
use tracing::{info, warn};

use noisefs::client::Coordinator;
use noisefs::core::config::NoiseConfig;
use noisefs::core::store::{BlockStore, MemoryStore, SledStore};
use noisefs::monitoring::audit::TracingAudit;
use noisefs::monitoring::metrics::Metrics;
use noisefs::networking::p2p::{spawn_p2p, P2pConfig};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> String {
    let mut buf = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    if encoder
        .encode(&metrics.registry.gather(), &mut buf)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

async fn health_handler() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let config_path = env("NOISEFS_CONFIG", "noisefs.toml");
    let cfg = if std::path::Path::new(&config_path).exists() {
        match NoiseConfig::load(&config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("config load failed: {e}");
                std::process::exit(1);
            }
        }
    } else {
        warn!(path = %config_path, "config file missing; using defaults");
        NoiseConfig::default()
    };

    let metrics = Arc::new(Metrics::new().expect("metrics init failed"));

    let store: Arc<dyn BlockStore> = if cfg.store.backend == "memory" {
        warn!("memory store configured; blocks will not survive restarts");
        Arc::new(MemoryStore::new())
    } else {
        let db = match sled::open(format!("{}/db", cfg.node.data_dir)) {
            Ok(db) => db,
            Err(e) => {
                eprintln!("store open failed: {e}");
                std::process::exit(1);
            }
        };
        match SledStore::open(&db) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                eprintln!("store open failed: {e}");
                std::process::exit(1);
            }
        }
    };

    let coordinator = match Coordinator::start(
        cfg.clone(),
        store,
        metrics.clone(),
        Arc::new(TracingAudit),
    )
    .await
    {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("coordinator start failed: {e}");
            std::process::exit(1);
        }
    };

    // Inventory gossip host; events and announcements feed the coordinator.
    let p2p_cfg = P2pConfig {
        listen_addr: cfg.p2p.listen_addr.clone(),
        inventory_topic: cfg.p2p.inventory_topic.clone(),
        max_msg_per_sec: cfg.p2p.max_msg_per_sec,
        max_peers_per_ip: cfg.p2p.max_peers_per_ip,
        data_dir: cfg.node.data_dir.clone(),
        bootstrap: cfg.p2p.bootstrap.clone(),
    };
    let gossip = match spawn_p2p(p2p_cfg, metrics.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(err = %e, "gossip host failed to start; continuing without gossip");
            None
        }
    };

    let mut gossip_tasks = Vec::new();
    if let Some((mut node, mut ev_rx, p2p_handle)) = gossip {
        gossip_tasks.push(p2p_handle);

        let coord = coordinator.clone();
        gossip_tasks.push(tokio::spawn(async move {
            while let Some(ev) = ev_rx.recv().await {
                coord.handle_p2p_event(ev);
            }
            warn!("p2p event channel closed");
        }));

        let coord = coordinator.clone();
        gossip_tasks.push(tokio::spawn(async move {
            while let Some((peer, announce)) = node.inbound().recv().await {
                coord.handle_inventory(peer, announce);
            }
            warn!("p2p inbound channel closed");
        }));
    }

    // Metrics + health endpoint.
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler))
        .with_state(metrics.clone());
    let listen_addr = cfg.http.listen_addr.clone();
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(&listen_addr).await {
            Ok(listener) => {
                info!(addr = %listen_addr, "http endpoint up");
                if let Err(e) = axum::serve(listener, app).await {
                    warn!(err = %e, "http endpoint stopped");
                }
            }
            Err(e) => warn!(addr = %listen_addr, err = %e, "http bind failed"),
        }
    });

    info!(name = %cfg.node.name, data_dir = %cfg.node.data_dir, "noisefs node started");

    // Wait for shutdown signal.
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
    for t in gossip_tasks {
        t.abort();
    }
    coordinator.shutdown().await;
}
