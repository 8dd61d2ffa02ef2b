// Copyright (c) 2026 Phinet Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Node entrypoint (systemd-friendly): reads configuration from the
//! environment, starts a [`phinet::orchestrator::NetworkNode`], logs its
//! event stream, and runs until terminated.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use phinet::core::security::keystore::{FileSecretStore, SecretStore};
use phinet::core::snapshot::{FileSnapshotStore, SnapshotStore};
use phinet::core::store::{ChainStore, SledChainStore};
use phinet::core::types::{ConsensusConfig, HttpConfig, NodeConfig, NodeSettings, P2pConfig};
use phinet::orchestrator::NetworkNode;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

fn load_config() -> NodeConfig {
    NodeConfig {
        node: NodeSettings {
            name: env("PHINET_NODE_NAME", "phinet-node"),
            data_dir: env("PHINET_DATA_DIR", "./data"),
        },
        http: HttpConfig {
            listen_addr: env("PHINET_HTTP_LISTEN_ADDR", "0.0.0.0:9090"),
        },
        p2p: P2pConfig {
            listen_addr: env("PHINET_P2P_LISTEN_ADDR", "0.0.0.0:4001"),
            topic: env("PHINET_P2P_TOPIC", "phinet-consensus"),
            max_msg_per_sec: env_parsed("PHINET_MAX_MSG_PER_SEC", 200),
            max_peers: env_parsed("PHINET_MAX_PEERS", 64),
            seed_peers: env_list("PHINET_SEED_PEERS"),
            heartbeat_ms: env_parsed("PHINET_HEARTBEAT_MS", 10_000),
        },
        consensus: ConsensusConfig {
            validators_hex: env_list("PHINET_VALIDATORS"),
            slot_ms: env_parsed("PHINET_SLOT_MS", 400),
            finality_depth: env_parsed("PHINET_FINALITY_DEPTH", 3),
            proposal_timeout_ms: env_parsed("PHINET_PROPOSAL_TIMEOUT_MS", 800),
            genesis_ms: env_parsed("PHINET_GENESIS_MS", 0),
        },
    }
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).with_level(true).compact().try_init();

    let config = load_config();
    info!(node = %config.node.name, data_dir = %config.node.data_dir, "phinet node starting");

    let secret_store: Box<dyn SecretStore> = match FileSecretStore::open(&config.node.data_dir) {
        Ok(store) => Box::new(store),
        Err(err) => {
            eprintln!("failed to open key store: {err}");
            std::process::exit(1);
        }
    };

    let mut chain_dir = PathBuf::from(&config.node.data_dir);
    chain_dir.push("chain");
    let store: Arc<dyn ChainStore> = match SledChainStore::open(chain_dir.to_string_lossy().as_ref()) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("failed to open chain store: {err}");
            std::process::exit(1);
        }
    };

    let mut snapshot_path = PathBuf::from(&config.node.data_dir);
    snapshot_path.push("snapshot");
    let snapshot_store: Arc<dyn SnapshotStore> = match FileSnapshotStore::open(snapshot_path.to_string_lossy().as_ref()) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("failed to open snapshot store: {err}");
            std::process::exit(1);
        }
    };

    let node = match NetworkNode::start(config, secret_store, store, snapshot_store).await {
        Ok(node) => node,
        Err(err) => {
            eprintln!("node start failed: {err}");
            std::process::exit(1);
        }
    };

    let (mut events, _subscription) = node.subscribe();
    let event_task = tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            info!(?ev, "node event");
        }
        warn!("node event channel closed");
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(err) => warn!(%err, "failed to listen for shutdown signal"),
    }

    node.stop().await;
    event_task.abort();
}
