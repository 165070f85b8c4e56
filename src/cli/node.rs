use tracing::info;

use crate::config::VaultConfig;
use crate::error::Result;
use crate::node::VaultNode;

/// Opens the configured store (or an in-memory one) and serves the gateway until it fails.
pub async fn run_server(config: VaultConfig, in_memory: bool) -> Result<()> {
    let node = VaultNode::open(config, in_memory)?;
    if node.config.work.peers.is_empty() && node.config.work.delegated_key.is_none() {
        info!("No work peers or delegated key configured, work will be generated locally");
    }
    node.serve().await
}
