use tracing::{debug, info};

use super::Orchestrator;
use crate::error::Result;

impl Orchestrator {
    /// Create an attachable network named `id` unless one already exists.
    pub async fn create_network(&self, id: &str) -> Result<()> {
        let networks = self.engine.list_networks().await?;
        if networks.iter().any(|n| n.name == id) {
            debug!(network = %id, "network exists");
            return Ok(());
        }

        self.engine.create_network(id, true).await?;
        info!(network = %id, "network created");
        Ok(())
    }

    /// Remove every network named `id`. Absent networks are not an error.
    pub async fn remove_network(&self, id: &str) -> Result<()> {
        let networks = self.engine.list_networks().await?;
        for network in networks.iter().filter(|n| n.name == id) {
            match self.engine.remove_network(&network.id).await {
                Ok(()) => info!(network = %id, network_id = %network.id, "network removed"),
                Err(e) if e.is_not_found() => {
                    debug!(network = %id, "network already removed")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Engine id of the network named `id`, if it exists.
    pub async fn network_id(&self, id: &str) -> Result<Option<String>> {
        let networks = self.engine.list_networks().await?;
        Ok(networks.into_iter().find(|n| n.name == id).map(|n| n.id))
    }
}
