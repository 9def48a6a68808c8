//! Configuration types for tierbuf.
//!
//! Each node loads one [`Config`]; the cluster section must agree across
//! nodes (same peer list, same device shape) for the sharding arithmetic to
//! line up.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Root configuration for a tierbuf node.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cluster membership and identity
    pub cluster: ClusterConfig,
    /// Metadata manager sizing
    pub metadata: MetadataConfig,
    /// Buffering devices on this node
    pub devices: DeviceConfig,
    /// Swap file naming
    pub swap: SwapConfig,
}

impl Config {
    /// Number of nodes in the cluster. A node with no configured peers is a
    /// single-node cluster.
    #[must_use]
    pub fn num_nodes(&self) -> u32 {
        if self.cluster.peers.is_empty() {
            1
        } else {
            self.cluster.peers.len() as u32
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.node_id < 1 {
            return Err(Error::configuration("node_id must be >= 1"));
        }
        if self.cluster.node_id > self.num_nodes() {
            return Err(Error::configuration(format!(
                "node_id {} exceeds cluster size {}",
                self.cluster.node_id,
                self.num_nodes()
            )));
        }
        if self.devices.capacities.len() != self.devices.num_devices as usize {
            return Err(Error::configuration(format!(
                "expected {} device capacities, got {}",
                self.devices.num_devices,
                self.devices.capacities.len()
            )));
        }
        let pct = self.metadata.metadata_arena_percentage;
        if !(0.0..=1.0).contains(&pct) || pct == 0.0 {
            return Err(Error::configuration(
                "metadata_arena_percentage must be in (0, 1]",
            ));
        }
        Ok(())
    }

    /// Size in bytes of this node's metadata arena.
    #[must_use]
    pub fn metadata_arena_bytes(&self) -> usize {
        let bytes =
            self.metadata.shared_memory_bytes as f64 * self.metadata.metadata_arena_percentage as f64;
        bytes as usize
    }
}

/// Cluster identity for this node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's id, in [1..N]
    pub node_id: u32,
    /// RPC listen addresses of every node, ordered by node id (peers[0] is
    /// node 1). Empty for a single-node deployment.
    pub peers: Vec<String>,
    /// Node holding the authoritative global system view state
    pub global_view_node_id: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            peers: Vec::new(),
            global_view_node_id: 1,
        }
    }
}

/// Metadata manager sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Maximum buckets this node's slot table can hold
    pub max_buckets_per_node: u32,
    /// Maximum vbuckets this node's slot table can hold
    pub max_vbuckets_per_node: u32,
    /// Total shared memory budget for this node (bytes)
    pub shared_memory_bytes: usize,
    /// Fraction of the shared memory budget given to the metadata arena
    pub metadata_arena_percentage: f32,
    /// How often nodes flush capacity deltas to the global view (milliseconds)
    pub system_view_state_update_interval_ms: u64,
    /// Base name for the metadata shared memory segment; the node id is
    /// appended
    pub shmem_name_prefix: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            max_buckets_per_node: 128,
            max_vbuckets_per_node: 8,
            shared_memory_bytes: 64 * 1024 * 1024,
            metadata_arena_percentage: 0.5,
            system_view_state_update_interval_ms: 100,
            shmem_name_prefix: "/tierbuf_mdm_".to_string(),
        }
    }
}

/// Buffering devices available on this node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Number of buffering devices
    pub num_devices: u32,
    /// Initial capacity of each device (bytes), indexed by device id
    pub capacities: Vec<u64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            num_devices: 4,
            // RAM, NVMe, burst buffer, parallel file system
            capacities: vec![
                128 * 1024 * 1024,
                512 * 1024 * 1024,
                2 * 1024 * 1024 * 1024,
                8 * 1024 * 1024 * 1024,
            ],
        }
    }
}

/// Swap file naming. The per-node swap path is
/// `filename_prefix || decimal(node_id) || filename_suffix`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwapConfig {
    /// Path prefix for swap files
    pub filename_prefix: String,
    /// Suffix for swap files
    pub filename_suffix: String,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            filename_prefix: "tierbuf_swap_".to_string(),
            filename_suffix: ".dat".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_nodes(), 1);
        assert_eq!(config.cluster.global_view_node_id, 1);
    }

    #[test]
    fn test_arena_bytes_follows_percentage() {
        let mut config = Config::default();
        config.metadata.shared_memory_bytes = 1000;
        config.metadata.metadata_arena_percentage = 0.25;
        assert_eq!(config.metadata_arena_bytes(), 250);
    }

    #[test]
    fn test_validate_rejects_capacity_mismatch() {
        let mut config = Config::default();
        config.devices.num_devices = 2;
        config.devices.capacities = vec![100];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_node_id_out_of_range() {
        let mut config = Config::default();
        config.cluster.node_id = 3;
        config.cluster.peers = vec!["a:1".into(), "b:1".into()];
        assert!(config.validate().is_err());
    }
}
