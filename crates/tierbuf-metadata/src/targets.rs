//! Target and neighborhood queries.
//!
//! Targets are the per-device placement destinations a node exposes. The
//! placement engine asks for the targets of this node's ring neighborhood:
//! nothing on a single-node cluster, the next node's targets on a pair, and
//! next-then-previous on anything larger.

use crate::error::Result;
use crate::service::MetadataService;
use tierbuf_common::{DeviceId, TargetId};
use tierbuf_rpc::{next_node, previous_node, Request, Rpc};

impl MetadataService {
    /// The targets this node exposes.
    #[must_use]
    pub fn local_get_node_targets(&self) -> Vec<TargetId> {
        self.pool().node_targets()
    }

    /// The targets `target_node` exposes.
    pub fn get_node_targets(&self, target_node: u32) -> Result<Vec<TargetId>> {
        if target_node == self.node_id() {
            Ok(self.local_get_node_targets())
        } else {
            Ok(self
                .rpc()
                .call(target_node, Request::GetNodeTargets)?
                .into_target_ids()?)
        }
    }

    /// The targets of this node's ring neighbors, next node first.
    pub fn get_neighborhood_targets(&self) -> Result<Vec<TargetId>> {
        let node_id = self.node_id();
        match self.num_nodes() {
            1 => Ok(Vec::new()),
            2 => self.get_node_targets(next_node(node_id, 2)),
            n => {
                let mut result = self.get_node_targets(next_node(node_id, n))?;
                result.extend(self.get_node_targets(previous_node(node_id, n))?);
                Ok(result)
            }
        }
    }

    /// Remaining capacity of one of this node's targets.
    #[must_use]
    pub fn local_get_remaining_target_capacity(&self, target_id: TargetId) -> u64 {
        self.pool().remaining_target_capacity(target_id)
    }

    /// Remaining capacity of `target_id`, from its node.
    pub fn get_remaining_target_capacity(&self, target_id: TargetId) -> Result<u64> {
        let target = target_id.node_id();
        if target == self.node_id() {
            Ok(self.local_get_remaining_target_capacity(target_id))
        } else {
            Ok(self
                .rpc()
                .call(target, Request::GetRemainingTargetCapacity { target_id })?
                .into_u64()?)
        }
    }

    /// Remaining capacities of `targets`, in the same order.
    pub fn get_remaining_target_capacities(&self, targets: &[TargetId]) -> Result<Vec<u64>> {
        targets
            .iter()
            .map(|&target| self.get_remaining_target_capacity(target))
            .collect()
    }
}

/// First target bound to `device_id`; NULL if none matches.
#[must_use]
pub fn find_target_id_from_device_id(targets: &[TargetId], device_id: DeviceId) -> TargetId {
    targets
        .iter()
        .copied()
        .find(|target| target.device_id() == device_id)
        .unwrap_or(TargetId::NULL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_target_by_device() {
        let targets = vec![
            TargetId::new(1, 0, 0),
            TargetId::new(1, 1, 1),
            TargetId::new(2, 1, 0),
        ];
        assert_eq!(find_target_id_from_device_id(&targets, 1), targets[1]);
        assert_eq!(find_target_id_from_device_id(&targets, 7), TargetId::NULL);
    }
}
