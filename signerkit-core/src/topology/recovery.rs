//! The recovery module tree.
//!
//! The recovery module is a sapient signer whose image hash commits to a list of recovery
//! signers, each with a timelock. A recovery signer may queue a payload on the module; once
//! the timelock elapses the module signs for the wallet.

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};

use super::{flat_leaves_to_topology, Configuration, Topology};
use crate::primitives::{Address, ImageHash, U256};

const RECOVERY_LEAF_PREFIX: &[u8] = b"Sequence recovery leaf:\n";

/// A recovery signer registered on the recovery module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryLeaf {
    /// Signer allowed to queue recovery payloads.
    pub signer: Address,
    /// Seconds a queued payload must wait before it becomes valid.
    pub required_delta_time: u64,
    /// Payloads queued before this timestamp (seconds) are ignored.
    pub min_timestamp: u64,
}

impl RecoveryLeaf {
    fn hash(&self) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(RECOVERY_LEAF_PREFIX.len() + 20 + 64);
        preimage.extend_from_slice(RECOVERY_LEAF_PREFIX);
        preimage.extend_from_slice(self.signer.as_slice());
        preimage.extend_from_slice(&U256::from(self.required_delta_time).to_be_bytes::<32>());
        preimage.extend_from_slice(&U256::from(self.min_timestamp).to_be_bytes::<32>());
        keccak256(preimage).0
    }
}

/// Image hash of a list of recovery leaves.
///
/// Leaves are committed in the order given; callers keep them sorted by signer.
#[must_use]
pub fn recovery_image_hash(leaves: &[RecoveryLeaf]) -> ImageHash {
    let mut preimage = Vec::with_capacity(leaves.len() * 32);
    for leaf in leaves {
        preimage.extend_from_slice(&leaf.hash());
    }
    keccak256(preimage)
}

/// Sorts and deduplicates recovery leaves by signer.
#[must_use]
pub fn normalize_recovery_leaves(mut leaves: Vec<RecoveryLeaf>) -> Vec<RecoveryLeaf> {
    leaves.sort_by_key(|leaf| leaf.signer);
    leaves.dedup_by_key(|leaf| leaf.signer);
    leaves
}

/// Configuration signed by recovery signers when queueing a payload: any one of them suffices.
#[must_use]
pub fn recovery_signers_configuration(leaves: &[RecoveryLeaf]) -> Configuration {
    let signer_leaves: Vec<_> = leaves
        .iter()
        .map(|leaf| Topology::signer(leaf.signer, 1))
        .collect();
    Configuration {
        checkpoint: 0,
        threshold: 1,
        topology: flat_leaves_to_topology(&signer_leaves),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> RecoveryLeaf {
        RecoveryLeaf {
            signer: Address::repeat_byte(byte),
            required_delta_time: 60,
            min_timestamp: 0,
        }
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let leaves = normalize_recovery_leaves(vec![leaf(3), leaf(1), leaf(3)]);
        assert_eq!(leaves, vec![leaf(1), leaf(3)]);
    }

    #[test]
    fn test_image_hash_commits_to_timelock() {
        let mut slower = leaf(1);
        slower.required_delta_time = 120;
        assert_ne!(recovery_image_hash(&[leaf(1)]), recovery_image_hash(&[slower]));
    }

    #[test]
    fn test_signers_configuration() {
        let config = recovery_signers_configuration(&[leaf(1), leaf(2)]);
        assert_eq!(config.threshold, 1);
        assert_eq!(
            config.signers().signers,
            vec![Address::repeat_byte(1), Address::repeat_byte(2)]
        );
    }
}
