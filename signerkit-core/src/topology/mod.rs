//! Weighted signer trees and the configurations built from them.
//!
//! A [`Topology`] is a binary tree whose leaves are signers, sapient signers (signers whose
//! authority is itself a committed tree) or nested sub-trees with their own threshold. A
//! [`Configuration`] pairs a topology with a threshold and a monotonically increasing
//! checkpoint.
//!
//! Wallet configurations always have the fixed shape described in [`wallet`].

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};

use crate::primitives::{weight_word, Address, ImageHash, Weight, B256, U256};

pub mod recovery;
pub mod sessions;
pub mod wallet;

pub use wallet::WalletTopology;

/// A node of a signer tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Topology {
    /// A plain signer, authorized by an ECDSA signature.
    Signer {
        /// Signer address.
        address: Address,
        /// Voting power.
        weight: Weight,
    },
    /// A signer whose authority is a tree committed by `image_hash`.
    SapientSigner {
        /// Address of the contract that validates the sapient signature.
        address: Address,
        /// Commitment of the tree the signer validates against.
        #[serde(rename = "imageHash")]
        image_hash: ImageHash,
        /// Voting power.
        weight: Weight,
    },
    /// A sub-tree which contributes `weight` once its own `threshold` is met.
    Nested {
        /// The sub-tree.
        tree: Box<Topology>,
        /// Voting power contributed when the sub-threshold is reached.
        weight: Weight,
        /// Weight required inside the sub-tree.
        threshold: Weight,
    },
    /// Interior node.
    Node {
        /// Left branch.
        left: Box<Topology>,
        /// Right branch.
        right: Box<Topology>,
    },
    /// A sub-tree known only by its hash.
    NodeHash {
        /// Hash of the unresolved sub-tree.
        hash: B256,
    },
}

const SIGNER_LEAF_PREFIX: &[u8] = b"Sequence signer:\n";
const SAPIENT_LEAF_PREFIX: &[u8] = b"Sequence sapient config:\n";
const NESTED_LEAF_PREFIX: &[u8] = b"Sequence nested config:\n";

impl Topology {
    /// Creates a signer leaf.
    #[must_use]
    pub const fn signer(address: Address, weight: Weight) -> Self {
        Self::Signer { address, weight }
    }

    /// Creates a sapient signer leaf.
    #[must_use]
    pub const fn sapient(address: Address, image_hash: ImageHash, weight: Weight) -> Self {
        Self::SapientSigner {
            address,
            image_hash,
            weight,
        }
    }

    /// Creates an interior node.
    #[must_use]
    pub fn node(left: Self, right: Self) -> Self {
        Self::Node {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// The placeholder standing for an empty set of signers.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Signer {
            address: Address::ZERO,
            weight: 0,
        }
    }

    /// Whether this is the empty-set placeholder.
    #[must_use]
    pub fn is_empty_placeholder(&self) -> bool {
        matches!(self, Self::Signer { address, weight: 0 } if address.is_zero())
    }

    /// Whether this node is a leaf (anything but an interior node).
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        !matches!(self, Self::Node { .. })
    }

    /// Hash of the tree, as committed in image hashes.
    #[must_use]
    pub fn hash(&self) -> B256 {
        match self {
            Self::Signer { address, weight } => {
                let mut preimage = Vec::with_capacity(SIGNER_LEAF_PREFIX.len() + 20 + 32);
                preimage.extend_from_slice(SIGNER_LEAF_PREFIX);
                preimage.extend_from_slice(address.as_slice());
                preimage.extend_from_slice(&weight_word(*weight));
                keccak256(preimage)
            }
            Self::SapientSigner {
                address,
                image_hash,
                weight,
            } => {
                let mut preimage = Vec::with_capacity(SAPIENT_LEAF_PREFIX.len() + 20 + 64);
                preimage.extend_from_slice(SAPIENT_LEAF_PREFIX);
                preimage.extend_from_slice(address.as_slice());
                preimage.extend_from_slice(&weight_word(*weight));
                preimage.extend_from_slice(image_hash.as_slice());
                keccak256(preimage)
            }
            Self::Nested {
                tree,
                weight,
                threshold,
            } => {
                let mut preimage = Vec::with_capacity(NESTED_LEAF_PREFIX.len() + 96);
                preimage.extend_from_slice(NESTED_LEAF_PREFIX);
                preimage.extend_from_slice(tree.hash().as_slice());
                preimage.extend_from_slice(&weight_word(*threshold));
                preimage.extend_from_slice(&weight_word(*weight));
                keccak256(preimage)
            }
            Self::Node { left, right } => {
                let mut preimage = [0u8; 64];
                preimage[..32].copy_from_slice(left.hash().as_slice());
                preimage[32..].copy_from_slice(right.hash().as_slice());
                keccak256(preimage)
            }
            Self::NodeHash { hash } => *hash,
        }
    }

    /// Collects the leaves of the tree from left to right, descending into interior nodes
    /// but not into nested leaves.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Self> {
        let mut leaves = Vec::new();
        collect_leaves(self, &mut leaves);
        leaves
    }
}

fn collect_leaves<'a>(topology: &'a Topology, out: &mut Vec<&'a Topology>) {
    match topology {
        Topology::Node { left, right } => {
            collect_leaves(left, out);
            collect_leaves(right, out);
        }
        leaf => out.push(leaf),
    }
}

/// A sapient signer reference: the validating contract and the committed tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SapientSignerLeaf {
    /// Address of the validating contract.
    pub address: Address,
    /// Image hash of the tree the signer validates against.
    #[serde(rename = "imageHash")]
    pub image_hash: ImageHash,
}

/// Signers found in a topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signers {
    /// Plain signers.
    pub signers: Vec<Address>,
    /// Sapient signers.
    pub sapient_signers: Vec<SapientSignerLeaf>,
    /// False when part of the tree is only known by its hash.
    pub is_complete: bool,
}

/// Flattens every signer of a topology, including those inside nested leaves.
///
/// The empty-set placeholder is not reported.
#[must_use]
pub fn get_signers(topology: &Topology) -> Signers {
    let mut signers = Signers {
        is_complete: true,
        ..Signers::default()
    };
    walk_signers(topology, &mut signers);
    signers
}

fn walk_signers(topology: &Topology, out: &mut Signers) {
    match topology {
        Topology::Signer { address, .. } => {
            if !topology.is_empty_placeholder() && !out.signers.contains(address) {
                out.signers.push(*address);
            }
        }
        Topology::SapientSigner {
            address,
            image_hash,
            ..
        } => {
            let leaf = SapientSignerLeaf {
                address: *address,
                image_hash: *image_hash,
            };
            if !out.sapient_signers.contains(&leaf) {
                out.sapient_signers.push(leaf);
            }
        }
        Topology::Nested { tree, .. } => walk_signers(tree, out),
        Topology::Node { left, right } => {
            walk_signers(left, out);
            walk_signers(right, out);
        }
        Topology::NodeHash { .. } => out.is_complete = false,
    }
}

/// Builds a balanced tree out of a flat list of leaves.
///
/// An empty list produces the empty-set placeholder so that enclosing shapes never collapse.
#[must_use]
pub fn flat_leaves_to_topology(leaves: &[Topology]) -> Topology {
    match leaves {
        [] => Topology::empty(),
        [leaf] => leaf.clone(),
        _ => {
            let (left, right) = leaves.split_at(leaves.len() / 2);
            Topology::node(flat_leaves_to_topology(left), flat_leaves_to_topology(right))
        }
    }
}

/// A member of a capped tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CappedMember {
    /// Signer address.
    pub address: Address,
    /// Present for sapient members.
    #[serde(rename = "imageHash", default, skip_serializing_if = "Option::is_none")]
    pub image_hash: Option<ImageHash>,
}

impl CappedMember {
    /// A plain signer member.
    #[must_use]
    pub const fn signer(address: Address) -> Self {
        Self {
            address,
            image_hash: None,
        }
    }

    /// A sapient signer member.
    #[must_use]
    pub const fn sapient(address: Address, image_hash: ImageHash) -> Self {
        Self {
            address,
            image_hash: Some(image_hash),
        }
    }

    fn leaf(&self) -> Topology {
        match self.image_hash {
            Some(image_hash) => Topology::sapient(self.address, image_hash, 1),
            None => Topology::signer(self.address, 1),
        }
    }
}

/// Wraps members so that any single one of them reaches weight 1.
///
/// Zero members give the placeholder, one member gives its own weight-1 leaf, and more members
/// are placed under a nested leaf with weight 1 and threshold 1.
#[must_use]
pub fn build_capped_tree(members: &[CappedMember]) -> Topology {
    match members {
        [] => Topology::empty(),
        [member] => member.leaf(),
        _ => {
            let leaves: Vec<_> = members.iter().map(CappedMember::leaf).collect();
            Topology::Nested {
                tree: Box::new(flat_leaves_to_topology(&leaves)),
                weight: 1,
                threshold: 1,
            }
        }
    }
}

/// Recovers the members of a tree produced by [`build_capped_tree`].
#[must_use]
pub fn capped_members(topology: &Topology) -> Vec<CappedMember> {
    let root = match topology {
        Topology::Nested { tree, .. } => tree.as_ref(),
        other => other,
    };
    root.leaves()
        .into_iter()
        .filter_map(|leaf| match leaf {
            Topology::Signer { address, .. } if !leaf.is_empty_placeholder() => {
                Some(CappedMember::signer(*address))
            }
            Topology::SapientSigner {
                address,
                image_hash,
                ..
            } => Some(CappedMember::sapient(*address, *image_hash)),
            _ => None,
        })
        .collect()
}

/// A versioned signer tree with its threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Monotonically increasing version.
    pub checkpoint: u64,
    /// Weight required to authorize an action.
    pub threshold: Weight,
    /// The signer tree.
    pub topology: Topology,
}

impl Configuration {
    /// Image hash committing to the topology, threshold and checkpoint.
    #[must_use]
    pub fn image_hash(&self) -> ImageHash {
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(self.topology.hash().as_slice());
        preimage[32..].copy_from_slice(&weight_word(self.threshold));
        let with_threshold = keccak256(preimage);

        preimage[..32].copy_from_slice(with_threshold.as_slice());
        preimage[32..].copy_from_slice(&U256::from(self.checkpoint).to_be_bytes::<32>());
        let with_checkpoint = keccak256(preimage);

        // No checkpointer contract is used, its slot is committed as zero.
        preimage[..32].copy_from_slice(with_checkpoint.as_slice());
        preimage[32..].fill(0);
        keccak256(preimage)
    }

    /// Signers of the configuration.
    #[must_use]
    pub fn signers(&self) -> Signers {
        get_signers(&self.topology)
    }
}
