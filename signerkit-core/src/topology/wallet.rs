//! Composition of wallet configurations.
//!
//! Every wallet configuration produced by this crate has the shape
//!
//! ```text
//! threshold 1:   [[login, devices], modules]
//! threshold 2:   [[[login, devices], guard], modules]
//! ```
//!
//! where `login`, `devices` and `guard` are capped trees (see
//! [`build_capped_tree`](super::build_capped_tree)) and `modules` is a balanced tree of
//! module leaves. All composition logic relies on this shape, so decomposition rejects anything
//! else.

use serde::{Deserialize, Serialize};

use super::{capped_members, flat_leaves_to_topology, CappedMember, Configuration, Topology};
use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::{Address, ImageHash, Weight};

/// Weight given to module leaves, high enough for a module to satisfy any outer threshold.
pub const MODULE_WEIGHT: Weight = 255;

/// The four logical sub-trees of a wallet configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTopology {
    /// Login signers (identity keys, passkeys, mnemonics).
    pub login: Topology,
    /// Device keys.
    pub devices: Topology,
    /// Guard co-signer, when the wallet uses one.
    pub guard: Option<Topology>,
    /// Module leaves (session manager, recovery).
    pub modules: Topology,
}

impl WalletTopology {
    /// Composes the configuration for `checkpoint`.
    #[must_use]
    pub fn to_config(&self, checkpoint: u64) -> Configuration {
        let signers = Topology::node(self.login.clone(), self.devices.clone());
        match &self.guard {
            None => Configuration {
                checkpoint,
                threshold: 1,
                topology: Topology::node(signers, self.modules.clone()),
            },
            Some(guard) => Configuration {
                checkpoint,
                threshold: 2,
                topology: Topology::node(
                    Topology::node(signers, guard.clone()),
                    self.modules.clone(),
                ),
            },
        }
    }

    /// Decomposes a configuration produced by [`WalletTopology::to_config`].
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::UnknownConfigFormat`] if the threshold or the node shape do
    /// not match.
    pub fn from_config(config: &Configuration) -> SignerKitResult<Self> {
        let Topology::Node {
            left: signers,
            right: modules,
        } = &config.topology
        else {
            return Err(unknown_format("root is not a node"));
        };

        let (login_devices, guard) = match config.threshold {
            1 => (signers.as_ref(), None),
            2 => {
                let Topology::Node { left, right } = signers.as_ref() else {
                    return Err(unknown_format("guarded signers are not a node"));
                };
                expect_leaf(right, "guard")?;
                (left.as_ref(), Some(right.as_ref().clone()))
            }
            threshold => {
                return Err(unknown_format(&format!("unexpected threshold {threshold}")));
            }
        };

        let Topology::Node { left, right } = login_devices else {
            return Err(unknown_format("login and devices are not a node"));
        };
        expect_leaf(left, "login")?;
        expect_leaf(right, "devices")?;

        Ok(Self {
            login: left.as_ref().clone(),
            devices: right.as_ref().clone(),
            guard,
            modules: modules.as_ref().clone(),
        })
    }

    /// Members of the login sub-tree.
    #[must_use]
    pub fn login_members(&self) -> Vec<CappedMember> {
        capped_members(&self.login)
    }

    /// Members of the devices sub-tree.
    #[must_use]
    pub fn device_members(&self) -> Vec<CappedMember> {
        capped_members(&self.devices)
    }

    /// Module leaves, in order.
    #[must_use]
    pub fn module_leaves(&self) -> Vec<Topology> {
        self.modules
            .leaves()
            .into_iter()
            .filter(|leaf| !leaf.is_empty_placeholder())
            .cloned()
            .collect()
    }

    /// Replaces the module leaves, rebuilding the modules tree.
    pub fn set_module_leaves(&mut self, leaves: &[Topology]) {
        self.modules = flat_leaves_to_topology(leaves);
    }

    /// Image hash committed by the module leaf at `module`, if the wallet has one.
    #[must_use]
    pub fn module_image_hash(&self, module: Address) -> Option<ImageHash> {
        self.module_leaves().into_iter().find_map(|leaf| match leaf {
            Topology::SapientSigner {
                address,
                image_hash,
                ..
            } if address == module => Some(image_hash),
            _ => None,
        })
    }

    /// Points the module leaf at `module` to a new image hash, adding it if missing.
    pub fn upsert_module(&mut self, module: Address, image_hash: ImageHash) {
        let mut leaves = self.module_leaves();
        let leaf = Topology::sapient(module, image_hash, MODULE_WEIGHT);
        match leaves.iter_mut().find(
            |existing| matches!(existing, Topology::SapientSigner { address, .. } if *address == module),
        ) {
            Some(existing) => *existing = leaf,
            None => leaves.push(leaf),
        }
        self.set_module_leaves(&leaves);
    }
}

fn expect_leaf(topology: &Topology, position: &str) -> SignerKitResult<()> {
    if topology.is_leaf() {
        Ok(())
    } else {
        Err(unknown_format(&format!("{position} is not a leaf")))
    }
}

fn unknown_format(reason: &str) -> SignerKitError {
    SignerKitError::UnknownConfigFormat(reason.to_string())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::primitives::B256;
    use crate::topology::build_capped_tree;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn sample(guard: bool, devices: u8, modules: usize) -> WalletTopology {
        let device_members: Vec<_> = (0..devices)
            .map(|i| CappedMember::signer(addr(0x10 + i)))
            .collect();
        let module_leaves: Vec<_> = (0..modules)
            .map(|i| Topology::sapient(addr(0x40 + i as u8), B256::repeat_byte(i as u8), MODULE_WEIGHT))
            .collect();
        WalletTopology {
            login: build_capped_tree(&[CappedMember::signer(addr(1))]),
            devices: build_capped_tree(&device_members),
            guard: guard.then(|| build_capped_tree(&[CappedMember::signer(addr(0x99))])),
            modules: flat_leaves_to_topology(&module_leaves),
        }
    }

    #[test_case(false, 1, 1 ; "no guard, one device")]
    #[test_case(true, 1, 2 ; "guard, one device, two modules")]
    #[test_case(false, 0, 0 ; "no devices, no modules")]
    #[test_case(true, 5, 2 ; "guard, five devices")]
    fn test_round_trip(guard: bool, devices: u8, modules: usize) {
        let parts = sample(guard, devices, modules);
        let config = parts.to_config(7);
        assert_eq!(config.checkpoint, 7);
        assert_eq!(config.threshold, if guard { 2 } else { 1 });
        assert_eq!(WalletTopology::from_config(&config).unwrap(), parts);
    }

    #[test]
    fn test_rejects_unknown_threshold() {
        let mut config = sample(false, 1, 1).to_config(0);
        config.threshold = 3;
        let err = WalletTopology::from_config(&config).unwrap_err();
        assert!(matches!(err, SignerKitError::UnknownConfigFormat(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rejects_threshold_shape_mismatch() {
        // A guarded tree presented with threshold 1 has a node where login should be a leaf.
        let mut config = sample(true, 1, 1).to_config(0);
        config.threshold = 1;
        assert!(matches!(
            WalletTopology::from_config(&config),
            Err(SignerKitError::UnknownConfigFormat(_))
        ));
    }

    #[test]
    fn test_rejects_leaf_root() {
        let config = Configuration {
            checkpoint: 0,
            threshold: 1,
            topology: Topology::signer(addr(1), 1),
        };
        assert!(WalletTopology::from_config(&config).is_err());
    }

    #[test]
    fn test_upsert_module() {
        let mut parts = sample(false, 1, 0);
        assert_eq!(parts.module_image_hash(addr(0x77)), None);

        parts.upsert_module(addr(0x77), B256::repeat_byte(1));
        parts.upsert_module(addr(0x78), B256::repeat_byte(2));
        parts.upsert_module(addr(0x77), B256::repeat_byte(3));

        assert_eq!(parts.module_leaves().len(), 2);
        assert_eq!(parts.module_image_hash(addr(0x77)), Some(B256::repeat_byte(3)));

        let config = parts.to_config(1);
        assert_eq!(WalletTopology::from_config(&config).unwrap(), parts);
    }
}
