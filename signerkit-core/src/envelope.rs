//! Payloads, signatures and the envelopes that carry them.
//!
//! An [`Envelope`] is a payload, the configuration it is evaluated against, and the signatures
//! collected so far. The signed weight of an envelope is derived from the configuration tree.

use alloy_core::sol_types::{sol_data, SolType, SolValue};
use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};

use crate::primitives::{Address, Bytes, ImageHash, Weight, B256, U256};
use crate::topology::{Configuration, Topology};

/// What happens when a call of a batch reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BehaviorOnError {
    /// Continue with the next call.
    Ignore,
    /// Revert the whole batch.
    #[default]
    Revert,
    /// Stop executing, keeping the effects of previous calls.
    Abort,
}

/// Solidity type of [`Call::abi_tuple`].
type CallSol = (
    sol_data::Address,
    sol_data::Uint<256>,
    sol_data::Bytes,
    sol_data::Uint<256>,
    sol_data::Bool,
    sol_data::Bool,
    sol_data::Uint<8>,
);

impl BehaviorOnError {
    const fn code(self) -> u8 {
        match self {
            Self::Ignore => 0,
            Self::Revert => 1,
            Self::Abort => 2,
        }
    }
}

/// A call executed by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    /// Target.
    pub to: Address,
    /// Native value sent with the call.
    pub value: U256,
    /// Calldata.
    pub data: Bytes,
    /// Gas limit; zero means "all remaining gas".
    pub gas_limit: U256,
    /// Whether the call is a delegate call.
    pub delegate_call: bool,
    /// Only execute if the previous call failed.
    pub only_fallback: bool,
    /// Failure handling.
    pub behavior_on_error: BehaviorOnError,
}

impl Call {
    /// A plain call reverting the batch on failure.
    #[must_use]
    pub fn new(to: Address, value: U256, data: Bytes) -> Self {
        Self {
            to,
            value,
            data,
            gas_limit: U256::ZERO,
            delegate_call: false,
            only_fallback: false,
            behavior_on_error: BehaviorOnError::Revert,
        }
    }

    fn abi_tuple(&self) -> (Address, U256, Bytes, U256, bool, bool, u8) {
        (
            self.to,
            self.value,
            self.data.clone(),
            self.gas_limit,
            self.delegate_call,
            self.only_fallback,
            self.behavior_on_error.code(),
        )
    }
}

/// What a wallet is asked to authorize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Payload {
    /// A batch of calls.
    Calls {
        /// Nonce space.
        space: U256,
        /// Nonce within the space.
        nonce: U256,
        /// The calls, executed in order.
        calls: Vec<Call>,
    },
    /// An arbitrary message.
    Message {
        /// Message bytes.
        message: Bytes,
    },
    /// A switch to the configuration committed by `image_hash`.
    ConfigUpdate {
        /// Image hash of the new configuration.
        #[serde(rename = "imageHash")]
        image_hash: ImageHash,
    },
    /// A raw digest.
    Digest {
        /// The digest.
        digest: B256,
    },
}

impl Payload {
    /// Whether the payload updates the wallet configuration.
    #[must_use]
    pub const fn is_config_update(&self) -> bool {
        matches!(self, Self::ConfigUpdate { .. })
    }

    /// ABI encoding of the payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let encoded = match self {
            Self::Calls {
                space,
                nonce,
                calls,
            } => {
                let calls: Vec<_> = calls.iter().map(Call::abi_tuple).collect();
                <(
                    sol_data::Uint<8>,
                    sol_data::Uint<256>,
                    sol_data::Uint<256>,
                    sol_data::Array<CallSol>,
                )>::abi_encode(&(0u8, *space, *nonce, calls))
            }
            Self::Message { message } => {
                <(sol_data::Uint<8>, sol_data::Bytes)>::abi_encode(&(1u8, message.clone()))
            }
            Self::ConfigUpdate { image_hash } => {
                <(sol_data::Uint<8>, sol_data::FixedBytes<32>)>::abi_encode(&(2u8, *image_hash))
            }
            Self::Digest { digest } => {
                <(sol_data::Uint<8>, sol_data::FixedBytes<32>)>::abi_encode(&(3u8, *digest))
            }
        };
        Bytes::from(encoded)
    }

    /// Digest signed by the wallet signers, bound to the wallet and chain.
    ///
    /// `chain_id` zero means the signature is valid on every chain.
    #[must_use]
    pub fn hash(&self, wallet: Address, chain_id: u64) -> B256 {
        keccak256((wallet, U256::from(chain_id), self.encode()).abi_encode())
    }
}

/// A signature contributed by one leaf of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignerSignature {
    /// ECDSA signature of a plain signer.
    Ecdsa {
        /// Signer address.
        address: Address,
        /// Signature bytes.
        signature: Bytes,
    },
    /// Signature of a sapient signer.
    Sapient {
        /// Validating contract.
        address: Address,
        /// Tree the signature is validated against.
        #[serde(rename = "imageHash")]
        image_hash: ImageHash,
        /// Signature bytes.
        signature: Bytes,
    },
}

impl SignerSignature {
    /// Address of the signing leaf.
    #[must_use]
    pub const fn address(&self) -> Address {
        match self {
            Self::Ecdsa { address, .. } | Self::Sapient { address, .. } => *address,
        }
    }

    /// Image hash of the signing leaf, for sapient signatures.
    #[must_use]
    pub const fn image_hash(&self) -> Option<ImageHash> {
        match self {
            Self::Ecdsa { .. } => None,
            Self::Sapient { image_hash, .. } => Some(*image_hash),
        }
    }

    /// Raw signature bytes.
    #[must_use]
    pub const fn signature(&self) -> &Bytes {
        match self {
            Self::Ecdsa { signature, .. } | Self::Sapient { signature, .. } => signature,
        }
    }

    /// Whether this signature was produced by the given leaf.
    #[must_use]
    pub fn matches(&self, address: Address, image_hash: Option<ImageHash>) -> bool {
        self.address() == address && self.image_hash() == image_hash
    }
}

/// A payload, the configuration it is evaluated against, and the collected signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Wallet the payload belongs to.
    pub wallet: Address,
    /// Chain the payload targets; zero for any chain.
    pub chain_id: u64,
    /// The payload.
    pub payload: Payload,
    /// Configuration snapshot used to compute the signed weight.
    pub configuration: Configuration,
    /// Signatures collected so far.
    pub signatures: Vec<SignerSignature>,
}

impl Envelope {
    /// An unsigned envelope.
    #[must_use]
    pub const fn new(
        wallet: Address,
        chain_id: u64,
        payload: Payload,
        configuration: Configuration,
    ) -> Self {
        Self {
            wallet,
            chain_id,
            payload,
            configuration,
            signatures: Vec::new(),
        }
    }

    /// Digest the signers sign.
    #[must_use]
    pub fn digest(&self) -> B256 {
        self.payload.hash(self.wallet, self.chain_id)
    }

    /// Weight reached by the collected signatures.
    #[must_use]
    pub fn weight(&self) -> Weight {
        signed_weight(&self.configuration.topology, &self.signatures)
    }

    /// Weight required by the configuration.
    #[must_use]
    pub const fn threshold(&self) -> Weight {
        self.configuration.threshold
    }

    /// Whether the collected signatures reach the threshold.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.weight() >= self.threshold()
    }

    /// Whether the leaf already signed.
    #[must_use]
    pub fn has_signature(&self, address: Address, image_hash: Option<ImageHash>) -> bool {
        self.signatures
            .iter()
            .any(|signature| signature.matches(address, image_hash))
    }

    /// ABI encoding of the collected signatures together with the configuration they satisfy.
    #[must_use]
    pub fn encode_signature(&self) -> Bytes {
        let parts: Vec<_> = self
            .signatures
            .iter()
            .map(|signature| {
                (
                    signature.address(),
                    signature.image_hash().unwrap_or_default(),
                    signature.signature().clone(),
                )
            })
            .collect();
        Bytes::from(
            (
                U256::from(self.configuration.checkpoint),
                U256::from(self.configuration.threshold),
                self.configuration.topology.hash(),
                parts,
            )
                .abi_encode(),
        )
    }

    /// Signature preceded by the configuration updates (image hash, signature) the chain has
    /// not seen yet, oldest first.
    #[must_use]
    pub fn encode_chained_signature(&self, updates: &[(ImageHash, Bytes)]) -> Bytes {
        if updates.is_empty() {
            return self.encode_signature();
        }
        Bytes::from((updates.to_vec(), self.encode_signature()).abi_encode_params())
    }
}

/// Calldata of `signature` (for example `transfer(address,uint256)`) followed by the
/// ABI-encoded `params`.
pub(crate) fn function_call(signature: &str, params: &[u8]) -> Bytes {
    let mut data = keccak256(signature.as_bytes())[..4].to_vec();
    data.extend_from_slice(params);
    Bytes::from(data)
}

fn signed_weight(topology: &Topology, signatures: &[SignerSignature]) -> Weight {
    match topology {
        Topology::Signer { address, weight } => {
            if signatures.iter().any(|s| s.matches(*address, None)) {
                *weight
            } else {
                0
            }
        }
        Topology::SapientSigner {
            address,
            image_hash,
            weight,
        } => {
            if signatures.iter().any(|s| s.matches(*address, Some(*image_hash))) {
                *weight
            } else {
                0
            }
        }
        Topology::Nested {
            tree,
            weight,
            threshold,
        } => {
            if signed_weight(tree, signatures) >= *threshold {
                *weight
            } else {
                0
            }
        }
        Topology::Node { left, right } => {
            signed_weight(left, signatures).saturating_add(signed_weight(right, signatures))
        }
        Topology::NodeHash { .. } => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{build_capped_tree, CappedMember};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn ecdsa(byte: u8) -> SignerSignature {
        SignerSignature::Ecdsa {
            address: addr(byte),
            signature: Bytes::from(vec![byte; 65]),
        }
    }

    fn envelope(configuration: Configuration) -> Envelope {
        Envelope::new(
            addr(0xaa),
            1,
            Payload::Message {
                message: Bytes::from_static(b"hello"),
            },
            configuration,
        )
    }

    #[test]
    fn test_weight_is_monotonic() {
        let config = Configuration {
            checkpoint: 0,
            threshold: 2,
            topology: Topology::node(
                Topology::node(Topology::signer(addr(1), 1), Topology::signer(addr(2), 1)),
                Topology::signer(addr(3), 1),
            ),
        };
        let mut envelope = envelope(config);
        let mut last = envelope.weight();
        assert_eq!(last, 0);
        for byte in [1, 3, 2, 9] {
            envelope.signatures.push(ecdsa(byte));
            let weight = envelope.weight();
            assert!(weight >= last);
            last = weight;
        }
        assert_eq!(last, 3);
        assert!(envelope.is_signed());
    }

    #[test]
    fn test_nested_contributes_only_when_sub_threshold_met() {
        let nested = build_capped_tree(&[CappedMember::signer(addr(1)), CappedMember::signer(addr(2))]);
        let config = Configuration {
            checkpoint: 0,
            threshold: 1,
            topology: Topology::node(nested, Topology::empty()),
        };
        let mut envelope = envelope(config);
        assert!(!envelope.is_signed());
        envelope.signatures.push(ecdsa(2));
        assert_eq!(envelope.weight(), 1);
        envelope.signatures.push(ecdsa(1));
        // The capped tree never contributes more than its own weight.
        assert_eq!(envelope.weight(), 1);
    }

    #[test]
    fn test_sapient_signature_requires_matching_image_hash() {
        let config = Configuration {
            checkpoint: 0,
            threshold: 1,
            topology: Topology::sapient(addr(5), B256::repeat_byte(1), 1),
        };
        let mut envelope = envelope(config);
        envelope.signatures.push(SignerSignature::Sapient {
            address: addr(5),
            image_hash: B256::repeat_byte(2),
            signature: Bytes::new(),
        });
        assert_eq!(envelope.weight(), 0);
        envelope.signatures.push(SignerSignature::Sapient {
            address: addr(5),
            image_hash: B256::repeat_byte(1),
            signature: Bytes::new(),
        });
        assert_eq!(envelope.weight(), 1);
        assert!(envelope.has_signature(addr(5), Some(B256::repeat_byte(1))));
    }

    #[test]
    fn test_function_call_selector() {
        let data = function_call(
            "transfer(address,uint256)",
            &(addr(1), U256::from(5u64)).abi_encode_params(),
        );
        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(data.len(), 4 + 64);
    }

    #[test]
    fn test_payload_hash_is_bound_to_wallet_and_chain() {
        let payload = Payload::Calls {
            space: U256::ZERO,
            nonce: U256::from(3u64),
            calls: vec![Call::new(addr(1), U256::from(10u64), Bytes::new())],
        };
        assert_ne!(payload.hash(addr(1), 1), payload.hash(addr(2), 1));
        assert_ne!(payload.hash(addr(1), 1), payload.hash(addr(1), 10));
        assert_eq!(payload.hash(addr(1), 1), payload.clone().hash(addr(1), 1));
    }
}
