//! The session manager tree.
//!
//! The session manager is a sapient signer whose image hash commits to the sessions a wallet
//! has granted: explicit sessions with their permissions, and a blacklist of contracts that may
//! not receive implicit sessions.

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};

use crate::error::SignerKitResult;
use crate::primitives::{Address, ImageHash, U256};

/// A contract an explicit session may call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Target contract.
    pub target: Address,
}

/// A session key with explicit, bounded permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplicitSession {
    /// Session key.
    pub signer: Address,
    /// Chain the session is valid on; zero for any chain.
    pub chain_id: u64,
    /// Maximum native value the session may move.
    pub value_limit: U256,
    /// Expiry, in seconds since the UNIX epoch.
    pub deadline: u64,
    /// Contracts the session may call.
    pub permissions: Vec<Permission>,
}

/// Sessions granted by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsTopology {
    /// Signer allowed to attest implicit sessions.
    pub identity_signer: Address,
    /// Explicit sessions, sorted by signer.
    pub explicit: Vec<ExplicitSession>,
    /// Contracts that may not be called by implicit sessions, sorted.
    pub implicit_blacklist: Vec<Address>,
}

impl SessionsTopology {
    /// An empty session tree for `identity_signer`.
    #[must_use]
    pub const fn new(identity_signer: Address) -> Self {
        Self {
            identity_signer,
            explicit: Vec::new(),
            implicit_blacklist: Vec::new(),
        }
    }

    /// Image hash of the tree.
    ///
    /// # Errors
    ///
    /// Fails only if the tree cannot be serialized.
    pub fn image_hash(&self) -> SignerKitResult<ImageHash> {
        Ok(keccak256(serde_json::to_vec(self)?))
    }

    /// Adds or replaces the explicit session of `session.signer`.
    pub fn add_explicit(&mut self, session: ExplicitSession) {
        self.explicit.retain(|existing| existing.signer != session.signer);
        self.explicit.push(session);
        self.explicit.sort_by_key(|session| session.signer);
    }

    /// Removes the explicit session of `signer`. Returns whether one was removed.
    pub fn remove_explicit(&mut self, signer: Address) -> bool {
        let before = self.explicit.len();
        self.explicit.retain(|session| session.signer != signer);
        before != self.explicit.len()
    }

    /// Adds `address` to the implicit-session blacklist.
    pub fn add_blacklist(&mut self, address: Address) {
        if let Err(position) = self.implicit_blacklist.binary_search(&address) {
            self.implicit_blacklist.insert(position, address);
        }
    }

    /// Removes `address` from the implicit-session blacklist. Returns whether it was present.
    pub fn remove_blacklist(&mut self, address: Address) -> bool {
        match self.implicit_blacklist.binary_search(&address) {
            Ok(position) => {
                self.implicit_blacklist.remove(position);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(byte: u8) -> ExplicitSession {
        ExplicitSession {
            signer: Address::repeat_byte(byte),
            chain_id: 1,
            value_limit: U256::from(1_000u64),
            deadline: 2_000_000_000,
            permissions: vec![Permission {
                target: Address::repeat_byte(0xee),
            }],
        }
    }

    #[test]
    fn test_explicit_sessions_are_keyed_by_signer() {
        let mut sessions = SessionsTopology::new(Address::repeat_byte(1));
        sessions.add_explicit(session(3));
        sessions.add_explicit(session(2));
        let mut replacement = session(3);
        replacement.deadline = 5;
        sessions.add_explicit(replacement.clone());

        assert_eq!(sessions.explicit.len(), 2);
        assert_eq!(sessions.explicit[1], replacement);
        assert!(sessions.remove_explicit(Address::repeat_byte(2)));
        assert!(!sessions.remove_explicit(Address::repeat_byte(2)));
    }

    #[test]
    fn test_blacklist_changes_image_hash() {
        let mut sessions = SessionsTopology::new(Address::repeat_byte(1));
        let before = sessions.image_hash().unwrap();
        sessions.add_blacklist(Address::repeat_byte(9));
        sessions.add_blacklist(Address::repeat_byte(9));
        assert_eq!(sessions.implicit_blacklist.len(), 1);
        assert_ne!(before, sessions.image_hash().unwrap());
        assert!(sessions.remove_blacklist(Address::repeat_byte(9)));
        assert_eq!(before, sessions.image_hash().unwrap());
    }
}
