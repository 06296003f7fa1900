//! Session manager tree edits and implicit-session authorization.

use std::sync::Arc;

use alloy_core::sol_types::SolValue;
use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::envelope::{Envelope, Payload, SignerSignature};
use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::{Address, Bytes, B256};
use crate::signatures::Action;
use crate::state::{StateProvider, StoredTree};
use crate::store::RecordStore;
use crate::topology::sessions::{ExplicitSession, SessionsTopology};
use crate::topology::{Configuration, Topology, WalletTopology};
use crate::wallets::ConfigurationUpdates;

/// Statement by the identity signer that `approved_signer` may act as an implicit session for
/// an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// Session key being approved.
    pub approved_signer: Address,
    /// Application the session is for, usually its origin.
    pub audience: String,
    /// Opaque data forwarded to the target contracts.
    pub application_data: Bytes,
    /// Where the host returns after authorizing.
    pub redirect_url: String,
}

impl Attestation {
    /// Digest signed by the identity signer.
    #[must_use]
    pub fn digest(&self) -> B256 {
        keccak256(
            (
                self.approved_signer,
                keccak256(self.audience.as_bytes()),
                self.application_data.clone(),
                keccak256(self.redirect_url.as_bytes()),
            )
                .abi_encode_params(),
        )
    }
}

/// Manages the session manager tree of wallets.
#[derive(Clone)]
pub struct Sessions {
    updates: ConfigurationUpdates,
    state: Arc<dyn StateProvider>,
    authorizations: Arc<dyn RecordStore<String, Attestation>>,
    module: Address,
}

impl std::fmt::Debug for Sessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sessions")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl Sessions {
    /// Creates the controller for the session manager `module`.
    #[must_use]
    pub fn new(
        updates: ConfigurationUpdates,
        state: Arc<dyn StateProvider>,
        authorizations: Arc<dyn RecordStore<String, Attestation>>,
        module: Address,
    ) -> Self {
        Self {
            updates,
            state,
            authorizations,
            module,
        }
    }

    /// Current session tree of `wallet`.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InvalidInput`] if the wallet has no session manager leaf, or the
    /// failure of a collaborator.
    pub async fn sessions_topology(&self, wallet: Address) -> SignerKitResult<SessionsTopology> {
        let (_, parts) = self.updates.latest(wallet).await?;
        self.load(wallet, &parts).await
    }

    async fn load(
        &self,
        wallet: Address,
        parts: &WalletTopology,
    ) -> SignerKitResult<SessionsTopology> {
        let image_hash =
            parts
                .module_image_hash(self.module)
                .ok_or_else(|| SignerKitError::InvalidInput {
                    attribute: "wallet".to_string(),
                    reason: format!("{wallet} has no session manager"),
                })?;
        match self.state.get_tree(image_hash).await? {
            Some(StoredTree::Sessions { sessions }) => Ok(sessions),
            _ => Err(SignerKitError::ImpossibleState(format!(
                "sessions tree {image_hash} is unknown"
            ))),
        }
    }

    /// Saves the edited tree and opens the `session-update` request pointing the wallet at it.
    async fn edit(
        &self,
        wallet: Address,
        edit: impl FnOnce(&mut SessionsTopology) -> SignerKitResult<()> + Send,
    ) -> SignerKitResult<String> {
        let (_, mut parts) = self.updates.latest(wallet).await?;
        let mut sessions = self.load(wallet, &parts).await?;
        edit(&mut sessions)?;

        let tree = StoredTree::Sessions { sessions };
        let image_hash = tree.image_hash()?;
        self.state.save_tree(tree).await?;
        parts.upsert_module(self.module, image_hash);
        debug!(%wallet, %image_hash, "sessions tree edited");
        self.updates
            .request(wallet, &parts, Action::SessionUpdate, None)
            .await
    }

    /// Grants an explicit session, replacing any session of the same key. Returns the id of
    /// the `session-update` request.
    ///
    /// # Errors
    ///
    /// Fails if the wallet has no session manager or a collaborator fails.
    pub async fn add_explicit_session(
        &self,
        wallet: Address,
        session: ExplicitSession,
    ) -> SignerKitResult<String> {
        self.edit(wallet, move |sessions| {
            sessions.add_explicit(session);
            Ok(())
        })
        .await
    }

    /// Revokes the explicit session of `signer`.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InvalidInput`] if `signer` holds no explicit session.
    pub async fn remove_explicit_session(
        &self,
        wallet: Address,
        signer: Address,
    ) -> SignerKitResult<String> {
        self.edit(wallet, move |sessions| {
            if sessions.remove_explicit(signer) {
                Ok(())
            } else {
                Err(SignerKitError::InvalidInput {
                    attribute: "signer".to_string(),
                    reason: format!("{signer} has no explicit session"),
                })
            }
        })
        .await
    }

    /// Forbids implicit sessions from calling `address`.
    ///
    /// # Errors
    ///
    /// Fails if the wallet has no session manager or a collaborator fails.
    pub async fn add_blacklist_address(
        &self,
        wallet: Address,
        address: Address,
    ) -> SignerKitResult<String> {
        self.edit(wallet, move |sessions| {
            sessions.add_blacklist(address);
            Ok(())
        })
        .await
    }

    /// Allows implicit sessions to call `address` again.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InvalidInput`] if `address` is not blacklisted.
    pub async fn remove_blacklist_address(
        &self,
        wallet: Address,
        address: Address,
    ) -> SignerKitResult<String> {
        self.edit(wallet, move |sessions| {
            if sessions.remove_blacklist(address) {
                Ok(())
            } else {
                Err(SignerKitError::InvalidInput {
                    attribute: "address".to_string(),
                    reason: format!("{address} is not blacklisted"),
                })
            }
        })
        .await
    }

    /// Applies a signed `session-update` request.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InvalidInput`] for other requests, or the failure of the update.
    pub async fn complete_update(&self, id: &str) -> SignerKitResult<()> {
        let request = self.updates.requests().get_base(id).await?;
        if request.action != Action::SessionUpdate {
            return Err(SignerKitError::InvalidInput {
                attribute: "signature_request".to_string(),
                reason: format!("{id} is a {} request", request.action),
            });
        }
        self.updates.complete(id).await.map(|_| ())
    }

    /// Opens a `session-implicit-authorize` request in which the identity signer of the
    /// wallet's session tree signs `attestation`. Returns the request id.
    ///
    /// # Errors
    ///
    /// Fails if the wallet has no session manager or a collaborator fails.
    pub async fn prepare_authorize_implicit_session(
        &self,
        wallet: Address,
        attestation: Attestation,
    ) -> SignerKitResult<String> {
        let sessions = self.sessions_topology(wallet).await?;
        let envelope = Envelope::new(
            wallet,
            0,
            Payload::Digest {
                digest: attestation.digest(),
            },
            Configuration {
                checkpoint: 0,
                threshold: 1,
                topology: Topology::signer(sessions.identity_signer, 1),
            },
        );
        let origin = attestation.audience.clone();
        let id = self
            .updates
            .requests()
            .request(envelope, Action::SessionImplicitAuthorize, Some(origin))
            .await?;
        self.authorizations.set(id.clone(), attestation).await?;
        info!(%id, %wallet, "implicit session authorization requested");
        Ok(id)
    }

    /// Completes a signed `session-implicit-authorize` request. Returns the attestation and
    /// the identity signer's signature over it.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not a pending authorization or the identity signer has not signed.
    pub async fn complete_authorize_implicit_session(
        &self,
        id: &str,
    ) -> SignerKitResult<(Attestation, Bytes)> {
        let request = self
            .updates
            .requests()
            .get_pending(id, Action::SessionImplicitAuthorize)
            .await?;
        let attestation = self
            .authorizations
            .get(&id.to_string())
            .await?
            .ok_or_else(|| {
                SignerKitError::ImpossibleState(format!("attestation of {id} is unknown"))
            })?;
        let Some(signature) = request.envelope.signatures.iter().find_map(|signature| {
            match signature {
                SignerSignature::Ecdsa { signature, .. } => Some(signature.clone()),
                SignerSignature::Sapient { .. } => None,
            }
        }) else {
            let (weight, threshold) = (request.envelope.weight(), request.envelope.threshold());
            return Err(SignerKitError::InsufficientWeight { weight, threshold });
        };

        self.updates.requests().complete(id).await?;
        self.authorizations.del(&id.to_string()).await?;
        info!(%id, wallet = %request.wallet, signer = %attestation.approved_signer, "implicit session authorized");
        Ok((attestation, signature))
    }
}
