use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use reqwest::Url;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::identity::{Answer, Challenge, IdentityInstrument, IdentityKeys, IdentitySigner};
use super::{ecdsa_handle, ActionMessage, Handler, SignerHandle, SignerStatus, UnavailableReason};
use crate::config::OAuthProvider;
use crate::error::{SignerKitError, SignerKitResult};
use crate::kinds::SignerKind;
use crate::primitives::{Address, ImageHash};
use crate::signatures::{BaseSignatureRequest, SignatureRequests};
use crate::signer::{Signer, SignerFactory};

/// What the provider redirected back with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthRedirect {
    /// Authorization code.
    pub code: String,
    /// The `state` parameter echoed by the provider.
    pub state: String,
}

/// Host navigation to the provider and back.
#[async_trait]
pub trait OAuthRedirectUi: Send + Sync + std::fmt::Debug {
    /// Sends the user to `url` and waits for the redirect. `None` means the user gave up.
    async fn redirect(&self, url: Url) -> SignerKitResult<Option<OAuthRedirect>>;
}

/// PKCE verifier and its S256 challenge.
struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    fn generate() -> Self {
        let verifier = URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>());
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

#[derive(Debug, Clone)]
struct OAuthFlow {
    provider: OAuthProvider,
    instrument: Arc<dyn IdentityInstrument>,
    factory: Arc<dyn SignerFactory>,
    keys: Arc<IdentityKeys>,
    ui: Arc<dyn OAuthRedirectUi>,
}

impl OAuthFlow {
    async fn run(self) -> SignerKitResult<Option<Arc<dyn Signer>>> {
        let auth_key = self.factory.random();
        let pkce = Pkce::generate();
        let commit = self
            .instrument
            .commit_verifier(
                auth_key.address(),
                &Challenge::AuthCodePkce {
                    issuer: self.provider.issuer.clone(),
                    audience: self.provider.client_id.clone(),
                    redirect_uri: self.provider.redirect_uri.clone(),
                    code_challenge: pkce.challenge.clone(),
                },
            )
            .await?;

        let state = hex::encode(rand::random::<[u8; 16]>());
        let url = Url::parse_with_params(
            &self.provider.authorize_url,
            &[
                ("client_id", self.provider.client_id.as_str()),
                ("redirect_uri", self.provider.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid email"),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("nonce", commit.challenge.as_str()),
                ("state", state.as_str()),
            ],
        )
        .map_err(|err| SignerKitError::InvalidInput {
            attribute: "authorize_url".to_string(),
            reason: err.to_string(),
        })?;

        let Some(redirect) = self.ui.redirect(url).await? else {
            debug!(issuer = %self.provider.issuer, "oauth redirect abandoned");
            return Ok(None);
        };
        if redirect.state != state {
            warn!(issuer = %self.provider.issuer, "oauth state mismatch");
            return Err(SignerKitError::InvalidOAuthState);
        }

        let result = self
            .instrument
            .complete_auth(
                auth_key.address(),
                &commit.verifier,
                &Answer::AuthCode {
                    code: redirect.code,
                    code_verifier: pkce.verifier,
                },
            )
            .await?;
        info!(signer = %result.signer, issuer = %self.provider.issuer, "oauth identity authenticated");
        let signer: Arc<dyn Signer> =
            Arc::new(IdentitySigner::new(self.instrument, auth_key, result.signer));
        self.keys.insert(signer.clone());
        Ok(Some(signer))
    }
}

/// Signs with identity keys authenticated through an OAuth provider.
#[derive(Debug)]
pub struct OAuthHandler {
    kind: SignerKind,
    provider: OAuthProvider,
    instrument: Arc<dyn IdentityInstrument>,
    factory: Arc<dyn SignerFactory>,
    keys: Arc<IdentityKeys>,
    requests: Arc<SignatureRequests>,
    ui: RwLock<Option<Arc<dyn OAuthRedirectUi>>>,
}

impl OAuthHandler {
    /// Creates the handler of `kind` (Google PKCE or Apple) for `provider`.
    #[must_use]
    pub fn new(
        kind: SignerKind,
        provider: OAuthProvider,
        instrument: Arc<dyn IdentityInstrument>,
        factory: Arc<dyn SignerFactory>,
        keys: Arc<IdentityKeys>,
        requests: Arc<SignatureRequests>,
    ) -> Self {
        Self {
            kind,
            provider,
            instrument,
            factory,
            keys,
            requests,
            ui: RwLock::new(None),
        }
    }

    /// Registers the redirect UI.
    pub fn register_ui(&self, ui: Arc<dyn OAuthRedirectUi>) {
        if let Ok(mut slot) = self.ui.write() {
            *slot = Some(ui);
        }
    }

    fn flow(&self) -> Option<OAuthFlow> {
        let ui = self.ui.read().ok()?.clone()?;
        Some(OAuthFlow {
            provider: self.provider.clone(),
            instrument: self.instrument.clone(),
            factory: self.factory.clone(),
            keys: self.keys.clone(),
            ui,
        })
    }

    /// Runs the OAuth flow. `None` means the user gave up.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::UiNotRegistered`] without a redirect UI,
    /// [`SignerKitError::InvalidOAuthState`] on a forged redirect, identity errors otherwise.
    pub async fn authenticate(&self) -> SignerKitResult<Option<Arc<dyn Signer>>> {
        self.flow()
            .ok_or(SignerKitError::UiNotRegistered("oauth"))?
            .run()
            .await
    }
}

#[async_trait]
impl Handler for OAuthHandler {
    fn kind(&self) -> SignerKind {
        self.kind
    }

    async fn status(
        &self,
        address: Address,
        _image_hash: Option<ImageHash>,
        request: &BaseSignatureRequest,
    ) -> SignerKitResult<SignerStatus> {
        let digest = request.envelope.digest();
        if let Some(signer) = self.keys.get(address) {
            return Ok(SignerStatus::Ready {
                handle: ecdsa_handle(self.requests.clone(), request.id.clone(), digest, signer),
            });
        }
        let Some(flow) = self.flow() else {
            return Ok(SignerStatus::unavailable(UnavailableReason::UiNotRegistered));
        };
        let requests = self.requests.clone();
        let id = request.id.clone();
        Ok(SignerStatus::Actionable {
            message: ActionMessage::CompleteOauthRedirect,
            handle: SignerHandle::new(move || {
                let flow = flow.clone();
                let requests = requests.clone();
                let id = id.clone();
                async move {
                    let Some(signer) = flow.run().await? else {
                        return Ok(false);
                    };
                    if signer.address() != address {
                        return Err(SignerKitError::Identity(format!(
                            "authenticated signer {} does not match {address}",
                            signer.address()
                        )));
                    }
                    ecdsa_handle(requests, id, digest, signer).handle().await
                }
            }),
        })
    }

    fn updates(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.keys.subscribe())
    }
}
