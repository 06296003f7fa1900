//! Signer kinds and their resolution.
//!
//! Every signer that joins a wallet signs a witness message naming its kind. Resolving the kind
//! of a configuration leaf is a witness lookup, except for the extension addresses which are
//! known up front.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use tracing::warn;

use crate::config::Extensions;
use crate::envelope::{Payload, SignerSignature};
use crate::error::SignerKitResult;
use crate::primitives::{Address, Bytes, ImageHash};
use crate::signer::Signer;
use crate::state::{StateProvider, Witness};

/// Action string of witness messages.
pub const WITNESS_ACTION: &str = "consent-to-be-part-of-wallet";

/// The kind of a signer, deciding which handler drives it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SignerKind {
    /// A key held by one of the user's devices.
    LocalDevice,
    /// A passkey login.
    LoginPasskey,
    /// A mnemonic login.
    LoginMnemonic,
    /// An identity key authenticated with an email one-time password.
    LoginEmailOtp,
    /// An identity key authenticated with Google (PKCE).
    LoginGooglePkce,
    /// An identity key authenticated with Apple.
    LoginApple,
    /// The recovery module.
    #[strum(serialize = "recovery-extension")]
    #[serde(rename = "recovery-extension")]
    Recovery,
    /// The guard co-signer.
    #[strum(serialize = "guard-extension")]
    #[serde(rename = "guard-extension")]
    Guard,
    /// A witness with a kind this version does not know.
    Unknown,
}

impl SignerKind {
    /// Parses a kind string, mapping anything unrecognised to [`SignerKind::Unknown`].
    #[must_use]
    pub fn parse_lenient(kind: &str) -> Self {
        Self::from_str(kind).unwrap_or_else(|_| {
            warn!("unknown signer kind {kind:?}, treating as unknown");
            Self::Unknown
        })
    }

    /// Whether the kind is a login signer.
    #[must_use]
    pub const fn is_login(self) -> bool {
        matches!(
            self,
            Self::LoginPasskey
                | Self::LoginMnemonic
                | Self::LoginEmailOtp
                | Self::LoginGooglePkce
                | Self::LoginApple
        )
    }
}

/// The message a signer signs when joining a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WitnessMessage {
    /// Always [`WITNESS_ACTION`].
    pub action: String,
    /// Wallet joined.
    pub wallet: Address,
    /// Kind string of the signer.
    pub signer_kind: String,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
}

impl WitnessMessage {
    /// A witness message for `kind` joining `wallet`.
    #[must_use]
    pub fn new(wallet: Address, kind: SignerKind, timestamp: u64) -> Self {
        Self {
            action: WITNESS_ACTION.to_string(),
            wallet,
            signer_kind: kind.to_string(),
            timestamp,
        }
    }

    /// The message payload that gets signed.
    ///
    /// # Errors
    ///
    /// Fails only if the message cannot be serialized.
    pub fn payload(&self) -> SignerKitResult<Payload> {
        Ok(Payload::Message {
            message: Bytes::from(serde_json::to_vec(self)?),
        })
    }

    /// Kind named by a witness, [`SignerKind::Unknown`] if the witness cannot be read.
    #[must_use]
    pub fn kind_of(witness: &Witness) -> SignerKind {
        let Payload::Message { message } = &witness.payload else {
            warn!(wallet = %witness.wallet, "witness payload is not a message");
            return SignerKind::Unknown;
        };
        match serde_json::from_slice::<Self>(message) {
            Ok(parsed) => SignerKind::parse_lenient(&parsed.signer_kind),
            Err(err) => {
                warn!(wallet = %witness.wallet, "unparsable witness message: {err}");
                SignerKind::Unknown
            }
        }
    }
}

/// Signs the witness of `signer` joining `wallet` as `kind`.
///
/// The witness is chain-agnostic (chain id zero).
pub(crate) async fn sign_witness(
    signer: &dyn Signer,
    wallet: Address,
    kind: SignerKind,
    timestamp: u64,
) -> SignerKitResult<(Payload, SignerSignature)> {
    let payload = WitnessMessage::new(wallet, kind, timestamp).payload()?;
    let signature = signer.sign_digest(payload.hash(wallet, 0)).await?;
    Ok((
        payload,
        SignerSignature::Ecdsa {
            address: signer.address(),
            signature,
        },
    ))
}

/// Resolves the [`SignerKind`] of configuration leaves.
#[derive(Debug, Clone)]
pub struct SignerResolver {
    state: Arc<dyn StateProvider>,
    extensions: Extensions,
    guard: Option<Address>,
}

impl SignerResolver {
    /// Creates a resolver reading witnesses from `state`.
    #[must_use]
    pub fn new(state: Arc<dyn StateProvider>, extensions: Extensions, guard: Option<Address>) -> Self {
        Self {
            state,
            extensions,
            guard,
        }
    }

    /// Kind of the leaf `(address, image_hash)` of `wallet`, or `None` if the signer never
    /// witnessed joining the wallet.
    ///
    /// # Errors
    ///
    /// Returns an error if the state provider fails.
    pub async fn kind_of(
        &self,
        wallet: Address,
        address: Address,
        image_hash: Option<ImageHash>,
    ) -> SignerKitResult<Option<SignerKind>> {
        if image_hash.is_some() && address == self.extensions.recovery {
            return Ok(Some(SignerKind::Recovery));
        }
        if image_hash.is_none() && Some(address) == self.guard {
            return Ok(Some(SignerKind::Guard));
        }

        let witness = match image_hash {
            Some(image_hash) => {
                self.state
                    .get_witness_for_sapient(wallet, address, image_hash)
                    .await?
            }
            None => self.state.get_witness_for(wallet, address).await?,
        };
        Ok(witness.as_ref().map(WitnessMessage::kind_of))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::state::MemoryStateProvider;
    use crate::test_support::FakeSigner;

    #[test_case("local-device", SignerKind::LocalDevice)]
    #[test_case("login-email-otp", SignerKind::LoginEmailOtp)]
    #[test_case("recovery-extension", SignerKind::Recovery)]
    #[test_case("guard-extension", SignerKind::Guard)]
    #[test_case("login-fax", SignerKind::Unknown)]
    fn test_parse_lenient(input: &str, expected: SignerKind) {
        assert_eq!(SignerKind::parse_lenient(input), expected);
    }

    #[test]
    fn test_kind_string_forms_agree() {
        for kind in [SignerKind::LoginGooglePkce, SignerKind::Recovery] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[tokio::test]
    async fn test_resolver() {
        let state = Arc::new(MemoryStateProvider::new());
        let extensions = Extensions::default();
        let guard = Address::repeat_byte(0x99);
        let resolver = SignerResolver::new(state.clone(), extensions, Some(guard));
        let wallet = Address::repeat_byte(0xaa);
        let device = FakeSigner::from_phrase("device");

        assert_eq!(
            resolver
                .kind_of(wallet, extensions.recovery, Some(ImageHash::ZERO))
                .await
                .unwrap(),
            Some(SignerKind::Recovery)
        );
        assert_eq!(
            resolver.kind_of(wallet, guard, None).await.unwrap(),
            Some(SignerKind::Guard)
        );
        assert_eq!(
            resolver.kind_of(wallet, device.address(), None).await.unwrap(),
            None
        );

        let (payload, signature) = sign_witness(&device, wallet, SignerKind::LocalDevice, 1)
            .await
            .unwrap();
        state
            .save_witnesses(wallet, 0, payload, vec![signature])
            .await
            .unwrap();
        assert_eq!(
            resolver.kind_of(wallet, device.address(), None).await.unwrap(),
            Some(SignerKind::LocalDevice)
        );
    }

    #[tokio::test]
    async fn test_garbage_witness_is_unknown() {
        let state = Arc::new(MemoryStateProvider::new());
        let resolver = SignerResolver::new(state.clone(), Extensions::default(), None);
        let wallet = Address::repeat_byte(0xaa);
        let signer = Address::repeat_byte(1);
        state
            .save_witnesses(
                wallet,
                0,
                Payload::Message {
                    message: Bytes::from_static(b"not json"),
                },
                vec![SignerSignature::Ecdsa {
                    address: signer,
                    signature: Bytes::new(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(
            resolver.kind_of(wallet, signer, None).await.unwrap(),
            Some(SignerKind::Unknown)
        );
    }
}
