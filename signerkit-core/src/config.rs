//! Deployment configuration: contract addresses, extensions and host defaults.

use alloy_core::sol_types::SolValue;
use alloy_primitives::{address, hex, keccak256};
use serde::{Deserialize, Serialize};

use crate::envelope::{function_call, Call};
use crate::error::SignerKitResult;
use crate::primitives::{Address, Bytes, ImageHash, U256};
use crate::Environment;

/// Wallet factory.
pub static FACTORY: Address = address!("0x00000000000018A77519fcCCa060c2C9b5a4D90C");
/// Stage 1 implementation the wallet proxy delegates to until its first configuration update.
pub static STAGE1_MODULE: Address = address!("0x0000000000003DF093bc4257E6dCE45D937EF161");
/// Guest module, executes undeployed-wallet bundles.
pub static GUEST_MODULE: Address = address!("0x0000000000006aC72ed1d192fa28f0058D3F8806");
/// Recovery extension.
pub static RECOVERY_EXTENSION: Address = address!("0x0000000000000eF3c0a5BfC4fbc2Db4e8Fa6D76E");
/// Session manager extension.
pub static SESSIONS_EXTENSION: Address = address!("0x0000000000CC58810c33F3a0D78aA1Ed80FaDcD8");
/// Passkeys extension.
pub static PASSKEYS_EXTENSION: Address = address!("0x0000000000dc2d96870dc108c5E15570B715DFD2");
/// Production guard co-signer.
pub static GUARD: Address = address!("0x18002Fc09deF9A47437cc64e270843dE094f5984");
/// Staging guard co-signer.
pub static STAGING_GUARD: Address = address!("0x8B1f7F2A2a4e1dA4D4e7dF4ec8A8bCd7dA5f0C47");

/// Creation code of the wallet proxy.
pub const WALLET_CREATION_CODE: [u8; 44] = hex!(
    "603e600e3d39601e805130553df33d3d34601c57363d3d373d363d30545af43d82803e903d91601c57fd5bf3"
);

/// Contracts every wallet is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletContext {
    /// Wallet factory.
    pub factory: Address,
    /// Initial implementation.
    pub stage1: Address,
    /// Guest module for undeployed wallets.
    pub guest: Address,
    /// Proxy creation code.
    pub creation_code: Bytes,
}

impl WalletContext {
    /// CREATE2 address of the wallet whose initial configuration has `image_hash`.
    #[must_use]
    pub fn counterfactual_address(&self, image_hash: ImageHash) -> Address {
        let mut init_code = self.creation_code.to_vec();
        init_code.extend_from_slice(self.stage1.into_word().as_slice());
        self.factory.create2(image_hash.0, keccak256(init_code).0)
    }
}

impl WalletContext {
    /// Factory call deploying the wallet whose initial configuration has `image_hash`.
    #[must_use]
    pub fn deploy_call(&self, image_hash: ImageHash) -> Call {
        Call::new(
            self.factory,
            U256::ZERO,
            function_call(
                "deploy(address,bytes32)",
                &(self.stage1, image_hash).abi_encode_params(),
            ),
        )
    }
}

impl Default for WalletContext {
    fn default() -> Self {
        Self {
            factory: FACTORY,
            stage1: STAGE1_MODULE,
            guest: GUEST_MODULE,
            creation_code: Bytes::from_static(&WALLET_CREATION_CODE),
        }
    }
}

/// Addresses of the sapient-signer extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions {
    /// Recovery module.
    pub recovery: Address,
    /// Session manager.
    pub sessions: Address,
    /// Passkeys module.
    pub passkeys: Address,
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            recovery: RECOVERY_EXTENSION,
            sessions: SESSIONS_EXTENSION,
            passkeys: PASSKEYS_EXTENSION,
        }
    }
}

/// The guard co-signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardSettings {
    /// Guard signer address.
    pub address: Address,
}

/// Timelock applied to recovery signers added by the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryDefaults {
    /// Seconds a queued payload waits before becoming valid.
    pub required_delta_time: u64,
    /// Payloads queued before this timestamp are ignored.
    pub min_timestamp: u64,
}

impl Default for RecoveryDefaults {
    fn default() -> Self {
        Self {
            required_delta_time: 30 * 24 * 60 * 60,
            min_timestamp: 0,
        }
    }
}

/// An OAuth identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthProvider {
    /// Token issuer.
    pub issuer: String,
    /// OAuth client id.
    pub client_id: String,
    /// Authorization endpoint.
    pub authorize_url: String,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
}

/// Configured OAuth providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthSettings {
    /// Google, authenticated with PKCE.
    pub google: Option<OAuthProvider>,
    /// Apple.
    pub apple: Option<OAuthProvider>,
}

/// Everything the lifecycles need to know about the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerKitConfig {
    /// Environment the defaults were taken from.
    pub environment: Environment,
    /// Wallet derivation context.
    #[serde(default)]
    pub context: WalletContext,
    /// Extension addresses.
    #[serde(default)]
    pub extensions: Extensions,
    /// Guard, if wallets may use one.
    #[serde(default)]
    pub guard: Option<GuardSettings>,
    /// Recovery timelock for new recovery signers.
    #[serde(default)]
    pub recovery: RecoveryDefaults,
    /// Delay (ms) between a request reaching a terminal state and its removal.
    #[serde(default = "default_prune_delay")]
    pub signature_prune_delay_ms: u64,
    /// Origin recorded on requests raised by the wallet itself.
    #[serde(default = "default_origin")]
    pub default_origin: String,
    /// OAuth providers.
    #[serde(default)]
    pub oauth: OAuthSettings,
    /// Chains wallets are used on.
    #[serde(default = "default_networks")]
    pub networks: Vec<u64>,
}

fn default_networks() -> Vec<u64> {
    vec![1]
}

const fn default_prune_delay() -> u64 {
    10 * 60 * 1000
}

fn default_origin() -> String {
    "wallet-webapp".to_string()
}

impl SignerKitConfig {
    /// Parses a JSON configuration. Missing sections take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SignerKitError::Serialization`] if the JSON is malformed.
    pub fn from_json(json: &str) -> SignerKitResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Defaults for an [`Environment`].
pub trait DefaultConfig {
    /// Builds the defaults of `environment`.
    fn from_environment(environment: &Environment) -> Self;
}

impl DefaultConfig for SignerKitConfig {
    fn from_environment(environment: &Environment) -> Self {
        let (guard, google_client_id, redirect_uri) = match environment {
            Environment::Staging => (
                STAGING_GUARD,
                "970987756660-staging.apps.googleusercontent.com",
                "https://dev-wallet.signerkit.dev/auth-callback",
            ),
            Environment::Production => (
                GUARD,
                "970987756660-production.apps.googleusercontent.com",
                "https://wallet.signerkit.dev/auth-callback",
            ),
        };
        Self {
            environment: environment.clone(),
            context: WalletContext::default(),
            extensions: Extensions::default(),
            guard: Some(GuardSettings { address: guard }),
            recovery: RecoveryDefaults::default(),
            signature_prune_delay_ms: default_prune_delay(),
            default_origin: default_origin(),
            oauth: OAuthSettings {
                google: Some(OAuthProvider {
                    issuer: "https://accounts.google.com".to_string(),
                    client_id: google_client_id.to_string(),
                    authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                    redirect_uri: redirect_uri.to_string(),
                }),
                apple: None,
            },
            networks: match environment {
                Environment::Staging => vec![11_155_111, 421_614],
                Environment::Production => vec![1, 42_161, 137],
            },
        }
    }
}
