mod common;

use alloy_primitives::Address;
use common::{mnemonic, sign_with, FakeSigner, Network};
use signerkit_core::kinds::SignerKind;
use signerkit_core::signatures::RequestStatus;
use signerkit_core::signer::Signer;
use signerkit_core::state::StateProvider;
use signerkit_core::topology::sessions::{ExplicitSession, Permission};
use signerkit_core::topology::Topology;
use signerkit_core::wallets::{
    LoginArgs, SignupArgs, SignupCredential, SignupOutcome, WalletStatus,
};
use signerkit_core::{Manager, SignerKitError};

fn mnemonic_signup(use_recovery: bool) -> SignupArgs {
    SignupArgs {
        credential: SignupCredential::Mnemonic(mnemonic()),
        use_guard: false,
        use_recovery,
        force_create: false,
    }
}

async fn signup(device: &Manager, use_recovery: bool) -> Address {
    match device
        .wallets()
        .signup(mnemonic_signup(use_recovery))
        .await
        .unwrap()
    {
        SignupOutcome::Created(wallet) => wallet,
        other => panic!("unexpected signup outcome {other:?}"),
    }
}

#[tokio::test]
async fn test_mnemonic_signup_without_guard() {
    let network = Network::new();
    let device = network.device("device-a");
    let wallet = signup(&device, false).await;

    let record = device.wallets().get(wallet).await.unwrap().unwrap();
    assert_eq!(record.status, WalletStatus::Ready);
    assert_eq!(record.login_type, SignerKind::LoginMnemonic);
    assert!(!record.use_guard);

    let configuration = network.state.latest_configuration(wallet).await.unwrap();
    assert_eq!(configuration.threshold, 1);
    assert_eq!(configuration.checkpoint, 0);

    let parts = device.wallets().get_configuration(wallet).await.unwrap();
    let login = FakeSigner::from_phrase(common::MNEMONIC).address();
    assert_eq!(parts.login, Topology::signer(login, 1));
    assert_eq!(parts.devices, Topology::signer(record.device, 1));
    assert!(parts.guard.is_none());
    assert_eq!(
        device.wallets().list_devices(wallet).await.unwrap(),
        vec![record.device]
    );
}

#[tokio::test]
async fn test_signup_with_guard_requires_configured_guard() {
    let network = Network::new();
    let device = network.device("device-a");
    let outcome = device
        .wallets()
        .signup(SignupArgs {
            use_guard: true,
            ..mnemonic_signup(false)
        })
        .await
        .unwrap();
    let SignupOutcome::Created(wallet) = outcome else {
        panic!("expected a new wallet");
    };
    let parts = device.wallets().get_configuration(wallet).await.unwrap();
    assert!(parts.guard.is_some());
    let configuration = network.state.latest_configuration(wallet).await.unwrap();
    assert_eq!(configuration.threshold, 2);
}

#[tokio::test]
async fn test_logout_supersedes_pending_login_of_other_device() {
    let network = Network::new();
    let device_a = network.device("device-a");
    let device_b = network.device("device-b");
    let wallet = signup(&device_a, false).await;

    let login_id = device_b
        .wallets()
        .login(LoginArgs::Wallet {
            address: wallet,
            email: None,
        })
        .await
        .unwrap();
    assert_eq!(
        device_b.wallets().get(wallet).await.unwrap().unwrap().status,
        WalletStatus::LoggingIn
    );

    let logout_id = device_a
        .wallets()
        .logout(wallet, false)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        device_b.signatures().get(&login_id).await.unwrap().base.status,
        RequestStatus::Cancelled { .. }
    ));

    assert_eq!(
        sign_with(device_a.signatures(), &logout_id, SignerKind::LocalDevice).await,
        1
    );
    device_a.wallets().complete_logout(&logout_id).await.unwrap();
    assert!(device_a.wallets().get(wallet).await.unwrap().is_none());

    assert!(matches!(
        device_b.wallets().complete_login(&login_id).await,
        Err(SignerKitError::SignatureRequestNotPending(_))
    ));
    let configuration = network.state.latest_configuration(wallet).await.unwrap();
    assert_eq!(configuration.checkpoint, 1);
    assert!(device_a
        .wallets()
        .list_devices(wallet)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_completed_login_moves_later_updates_to_next_checkpoint() {
    let network = Network::new();
    let device_a = network.device("device-a");
    let device_b = network.device("device-b");
    let wallet = signup(&device_a, true).await;

    let login_id = device_b
        .wallets()
        .login(LoginArgs::Mnemonic(mnemonic()))
        .await
        .unwrap();
    assert_eq!(
        sign_with(device_b.signatures(), &login_id, SignerKind::LoginMnemonic).await,
        1
    );
    device_b.wallets().complete_login(&login_id).await.unwrap();
    let record_b = device_b.wallets().get(wallet).await.unwrap().unwrap();
    assert_eq!(record_b.status, WalletStatus::Ready);

    let devices = device_a.wallets().list_devices(wallet).await.unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.contains(&record_b.device));
    let recovery = device_a.recovery().recovery_signers(wallet).await.unwrap().unwrap();
    assert!(recovery.iter().any(|leaf| leaf.signer == record_b.device));

    let logout_id = device_a
        .wallets()
        .remote_logout(wallet, record_b.device)
        .await
        .unwrap();
    let request = device_a.signatures().get(&logout_id).await.unwrap();
    assert_eq!(request.base.envelope.configuration.checkpoint, 1);
    sign_with(device_a.signatures(), &logout_id, SignerKind::LocalDevice).await;
    device_a
        .wallets()
        .complete_configuration_update(&logout_id)
        .await
        .unwrap();

    let configuration = network.state.latest_configuration(wallet).await.unwrap();
    assert_eq!(configuration.checkpoint, 2);
    assert_eq!(
        device_a.wallets().list_devices(wallet).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_session_updates_are_serialized_by_checkpoint() {
    let network = Network::new();
    let device = network.device("device-a");
    let wallet = signup(&device, false).await;
    let session = ExplicitSession {
        signer: Address::repeat_byte(0x51),
        chain_id: 11_155_111,
        value_limit: alloy_primitives::U256::from(1_000u64),
        deadline: 2_000_000_000,
        permissions: vec![Permission {
            target: Address::repeat_byte(0x52),
        }],
    };

    let first = device
        .sessions()
        .add_explicit_session(wallet, session.clone())
        .await
        .unwrap();
    let second = device
        .sessions()
        .add_blacklist_address(wallet, Address::repeat_byte(0x53))
        .await
        .unwrap();
    assert!(matches!(
        device.signatures().get(&first).await.unwrap().base.status,
        RequestStatus::Cancelled { .. }
    ));

    sign_with(device.signatures(), &second, SignerKind::LocalDevice).await;
    device.sessions().complete_update(&second).await.unwrap();
    let sessions = device.sessions().sessions_topology(wallet).await.unwrap();
    assert!(sessions.explicit.is_empty());
    assert_eq!(sessions.implicit_blacklist, vec![Address::repeat_byte(0x53)]);

    let third = device
        .sessions()
        .add_explicit_session(wallet, session.clone())
        .await
        .unwrap();
    sign_with(device.signatures(), &third, SignerKind::LocalDevice).await;
    device.sessions().complete_update(&third).await.unwrap();
    let configuration = network.state.latest_configuration(wallet).await.unwrap();
    assert_eq!(configuration.checkpoint, 2);
    assert_eq!(
        device
            .sessions()
            .sessions_topology(wallet)
            .await
            .unwrap()
            .explicit,
        vec![session]
    );
}

#[tokio::test]
async fn test_recovery_mnemonic_is_added_through_update() {
    let network = Network::new();
    let device = network.device("device-a");
    let wallet = signup(&device, true).await;
    let phrase = secrecy::SecretString::from(
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
    );
    let id = device
        .recovery()
        .add_recovery_mnemonic(wallet, &phrase)
        .await
        .unwrap();
    sign_with(device.signatures(), &id, SignerKind::LocalDevice).await;
    device.recovery().complete_recovery_update(&id).await.unwrap();

    let recovery_signer = FakeSigner::from_phrase(
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
    )
    .address();
    let leaves = device
        .recovery()
        .recovery_signers(wallet)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leaves.len(), 2);
    assert!(leaves.iter().any(|leaf| leaf.signer == recovery_signer));
}

#[tokio::test]
async fn test_terminal_requests_are_pruned() {
    let network = Network::new();
    let device = network.device("device-a");
    let wallet = signup(&device, false).await;
    let id = device
        .sessions()
        .add_blacklist_address(wallet, Address::repeat_byte(0x60))
        .await
        .unwrap();
    device.signatures().requests().cancel(&id).await.unwrap();
    assert_eq!(device.signatures().requests().prune().await.unwrap(), 0);

    network.clock.advance(10 * 60 * 1000 + 1);
    assert_eq!(device.signatures().requests().prune().await.unwrap(), 1);
    assert!(matches!(
        device.signatures().get(&id).await,
        Err(SignerKitError::SignatureRequestNotFound(_))
    ));
}
