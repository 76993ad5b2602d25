use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder};
use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::mpsc;

use tribes_sdk::connection::{ConnectionManager, ConnectionStatus};
use tribes_sdk::error::Error;
use tribes_sdk::network::{Network, NetworkConfig};
use tribes_sdk::wallet::{WalletConnector, WalletEvent, WalletSession};
use tribes_sdk::{Address, Url};

// An endpoint nothing listens on; requests fail immediately instead of
// hanging.
fn unroutable() -> Url {
    Url::parse("http://127.0.0.1:1").unwrap()
}

fn local_testnet() -> NetworkConfig {
    Network::Testnet.config().with_rpc_url(unroutable())
}

/// A connector whose wallet flow always fails with the given message.
struct FailingWallet(&'static str);

#[async_trait]
impl WalletConnector for FailingWallet {
    async fn connect(&self) -> anyhow::Result<WalletSession> {
        Err(anyhow!(self.0))
    }
}

/// A connector that hands out sessions on a fixed chain without any
/// network round trip, and counts cache clears.
struct MockWallet {
    chain_id: u64,
    address: Address,
    cleared: AtomicUsize,
    sessions: Mutex<Vec<mpsc::UnboundedSender<WalletEvent>>>,
}

impl MockWallet {
    fn on_chain(chain_id: u64) -> Self {
        Self {
            chain_id,
            address: Address::repeat_byte(0xaa),
            cleared: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    fn emit(&self, event: WalletEvent) {
        for session in self.sessions.lock().unwrap().iter() {
            let _ = session.send(event.clone());
        }
    }
}

#[async_trait]
impl WalletConnector for MockWallet {
    async fn connect(&self) -> anyhow::Result<WalletSession> {
        let provider = ProviderBuilder::new().connect_http(unroutable()).erased();
        let (sender, events) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().push(sender);
        Ok(WalletSession {
            provider,
            address: self.address,
            chain_id: self.chain_id,
            events,
        })
    }

    fn clear_cached(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

// Lets the spawned event mirror catch up.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn a_rejected_wallet_flow_stores_the_sign_in_prompt() {
    let _ = env_logger::try_init();
    let manager = ConnectionManager::builder().network(local_testnet()).build();

    manager
        .connect(&FailingWallet("MetaMask: User Rejected the request"))
        .await;

    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.address, None);
    assert_eq!(state.last_error, Some(Error::ConnectRejected));
    assert_eq!(
        state.last_error.unwrap().to_string(),
        "Please click the metamask extension to sign in!"
    );
    assert!(manager.connected_provider().is_none());
}

#[tokio::test]
async fn an_unrecognized_wallet_failure_gets_the_generic_message() {
    let _ = env_logger::try_init();
    let manager = ConnectionManager::builder().network(local_testnet()).build();

    manager.connect(&FailingWallet("socket hang up")).await;

    let state = manager.state();
    assert_eq!(state.last_error, Some(Error::ConnectFailed));
    assert_eq!(state.last_error.unwrap().to_string(), "Something went wrong!");
}

#[tokio::test]
async fn a_session_on_the_target_chain_connects_without_a_switch() {
    let _ = env_logger::try_init();
    let network = local_testnet();
    let wallet = MockWallet::on_chain(network.chain_id);
    let manager = ConnectionManager::builder().network(network.clone()).build();

    manager.connect(&wallet).await;

    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.address, Some(wallet.address));
    assert_eq!(state.chain_id, Some(network.chain_id));
    assert_eq!(state.last_error, None);
    assert!(manager.connected_provider().is_some());
}

#[tokio::test]
async fn a_failed_chain_switch_leaves_the_manager_disconnected() {
    let _ = env_logger::try_init();
    // Wallet on the wrong chain; the switch request hits the unroutable
    // endpoint and fails.
    let wallet = MockWallet::on_chain(1);
    let manager = ConnectionManager::builder().network(local_testnet()).build();

    manager.connect(&wallet).await;

    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.last_error, Some(Error::ConnectFailed));
    assert!(manager.connected_provider().is_none());
}

#[tokio::test]
async fn wallet_events_mirror_into_connection_state() {
    let _ = env_logger::try_init();
    let network = local_testnet();
    let wallet = MockWallet::on_chain(network.chain_id);
    let manager = ConnectionManager::builder().network(network).build();

    manager.connect(&wallet).await;

    let other = Address::repeat_byte(0xbb);
    wallet.emit(WalletEvent::AccountsChanged(vec![other]));
    settle().await;
    let state = manager.state();
    assert_eq!(state.address, Some(other));
    assert_eq!(state.ens, None);

    wallet.emit(WalletEvent::ChainChanged(1));
    settle().await;
    assert_eq!(manager.state().chain_id, Some(1));

    wallet.emit(WalletEvent::Disconnected);
    settle().await;
    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.address, None);
    assert!(manager.connected_provider().is_none());
}

#[tokio::test]
async fn a_failed_reconnect_keeps_the_active_session() {
    let _ = env_logger::try_init();
    let network = local_testnet();
    let wallet = MockWallet::on_chain(network.chain_id);
    let manager = ConnectionManager::builder().network(network).build();

    manager.connect(&wallet).await;
    assert_eq!(manager.state().status, ConnectionStatus::Connected);

    manager
        .connect(&FailingWallet("MetaMask: User Rejected the request"))
        .await;

    // The rejection only lands in the error field; the established session
    // stays usable.
    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.address, Some(wallet.address));
    assert_eq!(state.last_error, Some(Error::ConnectRejected));
    assert!(manager.connected_provider().is_some());
}

#[tokio::test]
async fn reconnecting_releases_the_previous_event_subscription() {
    let _ = env_logger::try_init();
    let network = local_testnet();
    let first = MockWallet::on_chain(network.chain_id);
    let second = MockWallet::on_chain(network.chain_id);
    let manager = ConnectionManager::builder().network(network).build();

    manager.connect(&first).await;
    manager.connect(&second).await;

    // The first wallet's mirror task is gone; its events no longer reach
    // connection state.
    first.emit(WalletEvent::ChainChanged(99));
    settle().await;
    assert_ne!(manager.state().chain_id, Some(99));

    second.emit(WalletEvent::ChainChanged(7));
    settle().await;
    assert_eq!(manager.state().chain_id, Some(7));
}

#[tokio::test]
async fn disconnect_is_idempotent_and_clears_the_wallet_cache() {
    let _ = env_logger::try_init();
    let network = local_testnet();
    let wallet = MockWallet::on_chain(network.chain_id);
    let manager = ConnectionManager::builder().network(network).build();

    manager.connect(&wallet).await;
    assert_eq!(manager.state().status, ConnectionStatus::Connected);

    manager.disconnect(&wallet);
    manager.disconnect(&wallet);

    assert_eq!(wallet.cleared.load(Ordering::SeqCst), 2);
    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.address, None);
    assert!(manager.connected_provider().is_none());
}
