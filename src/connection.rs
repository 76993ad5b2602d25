use std::sync::{Arc, Mutex, RwLock};

use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider};
use bon::bon;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ens;
use crate::error::{self, Error};
use crate::network::NetworkConfig;
use crate::wallet::{WalletConnector, WalletEvent};

/// Connection lifecycle. There are no sub-states of `Connected`; account
/// and chain updates happen in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the session-scoped connection state.
///
/// `address` is `Some` only while an authenticated handle is held.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub address: Option<Address>,
    pub ens: Option<String>,
    pub chain_id: Option<u64>,
    pub last_error: Option<Error>,
}

impl ConnectionState {
    fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            address: None,
            ens: None,
            chain_id: None,
            last_error: None,
        }
    }
}

struct Shared {
    state: RwLock<ConnectionState>,
    connected: RwLock<Option<DynProvider>>,
}

impl Shared {
    fn reset(&self) {
        *self.connected.write().unwrap() = None;
        *self.state.write().unwrap() = ConnectionState::disconnected();
    }
}

/// Holds the read-only RPC connection and, after a successful wallet flow,
/// the authenticated one. Sole writer of [`ConnectionState`]; adapters and
/// query layers only read snapshots.
pub struct ConnectionManager {
    read_only: DynProvider,
    target: NetworkConfig,
    shared: Arc<Shared>,
    // Guard for the wallet event mirror task. Replaced on every connect,
    // aborted on disconnect and on drop.
    subscription: Mutex<Option<JoinHandle<()>>>,
}

#[bon]
impl ConnectionManager {
    /// Creates a new builder for `ConnectionManager` targeting the given
    /// network. The read-only provider is constructed immediately; no
    /// connection is opened until the first request.
    #[builder]
    pub fn builder(network: NetworkConfig) -> Self {
        let read_only = network.read_only_provider();
        Self {
            read_only,
            target: network,
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::disconnected()),
                connected: RwLock::new(None),
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Returns a snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.read().unwrap().clone()
    }

    /// The always-available read-only provider.
    pub fn read_only_provider(&self) -> DynProvider {
        self.read_only.clone()
    }

    /// The authenticated provider, if a wallet session is active.
    pub fn connected_provider(&self) -> Option<DynProvider> {
        self.shared.connected.read().unwrap().clone()
    }

    /// The network this manager was configured for.
    pub fn target_network(&self) -> &NetworkConfig {
        &self.target
    }

    /// Runs the wallet-selection flow and installs the authenticated
    /// session.
    ///
    /// Never returns an error: failures are classified into the three
    /// user-facing categories and stored in [`ConnectionState::last_error`],
    /// leaving the manager disconnected.
    pub async fn connect(&self, connector: &dyn WalletConnector) {
        {
            let mut state = self.shared.state.write().unwrap();
            state.status = ConnectionStatus::Connecting;
            state.last_error = None;
        }

        if let Err(err) = self.try_connect(connector).await {
            log::error!("Wallet connection failed: {err:#}");
            let classified = error::classify_connect_error(&err);
            // A failed attempt never touches an already-installed session:
            // the previous provider and account stay valid, only the error
            // field changes.
            if self.shared.connected.read().unwrap().is_some() {
                let mut state = self.shared.state.write().unwrap();
                state.status = ConnectionStatus::Connected;
                state.last_error = Some(classified);
            } else {
                self.shared.reset();
                self.shared.state.write().unwrap().last_error = Some(classified);
            }
        }
    }

    async fn try_connect(&self, connector: &dyn WalletConnector) -> anyhow::Result<()> {
        let session = connector.connect().await?;

        // Reverse lookup is best effort; most accounts have no record.
        let ens = ens::lookup_address(&session.provider, session.address).await;

        if session.chain_id != self.target.chain_id {
            log::info!(
                "Wallet is on chain {}, requesting switch to {} ({})",
                session.chain_id,
                self.target.name,
                self.target.chain_id
            );
            self.switch_chain(&session.provider).await?;
        }

        *self.shared.connected.write().unwrap() = Some(session.provider.clone());
        {
            let mut state = self.shared.state.write().unwrap();
            *state = ConnectionState {
                status: ConnectionStatus::Connected,
                address: Some(session.address),
                ens,
                // The pre-switch chain; a chain-changed event follows if the
                // wallet honored the switch request.
                chain_id: Some(session.chain_id),
                last_error: None,
            };
        }

        self.spawn_event_mirror(session.events);
        log::info!("Connected as {}", session.address);
        Ok(())
    }

    /// Asks the wallet to switch to the configured target chain
    /// (EIP-3326 `wallet_switchEthereumChain`).
    async fn switch_chain(&self, provider: &DynProvider) -> anyhow::Result<()> {
        let params = json!([{ "chainId": format!("0x{:x}", self.target.chain_id) }]);
        provider
            .client()
            .request::<_, serde_json::Value>("wallet_switchEthereumChain", params)
            .await?;
        Ok(())
    }

    /// Mirrors wallet notifications into local state for the lifetime of
    /// the session. The previous mirror task, if any, is released first.
    fn spawn_event_mirror(&self, mut events: mpsc::UnboundedReceiver<WalletEvent>) {
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    WalletEvent::AccountsChanged(accounts) => {
                        let mut state = shared.state.write().unwrap();
                        state.address = accounts.first().copied();
                        state.ens = None;
                    }
                    WalletEvent::ChainChanged(chain_id) => {
                        shared.state.write().unwrap().chain_id = Some(chain_id);
                    }
                    WalletEvent::Disconnected => {
                        shared.reset();
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.subscription.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Clears the connector's cached wallet state and all session fields.
    /// Idempotent.
    pub fn disconnect(&self, connector: &dyn WalletConnector) {
        connector.clear_cached();
        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            subscription.abort();
        }
        self.shared.reset();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            subscription.abort();
        }
    }
}
