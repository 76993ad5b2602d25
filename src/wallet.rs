use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::{LocalSignerError, PrivateKeySigner};
use alloy::transports::http::reqwest::Url;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rand::thread_rng;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::mpsc;

const DEFAULT_KEYSTORE_DIR: &str = "tribes";
const CACHED_ACCOUNT_FILE: &str = "cached-account";

/// Notifications a wallet emits for the lifetime of a session (the
/// EIP-1193 event surface).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// The selected accounts changed; the first entry is the active one.
    AccountsChanged(Vec<Address>),
    /// The wallet switched to another chain.
    ChainChanged(u64),
    /// The wallet ended the session.
    Disconnected,
}

/// An authenticated wallet session: a signing-capable provider plus the
/// resolved account and chain, and the event receiver tied to the session.
///
/// Dropping the session (or the receiver) is the release point for the
/// wallet's event subscription.
pub struct WalletSession {
    pub provider: DynProvider,
    pub address: Address,
    pub chain_id: u64,
    pub events: mpsc::UnboundedReceiver<WalletEvent>,
}

/// A wallet-selection flow that can produce authenticated sessions.
///
/// Connectors are constructed explicitly and passed down; there is no
/// process-global instance.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// Opens the wallet flow and returns an authenticated session.
    async fn connect(&self) -> anyhow::Result<WalletSession>;

    /// Whether the connector has a cached account from a previous session.
    fn has_cached(&self) -> bool {
        false
    }

    /// Clears whatever the connector cached between sessions. Must be
    /// idempotent.
    fn clear_cached(&self) {}
}

/// A connector backed by local keystore files under the XDG config
/// directory. Stands in for a browser wallet in native deployments and
/// tests; key material never leaves this process.
pub struct KeystoreWallet {
    signer: PrivateKeySigner,
    rpc_url: Url,
    sessions: Mutex<Vec<mpsc::UnboundedSender<WalletEvent>>>,
}

impl KeystoreWallet {
    /// Gets the default keystore directory path, creating it if needed.
    pub fn keystore_dir() -> anyhow::Result<PathBuf> {
        let path = dirs::config_dir()
            .context("Could not find config directory")?
            .join(DEFAULT_KEYSTORE_DIR);
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        Ok(path)
    }

    /// Generates a new random key, saves it in keystore format, and returns
    /// a connector using it.
    pub fn generate(rpc_url: Url, password: &str) -> anyhow::Result<Self> {
        let signer = PrivateKeySigner::random();
        let dir = Self::keystore_dir()?;
        let name = format!("key_{}.json", signer.address());

        let mut rng = thread_rng();
        PrivateKeySigner::encrypt_keystore(
            &dir,
            &mut rng,
            signer.credential().to_bytes(),
            password,
            Some(&name),
        )?;

        Ok(Self::from_signer(signer, rpc_url))
    }

    /// Loads a key by address from the default keystore directory.
    pub fn load(rpc_url: Url, address: Address, password: &str) -> anyhow::Result<Self> {
        let path = Self::keystore_dir()?.join(format!("key_{address}.json"));
        Self::load_keystore(rpc_url, path, password)
    }

    /// Loads a key from a keystore file.
    pub fn load_keystore(rpc_url: Url, path: PathBuf, password: &str) -> anyhow::Result<Self> {
        let signer = PrivateKeySigner::decrypt_keystore(&path, password).map_err(|e| match e {
            LocalSignerError::EcdsaError(e) => anyhow!("ECDSA error: {e}"),
            LocalSignerError::EthKeystoreError(e) => anyhow!("Keystore error: {e}"),
            e => anyhow!("Error loading key: {e}"),
        })?;
        Ok(Self::from_signer(signer, rpc_url))
    }

    /// Loads a key from a raw 32-byte private key file.
    pub fn load_raw_key(rpc_url: Url, path: PathBuf) -> anyhow::Result<Self> {
        let private_key_bytes =
            fs::read(&path).map_err(|e| anyhow!("Failed to read private key file: {e}"))?;
        if private_key_bytes.len() != 32 {
            return Err(anyhow!(
                "Expected a 32-byte private key, got {} bytes",
                private_key_bytes.len()
            ));
        }

        let private_key = B256::from_slice(&private_key_bytes);
        let signer = PrivateKeySigner::from_bytes(&private_key)
            .map_err(|e| anyhow!("Failed to parse private key: {e}"))?;
        Ok(Self::from_signer(signer, rpc_url))
    }

    /// Wraps an existing signer.
    pub fn from_signer(signer: PrivateKeySigner, rpc_url: Url) -> Self {
        Self {
            signer,
            rpc_url,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Returns the account address of the wallet's key.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Lists all accounts present in the keystore directory.
    pub fn list_local_accounts() -> anyhow::Result<Vec<Address>> {
        let keystore_dir = Self::keystore_dir()?;
        let mut accounts = Vec::new();

        if let Ok(entries) = fs::read_dir(keystore_dir) {
            for entry in entries.flatten() {
                if let Some(file_name) = entry.file_name().to_str() {
                    if let Some(address) = Self::parse_keystore_filename(file_name) {
                        accounts.push(address);
                    }
                }
            }
        }

        Ok(accounts)
    }

    /// Parses an address out of a `key_<address>.json` keystore filename.
    fn parse_keystore_filename(file_name: &str) -> Option<Address> {
        file_name
            .strip_prefix("key_")
            .and_then(|s| s.strip_suffix(".json"))
            .and_then(|address| Address::parse_checksummed(address, None).ok())
    }

    /// Registers an event channel for a new session and returns its
    /// receiver. Senders whose receiver is gone are dropped here, so
    /// repeated connects do not accumulate dead channels.
    fn register_session(&self) -> mpsc::UnboundedReceiver<WalletEvent> {
        let (sender, events) = mpsc::unbounded_channel();
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|session| !session.is_closed());
        sessions.push(sender);
        events
    }

    fn cached_account_path() -> anyhow::Result<PathBuf> {
        Ok(Self::keystore_dir()?.join(CACHED_ACCOUNT_FILE))
    }

    /// Returns the account cached by a previous successful connect, if any.
    pub fn cached_account() -> Option<Address> {
        let path = Self::cached_account_path().ok()?;
        let contents = fs::read_to_string(path).ok()?;
        contents.trim().parse().ok()
    }
}

#[async_trait]
impl WalletConnector for KeystoreWallet {
    async fn connect(&self) -> anyhow::Result<WalletSession> {
        let provider = ProviderBuilder::new()
            .wallet(self.signer.clone())
            .connect_http(self.rpc_url.clone())
            .erased();

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| anyhow!("Failed to get chain ID: {e}"))?;

        let address = self.signer.address();
        if let Ok(path) = Self::cached_account_path() {
            if let Err(e) = fs::write(&path, address.to_string()) {
                log::warn!("Failed to cache account {address}: {e}");
            }
        }

        let events = self.register_session();

        Ok(WalletSession {
            provider,
            address,
            chain_id,
            events,
        })
    }

    fn has_cached(&self) -> bool {
        Self::cached_account().is_some()
    }

    fn clear_cached(&self) {
        if let Ok(path) = Self::cached_account_path() {
            let _ = fs::remove_file(path);
        }
        let mut sessions = self.sessions.lock().unwrap();
        for session in sessions.drain(..) {
            let _ = session.send(WalletEvent::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keystore_filenames_round_trip_addresses() {
        let address: Address = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e"
            .parse()
            .unwrap();
        let file_name = format!("key_{address}.json");
        assert_eq!(
            KeystoreWallet::parse_keystore_filename(&file_name),
            Some(address)
        );
        assert_eq!(KeystoreWallet::parse_keystore_filename("key_.json"), None);
        assert_eq!(KeystoreWallet::parse_keystore_filename("private.key"), None);
    }

    #[test]
    fn dead_session_channels_are_pruned_on_registration() {
        let wallet = KeystoreWallet::from_signer(
            PrivateKeySigner::random(),
            Url::parse("http://127.0.0.1:1").unwrap(),
        );

        let first = wallet.register_session();
        let _second = wallet.register_session();
        assert_eq!(wallet.sessions.lock().unwrap().len(), 2);

        // Once a receiver is gone its sender is dropped by the next
        // registration instead of lingering.
        drop(first);
        let _third = wallet.register_session();
        assert_eq!(wallet.sessions.lock().unwrap().len(), 2);
    }
}
