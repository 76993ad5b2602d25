// # Tribes SDK
//!
//! A Rust client for the Tribes on-chain community suite: a factory
//! contract hands out per-tenant `Tribes` deployments on Ethereum, and a
//! companion `Whitelist` registry lives on Flow.
//!
//! The crate has three layers:
//! - Use [`ConnectionManager`](crate::connection::ConnectionManager) with a
//!   [`WalletConnector`](crate::wallet::WalletConnector) to establish a
//!   signing session against a target network.
//! - Use [`TribesClient`](crate::tribes::TribesClient) for direct contract
//!   calls, or [`TribesQueries`](crate::query::TribesQueries) for the
//!   cached query/mutation surface on top of it.
//! - Use [`WhitelistClient`](crate::whitelist::WhitelistClient) for the
//!   Flow-side registry, backed by [`FlowClient`](crate::flow::FlowClient)
//!   against an access node's REST API.
//!
//! Key material lives in keystore files under the standard folder as per
//! the [XDG specification](https://specifications.freedesktop.org/basedir-spec/latest/):
//! - `~/.config/tribes/` on **Linux**
//! - `~/Library/Application Support/tribes/` on **macOS**
//! - `%LOCALAPPDATA%\tribes\` on **Windows**

/// Re-export commonly used types from `alloy`.
pub use alloy::primitives::{keccak256, Address, Bytes, TxHash, U256};
pub use alloy::signers::local::PrivateKeySigner;
pub use alloy::transports::http::reqwest::Url;

pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::Error;
pub use network::{FlowNetwork, Network, NetworkConfig};
pub use query::{QueryClient, TribesQueries};
pub use tribes::{TribeRecord, TribesClient, TribesConfig};
pub use wallet::{KeystoreWallet, WalletConnector, WalletSession};
pub use whitelist::WhitelistClient;

/// Module for session management.
/// Tracks connection status, the active account, and chain changes.
pub mod connection;

/// Module for ENS lookups.
/// Resolves reverse records for connected accounts.
pub mod ens;

/// Module for the crate's error type.
/// Classifies wallet, user-rejection, and RPC failures.
pub mod error;

/// Module for the Flow access-node client.
/// Executes Cadence scripts and submits signed transactions over REST.
pub mod flow;

/// Module for network selection.
/// Defines the supported Ethereum and Flow networks and their endpoints.
pub mod network;

/// Module for the query/mutation surface.
/// Provides a keyed result cache and the named Tribes operations on top.
pub mod query;

/// Module for the Tribes contracts.
/// Wraps the factory and the per-tenant tribe operations.
pub mod tribes;

/// Module for wallet connectors.
/// Includes a keystore-backed connector and session event plumbing.
pub mod wallet;

/// Module for the Flow whitelist registry.
/// Cadence scripts and transactions for whitelist management.
pub mod whitelist;
