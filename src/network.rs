use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::transports::http::reqwest::Url;

/// Environment variable selecting the Infura project credential.
pub const INFURA_API_KEY_VAR: &str = "INFURA_API_KEY";

// Fallback credential carried over from the hosted deployment.
const INFURA_FALLBACK_KEY: &str = "fb9f66bab7574d70b281f62e19c27d49";

fn infura_key() -> String {
    std::env::var(INFURA_API_KEY_VAR).unwrap_or_else(|_| INFURA_FALLBACK_KEY.to_string())
}

/// Logical Ethereum network identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
}

/// Static configuration for one Ethereum network: RPC endpoint, chain ID,
/// and block explorer.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: Network,
    pub name: &'static str,
    pub rpc_url: Url,
    pub chain_id: u64,
    pub explorer_url: Option<Url>,
}

impl Network {
    /// Returns the configuration for this network, with the RPC credential
    /// taken from the environment.
    pub fn config(&self) -> NetworkConfig {
        let key = infura_key();
        match self {
            Network::Mainnet => NetworkConfig {
                network: Network::Mainnet,
                name: "mainnet",
                rpc_url: Url::parse(&format!("https://mainnet.infura.io/v3/{key}"))
                    .expect("static mainnet URL"),
                chain_id: 1,
                explorer_url: Url::parse("https://etherscan.io").ok(),
            },
            Network::Testnet => NetworkConfig {
                network: Network::Testnet,
                name: "sepolia",
                rpc_url: Url::parse(&format!("https://sepolia.infura.io/v3/{key}"))
                    .expect("static sepolia URL"),
                chain_id: 11155111,
                explorer_url: Url::parse("https://sepolia.etherscan.io").ok(),
            },
        }
    }
}

impl NetworkConfig {
    /// Builds a read-only JSON-RPC provider for this network.
    /// No connection is opened until the first request.
    pub fn read_only_provider(&self) -> DynProvider {
        ProviderBuilder::new()
            .connect_http(self.rpc_url.clone())
            .erased()
    }

    /// Overrides the RPC endpoint, e.g. to point at a local node.
    pub fn with_rpc_url(mut self, rpc_url: Url) -> Self {
        self.rpc_url = rpc_url;
        self
    }
}

/// Logical Flow network identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowNetwork {
    Mainnet,
    Testnet,
    Emulator,
}

impl FlowNetwork {
    /// REST access-node base URL for this network.
    pub fn access_node_url(&self) -> Url {
        let url = match self {
            FlowNetwork::Mainnet => "https://rest-mainnet.onflow.org",
            FlowNetwork::Testnet => "https://rest-testnet.onflow.org",
            FlowNetwork::Emulator => "http://127.0.0.1:8888",
        };
        Url::parse(url).expect("static access node URL")
    }

    pub fn name(&self) -> &'static str {
        match self {
            FlowNetwork::Mainnet => "flow-mainnet",
            FlowNetwork::Testnet => "flow-testnet",
            FlowNetwork::Emulator => "flow-emulator",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_key_overrides_the_fallback() {
        unsafe { std::env::set_var(INFURA_API_KEY_VAR, "deadbeef") };
        let config = Network::Mainnet.config();
        assert!(config.rpc_url.as_str().ends_with("/v3/deadbeef"));
        unsafe { std::env::remove_var(INFURA_API_KEY_VAR) };
    }

    #[test]
    #[serial]
    fn fallback_key_is_used_without_the_env_var() {
        unsafe { std::env::remove_var(INFURA_API_KEY_VAR) };
        let config = Network::Testnet.config();
        assert_eq!(config.chain_id, 11155111);
        assert!(config.rpc_url.as_str().contains(INFURA_FALLBACK_KEY));
    }

    #[test]
    fn flow_networks_have_distinct_access_nodes() {
        assert_ne!(
            FlowNetwork::Mainnet.access_node_url(),
            FlowNetwork::Testnet.access_node_url()
        );
    }
}
