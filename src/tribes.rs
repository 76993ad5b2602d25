use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::DynProvider;
use alloy::rpc::types::TransactionReceipt;
use alloy::sol;
use serde::{Deserialize, Serialize};

use crate::error::{Error, classify_call_error};

sol! {
    #[sol(rpc)]
    contract TribesFactory {
        function getProxy(address tenant) external view returns (address);
        function instance(address account) external view returns (address);
        function createInstance() external;
        function tenantCounter() external view returns (uint256);
    }

    #[sol(rpc)]
    contract Tribes {
        function addNewTribe(bytes metadata) external;
        function getUserTribe(address tenant, address account) external view returns (uint256);
        function getTribeData(address tenant, uint256 tribeId) external view returns (bytes);
        function joinTribe(address tenant, uint256 tribeId) external;
        function leaveTribe(address tenant) external;
        function totalTribes(address tenant) external view returns (uint256);
    }
}

/// Narrows an on-chain counter to `u64`, surfacing overflow instead of
/// silently truncating it to an empty result.
fn to_u64(value: U256, what: &str) -> Result<u64, Error> {
    value
        .try_into()
        .map_err(|_| Error::Rpc(format!("{what} {value} does not fit in 64 bits")))
}

/// Addresses identifying one Tribes deployment: the factory contract and
/// the tenant whose proxy this client talks to.
#[derive(Debug, Clone)]
pub struct TribesConfig {
    pub factory_address: Address,
    pub tenant: Address,
}

/// One tribe as returned by the contract: its index and the opaque
/// metadata blob. No normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TribeRecord {
    pub id: u64,
    pub metadata: Bytes,
}

/// The bound contract handle for one Tribes deployment.
///
/// A handle is never mutated in place: signer rotation goes through
/// [`TribesClient::with_signer`] / [`TribesClient::without_signer`], which
/// return a replacement.
///
/// Factory reads work over the read-only provider. Proxy reads require a
/// resolved proxy and return an empty result until then; writes
/// additionally require a bound signer and are no-ops without one. "Not
/// connected yet" is an expected UI state, not an error.
#[derive(Clone)]
pub struct TribesClient {
    config: TribesConfig,
    read_only: DynProvider,
    proxy_address: Option<Address>,
    signer: Option<DynProvider>,
}

impl TribesClient {
    /// Creates an unresolved handle. Call [`TribesClient::resolve_proxy`]
    /// to look up the tenant's proxy before using the tribe operations.
    pub fn new(config: TribesConfig, read_only: DynProvider) -> Self {
        Self {
            config,
            read_only,
            proxy_address: None,
            signer: None,
        }
    }

    /// Looks up the tenant's proxy contract through the factory and returns
    /// a handle bound to it.
    pub async fn resolve_proxy(mut self) -> Result<Self, Error> {
        let factory = TribesFactory::new(self.config.factory_address, self.read_only.clone());
        let proxy = factory
            .getProxy(self.config.tenant)
            .call()
            .await
            .map_err(|e| {
                log::error!("Proxy lookup failed: {e}");
                Error::ProxyLookup(self.config.tenant.to_string())
            })?;
        if proxy == Address::ZERO {
            return Err(Error::ProxyLookup(self.config.tenant.to_string()));
        }
        self.proxy_address = Some(proxy);
        Ok(self)
    }

    /// Returns a replacement handle bound to an authenticated provider.
    pub fn with_signer(&self, provider: DynProvider) -> Self {
        let mut next = self.clone();
        next.signer = Some(provider);
        next
    }

    /// Returns a replacement handle with no signer bound.
    pub fn without_signer(&self) -> Self {
        let mut next = self.clone();
        next.signer = None;
        next
    }

    pub fn factory_address(&self) -> Address {
        self.config.factory_address
    }

    pub fn proxy_address(&self) -> Option<Address> {
        self.proxy_address
    }

    pub fn tenant(&self) -> Address {
        self.config.tenant
    }

    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }

    /// Provider used for read calls: the bound signer's when present, the
    /// read-only one otherwise.
    fn call_provider(&self) -> DynProvider {
        self.signer.clone().unwrap_or_else(|| self.read_only.clone())
    }

    fn classify(&self, err: impl std::fmt::Display) -> Error {
        classify_call_error(self.signer.is_some(), err)
    }

    /// Returns the account's instance descriptor, or `None` if it has
    /// none. A revert from the factory also maps to `None`; lacking an
    /// instance is not an error.
    pub async fn check_instance(&self, account: Address) -> Result<Option<Address>, Error> {
        let factory = TribesFactory::new(self.config.factory_address, self.call_provider());
        match factory.instance(account).call().await {
            Ok(descriptor) if descriptor != Address::ZERO => Ok(Some(descriptor)),
            _ => Ok(None),
        }
    }

    /// Creates a tenant instance and waits for the transaction to be
    /// mined. No-op without a bound signer.
    pub async fn create_instance(&self) -> Result<Option<TransactionReceipt>, Error> {
        let Some(signer) = self.signer.clone() else {
            return Ok(None);
        };
        let factory = TribesFactory::new(self.config.factory_address, signer);
        let pending = factory
            .createInstance()
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let receipt = pending.get_receipt().await.map_err(|e| self.classify(e))?;
        Ok(Some(receipt))
    }

    /// Total number of tenant instances registered with the factory.
    pub async fn total_tenants(&self) -> Result<u64, Error> {
        let factory = TribesFactory::new(self.config.factory_address, self.call_provider());
        let count = factory
            .tenantCounter()
            .call()
            .await
            .map_err(|e| self.classify(e))?;
        to_u64(count, "tenant counter")
    }

    /// Adds a new tribe with the given metadata and waits for the receipt.
    pub async fn add_tribe(&self, metadata: Bytes) -> Result<Option<TransactionReceipt>, Error> {
        let (Some(signer), Some(proxy)) = (self.signer.clone(), self.proxy_address) else {
            return Ok(None);
        };
        let tribes = Tribes::new(proxy, signer);
        let pending = tribes
            .addNewTribe(metadata)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let receipt = pending.get_receipt().await.map_err(|e| self.classify(e))?;
        Ok(Some(receipt))
    }

    /// The tribe id the account belongs to, zero meaning none.
    pub async fn get_tribe_id(&self, account: Address) -> Result<Option<u64>, Error> {
        let Some(proxy) = self.proxy_address else {
            return Ok(None);
        };
        let tribes = Tribes::new(proxy, self.call_provider());
        let id = tribes
            .getUserTribe(self.config.tenant, account)
            .call()
            .await
            .map_err(|e| self.classify(e))?;
        Ok(Some(to_u64(id, "tribe id")?))
    }

    /// Fetches one tribe's record by id.
    pub async fn get_tribe(&self, id: u64) -> Result<Option<TribeRecord>, Error> {
        let Some(proxy) = self.proxy_address else {
            return Ok(None);
        };
        let tribes = Tribes::new(proxy, self.call_provider());
        let metadata = tribes
            .getTribeData(self.config.tenant, U256::from(id))
            .call()
            .await
            .map_err(|e| self.classify(e))?;
        Ok(Some(TribeRecord { id, metadata }))
    }

    /// Fetches every tribe: the total count, then one read per index from
    /// 1 to the count inclusive.
    ///
    /// The reads are serialized on purpose: ids come back in a stable
    /// order and the RPC endpoint sees one request at a time.
    pub async fn get_all_tribes(&self) -> Result<Vec<TribeRecord>, Error> {
        let Some(proxy) = self.proxy_address else {
            return Ok(Vec::new());
        };
        let tribes = Tribes::new(proxy, self.call_provider());
        let total = tribes
            .totalTribes(self.config.tenant)
            .call()
            .await
            .map_err(|e| self.classify(e))?;
        let total = to_u64(total, "tribe count")?;

        let mut records = Vec::with_capacity(total as usize);
        for id in 1..=total {
            let metadata = tribes
                .getTribeData(self.config.tenant, U256::from(id))
                .call()
                .await
                .map_err(|e| self.classify(e))?;
            records.push(TribeRecord { id, metadata });
        }
        Ok(records)
    }

    /// Joins a tribe and returns the confirmation receipt, so callers can
    /// branch on success. No-op without a bound signer.
    pub async fn join_tribe(&self, id: u64) -> Result<Option<TransactionReceipt>, Error> {
        let (Some(signer), Some(proxy)) = (self.signer.clone(), self.proxy_address) else {
            return Ok(None);
        };
        let tribes = Tribes::new(proxy, signer);
        let pending = tribes
            .joinTribe(self.config.tenant, U256::from(id))
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let receipt = pending.get_receipt().await.map_err(|e| self.classify(e))?;
        Ok(Some(receipt))
    }

    /// Leaves the current tribe, waits for the transaction to be mined,
    /// and returns its hash; the hash is the only useful artifact here.
    pub async fn leave_tribe(&self) -> Result<Option<TxHash>, Error> {
        let (Some(signer), Some(proxy)) = (self.signer.clone(), self.proxy_address) else {
            return Ok(None);
        };
        let tribes = Tribes::new(proxy, signer);
        let pending = tribes
            .leaveTribe(self.config.tenant)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let receipt = pending.get_receipt().await.map_err(|e| self.classify(e))?;
        Ok(Some(receipt.transaction_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::providers::{Provider, ProviderBuilder};
    use alloy::transports::http::reqwest::Url;

    fn unbound_client() -> TribesClient {
        // The provider never sees a request in these tests; every operation
        // is expected to short-circuit before reaching the network.
        let provider = ProviderBuilder::new()
            .connect_http(Url::parse("http://127.0.0.1:1").unwrap())
            .erased();
        TribesClient::new(
            TribesConfig {
                factory_address: Address::repeat_byte(0x11),
                tenant: Address::repeat_byte(0x22),
            },
            provider,
        )
    }

    #[tokio::test]
    async fn writes_with_an_unbound_handle_are_no_ops() {
        let client = unbound_client();
        assert!(client.create_instance().await.unwrap().is_none());
        assert!(client.add_tribe(Bytes::new()).await.unwrap().is_none());
        assert!(client.join_tribe(1).await.unwrap().is_none());
        assert!(client.leave_tribe().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_with_an_unresolved_proxy_return_empty_results() {
        let client = unbound_client();
        assert_eq!(client.get_all_tribes().await.unwrap(), Vec::new());
        assert!(client.get_tribe(1).await.unwrap().is_none());
        assert!(
            client
                .get_tribe_id(Address::repeat_byte(0x33))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn oversized_counters_error_instead_of_truncating() {
        assert_eq!(to_u64(U256::from(7u64), "tribe count").unwrap(), 7);
        assert_eq!(
            to_u64(U256::from(u64::MAX), "tribe count").unwrap(),
            u64::MAX
        );
        let err = to_u64(U256::MAX, "tribe count").unwrap_err();
        assert!(matches!(err, Error::Rpc(ref m) if m.contains("tribe count")));
    }

    #[test]
    fn signer_rotation_replaces_the_handle_wholesale() {
        let client = unbound_client();
        let provider = ProviderBuilder::new()
            .connect_http(Url::parse("http://127.0.0.1:1").unwrap())
            .erased();

        let bound = client.with_signer(provider);
        assert!(bound.has_signer());
        assert!(!client.has_signer());
        assert!(!bound.without_signer().has_signer());
    }
}
