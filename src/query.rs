use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use alloy::primitives::{Address, Bytes, TxHash};
use alloy::rpc::types::TransactionReceipt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::tribes::{TribeRecord, TribesClient};

/// Cache key: an ordered tuple of operation name, account address,
/// contract address, and the like.
pub type QueryKey = Vec<String>;

/// Per-query behavior knobs.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// A disabled query returns `None` without fetching; used to gate a
    /// query until its key's prerequisites exist.
    pub enabled: bool,
    /// Additional fetch attempts after a failure.
    pub retry: u32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            retry: 3,
        }
    }
}

impl QueryOptions {
    /// Disables retries; for lookups where failure is the expected answer.
    pub fn no_retry() -> Self {
        Self {
            retry: 0,
            ..Self::default()
        }
    }
}

/// Caller-supplied lifecycle callbacks for a mutation.
#[derive(Default)]
pub struct MutationOptions<T> {
    pub on_success: Option<Box<dyn Fn(&T) + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(&Error) + Send + Sync>>,
}

/// A keyed cache for fetch results, shared by every query surface of a
/// session.
///
/// Entries are stored serialized; whichever caller fetches a key first
/// populates it, later callers get the cached copy until the key is
/// invalidated.
#[derive(Clone, Default)]
pub struct QueryClient {
    cache: Arc<RwLock<HashMap<QueryKey, serde_json::Value>>>,
}

impl QueryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a query: serves the cached entry when present, otherwise runs
    /// the fetcher (with up to `retry` extra attempts) and caches the
    /// result. A disabled query resolves to `None` immediately.
    pub async fn fetch<T, E, F, Fut>(
        &self,
        key: QueryKey,
        options: QueryOptions,
        fetcher: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: std::fmt::Display,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !options.enabled {
            return Ok(None);
        }

        if let Some(cached) = self.cache.read().unwrap().get(&key) {
            if let Ok(value) = serde_json::from_value(cached.clone()) {
                return Ok(Some(value));
            }
        }

        let mut attempt = 0;
        let value = loop {
            match fetcher().await {
                Ok(value) => break value,
                Err(err) if attempt < options.retry => {
                    attempt += 1;
                    log::debug!("Query {key:?} failed (attempt {attempt}): {err}");
                }
                Err(err) => return Err(err),
            }
        };

        if let Ok(serialized) = serde_json::to_value(&value) {
            self.cache.write().unwrap().insert(key, serialized);
        }
        Ok(Some(value))
    }

    /// Drops every cached entry whose key starts with the given prefix.
    pub fn invalidate(&self, prefix: &[String]) {
        self.cache
            .write()
            .unwrap()
            .retain(|key, _| !key.starts_with(prefix));
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.cache.write().unwrap().clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The named query/mutation surface over a [`TribesClient`].
///
/// Query results are cached in the shared [`QueryClient`] under keys of
/// the form (operation, account, contract[, id]); queries whose key
/// prerequisites are missing resolve to an empty result instead of
/// erroring, tolerating not-yet-connected renders.
pub struct TribesQueries {
    client: QueryClient,
    tribes: TribesClient,
    address: Option<Address>,
}

impl TribesQueries {
    pub fn new(client: QueryClient, tribes: TribesClient, address: Option<Address>) -> Self {
        Self {
            client,
            tribes,
            address,
        }
    }

    pub fn query_client(&self) -> &QueryClient {
        &self.client
    }

    /// CheckInstance: the caller's instance descriptor, if any.
    pub async fn check_instance(&self) -> Result<Option<Address>, Error> {
        let (Some(address), Some(contract)) = (self.address, self.tribes.proxy_address()) else {
            return Ok(None);
        };
        let key = vec![
            "checkInstance".to_string(),
            address.to_string(),
            contract.to_string(),
        ];
        let tribes = self.tribes.clone();
        let result = self
            .client
            .fetch(key, QueryOptions::default(), move || {
                let tribes = tribes.clone();
                async move { tribes.check_instance(address).await }
            })
            .await?;
        Ok(result.flatten())
    }

    /// Tribes: every tribe of the deployment, ids in order.
    pub async fn tribes(&self) -> Result<Vec<TribeRecord>, Error> {
        let Some(contract) = self.tribes.proxy_address() else {
            return Ok(Vec::new());
        };
        let key = vec!["tribes".to_string(), contract.to_string()];
        let tribes = self.tribes.clone();
        let result = self
            .client
            .fetch(key, QueryOptions::default(), move || {
                let tribes = tribes.clone();
                async move { tribes.get_all_tribes().await }
            })
            .await?;
        Ok(result.unwrap_or_default())
    }

    /// TribeId: the caller's tribe id. Retries are disabled; a failed
    /// lookup for an account without a tribe is expected, not worth
    /// repeating.
    pub async fn tribe_id(&self) -> Result<Option<u64>, Error> {
        let (Some(address), Some(contract)) = (self.address, self.tribes.proxy_address()) else {
            return Ok(None);
        };
        let key = vec![
            "getTribeId".to_string(),
            address.to_string(),
            contract.to_string(),
        ];
        let tribes = self.tribes.clone();
        let result = self
            .client
            .fetch(key, QueryOptions::no_retry(), move || {
                let tribes = tribes.clone();
                async move { tribes.get_tribe_id(address).await }
            })
            .await?;
        Ok(result.flatten())
    }

    /// Tribe: the caller's tribe record. Composed query: the record fetch
    /// only happens after the id lookup resolved to a tribe.
    pub async fn tribe(&self) -> Result<Option<TribeRecord>, Error> {
        let Some(id) = self.tribe_id().await? else {
            return Ok(None);
        };
        if id == 0 {
            return Ok(None);
        }

        let key = vec!["getTribeData".to_string(), id.to_string()];
        let tribes = self.tribes.clone();
        let result = self
            .client
            .fetch(key, QueryOptions::default(), move || {
                let tribes = tribes.clone();
                async move { tribes.get_tribe(id).await }
            })
            .await?;
        Ok(result.flatten())
    }

    /// NewInstance mutation.
    pub async fn new_instance(
        &self,
        options: &MutationOptions<Option<TransactionReceipt>>,
    ) -> Result<Option<TransactionReceipt>, Error> {
        self.finish_mutation(self.tribes.create_instance().await, options, false)
    }

    /// AddTribe mutation.
    pub async fn add_tribe(
        &self,
        metadata: Bytes,
        options: &MutationOptions<Option<TransactionReceipt>>,
    ) -> Result<Option<TransactionReceipt>, Error> {
        self.finish_mutation(self.tribes.add_tribe(metadata).await, options, false)
    }

    /// Join mutation.
    pub async fn join(
        &self,
        id: u64,
        options: &MutationOptions<Option<TransactionReceipt>>,
    ) -> Result<Option<TransactionReceipt>, Error> {
        self.finish_mutation(self.tribes.join_tribe(id).await, options, false)
    }

    /// Leave mutation. On success the entire cache is cleared before the
    /// caller's callback runs: leaving a tribe touches membership-derived
    /// data broadly, and precise invalidation is not implemented.
    pub async fn leave(
        &self,
        options: &MutationOptions<Option<TxHash>>,
    ) -> Result<Option<TxHash>, Error> {
        self.finish_mutation(self.tribes.leave_tribe().await, options, true)
    }

    fn finish_mutation<T>(
        &self,
        result: Result<T, Error>,
        options: &MutationOptions<T>,
        clear_on_success: bool,
    ) -> Result<T, Error> {
        match result {
            Ok(value) => {
                if clear_on_success {
                    self.client.clear();
                }
                if let Some(on_success) = &options.on_success {
                    on_success(&value);
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(on_error) = &options.on_error {
                    on_error(&err);
                }
                Err(err)
            }
        }
    }
}
