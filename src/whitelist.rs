use std::time::Duration;

use crate::flow::{CadenceValue, Error, FlowAddress, FlowClient, FlowTransaction};

/// How long to poll for sealing before giving up.
const SEAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Gas limit used by every registry transaction.
const TRANSACTION_LIMIT: u64 = 9999;

const GET_WHITELISTS_SCRIPT: &str = r#"
import Gateway from 0xGateway

pub fun main(account: Address): {UInt64: Gateway.WhitelistInfo} {
    return Gateway.getWhitelists(account: account)
}
"#;

const GET_WHITELIST_SCRIPT: &str = r#"
import Gateway from 0xGateway

pub fun main(account: Address, whitelistId: UInt64): Gateway.WhitelistInfo? {
    return Gateway.getWhitelist(account: account, whitelistId: whitelistId)
}
"#;

const CREATE_WHITELIST_TRANSACTION: &str = r#"
import Gateway from 0xGateway

transaction(name: String) {

    let Registry: &Gateway.Registry

    prepare(acct: AuthAccount) {
        self.Registry = acct.borrow<&Gateway.Registry>(from: Gateway.RegistryStoragePath)
                                                ?? panic("Could not borrow the Registry from the signer.")
    }

    execute {
        self.Registry.createWhitelist(name: name)
        log("Created the Whitelist.")
    }
}
"#;

const ADD_ADDRESS_TRANSACTION: &str = r#"
import Gateway from 0xGateway

transaction(whitelistId: UInt64, account: Address) {

    let Registry: &Gateway.Registry

    prepare(acct: AuthAccount) {
        self.Registry = acct.borrow<&Gateway.Registry>(from: Gateway.RegistryStoragePath)
                                                ?? panic("Could not borrow the Registry from the signer.")
    }

    execute {
        self.Registry.addAddress(whitelistId: whitelistId, account: account)
        log("Added the address to the Whitelist.")
    }
}
"#;

const DELETE_WHITELIST_TRANSACTION: &str = r#"
import Gateway from 0xGateway

transaction(whitelistId: UInt64) {

    let Registry: &Gateway.Registry

    prepare(acct: AuthAccount) {
        self.Registry = acct.borrow<&Gateway.Registry>(from: Gateway.RegistryStoragePath)
                                                ?? panic("Could not borrow the Registry from the signer.")
    }

    execute {
        self.Registry.deleteWhitelist(whitelistId: whitelistId)
        log("Removed the Whitelist.")
    }
}
"#;

/// An entry from the registry's whitelist map: the numeric id and the
/// opaque JSON-Cadence info blob, passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct WhitelistRecord {
    pub id: u64,
    pub info: serde_json::Value,
}

/// Adapter for the Gateway whitelist registry on Flow: one operation per
/// contract entry point.
///
/// Write operations submit a transaction and wait for it to seal; without
/// a signer they are no-ops returning `None`, matching the not-yet-
/// connected policy of the Ethereum adapters.
#[derive(Clone)]
pub struct WhitelistClient {
    flow: FlowClient,
    registry_address: FlowAddress,
}

impl WhitelistClient {
    pub fn new(flow: FlowClient, registry_address: FlowAddress) -> Self {
        Self {
            flow,
            registry_address,
        }
    }

    /// Substitutes the `0xGateway` import placeholder with the configured
    /// registry address.
    fn cadence(&self, source: &str) -> String {
        source.replace("0xGateway", &self.registry_address.to_string())
    }

    /// Fetches all whitelists registered under an account, in id order.
    pub async fn get_whitelists(&self, account: FlowAddress) -> Result<Vec<WhitelistRecord>, Error> {
        let result = self
            .flow
            .execute_script(
                &self.cadence(GET_WHITELISTS_SCRIPT),
                &[CadenceValue::Address(account)],
            )
            .await?;

        // JSON-Cadence dictionaries arrive as a list of key/value pairs.
        let pairs = result
            .pointer("/value")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut records = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let id = pair
                .pointer("/key/value")
                .and_then(|v| v.as_str())
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| Error::Decode("whitelist entry missing id".into()))?;
            let info = pair.pointer("/value").cloned().unwrap_or_default();
            records.push(WhitelistRecord { id, info });
        }
        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    /// Fetches one whitelist by id, or `None` if the registry has no such
    /// entry.
    pub async fn get_whitelist(
        &self,
        account: FlowAddress,
        whitelist_id: u64,
    ) -> Result<Option<WhitelistRecord>, Error> {
        let result = self
            .flow
            .execute_script(
                &self.cadence(GET_WHITELIST_SCRIPT),
                &[
                    CadenceValue::Address(account),
                    CadenceValue::UInt64(whitelist_id),
                ],
            )
            .await?;

        // Optionals decode as {"type": "Optional", "value": null | inner}.
        match result.pointer("/value") {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(info) => Ok(Some(WhitelistRecord {
                id: whitelist_id,
                info: info.clone(),
            })),
        }
    }

    /// Creates a whitelist in the signer's registry and waits for sealing.
    pub async fn create_whitelist(&self, name: &str) -> Result<Option<FlowTransaction>, Error> {
        if !self.flow.has_signer() {
            return Ok(None);
        }
        let sealed = self
            .flow
            .send_and_seal(
                &self.cadence(CREATE_WHITELIST_TRANSACTION),
                &[CadenceValue::String(name.to_string())],
                TRANSACTION_LIMIT,
                SEAL_TIMEOUT,
            )
            .await?;
        Ok(Some(sealed))
    }

    /// Adds an account to a whitelist and waits for sealing.
    pub async fn add_address(
        &self,
        whitelist_id: u64,
        account: FlowAddress,
    ) -> Result<Option<FlowTransaction>, Error> {
        if !self.flow.has_signer() {
            return Ok(None);
        }
        let sealed = self
            .flow
            .send_and_seal(
                &self.cadence(ADD_ADDRESS_TRANSACTION),
                &[
                    CadenceValue::UInt64(whitelist_id),
                    CadenceValue::Address(account),
                ],
                TRANSACTION_LIMIT,
                SEAL_TIMEOUT,
            )
            .await?;
        Ok(Some(sealed))
    }

    /// Deletes a whitelist by id and returns the sealed transaction.
    pub async fn delete_whitelist(
        &self,
        whitelist_id: u64,
    ) -> Result<Option<FlowTransaction>, Error> {
        if !self.flow.has_signer() {
            return Ok(None);
        }
        let sealed = self
            .flow
            .send_and_seal(
                &self.cadence(DELETE_WHITELIST_TRANSACTION),
                &[CadenceValue::UInt64(whitelist_id)],
                TRANSACTION_LIMIT,
                SEAL_TIMEOUT,
            )
            .await?;
        Ok(Some(sealed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use url::Url;

    fn client() -> WhitelistClient {
        let flow = FlowClient::builder()
            .access_node(Url::parse("http://127.0.0.1:1").unwrap())
            .build();
        WhitelistClient::new(flow, FlowAddress::from_str("0xf8d6e0586b0a20c7").unwrap())
    }

    #[test]
    fn import_placeholder_is_substituted() {
        let client = client();
        let cadence = client.cadence(DELETE_WHITELIST_TRANSACTION);
        assert!(cadence.contains("import Gateway from 0xf8d6e0586b0a20c7"));
        assert!(!cadence.contains("0xGateway"));
    }

    #[tokio::test]
    async fn writes_without_a_signer_are_no_ops() {
        let client = client();
        assert!(client.create_whitelist("vip").await.unwrap().is_none());
        assert!(
            client
                .add_address(1, FlowAddress([0x01; 8]))
                .await
                .unwrap()
                .is_none()
        );
        assert!(client.delete_whitelist(1).await.unwrap().is_none());
    }
}
