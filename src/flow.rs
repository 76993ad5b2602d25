use alloy::hex;
use alloy_rlp::{Encodable, RlpEncodable};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bon::bon;
use bytes::Bytes;
use displaydoc::Display;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Domain separation tag prepended to every signable transaction message,
/// right-padded with zeros to 32 bytes per the Flow specification.
const TRANSACTION_DOMAIN_TAG: &[u8] = b"FLOW-V0.0-transaction";

/// Errors from the Flow access-node client.
#[derive(Debug, Display, Error)]
pub enum Error {
    /// Access node request failed: {0}
    Transport(String),
    /// Access node returned an error: {0}
    Api(String),
    /// Failed to decode access node response: {0}
    Decode(String),
    /// No signer is configured for this client
    SignerMissing,
    /// Signing failed: {0}
    Signing(String),
    /// Transaction {0} was not sealed within {1:?}
    SealTimeout(String, Duration),
    /// Transaction execution failed: {0}
    Execution(String),
}

/// An 8-byte Flow account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowAddress(pub [u8; 8]);

impl fmt::Display for FlowAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for FlowAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|e| Error::Decode(e.to_string()))?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("Flow addresses are 8 bytes, got {s}")))?;
        Ok(Self(bytes))
    }
}

/// Signs transaction envelopes for a Flow account. Key management and the
/// signature scheme are the implementor's concern.
#[async_trait]
pub trait FlowSigner: Send + Sync {
    /// The account the signatures belong to.
    fn address(&self) -> FlowAddress;

    /// Index of the account key used for signing.
    fn key_index(&self) -> u32;

    /// Signs the domain-tagged canonical envelope message.
    async fn sign(&self, message: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// A Cadence script/transaction argument in JSON-Cadence form.
#[derive(Debug, Clone, PartialEq)]
pub enum CadenceValue {
    UInt64(u64),
    String(String),
    Address(FlowAddress),
    Bool(bool),
}

impl CadenceValue {
    /// JSON-Cadence representation of the value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CadenceValue::UInt64(v) => json!({ "type": "UInt64", "value": v.to_string() }),
            CadenceValue::String(v) => json!({ "type": "String", "value": v }),
            CadenceValue::Address(v) => json!({ "type": "Address", "value": v.to_string() }),
            CadenceValue::Bool(v) => json!({ "type": "Bool", "value": v }),
        }
    }

    /// The exact bytes the access node expects for this argument.
    fn encoded_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    fn encoded_base64(&self) -> String {
        BASE64.encode(self.encoded_bytes())
    }
}

/// Canonical transaction payload, RLP-encoded for signing.
/// Field order is fixed by the Flow transaction specification.
#[derive(RlpEncodable)]
struct PayloadCanonical {
    script: Bytes,
    arguments: Vec<Bytes>,
    reference_block_id: Bytes,
    gas_limit: u64,
    proposal_key_address: Bytes,
    proposal_key_index: u32,
    proposal_key_sequence_number: u64,
    payer: Bytes,
    authorizers: Vec<Bytes>,
}

/// Canonical envelope: the payload plus any payload signatures. This
/// client submits single-party transactions (payer == proposer ==
/// authorizer), so the payload signature list is always empty and only the
/// envelope is signed.
#[derive(RlpEncodable)]
struct EnvelopeCanonical {
    payload: PayloadCanonical,
    payload_signatures: Vec<Bytes>,
}

/// A Flow transaction result after sealing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTransaction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub block_id: String,
    pub status: String,
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub events: Vec<FlowEvent>,
}

/// An event emitted during transaction execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub transaction_id: String,
    /// Base64-encoded JSON-Cadence event payload.
    #[serde(default)]
    pub payload: String,
}

/// A client for the Flow REST access API: script execution, transaction
/// submission, and seal polling.
#[derive(Clone)]
pub struct FlowClient {
    http: reqwest::Client,
    access_node: Url,
    signer: Option<Arc<dyn FlowSigner>>,
}

#[bon]
impl FlowClient {
    /// Creates a new builder for `FlowClient`. The signer is optional;
    /// script execution works without one.
    #[builder]
    pub fn builder(access_node: Url, signer: Option<Arc<dyn FlowSigner>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_node,
            signer,
        }
    }

    /// Whether a signer is configured, i.e. transactions can be submitted.
    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.access_node
            .join(path)
            .map_err(|e| Error::Decode(e.to_string()))
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, Error> {
        let url = self.endpoint(path)?;
        log::debug!("GET {url}");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Self::decode_response(response).await
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        let url = self.endpoint(path)?;
        log::debug!("POST {url}");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Self::decode_response(response).await
    }

    async fn decode_response(response: reqwest::Response) -> Result<serde_json::Value, Error> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Api(format!("{status}: {text}")));
        }
        serde_json::from_str(&text).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Executes a read-only Cadence script at the latest sealed block and
    /// returns the decoded JSON-Cadence result.
    pub async fn execute_script(
        &self,
        script: &str,
        args: &[CadenceValue],
    ) -> Result<serde_json::Value, Error> {
        let body = json!({
            "script": BASE64.encode(script),
            "arguments": args.iter().map(CadenceValue::encoded_base64).collect::<Vec<_>>(),
        });
        let response = self.post_json("v1/scripts?block_height=sealed", &body).await?;
        let encoded = response
            .as_str()
            .ok_or_else(|| Error::Decode("script response was not a string".into()))?;
        let decoded = BASE64
            .decode(encoded)
            .map_err(|e| Error::Decode(e.to_string()))?;
        serde_json::from_slice(&decoded).map_err(|e| Error::Decode(e.to_string()))
    }

    async fn latest_sealed_block_id(&self) -> Result<String, Error> {
        let blocks = self.get_json("v1/blocks?height=sealed").await?;
        blocks
            .get(0)
            .and_then(|b| b.pointer("/header/id"))
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Decode("no sealed block in response".into()))
    }

    async fn sequence_number(&self, address: FlowAddress, key_index: u32) -> Result<u64, Error> {
        let account = self
            .get_json(&format!("v1/accounts/{address}?expand=keys"))
            .await?;
        let keys = account
            .get("keys")
            .and_then(|k| k.as_array())
            .ok_or_else(|| Error::Decode(format!("account {address} has no keys")))?;
        for key in keys {
            let index: u32 = key
                .get("index")
                .and_then(|i| i.as_str())
                .and_then(|i| i.parse().ok())
                .unwrap_or_default();
            if index == key_index {
                return key
                    .get("sequence_number")
                    .and_then(|s| s.as_str())
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::Decode("missing sequence number".into()));
            }
        }
        Err(Error::Decode(format!(
            "key {key_index} not found on account {address}"
        )))
    }

    /// Builds, signs, and submits a transaction, returning its id. The
    /// configured signer acts as proposer, payer, and sole authorizer.
    pub async fn send_transaction(
        &self,
        script: &str,
        args: &[CadenceValue],
        gas_limit: u64,
    ) -> Result<String, Error> {
        let signer = self.signer.clone().ok_or(Error::SignerMissing)?;
        let address = signer.address();
        let key_index = signer.key_index();

        let reference_block_id = self.latest_sealed_block_id().await?;
        let sequence_number = self.sequence_number(address, key_index).await?;

        let envelope = EnvelopeCanonical {
            payload: PayloadCanonical {
                script: Bytes::copy_from_slice(script.as_bytes()),
                arguments: args
                    .iter()
                    .map(|a| Bytes::from(a.encoded_bytes()))
                    .collect(),
                reference_block_id: Bytes::from(
                    hex::decode(&reference_block_id).map_err(|e| Error::Decode(e.to_string()))?,
                ),
                gas_limit,
                proposal_key_address: Bytes::copy_from_slice(&address.0),
                proposal_key_index: key_index,
                proposal_key_sequence_number: sequence_number,
                payer: Bytes::copy_from_slice(&address.0),
                authorizers: vec![Bytes::copy_from_slice(&address.0)],
            },
            payload_signatures: Vec::new(),
        };

        let mut message = transaction_domain_tag().to_vec();
        envelope.encode(&mut message);
        let signature = signer
            .sign(&message)
            .await
            .map_err(|e| Error::Signing(e.to_string()))?;

        let address_hex = address.to_string();
        let body = json!({
            "script": BASE64.encode(script),
            "arguments": args.iter().map(CadenceValue::encoded_base64).collect::<Vec<_>>(),
            "reference_block_id": reference_block_id,
            "gas_limit": gas_limit.to_string(),
            "payer": address_hex,
            "proposal_key": {
                "address": address_hex,
                "key_index": key_index.to_string(),
                "sequence_number": sequence_number.to_string(),
            },
            "authorizers": [address_hex],
            "envelope_signatures": [{
                "address": address_hex,
                "key_index": key_index.to_string(),
                "signature": BASE64.encode(&signature),
            }],
        });

        let response = self.post_json("v1/transactions", &body).await?;
        let id = response
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| Error::Decode("transaction response missing id".into()))?;
        log::debug!("Submitted Flow transaction {id}");
        Ok(id.to_string())
    }

    /// Polls the transaction result until it is sealed or the timeout
    /// elapses. A sealed result with an error message is an execution
    /// failure, not a sealed success.
    pub async fn wait_for_seal(
        &self,
        transaction_id: &str,
        timeout: Duration,
    ) -> Result<FlowTransaction, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            let result = self
                .get_json(&format!("v1/transaction_results/{transaction_id}"))
                .await?;
            let status = result
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or_default();
            if status.eq_ignore_ascii_case("sealed") {
                let mut sealed: FlowTransaction =
                    serde_json::from_value(result).map_err(|e| Error::Decode(e.to_string()))?;
                sealed.id = transaction_id.to_string();
                if !sealed.error_message.is_empty() {
                    return Err(Error::Execution(sealed.error_message));
                }
                log::debug!("Flow transaction {transaction_id} sealed");
                return Ok(sealed);
            }

            if Instant::now() > deadline {
                return Err(Error::SealTimeout(transaction_id.to_string(), timeout));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Submits a transaction and waits for it to seal.
    pub async fn send_and_seal(
        &self,
        script: &str,
        args: &[CadenceValue],
        gas_limit: u64,
        timeout: Duration,
    ) -> Result<FlowTransaction, Error> {
        let id = self.send_transaction(script, args, gas_limit).await?;
        self.wait_for_seal(&id, timeout).await
    }
}

fn transaction_domain_tag() -> [u8; 32] {
    let mut tag = [0u8; 32];
    tag[..TRANSACTION_DOMAIN_TAG.len()].copy_from_slice(TRANSACTION_DOMAIN_TAG);
    tag
}
