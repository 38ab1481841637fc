//! CometBFT RPC client
//!
//! Typed schemas for the four endpoints the harness reads (`status`, `block`,
//! `block_results`, `tx`) behind the [`ChainRpc`] trait. The RPC client is
//! rebound every time a node container starts, so construction goes through
//! an [`RpcConnector`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, Result};

/// CometBFT encodes 64-bit integers as strings; accept both forms
fn de_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(u64),
    }

    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Str(s) => s.parse().map_err(de::Error::custom),
        StrOrNum::Num(n) => Ok(n),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub moniker: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncInfo {
    #[serde(deserialize_with = "de_u64")]
    pub latest_block_height: u64,
    pub catching_up: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub node_info: NodeInfo,
    pub sync_info: SyncInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    #[serde(default)]
    pub chain_id: String,
    #[serde(deserialize_with = "de_u64")]
    pub height: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockData {
    /// Base64-encoded raw transactions
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub txs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(default)]
    pub data: BlockData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockResponse {
    pub block: Block,
}

impl BlockResponse {
    /// Raw transaction bytes in block order
    pub fn raw_txs(&self) -> Result<Vec<Vec<u8>>> {
        self.block
            .data
            .txs
            .iter()
            .map(|tx| {
                base64::engine::general_purpose::STANDARD
                    .decode(tx)
                    .map_err(|e| HarnessError::Decode(format!("block tx is not base64: {}", e)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub attributes: Vec<EventAttribute>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecTxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub events: Vec<AbciEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockResults {
    #[serde(deserialize_with = "de_u64")]
    pub height: u64,
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub txs_results: Vec<ExecTxResult>,
    /// CometBFT >= 0.38
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub finalize_block_events: Vec<AbciEvent>,
    /// CometBFT < 0.38
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub begin_block_events: Vec<AbciEvent>,
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub end_block_events: Vec<AbciEvent>,
}

impl BlockResults {
    /// Events emitted by the block itself rather than any transaction
    pub fn block_events(&self) -> Vec<AbciEvent> {
        if !self.finalize_block_events.is_empty() {
            return self.finalize_block_events.clone();
        }
        self.begin_block_events
            .iter()
            .chain(self.end_block_events.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxResponse {
    pub hash: String,
    #[serde(deserialize_with = "de_u64")]
    pub height: u64,
    #[serde(default)]
    pub index: u32,
    pub tx_result: ExecTxResult,
    /// Base64-encoded raw transaction
    #[serde(default)]
    pub tx: String,
}

fn de_null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn status(&self) -> Result<Status>;

    async fn block(&self, height: u64) -> Result<BlockResponse>;

    async fn block_results(&self, height: u64) -> Result<BlockResults>;

    /// Look up a transaction by hex hash.
    ///
    /// A transaction the node has not indexed yet is
    /// [`HarnessError::NotYetVisible`], not a transport failure.
    async fn tx(&self, hash: &str) -> Result<TxResponse>;

    /// Latest block height
    async fn height(&self) -> Result<u64> {
        Ok(self.status().await?.sync_info.latest_block_height)
    }
}

/// Creates an RPC client for a freshly bound host address
pub trait RpcConnector: Send + Sync {
    fn connect(&self, addr: &str) -> Result<Arc<dyn ChainRpc>>;
}

/// JSON-RPC 2.0 envelope returned by CometBFT
#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<String>,
}

impl RpcErrorBody {
    fn describe(&self) -> String {
        match &self.data {
            Some(data) => format!("{} ({}): {}", self.message, self.code, data),
            None => format!("{} ({})", self.message, self.code),
        }
    }
}

/// HTTP client for a CometBFT RPC endpoint
#[derive(Debug, Clone)]
pub struct CometRpcClient {
    base_url: String,
    client: reqwest::Client,
}

impl CometRpcClient {
    /// `addr` may be `tcp://host:port`, `http://host:port` or bare `host:port`
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarnessError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: normalize_rpc_url(addr),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("RPC {} {:?}", url, query);

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let envelope: RpcEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            HarnessError::Decode(format!("{} returned {} with unexpected body: {}", path, status, e))
        })?;

        if let Some(err) = envelope.error {
            let description = err.describe();
            if path == "tx" && description.contains("not found") {
                return Err(HarnessError::NotYetVisible(description));
            }
            return Err(HarnessError::Transport(format!("{}: {}", path, description)));
        }

        envelope
            .result
            .ok_or_else(|| HarnessError::Decode(format!("{} response has no result", path)))
    }
}

#[async_trait]
impl ChainRpc for CometRpcClient {
    async fn status(&self) -> Result<Status> {
        self.call("status", &[]).await
    }

    async fn block(&self, height: u64) -> Result<BlockResponse> {
        self.call("block", &[("height", height.to_string())]).await
    }

    async fn block_results(&self, height: u64) -> Result<BlockResults> {
        self.call("block_results", &[("height", height.to_string())]).await
    }

    async fn tx(&self, hash: &str) -> Result<TxResponse> {
        let hash = hash.trim_start_matches("0x");
        self.call("tx", &[("hash", format!("0x{}", hash))]).await
    }
}

/// Builds [`CometRpcClient`]s with a fixed request timeout
#[derive(Debug, Clone)]
pub struct HttpRpcConnector {
    timeout: Duration,
}

impl HttpRpcConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpRpcConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl RpcConnector for HttpRpcConnector {
    fn connect(&self, addr: &str) -> Result<Arc<dyn ChainRpc>> {
        Ok(Arc::new(CometRpcClient::new(addr, self.timeout)?))
    }
}

fn normalize_rpc_url(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if let Some(rest) = addr.strip_prefix("tcp://") {
        format!("http://{}", rest)
    } else if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rpc_url() {
        assert_eq!(normalize_rpc_url("tcp://127.0.0.1:26657"), "http://127.0.0.1:26657");
        assert_eq!(normalize_rpc_url("127.0.0.1:26657"), "http://127.0.0.1:26657");
        assert_eq!(normalize_rpc_url("https://rpc.example.com/"), "https://rpc.example.com");
    }

    #[test]
    fn test_status_parses_string_heights() {
        let raw = r#"{
            "node_info": {"id": "abcd", "network": "gaia-1", "moniker": "val-0"},
            "sync_info": {"latest_block_height": "1234", "catching_up": false}
        }"#;
        let status: Status = serde_json::from_str(raw).unwrap();
        assert_eq!(status.sync_info.latest_block_height, 1234);
        assert!(!status.sync_info.catching_up);
    }

    #[test]
    fn test_block_results_null_fields() {
        let raw = r#"{
            "height": "7",
            "txs_results": null,
            "finalize_block_events": null
        }"#;
        let results: BlockResults = serde_json::from_str(raw).unwrap();
        assert_eq!(results.height, 7);
        assert!(results.txs_results.is_empty());
        assert!(results.block_events().is_empty());
    }

    #[test]
    fn test_block_events_fallback_to_begin_end() {
        let raw = r#"{
            "height": "7",
            "begin_block_events": [{"type": "mint", "attributes": [{"key": "amount", "value": "10"}]}],
            "end_block_events": [{"type": "validator_updates", "attributes": []}]
        }"#;
        let results: BlockResults = serde_json::from_str(raw).unwrap();
        let events = results.block_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "mint");
        assert_eq!(events[1].kind, "validator_updates");
    }

    #[test]
    fn test_raw_txs_decodes_base64() {
        let raw = r#"{"block": {"header": {"chain_id": "c", "height": "3"}, "data": {"txs": ["AQID"]}}}"#;
        let block: BlockResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(block.raw_txs().unwrap(), vec![vec![1u8, 2, 3]]);
    }

    #[test]
    fn test_envelope_error_body() {
        let raw = r#"{"jsonrpc":"2.0","id":-1,"error":{"code":-32603,"message":"Internal error","data":"tx (ABC) not found"}}"#;
        let envelope: RpcEnvelope<TxResponse> = serde_json::from_str(raw).unwrap();
        let err = envelope.error.unwrap();
        assert!(err.describe().contains("not found"));
        assert!(envelope.result.is_none());
    }
}
