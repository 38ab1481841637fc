//! Block decoder
//!
//! Turns a committed block into one [`TxRecord`] per decodable transaction,
//! plus a synthetic record carrying block-level events.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use prost::Message;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{HarnessError, Result};
use crate::node::Node;
use crate::rpc::{AbciEvent, BlockResults, ChainRpc};

/// Payload of the record carrying block-level events
pub const SYNTHETIC_BLOCK_PAYLOAD: &str =
    r#"{"data":"finalize_block","note":"this is a transaction artificially created for debugging purposes"}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxAttribute {
    pub event_type: String,
    pub key: String,
    pub value: String,
}

/// One decoded transaction (or the synthetic block-event record)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    /// JSON payload
    pub data: Vec<u8>,
    /// Event attributes flattened in emission order
    pub events: Vec<TxAttribute>,
    pub synthetic: bool,
}

impl TxRecord {
    pub fn data_json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

/// Decodes raw transaction bytes into a JSON document
pub trait TxDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<Value>;
}

mod proto {
    //! Minimal cosmos.tx.v1beta1 messages

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TxRaw {
        #[prost(bytes = "vec", tag = "1")]
        pub body_bytes: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub auth_info_bytes: Vec<u8>,
        #[prost(bytes = "vec", repeated, tag = "3")]
        pub signatures: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Any {
        #[prost(string, tag = "1")]
        pub type_url: String,
        #[prost(bytes = "vec", tag = "2")]
        pub value: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TxBody {
        #[prost(message, repeated, tag = "1")]
        pub messages: Vec<Any>,
        #[prost(string, tag = "2")]
        pub memo: String,
        #[prost(uint64, tag = "3")]
        pub timeout_height: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Coin {
        #[prost(string, tag = "1")]
        pub denom: String,
        #[prost(string, tag = "2")]
        pub amount: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Fee {
        #[prost(message, repeated, tag = "1")]
        pub amount: Vec<Coin>,
        #[prost(uint64, tag = "2")]
        pub gas_limit: u64,
        #[prost(string, tag = "3")]
        pub payer: String,
        #[prost(string, tag = "4")]
        pub granter: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SignerInfo {
        #[prost(message, optional, tag = "1")]
        pub public_key: Option<Any>,
        #[prost(uint64, tag = "3")]
        pub sequence: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AuthInfo {
        #[prost(message, repeated, tag = "1")]
        pub signer_infos: Vec<SignerInfo>,
        #[prost(message, optional, tag = "2")]
        pub fee: Option<Fee>,
    }
}

/// Understands protobuf `TxRaw` envelopes and legacy JSON transactions
#[derive(Debug, Clone, Copy, Default)]
pub struct CosmosTxDecoder;

impl CosmosTxDecoder {
    fn decode_json(raw: &[u8]) -> Result<Value> {
        let value: Value = serde_json::from_slice(raw)?;
        if !value.is_object() {
            return Err(HarnessError::Decode("legacy tx is not a JSON object".to_string()));
        }
        Ok(value)
    }

    fn decode_proto(raw: &[u8]) -> Result<Value> {
        let tx = proto::TxRaw::decode(raw).map_err(|e| HarnessError::Decode(format!("TxRaw: {}", e)))?;
        let body = proto::TxBody::decode(tx.body_bytes.as_slice())
            .map_err(|e| HarnessError::Decode(format!("TxBody: {}", e)))?;
        let auth_info = proto::AuthInfo::decode(tx.auth_info_bytes.as_slice())
            .map_err(|e| HarnessError::Decode(format!("AuthInfo: {}", e)))?;

        if body.messages.is_empty() {
            return Err(HarnessError::Decode("tx has no messages".to_string()));
        }

        let any = |a: &proto::Any| json!({ "@type": a.type_url, "value": BASE64.encode(&a.value) });

        let messages: Vec<Value> = body.messages.iter().map(any).collect();
        let signer_infos: Vec<Value> = auth_info
            .signer_infos
            .iter()
            .map(|s| {
                json!({
                    "public_key": s.public_key.as_ref().map(any),
                    "sequence": s.sequence.to_string(),
                })
            })
            .collect();
        let fee = auth_info.fee.map(|fee| {
            json!({
                "amount": fee
                    .amount
                    .iter()
                    .map(|c| json!({ "denom": c.denom, "amount": c.amount }))
                    .collect::<Vec<_>>(),
                "gas_limit": fee.gas_limit.to_string(),
                "payer": fee.payer,
                "granter": fee.granter,
            })
        });

        Ok(json!({
            "body": {
                "messages": messages,
                "memo": body.memo,
                "timeout_height": body.timeout_height.to_string(),
            },
            "auth_info": {
                "signer_infos": signer_infos,
                "fee": fee,
            },
            "signatures": tx.signatures.iter().map(|s| BASE64.encode(s)).collect::<Vec<_>>(),
        }))
    }
}

impl TxDecoder for CosmosTxDecoder {
    fn decode(&self, raw: &[u8]) -> Result<Value> {
        match raw.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Self::decode_json(raw),
            Some(_) => Self::decode_proto(raw),
            None => Err(HarnessError::Decode("empty transaction".to_string())),
        }
    }
}

/// CometBFT 0.34 base64-encodes event attribute keys and values
fn decode_attribute(raw: &str) -> Option<String> {
    let bytes = BASE64.decode(raw).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return None;
    }
    Some(text)
}

/// Whether every attribute key in the block is base64 text.
///
/// Plain keys such as `amount` or `sender` are never valid padded base64,
/// so one plain key anywhere means the block uses plain attributes.
fn base64_attributes(results: &BlockResults, block_events: &[AbciEvent]) -> bool {
    let mut keys = results
        .txs_results
        .iter()
        .flat_map(|r| r.events.iter())
        .chain(block_events.iter())
        .flat_map(|e| e.attributes.iter())
        .map(|a| a.key.as_str())
        .peekable();

    keys.peek().is_some() && keys.all(|k| decode_attribute(k).is_some())
}

fn flatten(events: &[AbciEvent], encoded: bool) -> Vec<TxAttribute> {
    let text = |raw: &str| {
        if encoded {
            decode_attribute(raw).unwrap_or_else(|| raw.to_string())
        } else {
            raw.to_string()
        }
    };

    events
        .iter()
        .flat_map(|event| {
            event.attributes.iter().map(move |attr| TxAttribute {
                event_type: event.kind.clone(),
                key: text(&attr.key),
                value: attr.value.as_deref().map(text).unwrap_or_default(),
            })
        })
        .collect()
}

/// Decode every transaction committed at `height`.
///
/// Transactions the decoder rejects are logged and skipped. A trailing
/// synthetic record is added when the block emitted block-level events.
pub async fn find_txs(rpc: &dyn ChainRpc, decoder: &dyn TxDecoder, height: u64) -> Result<Vec<TxRecord>> {
    let (block, results) = tokio::try_join!(rpc.block(height), rpc.block_results(height))?;

    let raw_txs = block.raw_txs()?;
    if raw_txs.len() != results.txs_results.len() {
        return Err(HarnessError::Decode(format!(
            "block {} has {} txs but {} results",
            height,
            raw_txs.len(),
            results.txs_results.len()
        )));
    }

    let block_events = results.block_events();
    let encoded = base64_attributes(&results, &block_events);

    let mut records = Vec::with_capacity(raw_txs.len() + 1);
    for (i, (raw, result)) in raw_txs.iter().zip(results.txs_results.iter()).enumerate() {
        let decoded = match decoder.decode(raw) {
            Ok(v) => v,
            Err(e) => {
                info!(height, index = i, "Failed to decode tx: {}", e);
                continue;
            }
        };
        records.push(TxRecord {
            data: serde_json::to_vec(&decoded)?,
            events: flatten(&result.events, encoded),
            synthetic: false,
        });
    }

    if !block_events.is_empty() {
        records.push(TxRecord {
            data: SYNTHETIC_BLOCK_PAYLOAD.as_bytes().to_vec(),
            events: flatten(&block_events, encoded),
            synthetic: true,
        });
    }

    Ok(records)
}

impl Node {
    /// Transactions committed at `height`, decoded with [`CosmosTxDecoder`]
    pub async fn find_txs(&self, height: u64) -> Result<Vec<TxRecord>> {
        let rpc = self.rpc()?;
        find_txs(rpc.as_ref(), &CosmosTxDecoder, height).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proto_tx(memo: &str) -> Vec<u8> {
        let body = proto::TxBody {
            messages: vec![proto::Any {
                type_url: "/cosmos.bank.v1beta1.MsgSend".into(),
                value: vec![1, 2, 3],
            }],
            memo: memo.into(),
            timeout_height: 0,
        };
        let auth_info = proto::AuthInfo {
            signer_infos: vec![],
            fee: Some(proto::Fee {
                amount: vec![proto::Coin {
                    denom: "stake".into(),
                    amount: "200".into(),
                }],
                gas_limit: 200_000,
                payer: String::new(),
                granter: String::new(),
            }),
        };
        proto::TxRaw {
            body_bytes: body.encode_to_vec(),
            auth_info_bytes: auth_info.encode_to_vec(),
            signatures: vec![vec![9; 64]],
        }
        .encode_to_vec()
    }

    #[test]
    fn test_decode_proto_tx() {
        let value = CosmosTxDecoder.decode(&proto_tx("hi")).unwrap();
        assert_eq!(value["body"]["memo"], "hi");
        assert_eq!(value["body"]["messages"][0]["@type"], "/cosmos.bank.v1beta1.MsgSend");
        assert_eq!(value["auth_info"]["fee"]["gas_limit"], "200000");
        assert_eq!(value["signatures"].as_array().map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_decode_legacy_json_tx() {
        let raw = br#"{"type":"cosmos-sdk/StdTx","value":{"msg":[]}}"#;
        let value = CosmosTxDecoder.decode(raw).unwrap();
        assert_eq!(value["type"], "cosmos-sdk/StdTx");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(CosmosTxDecoder.decode(&[0xff, 0xff, 0xff]).is_err());
        assert!(CosmosTxDecoder.decode(b"").is_err());
        assert!(CosmosTxDecoder.decode(b"[1,2]").is_err());
    }

    #[test]
    fn test_flatten_keeps_order() {
        let events: Vec<AbciEvent> = serde_json::from_value(json!([
            {"type": "transfer", "attributes": [
                {"key": "recipient", "value": "a"},
                {"key": "amount", "value": "1stake"}
            ]},
            {"type": "message", "attributes": [{"key": "module", "value": null}]}
        ]))
        .unwrap();

        let flat = flatten(&events, false);
        let keys: Vec<_> = flat.iter().map(|a| (a.event_type.as_str(), a.key.as_str())).collect();
        assert_eq!(
            keys,
            vec![("transfer", "recipient"), ("transfer", "amount"), ("message", "module")]
        );
        assert_eq!(flat[2].value, "");
    }

    #[test]
    fn test_decode_attribute() {
        assert_eq!(decode_attribute("cmVjaXBpZW50").as_deref(), Some("recipient"));
        assert_eq!(decode_attribute("Y29zbW9zMWFiYw==").as_deref(), Some("cosmos1abc"));
        assert_eq!(decode_attribute("amount"), None);
        assert_eq!(decode_attribute("sender"), None);
        assert_eq!(decode_attribute("receiver"), None);
        assert_eq!(decode_attribute(""), None);
    }

    #[test]
    fn test_encoded_values_fall_back_to_raw() {
        let events: Vec<AbciEvent> = serde_json::from_value(json!([
            {"type": "transfer", "attributes": [
                {"key": "YW1vdW50", "value": "not base64!"}
            ]}
        ]))
        .unwrap();

        let flat = flatten(&events, true);
        assert_eq!(flat[0].key, "amount");
        assert_eq!(flat[0].value, "not base64!");
    }
}
