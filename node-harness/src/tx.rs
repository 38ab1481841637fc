//! Transaction engine
//!
//! Every submission on a node goes through [`Node::exec_tx`], which holds the
//! node's lock from broadcast until two further blocks are committed. The
//! higher-level flows below (contracts, IBC, governance, bank) compose
//! `exec_tx` with a query step and never take the lock themselves.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::command::sequencer_keyring_dir;
use crate::error::{HarnessError, Result};
use crate::node::Node;
use crate::readiness;
use crate::retry::{RetryError, RetryPolicy};
use crate::rpc::TxResponse;

/// Blocks to wait after an accepted broadcast
const BLOCKS_AFTER_TX: u64 = 2;

/// Blocks to wait after `wasm store` before the code shows in `list-code`
const BLOCKS_AFTER_STORE: u64 = 5;

/// Broadcast response printed by `<bin> tx ... --output json`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxResult {
    #[serde(rename = "txhash")]
    pub hash: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
}

/// A transaction looked up on chain after broadcast
#[derive(Debug, Clone)]
pub struct ConfirmedTx {
    pub hash: String,
    pub height: u64,
    pub code: u32,
    pub log: String,
    pub response: TxResponse,
}

impl From<TxResponse> for ConfirmedTx {
    fn from(response: TxResponse) -> Self {
        Self {
            hash: response.hash.clone(),
            height: response.height,
            code: response.tx_result.code,
            log: response.tx_result.log.clone(),
            response,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletAmount {
    pub address: String,
    pub denom: String,
    pub amount: u128,
}

impl WalletAmount {
    fn coin(&self) -> String {
        format!("{}{}", self.amount, self.denom)
    }
}

/// Packet timeout of an IBC transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketTimeout {
    /// Absolute timestamp in nanoseconds
    Timestamp(u64),
    /// Revision height on the counterparty (revision number 0)
    Height(u64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOptions {
    pub timeout: Option<PacketTimeout>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

/// Gov v1 proposal written to `proposal.json`
#[derive(Debug, Clone, Serialize)]
pub struct TxProposal {
    pub messages: Vec<serde_json::Value>,
    pub metadata: String,
    pub deposit: String,
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareUpgradeProposal {
    pub deposit: String,
    pub title: String,
    pub name: String,
    pub description: String,
    pub height: u64,
    pub info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextProposal {
    pub deposit: String,
    pub title: String,
    pub description: String,
    pub expedited: bool,
}

/// `gov proposal <id>` output, across SDK versions
#[derive(Debug, Clone, Deserialize)]
pub struct ProposalResponse {
    #[serde(alias = "proposal_id")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub total_deposit: Vec<Coin>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DenomUnit {
    pub denom: String,
    #[serde(default)]
    pub exponent: u32,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BankMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub denom_units: Vec<DenomUnit>,
    pub base: String,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
struct BankMetadataResponse {
    metadata: BankMetadata,
}

/// `auth module-account <name>` output
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleAccountResponse {
    pub account: ModuleAccount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleAccount {
    #[serde(rename = "@type", default)]
    pub type_url: String,
    pub base_account: BaseAccount,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaseAccount {
    pub address: String,
    #[serde(default)]
    pub pub_key: Option<serde_json::Value>,
    #[serde(default)]
    pub account_number: String,
    #[serde(default)]
    pub sequence: String,
}

/// One change of a legacy `param-change` proposal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamChange {
    pub subspace: String,
    pub key: String,
    /// Raw JSON value of the parameter
    pub value: serde_json::Value,
}

/// Legacy params proposal written to `<sha256>.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamChangeProposal {
    pub title: String,
    pub description: String,
    pub changes: Vec<ParamChange>,
    pub deposit: String,
}

/// `params subspace <subspace> <key>` output
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParamValue {
    pub subspace: String,
    pub key: String,
    /// JSON-encoded value as stored by the params module
    pub value: String,
}

/// Sequencer description sent when registering with the hub
const SEQUENCER_DESCRIPTION: &str =
    r#"{"Moniker":"myrollapp-sequencer","Identity":"","Website":"","SecurityContact":"","Details":""}"#;

/// Permissioned-address detail of a newly created rollapp
const ROLLAPP_DETAIL: &str = r#"{"Addresses":[]}"#;

#[derive(Debug, Deserialize)]
struct CodeInfosResponse {
    #[serde(default)]
    code_infos: Vec<CodeInfo>,
}

#[derive(Debug, Deserialize)]
struct CodeInfo {
    code_id: String,
}

#[derive(Debug, Deserialize)]
struct ContractsResponse {
    #[serde(default)]
    contracts: Vec<String>,
}

/// Parse the broadcast JSON printed on stdout
pub fn parse_tx_result(stdout: &[u8]) -> Result<TxResult> {
    serde_json::from_slice(stdout).map_err(|e| {
        HarnessError::Decode(format!(
            "unexpected tx output ({}): {}",
            e,
            String::from_utf8_lossy(stdout).trim()
        ))
    })
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, raw: &[u8]) -> Result<T> {
    serde_json::from_slice(raw).map_err(|e| HarnessError::Decode(format!("{}: {}", what, e)))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| HarnessError::Config(format!("{} has no file name", path.display())))
}

impl Node {
    /// Broadcast a transaction signed by `key_name`.
    ///
    /// Submissions on one node never overlap: the lock is held from
    /// broadcast until two more blocks have been committed.
    pub async fn exec_tx<S: AsRef<str>>(&self, key_name: &str, args: &[S]) -> Result<TxResult> {
        let _guard = self.lock.lock().await;

        let cmd = self.with_builder(false, |b| b.tx(key_name, args));
        let output = self.exec(&cmd).await?;
        let result = parse_tx_result(&output.stdout)?;

        if result.code != 0 {
            return Err(HarnessError::RejectedTransaction {
                hash: result.hash,
                code: result.code,
                raw_log: result.raw_log,
            });
        }

        debug!(node = %self.name(), "Broadcast tx {}", result.hash);
        self.wait_for_blocks(BLOCKS_AFTER_TX).await?;
        Ok(result)
    }

    /// Look up a committed transaction, retrying while it is not indexed yet
    pub async fn get_transaction(&self, hash: &str) -> Result<ConfirmedTx> {
        let rpc = self.rpc()?;
        let outcome = RetryPolicy::tx_lookup()
            .run(&self.ctx.cancel, HarnessError::is_transient, |_| {
                let rpc = rpc.clone();
                async move { rpc.tx(hash).await }
            })
            .await;

        match outcome {
            Ok(response) => Ok(response.into()),
            Err(RetryError::Cancelled) => Err(HarnessError::Cancelled),
            Err(RetryError::Aborted(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => Err(HarnessError::Transport(format!(
                "transaction {} not found after {} attempts: {}",
                hash, attempts, last
            ))),
        }
    }

    /// Confirm `hash` on chain and fail if it was not accepted
    async fn confirm(&self, hash: &str) -> Result<ConfirmedTx> {
        let tx = self.get_transaction(hash).await?;
        if tx.code != 0 {
            return Err(HarnessError::RejectedTransaction {
                hash: tx.hash,
                code: tx.code,
                raw_log: tx.log,
            });
        }
        Ok(tx)
    }

    /// Wait until the chain height has advanced by `delta`
    pub async fn wait_for_blocks(&self, delta: u64) -> Result<u64> {
        let rpc = self.rpc()?;
        let policy = readiness::block_wait_policy(delta, self.chain().block_time);
        readiness::wait_for_blocks(rpc.as_ref(), delta, &policy, &self.ctx.cancel).await
    }

    /// Upload a wasm contract and return its code id.
    ///
    /// Assumes no other code was stored concurrently: the newest entry of
    /// `list-code --reverse` is taken as ours.
    pub async fn store_contract(&self, key_name: &str, path: &Path, extra: &[&str]) -> Result<String> {
        let file = file_name(path)?;
        self.copy_file(path, &file).await?;

        let wasm_path = format!("{}/{}", self.home_dir(), file);
        let mut args = vec!["wasm", "store", wasm_path.as_str(), "--gas", "auto"];
        args.extend_from_slice(extra);
        self.exec_tx(key_name, &args).await?;

        self.wait_for_blocks(BLOCKS_AFTER_STORE).await?;

        let stdout = self.exec_query(&["wasm", "list-code", "--reverse"]).await?;
        let res: CodeInfosResponse = decode("wasm list-code", &stdout)?;
        let code = res
            .code_infos
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::NotFound("no stored wasm code".to_string()))?;

        info!(node = %self.name(), "Stored contract {} as code {}", file, code.code_id);
        Ok(code.code_id)
    }

    /// Instantiate `code_id` and return the contract address.
    ///
    /// Takes the last contract listed for the code id.
    pub async fn instantiate_contract(
        &self,
        key_name: &str,
        code_id: &str,
        init_msg: &str,
        no_admin: bool,
        extra: &[&str],
    ) -> Result<String> {
        let mut args = vec!["wasm", "instantiate", code_id, init_msg, "--label", "wasm-contract"];
        args.extend_from_slice(extra);
        if no_admin {
            args.push("--no-admin");
        }

        let result = self.exec_tx(key_name, &args).await?;
        self.confirm(&result.hash).await?;

        let stdout = self
            .exec_query(&["wasm", "list-contract-by-code", code_id])
            .await?;
        let res: ContractsResponse = decode("wasm list-contract-by-code", &stdout)?;
        res.contracts
            .last()
            .cloned()
            .ok_or_else(|| HarnessError::NotFound(format!("no contracts for code {}", code_id)))
    }

    pub async fn execute_contract(
        &self,
        key_name: &str,
        contract: &str,
        msg: &str,
        extra: &[&str],
    ) -> Result<ConfirmedTx> {
        let mut args = vec!["wasm", "execute", contract, msg];
        args.extend_from_slice(extra);

        let result = self.exec_tx(key_name, &args).await?;
        self.confirm(&result.hash).await
    }

    /// Smart query against a contract; `query` is re-serialized compactly
    pub async fn query_contract<T: serde::de::DeserializeOwned>(
        &self,
        contract: &str,
        query: &serde_json::Value,
    ) -> Result<T> {
        let query = serde_json::to_string(query)?;
        let stdout = self
            .exec_query(&["wasm", "contract-state", "smart", contract, query.as_str()])
            .await?;
        decode("wasm contract-state smart", &stdout)
    }

    /// Upload a light client contract, returning the sha256 code hash
    pub async fn store_client_contract(&self, key_name: &str, path: &Path, extra: &[&str]) -> Result<String> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| HarnessError::Transport(format!("reading {}: {}", path.display(), e)))?;
        let file = file_name(path)?;
        self.write_file(&file, &content).await?;

        let wasm_path = format!("{}/{}", self.home_dir(), file);
        let mut args = vec!["ibc-wasm", "store-code", wasm_path.as_str(), "--gas", "auto"];
        args.extend_from_slice(extra);
        self.exec_tx(key_name, &args).await?;

        Ok(hex::encode(Sha256::digest(&content)))
    }

    /// Stored light client code for `code_hash`
    pub async fn query_client_contract_code<T: serde::de::DeserializeOwned>(&self, code_hash: &str) -> Result<T> {
        let stdout = self.exec_query(&["ibc-wasm", "code", code_hash]).await?;
        decode("ibc-wasm code", &stdout)
    }

    /// Create `rollapp_chain_id` on the hub, signed with a sequencer keyring key
    pub async fn register_rollapp_to_hub(
        &self,
        key_name: &str,
        rollapp_chain_id: &str,
        max_sequencers: u32,
        key_dir: &str,
    ) -> Result<TxResult> {
        let max_sequencers = max_sequencers.to_string();
        let keyring_dir = sequencer_keyring_dir(key_dir);
        let result = self
            .exec_tx(
                key_name,
                &[
                    "rollapp",
                    "create-rollapp",
                    rollapp_chain_id,
                    max_sequencers.as_str(),
                    ROLLAPP_DETAIL,
                    "--broadcast-mode",
                    "block",
                    "--keyring-dir",
                    keyring_dir.as_str(),
                ],
            )
            .await?;
        info!(node = %self.name(), "Registered rollapp {} on hub", rollapp_chain_id);
        Ok(result)
    }

    /// Register the sequencer with public key `seq_pubkey` for a rollapp on the hub
    pub async fn register_sequencer_to_hub(
        &self,
        key_name: &str,
        rollapp_chain_id: &str,
        seq_pubkey: &str,
        key_dir: &str,
    ) -> Result<TxResult> {
        let keyring_dir = sequencer_keyring_dir(key_dir);
        self.exec_tx(
            key_name,
            &[
                "sequencer",
                "create-sequencer",
                seq_pubkey,
                rollapp_chain_id,
                SEQUENCER_DESCRIPTION,
                "--broadcast-mode",
                "block",
                "--keyring-dir",
                keyring_dir.as_str(),
            ],
        )
        .await
    }

    pub async fn send_funds(&self, key_name: &str, amount: &WalletAmount) -> Result<TxResult> {
        let coin = amount.coin();
        self.exec_tx(
            key_name,
            &["bank", "send", key_name, amount.address.as_str(), coin.as_str()],
        )
        .await
    }

    /// ICS-20 transfer over `channel_id`; returns the tx hash
    pub async fn send_ibc_transfer(
        &self,
        channel_id: &str,
        key_name: &str,
        amount: &WalletAmount,
        options: &TransferOptions,
    ) -> Result<String> {
        let args = ibc_transfer_args(channel_id, amount, options);
        Ok(self.exec_tx(key_name, &args).await?.hash)
    }

    pub async fn vote_on_proposal(&self, key_name: &str, proposal_id: &str, vote: &str) -> Result<()> {
        self.exec_tx(key_name, &["gov", "vote", proposal_id, vote, "--gas", "auto"])
            .await?;
        Ok(())
    }

    /// Submit a gov v1 proposal from a JSON file in the node home
    pub async fn submit_proposal(&self, key_name: &str, proposal: &TxProposal) -> Result<String> {
        let file = "proposal.json";
        let content = serde_json::to_vec_pretty(proposal)?;
        self.write_file(file, &content).await?;

        let path = format!("{}/{}", self.home_dir(), file);
        let result = self
            .exec_tx(key_name, &["gov", "submit-proposal", path.as_str(), "--gas", "auto"])
            .await?;
        Ok(result.hash)
    }

    pub async fn upgrade_proposal(&self, key_name: &str, proposal: &SoftwareUpgradeProposal) -> Result<String> {
        let height = proposal.height.to_string();
        let mut args = vec![
            "gov",
            "submit-proposal",
            "software-upgrade",
            proposal.name.as_str(),
            "--upgrade-height",
            height.as_str(),
            "--title",
            proposal.title.as_str(),
            "--description",
            proposal.description.as_str(),
            "--deposit",
            proposal.deposit.as_str(),
        ];
        if let Some(info) = &proposal.info {
            args.push("--upgrade-info");
            args.push(info.as_str());
        }
        Ok(self.exec_tx(key_name, &args).await?.hash)
    }

    pub async fn text_proposal(&self, key_name: &str, proposal: &TextProposal) -> Result<String> {
        let mut args = vec![
            "gov",
            "submit-proposal",
            "--type",
            "text",
            "--title",
            proposal.title.as_str(),
            "--description",
            proposal.description.as_str(),
            "--deposit",
            proposal.deposit.as_str(),
        ];
        if proposal.expedited {
            args.push("--is-expedited=true");
        }
        Ok(self.exec_tx(key_name, &args).await?.hash)
    }

    /// Legacy `param-change` proposal; returns the tx hash
    pub async fn param_change_proposal(&self, key_name: &str, proposal: &ParamChangeProposal) -> Result<String> {
        let content = serde_json::to_vec(proposal)?;
        let file = format!("{}.json", hex::encode(Sha256::digest(&content)));
        self.write_file(&file, &content).await?;

        let path = format!("{}/{}", self.home_dir(), file);
        let result = self
            .exec_tx(key_name, &["gov", "submit-proposal", "param-change", path.as_str()])
            .await?;
        Ok(result.hash)
    }

    /// Current value of a params-module parameter
    pub async fn query_param(&self, subspace: &str, key: &str) -> Result<ParamValue> {
        let stdout = self.exec_query(&["params", "subspace", subspace, key]).await?;
        decode("params subspace", &stdout)
    }

    pub async fn query_proposal(&self, proposal_id: &str) -> Result<ProposalResponse> {
        let stdout = self.exec_query(&["gov", "proposal", proposal_id]).await?;
        parse_proposal(&stdout)
    }

    /// Full module account such as `gov` or `distribution`
    pub async fn get_module_account(&self, module: &str) -> Result<ModuleAccountResponse> {
        let stdout = self.exec_query(&["auth", "module-account", module]).await?;
        decode("auth module-account", &stdout)
    }

    pub async fn get_module_address(&self, module: &str) -> Result<String> {
        Ok(self.get_module_account(module).await?.account.base_account.address)
    }

    pub async fn query_bank_metadata(&self, denom: &str) -> Result<BankMetadata> {
        let stdout = self
            .exec_query(&["bank", "denom-metadata", "--denom", denom])
            .await?;
        let res: BankMetadataResponse = decode("bank denom-metadata", &stdout)?;
        Ok(res.metadata)
    }
}

fn ibc_transfer_args(channel_id: &str, amount: &WalletAmount, options: &TransferOptions) -> Vec<String> {
    let mut args: Vec<String> = [
        "ibc-transfer",
        "transfer",
        "transfer",
        channel_id,
        amount.address.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(amount.coin());
    args.push("--gas".to_string());
    args.push("auto".to_string());

    match options.timeout {
        Some(PacketTimeout::Timestamp(nanos)) if nanos > 0 => {
            args.push("--packet-timeout-timestamp".to_string());
            args.push(nanos.to_string());
        }
        Some(PacketTimeout::Height(height)) if height > 0 => {
            args.push("--packet-timeout-height".to_string());
            args.push(format!("0-{}", height));
        }
        _ => {}
    }

    if let Some(memo) = options.memo.as_deref().filter(|m| !m.is_empty()) {
        args.push("--memo".to_string());
        args.push(memo.to_string());
    }
    args
}

/// SDK 0.46+ wraps the proposal in `{"proposal": {...}}`
fn parse_proposal(raw: &[u8]) -> Result<ProposalResponse> {
    let mut value: serde_json::Value = decode("gov proposal", raw)?;
    if let Some(inner) = value.get_mut("proposal") {
        value = inner.take();
    }
    serde_json::from_value(value).map_err(|e| HarnessError::Decode(format!("gov proposal: {}", e)))
}
