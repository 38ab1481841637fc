//! In-memory fakes of the container runtime, volume store and node RPC.
//!
//! `FakeRuntime` interprets the chain CLI commands the harness issues and
//! writes the files a real binary would produce (node key, gentx, genesis)
//! into the shared `MemoryVolumes`.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use node_harness::context::CONTAINER_MOUNT_DIR;
use node_harness::node::node_id_from_key_file;
use node_harness::rpc::{
    BlockResponse, BlockResults, ChainRpc, NodeInfo, RpcConnector, Status, SyncInfo, TxResponse,
};
use node_harness::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, JobSpec};
use node_harness::volume::VolumeStore;
use node_harness::{ChainConfig, DockerImage, HarnessContext, HarnessError, Result, RetryPolicy};

pub const BIN: &str = "simd";

/// Public key printed by `dymint show-sequencer`
pub const SEQUENCER_PUBKEY: &str = r#"{"@type":"/cosmos.crypto.ed25519.PubKey","key":"c2VxdWVuY2Vy"}"#;

/// State written by `export`
pub const EXPORTED_STATE: &str = r#"{"app_state":{"bank":{}},"initial_height":"5"}"#;

pub fn chain_config() -> ChainConfig {
    let mut chain = ChainConfig::new("sim", "sim-1", BIN, DockerImage::new("ghcr.io/cosmos/simd", "v0.50.0"));
    chain.block_time = Duration::from_millis(10);
    chain
}

#[derive(Default)]
pub struct MemoryVolumes {
    files: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryVolumes {
    pub fn get(&self, volume: &str, rel_path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&(volume.to_string(), rel_path.to_string()))
            .cloned()
    }

    pub fn put(&self, volume: &str, rel_path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert((volume.to_string(), rel_path.to_string()), content.to_vec());
    }

    /// Files of `volume` whose path starts with `prefix`
    pub fn list(&self, volume: &str, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .filter(|((v, p), _)| v == volume && p.starts_with(prefix))
            .map(|((_, p), c)| (p.clone(), c.clone()))
            .collect()
    }
}

#[async_trait]
impl VolumeStore for MemoryVolumes {
    async fn read_file(&self, volume: &str, rel_path: &str) -> Result<Vec<u8>> {
        self.get(volume, rel_path)
            .ok_or_else(|| HarnessError::NotFound(format!("{}/{}", volume, rel_path)))
    }

    async fn write_file(&self, volume: &str, rel_path: &str, content: &[u8]) -> Result<()> {
        self.put(volume, rel_path, content);
        Ok(())
    }
}

type TxResponder = Box<dyn Fn(&[String]) -> ExecOutput + Send + Sync>;

/// Fake docker that runs the chain CLI against `MemoryVolumes`
pub struct FakeRuntime {
    pub volumes: Arc<MemoryVolumes>,
    /// Whether the binary knows the `genesis` subcommand
    pub genesis_subcommand: bool,
    pub commands: Mutex<Vec<Vec<String>>>,
    containers: Mutex<HashSet<String>>,
    tx_responder: Mutex<Option<TxResponder>>,
    query_responses: Mutex<Vec<(String, String)>>,
    tx_in_flight: AtomicUsize,
    pub max_tx_in_flight: AtomicUsize,
    next_port: AtomicU64,
}

impl FakeRuntime {
    pub fn new(volumes: Arc<MemoryVolumes>, genesis_subcommand: bool) -> Self {
        Self {
            volumes,
            genesis_subcommand,
            commands: Mutex::new(Vec::new()),
            containers: Mutex::new(HashSet::new()),
            tx_responder: Mutex::new(None),
            query_responses: Mutex::new(Vec::new()),
            tx_in_flight: AtomicUsize::new(0),
            max_tx_in_flight: AtomicUsize::new(0),
            next_port: AtomicU64::new(30000),
        }
    }

    pub fn respond_to_tx(&self, responder: impl Fn(&[String]) -> ExecOutput + Send + Sync + 'static) {
        *self.tx_responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// Answer `query <args...>` starting with `prefix` with `json`
    pub fn respond_to_query(&self, prefix: &str, json: &str) {
        self.query_responses
            .lock()
            .unwrap()
            .push((prefix.to_string(), json.to_string()));
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    /// Recorded commands whose verb (after `<bin> [genesis]`) is `verb`
    pub fn commands_with_verb(&self, verb: &str) -> Vec<Vec<String>> {
        self.commands()
            .into_iter()
            .filter(|cmd| verb_of(cmd).map(|(v, _)| v == verb).unwrap_or(false))
            .collect()
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    fn require(&self, id: &str) -> Result<()> {
        if self.containers.lock().unwrap().contains(id) {
            Ok(())
        } else {
            Err(HarnessError::NotFound(format!("no such container: {}", id)))
        }
    }

    async fn run_tx(&self, cmd: &[String]) -> ExecOutput {
        let now = self.tx_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_tx_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.tx_in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.tx_responder.lock().unwrap().as_ref() {
            Some(responder) => responder(cmd),
            None => {
                let hash = hex::encode_upper(Sha256::digest(cmd.join(" ").as_bytes()));
                ok(format!(r#"{{"txhash":"{}","code":0,"raw_log":""}}"#, hash))
            }
        }
    }

    fn run_cli(&self, cmd: &[String]) -> ExecOutput {
        let Some(volume) = home_volume(cmd) else {
            return ok(String::new());
        };
        let Some((verb, args)) = verb_of(cmd) else {
            return ok(String::new());
        };
        let genesis_prefixed = cmd.get(1).map(|s| s == "genesis").unwrap_or(false);

        if genesis_prefixed && !self.genesis_subcommand {
            return fail("Error: unknown command \"genesis\" for \"simd\"");
        }

        if verb == "query" {
            let query = args.join(" ");
            return self
                .query_responses
                .lock()
                .unwrap()
                .iter()
                .find(|(prefix, _)| query.starts_with(prefix.as_str()))
                .map(|(_, json)| ok(json.clone()))
                .unwrap_or_else(|| fail("Error: no fake response for query"));
        }

        match verb.as_str() {
            // capability check: bare `<bin> genesis --home ...`
            "--home" => ok(String::new()),
            "init" => {
                let mut key = Sha256::digest(volume.as_bytes()).to_vec();
                key.extend_from_slice(&Sha256::digest(format!("pub-{}", volume).as_bytes()));
                let node_key = serde_json::json!({
                    "priv_key": {
                        "type": "tendermint/PrivKeyEd25519",
                        "value": base64::engine::general_purpose::STANDARD.encode(&key),
                    }
                });
                self.volumes.put(&volume, "config/node_key.json", node_key.to_string().as_bytes());
                self.volumes.put(
                    &volume,
                    "config/genesis.json",
                    br#"{"chain_id":"sim-1","app_state":{"genutil":{"gen_txs":[]}}}"#,
                );
                self.volumes.put(
                    &volume,
                    "config/config.toml",
                    b"moniker = \"node\"\n\n[p2p]\npersistent_peers = \"\"\n",
                );
                self.volumes
                    .put(&volume, "config/app.toml", b"minimum-gas-prices = \"\"\n");
                ok(String::new())
            }
            "keys" if args.first().map(|a| a == "show").unwrap_or(false) => {
                ok(format!("cosmos1{}\n", volume.replace('-', "")))
            }
            "keys" => ok(String::new()),
            "dymint" => ok(format!("{}\n", SEQUENCER_PUBKEY)),
            "export" => match args.iter().position(|a| a == "--output-document") {
                Some(pos) => {
                    let home = format!("{}/{}/", CONTAINER_MOUNT_DIR, volume);
                    let Some(rel) = args.get(pos + 1).and_then(|p| p.strip_prefix(home.as_str())) else {
                        return fail("Error: output document outside home");
                    };
                    self.volumes.put(&volume, rel, EXPORTED_STATE.as_bytes());
                    ok(String::new())
                }
                // Older SDKs print the export on stderr
                None => ExecOutput {
                    stderr: EXPORTED_STATE.as_bytes().to_vec(),
                    ..Default::default()
                },
            },
            "add-genesis-account" => {
                if !genesis_prefixed && self.genesis_subcommand {
                    return fail("Error: unknown command \"add-genesis-account\" for \"simd\"");
                }
                ok(String::new())
            }
            "gentx" => {
                let Some(raw) = self.volumes.get(&volume, "config/node_key.json") else {
                    return fail("Error: node key missing");
                };
                let id = match node_id_from_key_file(&raw) {
                    Ok(id) => id,
                    Err(e) => return fail(&e.to_string()),
                };
                let gentx = serde_json::json!({ "body": { "memo": format!("{}@{}:26656", id, volume) } });
                self.volumes.put(
                    &volume,
                    &format!("config/gentx/gentx-{}.json", id),
                    gentx.to_string().as_bytes(),
                );
                ok(String::new())
            }
            "collect-gentxs" => {
                let gen_txs: Vec<serde_json::Value> = self
                    .volumes
                    .list(&volume, "config/gentx/")
                    .into_iter()
                    .filter_map(|(_, raw)| serde_json::from_slice(&raw).ok())
                    .collect();
                let genesis = serde_json::json!({
                    "chain_id": "sim-1",
                    "app_state": { "genutil": { "gen_txs": gen_txs } }
                });
                self.volumes
                    .put(&volume, "config/genesis.json", genesis.to_string().as_bytes());
                ok(String::new())
            }
            _ => ok(String::new()),
        }
    }
}

fn ok(stdout: String) -> ExecOutput {
    ExecOutput {
        stdout: stdout.into_bytes(),
        ..Default::default()
    }
}

pub fn fail(stderr: &str) -> ExecOutput {
    ExecOutput {
        stderr: stderr.as_bytes().to_vec(),
        exit_code: 1,
        ..Default::default()
    }
}

pub fn tx_output(hash: &str, code: u32, raw_log: &str) -> ExecOutput {
    ok(serde_json::json!({ "txhash": hash, "code": code, "raw_log": raw_log }).to_string())
}

/// Volume name taken from `--home /var/cosmos-chain/<volume>`
fn home_volume(cmd: &[String]) -> Option<String> {
    let pos = cmd.iter().position(|a| a == "--home")?;
    let home = cmd.get(pos + 1)?;
    home.strip_prefix(CONTAINER_MOUNT_DIR)
        .map(|v| v.trim_start_matches('/').to_string())
}

/// Verb after `<bin>` and an optional `genesis` prefix, with its arguments
pub fn verb_of(cmd: &[String]) -> Option<(String, Vec<String>)> {
    if cmd.first().map(|b| b != BIN).unwrap_or(true) {
        return None;
    }
    let mut rest = &cmd[1..];
    if rest.first().map(|s| s == "genesis").unwrap_or(false) && rest.len() > 1 {
        rest = &rest[1..];
    }
    let (verb, args) = rest.split_first()?;
    Some((verb.clone(), args.to_vec()))
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let id = format!("ctr-{}", spec.name);
        self.containers.lock().unwrap().insert(id.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.require(id)
    }

    async fn pause_container(&self, id: &str) -> Result<()> {
        self.require(id)
    }

    async fn unpause_container(&self, id: &str) -> Result<()> {
        self.require(id)
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.require(id)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        if self.containers.lock().unwrap().remove(id) {
            Ok(())
        } else {
            Err(HarnessError::NotFound(format!("no such container: {}", id)))
        }
    }

    async fn host_ports(&self, id: &str, ports: &[&str]) -> Result<Vec<String>> {
        self.require(id)?;
        Ok(ports
            .iter()
            .map(|_| format!("127.0.0.1:{}", self.next_port.fetch_add(1, Ordering::SeqCst)))
            .collect())
    }

    async fn run_job(&self, job: &JobSpec) -> Result<ExecOutput> {
        self.commands.lock().unwrap().push(job.cmd.clone());
        if job.cmd.get(1).map(|s| s == "tx").unwrap_or(false) {
            return Ok(self.run_tx(&job.cmd).await);
        }
        Ok(self.run_cli(&job.cmd))
    }
}

/// Chain whose height advances one block every `block_time` since creation
pub struct FakeRpc {
    started: Instant,
    block_time: Duration,
    pub catching_up: AtomicBool,
    pub blocks: Mutex<HashMap<u64, (serde_json::Value, serde_json::Value)>>,
    pub txs: Mutex<HashMap<String, serde_json::Value>>,
}

impl FakeRpc {
    pub fn new(block_time: Duration) -> Self {
        Self {
            started: Instant::now(),
            block_time,
            catching_up: AtomicBool::new(false),
            blocks: Mutex::new(HashMap::new()),
            txs: Mutex::new(HashMap::new()),
        }
    }

    pub fn current_height(&self) -> u64 {
        1 + (self.started.elapsed().as_millis() / self.block_time.as_millis().max(1)) as u64
    }

    pub fn insert_block(&self, height: u64, block: serde_json::Value, results: serde_json::Value) {
        self.blocks.lock().unwrap().insert(height, (block, results));
    }

    pub fn insert_tx(&self, hash: &str, code: u32, log: &str) {
        let tx = serde_json::json!({
            "hash": hash,
            "height": self.current_height().to_string(),
            "index": 0,
            "tx_result": { "code": code, "log": log, "events": [] },
            "tx": ""
        });
        self.txs.lock().unwrap().insert(hash.to_string(), tx);
    }
}

#[async_trait]
impl ChainRpc for FakeRpc {
    async fn status(&self) -> Result<Status> {
        Ok(Status {
            node_info: NodeInfo {
                id: "fake".into(),
                network: "sim-1".into(),
                moniker: "fake".into(),
            },
            sync_info: SyncInfo {
                latest_block_height: self.current_height(),
                catching_up: self.catching_up.load(Ordering::SeqCst),
            },
        })
    }

    async fn block(&self, height: u64) -> Result<BlockResponse> {
        let (block, _) = self
            .blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or_else(|| HarnessError::Transport(format!("no block {}", height)))?;
        Ok(serde_json::from_value(block)?)
    }

    async fn block_results(&self, height: u64) -> Result<BlockResults> {
        let (_, results) = self
            .blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or_else(|| HarnessError::Transport(format!("no block results {}", height)))?;
        Ok(serde_json::from_value(results)?)
    }

    async fn tx(&self, hash: &str) -> Result<TxResponse> {
        let tx = self
            .txs
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| HarnessError::NotYetVisible(format!("tx ({}) not found", hash)))?;
        Ok(serde_json::from_value(tx)?)
    }
}

pub struct FakeConnector {
    pub rpc: Arc<FakeRpc>,
    pub connected: Mutex<Vec<String>>,
}

impl RpcConnector for FakeConnector {
    fn connect(&self, addr: &str) -> Result<Arc<dyn ChainRpc>> {
        self.connected.lock().unwrap().push(addr.to_string());
        Ok(self.rpc.clone())
    }
}

/// Wired-up fakes plus the context that uses them
pub struct Harness {
    pub volumes: Arc<MemoryVolumes>,
    pub runtime: Arc<FakeRuntime>,
    pub rpc: Arc<FakeRpc>,
    pub connector: Arc<FakeConnector>,
    pub ctx: HarnessContext,
}

impl Harness {
    pub fn new(genesis_subcommand: bool) -> Self {
        let volumes = Arc::new(MemoryVolumes::default());
        let runtime = Arc::new(FakeRuntime::new(volumes.clone(), genesis_subcommand));
        let rpc = Arc::new(FakeRpc::new(Duration::from_millis(10)));
        let connector = Arc::new(FakeConnector {
            rpc: rpc.clone(),
            connected: Mutex::new(Vec::new()),
        });
        let ctx = HarnessContext::new(runtime.clone(), volumes.clone(), connector.clone(), "harness-test")
            .with_readiness(RetryPolicy::fixed(5, Duration::from_millis(5)), Duration::ZERO);

        Self {
            volumes,
            runtime,
            rpc,
            connector,
            ctx,
        }
    }
}
