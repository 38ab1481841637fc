//! A single chain node under test
//!
//! A [`Node`] owns its container lifecycle, its host port bindings and RPC
//! client (rebound together on every start), and a mutex that serializes
//! every command touching the node's keyring or account sequence.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::command::{self, CommandBuilder, API_PORT, GRPC_PORT, RPC_PORT, SENTRY_PORTS};
use crate::config::ChainConfig;
use crate::context::{HarnessContext, CONTAINER_MOUNT_DIR};
use crate::error::{HarnessError, Result};
use crate::lifecycle::ContainerLifecycle;
use crate::readiness;
use crate::rpc::ChainRpc;
use crate::runtime::{ContainerSpec, ExecOutput, JobSpec};

pub const GENESIS_FILE: &str = "config/genesis.json";
pub const NODE_KEY_FILE: &str = "config/node_key.json";

/// Adding a genesis account should be instant; a hang means docker is stuck
const GENESIS_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(60);

/// CLI features that differ between SDK versions, resolved once per node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdkCapabilities {
    /// Genesis verbs live under `<bin> genesis` (SDK >= 0.47)
    pub genesis_subcommand: bool,
}

/// Host-side addresses of the published node ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPorts {
    pub rpc: String,
    pub grpc: String,
    pub api: String,
}

/// Ports and RPC client of the currently running container
struct Binding {
    ports: HostPorts,
    client: Arc<dyn ChainRpc>,
}

#[derive(Debug, Deserialize)]
struct NodeKeyFile {
    priv_key: KeyValue,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

/// Parsed `version --long --output json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBuildInfo {
    pub name: String,
    pub server_name: String,
    pub version: String,
    pub commit: String,
    pub build_tags: String,
    pub go: String,
    pub cosmos_sdk_version: String,
    pub build_deps: Vec<BuildDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDependency {
    pub parent: String,
    pub version: String,
    pub is_replacement: bool,
    pub replacement: String,
    pub replacement_version: String,
}

#[derive(Debug, Deserialize)]
struct RawBuildInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    server_name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    commit: String,
    #[serde(default)]
    build_tags: String,
    #[serde(default)]
    go: String,
    #[serde(default)]
    build_deps: Vec<String>,
    #[serde(default)]
    cosmos_sdk_version: String,
}

pub struct Node {
    pub(crate) ctx: HarnessContext,
    chain: Arc<ChainConfig>,
    test_name: String,
    validator: bool,
    index: usize,
    lifecycle: ContainerLifecycle,
    volume: String,
    binding: RwLock<Option<Binding>>,
    capabilities: OnceCell<SdkCapabilities>,
    /// Serializes keyring and transaction commands on this node
    pub(crate) lock: Mutex<()>,
}

impl Node {
    pub fn new(
        ctx: HarnessContext,
        chain: Arc<ChainConfig>,
        test_name: impl Into<String>,
        validator: bool,
        index: usize,
    ) -> Self {
        let test_name = test_name.into();
        let name = container_name(&chain, validator, index, &test_name);
        let volume = format!("{}-{}", chain.name, name);
        let lifecycle = ContainerLifecycle::new(ctx.runtime.clone(), name);

        Self {
            ctx,
            chain,
            test_name,
            validator,
            index,
            lifecycle,
            volume,
            binding: RwLock::new(None),
            capabilities: OnceCell::new(),
            lock: Mutex::new(()),
        }
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    pub fn is_validator(&self) -> bool {
        self.validator
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Container name: `<chain-id>-<val|fn>-<index>-<test>`
    pub fn name(&self) -> &str {
        self.lifecycle.name()
    }

    /// Hostname on the docker network
    pub fn host_name(&self) -> String {
        command::condense_host_name(self.name())
    }

    /// Directory of this node's home inside the shared mount:
    /// `<chain name>-<container name>`
    pub fn volume(&self) -> &str {
        &self.volume
    }

    pub fn home_dir(&self) -> String {
        format!("{}/{}", CONTAINER_MOUNT_DIR, self.volume())
    }

    pub fn container_id(&self) -> Option<String> {
        self.lifecycle.container_id()
    }

    /// Host ports of the running container, if started
    pub fn host_ports(&self) -> Option<HostPorts> {
        self.binding
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|b| b.ports.clone())
    }

    /// RPC client bound to the running container
    pub fn rpc(&self) -> Result<Arc<dyn ChainRpc>> {
        self.binding
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|b| b.client.clone())
            .ok_or_else(|| HarnessError::NotFound(format!("node {} is not running", self.name())))
    }

    fn set_binding(&self, binding: Option<Binding>) {
        *self.binding.write().unwrap_or_else(|e| e.into_inner()) = binding;
    }

    pub(crate) fn with_builder<T>(&self, genesis_prefix: bool, f: impl FnOnce(&CommandBuilder<'_>) -> T) -> T {
        let home = self.home_dir();
        let host = self.host_name();
        let builder = CommandBuilder::new(&self.chain, &home, &host, genesis_prefix);
        f(&builder)
    }

    /// Resolve (once) which CLI layout the chain binary uses
    pub async fn capabilities(&self) -> Result<SdkCapabilities> {
        self.capabilities
            .get_or_try_init(|| async {
                let genesis_subcommand = match self.chain.genesis_subcommand {
                    Some(flag) => flag,
                    None => self.has_command(&["genesis"]).await?,
                };
                info!(
                    node = %self.name(),
                    "Resolved SDK capabilities: genesis_subcommand={}",
                    genesis_subcommand
                );
                Ok::<_, HarnessError>(SdkCapabilities { genesis_subcommand })
            })
            .await
            .copied()
    }

    /// Check whether `command` is a known subcommand of the chain binary
    pub async fn has_command(&self, command: &[&str]) -> Result<bool> {
        let cmd = self.with_builder(false, |b| b.bin(command));
        let output = self.exec_unchecked(&cmd).await?;
        Ok(classify_command_check(&output))
    }

    /// Run `cmd` in a one-shot container sharing this node's image and mount
    pub async fn exec_unchecked(&self, cmd: &[String]) -> Result<ExecOutput> {
        let job = JobSpec {
            name: self.name().to_string(),
            image: self.chain.image.reference(),
            network: self.ctx.network.clone(),
            cmd: cmd.to_vec(),
            env: Vec::new(),
            binds: vec![self.ctx.bind()],
        };

        debug!(node = %self.name(), "exec: {}", cmd.join(" "));
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(HarnessError::Cancelled),
            r = self.ctx.runtime.run_job(&job) => r,
        }
    }

    /// Like [`Node::exec_unchecked`] but a non-zero exit is an error
    pub async fn exec(&self, cmd: &[String]) -> Result<ExecOutput> {
        self.exec_unchecked(cmd).await?.check(cmd)
    }

    /// `<bin> <args...> --home <home>`
    pub async fn exec_bin<S: AsRef<str>>(&self, args: &[S]) -> Result<ExecOutput> {
        let cmd = self.with_builder(false, |b| b.bin(args));
        self.exec(&cmd).await
    }

    /// Run a query and return its JSON stdout
    pub async fn exec_query<S: AsRef<str>>(&self, args: &[S]) -> Result<Vec<u8>> {
        let cmd = self.with_builder(false, |b| b.query(args));
        Ok(self.exec(&cmd).await?.stdout)
    }

    pub async fn read_file(&self, rel_path: &str) -> Result<Vec<u8>> {
        self.ctx.volumes.read_file(self.volume(), rel_path).await
    }

    pub async fn write_file(&self, rel_path: &str, content: &[u8]) -> Result<()> {
        self.ctx.volumes.write_file(self.volume(), rel_path, content).await
    }

    /// Copy a file from the host filesystem into this node's home directory
    pub async fn copy_file(&self, src: &Path, rel_path: &str) -> Result<()> {
        let content = tokio::fs::read(src).await.map_err(|e| {
            HarnessError::Transport(format!("reading {}: {}", src.display(), e))
        })?;
        self.write_file(rel_path, &content).await
    }

    pub async fn genesis_file_content(&self) -> Result<Vec<u8>> {
        self.read_file(GENESIS_FILE).await
    }

    pub async fn overwrite_genesis_file(&self, content: &[u8]) -> Result<()> {
        self.write_file(GENESIS_FILE, content).await
    }

    /// Persistent peer id derived from `config/node_key.json`
    pub async fn node_id(&self) -> Result<String> {
        let raw = self.read_file(NODE_KEY_FILE).await?;
        node_id_from_key_file(&raw)
    }

    /// `init` the home directory
    pub async fn init_home_folder(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let cmd = self.with_builder(false, |b| b.init(self.name()));
        self.exec(&cmd).await?;
        Ok(())
    }

    /// Patch `config.toml` and `app.toml` with values suited to e2e tests
    pub async fn set_test_config(&self) -> Result<()> {
        let block_time = go_duration(self.chain.block_time);

        let config_patch = toml_table([
            ("log_level", toml::Value::from("info")),
            (
                "p2p",
                toml::Value::Table(toml_table([
                    ("allow_duplicate_ip", toml::Value::from(true)),
                    ("addr_book_strict", toml::Value::from(false)),
                ])),
            ),
            (
                "consensus",
                toml::Value::Table(toml_table([
                    ("timeout_commit", toml::Value::from(block_time.clone())),
                    ("timeout_propose", toml::Value::from(block_time)),
                ])),
            ),
            (
                "rpc",
                toml::Value::Table(toml_table([
                    ("laddr", toml::Value::from("tcp://0.0.0.0:26657")),
                    ("allowed_origins", toml::Value::from(vec!["*"])),
                ])),
            ),
        ]);
        self.ctx
            .volumes
            .modify_toml(self.volume(), "config/config.toml", &config_patch)
            .await?;

        let app_patch = toml_table([
            ("minimum-gas-prices", toml::Value::from(self.chain.gas_prices.clone())),
            (
                "grpc",
                toml::Value::Table(toml_table([("address", toml::Value::from("0.0.0.0:9090"))])),
            ),
            (
                "api",
                toml::Value::Table(toml_table([
                    ("enable", toml::Value::from(true)),
                    ("swagger", toml::Value::from(true)),
                    ("address", toml::Value::from("tcp://0.0.0.0:1317")),
                ])),
            ),
        ]);
        self.ctx
            .volumes
            .modify_toml(self.volume(), "config/app.toml", &app_patch)
            .await
    }

    /// Set `p2p.persistent_peers`
    pub async fn set_peers(&self, peers: &str) -> Result<()> {
        let patch = toml_table([(
            "p2p",
            toml::Value::Table(toml_table([("persistent_peers", toml::Value::from(peers))])),
        )]);
        self.ctx
            .volumes
            .modify_toml(self.volume(), "config/config.toml", &patch)
            .await
    }

    /// Create a key in the test keyring
    pub async fn create_key(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let cmd = self.with_builder(false, |b| b.add_key(name));
        self.exec(&cmd).await?;
        Ok(())
    }

    /// Restore a key from a mnemonic
    pub async fn recover_key(&self, name: &str, mnemonic: &str) -> Result<()> {
        let cmd = self.with_builder(false, |b| b.recover_key(name, mnemonic));
        let _guard = self.lock.lock().await;
        self.exec(&cmd).await?;
        Ok(())
    }

    /// Bech32 address of key `name`; `bech` is acc, val or cons (default acc)
    pub async fn key_bech32(&self, name: &str, bech: Option<&str>) -> Result<String> {
        let cmd = self.with_builder(false, |b| b.show_key_address(name, bech));
        let output = self.exec(&cmd).await?;
        Ok(output.stdout_str().trim_end_matches('\n').to_string())
    }

    pub async fn account_key_bech32(&self, name: &str) -> Result<String> {
        self.key_bech32(name, None).await
    }

    /// Keyring root for hub-side keys: this node's home
    pub fn hub_key_dir(&self) -> String {
        self.home_dir()
    }

    /// Create a key in the sequencer keyring used to sign hub transactions
    pub async fn create_hub_key(&self, name: &str) -> Result<()> {
        let key_dir = self.hub_key_dir();
        let cmd = self.with_builder(false, |b| b.add_hub_key(name, &key_dir));
        let _guard = self.lock.lock().await;
        self.exec(&cmd).await?;
        Ok(())
    }

    /// Bech32 address of a sequencer keyring key
    pub async fn hub_key_bech32(&self, name: &str, bech: Option<&str>) -> Result<String> {
        let key_dir = self.hub_key_dir();
        let cmd = self.with_builder(false, |b| b.show_hub_key_address(name, bech, &key_dir));
        let output = self.exec(&cmd).await?;
        Ok(output.stdout_str().trim_end_matches('\n').to_string())
    }

    pub async fn account_hub_key_bech32(&self, name: &str) -> Result<String> {
        self.hub_key_bech32(name, None).await
    }

    /// Sequencer public key of a rollapp node
    pub async fn show_seq(&self) -> Result<String> {
        let cmd = self.with_builder(false, |b| b.show_sequencer());
        let output = self.exec(&cmd).await?;
        Ok(output.stdout_str().trim_end_matches('\n').to_string())
    }

    /// Produce the sequencer gentx of a rollapp validator
    pub async fn gentx_seq(&self, key_name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let pubkey = self.show_seq().await?;
        let cmd = self.with_builder(false, |b| b.gentx_seq(key_name, &pubkey));
        self.exec(&cmd).await?;
        Ok(())
    }

    /// Add `address` with `amount` (comma-separated coins) to the local genesis
    pub async fn add_genesis_account(&self, address: &str, amount: &str) -> Result<()> {
        let genesis_prefix = self.capabilities().await?.genesis_subcommand;
        let cmd = self.with_builder(genesis_prefix, |b| b.add_genesis_account(address, amount));

        let _guard = self.lock.lock().await;
        match tokio::time::timeout(GENESIS_ACCOUNT_TIMEOUT, self.exec(&cmd)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(HarnessError::Transport(format!(
                "add-genesis-account on {} did not finish within {:?}",
                self.name(),
                GENESIS_ACCOUNT_TIMEOUT
            ))),
        }
    }

    /// Produce this validator's gentx in `config/gentx/`
    pub async fn gentx(&self, key_name: &str, self_delegation: &str) -> Result<()> {
        let genesis_prefix = self.capabilities().await?.genesis_subcommand;
        let cmd = self.with_builder(genesis_prefix, |b| b.gentx(key_name, self_delegation));

        let _guard = self.lock.lock().await;
        self.exec(&cmd).await?;
        Ok(())
    }

    /// Merge every gentx in `config/gentx/` into the genesis file
    pub async fn collect_gentxs(&self) -> Result<()> {
        let genesis_prefix = self.capabilities().await?.genesis_subcommand;
        let cmd = self.with_builder(genesis_prefix, |b| b.collect_gentxs());

        let _guard = self.lock.lock().await;
        self.exec(&cmd).await?;
        Ok(())
    }

    /// Relative path of this node's gentx
    pub async fn gentx_path(&self) -> Result<String> {
        Ok(format!("config/gentx/gentx-{}.json", self.node_id().await?))
    }

    /// Copy this node's gentx into `dest`'s volume under the same path
    pub async fn copy_gentx(&self, dest: &Node) -> Result<()> {
        let rel_path = self.gentx_path().await?;
        let gentx = self.read_file(&rel_path).await?;
        dest.write_file(&rel_path, &gentx).await?;
        debug!("Copied {} from {} to {}", rel_path, self.name(), dest.name());
        Ok(())
    }

    /// Export app state at `height`
    pub async fn export_state(&self, height: u64) -> Result<String> {
        let newer_sdk = self.capabilities().await?.genesis_subcommand;
        let doc = "state_export.json";
        let doc_path = format!("{}/{}", self.home_dir(), doc);

        let _guard = self.lock.lock().await;
        let cmd = self.with_builder(false, |b| {
            b.export(height, if newer_sdk { Some(doc_path.as_str()) } else { None })
        });
        let output = self.exec(&cmd).await?;

        if newer_sdk {
            let content = self.read_file(doc).await?;
            return Ok(String::from_utf8_lossy(&content).into_owned());
        }

        // Older SDKs print the export to stderr
        Ok(format!("{}{}", output.stdout_str(), output.stderr_str()))
    }

    pub async fn unsafe_reset_all(&self) -> Result<()> {
        let genesis_prefix = self.capabilities().await?.genesis_subcommand;
        let cmd = self.with_builder(genesis_prefix, |b| b.unsafe_reset_all());

        let _guard = self.lock.lock().await;
        self.exec(&cmd).await?;
        Ok(())
    }

    /// Build metadata of the chain binary
    pub async fn build_information(&self) -> Result<BinaryBuildInfo> {
        let cmd = self.with_builder(false, |b| b.version());
        let output = self.exec(&cmd).await?;
        parse_build_info(&output.stdout)
    }

    /// Latest block height reported by this node
    pub async fn height(&self) -> Result<u64> {
        self.rpc()?.height().await
    }

    pub async fn create_container(&self) -> Result<String> {
        let cmd = self.with_builder(false, |b| b.start());
        let spec = ContainerSpec {
            name: self.name().to_string(),
            image: self.chain.image.reference(),
            network: self.ctx.network.clone(),
            hostname: self.host_name(),
            cmd,
            env: Vec::new(),
            binds: vec![self.ctx.bind()],
            exposed_ports: SENTRY_PORTS.iter().map(|p| p.to_string()).collect(),
        };
        self.lifecycle.create(&spec).await
    }

    /// Start the container, bind host ports and a fresh RPC client, then wait
    /// until the node is no longer catching up.
    pub async fn start_container(&self) -> Result<()> {
        self.lifecycle.start().await?;

        // Host ports are fixed for the life of this container instance
        let ports = self.lifecycle.host_ports(&[RPC_PORT, GRPC_PORT, API_PORT]).await?;
        let ports = match ports.as_slice() {
            [rpc, grpc, api] => HostPorts {
                rpc: rpc.clone(),
                grpc: grpc.clone(),
                api: api.clone(),
            },
            _ => {
                return Err(HarnessError::Transport(format!(
                    "expected 3 host ports for {}, got {}",
                    self.name(),
                    ports.len()
                )))
            }
        };

        let client = self.ctx.rpc.connect(&format!("tcp://{}", ports.rpc))?;
        info!(
            node = %self.name(),
            chain_id = %self.chain.chain_id,
            "Container started, rpc={} grpc={} api={}",
            ports.rpc, ports.grpc, ports.api
        );
        self.set_binding(Some(Binding {
            ports,
            client: client.clone(),
        }));

        readiness::wait_until_ready(
            client.as_ref(),
            self.ctx.readiness_grace,
            &self.ctx.readiness,
            &self.ctx.cancel,
        )
        .await?;
        Ok(())
    }

    pub async fn pause_container(&self) -> Result<()> {
        self.lifecycle.pause().await
    }

    pub async fn unpause_container(&self) -> Result<()> {
        self.lifecycle.unpause().await
    }

    pub async fn stop_container(&self) -> Result<()> {
        self.lifecycle.stop().await?;
        self.set_binding(None);
        Ok(())
    }

    pub async fn remove_container(&self) -> Result<()> {
        self.set_binding(None);
        self.lifecycle.remove().await
    }
}

fn container_name(chain: &ChainConfig, validator: bool, index: usize, test_name: &str) -> String {
    let node_type = if validator { "val" } else { "fn" };
    format!(
        "{}-{}-{}-{}",
        chain.chain_id,
        node_type,
        index,
        command::sanitize_container_name(test_name)
    )
}

/// Exit 0 or a "needs more arguments" complaint means the command exists
fn classify_command_check(output: &ExecOutput) -> bool {
    if output.exit_code == 0 {
        return true;
    }
    let stderr = output.stderr_str();
    if stderr.contains("Error: unknown command") {
        return false;
    }
    stderr.contains("Error: accepts")
}

/// Peer id is the hex of the first 20 bytes of sha256(ed25519 public key)
pub fn node_id_from_key_file(raw: &[u8]) -> Result<String> {
    let key: NodeKeyFile = serde_json::from_slice(raw)
        .map_err(|e| HarnessError::Decode(format!("unmarshaling node_key.json: {}", e)))?;

    if key.priv_key.kind != "tendermint/PrivKeyEd25519" {
        return Err(HarnessError::Decode(format!(
            "unsupported node key type {}",
            key.priv_key.kind
        )));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&key.priv_key.value)
        .map_err(|e| HarnessError::Decode(format!("node key is not base64: {}", e)))?;
    if bytes.len() != 64 {
        return Err(HarnessError::Decode(format!(
            "ed25519 private key must be 64 bytes, got {}",
            bytes.len()
        )));
    }

    let digest = Sha256::digest(&bytes[32..]);
    Ok(hex::encode(&digest[..20]))
}

fn parse_build_info(raw: &[u8]) -> Result<BinaryBuildInfo> {
    let info: RawBuildInfo = serde_json::from_slice(raw)?;

    let split = |dep: &str| -> (String, String) {
        match dep.split_once('@') {
            Some((repo, version)) => (repo.trim().to_string(), version.trim().to_string()),
            None => (dep.trim().to_string(), String::new()),
        }
    };

    let build_deps = info
        .build_deps
        .iter()
        .map(|dep| match dep.split_once(" => ") {
            // "github.com/aaa/bbb@v1.2.1 => github.com/ccc/bbb@v1.2.0"
            Some((main, replacement)) => {
                let (parent, version) = split(main);
                let (replacement, replacement_version) = split(replacement);
                BuildDependency {
                    parent,
                    version,
                    is_replacement: true,
                    replacement,
                    replacement_version,
                }
            }
            None => {
                let (parent, version) = split(dep);
                BuildDependency {
                    parent,
                    version,
                    is_replacement: false,
                    replacement: String::new(),
                    replacement_version: String::new(),
                }
            }
        })
        .collect();

    Ok(BinaryBuildInfo {
        name: info.name,
        server_name: info.server_name,
        version: info.version,
        commit: info.commit,
        build_tags: info.build_tags,
        go: info.go,
        cosmos_sdk_version: info.cosmos_sdk_version,
        build_deps,
    })
}

fn toml_table<const N: usize>(entries: [(&str, toml::Value); N]) -> toml::Table {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Render a duration the way Go's `time.Duration.String` does for whole units
fn go_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_key_file() {
        // seed (32 zero bytes) || public key (32 bytes of 0x01)
        let mut key = vec![0u8; 32];
        key.extend_from_slice(&[1u8; 32]);
        let file = serde_json::json!({
            "priv_key": {
                "type": "tendermint/PrivKeyEd25519",
                "value": base64::engine::general_purpose::STANDARD.encode(&key),
            }
        });

        let id = node_id_from_key_file(file.to_string().as_bytes()).unwrap();
        let expected = hex::encode(&Sha256::digest([1u8; 32])[..20]);
        assert_eq!(id, expected);
        assert_eq!(id.len(), 40);
    }

    #[test]
    fn test_node_id_rejects_short_key() {
        let file = r#"{"priv_key":{"type":"tendermint/PrivKeyEd25519","value":"AAAA"}}"#;
        assert!(matches!(
            node_id_from_key_file(file.as_bytes()),
            Err(HarnessError::Decode(_))
        ));
    }

    #[test]
    fn test_classify_command_check() {
        let ok = ExecOutput::default();
        assert!(classify_command_check(&ok));

        let unknown = ExecOutput {
            stderr: b"Error: unknown command \"genesis\" for \"gaiad\"".to_vec(),
            exit_code: 1,
            ..Default::default()
        };
        assert!(!classify_command_check(&unknown));

        let needs_args = ExecOutput {
            stderr: b"Error: accepts 2 arg(s), received 0".to_vec(),
            exit_code: 1,
            ..Default::default()
        };
        assert!(classify_command_check(&needs_args));
    }

    #[test]
    fn test_parse_build_info_with_replacements() {
        let raw = serde_json::json!({
            "name": "gaia",
            "server_name": "gaiad",
            "version": "v15.0.0",
            "commit": "abc",
            "build_tags": "netgo,ledger",
            "go": "go version go1.21",
            "build_deps": [
                "github.com/aaa/bbb@v0.0.0-20191008050251-8e49817e8af4",
                "github.com/aaa/ccc@v1.2.1 => github.com/ddd/ccc@v1.2.0"
            ],
            "cosmos_sdk_version": "v0.47.10"
        });

        let info = parse_build_info(raw.to_string().as_bytes()).unwrap();
        assert_eq!(info.cosmos_sdk_version, "v0.47.10");
        assert_eq!(info.build_deps.len(), 2);
        assert!(!info.build_deps[0].is_replacement);
        assert_eq!(info.build_deps[0].version, "v0.0.0-20191008050251-8e49817e8af4");
        assert!(info.build_deps[1].is_replacement);
        assert_eq!(info.build_deps[1].replacement, "github.com/ddd/ccc");
        assert_eq!(info.build_deps[1].replacement_version, "v1.2.0");
    }

    #[test]
    fn test_go_duration() {
        assert_eq!(go_duration(Duration::from_secs(2)), "2s");
        assert_eq!(go_duration(Duration::from_millis(500)), "500ms");
    }

    #[test]
    fn test_container_name() {
        let chain = ChainConfig::new(
            "gaia",
            "gaia-1",
            "gaiad",
            crate::config::DockerImage::new("gaia", "v1"),
        );
        assert_eq!(container_name(&chain, true, 0, "TestIBC/transfer"), "gaia-1-val-0-TestIBC_transfer");
        assert_eq!(container_name(&chain, false, 2, "t"), "gaia-1-fn-2-t");
    }
}
