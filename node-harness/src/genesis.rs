//! Genesis bootstrap orchestrator
//!
//! Runs the multi-validator genesis ceremony over a [`NodeSet`]. Steps run
//! strictly one after another; within a step every node works concurrently.
//! The first validator is the collector that assembles the final genesis.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::command::VALIDATOR_KEY;
use crate::config::{ChainConfig, ChainType};
use crate::context::HarnessContext;
use crate::error::{HarnessError, Result};
use crate::node::Node;

pub const STEP_INIT: &str = "Init";
pub const STEP_KEY_INIT: &str = "KeyInit";
pub const STEP_FUND_ACCOUNTS: &str = "FundAccounts";
pub const STEP_SELF_DELEGATE: &str = "SelfDelegate";
pub const STEP_EXCHANGE: &str = "Exchange";
pub const STEP_COLLECT: &str = "Collect";
pub const STEP_DISTRIBUTE: &str = "Distribute";
pub const STEP_PEER_ASSEMBLY: &str = "PeerAssembly";

/// Per-validator artifacts of a finished bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorGenesis {
    pub node: String,
    pub key_name: String,
    pub address: String,
    pub node_id: String,
    pub gentx: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GenesisBundle {
    pub validators: Vec<ValidatorGenesis>,
    /// Final `genesis.json` written to every node
    pub genesis: Vec<u8>,
    /// Value of `p2p.persistent_peers` on every node
    pub peers: String,
}

#[derive(Debug, Deserialize)]
struct GenesisDoc {
    app_state: AppState,
}

#[derive(Debug, Deserialize)]
struct AppState {
    genutil: GenUtil,
}

#[derive(Debug, Deserialize)]
struct GenUtil {
    #[serde(default)]
    gen_txs: Vec<serde_json::Value>,
}

fn gen_txs(genesis: &[u8]) -> Result<Vec<serde_json::Value>> {
    let doc: GenesisDoc = serde_json::from_slice(genesis)
        .map_err(|e| HarnessError::Decode(format!("genesis.json: {}", e)))?;
    Ok(doc.app_state.genutil.gen_txs)
}

/// Number of gentxs merged into a genesis document
pub fn count_gen_txs(genesis: &[u8]) -> Result<usize> {
    Ok(gen_txs(genesis)?.len())
}

/// Node id of every merged gentx, taken from its `<node-id>@<host>:<port>` memo
pub fn gentx_node_ids(genesis: &[u8]) -> Result<Vec<String>> {
    gen_txs(genesis)?
        .iter()
        .map(|tx| {
            tx.pointer("/body/memo")
                .and_then(|m| m.as_str())
                .and_then(|m| m.split('@').next())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .ok_or_else(|| HarnessError::Decode("gentx has no node id memo".to_string()))
        })
        .collect()
}

/// Every expected validator has exactly one gentx in `genesis`
fn check_gentxs(genesis: &[u8], expected: &[String]) -> Result<()> {
    let mut found = gentx_node_ids(genesis)?;
    let mut expected = expected.to_vec();
    found.sort();
    expected.sort();
    if found != expected {
        return Err(HarnessError::Decode(format!(
            "genesis gentxs are from [{}], expected one each from [{}]",
            found.join(", "),
            expected.join(", ")
        )));
    }
    Ok(())
}

/// All nodes of one chain, validators first
pub struct NodeSet {
    nodes: Vec<Arc<Node>>,
    bootstrapped: AtomicBool,
}

impl NodeSet {
    pub fn new(nodes: Vec<Arc<Node>>) -> Self {
        Self {
            nodes,
            bootstrapped: AtomicBool::new(false),
        }
    }

    /// Build `validators` validator nodes followed by `full_nodes` full nodes
    pub fn build(
        ctx: &HarnessContext,
        chain: Arc<ChainConfig>,
        test_name: &str,
        validators: usize,
        full_nodes: usize,
    ) -> Self {
        let vals = (0..validators).map(|i| Node::new(ctx.clone(), chain.clone(), test_name, true, i));
        let fulls = (0..full_nodes).map(|i| Node::new(ctx.clone(), chain.clone(), test_name, false, i));
        Self::new(vals.chain(fulls).map(Arc::new).collect())
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn validators(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().filter(|n| n.is_validator()).cloned().collect()
    }

    pub fn full_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().filter(|n| !n.is_validator()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Comma-joined `<node-id>@<hostname>:26656` over every node
    pub async fn peer_string(&self) -> Result<String> {
        let mut peers = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let peer = format!("{}@{}:26656", node.node_id().await?, node.host_name());
            info!(node = %node.name(), host_name = %node.host_name(), "Peering {}", peer);
            peers.push(peer);
        }
        Ok(peers.join(","))
    }

    /// Log the sha256 of every node's genesis file
    pub async fn log_genesis_hashes(&self) -> Result<()> {
        for node in &self.nodes {
            let genesis = node.genesis_file_content().await?;
            info!(
                node = %node.name(),
                "Genesis hash {}",
                hex::encode_upper(Sha256::digest(&genesis))
            );
        }
        Ok(())
    }

    /// Run the genesis ceremony. Must complete before any node is started.
    pub async fn bootstrap(&self) -> Result<GenesisBundle> {
        let validators = self.validators();
        let collector = validators
            .first()
            .cloned()
            .ok_or_else(|| HarnessError::bootstrap(STEP_KEY_INIT, HarnessError::Config("no validators".into())))?;
        let chain = collector.chain().clone();

        info!(
            chain_id = %chain.chain_id,
            test = %collector.test_name(),
            "Bootstrapping genesis with {} validators and {} full nodes",
            validators.len(),
            self.nodes.len() - validators.len()
        );

        // Init
        try_join_all(self.nodes.iter().map(|node| async move {
            node.init_home_folder().await?;
            node.set_test_config().await
        }))
        .await
        .map_err(|e| HarnessError::bootstrap(STEP_INIT, e))?;

        // KeyInit
        let addresses = try_join_all(validators.iter().map(|node| async move {
            node.create_key(VALIDATOR_KEY).await?;
            node.account_key_bech32(VALIDATOR_KEY).await
        }))
        .await
        .map_err(|e| HarnessError::bootstrap(STEP_KEY_INIT, e))?;

        // FundAccounts: the collector also funds every other validator so
        // collect-gentxs can check their balances
        let amount = chain.genesis_amount.as_str();
        let addresses_ref = &addresses;
        try_join_all(validators.iter().enumerate().map(|(i, node)| async move {
            node.add_genesis_account(&addresses_ref[i], amount).await?;
            if i == 0 {
                for other in addresses_ref.iter().skip(1) {
                    node.add_genesis_account(other, amount).await?;
                }
            }
            Ok::<_, HarnessError>(())
        }))
        .await
        .map_err(|e| HarnessError::bootstrap(STEP_FUND_ACCOUNTS, e))?;

        // SelfDelegate: rollapp validators also register as sequencer
        let delegation = chain.self_delegation.as_str();
        let rollapp = chain.chain_type == ChainType::Rollapp;
        try_join_all(validators.iter().map(|node| async move {
            if rollapp {
                node.gentx_seq(VALIDATOR_KEY).await?;
            }
            node.gentx(VALIDATOR_KEY, delegation).await
        }))
        .await
        .map_err(|e| HarnessError::bootstrap(STEP_SELF_DELEGATE, e))?;

        // Exchange
        let collector_ref = &collector;
        let gentxs = try_join_all(validators.iter().enumerate().map(|(i, node)| async move {
            let node_id = node.node_id().await?;
            let gentx = node.read_file(&node.gentx_path().await?).await?;
            if i != 0 {
                node.copy_gentx(collector_ref).await?;
            }
            Ok::<_, HarnessError>((node_id, gentx))
        }))
        .await
        .map_err(|e| HarnessError::bootstrap(STEP_EXCHANGE, e))?;

        // Collect
        let expected: Vec<String> = gentxs.iter().map(|(node_id, _)| node_id.clone()).collect();
        let genesis = async {
            collector.collect_gentxs().await?;
            let genesis = collector.genesis_file_content().await?;
            check_gentxs(&genesis, &expected)?;
            Ok::<_, HarnessError>(genesis)
        }
        .await
        .map_err(|e| HarnessError::bootstrap(STEP_COLLECT, e))?;

        // Distribute
        let genesis_ref = &genesis;
        try_join_all(
            self.nodes
                .iter()
                .filter(|n| !Arc::ptr_eq(n, collector_ref))
                .map(|node| node.overwrite_genesis_file(genesis_ref)),
        )
        .await
        .map_err(|e| HarnessError::bootstrap(STEP_DISTRIBUTE, e))?;

        // PeerAssembly
        let peers = async {
            let peers = self.peer_string().await?;
            let peers_ref = &peers;
            try_join_all(self.nodes.iter().map(|node| node.set_peers(peers_ref))).await?;
            Ok::<_, HarnessError>(peers)
        }
        .await
        .map_err(|e| HarnessError::bootstrap(STEP_PEER_ASSEMBLY, e))?;

        if let Err(e) = self.log_genesis_hashes().await {
            warn!("Failed to log genesis hashes: {}", e);
        }

        let validators = validators
            .iter()
            .zip(addresses)
            .zip(gentxs)
            .map(|((node, address), (node_id, gentx))| ValidatorGenesis {
                node: node.name().to_string(),
                key_name: VALIDATOR_KEY.to_string(),
                address,
                node_id,
                gentx,
            })
            .collect();

        self.bootstrapped.store(true, Ordering::SeqCst);
        info!(chain_id = %chain.chain_id, "Genesis bootstrap complete");
        Ok(GenesisBundle {
            validators,
            genesis,
            peers,
        })
    }

    /// Create and start every container, then wait for all to be ready.
    ///
    /// Fails without touching any container until [`NodeSet::bootstrap`]
    /// has completed.
    pub async fn start_all(&self) -> Result<()> {
        if !self.bootstrapped.load(Ordering::SeqCst) {
            return Err(HarnessError::Config(
                "nodes cannot start before genesis bootstrap completes".to_string(),
            ));
        }
        try_join_all(self.nodes.iter().map(|node| node.create_container())).await?;
        try_join_all(self.nodes.iter().map(|node| node.start_container())).await?;
        Ok(())
    }

    /// Stop and remove every container, reporting the first hard failure.
    ///
    /// Containers that are already gone are ignored.
    pub async fn teardown(&self) -> Result<()> {
        let results = futures::future::join_all(self.nodes.iter().map(|node| async move {
            match node.stop_container().await {
                Ok(()) | Err(HarnessError::NotFound(_)) => {}
                Err(e) => warn!(node = %node.name(), "Failed to stop container: {}", e),
            }
            match node.remove_container().await {
                Ok(()) | Err(HarnessError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        }))
        .await;
        results.into_iter().collect()
    }
}
