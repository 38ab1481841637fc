use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Docker image that runs the chain binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerImage {
    pub repository: String,
    pub version: String,
}

impl DockerImage {
    pub fn new(repository: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            version: version.into(),
        }
    }

    /// `repository:version` reference passed to the runtime
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.version)
    }
}

/// Kind of chain the nodes run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainType {
    #[default]
    Cosmos,
    /// Rollup app settled on a hub; validators also produce a sequencer gentx
    Rollapp,
}

impl std::str::FromStr for ChainType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosmos" => Ok(ChainType::Cosmos),
            "rollapp" => Ok(ChainType::Rollapp),
            other => anyhow::bail!("unknown chain type '{}', expected 'cosmos' or 'rollapp'", other),
        }
    }
}

/// Static description of one chain under test
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Short chain name, prefixed to every node's home directory
    pub name: String,
    pub chain_id: String,
    pub chain_type: ChainType,
    /// Chain daemon binary inside the image (e.g. `gaiad`)
    pub bin: String,
    pub image: DockerImage,
    /// Minimum gas price, e.g. `0.025stake`
    pub gas_prices: String,
    pub gas_adjustment: f64,
    pub coin_type: String,
    /// Opening balance of every validator account, comma-separated coins
    pub genesis_amount: String,
    /// Self-delegation put into each gentx
    pub self_delegation: String,
    /// Pass `--chain-id` to `add-genesis-account` (some binaries require it)
    pub using_chain_id_flag_cli: bool,
    /// Copy the home directory before `start` instead of running on the bind mount
    pub no_host_mount: bool,
    /// Use the `genesis` subcommand prefix (SDK >= 0.47). `None` checks the binary once.
    pub genesis_subcommand: Option<bool>,
    pub block_time: Duration,
}

impl ChainConfig {
    /// Defaults for a stock SDK chain; callers override what differs
    pub fn new(name: impl Into<String>, chain_id: impl Into<String>, bin: impl Into<String>, image: DockerImage) -> Self {
        Self {
            name: name.into(),
            chain_id: chain_id.into(),
            chain_type: ChainType::Cosmos,
            bin: bin.into(),
            image,
            gas_prices: "0.0stake".to_string(),
            gas_adjustment: 1.3,
            coin_type: "118".to_string(),
            genesis_amount: "10000000000000stake".to_string(),
            self_delegation: "5000000000stake".to_string(),
            using_chain_id_flag_cli: false,
            no_host_mount: false,
            genesis_subcommand: None,
            block_time: Duration::from_secs(2),
        }
    }
}

/// Harness configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub chain: ChainConfig,
    pub test_name: String,
    /// Docker network the node containers join
    pub network: String,
    /// Host directory bind-mounted at `/var/cosmos-chain`
    pub host_mount_dir: String,
    pub validators: usize,
    pub full_nodes: usize,
    pub readiness: RetryPolicy,
    pub readiness_grace: Duration,
}

impl HarnessConfig {
    /// Load configuration from environment variables
    ///
    /// Required environment variables:
    /// - CHAIN_ID: Chain id of the network under test
    /// - CHAIN_BIN: Daemon binary inside the image (e.g. gaiad)
    /// - CHAIN_IMAGE: Docker image repository
    ///
    /// Optional environment variables (with defaults):
    /// - CHAIN_NAME: Home directory prefix (default: CHAIN_ID)
    /// - CHAIN_TYPE: cosmos or rollapp (default: cosmos)
    /// - CHAIN_IMAGE_VERSION: Image tag (default: latest)
    /// - CHAIN_DENOM: Denom of the default gas price and balances (default: stake)
    /// - GAS_PRICES: Minimum gas price (default: 0.0<denom>)
    /// - GAS_ADJUSTMENT: Gas adjustment (default: 1.3)
    /// - COIN_TYPE: Key derivation coin type (default: 118)
    /// - GENESIS_AMOUNT / SELF_DELEGATION: Validator balances
    /// - GENESIS_SUBCOMMAND: true/false to skip probing the binary
    /// - NO_HOST_MOUNT, USING_CHAIN_ID_FLAG_CLI: Binary quirks (default: false)
    /// - VALIDATORS / FULL_NODES: Topology (default: 1 / 0)
    /// - TEST_NAME: Container name suffix (default: node-harness)
    /// - DOCKER_NETWORK: Network name (default: node-harness)
    /// - HOST_MOUNT_DIR: Host side of the bind mount (default: /tmp)
    /// - READINESS_ATTEMPTS / READINESS_DELAY_MS / READINESS_GRACE_MS: Readiness poll
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenv::dotenv().ok();

        let chain_id = env::var("CHAIN_ID")
            .context("CHAIN_ID environment variable is required")?;

        let bin = env::var("CHAIN_BIN")
            .context("CHAIN_BIN environment variable is required")?;

        let image_repository = env::var("CHAIN_IMAGE")
            .context("CHAIN_IMAGE environment variable is required")?;

        let image_version = env::var("CHAIN_IMAGE_VERSION")
            .unwrap_or_else(|_| "latest".to_string());

        let name = env::var("CHAIN_NAME").unwrap_or_else(|_| chain_id.clone());

        let mut chain = ChainConfig::new(
            name,
            chain_id,
            bin,
            DockerImage::new(image_repository, image_version),
        );

        if let Ok(denom) = env::var("CHAIN_DENOM") {
            chain.gas_prices = format!("0.0{}", denom);
            chain.genesis_amount = format!("10000000000000{}", denom);
            chain.self_delegation = format!("5000000000{}", denom);
        }
        if let Ok(chain_type) = env::var("CHAIN_TYPE") {
            chain.chain_type = chain_type
                .parse()
                .context("CHAIN_TYPE must be 'cosmos' or 'rollapp'")?;
        }
        if let Ok(gas_prices) = env::var("GAS_PRICES") {
            chain.gas_prices = gas_prices;
        }
        if let Ok(amount) = env::var("GENESIS_AMOUNT") {
            chain.genesis_amount = amount;
        }
        if let Ok(amount) = env::var("SELF_DELEGATION") {
            chain.self_delegation = amount;
        }
        if let Ok(coin_type) = env::var("COIN_TYPE") {
            chain.coin_type = coin_type;
        }

        chain.gas_adjustment = env::var("GAS_ADJUSTMENT")
            .unwrap_or_else(|_| "1.3".to_string())
            .parse::<f64>()
            .context("GAS_ADJUSTMENT must be a valid number")?;

        chain.genesis_subcommand = env::var("GENESIS_SUBCOMMAND")
            .ok()
            .map(|v| v.parse::<bool>())
            .transpose()
            .context("GENESIS_SUBCOMMAND must be 'true' or 'false'")?;

        chain.no_host_mount = env::var("NO_HOST_MOUNT")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .context("NO_HOST_MOUNT must be 'true' or 'false'")?;

        chain.using_chain_id_flag_cli = env::var("USING_CHAIN_ID_FLAG_CLI")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .context("USING_CHAIN_ID_FLAG_CLI must be 'true' or 'false'")?;

        let block_time_ms = env::var("BLOCK_TIME_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse::<u64>()
            .context("BLOCK_TIME_MS must be a valid number")?;
        chain.block_time = Duration::from_millis(block_time_ms);

        let validators = env::var("VALIDATORS")
            .unwrap_or_else(|_| "1".to_string())
            .parse::<usize>()
            .context("VALIDATORS must be a valid number")?;

        let full_nodes = env::var("FULL_NODES")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<usize>()
            .context("FULL_NODES must be a valid number")?;

        let test_name = env::var("TEST_NAME")
            .unwrap_or_else(|_| "node-harness".to_string());

        let network = env::var("DOCKER_NETWORK")
            .unwrap_or_else(|_| "node-harness".to_string());

        let host_mount_dir = env::var("HOST_MOUNT_DIR")
            .unwrap_or_else(|_| "/tmp".to_string());

        let readiness_attempts = env::var("READINESS_ATTEMPTS")
            .unwrap_or_else(|_| "40".to_string())
            .parse::<u32>()
            .context("READINESS_ATTEMPTS must be a valid number")?;

        let readiness_delay_ms = env::var("READINESS_DELAY_MS")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u64>()
            .context("READINESS_DELAY_MS must be a valid number")?;

        let readiness_grace_ms = env::var("READINESS_GRACE_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u64>()
            .context("READINESS_GRACE_MS must be a valid number")?;

        Ok(Self {
            chain,
            test_name,
            network,
            host_mount_dir,
            validators,
            full_nodes,
            readiness: RetryPolicy::fixed(
                readiness_attempts,
                Duration::from_millis(readiness_delay_ms),
            ),
            readiness_grace: Duration::from_millis(readiness_grace_ms),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chain.chain_id.is_empty() {
            anyhow::bail!("Chain id cannot be empty");
        }

        if self.chain.name.is_empty() {
            anyhow::bail!("Chain name cannot be empty");
        }

        if self.chain.bin.is_empty() {
            anyhow::bail!("Chain binary cannot be empty");
        }

        if self.validators == 0 {
            anyhow::bail!("At least one validator is required to produce a genesis");
        }

        if self.chain.gas_adjustment <= 0.0 {
            anyhow::bail!("Gas adjustment must be positive");
        }

        if self.readiness.attempts == 0 {
            anyhow::bail!("Readiness attempts must be at least 1");
        }

        Ok(())
    }
}
