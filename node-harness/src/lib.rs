pub mod block;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod genesis;
pub mod lifecycle;
pub mod node;
pub mod readiness;
pub mod retry;
pub mod rpc;
pub mod runtime;
pub mod tx;
pub mod volume;

pub use block::{find_txs, CosmosTxDecoder, TxAttribute, TxDecoder, TxRecord};
pub use config::{ChainConfig, ChainType, DockerImage, HarnessConfig};
pub use context::HarnessContext;
pub use error::{HarnessError, Result};
pub use genesis::{GenesisBundle, NodeSet};
pub use node::{Node, SdkCapabilities};
pub use retry::RetryPolicy;
pub use tx::{ConfirmedTx, TxResult};
