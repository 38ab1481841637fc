//! Argument vectors for the chain binary
//!
//! Everything in here is pure: a logical intent plus node identity in, a
//! concrete argv out. Execution lives in [`crate::node`].

use crate::config::{ChainConfig, ChainType};

/// Name of the key every validator signs its gentx with
pub const VALIDATOR_KEY: &str = "validator";

/// Keyring backend used for every key the harness creates
pub const KEYRING_BACKEND_TEST: &str = "test";

pub const P2P_PORT: &str = "26656/tcp";
pub const RPC_PORT: &str = "26657/tcp";
pub const GRPC_PORT: &str = "9090/tcp";
pub const API_PORT: &str = "1317/tcp";
pub const PRIV_VAL_PORT: &str = "1234/tcp";

/// Ports every node container exposes
pub const SENTRY_PORTS: [&str; 5] = [P2P_PORT, RPC_PORT, GRPC_PORT, API_PORT, PRIV_VAL_PORT];

/// Keyring directory, under a key dir, holding hub-side sequencer keys
pub const SEQUENCER_KEYS_DIR: &str = "sequencer_keys";

/// Longest moniker the staking module accepts
pub const MAX_MONIKER_LENGTH: usize = 70;

/// Builds argv for one node
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder<'a> {
    chain: &'a ChainConfig,
    home_dir: &'a str,
    host_name: &'a str,
    genesis_prefix: bool,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(chain: &'a ChainConfig, home_dir: &'a str, host_name: &'a str, genesis_prefix: bool) -> Self {
        Self {
            chain,
            home_dir,
            host_name,
            genesis_prefix,
        }
    }

    /// `<bin> <args...> --home <home>`
    pub fn bin<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cmd = vec![self.chain.bin.clone()];
        cmd.extend(args.into_iter().map(|a| a.as_ref().to_string()));
        cmd.push("--home".to_string());
        cmd.push(self.home_dir.to_string());
        cmd
    }

    /// Bin command plus `--node` pointing at this node's RPC on the docker network
    pub fn node<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cmd = self.bin(args);
        cmd.push("--node".to_string());
        cmd.push(format!("tcp://{}:26657", self.host_name));
        cmd
    }

    /// `query <args...> --output json` against this node
    pub fn query<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut full = vec!["query".to_string()];
        full.extend(args.into_iter().map(|a| a.as_ref().to_string()));
        full.push("--output".to_string());
        full.push("json".to_string());
        self.node(full)
    }

    /// Full broadcast command for a transaction signed by `key_name`.
    ///
    /// `--gas-prices` is injected only when neither `--gas-prices` nor
    /// `--fees` was supplied; `--gas-adjustment` only when absent. Both the
    /// `--flag value` and `--flag=value` forms count as supplied.
    pub fn tx<I, S>(&self, key_name: &str, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut full = vec!["tx".to_string()];
        full.extend(args.into_iter().map(|a| a.as_ref().to_string()));

        let has = |flag: &str| full.iter().any(|a| flag_matches(a, flag));
        let gas_price_found = has("--gas-prices");
        let fees_found = has("--fees");
        let gas_adjustment_found = has("--gas-adjustment");

        if !gas_price_found && !fees_found {
            full.push("--gas-prices".to_string());
            full.push(self.chain.gas_prices.clone());
        }
        if !gas_adjustment_found {
            full.push("--gas-adjustment".to_string());
            full.push(self.chain.gas_adjustment.to_string());
        }

        full.extend(
            [
                "--from",
                key_name,
                "--keyring-backend",
                KEYRING_BACKEND_TEST,
                "--output",
                "json",
                "-y",
                "--chain-id",
                self.chain.chain_id.as_str(),
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        self.node(full)
    }

    /// Genesis-family verb, prefixed with `genesis` on newer SDKs
    pub fn genesis<I, S>(&self, verb: &str, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut full = Vec::new();
        if self.genesis_prefix {
            full.push("genesis".to_string());
        }
        full.push(verb.to_string());
        full.extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self.bin(full)
    }

    /// `init <moniker> --chain-id <id>`
    pub fn init(&self, moniker: &str) -> Vec<String> {
        let moniker = condense_moniker(moniker);
        self.bin(["init", moniker.as_str(), "--chain-id", self.chain.chain_id.as_str()])
    }

    /// `keys add <name>` in the test keyring
    pub fn add_key(&self, name: &str) -> Vec<String> {
        self.bin([
            "keys",
            "add",
            name,
            "--coin-type",
            self.chain.coin_type.as_str(),
            "--keyring-backend",
            KEYRING_BACKEND_TEST,
        ])
    }

    /// Shell pipeline restoring a key from a mnemonic
    pub fn recover_key(&self, name: &str, mnemonic: &str) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "echo {} | {} keys add {} --recover --keyring-backend {} --coin-type {} --home {} --output json",
                shell_quote(mnemonic),
                self.chain.bin,
                name,
                KEYRING_BACKEND_TEST,
                self.chain.coin_type,
                self.home_dir
            ),
        ]
    }

    /// `keys add <name>` in the sequencer keyring under `key_dir`
    pub fn add_hub_key(&self, name: &str, key_dir: &str) -> Vec<String> {
        let keyring_dir = sequencer_keyring_dir(key_dir);
        let mut cmd = self.add_key(name);
        cmd.push("--keyring-dir".to_string());
        cmd.push(keyring_dir);
        cmd
    }

    /// `keys show --address <name>` with an optional bech prefix (acc|val|cons)
    pub fn show_key_address(&self, name: &str, bech: Option<&str>) -> Vec<String> {
        let mut args = vec!["keys", "show", "--address", name, "--keyring-backend", KEYRING_BACKEND_TEST];
        if let Some(bech) = bech {
            args.push("--bech");
            args.push(bech);
        }
        self.bin(args)
    }

    /// [`CommandBuilder::show_key_address`] against the sequencer keyring
    pub fn show_hub_key_address(&self, name: &str, bech: Option<&str>, key_dir: &str) -> Vec<String> {
        let mut cmd = self.show_key_address(name, bech);
        cmd.push("--keyring-dir".to_string());
        cmd.push(sequencer_keyring_dir(key_dir));
        cmd
    }

    /// `dymint show-sequencer`, printing the sequencer public key
    pub fn show_sequencer(&self) -> Vec<String> {
        self.bin(["dymint", "show-sequencer"])
    }

    /// Sequencer gentx of a rollapp validator
    pub fn gentx_seq(&self, key_name: &str, pubkey: &str) -> Vec<String> {
        self.bin([
            "gentx_seq",
            "--pubkey",
            pubkey,
            "--from",
            key_name,
            "--keyring-backend",
            KEYRING_BACKEND_TEST,
        ])
    }

    pub fn add_genesis_account(&self, address: &str, amount: &str) -> Vec<String> {
        let mut args = vec![address.to_string(), amount.to_string()];
        if self.chain.using_chain_id_flag_cli {
            args.push("--chain-id".to_string());
            args.push(self.chain.chain_id.clone());
        }
        self.genesis("add-genesis-account", args)
    }

    pub fn gentx(&self, key_name: &str, self_delegation: &str) -> Vec<String> {
        self.genesis(
            "gentx",
            [
                key_name,
                self_delegation,
                "--keyring-backend",
                KEYRING_BACKEND_TEST,
                "--chain-id",
                self.chain.chain_id.as_str(),
            ],
        )
    }

    pub fn collect_gentxs(&self) -> Vec<String> {
        self.genesis("collect-gentxs", std::iter::empty::<&str>())
    }

    /// `export --height <h>`; newer SDKs write to a file instead of stderr
    pub fn export(&self, height: u64, output_document: Option<&str>) -> Vec<String> {
        let height = height.to_string();
        let mut args = vec!["export", "--height", height.as_str()];
        if let Some(doc) = output_document {
            args.push("--output-document");
            args.push(doc);
        }
        self.bin(args)
    }

    pub fn unsafe_reset_all(&self) -> Vec<String> {
        if self.genesis_prefix {
            self.bin(["comet", "unsafe-reset-all"])
        } else {
            self.bin(["unsafe-reset-all"])
        }
    }

    /// Long-running process command for the node container.
    ///
    /// Rollapps have no crisis module, so they start without the invariant
    /// skip flag and always on the mount.
    pub fn start(&self) -> Vec<String> {
        if self.chain.chain_type == ChainType::Rollapp {
            return vec![
                self.chain.bin.clone(),
                "start".to_string(),
                "--home".to_string(),
                self.home_dir.to_string(),
            ];
        }
        if self.chain.no_host_mount {
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!(
                    "cp -r {home} {home}_nomnt && {bin} start --home {home}_nomnt --x-crisis-skip-assert-invariants",
                    home = self.home_dir,
                    bin = self.chain.bin
                ),
            ]
        } else {
            vec![
                self.chain.bin.clone(),
                "start".to_string(),
                "--home".to_string(),
                self.home_dir.to_string(),
                "--x-crisis-skip-assert-invariants".to_string(),
            ]
        }
    }

    pub fn version(&self) -> Vec<String> {
        self.bin(["version", "--long", "--output", "json"])
    }
}

/// `<key_dir>/sequencer_keys`
pub fn sequencer_keyring_dir(key_dir: &str) -> String {
    format!("{}/{}", key_dir.trim_end_matches('/'), SEQUENCER_KEYS_DIR)
}

/// Fit a moniker into the staking module's length limit.
///
/// Short monikers are returned unchanged. Long ones keep both ends, join them
/// with `...` and append a base36 FNV-32 suffix of the full name so names
/// differing only in the middle stay distinct.
pub fn condense_moniker(moniker: &str) -> String {
    if moniker.len() <= MAX_MONIKER_LENGTH {
        return moniker.to_string();
    }

    let suffix = format!("-{}", to_base36(fnv32(moniker.as_bytes()) as u64));
    let want_len = MAX_MONIKER_LENGTH - suffix.len();
    let keep_len = want_len / 2 - 2;

    let head = truncate_at_char_boundary(moniker, keep_len);
    let tail = tail_at_char_boundary(moniker, keep_len);
    format!("{}...{}{}", head, tail, suffix)
}

/// Replace characters docker rejects in container names
pub fn sanitize_container_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Hostnames longer than 63 characters fail DNS resolution
pub fn condense_host_name(name: &str) -> String {
    if name.len() < 64 {
        return name.to_string();
    }
    format!(
        "{}_._{}",
        truncate_at_char_boundary(name, 30),
        tail_at_char_boundary(name, 30)
    )
}

// FNV-1, 32 bit
fn fnv32(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in data {
        hash = hash.wrapping_mul(0x0100_0193);
        hash ^= *b as u32;
    }
    hash
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn tail_at_char_boundary(s: &str, max: usize) -> &str {
    let mut start = s.len().saturating_sub(max);
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// `arg` is `flag` or `flag=<value>`
fn flag_matches(arg: &str, flag: &str) -> bool {
    match arg.strip_prefix(flag) {
        Some(rest) => rest.is_empty() || rest.starts_with('='),
        None => false,
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
