//! Error taxonomy for the harness
//!
//! Narrow retries happen only for `NotYetVisible` (tx not indexed yet) and the
//! catching-up state inside the readiness poll. Everything else surfaces to the
//! caller with enough context (hash, code, raw log, height) to assert on.

/// Harness result alias
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// RPC, container runtime or filesystem call failed outright
    #[error("transport error: {0}")]
    Transport(String),

    /// Command ran but exited non-zero
    #[error("command `{command}` exited with code {exit_code}: {stderr}")]
    Exec {
        command: String,
        exit_code: i64,
        stderr: String,
    },

    /// Transaction was submitted but the chain rejected it
    #[error("transaction {hash} failed with code {code}: {raw_log}")]
    RejectedTransaction {
        hash: String,
        code: u32,
        raw_log: String,
    },

    /// Queried resource is not observable yet
    #[error("not yet visible: {0}")]
    NotYetVisible(String),

    /// Node never left catching-up within the poll budget
    #[error(
        "node not ready after {attempts} attempts: height({last_height}) catching-up({catching_up})"
    )]
    ReadinessTimeout {
        attempts: u32,
        last_height: u64,
        catching_up: bool,
    },

    /// Container (or other named resource) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Output did not match the expected schema
    #[error("decode error: {0}")]
    Decode(String),

    #[error("operation cancelled")]
    Cancelled,

    /// Genesis bootstrap aborted at the given step
    #[error("genesis bootstrap failed at {step}: {source}")]
    Bootstrap {
        step: &'static str,
        #[source]
        source: Box<HarnessError>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    /// Whether a retry loop may try again after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, HarnessError::NotYetVisible(_))
    }

    pub(crate) fn bootstrap(step: &'static str, source: HarnessError) -> Self {
        HarnessError::Bootstrap {
            step,
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(e: serde_json::Error) -> Self {
        HarnessError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            HarnessError::NotFound(e.to_string())
        } else {
            HarnessError::Transport(e.to_string())
        }
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(e: reqwest::Error) -> Self {
        HarnessError::Transport(e.to_string())
    }
}

impl From<bollard::errors::Error> for HarnessError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => HarnessError::NotFound(message),
            other => HarnessError::Transport(other.to_string()),
        }
    }
}
