//! Readiness monitor and block-wait primitive
//!
//! Both poll node status under a [`RetryPolicy`], so neither can wait longer
//! than `attempts x delay` (plus the initial grace period).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::retry::{RetryError, RetryPolicy};
use crate::rpc::{ChainRpc, Status};

/// Wait `grace`, then poll `status` until the node reports it is not catching up.
///
/// Every failed poll (transport error or still catching up) is retried.
/// Exhaustion returns [`HarnessError::ReadinessTimeout`] carrying the last
/// observed height and catching-up flag.
pub async fn wait_until_ready(
    rpc: &dyn ChainRpc,
    grace: Duration,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Status> {
    if !grace.is_zero() {
        tokio::select! {
            _ = cancel.cancelled() => return Err(HarnessError::Cancelled),
            _ = tokio::time::sleep(grace) => {}
        }
    }

    let last_height = AtomicU64::new(0);
    let last_catching_up = AtomicBool::new(false);

    let outcome = policy
        .run(cancel, |_| true, |attempt| {
            let last_height = &last_height;
            let last_catching_up = &last_catching_up;
            async move {
                let status = rpc.status().await?;
                let height = status.sync_info.latest_block_height;
                last_height.store(height, Ordering::SeqCst);
                last_catching_up.store(status.sync_info.catching_up, Ordering::SeqCst);

                if status.sync_info.catching_up {
                    debug!(
                        "Still catching up (attempt {}): height({}) catching-up(true)",
                        attempt, height
                    );
                    return Err(HarnessError::NotYetVisible(format!(
                        "still catching up: height({}) catching-up(true)",
                        height
                    )));
                }
                Ok(status)
            }
        })
        .await;

    match outcome {
        Ok(status) => {
            info!(
                "Node ready at height {} ({})",
                status.sync_info.latest_block_height, status.node_info.network
            );
            Ok(status)
        }
        Err(RetryError::Cancelled) => Err(HarnessError::Cancelled),
        Err(RetryError::Aborted(e)) => Err(e),
        Err(RetryError::Exhausted { attempts, .. }) => Err(HarnessError::ReadinessTimeout {
            attempts,
            last_height: last_height.load(Ordering::SeqCst),
            catching_up: last_catching_up.load(Ordering::SeqCst),
        }),
    }
}

/// Poll budget for observing `delta` new blocks at the given block time
pub fn block_wait_policy(delta: u64, block_time: Duration) -> RetryPolicy {
    let delay = (block_time / 4).max(Duration::from_millis(100));
    let attempts = ((delta + 1) * 8).min(u32::MAX as u64) as u32;
    RetryPolicy::fixed(attempts, delay)
}

/// Block until the chain height has advanced by at least `delta`.
///
/// Returns the height observed once the target is reached.
pub async fn wait_for_blocks(
    rpc: &dyn ChainRpc,
    delta: u64,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<u64> {
    let start = rpc.height().await?;
    let target = start + delta;

    let outcome = policy
        .run(
            cancel,
            |e: &HarnessError| !matches!(e, HarnessError::Cancelled),
            |_| async move {
                let height = rpc.height().await?;
                if height >= target {
                    Ok(height)
                } else {
                    Err(HarnessError::NotYetVisible(format!(
                        "height {} has not reached {}",
                        height, target
                    )))
                }
            },
        )
        .await;

    match outcome {
        Ok(height) => {
            debug!("Waited for {} blocks: {} -> {}", delta, start, height);
            Ok(height)
        }
        Err(RetryError::Cancelled) => Err(HarnessError::Cancelled),
        Err(RetryError::Aborted(e)) => Err(e),
        Err(RetryError::Exhausted { attempts, last }) => Err(HarnessError::Transport(format!(
            "chain did not advance {} blocks from {} after {} polls: {}",
            delta, start, attempts, last
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{BlockResponse, BlockResults, NodeInfo, SyncInfo, TxResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Replays a scripted sequence of (height, catching_up); the last entry repeats
    struct ScriptedStatus {
        script: Vec<(u64, bool)>,
        calls: Mutex<usize>,
    }

    impl ScriptedStatus {
        fn new(script: Vec<(u64, bool)>) -> Self {
            Self {
                script,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainRpc for ScriptedStatus {
        async fn status(&self) -> Result<Status> {
            let mut calls = self.calls.lock().unwrap();
            let (height, catching_up) = self.script[(*calls).min(self.script.len() - 1)];
            *calls += 1;
            Ok(Status {
                node_info: NodeInfo {
                    id: "node".into(),
                    network: "test-1".into(),
                    moniker: "m".into(),
                },
                sync_info: SyncInfo {
                    latest_block_height: height,
                    catching_up,
                },
            })
        }

        async fn block(&self, _height: u64) -> Result<BlockResponse> {
            unimplemented!()
        }

        async fn block_results(&self, _height: u64) -> Result<BlockResults> {
            unimplemented!()
        }

        async fn tx(&self, _hash: &str) -> Result<TxResponse> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_ready_after_catching_up() {
        let rpc = ScriptedStatus::new(vec![(1, true), (2, true), (3, false)]);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));

        let status = wait_until_ready(&rpc, Duration::ZERO, &policy, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status.sync_info.latest_block_height, 3);
    }

    #[tokio::test]
    async fn test_never_ready_times_out_with_last_observation() {
        let rpc = ScriptedStatus::new(vec![(5, true), (6, true), (9, true)]);
        let policy = RetryPolicy::fixed(4, Duration::from_millis(5));

        let started = Instant::now();
        let err = wait_until_ready(&rpc, Duration::ZERO, &policy, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            HarnessError::ReadinessTimeout {
                attempts,
                last_height,
                catching_up,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_height, 9);
                assert!(catching_up);
            }
            other => panic!("expected readiness timeout, got {:?}", other),
        }
        // attempts x delay, with generous slack for scheduling
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(*rpc.calls.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_wait_for_blocks_observes_delta() {
        let rpc = ScriptedStatus::new(vec![(10, false), (10, false), (11, false), (12, false), (13, false)]);
        let policy = RetryPolicy::fixed(10, Duration::from_millis(1));

        let height = wait_for_blocks(&rpc, 2, &policy, &CancellationToken::new())
            .await
            .unwrap();
        assert!(height >= 12);
    }

    #[tokio::test]
    async fn test_wait_for_blocks_is_bounded() {
        let rpc = ScriptedStatus::new(vec![(10, false)]);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));

        let err = wait_for_blocks(&rpc, 2, &policy, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Transport(_)));
    }

    #[test]
    fn test_block_wait_policy_scales_with_delta() {
        let policy = block_wait_policy(2, Duration::from_secs(2));
        assert_eq!(policy.delay, Duration::from_millis(500));
        assert_eq!(policy.attempts, 24);
    }
}
