//! Store-query fanout for history fetches.
//!
//! A history fetch tries up to `fanout` bootstrap peers in randomized
//! order, then a peerless fallback. The caller bumps its
//! `store_query_failover` counter when a later attempt succeeded after an
//! earlier one failed.

use std::future::Future;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::Result;

/// Default number of peers attempted per query.
pub const DEFAULT_STORE_QUERY_FANOUT: usize = 3;

/// The outcome of a fanout query.
#[derive(Debug)]
pub struct FanoutOutcome<T> {
    pub result: Vec<T>,
    /// Total attempts made, fallback included.
    pub attempts: u32,
    /// True when a later attempt succeeded after an earlier failure.
    pub failover: bool,
}

/// Run `query` against up to `fanout` peers in randomized order, falling
/// back to a peerless query (passed `None`) once all peers failed.
pub async fn store_query_fanout<T, F, Fut>(
    peers: &[String],
    fanout: usize,
    mut query: F,
) -> Result<FanoutOutcome<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut order: Vec<&String> = peers.iter().collect();
    order.shuffle(&mut rand::thread_rng());
    order.truncate(fanout);

    let mut attempts = 0u32;
    let mut failed = false;

    for peer in order {
        attempts += 1;
        match query(Some(peer.clone())).await {
            Ok(result) => {
                debug!(peer = %peer, attempts, "store query succeeded");
                return Ok(FanoutOutcome {
                    result,
                    attempts,
                    failover: failed,
                });
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "store query attempt failed");
                failed = true;
            }
        }
    }

    attempts += 1;
    let result = query(None).await?;
    Ok(FanoutOutcome {
        result,
        attempts,
        failover: failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn peers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("peer-{i}")).collect()
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let calls = AtomicU32::new(0);
        let outcome = store_query_fanout(&peers(3), 3, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(vec![1u32]) }
        })
        .await
        .expect("fanout");

        assert_eq!(outcome.result, vec![1]);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.failover);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failover_flag_set_on_later_success() {
        let calls = AtomicU32::new(0);
        let outcome = store_query_fanout(&peers(3), 3, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TransportError::Timeout("slow peer".into()))
                } else {
                    Ok(vec![7u32])
                }
            }
        })
        .await
        .expect("fanout");

        assert!(outcome.failover);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn peerless_fallback_runs_after_all_peers_fail() {
        let outcome = store_query_fanout(&peers(2), 2, |peer| async move {
            match peer {
                Some(_) => Err(TransportError::Timeout("down".into())),
                None => Ok(vec![9u32]),
            }
        })
        .await
        .expect("fanout");

        assert_eq!(outcome.result, vec![9]);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.failover);
    }

    #[tokio::test]
    async fn no_peers_goes_straight_to_fallback() {
        let outcome = store_query_fanout(&[], 3, |peer| async move {
            assert!(peer.is_none());
            Ok(Vec::<u32>::new())
        })
        .await
        .expect("fanout");

        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.failover);
    }

    #[tokio::test]
    async fn fanout_caps_peer_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<FanoutOutcome<u32>> = store_query_fanout(&peers(10), 2, |peer| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match peer {
                    Some(_) => Err(TransportError::Timeout("down".into())),
                    None => Ok(vec![]),
                }
            }
        })
        .await;

        assert!(result.is_ok());
        // Two peers plus the fallback.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
