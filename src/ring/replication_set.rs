//! Quorum-aware fan-out over a replication set

use super::InstanceDesc;
use crate::context::QueryContext;
use crate::{Error, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Instances selected to answer one query, and how many of them may fail.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationSet {
    pub instances: Vec<InstanceDesc>,
    pub max_errors: usize,
}

impl ReplicationSet {
    pub fn new(instances: Vec<InstanceDesc>, max_errors: usize) -> Self {
        Self {
            instances,
            max_errors,
        }
    }

    /// Number of successful calls needed before [`Self::do_with`] returns.
    pub fn min_success(&self) -> usize {
        self.instances.len().saturating_sub(self.max_errors)
    }

    pub fn addresses(&self) -> Vec<&str> {
        self.instances.iter().map(|i| i.addr.as_str()).collect()
    }

    /// Call `f` for every instance concurrently and return once
    /// `min_success` calls have succeeded.
    ///
    /// With a non-zero `extra_delay`, instances past the first
    /// `min_success` are held back by that delay and only start early when
    /// a failure frees a slot. More than `max_errors` failures yields
    /// [`Error::QuorumNotReached`]. Limit and context errors are returned
    /// immediately. Calls still running when this returns are dropped and
    /// their context is canceled.
    pub async fn do_with<T, F, Fut>(
        &self,
        ctx: &QueryContext,
        extra_delay: Duration,
        f: F,
    ) -> Result<Vec<T>>
    where
        F: Fn(QueryContext, InstanceDesc) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let min_success = self.min_success();
        if min_success == 0 {
            return Ok(Vec::new());
        }

        let scope = ctx.child();
        let _cancel_on_return = scope.cancellation().clone().drop_guard();
        let force_start = Arc::new(Semaphore::new(0));

        let mut pending = FuturesUnordered::new();
        for (idx, inst) in self.instances.iter().enumerate() {
            let hedged = !extra_delay.is_zero() && idx >= min_success;
            let call_ctx = scope.clone();
            let force_start = force_start.clone();
            let call = f(scope.clone(), inst.clone());
            let addr = inst.addr.clone();

            pending.push(async move {
                if hedged {
                    tokio::select! {
                        biased;
                        _ = call_ctx.cancellation().cancelled() => return (addr, Err(Error::Canceled)),
                        permit = force_start.acquire() => {
                            if let Ok(permit) = permit {
                                permit.forget();
                            }
                        }
                        _ = tokio::time::sleep(extra_delay) => {}
                    }
                }
                let res = call_ctx.guard(call).await;
                (addr, res)
            });
        }

        let mut results = Vec::with_capacity(min_success);
        let mut failures = 0usize;
        while let Some((addr, res)) = pending.next().await {
            match res {
                Ok(value) => {
                    results.push(value);
                    if results.len() >= min_success {
                        return Ok(results);
                    }
                }
                Err(e) if e.aborts_query() => return Err(e),
                Err(e) => {
                    failures += 1;
                    debug!(addr = %addr, failures, max_errors = self.max_errors, error = %e, "Replica call failed");
                    if failures > self.max_errors {
                        return Err(Error::QuorumNotReached {
                            failures,
                            max_errors: self.max_errors,
                            last: Box::new(e),
                        });
                    }
                    force_start.add_permits(1);
                }
            }
        }

        Err(Error::Internal(format!(
            "replication set exhausted with {} of {} required successes",
            results.len(),
            min_success
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn set(n: usize, max_errors: usize) -> ReplicationSet {
        let now = Utc::now();
        ReplicationSet::new(
            (0..n)
                .map(|i| InstanceDesc::new(format!("i{i}"), format!("addr-{i}"), now))
                .collect(),
            max_errors,
        )
    }

    fn unavailable() -> Error {
        Error::Transport(tonic::Status::unavailable("down"))
    }

    #[tokio::test]
    async fn test_tolerates_max_errors() {
        let rs = set(3, 1);
        let ctx = QueryContext::new("t1");
        let out = rs
            .do_with(&ctx, Duration::ZERO, |_, inst| async move {
                if inst.addr == "addr-1" {
                    Err(unavailable())
                } else {
                    Ok(inst.addr)
                }
            })
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(!out.contains(&"addr-1".to_string()));
    }

    #[tokio::test]
    async fn test_fails_past_max_errors() {
        let rs = set(3, 1);
        let ctx = QueryContext::new("t1");
        let err = rs
            .do_with(&ctx, Duration::ZERO, |_, inst| async move {
                if inst.addr == "addr-0" {
                    Ok(())
                } else {
                    Err(unavailable())
                }
            })
            .await
            .unwrap_err();
        match err {
            Error::QuorumNotReached {
                failures,
                max_errors,
                last,
            } => {
                assert_eq!(failures, 2);
                assert_eq!(max_errors, 1);
                assert_eq!(last.class(), "transport");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_limit_error_aborts_within_tolerance() {
        let rs = set(3, 1);
        let ctx = QueryContext::new("t1");
        let err = rs
            .do_with(&ctx, Duration::ZERO, |_, inst| async move {
                if inst.addr == "addr-2" {
                    Err(crate::limiter::LimitError::MaxSeries { limit: 1 }.into())
                } else {
                    std::future::pending::<Result<()>>().await
                }
            })
            .await
            .unwrap_err();
        assert!(err.is_limit_exceeded());
    }

    #[tokio::test]
    async fn test_remaining_calls_cancelled_after_quorum() {
        let rs = set(3, 1);
        let ctx = QueryContext::new("t1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        let out = rs
            .do_with(&ctx, Duration::ZERO, move |call_ctx, inst| {
                let seen = seen_in.clone();
                async move {
                    seen.lock().push(call_ctx.clone());
                    if inst.addr == "addr-2" {
                        std::future::pending::<()>().await;
                    }
                    Ok::<_, Error>(())
                }
            })
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(seen.lock().iter().all(|c| c.is_canceled()));
        assert!(!ctx.is_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hedged_instance_starts_early_on_failure() {
        let rs = set(3, 1);
        let ctx = QueryContext::new("t1");
        let started = Arc::new(AtomicUsize::new(0));
        let started_in = started.clone();
        let begin = tokio::time::Instant::now();

        let out = rs
            .do_with(&ctx, Duration::from_secs(60), move |_, inst| {
                let started = started_in.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    match inst.addr.as_str() {
                        "addr-0" => Err(unavailable()),
                        _ => Ok(inst.addr),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert!(begin.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hedged_instance_not_started_when_quorum_met() {
        let rs = set(3, 1);
        let ctx = QueryContext::new("t1");
        let started = Arc::new(AtomicUsize::new(0));
        let started_in = started.clone();

        rs.do_with(&ctx, Duration::from_secs(60), move |_, _| {
            let started = started_in.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(())
            }
        })
        .await
        .unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_replica_failure() {
        let rs = set(3, 2);
        let ctx = QueryContext::new("t1");
        ctx.cancellation().cancel();
        let err = rs
            .do_with(&ctx, Duration::ZERO, |_, _| std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(err.is_canceled());
    }
}
