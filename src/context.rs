//! Per-query context
//!
//! A [`QueryContext`] travels with one query from the caller down to every
//! replica call. It carries the tenant, the cancellation token and optional
//! deadline, and the limiter and stats sink shared by all replica tasks.

use crate::limiter::QueryLimiter;
use crate::stats::QueryStats;
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Longest tenant id accepted.
pub const MAX_TENANT_ID_LENGTH: usize = 150;

#[derive(Debug, Clone)]
pub struct QueryContext {
    tenant: Option<String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    limiter: Arc<QueryLimiter>,
    stats: Arc<QueryStats>,
}

impl QueryContext {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
            ..Self::anonymous()
        }
    }

    /// Context with no tenant attached. Every query run with it fails
    /// with [`Error::Unauthenticated`].
    pub fn anonymous() -> Self {
        Self {
            tenant: None,
            cancel: CancellationToken::new(),
            deadline: None,
            limiter: Arc::new(QueryLimiter::unlimited()),
            stats: Arc::new(QueryStats::new()),
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<QueryLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_stats(mut self, stats: Arc<QueryStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set a deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// The validated tenant id.
    pub fn tenant_id(&self) -> Result<&str> {
        let tenant = self
            .tenant
            .as_deref()
            .ok_or_else(|| Error::Unauthenticated("no org id".to_string()))?;
        validate_tenant_id(tenant)?;
        Ok(tenant)
    }

    pub fn limiter(&self) -> &Arc<QueryLimiter> {
        &self.limiter
    }

    pub fn stats(&self) -> &Arc<QueryStats> {
        &self.stats
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A context sharing everything with this one, whose cancellation can be
    /// triggered independently. Canceling the parent cancels the child.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// Run `fut` until it completes, the context is canceled, or the
    /// deadline passes, whichever happens first.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Canceled),
            _ = expired => Err(Error::Timeout),
            res = fut => res,
        }
    }
}

/// Check a tenant id against the accepted character set and length.
pub fn validate_tenant_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Unauthenticated("no org id".to_string()));
    }
    if id.contains('|') {
        return Err(Error::Unauthenticated(
            "multiple org IDs present".to_string(),
        ));
    }
    if id.len() > MAX_TENANT_ID_LENGTH {
        return Err(Error::Unauthenticated(format!(
            "tenant ID is too long: max {} characters",
            MAX_TENANT_ID_LENGTH
        )));
    }
    if let Some(c) = id.chars().find(|&c| !is_supported_tenant_char(c)) {
        return Err(Error::Unauthenticated(format!(
            "tenant ID '{}' contains unsupported character '{}'",
            id, c
        )));
    }
    if id == "." || id == ".." {
        return Err(Error::Unauthenticated(
            "tenant ID is '.' or '..'".to_string(),
        ));
    }
    Ok(())
}

fn is_supported_tenant_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '!' | '-' | '_' | '.' | '*' | '\'' | '(' | ')')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_validation() {
        assert!(validate_tenant_id("team-a").is_ok());
        assert!(validate_tenant_id("Team_(prod).v2*'!").is_ok());

        for bad in ["", ".", "..", "a|b", "space here", "slash/", "ünïcode"] {
            assert!(
                matches!(validate_tenant_id(bad), Err(Error::Unauthenticated(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_tenant_id(&"x".repeat(150)).is_ok());
        assert!(validate_tenant_id(&"x".repeat(151)).is_err());
    }

    #[test]
    fn test_anonymous_context_has_no_tenant() {
        let ctx = QueryContext::anonymous();
        assert!(matches!(ctx.tenant_id(), Err(Error::Unauthenticated(_))));
        assert_eq!(QueryContext::new("t1").tenant_id().unwrap(), "t1");
    }

    #[tokio::test]
    async fn test_guard_returns_canceled() {
        let ctx = QueryContext::new("t1");
        ctx.cancellation().cancel();
        let res: Result<()> = ctx.guard(std::future::pending()).await;
        assert!(matches!(res, Err(Error::Canceled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_returns_timeout() {
        let ctx = QueryContext::new("t1").with_timeout(Duration::from_secs(5));
        let res: Result<()> = ctx.guard(std::future::pending()).await;
        assert!(matches!(res, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_child_cancelled_with_parent_only() {
        let parent = QueryContext::new("t1");
        let child = parent.child();
        child.cancellation().cancel();
        assert!(!parent.is_canceled());

        let other = parent.child();
        parent.cancellation().cancel();
        assert!(other.is_canceled());
        assert!(Arc::ptr_eq(other.limiter(), parent.limiter()));
    }

    #[test]
    fn test_earliest_deadline_wins() {
        let now = Instant::now();
        let ctx = QueryContext::new("t1")
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }
}
