//! Request context and correlation
//!
//! Ambient per-task context carrying a correlation id and a source tag.
//! The context rides a `tokio::task_local!`; spawned tasks must copy the
//! parent context explicitly via [`spawn_with_context`] — the runtime never
//! threads it for us.

use serde::Serialize;
use std::future::Future;
use tokio::task::JoinHandle;
use uuid::Uuid;

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Where a request or job originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextSource {
    Http,
    Scheduler,
    Manual,
    Unknown,
}

impl ContextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Scheduler => "scheduler",
            Self::Manual => "manual",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ContextSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ambient context attached to every core call and log entry.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub correlation_id: Uuid,
    pub source: ContextSource,
    pub user_id: Option<String>,
    pub job_name: Option<String>,
}

impl RequestContext {
    pub fn http(user_id: Option<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            source: ContextSource::Http,
            user_id,
            job_name: None,
        }
    }

    pub fn scheduler(job_name: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            source: ContextSource::Scheduler,
            user_id: None,
            job_name: Some(job_name.into()),
        }
    }

    pub fn manual(user_id: Option<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            source: ContextSource::Manual,
            user_id,
            job_name: None,
        }
    }

    /// Fallback for call sites reached without an ambient context.
    pub fn unknown() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            source: ContextSource::Unknown,
            user_id: None,
            job_name: None,
        }
    }
}

/// The current task's context, or a fresh `source=unknown` one when the task
/// was entered without [`scope`].
pub fn current() -> RequestContext {
    REQUEST_CONTEXT
        .try_with(|ctx| ctx.clone())
        .unwrap_or_else(|_| RequestContext::unknown())
}

/// Run a future with `ctx` as the ambient context.
pub async fn scope<F: Future>(ctx: RequestContext, fut: F) -> F::Output {
    REQUEST_CONTEXT.scope(ctx, fut).await
}

/// Spawn a task that carries `ctx` as its ambient context.
pub fn spawn_with_context<F>(ctx: RequestContext, fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(REQUEST_CONTEXT.scope(ctx, fut))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_current_without_scope_is_unknown() {
        let ctx = current();
        assert_eq!(ctx.source, ContextSource::Unknown);
    }

    #[tokio::test]
    async fn test_scope_propagates_context() {
        let ctx = RequestContext::scheduler("sweep:1");
        let id = ctx.correlation_id;
        let seen = scope(ctx, async { current() }).await;
        assert_eq!(seen.correlation_id, id);
        assert_eq!(seen.source, ContextSource::Scheduler);
        assert_eq!(seen.job_name.as_deref(), Some("sweep:1"));
    }

    #[tokio::test]
    async fn test_spawn_with_context_copies_parent() {
        let ctx = RequestContext::manual(Some("admin".into()));
        let id = ctx.correlation_id;
        let seen = spawn_with_context(ctx, async { current() }).await.unwrap();
        assert_eq!(seen.correlation_id, id);
        assert_eq!(seen.source, ContextSource::Manual);
    }
}
