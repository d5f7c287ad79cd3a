//! Routes envelopes to their executor.
//!
//! Each job gets an [`AttemptScope`] carrying its origin's rate limiter and its
//! effective timeout. Every network attempt, retries included, first takes a
//! limiter token and only then arms its own deadline, so throttling waits and
//! earlier attempts never eat into an attempt's timeout budget.

use crate::executor::content::ContentExecutor;
use crate::executor::graphql::GraphqlExecutor;
use crate::executor::http::HttpExecutor;
use crate::executor::rpc::{ChainAdapter, EthereumAdapter, RpcExecutor};
use crate::job::{JobEnvelope, JobError, JobKind};
use crate::throttle::{resolve_origin, AttemptScope, EndpointRegistry, RateLimiter};
use crate::transport::{RetryPolicy, Transport, TransportMetricsSnapshot};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Network-bound routes. `terminate` and unknown kinds never get this far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Rpc,
    Http,
    Graphql,
    ContentFetch,
}

#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<EndpointRegistry>,
    limiter: RateLimiter,
    http: HttpExecutor,
    graphql: GraphqlExecutor,
    content: ContentExecutor,
    rpc: RpcExecutor,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Builds every executor on top of one shared `transport`. Cancelling
    /// `shutdown` aborts throttling waits and in-flight network phases.
    pub fn new(
        registry: EndpointRegistry,
        transport: Transport,
        retry: RetryPolicy,
        gateway: &str,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let http = HttpExecutor::new(transport.clone(), retry);
        let adapter = Arc::new(EthereumAdapter::new(transport, retry));

        Ok(Self {
            limiter: RateLimiter::from_registry(&registry),
            registry: Arc::new(registry),
            graphql: GraphqlExecutor::new(http.clone()),
            content: ContentExecutor::new(http.clone(), gateway)?,
            rpc: RpcExecutor::new(adapter),
            http,
            shutdown,
        })
    }

    /// Replaces the chain adapter used for `rpc` jobs.
    pub fn with_chain_adapter(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.rpc = RpcExecutor::new(adapter);
        self
    }

    pub fn transport_metrics(&self) -> TransportMetricsSnapshot {
        self.http.transport().metrics()
    }

    /// Executes `envelope` and returns it with exactly one of `results` or
    /// `error` populated.
    pub async fn route(&self, envelope: JobEnvelope) -> JobEnvelope {
        let outcome = self.dispatch(&envelope).await;
        if let Err(err) = &outcome {
            tracing::debug!(
                job_type = envelope.job_type.as_str(),
                commissioner = envelope.commissioner.as_deref().unwrap_or_default(),
                error = %err,
                "job failed"
            );
        }
        envelope.complete(outcome)
    }

    async fn dispatch(&self, envelope: &JobEnvelope) -> Result<Value, JobError> {
        let route = match envelope.kind() {
            JobKind::Rpc => Route::Rpc,
            JobKind::Http => Route::Http,
            JobKind::Graphql => Route::Graphql,
            JobKind::ContentFetch => Route::ContentFetch,
            JobKind::Terminate => {
                return Err(JobError::InvalidJob(
                    "terminate is a control message and cannot be dispatched".into(),
                ))
            }
            JobKind::Other(name) => return Err(JobError::NotImplemented(name)),
        };

        let options = envelope.options();
        let target = match route {
            Route::ContentFetch => {
                let uri = options
                    .uri
                    .as_deref()
                    .ok_or_else(|| JobError::InvalidJob("options.uri is required".into()))?;
                self.content.resolve(uri)?
            }
            Route::Rpc | Route::Http | Route::Graphql => options
                .url
                .clone()
                .ok_or_else(|| JobError::InvalidJob("options.url is required".into()))?,
        };
        let origin = resolve_origin(&target)?;

        let timeout = options
            .timeout()
            .or_else(|| self.registry.default_timeout(&origin));
        let mut scope = AttemptScope::new(self.shutdown.clone()).with_timeout(timeout);
        if envelope.kind().is_throttled() {
            scope = scope.throttled(self.limiter.clone(), origin);
        }

        match route {
            Route::Rpc => self.rpc.execute(envelope, &target, &scope).await,
            Route::Http => self.http.execute(options, &target, &scope).await,
            Route::Graphql => self.graphql.execute(options, &target, &scope).await,
            Route::ContentFetch => self.content.execute(options, &target, &scope).await,
        }
    }
}
