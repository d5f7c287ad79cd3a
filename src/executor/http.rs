use crate::job::{JobError, JobOptions};
use crate::throttle::AttemptScope;
use crate::transport::{HttpRequest, RetryPolicy, Transport};
use serde_json::Value;

/// Plain HTTP executor; the other protocol executors are layered on top of it.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    transport: Transport,
    retry: RetryPolicy,
}

impl HttpExecutor {
    pub fn new(transport: Transport, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Issues `options.method` (GET when absent) against `url` with the job's
    /// body and headers.
    pub async fn execute(
        &self,
        options: &JobOptions,
        url: &str,
        scope: &AttemptScope,
    ) -> Result<Value, JobError> {
        let method = options.method.as_deref().unwrap_or("GET");
        let request = HttpRequest::new(method, url)
            .with_body(options.body.clone())
            .with_headers(options.headers.as_ref());
        self.send(&request, scope).await
    }

    pub async fn send(
        &self,
        request: &HttpRequest,
        scope: &AttemptScope,
    ) -> Result<Value, JobError> {
        Ok(self
            .transport
            .attempt_request(request, scope, &self.retry)
            .await?)
    }
}
