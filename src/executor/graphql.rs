use crate::executor::http::HttpExecutor;
use crate::job::{JobError, JobOptions};
use crate::throttle::AttemptScope;
use crate::transport::HttpRequest;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct GraphqlExecutor {
    http: HttpExecutor,
}

impl GraphqlExecutor {
    pub fn new(http: HttpExecutor) -> Self {
        Self { http }
    }

    /// POSTs the query body. A response carrying an `errors` list fails the
    /// job with the first entry's message even though the round-trip worked.
    pub async fn execute(
        &self,
        options: &JobOptions,
        url: &str,
        scope: &AttemptScope,
    ) -> Result<Value, JobError> {
        let request = HttpRequest::post(url)
            .with_body(options.body.clone())
            .with_headers(options.headers.as_ref())
            .with_default_header("content-type", "application/json");

        let response = self.http.send(&request, scope).await?;
        match first_error(&response) {
            Some(message) => Err(JobError::Graphql(message)),
            None => Ok(response),
        }
    }
}

fn first_error(response: &Value) -> Option<String> {
    let entry = response.get("errors")?.as_array()?.first()?;
    let message = entry
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| entry.to_string());
    Some(message)
}
