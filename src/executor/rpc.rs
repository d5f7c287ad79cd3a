//! Chain RPC jobs. The executor delegates to a [`ChainAdapter`]; the default
//! [`EthereumAdapter`] speaks JSON-RPC 2.0 over the shared transport.

use crate::job::{JobEnvelope, JobError};
use crate::throttle::AttemptScope;
use crate::transport::{HttpRequest, RetryPolicy, Transport};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One chain call, borrowed from the envelope being dispatched.
#[derive(Debug, Clone, Copy)]
pub struct ChainCall<'a> {
    pub url: &'a str,
    pub method: &'a str,
    pub params: &'a [Value],
    pub headers: Option<&'a BTreeMap<String, String>>,
    /// Throttling, per-attempt deadline and shutdown signal for this call.
    /// Pass it to [`Transport::attempt_request`] for network calls.
    pub scope: &'a AttemptScope,
}

/// Translates a chain call into a result.
///
/// Implementations must stop promptly once `call.scope.shutdown()` fires. A
/// call still running a short grace period after a forced stop is dropped and
/// its job completes with `TerminatedError`.
pub trait ChainAdapter: Send + Sync {
    fn translate<'a>(&'a self, call: ChainCall<'a>) -> BoxFuture<'a, Result<Value, JobError>>;
}

#[derive(Clone)]
pub struct RpcExecutor {
    adapter: Arc<dyn ChainAdapter>,
}

impl RpcExecutor {
    pub fn new(adapter: Arc<dyn ChainAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn execute(
        &self,
        envelope: &JobEnvelope,
        url: &str,
        scope: &AttemptScope,
    ) -> Result<Value, JobError> {
        let method = envelope
            .method
            .as_deref()
            .ok_or_else(|| JobError::InvalidJob("rpc job is missing `method`".into()))?;
        let params = envelope.params.as_deref().unwrap_or_default();

        self.adapter
            .translate(ChainCall {
                url,
                method,
                params,
                headers: envelope.options().headers.as_ref(),
                scope,
            })
            .await
    }
}

impl std::fmt::Debug for RpcExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcExecutor").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EthMethod {
    BlockNumber,
    GetTransactionReceipt,
    GetBlockByNumber,
    Call,
    GetLogs,
}

impl EthMethod {
    fn parse(method: &str) -> Option<Self> {
        match method {
            "eth_blockNumber" => Some(Self::BlockNumber),
            "eth_getTransactionReceipt" => Some(Self::GetTransactionReceipt),
            "eth_getBlockByNumber" => Some(Self::GetBlockByNumber),
            "eth_call" => Some(Self::Call),
            "eth_getLogs" => Some(Self::GetLogs),
            _ => None,
        }
    }

    fn check_params(self, method: &str, params: &[Value]) -> Result<(), JobError> {
        let shape_ok = match self {
            Self::BlockNumber => params.is_empty(),
            Self::GetTransactionReceipt => matches!(params, [Value::String(hash)] if is_hex(hash)),
            Self::GetBlockByNumber => matches!(
                params,
                [Value::String(block), Value::Bool(_)] if is_block_tag(block)
            ),
            Self::Call => match params {
                [Value::Object(call)] => call.contains_key("to"),
                [Value::Object(call), Value::String(block)] => {
                    call.contains_key("to") && is_block_tag(block)
                }
                _ => false,
            },
            Self::GetLogs => matches!(params, [Value::Object(_)]),
        };

        if shape_ok {
            Ok(())
        } else {
            Err(JobError::InvalidJob(format!(
                "invalid params for {method}: {}",
                Value::Array(params.to_vec())
            )))
        }
    }
}

fn is_hex(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_block_tag(value: &str) -> bool {
    is_hex(value) || matches!(value, "latest" | "earliest" | "pending" | "safe" | "finalized")
}

/// Ethereum JSON-RPC adapter.
#[derive(Debug)]
pub struct EthereumAdapter {
    transport: Transport,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl EthereumAdapter {
    pub fn new(transport: Transport, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, call: ChainCall<'_>) -> Result<Value, JobError> {
        let method = EthMethod::parse(call.method).ok_or_else(|| {
            JobError::Rpc(format!("method \"{}\" is not implemented", call.method))
        })?;
        method.check_params(call.method, call.params)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": call.method,
            "params": call.params,
        });
        let request = HttpRequest::post(call.url)
            .with_body(Some(payload.to_string()))
            .with_headers(call.headers)
            .with_default_header("content-type", "application/json");

        let response = self
            .transport
            .attempt_request(&request, call.scope, &self.retry)
            .await?;
        unwrap_response(call.method, response)
    }
}

impl ChainAdapter for EthereumAdapter {
    fn translate<'a>(&'a self, call: ChainCall<'a>) -> BoxFuture<'a, Result<Value, JobError>> {
        Box::pin(self.call(call))
    }
}

fn unwrap_response(method: &str, response: Value) -> Result<Value, JobError> {
    let mut body = match response {
        Value::Object(body) => body,
        other => {
            return Err(JobError::Rpc(format!(
                "{method} returned a non JSON-RPC response: {other}"
            )))
        }
    };

    if let Some(error) = body.get("error").filter(|error| !error.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(JobError::Rpc(format!("{method} failed with code {code}: {message}")));
    }

    body.remove("result")
        .ok_or_else(|| JobError::Rpc(format!("{method} response carried neither result nor error")))
}
