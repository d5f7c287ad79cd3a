use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use extraction_worker::{
    ChainAdapter, ChainCall, Collaborators, ExtractionWorker, JobError, ENGINE_VERSION,
};
use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::support::{
    helpers::{config_builder, error_of, init_tracing, worker},
    mock_http::{MockHttpServer, Reply},
};

fn rpc_job(url: &str, method: &str, params: Value) -> Value {
    json!({
        "type": "json-rpc",
        "version": ENGINE_VERSION,
        "commissioner": "integration-test",
        "options": { "url": url },
        "method": method,
        "params": params,
        "results": null,
        "error": null,
    })
}

#[tokio::test]
async fn block_number_round_trip() -> Result<()> {
    let server =
        MockHttpServer::start(Reply::json(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x10d4f" })))
            .await?;
    let worker = worker(config_builder());

    let done = worker
        .submit_value(rpc_job(server.url(), "eth_blockNumber", json!([])))
        .await;

    assert_eq!(done["results"], json!("0x10d4f"));
    assert_eq!(done["type"], json!("json-rpc"));
    assert_eq!(done["method"], json!("eth_blockNumber"));

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.headers["content-type"], "application/json");
    let payload: Value = serde_json::from_str(&request.body)?;
    assert_eq!(payload["jsonrpc"], json!("2.0"));
    assert_eq!(payload["method"], json!("eth_blockNumber"));
    assert_eq!(payload["params"], json!([]));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rpc_error_objects_fail_the_job() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": -32000, "message": "execution reverted" },
    })))
    .await?;
    let worker = worker(config_builder());

    let done = worker
        .submit_value(rpc_job(
            server.url(),
            "eth_call",
            json!([{ "to": "0x0000000000000000000000000000000000000001", "data": "0x" }, "latest"]),
        ))
        .await;

    let error = error_of(&done);
    assert!(error.starts_with("RpcError"), "{error}");
    assert!(error.contains("execution reverted"));
    assert!(done["results"].is_null());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn malformed_params_never_reach_the_network() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!({ "result": null }))).await?;
    let worker = worker(config_builder());

    let done = worker
        .submit_value(rpc_job(
            server.url(),
            "eth_getTransactionReceipt",
            json!(["not-a-hash"]),
        ))
        .await;

    assert!(error_of(&done).starts_with("InvalidJobError"));
    assert_eq!(server.request_count(), 0);

    server.shutdown().await;
    Ok(())
}

struct EchoAdapter;

impl ChainAdapter for EchoAdapter {
    fn translate<'a>(&'a self, call: ChainCall<'a>) -> BoxFuture<'a, Result<Value, JobError>> {
        Box::pin(async move {
            if call.method == "fail" {
                return Err(JobError::Rpc("adapter refused".into()));
            }
            Ok(json!({ "url": call.url, "method": call.method, "params": call.params }))
        })
    }
}

#[tokio::test]
async fn custom_chain_adapter_replaces_ethereum() -> Result<()> {
    init_tracing();
    let config = config_builder().build()?;
    let worker = ExtractionWorker::with_collaborators(
        config,
        Collaborators {
            chain_adapter: Some(Arc::new(EchoAdapter)),
            ..Collaborators::default()
        },
    )?;

    let done = worker
        .submit_value(rpc_job("http://127.0.0.1:9/node", "getblockcount", json!([1, "two"])))
        .await;
    assert_eq!(
        done["results"],
        json!({ "url": "http://127.0.0.1:9/node", "method": "getblockcount", "params": [1, "two"] })
    );

    let failed = worker
        .submit_value(rpc_job("http://127.0.0.1:9/node", "fail", json!([])))
        .await;
    assert_eq!(error_of(&failed), "RpcError: adapter refused");
    assert_eq!(worker.transport_metrics().total_requests, 0);
    Ok(())
}

struct StalledAdapter;

impl ChainAdapter for StalledAdapter {
    fn translate<'a>(&'a self, _call: ChainCall<'a>) -> BoxFuture<'a, Result<Value, JobError>> {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn terminate_does_not_wait_on_an_adapter_that_ignores_shutdown() -> Result<()> {
    init_tracing();
    let config = config_builder()
        .concurrency(1)
        .drain_timeout(Duration::from_millis(100))
        .build()?;
    let worker = ExtractionWorker::with_collaborators(
        config,
        Collaborators {
            chain_adapter: Some(Arc::new(StalledAdapter)),
            ..Collaborators::default()
        },
    )?;

    let stalled = worker
        .enqueue_value(rpc_job("http://127.0.0.1:9/node", "getblockcount", json!([])))
        .expect("job should pass validation");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = tokio::time::Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(5), worker.terminate())
        .await
        .expect("terminate should not hang on a stalled adapter");
    assert!(!report.drained);
    assert!(started.elapsed() < Duration::from_secs(3));

    let stalled = stalled.wait().await;
    assert!(stalled.results.is_none());
    assert!(stalled
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("TerminatedError")));
    Ok(())
}
