use anyhow::Result;
use serde_json::json;

use crate::support::{
    helpers::{config_builder, error_of, http_job, worker},
    mock_http::{MockHttpServer, Reply},
};

fn rate_limited(times: usize) -> Vec<Reply> {
    (0..times)
        .map(|_| Reply::status(429, "Too Many Requests"))
        .collect()
}

#[tokio::test]
async fn recovers_after_k_rate_limited_attempts() -> Result<()> {
    let k = 3;
    let server =
        MockHttpServer::with_script(rate_limited(k), Reply::json(json!({ "ok": true }))).await?;
    let worker = worker(config_builder().max_retries(k));

    let done = worker
        .submit_value(http_job(&server.endpoint("/"), "GET"))
        .await;

    assert_eq!(done["results"], json!({ "ok": true }));
    assert!(done["error"].is_null());
    assert_eq!(server.request_count(), k + 1);
    assert_eq!(worker.transport_metrics().total_retries, k as u64);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn gives_up_after_max_retries_plus_one() -> Result<()> {
    let max_retries = 1;
    let server =
        MockHttpServer::with_script(rate_limited(5), Reply::json(json!({ "ok": true }))).await?;
    let worker = worker(config_builder().max_retries(max_retries));
    let url = server.endpoint("/limited");

    let done = worker.submit_value(http_job(&url, "GET")).await;

    let error = error_of(&done);
    assert!(error.contains("429"));
    assert!(error.contains(&url));
    assert!(error.contains("Too Many Requests"));
    assert!(done["results"].is_null());
    assert_eq!(server.request_count(), max_retries + 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn server_errors_are_retried() -> Result<()> {
    let server = MockHttpServer::with_script(
        vec![Reply::status(503, "unavailable"), Reply::status(500, "boom")],
        Reply::json(json!("recovered")),
    )
    .await?;
    let worker = worker(config_builder().max_retries(2));

    let done = worker
        .submit_value(http_job(&server.endpoint("/"), "GET"))
        .await;

    assert_eq!(done["results"], json!("recovered"));
    assert_eq!(server.request_count(), 3);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn not_found_is_never_retried() -> Result<()> {
    let server = MockHttpServer::start(Reply::status(404, "missing")).await?;
    let worker = worker(config_builder().max_retries(5));

    let done = worker
        .submit_value(http_job(&server.endpoint("/nope"), "GET"))
        .await;

    assert!(error_of(&done).contains("404"));
    assert_eq!(server.request_count(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn connection_failures_surface_as_fetch_errors() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!(null))).await?;
    let url = server.endpoint("/");
    server.shutdown().await;

    let worker = worker(config_builder().max_retries(1));
    let done = worker.submit_value(http_job(&url, "GET")).await;

    let error = error_of(&done);
    assert!(error.starts_with("FetchError"), "{error}");
    assert!(error.contains(&url));
    assert_eq!(worker.transport_metrics().total_retries, 1);
    Ok(())
}
