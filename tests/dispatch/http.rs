use anyhow::Result;
use serde_json::json;

use crate::support::{
    helpers::{assert_completed, config_builder, error_of, http_job, worker},
    mock_http::{MockHttpServer, Reply},
};

#[tokio::test]
async fn returns_parsed_json_results() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!({ "hello": "world" }))).await?;
    let worker = worker(config_builder());

    let done = worker
        .submit_value(http_job(&server.endpoint("/hello"), "GET"))
        .await;

    assert_eq!(done["results"], json!({ "hello": "world" }));
    assert!(done["error"].is_null());
    assert_eq!(done["commissioner"], json!("integration-test"));
    assert_eq!(done["options"]["url"], json!(server.endpoint("/hello")));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/hello");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn falls_back_to_plaintext_results() -> Result<()> {
    let server = MockHttpServer::start(Reply::text("<html>hello</html>")).await?;
    let worker = worker(config_builder());

    let done = worker
        .submit_value(http_job(&server.endpoint("/page"), "GET"))
        .await;

    assert_eq!(done["results"], json!("<html>hello</html>"));
    assert!(done["error"].is_null());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn plaintext_without_content_type_is_a_result() -> Result<()> {
    let server = MockHttpServer::start(Reply::text("hello").with_content_type(None)).await?;
    let worker = worker(config_builder());

    let done = worker
        .submit_value(http_job(&server.endpoint("/"), "GET"))
        .await;
    assert_eq!(done["results"], json!("hello"));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn malformed_json_with_json_content_type_fails_once() -> Result<()> {
    let server = MockHttpServer::start(
        Reply::text("{not json").with_content_type(Some("application/json")),
    )
    .await?;
    let worker = worker(config_builder());

    let done = worker
        .submit_value(http_job(&server.endpoint("/"), "GET"))
        .await;

    assert_completed(&done);
    assert!(error_of(&done).starts_with("ParseError"));
    assert!(error_of(&done).contains("{not json"));
    assert_eq!(server.request_count(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn client_errors_bail_with_diagnostics() -> Result<()> {
    let server = MockHttpServer::start(Reply::status(401, "unauthorized")).await?;
    let worker = worker(config_builder());
    let url = server.endpoint("/private");

    let done = worker.submit_value(http_job(&url, "GET")).await;

    let error = error_of(&done);
    assert!(error.starts_with("HttpError"));
    assert!(error.contains(&url));
    assert!(error.contains("GET"));
    assert!(error.contains("401"));
    assert!(error.contains("unauthorized"));
    assert!(done["results"].is_null());
    assert_eq!(server.request_count(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn forwards_method_body_and_headers() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!({ "created": true }))).await?;
    let worker = worker(config_builder());

    let mut job = http_job(&server.endpoint("/items"), "POST");
    job["options"]["body"] = json!(r#"{"name":"widget"}"#);
    job["options"]["headers"] = json!({
        "Authorization": "Bearer secret",
        "Content-Type": "application/json",
    });

    let done = worker.submit_value(job).await;
    assert_eq!(done["results"], json!({ "created": true }));

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.body, r#"{"name":"widget"}"#);
    assert_eq!(request.headers["authorization"], "Bearer secret");
    assert_eq!(request.headers["content-type"], "application/json");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn legacy_https_type_is_served_and_preserved() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!([1, 2, 3]))).await?;
    let worker = worker(config_builder());

    let mut job = http_job(&server.endpoint("/"), "GET");
    job["type"] = json!("https");
    job["trace"] = json!({ "span": 9 });

    let done = worker.submit_value(job).await;
    assert_eq!(done["type"], json!("https"));
    assert_eq!(done["trace"], json!({ "span": 9 }));
    assert_eq!(done["results"], json!([1, 2, 3]));

    server.shutdown().await;
    Ok(())
}
