use anyhow::Result;
use extraction_worker::ENGINE_VERSION;
use serde_json::{json, Value};

use crate::support::{
    helpers::{config_builder, error_of, worker},
    mock_http::{MockHttpServer, Reply},
};

const QUERY: &str = r#"{"query":"{ tokens(first: 1) { id } }"}"#;

fn graphql_job(url: &str) -> Value {
    json!({
        "type": "graphql",
        "version": ENGINE_VERSION,
        "commissioner": "integration-test",
        "options": { "url": url, "body": QUERY },
        "results": null,
        "error": null,
    })
}

#[tokio::test]
async fn posts_the_query_as_json() -> Result<()> {
    let response = json!({ "data": { "tokens": [{ "id": "0x1" }] } });
    let server = MockHttpServer::start(Reply::json(response.clone())).await?;
    let worker = worker(config_builder());

    let done = worker
        .submit_value(graphql_job(&server.endpoint("/subgraphs/name/test")))
        .await;
    assert_eq!(done["results"], response);
    assert!(done["error"].is_null());

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/subgraphs/name/test");
    assert_eq!(request.body, QUERY);
    assert_eq!(request.headers["content-type"], "application/json");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn caller_content_type_is_kept() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!({ "data": {} }))).await?;
    let worker = worker(config_builder());

    let mut job = graphql_job(&server.endpoint("/"));
    job["options"]["headers"] = json!({ "Content-Type": "application/graphql+json" });
    worker.submit_value(job).await;

    assert_eq!(
        server.requests()[0].headers["content-type"],
        "application/graphql+json"
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn error_list_fails_the_job() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!({
        "data": null,
        "errors": [{ "message": "Type `Query` has no field `tokens`" }],
    })))
    .await?;
    let worker = worker(config_builder());

    let done = worker.submit_value(graphql_job(&server.endpoint("/"))).await;

    assert!(done["results"].is_null());
    assert_eq!(
        error_of(&done),
        "GraphQLError: Type `Query` has no field `tokens`"
    );
    assert_eq!(server.request_count(), 1);

    server.shutdown().await;
    Ok(())
}
