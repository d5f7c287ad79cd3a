use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use serde_json::json;

use crate::support::{
    helpers::{assert_completed, config_builder, http_job, worker},
    mock_http::{MockHttpServer, Reply},
};

#[tokio::test]
async fn never_exceeds_configured_concurrency() -> Result<()> {
    let server = MockHttpServer::start(
        Reply::json(json!({ "ok": true })).with_delay(Duration::from_millis(150)),
    )
    .await?;
    let worker = worker(config_builder().concurrency(2));

    let url = server.endpoint("/");
    let done = join_all((0..6).map(|_| worker.submit_value(http_job(&url, "GET")))).await;

    assert_eq!(done.len(), 6);
    for job in &done {
        assert_completed(job);
        assert_eq!(job["results"], json!({ "ok": true }));
    }
    assert_eq!(server.request_count(), 6);
    assert!(server.peak_in_flight() <= 2, "peak {}", server.peak_in_flight());

    let stats = worker.stats();
    assert_eq!(stats.pushed, 6);
    assert_eq!(stats.finished, 6);
    assert_eq!(stats.errored, 0);
    assert!(stats.peak_running <= 2);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.queued, 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn jobs_start_in_admission_order() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!(null))).await?;
    let worker = worker(config_builder().concurrency(1));

    let submissions: Vec<_> = (0..5)
        .map(|index| {
            worker
                .enqueue_value(http_job(&server.endpoint(&format!("/job/{index}")), "GET"))
                .expect("job should pass validation")
        })
        .collect();
    for submission in submissions {
        submission.wait().await;
    }

    let paths: Vec<_> = server
        .requests()
        .into_iter()
        .map(|request| request.path)
        .collect();
    assert_eq!(
        paths,
        ["/job/0", "/job/1", "/job/2", "/job/3", "/job/4"]
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failing_jobs_do_not_block_the_queue() -> Result<()> {
    let server = MockHttpServer::with_script(
        vec![Reply::status(400, "bad request")],
        Reply::json(json!("fine")),
    )
    .await?;
    let worker = worker(config_builder().concurrency(1));

    let url = server.endpoint("/");
    let done = join_all((0..3).map(|_| worker.submit_value(http_job(&url, "GET")))).await;

    assert!(done[0]["error"].as_str().is_some_and(|e| e.contains("400")));
    assert_eq!(done[1]["results"], json!("fine"));
    assert_eq!(done[2]["results"], json!("fine"));
    assert_eq!(worker.stats().errored, 1);

    server.shutdown().await;
    Ok(())
}
