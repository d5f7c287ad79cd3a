use std::time::Duration;

use anyhow::Result;
use extraction_worker::{Runner, ENGINE_VERSION};
use serde_json::json;
use tokio::sync::mpsc;

use crate::support::{
    helpers::{assert_completed, config_builder, error_of, http_job, worker},
    mock_http::{MockHttpServer, Reply},
};

#[tokio::test]
async fn terminate_drains_admitted_jobs() -> Result<()> {
    let server = MockHttpServer::start(
        Reply::json(json!({ "ok": true })).with_delay(Duration::from_millis(200)),
    )
    .await?;
    let worker = worker(config_builder().concurrency(1));

    let url = server.endpoint("/");
    let first = worker
        .enqueue_value(http_job(&url, "GET"))
        .expect("job should pass validation");
    let second = worker
        .enqueue_value(http_job(&url, "GET"))
        .expect("job should pass validation");

    let report = worker.terminate().await;
    assert!(report.drained);
    assert_eq!(report.stats.finished, 2);

    assert_eq!(first.wait().await.results, Some(json!({ "ok": true })));
    assert_eq!(second.wait().await.results, Some(json!({ "ok": true })));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn forced_stop_aborts_running_and_rejects_queued() -> Result<()> {
    let server =
        MockHttpServer::start(Reply::json(json!("late")).with_delay(Duration::from_secs(5))).await?;
    let worker = worker(
        config_builder()
            .concurrency(1)
            .drain_timeout(Duration::from_millis(200)),
    );

    let url = server.endpoint("/");
    let running = worker
        .enqueue_value(http_job(&url, "GET"))
        .expect("job should pass validation");
    let queued = worker
        .enqueue_value(http_job(&url, "GET"))
        .expect("job should pass validation");

    let started = tokio::time::Instant::now();
    let report = worker.terminate().await;
    assert!(!report.drained);
    assert!(started.elapsed() < Duration::from_secs(3));

    let running = running.wait().await;
    let queued = queued.wait().await;
    assert!(running.error.as_deref().is_some_and(|e| e.starts_with("AbortError")));
    assert!(queued
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("TerminatedError")));
    assert!(running.results.is_none() && queued.results.is_none());
    assert_eq!(server.request_count(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn legacy_exit_message_terminates_and_is_answered() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!(null))).await?;
    let worker = worker(config_builder());

    let done = worker
        .submit_value(json!({ "type": "exit", "version": ENGINE_VERSION }))
        .await;
    assert_eq!(done["type"], json!("exit"));
    assert_eq!(done["results"], json!({ "terminated": true, "drained": true }));
    assert!(!worker.is_accepting());

    let late = worker
        .submit_value(http_job(&server.endpoint("/"), "GET"))
        .await;
    assert!(error_of(&late).starts_with("TerminatedError"));
    assert_eq!(server.request_count(), 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn version_mismatch_is_never_executed() -> Result<()> {
    let server = MockHttpServer::start(Reply::json(json!(null))).await?;
    let worker = worker(config_builder());

    let mut job = http_job(&server.endpoint("/"), "GET");
    job["version"] = json!("9.9.9");
    let done = worker.submit_value(job).await;

    let error = error_of(&done);
    assert!(error.starts_with("ValidationError"));
    assert!(error.contains("9.9.9"));
    assert!(error.contains(ENGINE_VERSION));
    assert_eq!(done["version"], json!("9.9.9"));
    assert_eq!(server.request_count(), 0);
    assert_eq!(worker.stats().pushed, 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn every_outcome_carries_exactly_one_of_results_or_error() -> Result<()> {
    let server = MockHttpServer::with_script(
        vec![Reply::json(json!("ok")), Reply::status(404, "missing")],
        Reply::text("plain"),
    )
    .await?;
    let worker = worker(config_builder().concurrency(1));
    let url = server.endpoint("/");

    let jobs = vec![
        http_job(&url, "GET"),
        http_job(&url, "GET"),
        http_job(&url, "GET"),
        json!({ "type": "carrier-pigeon", "version": ENGINE_VERSION, "commissioner": "x" }),
        json!({ "type": "http", "version": ENGINE_VERSION, "options": { "method": "GET" } }),
        json!({ "type": "http", "version": ENGINE_VERSION, "results": "already done" }),
    ];

    for job in jobs {
        let done = worker.submit_value(job).await;
        assert_completed(&done);
    }

    let telemetry = worker.telemetry();
    assert_eq!(telemetry.submitted, 6);
    assert_eq!(telemetry.validation_failures, 2);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn runner_answers_every_message_and_terminate_last() -> Result<()> {
    let server = MockHttpServer::start(
        Reply::json(json!({ "ok": true })).with_delay(Duration::from_millis(100)),
    )
    .await?;
    let runner = Runner::new(worker(config_builder().concurrency(2)));
    let (job_tx, job_rx) = mpsc::channel(16);
    let (reply_tx, mut reply_rx) = mpsc::channel(16);

    for index in 0..3 {
        job_tx
            .send(http_job(&server.endpoint(&format!("/{index}")), "GET"))
            .await?;
    }
    job_tx
        .send(json!({ "type": "terminate", "version": ENGINE_VERSION }))
        .await?;
    job_tx
        .send(http_job(&server.endpoint("/after"), "GET"))
        .await?;

    let report = runner.run(job_rx, reply_tx).await;
    assert!(report.drained);

    let mut replies = Vec::new();
    while let Some(reply) = reply_rx.recv().await {
        replies.push(reply);
    }
    assert_eq!(replies.len(), 5);

    let (late, served): (Vec<_>, Vec<_>) = replies[..4]
        .iter()
        .partition(|reply| reply["options"]["url"] == json!(server.endpoint("/after")));
    assert_eq!(late.len(), 1);
    assert!(error_of(late[0]).starts_with("TerminatedError"));
    assert!(served
        .iter()
        .all(|reply| reply["results"] == json!({ "ok": true })));
    assert_eq!(replies[4]["type"], json!("terminate"));
    assert_eq!(replies[4]["results"]["terminated"], json!(true));
    assert!(server.requests().iter().all(|request| request.path != "/after"));

    server.shutdown().await;
    Ok(())
}
