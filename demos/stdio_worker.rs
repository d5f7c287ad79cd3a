//! Line-delimited JSON worker: one job per stdin line, one completed envelope
//! per stdout line. Logs go to stderr.
//!
//! ```text
//! cargo run --example stdio_worker -- worker.json < jobs.ndjson
//! ```

use std::env;
use std::fs;
use std::io::BufRead;
use std::thread;

use anyhow::{Context, Result};
use extraction_worker::{ExtractionWorker, Runner, WorkerConfig};
use serde_json::{json, Value};
use tokio::io::{self, AsyncWriteExt};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 256;
const DEFAULT_LOG_DIRECTIVE: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    extraction_worker::init_tracing();

    let config = load_config(env::args().nth(1))?;
    let worker = ExtractionWorker::new(config)?;
    let runner = Runner::new(worker);

    let (job_tx, job_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (reply_tx, reply_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let parse_errors = reply_tx.downgrade();
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || read_jobs(job_tx, parse_errors))
        .context("failed to start the stdin reader")?;
    let writer = tokio::spawn(write_replies(reply_rx));

    // The reader thread may stay parked on stdin; it ends with the process.
    // It only holds a weak reply sender so the writer still sees the close.
    let report = runner.run_until_ctrl_c(job_rx, reply_tx).await;
    writer.await.context("reply writer panicked")??;

    tracing::info!(
        drained = report.drained,
        finished = report.stats.finished,
        errored = report.stats.errored,
        "stdio worker stopped"
    );
    Ok(())
}

fn load_config(path: Option<String>) -> Result<WorkerConfig> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            WorkerConfig::from_json_str(&raw)
        }
        None => WorkerConfig::builder().build(),
    }
}

/// Lines that are not JSON are answered directly and never reach the worker.
fn read_jobs(jobs: mpsc::Sender<Value>, replies: mpsc::WeakSender<Value>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let sent = match serde_json::from_str::<Value>(&line) {
            Ok(job) => jobs.blocking_send(job).is_ok(),
            Err(err) => replies.upgrade().is_some_and(|replies| {
                replies
                    .blocking_send(json!({
                        "results": null,
                        "error": format!("ParseError: invalid job line: {err}"),
                    }))
                    .is_ok()
            }),
        };
        if !sent {
            break;
        }
    }
}

async fn write_replies(mut replies: mpsc::Receiver<Value>) -> Result<()> {
    let mut stdout = io::stdout();
    while let Some(reply) = replies.recv().await {
        let mut line = serde_json::to_vec(&reply).context("failed to encode reply")?;
        line.push(b'\n');
        stdout
            .write_all(&line)
            .await
            .context("failed to write reply")?;
        stdout.flush().await.context("failed to flush stdout")?;
    }
    Ok(())
}
