use crate::job::{JobEnvelope, JobError};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// An admitted job waiting for a slot, paired with the channel its caller
/// listens on. Owned by the queue until the result is delivered.
#[derive(Debug)]
pub(crate) struct PendingJob {
    pub(crate) envelope: JobEnvelope,
    pub(crate) reply: oneshot::Sender<JobEnvelope>,
    pub(crate) admitted_at: Instant,
}

impl PendingJob {
    pub(crate) fn new(envelope: JobEnvelope) -> (Self, JobHandle) {
        let (reply, receiver) = oneshot::channel();
        let handle = JobHandle {
            receiver,
            envelope: envelope.clone(),
        };
        let job = Self {
            envelope,
            reply,
            admitted_at: Instant::now(),
        };
        (job, handle)
    }

    pub(crate) fn reject(self, err: JobError) {
        let completed = self.envelope.fail(err);
        // The caller may have stopped waiting; nothing else observes the result.
        let _ = self.reply.send(completed);
    }
}

/// Caller side of an admitted job.
#[derive(Debug)]
pub struct JobHandle {
    receiver: oneshot::Receiver<JobEnvelope>,
    envelope: JobEnvelope,
}

impl JobHandle {
    /// Resolves once the job completes. Always yields the job's envelope with
    /// exactly one of `results`/`error` set.
    pub async fn wait(self) -> JobEnvelope {
        match self.receiver.await {
            Ok(completed) => completed,
            Err(_) => self
                .envelope
                .fail(JobError::Terminated("job was dropped before completion")),
        }
    }
}
