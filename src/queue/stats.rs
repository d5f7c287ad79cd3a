use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pushed: AtomicU64,
    queued: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    finished: AtomicU64,
    errored: AtomicU64,
}

impl QueueCounters {
    pub(crate) fn record_push(&self) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_start(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(running, Ordering::SeqCst);
    }

    /// `started` is false for jobs rejected straight out of the queue.
    pub(crate) fn record_finish(&self, started: bool, failed: bool) {
        if started {
            self.running.fetch_sub(1, Ordering::SeqCst);
        } else {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        self.finished.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.errored.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            peak_running: self.peak_running.load(Ordering::SeqCst),
            finished: self.finished.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of queue activity. `finished` counts every delivered
/// envelope, `errored` the subset that carried an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub queued: usize,
    pub running: usize,
    pub peak_running: usize,
    pub finished: u64,
    pub errored: u64,
}
