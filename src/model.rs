#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    pub workers: usize,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub completed_tasks: usize,
    pub panicked_tasks: usize,
}


/// Per-collection counters, one entry per submitted task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectMetrics {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl CollectMetrics {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        self.succeeded as f64 / total as f64
    }
}


/// How the batch wait of a collection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Completed,
    TimedOut,
    Interrupted,
}
