use std::sync::{Arc, Mutex};

/// Progress of a batch of strategy runs, shared between worker threads.
#[derive(Clone, Default)]
pub struct RunStatus {
    inner: Arc<Mutex<RunStatusData>>,
}

#[derive(Default)]
struct RunStatusData {
    phase: String,
    total_runs: usize,
    completed_runs: usize,
    failed_runs: usize,
    best_sharpe: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct RunStatusSnapshot {
    pub phase: String,
    pub total_runs: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    pub best_sharpe: Option<f64>,
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn start_batch(&self, total_runs: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_runs = total_runs;
            data.completed_runs = 0;
            data.failed_runs = 0;
            data.best_sharpe = None;
        }
    }

    /// Record one finished run. `sharpe` is `None` for a failed run.
    pub fn record_run(&self, sharpe: Option<f64>) {
        if let Ok(mut data) = self.inner.lock() {
            data.completed_runs += 1;
            match sharpe {
                Some(value) if value.is_finite() => {
                    data.best_sharpe = Some(data.best_sharpe.map_or(value, |best| best.max(value)));
                }
                Some(_) => {}
                None => data.failed_runs += 1,
            }
        }
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            RunStatusSnapshot {
                phase: data.phase.clone(),
                total_runs: data.total_runs,
                completed_runs: data.completed_runs,
                failed_runs: data.failed_runs,
                best_sharpe: data.best_sharpe,
            }
        } else {
            RunStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_runs: 0,
                completed_runs: 0,
                failed_runs: 0,
                best_sharpe: None,
            }
        }
    }
}
