use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use trellis_kernel::unit::{UnitOfWork, WorkValue};

/// A mock unit of work simulating a real workflow step
///
/// It allows developers to script execution outcomes in advance and to
/// inspect what a run actually fed into the unit, without wiring up the
/// services a production unit would talk to.
///
/// Clones share their recorded state, so the same `MockUnit` can back
/// several nodes and still report combined call counts and overlap.
#[derive(Clone)]
pub struct MockUnit {
    name: String,
    delay: Option<Duration>,
    /// Scripted outcomes, consumed front to back. When the script runs
    /// dry the unit echoes its input, which keeps chains flowing.
    pub script: Arc<RwLock<VecDeque<Result<WorkValue, String>>>>,
    /// Every input this unit was run with, in arrival order
    pub call_history: Arc<RwLock<Vec<WorkValue>>>,
    /// Start and end instants of every run, for concurrency checks
    pub spans: Arc<RwLock<Vec<(Instant, Instant)>>>,
}

impl MockUnit {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: None,
            script: Arc::new(RwLock::new(VecDeque::new())),
            call_history: Arc::new(RwLock::new(Vec::new())),
            spans: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Make every run take at least `ms` milliseconds.
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    /// Queue a successful outcome for a future run.
    pub async fn enqueue_ok(&self, value: WorkValue) {
        self.script.write().await.push_back(Ok(value));
    }

    /// Queue a failing outcome for a future run.
    pub async fn enqueue_err(&self, error: &str) {
        self.script.write().await.push_back(Err(error.to_string()));
    }

    /// Retrieve the history of inputs passed to this unit
    pub async fn history(&self) -> Vec<WorkValue> {
        self.call_history.read().await.clone()
    }

    /// Check the total number of times this unit was run
    pub async fn call_count(&self) -> usize {
        self.call_history.read().await.len()
    }

    /// Largest number of runs that were ever in flight at the same time
    ///
    /// Counts pairwise span intersections, so a scheduler that promises
    /// serial execution should report exactly 1 here.
    pub async fn max_overlap(&self) -> usize {
        let spans = self.spans.read().await;
        let mut peak = 0;
        for (i, (start, end)) in spans.iter().enumerate() {
            let concurrent = spans
                .iter()
                .enumerate()
                .filter(|(j, (other_start, other_end))| {
                    *j != i && other_start < end && start < other_end
                })
                .count();
            peak = peak.max(concurrent + 1);
        }
        peak
    }
}

#[async_trait]
impl UnitOfWork for MockUnit {
    async fn run(&self, input: WorkValue) -> Result<WorkValue, String> {
        let started = Instant::now();
        self.call_history.write().await.push(input.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = match self.script.write().await.pop_front() {
            Some(outcome) => outcome,
            None => Ok(input),
        };
        self.spans.write().await.push((started, Instant::now()));
        outcome
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[macro_export]
macro_rules! assert_unit_called {
    ($unit:expr, $expected_count:expr) => {
        let count = $unit.call_count().await;
        assert_eq!(
            count, $expected_count,
            "Expected unit '{}' to run {} times, but it ran {} times",
            $unit.name(),
            $expected_count,
            count
        );
    };
}
