//! Aggregation of per-iteration results into the statistics that thresholds
//! and the summary are based on.
//!
//! Iterations send [`Event`]s over a channel; a single task owns [`Metrics`]
//! and folds all events into it. That way, iterations never contend on a lock.

use std::{collections::BTreeMap, time::Duration};

use hdrhistogram::Histogram;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    driver::{Check, CheckKind, Outcome, RequestKind},
    prelude::*,
};


/// Something that happened during the run and is relevant for statistics.
#[derive(Debug)]
pub enum Event {
    /// An iteration ran to completion.
    Iteration {
        outcome: Outcome,
        checks: [Check; 2],
        duration: Duration,
    },

    /// The schedule wanted to start an iteration, but no worker was free.
    Dropped,

    /// An iteration was started but did not complete (cancelled or panicked).
    Interrupted,
}

pub type MetricsSender = mpsc::UnboundedSender<Event>;

/// Spawns the collector task. The task finishes and returns all metrics once
/// every sender has been dropped.
pub fn spawn_collector() -> (MetricsSender, JoinHandle<Metrics>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut metrics = Metrics::new();
        while let Some(event) = rx.recv().await {
            metrics.record(event);
        }
        trace!("all metric senders dropped, collector finished");
        metrics
    });
    (tx, handle)
}


/// Latency histogram in microseconds. Values are reported in milliseconds.
#[derive(Debug, Clone)]
pub struct Trend(Histogram<u64>);

/// Aggregated values of a [`Trend`], all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TrendStats {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
}

impl Trend {
    fn new() -> Self {
        // Auto-resizing histogram with 3 significant digits.
        Self(Histogram::new(3).expect("3 significant digits are always valid"))
    }

    fn record(&mut self, d: Duration) {
        let micros = u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        self.0.saturating_record(micros);
    }

    pub fn count(&self) -> u64 {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at percentile `p` in `[0, 100]`, in milliseconds.
    pub fn percentile(&self, p: f64) -> f64 {
        to_millis(self.0.value_at_percentile(p))
    }

    pub fn avg(&self) -> f64 {
        self.0.mean() / 1000.0
    }

    pub fn min(&self) -> f64 {
        to_millis(self.0.min())
    }

    pub fn max(&self) -> f64 {
        to_millis(self.0.max())
    }

    pub fn stats(&self) -> Option<TrendStats> {
        if self.is_empty() {
            return None;
        }

        Some(TrendStats {
            count: self.count(),
            avg: self.avg(),
            min: self.min(),
            med: self.percentile(50.0),
            max: self.max(),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
        })
    }
}

fn to_millis(micros: u64) -> f64 {
    micros as f64 / 1000.0
}


/// Statistics about HTTP requests, either of one tag or of all requests.
#[derive(Debug, Clone)]
pub struct RequestStats {
    /// Number of requests sent (including those without response).
    pub count: u64,

    /// Number of requests that count as failed, see [`Outcome::is_failed`].
    pub failed: u64,

    /// Durations of requests that received a response.
    pub durations: Trend,
}

impl RequestStats {
    fn new() -> Self {
        Self { count: 0, failed: 0, durations: Trend::new() }
    }

    fn record(&mut self, outcome: &Outcome) {
        self.count += 1;
        if outcome.is_failed() {
            self.failed += 1;
        }
        if outcome.status.is_some() {
            self.durations.record(outcome.duration);
        }
    }

    /// Fraction of failed requests, `None` if there were no requests.
    pub fn failed_rate(&self) -> Option<f64> {
        rate(self.failed, self.count)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CheckCount {
    pub passes: u64,
    pub fails: u64,
}

impl CheckCount {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    pub fn pass_rate(&self) -> Option<f64> {
        rate(self.passes, self.total())
    }
}

fn rate(part: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64)
}


/// Everything we measured during a run.
#[derive(Debug, Clone)]
pub struct Metrics {
    all_requests: RequestStats,
    requests: BTreeMap<RequestKind, RequestStats>,
    checks: BTreeMap<(RequestKind, CheckKind), CheckCount>,
    iteration_durations: Trend,
    pub iterations: u64,
    pub dropped_iterations: u64,
    pub interrupted_iterations: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            all_requests: RequestStats::new(),
            requests: RequestKind::ALL.into_iter().map(|k| (k, RequestStats::new())).collect(),
            checks: BTreeMap::new(),
            iteration_durations: Trend::new(),
            iterations: 0,
            dropped_iterations: 0,
            interrupted_iterations: 0,
        }
    }

    pub fn record(&mut self, event: Event) {
        match event {
            Event::Iteration { outcome, checks, duration } => {
                self.iterations += 1;
                self.iteration_durations.record(duration);
                self.all_requests.record(&outcome);
                self.requests.entry(outcome.kind)
                    .or_insert_with(RequestStats::new)
                    .record(&outcome);

                for check in checks {
                    let count = self.checks.entry((check.request, check.kind)).or_default();
                    if check.passed {
                        count.passes += 1;
                    } else {
                        count.fails += 1;
                    }
                }
            }
            Event::Dropped => self.dropped_iterations += 1,
            Event::Interrupted => self.interrupted_iterations += 1,
        }
    }

    /// Request statistics of all requests (`None`) or of one tag.
    pub fn requests(&self, tag: Option<RequestKind>) -> &RequestStats {
        match tag {
            None => &self.all_requests,
            // All kinds are inserted in `new`.
            Some(kind) => &self.requests[&kind],
        }
    }

    pub fn iteration_durations(&self) -> &Trend {
        &self.iteration_durations
    }

    /// Per-check tallies, ordered by request kind and check.
    pub fn checks(&self) -> impl Iterator<Item = (Check, CheckCount)> + '_ {
        self.checks.iter().map(|(&(request, kind), &count)| {
            let check = Check { request, kind, passed: count.fails == 0 };
            (check, count)
        })
    }

    /// Sum of all check tallies.
    pub fn checks_total(&self) -> CheckCount {
        self.checks.values().fold(CheckCount::default(), |acc, c| CheckCount {
            passes: acc.passes + c.passes,
            fails: acc.fails + c.fails,
        })
    }
}
