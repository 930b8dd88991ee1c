//! The executor: starts iterations at the rate given by the ramp schedule,
//! hands them to virtual workers and stops the run gracefully.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt as _;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::Config,
    driver::Driver,
    metrics::{self, Event, Metrics, MetricsSender},
    prelude::*,
    scenario::RampSchedule,
    util::{self, HttpClient},
};

mod pool;

use self::pool::{IdleList, VirtualUser, VuPool};


/// Everything an iteration needs, shared by all iteration tasks.
pub struct Context {
    pub config: Config,
    pub driver: Driver,
    pub client: HttpClient,
}

impl Context {
    pub fn new(config: Config) -> Result<Self> {
        let driver = Driver::new(&config.driver)?;
        let client = util::http_client(config.driver.max_idle_connections);
        Ok(Self { config, driver, client })
    }
}

#[derive(Debug)]
pub struct RunResult {
    pub metrics: Metrics,

    /// Wall time from the first tick until the last iteration finished or was
    /// interrupted.
    pub elapsed: Duration,

    /// Whether the run was stopped early via `shutdown`.
    pub aborted: bool,
}

/// Runs the whole scenario. Cancelling `shutdown` stops starting new
/// iterations; running ones still get the graceful stop period.
pub async fn run(ctx: Arc<Context>, shutdown: CancellationToken) -> Result<RunResult> {
    let scenario = &ctx.config.scenario;
    let schedule = RampSchedule::new(scenario);
    let total = schedule.total_duration();

    let mut pool = VuPool::new(scenario.pre_allocated_vus, scenario.max_vus, scenario.seed);
    let idle = pool.idle_list();
    let (metrics_tx, collector) = metrics::spawn_collector();
    let tracker = TaskTracker::new();
    let interrupt = CancellationToken::new();

    info!(
        "Starting run against {} for {:?} ({} workers pre-allocated, at most {})",
        ctx.driver.base_url().as_str(),
        total,
        pool.allocated(),
        scenario.max_vus,
    );

    let start = Instant::now();
    let mut ticker = tokio::time::interval(scenario.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next_report = scenario.report_interval;
    let mut scheduled = 0u64;
    let mut dropped = 0u64;
    let mut aborted = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.cancelled() => {
                warn!("Shutdown requested, not starting any new iterations");
                aborted = true;
                break;
            }
        }

        let elapsed = start.elapsed().min(total);
        let due = due_iterations(&schedule, elapsed);
        while scheduled < due {
            scheduled += 1;
            match pool.acquire() {
                Some(vu) => {
                    tracker.spawn(iteration(
                        Arc::clone(&ctx),
                        vu,
                        idle.clone(),
                        metrics_tx.clone(),
                        interrupt.clone(),
                    ));
                }
                None => {
                    dropped += 1;
                    let _ = metrics_tx.send(Event::Dropped);
                }
            }
        }

        if elapsed >= next_report {
            info!(
                "[{:>5.1}s] target {:.0} it/s, {} started, {} dropped, {} workers ({} busy)",
                elapsed.as_secs_f64(),
                schedule.rate_at(elapsed),
                scheduled - dropped,
                dropped,
                pool.allocated(),
                pool.busy(),
            );
            next_report += scenario.report_interval;
        }

        if elapsed >= total {
            break;
        }
    }

    // Graceful stop
    tracker.close();
    if !tracker.is_empty() {
        info!(
            "Waiting up to {:?} for {} running iterations to finish",
            scenario.graceful_stop,
            tracker.len(),
        );
    }
    if tokio::time::timeout(scenario.graceful_stop, tracker.wait()).await.is_err() {
        warn!(
            "Graceful stop period over, interrupting {} remaining iterations",
            tracker.len(),
        );
        interrupt.cancel();
        tracker.wait().await;
    }
    let elapsed = start.elapsed();

    // The collector finishes once all senders are gone. Iteration tasks have
    // dropped theirs at this point.
    drop(metrics_tx);
    let metrics = collector.await.context("metrics collector task failed")?;
    info!(
        "Run finished after {:.1}s: {} iterations, {} dropped, {} interrupted",
        elapsed.as_secs_f64(),
        metrics.iterations,
        metrics.dropped_iterations,
        metrics.interrupted_iterations,
    );

    Ok(RunResult { metrics, elapsed, aborted })
}

/// Number of iterations that should have been started after `elapsed`. The
/// tiny epsilon keeps float rounding from losing the last iteration of a
/// segment.
fn due_iterations(schedule: &RampSchedule, elapsed: Duration) -> u64 {
    (schedule.iterations_until(elapsed) + 1e-6).floor() as u64
}

async fn iteration(
    ctx: Arc<Context>,
    mut vu: VirtualUser,
    idle: IdleList,
    metrics: MetricsSender,
    interrupt: CancellationToken,
) {
    let id = vu.id;
    let start = Instant::now();

    // Like with HTTP handlers: a panicking iteration must not take the worker
    // with it, so it is caught and the worker is returned to the pool.
    let work = AssertUnwindSafe(ctx.driver.iterate(&ctx.client, &mut vu.rng, &mut vu.cookies))
        .catch_unwind();
    let event = tokio::select! {
        result = work => match result {
            Ok(outcome) => Event::Iteration {
                checks: ctx.driver.checks(&outcome),
                outcome,
                duration: start.elapsed(),
            },
            Err(panic) => {
                match panic_message(&*panic) {
                    Some(msg) => error!("Iteration of worker {id} panicked: '{msg}'"),
                    None => error!("Iteration of worker {id} panicked"),
                }
                Event::Interrupted
            }
        },
        _ = interrupt.cancelled() => {
            trace!(vu = id, "iteration interrupted");
            Event::Interrupted
        }
    };

    let _ = metrics.send(event);
    idle.push(vu);
}

/// The payload of most panics (those using `panic!` like `format!`) is either
/// `&str` or `String`.
fn panic_message(panic: &(dyn Any + Send)) -> Option<&str> {
    panic.downcast_ref::<String>()
        .map(|s| s.as_str())
        .or(panic.downcast_ref::<&str>().copied())
}
