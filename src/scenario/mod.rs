//! The traffic shape: how many iterations are started per second at which
//! point of the run.

use std::time::Duration;

mod config;

pub use self::config::{ScenarioConfig, Stage};


/// Piecewise linear arrival rate over time, derived from the configured
/// stages. All rates stored here are normalized to iterations per second.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start_rate: f64,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: Duration,
    duration: Duration,
    from: f64,
    to: f64,
}

impl Segment {
    fn end(&self) -> Duration {
        self.start + self.duration
    }

    /// Rate after `offset` into this segment. `offset` must not exceed the
    /// segment duration.
    fn rate_after(&self, offset: Duration) -> f64 {
        if self.duration.is_zero() {
            return self.to;
        }
        let progress = offset.as_secs_f64() / self.duration.as_secs_f64();
        self.from + (self.to - self.from) * progress
    }

    /// Number of iterations started in the first `offset` of this segment.
    fn iterations_in(&self, offset: Duration) -> f64 {
        let offset = offset.min(self.duration);
        (self.from + self.rate_after(offset)) / 2.0 * offset.as_secs_f64()
    }
}

impl RampSchedule {
    pub fn new(config: &ScenarioConfig) -> Self {
        Self::from_stages(config.start_rate, &config.stages, config.time_unit)
    }

    pub fn from_stages(start_rate: u32, stages: &[Stage], time_unit: Duration) -> Self {
        let per_sec = |rate: u32| f64::from(rate) / time_unit.as_secs_f64();

        let mut segments = Vec::with_capacity(stages.len());
        let mut start = Duration::ZERO;
        let mut from = per_sec(start_rate);
        for stage in stages {
            let to = per_sec(stage.target);
            segments.push(Segment { start, duration: stage.duration, from, to });
            start += stage.duration;
            from = to;
        }

        Self { start_rate: per_sec(start_rate), segments }
    }

    /// Duration of the whole schedule, i.e. the sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.segments.last().map(Segment::end).unwrap_or(Duration::ZERO)
    }

    /// Target arrival rate (iterations per second) at `elapsed` into the run.
    /// After the last stage, the last stage's target is returned.
    pub fn rate_at(&self, elapsed: Duration) -> f64 {
        let Some(last) = self.segments.last() else {
            return self.start_rate;
        };

        self.segments.iter()
            .find(|s| elapsed < s.end())
            .map(|s| s.rate_after(elapsed - s.start))
            .unwrap_or(last.to)
    }

    /// Number of iterations that should have been started by `elapsed`, i.e.
    /// the integral of the rate from the start of the run to `elapsed`. Does
    /// not grow past the end of the schedule.
    pub fn iterations_until(&self, elapsed: Duration) -> f64 {
        self.segments.iter()
            .take_while(|s| s.start <= elapsed)
            .map(|s| s.iterations_in(elapsed - s.start))
            .sum()
    }

    /// Human readable description of the individual stages, used by the
    /// `check` command.
    pub fn describe(&self) -> Vec<String> {
        self.segments.iter()
            .enumerate()
            .map(|(i, s)| format!(
                "stage {}: {:>7.0}/s -> {:>7.0}/s over {:?} (from {:?} to {:?})",
                i + 1, s.from, s.to, s.duration, s.start, s.end(),
            ))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn default_schedule() -> RampSchedule {
        RampSchedule::from_stages(1000, &[
            Stage { target: 5000, duration: secs(30) },
            Stage { target: 5000, duration: secs(300) },
            Stage { target: 1000, duration: secs(30) },
        ], secs(1))
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
    }

    #[test]
    fn rate_during_ramp_up() {
        let schedule = default_schedule();
        assert_close(schedule.rate_at(Duration::ZERO), 1000.0);

        let rate = schedule.rate_at(secs(15));
        assert!(rate > 1000.0 && rate < 5000.0);
        assert_close(rate, 3000.0);
    }

    #[test]
    fn rate_during_plateau() {
        let schedule = default_schedule();
        assert_close(schedule.rate_at(secs(30)), 5000.0);
        assert_close(schedule.rate_at(secs(45)), 5000.0);
        assert_close(schedule.rate_at(secs(329)), 5000.0);
    }

    #[test]
    fn rate_during_and_after_ramp_down() {
        let schedule = default_schedule();

        // 5m45s is in the middle of the ramp down.
        let rate = schedule.rate_at(secs(345));
        assert!(rate > 1000.0 && rate < 5000.0);
        assert!(rate > schedule.rate_at(secs(350)));

        // 6m15s is past the end of the schedule.
        let rate = schedule.rate_at(secs(375));
        assert!(rate < 5000.0);
        assert_close(rate, 1000.0);
    }

    #[test]
    fn total_duration() {
        assert_eq!(default_schedule().total_duration(), secs(360));
        assert_eq!(RampSchedule::from_stages(10, &[], secs(1)).total_duration(), Duration::ZERO);
    }

    #[test]
    fn iteration_counts() {
        let schedule = default_schedule();
        assert_close(schedule.iterations_until(Duration::ZERO), 0.0);
        assert_close(schedule.iterations_until(secs(1)), 1000.0 + 4000.0 / 30.0 / 2.0);
        assert_close(schedule.iterations_until(secs(30)), 90_000.0);
        assert_close(schedule.iterations_until(secs(330)), 90_000.0 + 1_500_000.0);
        assert_close(schedule.iterations_until(secs(360)), 1_680_000.0);

        // Capped at the end of the schedule
        assert_close(schedule.iterations_until(secs(500)), 1_680_000.0);
    }

    #[test]
    fn time_unit_is_normalized() {
        let schedule = RampSchedule::from_stages(60, &[
            Stage { target: 120, duration: secs(60) },
        ], secs(60));
        assert_close(schedule.rate_at(Duration::ZERO), 1.0);
        assert_close(schedule.rate_at(secs(30)), 1.5);
        assert_close(schedule.iterations_until(secs(60)), 90.0);
    }

    #[test]
    fn zero_length_stage_jumps() {
        let schedule = RampSchedule::from_stages(100, &[
            Stage { target: 500, duration: Duration::ZERO },
            Stage { target: 500, duration: secs(10) },
        ], secs(1));
        assert_close(schedule.rate_at(Duration::ZERO), 500.0);
        assert_close(schedule.iterations_until(secs(10)), 5000.0);
    }

    #[test]
    fn describe_lists_all_stages() {
        let lines = default_schedule().describe();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("stage 1:"));
    }
}
