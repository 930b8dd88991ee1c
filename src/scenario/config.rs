use std::time::Duration;

use serde::Deserialize;


#[derive(Debug, Clone, confique::Config)]
#[config(validate = Self::validate)]
pub struct ScenarioConfig {
    /// Number of iterations started per `time_unit` at the very beginning of
    /// the run, before the first stage starts ramping.
    #[config(default = 1000)]
    pub start_rate: u32,

    /// The period that `start_rate` and the stage `target`s refer to. With
    /// the default "1s", rates are iterations per second.
    #[config(default = "1s", deserialize_with = crate::config::deserialize_duration)]
    pub time_unit: Duration,

    /// Ramp stages, executed in order. In each stage, the arrival rate changes
    /// linearly from the previous target (or `start_rate`) to `target` over
    /// `duration`. The run ends after the last stage.
    #[config(
        default = [
            { "target": 5000, "duration": "30s" },
            { "target": 5000, "duration": "5min" },
            { "target": 1000, "duration": "30s" },
        ],
        validate(!stages.is_empty(), "must not be empty"),
    )]
    pub stages: Vec<Stage>,

    /// Number of virtual workers created before the run starts.
    #[config(default = 50)]
    pub pre_allocated_vus: u32,

    /// Maximum number of virtual workers. If all of them are busy when an
    /// iteration is due, that iteration is dropped (and counted as such).
    #[config(default = 500)]
    pub max_vus: u32,

    /// How long iterations still running at the end of the schedule are given
    /// to finish before they are interrupted.
    #[config(default = "30s", deserialize_with = crate::config::deserialize_duration)]
    pub graceful_stop: Duration,

    /// How often the executor checks whether new iterations are due. Smaller
    /// values spread iteration starts more evenly.
    #[config(default = "1ms", deserialize_with = crate::config::deserialize_duration)]
    pub tick: Duration,

    /// How often a progress line is logged during the run.
    #[config(default = "10s", deserialize_with = crate::config::deserialize_duration)]
    pub report_interval: Duration,

    /// Seed for the random number generators of virtual workers. If unset,
    /// every worker is seeded from the OS, so runs are not reproducible.
    pub seed: Option<u64>,
}

impl ScenarioConfig {
    fn validate(&self) -> Result<(), &'static str> {
        if self.max_vus == 0 {
            return Err("`max_vus` must be positive");
        }
        if self.pre_allocated_vus > self.max_vus {
            return Err("`pre_allocated_vus` must not be larger than `max_vus`");
        }
        if self.time_unit.is_zero() {
            return Err("`time_unit` must be positive");
        }
        if self.tick.is_zero() {
            return Err("`tick` must be positive");
        }
        if self.report_interval.is_zero() {
            return Err("`report_interval` must be positive");
        }
        Ok(())
    }
}

/// One step of the ramp.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Stage {
    /// Arrival rate (per `time_unit`) reached at the end of this stage.
    pub target: u32,

    #[serde(deserialize_with = "crate::config::deserialize_duration")]
    pub duration: Duration,
}
