//! End-of-run report: printed to stdout and optionally exported as JSON.

use std::{collections::BTreeMap, fmt, fs, path::Path, time::Duration};

use serde::Serialize;

use crate::{
    driver::RequestKind,
    engine::RunResult,
    metrics::{Metrics, RequestStats, TrendStats},
    prelude::*,
    thresholds::{self, ThresholdResult, Thresholds},
};


#[derive(Debug, Serialize)]
pub struct Summary {
    pub duration_secs: f64,
    pub aborted: bool,
    pub checks: Vec<CheckSummary>,
    pub metrics: MetricsSummary,
    pub thresholds: Vec<ThresholdResult>,
}

#[derive(Debug, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSummary {
    /// Overall check pass rate.
    pub checks: Option<f64>,
    pub http_req_duration: Tagged<Option<TrendStats>>,
    pub http_req_failed: Tagged<Option<f64>>,
    pub http_reqs: Tagged<Counter>,
    pub iteration_duration: Option<TrendStats>,
    pub iterations: Counter,
    pub dropped_iterations: Counter,
    pub interrupted_iterations: u64,
}

/// A value over all requests plus the same value per request kind.
#[derive(Debug, Serialize)]
pub struct Tagged<T> {
    pub all: T,
    pub by_api: BTreeMap<RequestKind, T>,
}

impl<T> Tagged<T> {
    fn new(metrics: &Metrics, f: impl Fn(&RequestStats) -> T) -> Self {
        Self {
            all: f(metrics.requests(None)),
            by_api: RequestKind::ALL.into_iter()
                .map(|kind| (kind, f(metrics.requests(Some(kind)))))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Counter {
    pub count: u64,
    /// Per second over the whole run.
    pub rate: f64,
}

impl Counter {
    fn new(count: u64, elapsed: Duration) -> Self {
        let rate = if elapsed.is_zero() { 0.0 } else { count as f64 / elapsed.as_secs_f64() };
        Self { count, rate }
    }
}

impl Summary {
    pub fn new(result: &RunResult, thresholds: &Thresholds) -> Self {
        let m = &result.metrics;
        let elapsed = result.elapsed;

        let checks = m.checks()
            .map(|(check, count)| CheckSummary {
                name: check.name(),
                passes: count.passes,
                fails: count.fails,
            })
            .collect();

        let metrics = MetricsSummary {
            checks: m.checks_total().pass_rate(),
            http_req_duration: Tagged::new(m, |r| r.durations.stats()),
            http_req_failed: Tagged::new(m, |r| r.failed_rate()),
            http_reqs: Tagged::new(m, |r| Counter::new(r.count, elapsed)),
            iteration_duration: m.iteration_durations().stats(),
            iterations: Counter::new(m.iterations, elapsed),
            dropped_iterations: Counter::new(m.dropped_iterations, elapsed),
            interrupted_iterations: m.interrupted_iterations,
        };

        Self {
            duration_secs: elapsed.as_secs_f64(),
            aborted: result.aborted,
            checks,
            metrics,
            thresholds: thresholds::evaluate_all(thresholds, m, elapsed),
        }
    }

    /// Whether all thresholds passed.
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn failed_thresholds(&self) -> usize {
        self.thresholds.iter().filter(|t| !t.passed).count()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("failed to serialize summary")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write summary to '{}'", path.display()))?;
        info!("Wrote summary to '{}'", path.display());
        Ok(())
    }
}


// ===== Text output =====

const NAME_WIDTH: usize = 34;

fn mark(passed: bool) -> char {
    if passed { '✓' } else { '✗' }
}

fn line(f: &mut fmt::Formatter<'_>, indent: &str, name: &str, value: impl fmt::Display) -> fmt::Result {
    let name = format!("{name} ");
    writeln!(f, "{indent}{name:.<width$}: {value}", width = NAME_WIDTH)
}

fn percent(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("{:.2}%", rate * 100.0),
        None => "no data".into(),
    }
}

struct Trend<'a>(&'a Option<TrendStats>);

impl fmt::Display for Trend<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("no data"),
            Some(s) => write!(
                f,
                "avg={:.2}ms min={:.2}ms med={:.2}ms max={:.2}ms p(90)={:.2}ms p(95)={:.2}ms",
                s.avg, s.min, s.med, s.max, s.p90, s.p95,
            ),
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8} {:.2}/s", self.count, self.rate)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.metrics;

        writeln!(f)?;
        if self.aborted {
            writeln!(f, "  run aborted after {:.1}s", self.duration_secs)?;
        } else {
            writeln!(f, "  run finished after {:.1}s", self.duration_secs)?;
        }
        writeln!(f)?;

        for check in &self.checks {
            let total = check.passes + check.fails;
            let rate = (total > 0).then(|| check.passes as f64 / total as f64);
            line(
                f,
                &format!("    {} ", mark(check.fails == 0)),
                &check.name,
                format_args!("{:<8} ✓ {:<8} ✗ {}", percent(rate), check.passes, check.fails),
            )?;
        }
        if !self.checks.is_empty() {
            writeln!(f)?;
        }

        let ind = "    ";
        let tagged = |kind: &RequestKind| format!("  {{ api:{} }}", kind.tag());
        line(f, ind, "checks", percent(m.checks))?;
        line(f, ind, "dropped_iterations", m.dropped_iterations)?;
        line(f, ind, "http_req_duration", Trend(&m.http_req_duration.all))?;
        for (kind, stats) in &m.http_req_duration.by_api {
            line(f, ind, &tagged(kind), Trend(stats))?;
        }
        line(f, ind, "http_req_failed", percent(m.http_req_failed.all))?;
        for (kind, rate) in &m.http_req_failed.by_api {
            line(f, ind, &tagged(kind), percent(*rate))?;
        }
        line(f, ind, "http_reqs", m.http_reqs.all)?;
        for (kind, counter) in &m.http_reqs.by_api {
            line(f, ind, &tagged(kind), counter)?;
        }
        line(f, ind, "interrupted_iterations", m.interrupted_iterations)?;
        line(f, ind, "iteration_duration", Trend(&m.iteration_duration))?;
        line(f, ind, "iterations", m.iterations)?;

        if !self.thresholds.is_empty() {
            writeln!(f)?;
            writeln!(f, "  thresholds")?;
            for t in &self.thresholds {
                let observed = match t.observed {
                    Some(v) => format!("{v:.2}"),
                    None => "no data".into(),
                };
                writeln!(f, "    {} {} (observed: {observed})", mark(t.passed), t.threshold)?;
            }
        }

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use hyper::StatusCode;

    use crate::{
        driver::{Check, CheckKind, Outcome},
        metrics::Event,
    };
    use super::*;

    fn record(metrics: &mut Metrics, kind: RequestKind, status: u16, millis: u64) {
        let outcome = Outcome {
            kind,
            status: Some(StatusCode::from_u16(status).unwrap()),
            duration: Duration::from_millis(millis),
        };
        let checks = [
            Check { request: kind, kind: CheckKind::Status, passed: status < 300 },
            Check { request: kind, kind: CheckKind::ResponseTime, passed: millis < 2000 },
        ];
        metrics.record(Event::Iteration { outcome, checks, duration: outcome.duration });
    }

    fn thresholds(rules: &[(&str, &str)]) -> Thresholds {
        let map = rules.iter()
            .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
            .collect::<HashMap<_, _>>();
        Thresholds::try_from(map).unwrap()
    }

    fn result() -> RunResult {
        let mut metrics = Metrics::new();
        for _ in 0..8 {
            record(&mut metrics, RequestKind::Movie, 200, 20);
        }
        record(&mut metrics, RequestKind::Vote, 200, 50);
        record(&mut metrics, RequestKind::Vote, 500, 3000);
        metrics.record(Event::Dropped);
        RunResult { metrics, elapsed: Duration::from_secs(2), aborted: false }
    }

    #[test]
    fn summary_values() {
        let summary = Summary::new(&result(), &thresholds(&[]));
        let m = &summary.metrics;

        assert_eq!(summary.duration_secs, 2.0);
        assert_eq!(m.http_reqs.all.count, 10);
        assert_eq!(m.http_reqs.all.rate, 5.0);
        assert_eq!(m.http_reqs.by_api[&RequestKind::Rating].count, 0);
        assert_eq!(m.http_req_failed.all, Some(0.1));
        assert_eq!(m.http_req_failed.by_api[&RequestKind::Vote], Some(0.5));
        assert_eq!(m.http_req_failed.by_api[&RequestKind::Rating], None);
        assert!(m.http_req_duration.by_api[&RequestKind::Rating].is_none());
        assert_eq!(m.iterations.count, 10);
        assert_eq!(m.dropped_iterations.count, 1);
        assert_eq!(m.checks, Some(18.0 / 20.0));

        let names = summary.checks.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, [
            "movie status 2xx",
            "movie response time",
            "vote status 2xx",
            "vote response time",
        ]);
        assert!(summary.passed());
    }

    #[test]
    fn failing_threshold() {
        let summary = Summary::new(&result(), &thresholds(&[
            ("http_req_failed", "rate<0.05"),
            ("http_req_duration{api:movie}", "p(95)<500"),
            ("http_req_duration{api:rating}", "p(95)<500"),
        ]));

        assert!(!summary.passed());
        assert_eq!(summary.failed_thresholds(), 1);
        let failed = summary.thresholds.iter().find(|t| !t.passed).unwrap();
        assert_eq!(failed.threshold, "http_req_failed: rate<0.05");

        let text = summary.to_string();
        assert!(text.contains("✗ http_req_failed: rate<0.05 (observed: 0.10)"), "{text}");
        assert!(text.contains("✓ http_req_duration{api:rating}: p(95)<500 (observed: no data)"));
    }

    #[test]
    fn text_output() {
        let text = Summary::new(&result(), &thresholds(&[])).to_string();

        assert!(text.contains("run finished after 2.0s"));
        let vote_status = text.lines().find(|l| l.contains("vote status 2xx")).unwrap();
        assert!(vote_status.trim_start().starts_with('✗'));
        assert!(vote_status.contains("50.00%"));
        let movie_status = text.lines().find(|l| l.contains("movie status 2xx")).unwrap();
        assert!(movie_status.trim_start().starts_with('✓'));

        assert!(text.contains("http_req_failed ...."));
        assert!(text.contains("{ api:rating } ..."));
        assert!(text.lines().any(|l| l.contains("http_reqs") && l.contains("5.00/s")));
        assert!(!text.contains("thresholds"));
    }

    #[test]
    fn json_export() {
        let summary = Summary::new(&result(), &thresholds(&[("http_reqs", "count>5")]));
        let path = std::env::temp_dir()
            .join(format!("stampede-summary-{}.json", std::process::id()));
        summary.write_json(&path).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(json["aborted"], false);
        assert_eq!(json["metrics"]["http_reqs"]["all"]["count"], 10);
        assert_eq!(json["metrics"]["http_reqs"]["by_api"]["vote"]["count"], 2);
        assert!(json["metrics"]["http_req_duration"]["by_api"]["rating"].is_null());
        assert_eq!(json["metrics"]["http_req_duration"]["all"]["count"], 10);
        assert_eq!(json["thresholds"][0]["threshold"], "http_reqs: count>5");
        assert_eq!(json["thresholds"][0]["passed"], true);
        assert_eq!(json["checks"][0]["name"], "movie status 2xx");
    }
}
