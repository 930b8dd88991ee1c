//! Pass/fail criteria over the collected metrics, like
//! `http_req_duration{api:vote}: p(95)<1000`.

use std::{fmt, time::Duration};

use crate::{driver::RequestKind, metrics::{Metrics, Trend}};

mod config;

pub use self::config::{ThresholdConfig, Thresholds};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    HttpReqDuration,
    HttpReqFailed,
    HttpReqs,
    Checks,
    Iterations,
    IterationDuration,
    DroppedIterations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricType {
    /// Distribution of durations, in milliseconds.
    Trend,
    /// Fraction of non-zero values.
    Rate,
    /// Monotonic count.
    Counter,
}

impl Metric {
    const ALL: [Self; 7] = [
        Self::HttpReqDuration,
        Self::HttpReqFailed,
        Self::HttpReqs,
        Self::Checks,
        Self::Iterations,
        Self::IterationDuration,
        Self::DroppedIterations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::HttpReqDuration => "http_req_duration",
            Self::HttpReqFailed => "http_req_failed",
            Self::HttpReqs => "http_reqs",
            Self::Checks => "checks",
            Self::Iterations => "iterations",
            Self::IterationDuration => "iteration_duration",
            Self::DroppedIterations => "dropped_iterations",
        }
    }

    fn ty(self) -> MetricType {
        match self {
            Self::HttpReqDuration | Self::IterationDuration => MetricType::Trend,
            Self::HttpReqFailed | Self::Checks => MetricType::Rate,
            Self::HttpReqs | Self::Iterations | Self::DroppedIterations => MetricType::Counter,
        }
    }

    fn supports_tags(self) -> bool {
        matches!(self, Self::HttpReqDuration | Self::HttpReqFailed | Self::HttpReqs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in `(0, 100]`.
    Percentile(f64),
    Rate,
    Count,
}

impl Aggregation {
    fn parse(s: &str) -> Result<Self, String> {
        let out = match s {
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "med" => Self::Med,
            "rate" => Self::Rate,
            "count" => Self::Count,
            _ => {
                let p = s.strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown aggregation '{s}'"))?;
                let p: f64 = p.trim().parse()
                    .map_err(|_| format!("invalid percentile '{p}'"))?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(format!("percentile must be in (0, 100], but is {p}"));
                }
                Self::Percentile(p)
            }
        };
        Ok(out)
    }

    fn is_valid_for(self, ty: MetricType) -> bool {
        match ty {
            MetricType::Trend => matches!(
                self,
                Self::Avg | Self::Min | Self::Max | Self::Med | Self::Percentile(_),
            ),
            MetricType::Rate => self == Self::Rate,
            MetricType::Counter => matches!(self, Self::Count | Self::Rate),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Percentile(p) => write!(f, "p({p})"),
            Self::Rate => f.write_str("rate"),
            Self::Count => f.write_str("count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }
}


/// A single parsed threshold expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: Metric,
    pub tag: Option<RequestKind>,
    pub aggregation: Aggregation,
    pub op: Op,
    pub value: f64,
}

impl Threshold {
    /// Parses a metric selector (e.g. `http_req_duration{api:vote}`) and an
    /// expression (e.g. `p(95) < 1000`).
    pub fn parse(selector: &str, expr: &str) -> Result<Self, String> {
        let (metric, tag) = parse_selector(selector.trim())?;

        // Find the operator: the first char of it is the first of `<>=!`.
        let op_start = expr.find(['<', '>', '=', '!'])
            .ok_or_else(|| "no comparison operator found".to_owned())?;
        let (lhs, rest) = expr.split_at(op_start);
        let (op, rhs) = [Op::Le, Op::Ge, Op::Eq, Op::Ne, Op::Lt, Op::Gt].into_iter()
            .find_map(|op| rest.strip_prefix(op.as_str()).map(|rhs| (op, rhs)))
            .ok_or_else(|| format!("invalid operator in '{rest}'"))?;

        let aggregation = Aggregation::parse(lhs.trim())?;
        if !aggregation.is_valid_for(metric.ty()) {
            return Err(format!("aggregation '{aggregation}' not supported by '{}'", metric.name()));
        }

        let value: f64 = rhs.trim().parse()
            .map_err(|_| format!("invalid number '{}'", rhs.trim()))?;
        if !value.is_finite() {
            return Err("value must be finite".into());
        }

        Ok(Self { metric, tag, aggregation, op, value })
    }

    /// The value this threshold compares against, or `None` if there is no
    /// data for it (e.g. no request of the selected kind got a response).
    pub fn observe(&self, metrics: &Metrics, elapsed: Duration) -> Option<f64> {
        let per_second = |count: u64| {
            (!elapsed.is_zero()).then(|| count as f64 / elapsed.as_secs_f64())
        };
        let counter = |count: u64| match self.aggregation {
            Aggregation::Rate => per_second(count),
            _ => Some(count as f64),
        };

        match self.metric {
            Metric::HttpReqDuration => self.observe_trend(&metrics.requests(self.tag).durations),
            Metric::IterationDuration => self.observe_trend(metrics.iteration_durations()),
            Metric::HttpReqFailed => metrics.requests(self.tag).failed_rate(),
            Metric::Checks => metrics.checks_total().pass_rate(),
            Metric::HttpReqs => counter(metrics.requests(self.tag).count),
            Metric::Iterations => counter(metrics.iterations),
            Metric::DroppedIterations => counter(metrics.dropped_iterations),
        }
    }

    fn observe_trend(&self, trend: &Trend) -> Option<f64> {
        if trend.is_empty() {
            return None;
        }

        match self.aggregation {
            Aggregation::Avg => Some(trend.avg()),
            Aggregation::Min => Some(trend.min()),
            Aggregation::Max => Some(trend.max()),
            Aggregation::Med => Some(trend.percentile(50.0)),
            Aggregation::Percentile(p) => Some(trend.percentile(p)),
            // Rejected while parsing.
            Aggregation::Rate | Aggregation::Count => None,
        }
    }

    pub fn evaluate(&self, metrics: &Metrics, elapsed: Duration) -> ThresholdResult {
        let observed = self.observe(metrics, elapsed);
        ThresholdResult {
            threshold: self.to_string(),
            observed,
            passed: observed.is_none_or(|v| self.op.apply(v, self.value)),
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metric.name())?;
        if let Some(tag) = self.tag {
            write!(f, "{{api:{}}}", tag.tag())?;
        }
        write!(f, ": {}{}{}", self.aggregation, self.op.as_str(), self.value)
    }
}

fn parse_selector(s: &str) -> Result<(Metric, Option<RequestKind>), String> {
    let (name, tag) = match s.split_once('{') {
        None => (s, None),
        Some((name, rest)) => {
            let inner = rest.strip_suffix('}')
                .ok_or_else(|| format!("unclosed tag selector in '{s}'"))?;
            let (key, value) = inner.split_once(':')
                .ok_or_else(|| format!("tag selector must be 'key:value', but is '{inner}'"))?;
            if key.trim() != "api" {
                return Err(format!("unknown tag '{}', only 'api' is supported", key.trim()));
            }
            let kind = RequestKind::from_tag(value.trim())
                .ok_or_else(|| format!("unknown api '{}'", value.trim()))?;
            (name, Some(kind))
        }
    };

    let metric = Metric::ALL.into_iter()
        .find(|m| m.name() == name.trim())
        .ok_or_else(|| format!("unknown metric '{}'", name.trim()))?;
    if tag.is_some() && !metric.supports_tags() {
        return Err(format!("metric '{}' cannot be filtered by tag", metric.name()));
    }

    Ok((metric, tag))
}


/// Outcome of evaluating one threshold.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ThresholdResult {
    pub threshold: String,
    /// `None` if the metric had no data. Such thresholds pass.
    pub observed: Option<f64>,
    pub passed: bool,
}

pub fn evaluate_all(
    thresholds: &Thresholds,
    metrics: &Metrics,
    elapsed: Duration,
) -> Vec<ThresholdResult> {
    thresholds.iter().map(|t| t.evaluate(metrics, elapsed)).collect()
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

    fn parse(selector: &str, expr: &str) -> Threshold {
        Threshold::parse(selector, expr).unwrap()
    }

    fn record(metrics: &mut Metrics, kind: RequestKind, status: Option<u16>, millis: u64) {
        let outcome = Outcome {
            kind,
            status: status.map(|s| StatusCode::from_u16(s).unwrap()),
            duration: Duration::from_millis(millis),
        };
        let checks = [
            Check { request: kind, kind: CheckKind::Status, passed: !outcome.is_failed() },
            Check { request: kind, kind: CheckKind::ResponseTime, passed: millis < 2000 },
        ];
        metrics.record(Event::Iteration { outcome, checks, duration: outcome.duration });
    }

    #[test]
    fn parse_defaults() {
        assert_eq!(parse("http_req_duration{api:vote}", "p(95)<1000"), Threshold {
            metric: Metric::HttpReqDuration,
            tag: Some(RequestKind::Vote),
            aggregation: Aggregation::Percentile(95.0),
            op: Op::Lt,
            value: 1000.0,
        });
        assert_eq!(parse("http_req_failed", "rate<0.05"), Threshold {
            metric: Metric::HttpReqFailed,
            tag: None,
            aggregation: Aggregation::Rate,
            op: Op::Lt,
            value: 0.05,
        });
    }

    #[test]
    fn parse_variants() {
        let t = parse(" http_req_duration { api : movie } ", " p(99.9) <= 250 ");
        assert_eq!(t.tag, Some(RequestKind::Movie));
        assert_eq!(t.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(t.op, Op::Le);

        assert_eq!(parse("checks", "rate>=0.99").op, Op::Ge);
        assert_eq!(parse("iterations", "count>10").op, Op::Gt);
        assert_eq!(parse("dropped_iterations", "count==0").op, Op::Eq);
        assert_eq!(parse("http_reqs{api:rating}", "rate!=0").op, Op::Ne);
        assert_eq!(parse("iteration_duration", "med<100").aggregation, Aggregation::Med);
    }

    #[test]
    fn parse_errors() {
        let err = |selector, expr| Threshold::parse(selector, expr).unwrap_err();

        assert!(err("http_req_waiting", "avg<1").contains("unknown metric"));
        assert!(err("http_req_duration{api:vote", "avg<1").contains("unclosed"));
        assert!(err("http_req_duration{method:GET}", "avg<1").contains("unknown tag"));
        assert!(err("http_req_duration{api:homepage}", "avg<1").contains("unknown api"));
        assert!(err("checks{api:vote}", "rate>0.9").contains("cannot be filtered"));
        assert!(err("http_req_duration", "avg 100").contains("no comparison operator"));
        assert!(err("http_req_duration", "avg=<100").contains("invalid operator"));
        assert!(err("http_req_duration", "p(0)<100").contains("percentile"));
        assert!(err("http_req_duration", "p(101)<100").contains("percentile"));
        assert!(err("http_req_duration", "p95<100").contains("unknown aggregation"));
        assert!(err("http_req_duration", "rate<100").contains("not supported"));
        assert!(err("http_req_failed", "p(95)<0.1").contains("not supported"));
        assert!(err("http_reqs", "avg<10").contains("not supported"));
        assert!(err("http_req_duration", "avg<fast").contains("invalid number"));
    }

    #[test]
    fn display() {
        assert_eq!(
            parse("http_req_duration{api:vote}", "p(95) < 1000").to_string(),
            "http_req_duration{api:vote}: p(95)<1000",
        );
        assert_eq!(parse("http_req_failed", "rate<0.05").to_string(), "http_req_failed: rate<0.05");
    }

    #[test]
    fn evaluate_latency_per_tag() {
        let mut metrics = Metrics::new();
        for millis in 1..=100 {
            record(&mut metrics, RequestKind::Movie, Some(200), millis * 10);
            record(&mut metrics, RequestKind::Vote, Some(200), millis);
        }
        let elapsed = Duration::from_secs(10);

        let movie = parse("http_req_duration{api:movie}", "p(95)<500").evaluate(&metrics, elapsed);
        assert!(!movie.passed);
        assert!((movie.observed.unwrap() - 950.0).abs() < 1.0);

        let vote = parse("http_req_duration{api:vote}", "p(95)<1000").evaluate(&metrics, elapsed);
        assert!(vote.passed);

        // No rating requests at all: passes without data.
        let rating = parse("http_req_duration{api:rating}", "p(95)<500").evaluate(&metrics, elapsed);
        assert_eq!(rating.observed, None);
        assert!(rating.passed);

        let all = parse("http_req_duration", "max<=1000").evaluate(&metrics, elapsed);
        assert!((all.observed.unwrap() - 1000.0).abs() < 1.0);
    }

    #[test]
    fn evaluate_rates_and_counters() {
        let mut metrics = Metrics::new();
        for i in 0..100 {
            let status = if i < 4 { Some(500) } else if i < 6 { None } else { Some(200) };
            record(&mut metrics, RequestKind::Rating, status, 10);
        }
        metrics.record(Event::Dropped);
        let elapsed = Duration::from_secs(10);

        let failed = parse("http_req_failed", "rate<0.05").evaluate(&metrics, elapsed);
        assert_eq!(failed.observed, Some(0.06));
        assert!(!failed.passed);

        assert!(parse("http_req_failed{api:rating}", "rate<0.1").evaluate(&metrics, elapsed).passed);
        assert!(parse("http_req_failed{api:vote}", "rate<0.1").evaluate(&metrics, elapsed).passed);

        // 6 failed status checks, 100 passed time checks
        let checks = parse("checks", "rate>0.9").evaluate(&metrics, elapsed);
        assert_eq!(checks.observed, Some(194.0 / 200.0));
        assert!(checks.passed);

        assert_eq!(parse("http_reqs", "count==100").evaluate(&metrics, elapsed).observed, Some(100.0));
        assert_eq!(parse("http_reqs", "rate>5").evaluate(&metrics, elapsed).observed, Some(10.0));
        assert!(parse("iterations", "count>=100").evaluate(&metrics, elapsed).passed);
        assert!(!parse("dropped_iterations", "count<1").evaluate(&metrics, elapsed).passed);
        assert_eq!(parse("http_reqs", "rate>5").evaluate(&metrics, Duration::ZERO).observed, None);
    }

    #[test]
    fn threshold_set_from_map() {
        let map = HashMap::from([
            ("http_req_failed".to_owned(), vec!["rate<0.05".to_owned()]),
            ("http_req_duration".to_owned(), vec!["p(95)<500".to_owned(), "avg<200".to_owned()]),
        ]);
        let set = Thresholds::try_from(map).unwrap();
        let names = set.iter().map(|t| t.to_string()).collect::<Vec<_>>();
        assert_eq!(names, [
            "http_req_duration: avg<200",
            "http_req_duration: p(95)<500",
            "http_req_failed: rate<0.05",
        ]);

        let bad = HashMap::from([("http_req_failed".to_owned(), vec!["p(95)<1".to_owned()])]);
        let err = Thresholds::try_from(bad).unwrap_err();
        assert!(err.contains("http_req_failed: p(95)<1"));
    }
}
