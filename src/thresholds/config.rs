use std::collections::HashMap;

use serde::Deserialize;

use super::Threshold;


#[derive(Debug, confique::Config)]
pub struct ThresholdConfig {
    /// Pass/fail criteria, evaluated after the run. If any of them fails, the
    /// process exits with code 99.
    ///
    /// Keys name a metric, optionally restricted to one request kind with
    /// `{api:<movie|rating|vote>}`. Values are lists of expressions of the
    /// form `<aggregation> <op> <number>` with `op` one of `<`, `<=`, `>`,
    /// `>=`, `==`, `!=`. Metrics and their aggregations:
    ///
    /// - `http_req_duration`, `iteration_duration` (milliseconds): `avg`,
    ///   `min`, `med`, `max`, `p(N)`
    /// - `http_req_failed`, `checks` (fraction between 0 and 1): `rate`
    /// - `http_reqs`, `iterations`, `dropped_iterations`: `count`, `rate`
    ///   (per second)
    ///
    /// Only `http_req_duration`, `http_req_failed` and `http_reqs` can be
    /// restricted to a request kind.
    #[config(default = {
        "http_req_duration{api:vote}": ["p(95)<1000"],
        "http_req_duration{api:movie}": ["p(95)<500"],
        "http_req_duration{api:rating}": ["p(95)<500"],
        "http_req_failed": ["rate<0.05"]
    })]
    pub rules: Thresholds,
}

/// All configured thresholds, sorted by metric and expression.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "HashMap<String, Vec<String>>")]
pub struct Thresholds(Vec<Threshold>);

impl Thresholds {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Threshold> {
        self.0.iter()
    }
}

impl TryFrom<HashMap<String, Vec<String>>> for Thresholds {
    type Error = String;

    fn try_from(value: HashMap<String, Vec<String>>) -> Result<Self, Self::Error> {
        let mut out = value.iter()
            .flat_map(|(metric, exprs)| exprs.iter().map(move |expr| (metric, expr)))
            .map(|(metric, expr)| {
                Threshold::parse(metric, expr)
                    .map_err(|e| format!("invalid threshold '{metric}: {expr}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        Ok(Self(out))
    }
}
