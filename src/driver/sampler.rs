use rand::Rng;


/// Discrete probability distribution over a few values, sampled with a single
/// uniform draw and a lookup in the cumulative weights.
#[derive(Debug, Clone)]
pub struct WeightedSampler<T> {
    /// Values with the cumulative weight up to and including that value.
    entries: Vec<(T, f64)>,
    total: f64,
    /// Index of the last entry with positive weight.
    last_positive: usize,
}

impl<T: Copy> WeightedSampler<T> {
    /// Creates a sampler from values and their relative weights. Weights must
    /// be finite and non-negative and at least one must be positive.
    pub fn new(weighted: impl IntoIterator<Item = (T, f64)>) -> Result<Self, &'static str> {
        let mut total = 0.0;
        let mut entries = Vec::new();
        let mut last_positive = None;
        for (value, weight) in weighted {
            if !weight.is_finite() || weight < 0.0 {
                return Err("weights must be finite and not negative");
            }
            if weight > 0.0 {
                last_positive = Some(entries.len());
            }
            total += weight;
            entries.push((value, total));
        }

        let Some(last_positive) = last_positive else {
            return Err("at least one weight must be positive");
        };
        if !total.is_finite() {
            return Err("sum of weights is too large");
        }

        Ok(Self { entries, total, last_positive })
    }

    /// Returns the value that the uniform draw `u` in `[0, 1)` maps to.
    pub fn pick(&self, u: f64) -> T {
        let target = u * self.total;

        // Values with weight 0 share their cumulative weight with the previous
        // entry and are thus never the first one strictly greater.
        // The fallback is only reachable due to rounding for `u` close to 1.
        self.entries.iter()
            .find(|(_, cumulative)| *cumulative > target)
            .unwrap_or(&self.entries[self.last_positive])
            .0
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        self.pick(rng.random::<f64>())
    }

    /// Normalized probability of each value, in insertion order.
    pub fn probabilities(&self) -> impl Iterator<Item = (T, f64)> + '_ {
        let mut prev = 0.0;
        self.entries.iter().map(move |(value, cumulative)| {
            let p = (cumulative - prev) / self.total;
            prev = *cumulative;
            (*value, p)
        })
    }
}
