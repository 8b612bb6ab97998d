/// Running min/max/sum/count over one metric within one window.
///
/// Starts at `{+inf, -inf, 0, 0}`; callers only expose accumulators that
/// have recorded at least one value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: u64,
}

impl Statistics {
    /// Creates an empty accumulator.
    pub const fn new() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }

    /// Records a single observation.
    pub fn record(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    /// Records every value of a slice.
    pub fn record_all(&mut self, values: &[f64]) {
        for &value in values {
            self.record(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_empty() {
        let stats = Statistics::new();
        assert!(stats.is_empty());
        assert_eq!(stats.min, f64::INFINITY);
        assert_eq!(stats.max, f64::NEG_INFINITY);
        assert_eq!(stats.sum, 0.0);
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn test_statistics_single_value() {
        let mut stats = Statistics::new();
        stats.record(5.0);

        assert_eq!(stats.count, 1);
        assert_eq!(stats.min, 5.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.sum, 5.0);
    }

    #[test]
    fn test_statistics_multiple_values() {
        let mut stats = Statistics::new();
        stats.record_all(&[7.0, 8.0, 15.0]);

        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 7.0);
        assert_eq!(stats.max, 15.0);
        assert_eq!(stats.sum, 30.0);
    }

    #[test]
    fn test_statistics_negative_and_fractional() {
        let mut stats = Statistics::new();
        stats.record_all(&[-1.5, 0.25, 2.0]);

        assert_eq!(stats.min, -1.5);
        assert_eq!(stats.max, 2.0);
        assert_eq!(stats.sum, 0.75);
    }
}
