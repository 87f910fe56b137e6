//! Small shared helpers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Inclusive window a random duration is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min: Duration,
    pub max: Duration,
}

impl DurationRange {
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub const fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// Draw uniformly from the window. A collapsed or inverted window yields `min`.
    pub fn sample(&self, rng: &mut fastrand::Rng) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        self.min + (self.max - self.min).mul_f64(rng.f64())
    }

    /// Scale both bounds by `factor`.
    pub fn scaled(&self, factor: u32) -> Self {
        Self::new(
            self.min.saturating_mul(factor),
            self.max.saturating_mul(factor),
        )
    }
}

impl fmt::Display for DurationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}ms", self.min.as_millis(), self.max.as_millis())
    }
}

/// Serialize a [`Duration`] as fractional seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_within_bounds() {
        let range = DurationRange::from_millis(100, 500);
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..1_000 {
            let d = range.sample(&mut rng);
            assert!(d >= range.min && d <= range.max, "{d:?} outside {range}");
        }
    }

    #[test]
    fn test_sample_collapsed_window() {
        let range = DurationRange::from_millis(250, 250);
        let mut rng = fastrand::Rng::with_seed(1);
        assert_eq!(range.sample(&mut rng), Duration::from_millis(250));

        let inverted = DurationRange::from_millis(300, 100);
        assert_eq!(inverted.sample(&mut rng), Duration::from_millis(300));
    }

    #[test]
    fn test_sample_is_reproducible_with_seed() {
        let range = DurationRange::from_millis(0, 10_000);
        let a: Vec<_> = {
            let mut rng = fastrand::Rng::with_seed(42);
            (0..5).map(|_| range.sample(&mut rng)).collect()
        };
        let b: Vec<_> = {
            let mut rng = fastrand::Rng::with_seed(42);
            (0..5).map(|_| range.sample(&mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_scaled() {
        let range = DurationRange::from_millis(100, 500).scaled(3);
        assert_eq!(range, DurationRange::from_millis(300, 1_500));
    }

    #[test]
    fn test_display() {
        assert_eq!(DurationRange::from_millis(100, 500).to_string(), "100-500ms");
    }

    #[test]
    fn test_duration_secs_serde() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            #[serde(with = "duration_secs")]
            elapsed: Duration,
        }

        let json = serde_json::to_string(&Wrapper {
            elapsed: Duration::from_millis(1_500),
        })
        .unwrap();
        assert_eq!(json, r#"{"elapsed":1.5}"#);

        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.elapsed, Duration::from_millis(1_500));
    }
}
