// Proximity scorer - tolerance-banded closeness of two reported values

/// Lowest score inside the tolerance band
pub const MIN_SCORE: f64 = 0.2;

/// Score for identical values
pub const MAX_SCORE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityScorer {
    /// Fractional allowance, 0.1 = values within 10% of each other
    pub tolerance: f64,
}

impl ProximityScorer {
    pub fn new(tolerance: f64) -> Self {
        ProximityScorer { tolerance }
    }

    /// Smallest ratio still inside the band
    pub fn min_ratio(&self) -> f64 {
        1.0 / (1.0 + self.tolerance)
    }

    /// Score in `[0.0, MAX_SCORE]`.
    ///
    /// Missing or non-positive values carry no evidence and score 0. Inside the
    /// band the ratio is rescaled linearly from `[min_ratio, 1]` to
    /// `[MIN_SCORE, MAX_SCORE]`; outside it the score is 0.
    pub fn score(&self, base: Option<f64>, query: Option<f64>) -> f64 {
        let (base, query) = match (base, query) {
            (Some(b), Some(q)) if b > 0.0 && q > 0.0 => (b, q),
            _ => return 0.0,
        };

        let ratio = (base / query).min(query / base);
        let min_ratio = self.min_ratio();

        if ratio < min_ratio {
            return 0.0;
        }

        MIN_SCORE + (ratio - min_ratio) / (1.0 - min_ratio) * (MAX_SCORE - MIN_SCORE)
    }
}

impl Default for ProximityScorer {
    fn default() -> Self {
        ProximityScorer::new(0.1)
    }
}

// ============================================================================
// TESTS
// ============================================================================
