use crate::models::Dimension;

pub const CORRECTNESS_WEIGHT: f64 = 0.25;
pub const QUALITY_WEIGHT: f64 = 0.20;
pub const PERFORMANCE_WEIGHT: f64 = 0.15;
pub const UNDERSTANDING_WEIGHT: f64 = 0.15;
pub const COVERAGE_WEIGHT: f64 = 0.15;
pub const RECOVERY_WEIGHT: f64 = 0.10;

pub fn weight(dimension: Dimension) -> f64 {
    match dimension {
        Dimension::Correctness => CORRECTNESS_WEIGHT,
        Dimension::Quality => QUALITY_WEIGHT,
        Dimension::Performance => PERFORMANCE_WEIGHT,
        Dimension::Understanding => UNDERSTANDING_WEIGHT,
        Dimension::Coverage => COVERAGE_WEIGHT,
        Dimension::Recovery => RECOVERY_WEIGHT,
    }
}

/// Per-dimension scores; `None` marks a dimension that does not apply or could not run
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DimensionScores {
    pub correctness: f64,
    pub quality: f64,
    pub performance: f64,
    pub understanding: Option<f64>,
    pub coverage: f64,
    pub recovery: Option<f64>,
}

impl DimensionScores {
    fn available(&self) -> [(Dimension, Option<f64>); 6] {
        [
            (Dimension::Correctness, Some(self.correctness)),
            (Dimension::Quality, Some(self.quality)),
            (Dimension::Performance, Some(self.performance)),
            (Dimension::Understanding, self.understanding),
            (Dimension::Coverage, Some(self.coverage)),
            (Dimension::Recovery, self.recovery),
        ]
    }

    /// Weighted combination over the available dimensions, renormalised by their
    /// total weight. With every dimension present this is the plain weighted sum;
    /// without recovery the other five are scaled by 1/0.90.
    pub fn overall_score(&self) -> f64 {
        let (weighted, total_weight) = self
            .available()
            .iter()
            .filter_map(|(dimension, score)| score.map(|s| (weight(*dimension), s)))
            .fold((0.0, 0.0), |(sum, total), (w, s)| {
                (sum + w * s.clamp(0.0, 1.0), total + w)
            });

        if total_weight == 0.0 {
            0.0
        } else {
            (weighted / total_weight).clamp(0.0, 1.0)
        }
    }
}
