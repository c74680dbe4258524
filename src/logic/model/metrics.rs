//! Classification metrics for failure prediction

use serde::{Deserialize, Serialize};

/// Binary confusion counts, positive = failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(actual: &[bool], predicted: &[bool]) -> Self {
        let mut m = Self::default();
        for (&a, &p) in actual.iter().zip(predicted) {
            match (a, p) {
                (true, true) => m.true_positive += 1,
                (false, true) => m.false_positive += 1,
                (false, false) => m.true_negative += 1,
                (true, false) => m.false_negative += 1,
            }
        }
        m
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }
}

/// Precision / recall / F1 with zero-division mapped to 0.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub confusion: ConfusionMatrix,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

impl ClassificationReport {
    pub fn compute(actual: &[bool], predicted: &[bool]) -> Self {
        let c = ConfusionMatrix::from_predictions(actual, predicted);
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

        let precision = ratio(c.true_positive, c.true_positive + c.false_positive);
        let recall = ratio(c.true_positive, c.true_positive + c.false_negative);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        Self {
            confusion: c,
            precision,
            recall,
            f1,
            accuracy: ratio(c.true_positive + c.true_negative, c.total()),
        }
    }
}

/// F1 score alone (search objective)
pub fn f1_score(actual: &[bool], predicted: &[bool]) -> f64 {
    ClassificationReport::compute(actual, predicted).f1
}
