use serde::{Deserialize, Serialize};

use crate::gbdt::GbdtClassifier;

/// Isotonic regression fitted with pool-adjacent-violators. Maps a raw
/// model score to a monotone non-decreasing probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsotonicCalibrator {
    /// Breakpoints of the fitted step function, score ascending.
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl IsotonicCalibrator {
    pub fn fit(scores: &[f64], outcomes: &[f64]) -> Self {
        assert_eq!(scores.len(), outcomes.len());
        if scores.is_empty() {
            return Self {
                xs: Vec::new(),
                ys: Vec::new(),
            };
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| {
            scores[a]
                .partial_cmp(&scores[b])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        // Blocks of (weight, mean y, min x, max x); merge while a block
        // violates monotonicity against its predecessor.
        let mut blocks: Vec<(f64, f64, f64, f64)> = Vec::with_capacity(order.len());
        for &i in &order {
            blocks.push((1.0, outcomes[i], scores[i], scores[i]));
            while blocks.len() >= 2 {
                let (w2, y2, _, x2_hi) = blocks[blocks.len() - 1];
                let (w1, y1, x1_lo, _) = blocks[blocks.len() - 2];
                if y1 <= y2 {
                    break;
                }
                blocks.pop();
                blocks.pop();
                let w = w1 + w2;
                blocks.push((w, (w1 * y1 + w2 * y2) / w, x1_lo, x2_hi));
            }
        }

        let mut xs = Vec::with_capacity(blocks.len());
        let mut ys = Vec::with_capacity(blocks.len());
        for (_, y, lo, _) in blocks {
            xs.push(lo);
            ys.push(y);
        }
        Self { xs, ys }
    }

    /// Piecewise-constant interpolation; scores below the first block
    /// clamp to its value.
    pub fn transform(&self, score: f64) -> f64 {
        if self.xs.is_empty() {
            return score.clamp(0.0, 1.0);
        }
        match self.xs.partition_point(|&x| x <= score) {
            0 => self.ys[0],
            k => self.ys[k - 1],
        }
    }
}

/// Classifier plus one isotonic map per class, fitted on a held-out
/// slice so the map never sees training rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratedClassifier {
    model: GbdtClassifier,
    calibrators: Vec<IsotonicCalibrator>,
}

impl CalibratedClassifier {
    /// `holdout_mask[i]` selects the rows the calibrators are fitted on.
    /// The underlying model must already have been fitted without them.
    pub fn fit(
        model: GbdtClassifier,
        rows: &[Vec<f64>],
        labels: &[u8],
        holdout_mask: &[bool],
    ) -> Self {
        assert_eq!(rows.len(), labels.len());
        assert_eq!(rows.len(), holdout_mask.len());

        let n_classes = model.n_classes();
        let mut scores: Vec<Vec<f64>> = Vec::new();
        let mut held_labels: Vec<u8> = Vec::new();
        for i in 0..rows.len() {
            if holdout_mask[i] {
                scores.push(model.predict_proba(&rows[i]));
                held_labels.push(labels[i]);
            }
        }

        let mut calibrators = Vec::with_capacity(n_classes);
        for class in 0..n_classes {
            let raw: Vec<f64> = scores.iter().map(|p| p[class]).collect();
            let hits: Vec<f64> = held_labels
                .iter()
                .map(|&y| if y as usize == class { 1.0 } else { 0.0 })
                .collect();
            calibrators.push(IsotonicCalibrator::fit(&raw, &hits));
        }

        Self { model, calibrators }
    }

    /// Calibrated per-class probabilities, renormalized to sum to one.
    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let raw = self.model.predict_proba(row);
        let mut out: Vec<f64> = raw
            .iter()
            .zip(&self.calibrators)
            .map(|(&p, c)| c.transform(p).clamp(1e-6, 1.0))
            .collect();
        let sum: f64 = out.iter().sum();
        if sum > 0.0 {
            for p in &mut out {
                *p /= sum;
            }
        }
        out
    }

    pub fn n_classes(&self) -> usize {
        self.model.n_classes()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassifierMetrics {
    pub samples: usize,
    pub accuracy: f64,
    pub brier: f64,
    pub log_loss: f64,
    pub ece: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoiDiagnostic {
    pub bets: usize,
    pub roi: f64,
}

pub const ECE_BINS: usize = 10;
pub const DIAG_MIN_PROB: f64 = 0.55;
pub const DIAG_MIN_EDGE: f64 = 0.03;

/// Scores a probability matrix against integer labels. Brier and
/// log-loss are averaged over samples; ECE uses ten equal-width bins on
/// the winning-class probability.
pub fn evaluate_probs(probs: &[Vec<f64>], labels: &[u8]) -> ClassifierMetrics {
    assert_eq!(probs.len(), labels.len());
    let n = probs.len();
    if n == 0 {
        return ClassifierMetrics {
            samples: 0,
            accuracy: 0.0,
            brier: 0.0,
            log_loss: 0.0,
            ece: 0.0,
        };
    }

    let mut correct = 0usize;
    let mut brier = 0.0;
    let mut log_loss = 0.0;
    let mut bin_conf = [0.0_f64; ECE_BINS];
    let mut bin_hits = [0.0_f64; ECE_BINS];
    let mut bin_count = [0usize; ECE_BINS];

    for (p, &y) in probs.iter().zip(labels) {
        let y = y as usize;
        let (top, &top_p) = p
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((0, &0.0));
        if top == y {
            correct += 1;
        }
        for (k, &pk) in p.iter().enumerate() {
            let t = if k == y { 1.0 } else { 0.0 };
            brier += (pk - t) * (pk - t);
        }
        log_loss -= p.get(y).copied().unwrap_or(0.0).max(1e-15).ln();

        let bin = ((top_p * ECE_BINS as f64) as usize).min(ECE_BINS - 1);
        bin_conf[bin] += top_p;
        bin_hits[bin] += if top == y { 1.0 } else { 0.0 };
        bin_count[bin] += 1;
    }

    let mut ece = 0.0;
    for b in 0..ECE_BINS {
        if bin_count[b] == 0 {
            continue;
        }
        let w = bin_count[b] as f64 / n as f64;
        let conf = bin_conf[b] / bin_count[b] as f64;
        let acc = bin_hits[b] / bin_count[b] as f64;
        ece += w * (conf - acc).abs();
    }

    ClassifierMetrics {
        samples: n,
        accuracy: correct as f64 / n as f64,
        brier: brier / n as f64,
        log_loss: log_loss / n as f64,
        ece,
    }
}

/// Flat-stake ROI over validation rows where the winning-class
/// probability clears 0.55 and the edge over the quoted price clears
/// 0.03. Diagnostic only; the real stake rules live in the threshold
/// tables.
pub fn simulated_roi(
    probs: &[Vec<f64>],
    labels: &[u8],
    odds_per_class: &[Vec<Option<f64>>],
) -> RoiDiagnostic {
    let mut bets = 0usize;
    let mut profit = 0.0;

    for ((p, &y), quotes) in probs.iter().zip(labels).zip(odds_per_class) {
        let Some((top, &top_p)) = p
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            continue;
        };
        let Some(odds) = quotes.get(top).copied().flatten() else {
            continue;
        };
        if top_p < DIAG_MIN_PROB || top_p - 1.0 / odds < DIAG_MIN_EDGE {
            continue;
        }
        bets += 1;
        profit += if top == y as usize { odds - 1.0 } else { -1.0 };
    }

    RoiDiagnostic {
        bets,
        roi: if bets == 0 { 0.0 } else { profit / bets as f64 },
    }
}
