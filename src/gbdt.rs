use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Hyperparameters for boosted regression trees. Splits use the
/// second-order gain G^2/(H + l2) per side minus the parent score, and
/// leaf weights apply L1 soft-thresholding before the L2-damped ratio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GbdtParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_leaf: usize,
    pub l1: f64,
    pub l2: f64,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            n_trees: 120,
            max_depth: 4,
            learning_rate: 0.08,
            min_leaf: 20,
            l1: 0.0,
            l2: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

impl Tree {
    fn fit(rows: &[Vec<f64>], grad: &[f64], hess: &[f64], params: &GbdtParams) -> Self {
        let idx: Vec<usize> = (0..rows.len()).collect();
        let mut nodes = Vec::new();
        let root = grow(rows, grad, hess, &idx, 0, params, &mut nodes);
        Self { nodes, root }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut at = self.root;
        loop {
            match &self.nodes[at] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    at = if row.get(*feature).copied().unwrap_or(0.0) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

fn leaf_value(g: f64, h: f64, params: &GbdtParams) -> f64 {
    let shrunk = (g.abs() - params.l1).max(0.0);
    if shrunk == 0.0 {
        0.0
    } else {
        -g.signum() * shrunk / (h + params.l2)
    }
}

fn side_score(g: f64, h: f64, l2: f64) -> f64 {
    g * g / (h + l2)
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    gain: f64,
    feature: usize,
    threshold: f64,
}

#[allow(clippy::too_many_arguments)]
fn best_split_for_feature(
    rows: &[Vec<f64>],
    grad: &[f64],
    hess: &[f64],
    idx: &[usize],
    feature: usize,
    params: &GbdtParams,
    g_sum: f64,
    h_sum: f64,
    parent_score: f64,
) -> Option<SplitCandidate> {
    let mut ordered: Vec<usize> = idx.to_vec();
    // Ties broken by row index keep the fit independent of input order.
    ordered.sort_by(|&a, &b| {
        rows[a][feature]
            .partial_cmp(&rows[b][feature])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut best: Option<SplitCandidate> = None;
    let mut gl = 0.0;
    let mut hl = 0.0;
    for (k, &i) in ordered.iter().enumerate().take(ordered.len() - 1) {
        gl += grad[i];
        hl += hess[i];
        let left_n = k + 1;
        let right_n = ordered.len() - left_n;
        if left_n < params.min_leaf || right_n < params.min_leaf {
            continue;
        }
        let v = rows[i][feature];
        let v_next = rows[ordered[k + 1]][feature];
        if v_next <= v {
            continue;
        }
        let gain = side_score(gl, hl, params.l2)
            + side_score(g_sum - gl, h_sum - hl, params.l2)
            - parent_score;
        if gain > 1e-9 && best.is_none_or(|b| gain > b.gain) {
            best = Some(SplitCandidate {
                gain,
                feature,
                threshold: (v + v_next) / 2.0,
            });
        }
    }
    best
}

fn grow(
    rows: &[Vec<f64>],
    grad: &[f64],
    hess: &[f64],
    idx: &[usize],
    depth: usize,
    params: &GbdtParams,
    nodes: &mut Vec<Node>,
) -> usize {
    let g_sum: f64 = idx.iter().map(|&i| grad[i]).sum();
    let h_sum: f64 = idx.iter().map(|&i| hess[i]).sum();

    let make_leaf = |nodes: &mut Vec<Node>| {
        nodes.push(Node::Leaf {
            value: leaf_value(g_sum, h_sum, params),
        });
        nodes.len() - 1
    };

    if depth >= params.max_depth || idx.len() < (2 * params.min_leaf).max(2) {
        return make_leaf(nodes);
    }

    let n_features = rows[idx[0]].len();
    let parent_score = side_score(g_sum, h_sum, params.l2);

    // Features are scanned in parallel; the reduction is totally ordered
    // by (gain, feature index) so the winner never depends on scheduling.
    let best = (0..n_features)
        .into_par_iter()
        .filter_map(|feature| {
            best_split_for_feature(rows, grad, hess, idx, feature, params, g_sum, h_sum, parent_score)
        })
        .reduce_with(|a, b| {
            if b.gain > a.gain || (b.gain == a.gain && b.feature < a.feature) {
                b
            } else {
                a
            }
        });

    let Some(SplitCandidate { feature, threshold, .. }) = best else {
        return make_leaf(nodes);
    };

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
        idx.iter().partition(|&&i| rows[i][feature] <= threshold);
    let left = grow(rows, grad, hess, &left_idx, depth + 1, params, nodes);
    let right = grow(rows, grad, hess, &right_idx, depth + 1, params, nodes);
    nodes.push(Node::Split {
        feature,
        threshold,
        left,
        right,
    });
    nodes.len() - 1
}

/// Boosted trees on squared loss. Gradient is residual, hessian is one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtRegressor {
    params: GbdtParams,
    base: f64,
    trees: Vec<Tree>,
}

impl GbdtRegressor {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], params: GbdtParams) -> Self {
        assert_eq!(rows.len(), targets.len());
        let n = rows.len();
        let base = if n == 0 {
            0.0
        } else {
            targets.iter().sum::<f64>() / n as f64
        };

        let mut preds = vec![base; n];
        let hess = vec![1.0_f64; n];
        let mut grad = vec![0.0_f64; n];
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees {
            for i in 0..n {
                grad[i] = preds[i] - targets[i];
            }
            let tree = Tree::fit(rows, &grad, &hess, &params);
            for i in 0..n {
                preds[i] += params.learning_rate * tree.predict_row(&rows[i]);
            }
            trees.push(tree);
        }

        Self { params, base, trees }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut score = self.base;
        for tree in &self.trees {
            score += self.params.learning_rate * tree.predict_row(row);
        }
        score
    }
}

/// Boosted trees on softmax cross-entropy. Binary targets are the
/// two-class special case, so one code path serves both the yes/no
/// markets and the three-way result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtClassifier {
    params: GbdtParams,
    n_classes: usize,
    base: Vec<f64>,
    // trees[round][class]
    trees: Vec<Vec<Tree>>,
}

impl GbdtClassifier {
    pub fn fit(rows: &[Vec<f64>], labels: &[u8], n_classes: usize, params: GbdtParams) -> Self {
        assert_eq!(rows.len(), labels.len());
        assert!(n_classes >= 2);
        let n = rows.len();

        // Log-prior initialization with a count floor so an absent class
        // still gets a finite score.
        let mut counts = vec![1.0_f64; n_classes];
        for &y in labels {
            counts[y as usize] += 1.0;
        }
        let total: f64 = counts.iter().sum();
        let base: Vec<f64> = counts.iter().map(|c| (c / total).ln()).collect();

        let mut scores: Vec<Vec<f64>> = vec![base.clone(); n];
        let mut grad = vec![0.0_f64; n];
        let mut hess = vec![0.0_f64; n];
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees {
            let probs: Vec<Vec<f64>> = scores.iter().map(|s| softmax(s)).collect();
            let mut round = Vec::with_capacity(n_classes);
            for class in 0..n_classes {
                for i in 0..n {
                    let p = probs[i][class];
                    let y = if labels[i] as usize == class { 1.0 } else { 0.0 };
                    grad[i] = p - y;
                    hess[i] = (p * (1.0 - p)).max(1e-6);
                }
                let tree = Tree::fit(rows, &grad, &hess, &params);
                for i in 0..n {
                    scores[i][class] += params.learning_rate * tree.predict_row(&rows[i]);
                }
                round.push(tree);
            }
            trees.push(round);
        }

        Self {
            params,
            n_classes,
            base,
            trees,
        }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn decision_scores(&self, row: &[f64]) -> Vec<f64> {
        let mut scores = self.base.clone();
        for round in &self.trees {
            for (class, tree) in round.iter().enumerate() {
                scores[class] += self.params.learning_rate * tree.predict_row(row);
            }
        }
        scores
    }

    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        softmax(&self.decision_scores(row))
    }
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..200 {
            let x = i as f64 / 100.0 - 1.0;
            rows.push(vec![x, 0.0]);
            y.push(if x > 0.0 { 2.0 } else { -1.0 });
        }
        (rows, y)
    }

    fn small_params() -> GbdtParams {
        GbdtParams {
            n_trees: 30,
            max_depth: 3,
            learning_rate: 0.3,
            min_leaf: 5,
            l1: 0.0,
            l2: 1.0,
        }
    }

    #[test]
    fn regressor_learns_a_step_function() {
        let (rows, y) = step_data();
        let model = GbdtRegressor::fit(&rows, &y, small_params());
        assert!((model.predict(&[0.7, 0.0]) - 2.0).abs() < 0.2);
        assert!((model.predict(&[-0.7, 0.0]) + 1.0).abs() < 0.2);
    }

    #[test]
    fn regressor_with_no_trees_returns_target_mean() {
        let (rows, y) = step_data();
        let mut params = small_params();
        params.n_trees = 0;
        let model = GbdtRegressor::fit(&rows, &y, params);
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        assert!((model.predict(&[0.3, 0.0]) - mean).abs() < 1e-12);
    }

    #[test]
    fn fitting_is_deterministic() {
        let (rows, y) = step_data();
        let a = GbdtRegressor::fit(&rows, &y, small_params());
        let b = GbdtRegressor::fit(&rows, &y, small_params());
        for x in [-0.9, -0.1, 0.1, 0.9] {
            assert_eq!(a.predict(&[x, 0.0]), b.predict(&[x, 0.0]));
        }
    }

    #[test]
    fn binary_classifier_separates_clusters() {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..100 {
            let jitter = (i % 10) as f64 / 50.0;
            rows.push(vec![1.0 + jitter]);
            labels.push(1u8);
            rows.push(vec![-1.0 - jitter]);
            labels.push(0u8);
        }
        let model = GbdtClassifier::fit(&rows, &labels, 2, small_params());
        let p_pos = model.predict_proba(&[1.2]);
        let p_neg = model.predict_proba(&[-1.2]);
        assert!(p_pos[1] > 0.9, "p_pos = {p_pos:?}");
        assert!(p_neg[0] > 0.9, "p_neg = {p_neg:?}");
    }

    #[test]
    fn multiclass_probabilities_sum_to_one() {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let jitter = (i % 6) as f64 / 30.0;
            rows.push(vec![-2.0 + jitter, 0.0]);
            labels.push(0u8);
            rows.push(vec![0.0 + jitter, 1.0]);
            labels.push(1u8);
            rows.push(vec![2.0 + jitter, 0.0]);
            labels.push(2u8);
        }
        let model = GbdtClassifier::fit(&rows, &labels, 3, small_params());
        let p = model.predict_proba(&[1.9, 0.0]);
        assert_eq!(p.len(), 3);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(p[2] > p[0] && p[2] > p[1]);
    }

    #[test]
    fn heavy_l1_prunes_leaves_to_zero() {
        let (rows, y) = step_data();
        let mut params = small_params();
        params.l1 = 1e6;
        let model = GbdtRegressor::fit(&rows, &y, params);
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        assert!((model.predict(&[0.5, 0.0]) - mean).abs() < 1e-9);
    }
}
