// Randomized isolation ensemble
// Each tree partitions a bagged feature subspace with uniform random
// feature/threshold splits; shorter isolation paths mean more anomalous.
// Fully deterministic for a fixed seed, and serializable so a fitted
// forest travels inside the model artifact.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::entities::ForestConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    root: TreeNode,
}

impl IsolationTree {
    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                TreeNode::Leaf { size } => return depth + average_path_length(*size),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = point.get(*feature).copied().unwrap_or(0.0);
                    node = if value < *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    /// Fits the ensemble on dense, already-imputed row vectors. Rows are
    /// subsampled without replacement per tree; features are bagged per tree.
    pub fn fit(data: &[Vec<f64>], config: &ForestConfig) -> Self {
        let n = data.len();
        let dims = data.first().map_or(0, Vec::len);
        let sample_size = config.max_tree_samples.min(n).max(1);
        let height_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;
        let bag_size = ((dims as f64 * config.feature_fraction).ceil() as usize)
            .clamp(1, dims.max(1));

        let mut trees = Vec::with_capacity(config.tree_count);
        for tree_index in 0..config.tree_count {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(tree_index as u64));

            let mut row_indices: Vec<usize> = (0..n).collect();
            row_indices.shuffle(&mut rng);
            row_indices.truncate(sample_size);

            let mut feature_bag: Vec<usize> = (0..dims).collect();
            feature_bag.shuffle(&mut rng);
            feature_bag.truncate(bag_size);
            feature_bag.sort_unstable();

            let root = build_node(data, &row_indices, &feature_bag, 0, height_limit, &mut rng);
            trees.push(IsolationTree { root });
        }

        Self { trees, sample_size }
    }

    /// Raw anomaly score in (0, 1]: 2^(-E[path] / c(sample_size)).
    /// Higher means the point isolates faster, i.e. is more anomalous.
    pub fn raw_score(&self, point: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let total: f64 = self.trees.iter().map(|tree| tree.path_length(point)).sum();
        let avg = total / self.trees.len() as f64;
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return 0.5;
        }
        2.0_f64.powf(-avg / c)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

fn build_node(
    data: &[Vec<f64>],
    rows: &[usize],
    features: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> TreeNode {
    if depth >= height_limit || rows.len() <= 1 {
        return TreeNode::Leaf { size: rows.len() };
    }

    // Only features with spread inside this partition can split it.
    let mut splittable: Vec<(usize, f64, f64)> = Vec::new();
    for &feature in features {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &row in rows {
            let value = data[row][feature];
            min = min.min(value);
            max = max.max(value);
        }
        if max > min {
            splittable.push((feature, min, max));
        }
    }
    if splittable.is_empty() {
        return TreeNode::Leaf { size: rows.len() };
    }

    let (feature, min, max) = splittable[rng.random_range(0..splittable.len())];
    let threshold = min + rng.random::<f64>() * (max - min);

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
        .iter()
        .partition(|&&row| data[row][feature] < threshold);

    TreeNode::Split {
        feature,
        threshold,
        left: Box::new(build_node(data, &left_rows, features, depth + 1, height_limit, rng)),
        right: Box::new(build_node(data, &right_rows, features, depth + 1, height_limit, rng)),
    }
}

/// Average path length of an unsuccessful BST search over n points.
fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * (n.ln() + 0.577_215_664_9) - 2.0 * (n - 1.0) / n
}
