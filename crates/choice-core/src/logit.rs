//! Multinomial and nested logit probabilities and logsums.
//!
//! Nested frames carry one column per tree node in arena order, so column `i`
//! of an exp-utility or local-probability frame belongs to
//! `tree.node(i)`.

use std::collections::BTreeMap;

use crate::frame::Frame;
use crate::nest::NestTree;

/// Row-wise softmax with max shift.
///
/// Rows with any NaN, or with every utility at negative infinity, come back
/// all zero so the bad-probability check flags them. A row whose maximum is
/// positive infinity is uniform over its infinite alternatives.
pub fn mnl_probabilities(utilities: &Frame) -> Frame {
    let mut probs = Frame::zeros(utilities.keys().to_vec(), utilities.columns().to_vec());
    for row in 0..utilities.rows() {
        softmax_into(utilities.row(row), probs.row_mut(row));
    }
    probs
}

fn softmax_into(utilities: &[f64], out: &mut [f64]) {
    if utilities.iter().any(|u| u.is_nan()) {
        return;
    }
    let max = utilities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return;
    }
    if max == f64::INFINITY {
        let count = utilities.iter().filter(|u| **u == f64::INFINITY).count() as f64;
        for (slot, u) in out.iter_mut().zip(utilities) {
            *slot = if *u == f64::INFINITY { 1.0 / count } else { 0.0 };
        }
        return;
    }
    let mut sum = 0.0;
    for (slot, u) in out.iter_mut().zip(utilities) {
        *slot = (u - max).exp();
        sum += *slot;
    }
    for slot in out.iter_mut() {
        *slot /= sum;
    }
}

/// `ln(sum(exp(u)))` per row, computed with the same shift.
pub fn mnl_logsums(utilities: &Frame) -> Vec<f64> {
    (0..utilities.rows())
        .map(|row| log_sum_exp(utilities.row(row)))
        .collect()
}

fn log_sum_exp(utilities: &[f64]) -> f64 {
    let max = utilities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if utilities.iter().any(|u| u.is_nan()) {
        return f64::NAN;
    }
    if max.is_infinite() {
        return max;
    }
    max + utilities.iter().map(|u| (u - max).exp()).sum::<f64>().ln()
}

/// Exponentiated utility of every node, children before parents.
///
/// Leaves take `exp(u / product_of_coefficients)`; nests take
/// `exp(coefficient * ln(sum of children))`. A nest whose children are all
/// zero gets `ln(0) = -inf` and therefore zero.
pub fn nested_exp_utilities(utilities: &Frame, tree: &NestTree) -> Frame {
    let names = tree.nodes().iter().map(|node| node.name.clone()).collect();
    let mut exp_utilities = Frame::zeros(utilities.keys().to_vec(), names);
    for row in 0..utilities.rows() {
        let raw = utilities.row(row);
        let out = exp_utilities.row_mut(row);
        for &idx in tree.post_order() {
            let node = tree.node(idx);
            out[idx] = match node.alternative {
                Some(alternative) => (raw[alternative] / node.product_of_coefficients).exp(),
                None => {
                    let sum: f64 = node.children.iter().map(|child| out[*child]).sum();
                    (node.coefficient * sum.ln()).exp()
                }
            };
        }
    }
    exp_utilities
}

/// Within-nest probabilities plus per-nest counts of all-zero rows.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedProbabilities {
    /// Local probability of each node among its siblings; the root column is 1.
    pub local: Frame,
    /// Nest name to the number of rows where every child was zero.
    pub degenerate: BTreeMap<String, usize>,
}

/// Local probabilities with zeros allowed: a nest whose children sum to zero
/// gives every child probability zero.
pub fn nested_probabilities(exp_utilities: &Frame, tree: &NestTree) -> NestedProbabilities {
    let mut local = Frame::zeros(exp_utilities.keys().to_vec(), exp_utilities.columns().to_vec());
    let mut degenerate = BTreeMap::new();
    let nests: Vec<usize> = tree.nests().collect();
    for row in 0..exp_utilities.rows() {
        let values = exp_utilities.row(row);
        let out = local.row_mut(row);
        out[NestTree::ROOT] = 1.0;
        for &nest in &nests {
            let children = &tree.node(nest).children;
            let sum: f64 = children.iter().map(|child| values[*child]).sum();
            if sum == 0.0 {
                *degenerate
                    .entry(tree.node(nest).name.clone())
                    .or_insert(0_usize) += 1;
                continue;
            }
            for &child in children {
                out[child] = values[child] / sum;
            }
        }
    }
    NestedProbabilities { local, degenerate }
}

/// Flatten local probabilities to one column per alternative.
///
/// A leaf's probability is the product of local probabilities along its path
/// up to, not including, the root. Alternatives absent from the tree get zero.
pub fn base_probabilities(local: &Frame, tree: &NestTree) -> Frame {
    let mut base = Frame::zeros(local.keys().to_vec(), tree.alternatives().to_vec());
    let paths: Vec<(usize, Vec<usize>)> = tree
        .leaves()
        .iter()
        .filter_map(|leaf| {
            tree.node(*leaf)
                .alternative
                .map(|alternative| (alternative, tree.path_to_root(*leaf).collect()))
        })
        .collect();
    for row in 0..local.rows() {
        let probs = local.row(row);
        let out = base.row_mut(row);
        for (alternative, path) in &paths {
            out[*alternative] = path.iter().map(|node| probs[*node]).product();
        }
    }
    base
}

/// Nested logit end to end: utilities to per-alternative probabilities.
pub fn nl_probabilities(utilities: &Frame, tree: &NestTree) -> (Frame, BTreeMap<String, usize>) {
    let exp_utilities = nested_exp_utilities(utilities, tree);
    let NestedProbabilities { local, degenerate } = nested_probabilities(&exp_utilities, tree);
    (base_probabilities(&local, tree), degenerate)
}

/// `ln` of the root's exponentiated utility per row.
pub fn nl_logsums(exp_utilities: &Frame) -> Vec<f64> {
    exp_utilities
        .column_values(NestTree::ROOT)
        .map(f64::ln)
        .collect()
}
