//! Distances between discrete distributions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Category → weight. Weights are normalized before any distance is taken.
pub type Distribution = BTreeMap<String, f64>;

const CHI_SQUARE_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceMetrics {
    /// Base-2 Jensen-Shannon distance, in [0, 1].
    pub js_divergence: f64,
    pub chi_square: f64,
    pub total_variation: f64,
}

/// Mean of per-group distances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub avg_js_divergence: f64,
    pub avg_chi_square: f64,
    pub avg_total_variation: f64,
}

impl AverageMetrics {
    pub fn of<'a>(metrics: impl IntoIterator<Item = &'a DistanceMetrics>) -> Option<Self> {
        let mut n = 0usize;
        let mut sum = (0.0, 0.0, 0.0);
        for m in metrics {
            n += 1;
            sum.0 += m.js_divergence;
            sum.1 += m.chi_square;
            sum.2 += m.total_variation;
        }
        (n > 0).then(|| Self {
            avg_js_divergence: sum.0 / n as f64,
            avg_chi_square: sum.1 / n as f64,
            avg_total_variation: sum.2 / n as f64,
        })
    }
}

/// Align two distributions on the union of their categories and normalize
/// each to sum to 1. An all-zero input stays the zero vector.
pub fn aligned(p: &Distribution, q: &Distribution) -> (Vec<f64>, Vec<f64>) {
    let keys: BTreeSet<&String> = p.keys().chain(q.keys()).collect();
    let pick = |d: &Distribution| -> Vec<f64> {
        keys.iter()
            .map(|k| d.get(*k).copied().filter(|w| w.is_finite() && *w > 0.0).unwrap_or(0.0))
            .collect()
    };
    (normalize(pick(p)), normalize(pick(q)))
}

fn normalize(mut weights: Vec<f64>) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in &mut weights {
            *w /= total;
        }
    }
    weights
}

fn kl_base2(p: &[f64], m: &[f64]) -> f64 {
    p.iter()
        .zip(m)
        .filter(|(pi, mi)| **pi > 0.0 && **mi > 0.0)
        .map(|(pi, mi)| pi * (pi / mi).log2())
        .sum()
}

/// Jensen-Shannon distance (square root of the base-2 divergence).
pub fn jensen_shannon(p: &[f64], q: &[f64]) -> f64 {
    let m: Vec<f64> = p.iter().zip(q).map(|(a, b)| (a + b) / 2.0).collect();
    let divergence = (kl_base2(p, &m) + kl_base2(q, &m)) / 2.0;
    divergence.max(0.0).sqrt().min(1.0)
}

pub fn chi_square(p: &[f64], q: &[f64]) -> f64 {
    p.iter()
        .zip(q)
        .map(|(a, b)| (a - b).powi(2) / (a + b + CHI_SQUARE_EPSILON))
        .sum::<f64>()
        / 2.0
}

pub fn total_variation(p: &[f64], q: &[f64]) -> f64 {
    p.iter().zip(q).map(|(a, b)| (a - b).abs()).sum::<f64>() / 2.0
}

/// All three distances between two distributions.
pub fn distribution_distance(p: &Distribution, q: &Distribution) -> DistanceMetrics {
    let (p, q) = aligned(p, q);
    DistanceMetrics {
        js_divergence: jensen_shannon(&p, &q),
        chi_square: chi_square(&p, &q),
        total_variation: total_variation(&p, &q),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(pairs: &[(&str, f64)]) -> Distribution {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn identical_distributions_are_zero_apart() {
        let p = dist(&[("support", 0.5), ("oppose", 0.5)]);
        let m = distribution_distance(&p, &p);
        assert_eq!(m.js_divergence, 0.0);
        assert_eq!(m.chi_square, 0.0);
        assert_eq!(m.total_variation, 0.0);
    }

    #[test]
    fn scale_does_not_matter() {
        let counts = dist(&[("support", 30.0), ("oppose", 10.0)]);
        let shares = dist(&[("support", 0.75), ("oppose", 0.25)]);
        let m = distribution_distance(&counts, &shares);
        assert!(m.js_divergence.abs() < 1e-12);
        assert!(m.total_variation.abs() < 1e-12);
    }

    #[test]
    fn disjoint_distributions_are_maximally_apart() {
        let p = dist(&[("support", 1.0)]);
        let q = dist(&[("oppose", 1.0)]);
        let m = distribution_distance(&p, &q);
        assert!((m.js_divergence - 1.0).abs() < 1e-12);
        assert!((m.total_variation - 1.0).abs() < 1e-12);
        assert!((m.chi_square - 1.0).abs() < 1e-9);
    }

    #[test]
    fn known_values() {
        let p = dist(&[("a", 0.5), ("b", 0.5)]);
        let q = dist(&[("a", 0.9), ("b", 0.1)]);
        let m = distribution_distance(&p, &q);
        assert!((m.total_variation - 0.4).abs() < 1e-12);
        // ((0.4^2 / 1.4) + (0.4^2 / 0.6)) / 2
        assert!((m.chi_square - (0.16 / 1.4 + 0.16 / 0.6) / 2.0).abs() < 1e-9);
        assert!(m.js_divergence > 0.0 && m.js_divergence < 1.0);
    }

    #[test]
    fn zero_sum_input_is_zero_vector() {
        let p = dist(&[("support", 0.0), ("oppose", 0.0)]);
        let q = dist(&[("support", 1.0)]);
        let m = distribution_distance(&p, &q);
        assert!(m.js_divergence.is_finite());
        assert!((m.total_variation - 0.5).abs() < 1e-12);
        let both = distribution_distance(&p, &p);
        assert_eq!(both.total_variation, 0.0);
        assert_eq!(both.js_divergence, 0.0);
    }

    #[test]
    fn averages() {
        let a = DistanceMetrics {
            js_divergence: 0.2,
            chi_square: 0.4,
            total_variation: 0.6,
        };
        let b = DistanceMetrics {
            js_divergence: 0.0,
            chi_square: 0.0,
            total_variation: 0.0,
        };
        let avg = AverageMetrics::of([&a, &b]).unwrap();
        assert!((avg.avg_chi_square - 0.2).abs() < 1e-12);
        assert!(AverageMetrics::of(Vec::<&DistanceMetrics>::new()).is_none());
    }
}
