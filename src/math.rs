//! Small numeric helpers shared by the scorers.

/// Shannon entropy in bits of a probability vector.
///
/// Non-positive and non-finite entries are ignored. A vector whose positive
/// mass does not sum to one is normalised first, so raw counts work too.
///
/// ```
/// use ponder::math::shannon_entropy_bits;
///
/// assert!((shannon_entropy_bits(&[0.5, 0.5]) - 1.0).abs() < 1e-12);
/// assert_eq!(shannon_entropy_bits(&[1.0]), 0.0);
/// ```
pub fn shannon_entropy_bits(probs: &[f64]) -> f64 {
    let total: f64 = probs
        .iter()
        .filter(|p| p.is_finite() && **p > 0.0)
        .sum();
    if total <= 0.0 {
        return 0.0;
    }
    probs
        .iter()
        .filter(|p| p.is_finite() && **p > 0.0)
        .map(|p| {
            let p = p / total;
            -p * p.log2()
        })
        .sum::<f64>()
        .max(0.0)
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns `None` when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Mean and population standard deviation. Empty input yields `(0.0, 0.0)`.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_normalises_counts() {
        let h = shannon_entropy_bits(&[2.0, 2.0, 2.0, 2.0]);
        assert!((h - 2.0).abs() < 1e-12);
    }

    #[test]
    fn entropy_of_empty_is_zero() {
        assert_eq!(shannon_entropy_bits(&[]), 0.0);
        assert_eq!(shannon_entropy_bits(&[0.0, -1.0]), 0.0);
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-12);
    }

    #[test]
    fn mean_std_population() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - 2.0).abs() < 1e-12);
    }
}
