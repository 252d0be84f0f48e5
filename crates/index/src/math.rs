//! Vector math for similarity search and confidence signals.

/// Cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns `0.0` if either vector has
/// zero magnitude (avoiding division by zero).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        tracing::warn!(
            len_a = a.len(),
            len_b = b.len(),
            "cosine_similarity: mismatched vector lengths, returning 0.0"
        );
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Arithmetic mean. Zero for an empty slice.
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Population standard deviation. Zero for fewer than two values.
pub fn stddev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

/// Shannon entropy of the value distribution, normalized to `[0, 1]`.
///
/// Values are treated as non-negative masses; zero-sum or singleton
/// inputs have entropy 0.
pub fn normalized_entropy(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let total: f32 = values.iter().map(|v| v.max(0.0)).sum();
    if total <= 0.0 {
        return 0.0;
    }

    let mut entropy = 0.0f32;
    for &value in values {
        let p = value.max(0.0) / total;
        if p > 0.0 {
            entropy -= p * p.ln();
        }
    }
    entropy / (values.len() as f32).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-6, "expected ~1.0, got {sim}");
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_opposite_vectors() {
        let a = vec![1.0, 2.0];
        let b = vec![-1.0, -2.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_zero_vector_returns_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 2.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_returns_zero() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn mean_and_stddev() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-6);
        assert_eq!(stddev(&[5.0]), 0.0);
        assert!((stddev(&[2.0, 2.0, 2.0])).abs() < 1e-6);
        // Known case: population stddev of [1, 3] is 1.
        assert!((stddev(&[1.0, 3.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn entropy_uniform_is_one() {
        let entropy = normalized_entropy(&[0.25, 0.25, 0.25, 0.25]);
        assert!((entropy - 1.0).abs() < 1e-5, "got {entropy}");
    }

    #[test]
    fn entropy_concentrated_is_low() {
        let entropy = normalized_entropy(&[1.0, 0.0, 0.0, 0.0]);
        assert!(entropy < 1e-5, "got {entropy}");
    }

    #[test]
    fn entropy_degenerate_inputs() {
        assert_eq!(normalized_entropy(&[]), 0.0);
        assert_eq!(normalized_entropy(&[0.9]), 0.0);
        assert_eq!(normalized_entropy(&[0.0, 0.0]), 0.0);
    }
}
