/// Cosine similarity in `[-1, 1]`. Inputs need not be normalised; zero
/// vectors, length mismatches and non-finite results score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a * norm_b);
    if !similarity.is_finite() {
        return 0.0;
    }
    similarity.clamp(-1.0, 1.0)
}

pub fn is_match(similarity: f32, threshold: f32) -> bool {
    similarity >= threshold
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<f32> {
        (0..512).map(|i| ((i * 37 % 101) as f32 - 50.0) / 13.0).collect()
    }

    #[test]
    fn identical_vectors_score_one() {
        let v = sample();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        let v = sample();
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-5);
    }

    #[test]
    fn scale_does_not_matter() {
        let v = sample();
        let scaled: Vec<f32> = v.iter().map(|x| x * 42.0).collect();
        assert!((cosine_similarity(&v, &scaled) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
    }

    #[test]
    fn is_match_is_monotonic_in_similarity() {
        let threshold = 0.5;
        let scores = [-1.0, -0.2, 0.0, 0.49, 0.5, 0.51, 0.9, 1.0];
        for (i, &s1) in scores.iter().enumerate() {
            for &s2 in &scores[i + 1..] {
                if is_match(s1, threshold) {
                    assert!(is_match(s2, threshold), "{} matched but {} did not", s1, s2);
                }
            }
        }
        assert!(is_match(0.5, 0.5));
        assert!(!is_match(f32::NAN, 0.5));
    }
}
