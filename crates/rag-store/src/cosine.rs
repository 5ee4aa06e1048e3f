//! Cosine similarity.

use rag_core::{RagError, Result};

/// Cosine similarity of two vectors, clamped to `[-1, 1]`.
///
/// Vectors of different length are rejected. A zero vector has no
/// direction and scores 0 against anything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(RagError::invalid_argument(format!(
            "vector dimensions don't match: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    // Rounding can push the ratio slightly past 1.
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}
