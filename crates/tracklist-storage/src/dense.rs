//! Dense vector encoding and brute-force similarity.
//!
//! Vectors are stored as little-endian `f32` blobs. Every dense index kind is
//! executed as an exact scan over the collection: `nlist` and similar
//! parameters are recorded but do not approximate the result.

use tracklist_core::error::{Result, TracklistError};
use tracklist_core::schema::MetricType;

/// Encode a vector as a little-endian `f32` blob.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian `f32` blob.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(TracklistError::StoreQuery(format!(
            "vector blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Inner product of two vectors. Mismatched lengths score 0.0.
pub fn inner_product(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot = inner_product(a, b);
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Score `candidate` against `query` under `metric`. Higher is better.
pub fn score(metric: MetricType, query: &[f32], candidate: &[f32]) -> Result<f64> {
    match metric {
        MetricType::Ip => Ok(inner_product(query, candidate)),
        MetricType::Cosine => Ok(cosine_similarity(query, candidate)),
        MetricType::Bm25 => Err(TracklistError::StoreQuery(
            "BM25 is not a dense vector metric".to_string(),
        )),
    }
}

/// Keep the `k` best-scoring items, highest first.
///
/// The sort is stable, so equal scores keep their input order.
pub fn top_k<T>(mut scored: Vec<(f64, T)>, k: usize) -> Vec<(f64, T)> {
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_vector() {
        let v = vec![0.25f32, -1.5, 3.0, f32::MIN_POSITIVE];
        let bytes = encode_vector(&v);
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_vector(&bytes).unwrap(), v);
    }

    #[test]
    fn test_decode_rejects_ragged_blob() {
        assert!(decode_vector(&[0u8, 1, 2]).is_err());
    }

    #[test]
    fn test_inner_product() {
        assert!((inner_product(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]) - 32.0).abs() < 1e-9);
        assert_eq!(inner_product(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_ip_differs_from_cosine_for_unnormalized() {
        let q = [2.0f32, 0.0];
        let c = [3.0f32, 0.0];
        assert!((score(MetricType::Ip, &q, &c).unwrap() - 6.0).abs() < 1e-9);
        assert!((score(MetricType::Cosine, &q, &c).unwrap() - 1.0).abs() < 1e-9);
        assert!(score(MetricType::Bm25, &q, &c).is_err());
    }

    #[test]
    fn test_top_k_orders_and_keeps_ties_stable() {
        let scored = vec![(0.5, "a"), (0.9, "b"), (0.5, "c"), (0.1, "d")];
        let best = top_k(scored, 3);
        let names: Vec<&str> = best.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }
}
