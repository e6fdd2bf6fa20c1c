use std::cmp::Ordering;

use ndarray::ArrayView1;

use crate::core::errors::RagError;

pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Result<f32, RagError> {
    if query.is_empty() || candidate.is_empty() {
        return Err(RagError::BadRequest(
            "Vectors must not be empty".to_string(),
        ));
    }
    if query.len() != candidate.len() {
        return Err(RagError::BadRequest(format!(
            "Vector length mismatch: {} != {}",
            query.len(),
            candidate.len()
        )));
    }

    let query_view = ArrayView1::from(query);
    let candidate_view = ArrayView1::from(candidate);

    let dot = query_view.dot(&candidate_view);
    let denom = l2_norm(&query_view) * l2_norm(&candidate_view);
    if denom <= f32::EPSILON {
        return Ok(0.0);
    }

    Ok((dot / denom).clamp(-1.0, 1.0))
}

/// Scores each candidate against `query`, returning `(position, score)` best first.
pub fn rank_descending_by_cosine<'a>(
    query: &[f32],
    candidates: impl IntoIterator<Item = &'a [f32]>,
) -> Result<Vec<(usize, f32)>, RagError> {
    let mut scores = Vec::new();
    for (idx, candidate) in candidates.into_iter().enumerate() {
        let score = cosine_similarity(query, candidate)?;
        scores.push((idx, score));
    }

    scores.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
    Ok(scores)
}

fn l2_norm(view: &ArrayView1<f32>) -> f32 {
    view.dot(view).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(left: f32, right: f32) -> bool {
        (left - right).abs() < 1e-5
    }

    #[test]
    fn cosine_is_one_for_identical_vectors() {
        let vec = vec![1.0, 2.0, 3.0, 4.0];
        let score = cosine_similarity(&vec, &vec).expect("cosine should work");
        assert!(approx_eq(score, 1.0));
    }

    #[test]
    fn cosine_is_zero_for_orthogonal_vectors() {
        let score = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).expect("cosine should work");
        assert!(approx_eq(score, 0.0));
    }

    #[test]
    fn zero_vector_scores_zero() {
        let score = cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).expect("cosine should work");
        assert_eq!(score, 0.0);
    }

    #[test]
    fn mismatched_or_empty_vectors_are_rejected() {
        assert!(cosine_similarity(&[], &[]).is_err());
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn ranking_returns_highest_similarity_first() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![0.8, 0.2], vec![0.1, 0.9], vec![0.9, 0.0]];
        let ranked = rank_descending_by_cosine(&query, candidates.iter().map(Vec::as_slice))
            .expect("ranking should work");

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0, 2);
        assert_eq!(ranked[2].0, 1);
    }

    #[test]
    fn ranking_accepts_borrowed_rows() {
        let rows: [&[f32]; 2] = [&[0.0, 1.0], &[1.0, 0.0]];
        let ranked = rank_descending_by_cosine(&[1.0, 0.0], rows).expect("ranking should work");
        assert_eq!(ranked[0], (1, 1.0));

        let err = rank_descending_by_cosine(&[1.0, 0.0], [&[1.0][..]]).expect_err("length");
        assert!(matches!(err, RagError::BadRequest(_)));
    }
}
