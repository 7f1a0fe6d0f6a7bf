//! Top-K retrieval over a loaded [`VectorIndex`].
//!
//! Brute-force cosine similarity over every stored vector; higher scores
//! are more similar, matching how the index was built.

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::models::ScoredRecord;

/// Default number of records retrieved per query.
pub const DEFAULT_TOP_K: usize = 4;

/// Return up to `k` records most similar to `query`, best first.
///
/// Returns fewer than `k` results when the index is smaller and an empty
/// result for an empty index. Ties keep insertion order.
pub fn search(index: &VectorIndex, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
    if k == 0 {
        return Err(RagError::bad_request("k must be a positive integer"));
    }
    if index.is_empty() {
        return Ok(Vec::new());
    }
    if query.len() != index.dims() {
        return Err(RagError::retrieval(format!(
            "query vector has {} dimensions, index has {}",
            query.len(),
            index.dims()
        )));
    }

    let mut scored: Vec<ScoredRecord> = index
        .entries()
        .map(|(record, vector)| ScoredRecord {
            record: record.clone(),
            score: cosine_similarity(query, vector),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentRecord, RecordOrigin};

    fn index(vectors: Vec<Vec<f32>>) -> VectorIndex {
        let records = (0..vectors.len())
            .map(|i| {
                DocumentRecord::new(
                    format!("row {}", i),
                    RecordOrigin {
                        source: "t.csv".into(),
                        sheet: None,
                        row: i + 2,
                    },
                )
            })
            .collect();
        VectorIndex::new("m", 2, records, vectors).unwrap()
    }

    #[test]
    fn fewer_vectors_than_k_returns_all_descending() {
        let idx = index(vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
        let results = search(&idx, &[1.0, 0.1], 4).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record.text, "row 1");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn truncates_to_k() {
        let idx = index(vec![
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![0.0, 1.0],
            vec![-1.0, 0.0],
        ]);
        let results = search(&idx, &[1.0, 0.0], 2).unwrap();
        let texts: Vec<_> = results.iter().map(|r| r.record.text.as_str()).collect();
        assert_eq!(texts, vec!["row 0", "row 1"]);
    }

    #[test]
    fn exact_vector_scores_highest() {
        let idx = index(vec![vec![0.3, 0.7], vec![0.8, -0.2], vec![-0.5, 0.5]]);
        let results = search(&idx, &[0.8, -0.2], 3).unwrap();
        assert_eq!(results[0].record.text, "row 1");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_index_returns_empty() {
        let idx = index(Vec::new());
        assert!(search(&idx, &[1.0, 0.0], 4).unwrap().is_empty());
    }

    #[test]
    fn zero_k_is_bad_request() {
        let idx = index(vec![vec![1.0, 0.0]]);
        assert_eq!(search(&idx, &[1.0, 0.0], 0).unwrap_err().kind(), "bad_request");
    }

    #[test]
    fn query_dimension_mismatch_is_rejected() {
        let idx = index(vec![vec![1.0, 0.0]]);
        let err = search(&idx, &[1.0, 0.0, 0.0], 1).unwrap_err();
        assert_eq!(err.kind(), "retrieval_error");
        assert_eq!(err.stage(), crate::error::Stage::Retrieval);
    }
}
