use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use concourse_core::{Intent, IntentScore};
use concourse_retrieval::EmbeddingModel;
use serde::Deserialize;

use crate::fallback::normalize;
use crate::IntentRanker;

#[derive(Debug, Deserialize)]
struct LabeledExample {
    text: String,
    intent: String,
}

/// Nearest-centroid ranker trained from `{"text": …, "intent": …}` JSONL lines.
#[derive(Clone)]
pub struct CentroidIntentRanker {
    centroids: Vec<(Intent, Vec<f32>)>,
    embedder: Arc<dyn EmbeddingModel>,
}

impl CentroidIntentRanker {
    pub fn from_jsonl(path: impl AsRef<Path>, embedder: Arc<dyn EmbeddingModel>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "failed reading intent training dataset at {}",
                path.as_ref().display()
            )
        })?;
        Self::from_jsonl_str(&raw, embedder)
    }

    pub fn from_jsonl_str(raw: &str, embedder: Arc<dyn EmbeddingModel>) -> Result<Self> {
        let mut by_intent: HashMap<Intent, Vec<Vec<f32>>> = HashMap::new();

        for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let example: LabeledExample =
                serde_json::from_str(line).context("invalid jsonl training line")?;
            if let Some(intent) = Intent::parse(&example.intent) {
                by_intent
                    .entry(intent)
                    .or_default()
                    .push(embedder.embed(&example.text));
            }
        }

        let mut centroids = by_intent
            .into_iter()
            .filter(|(_, vectors)| !vectors.is_empty())
            .map(|(intent, vectors)| (intent, centroid(&vectors)))
            .collect::<Vec<_>>();
        centroids.sort_by_key(|(intent, _)| *intent);

        if centroids.is_empty() {
            anyhow::bail!("training dataset produced zero intent centroids");
        }

        Ok(Self {
            centroids,
            embedder,
        })
    }
}

impl IntentRanker for CentroidIntentRanker {
    fn model_name(&self) -> &'static str {
        "centroid-intent"
    }

    fn rank(&self, text: &str, top_k: usize) -> Vec<IntentScore> {
        let query = self.embedder.embed(text);

        let mut scored = self
            .centroids
            .iter()
            .map(|(intent, center)| (*intent, cosine_similarity(&query, center).max(0.0)))
            .filter(|(_, score)| *score > 0.0)
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        scored
            .into_iter()
            .take(top_k)
            .map(|(intent, score)| IntentScore::new(intent, score))
            .collect()
    }
}

fn centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    let dims = vectors.first().map(Vec::len).unwrap_or(0);
    let mut acc = vec![0.0_f32; dims];

    for vector in vectors {
        for (idx, value) in vector.iter().enumerate() {
            acc[idx] += value;
        }
    }

    for value in &mut acc {
        *value /= vectors.len() as f32;
    }
    normalize(&mut acc);
    acc
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut a_norm = 0.0;
    let mut b_norm = 0.0;
    for (lhs, rhs) in a.iter().zip(b.iter()) {
        dot += lhs * rhs;
        a_norm += lhs * lhs;
        b_norm += rhs * rhs;
    }

    if a_norm == 0.0 || b_norm == 0.0 {
        0.0
    } else {
        dot / (a_norm.sqrt() * b_norm.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HashEmbeddingModel;

    const DATASET: &str = r#"
{"text": "주차 요금 얼마야", "intent": "parking_fee_info"}
{"text": "장기주차장 하루 요금", "intent": "parking_fee_info"}
{"text": "대한항공 카운터 어디야", "intent": "airline_info_query"}
{"text": "아시아나 항공사 연락처", "intent": "airline_info_query"}
{"text": "unknown label", "intent": "not_an_intent"}
"#;

    #[test]
    fn ranks_closest_centroid_first() {
        let ranker =
            CentroidIntentRanker::from_jsonl_str(DATASET, Arc::new(HashEmbeddingModel::new(256)))
                .unwrap();
        let ranking = ranker.rank("단기주차장 요금", 3);
        assert_eq!(ranking[0].label.domain(), Some(Intent::ParkingFeeInfo));
        assert!(ranking.len() <= 2);
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let result = CentroidIntentRanker::from_jsonl_str("", Arc::new(HashEmbeddingModel::new(64)));
        assert!(result.is_err());
    }
}
