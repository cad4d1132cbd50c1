mod chunking;
mod tokenize;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use concourse_core::preview;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

pub use chunking::chunk_document;
pub use tokenize::tokenize;

/// Collection used for documents placed directly under the knowledge-base root.
pub const DEFAULT_COLLECTION: &str = "general";

pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &'static str;
    fn embed(&self, text: &str) -> Vec<f32>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDoc {
    pub id: String,
    pub collection: String,
    pub title: String,
    pub source_path: String,
    pub metadata: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub doc_id: String,
    pub collection: String,
    pub title: String,
    pub text: String,
    pub score: f32,
    pub source_path: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub collection: String,
    /// Metadata equality constraints; every pair must match.
    pub filter: BTreeMap<String, String>,
    pub top_k: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, collection: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            collection: collection.into(),
            filter: BTreeMap::new(),
            top_k,
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }
}

/// Document search collaborator. Remote vector stores and the local
/// knowledge base both sit behind this seam.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedDoc>>;
}

#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub collection: String,
    pub title: String,
    pub source_path: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub keywords: HashSet<String>,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalStats {
    pub chunks_loaded: usize,
    pub docs_loaded: usize,
    pub collections: Vec<String>,
    pub vector_enabled: bool,
}

/// In-process hybrid keyword/vector index over `<root>/<collection>/**/*.{md,json}`.
#[derive(Clone)]
pub struct KnowledgeBase {
    docs: Vec<KnowledgeDoc>,
    chunks: Vec<IndexedChunk>,
    embedder: Option<Arc<dyn EmbeddingModel>>,
}

impl KnowledgeBase {
    pub fn from_kb_dir(
        path: impl AsRef<Path>,
        embedder: Option<Arc<dyn EmbeddingModel>>,
    ) -> Result<Self> {
        let docs = if path.as_ref().exists() {
            load_docs(path.as_ref())?
        } else {
            Vec::new()
        };
        Ok(Self::from_docs(docs, embedder))
    }

    pub fn from_docs(docs: Vec<KnowledgeDoc>, embedder: Option<Arc<dyn EmbeddingModel>>) -> Self {
        let mut chunks = Vec::new();

        for doc in &docs {
            let split = chunk_document(&doc.body, 420);
            for (idx, chunk) in split.iter().enumerate() {
                let keywords = tokenize(chunk)
                    .into_iter()
                    .chain(tokenize(&doc.title))
                    .collect::<HashSet<_>>();
                let embedding = embedder.as_ref().map(|model| model.embed(chunk));

                chunks.push(IndexedChunk {
                    chunk_id: format!("{}::{}", doc.id, idx),
                    doc_id: doc.id.clone(),
                    collection: doc.collection.clone(),
                    title: doc.title.clone(),
                    source_path: doc.source_path.clone(),
                    text: chunk.clone(),
                    metadata: doc.metadata.clone(),
                    keywords,
                    embedding,
                });
            }
        }

        Self {
            docs,
            chunks,
            embedder,
        }
    }

    pub fn stats(&self) -> RetrievalStats {
        let mut collections = self
            .docs
            .iter()
            .map(|doc| doc.collection.clone())
            .collect::<Vec<_>>();
        collections.sort();
        collections.dedup();

        RetrievalStats {
            chunks_loaded: self.chunks.len(),
            docs_loaded: self.docs.len(),
            collections,
            vector_enabled: self.embedder.is_some(),
        }
    }

    pub fn search_blocking(&self, request: &SearchRequest) -> Vec<RetrievedDoc> {
        let query_tokens = tokenize(&request.query);
        let query_embedding = self
            .embedder
            .as_ref()
            .map(|model| model.embed(&request.query));

        let mut scored = self
            .chunks
            .iter()
            .filter(|chunk| chunk.collection == request.collection)
            .filter(|chunk| {
                request
                    .filter
                    .iter()
                    .all(|(key, value)| chunk.metadata.get(key) == Some(value))
            })
            .map(|chunk| {
                let keyword_score = keyword_score(&query_tokens, &chunk.keywords);
                let vector_score = match (&query_embedding, &chunk.embedding) {
                    (Some(q), Some(c)) => cosine_similarity(q, c).max(0.0),
                    _ => 0.0,
                };

                let score = if query_embedding.is_some() {
                    (0.65 * keyword_score) + (0.35 * vector_score)
                } else {
                    keyword_score
                };

                (score, chunk)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect::<Vec<_>>();

        scored.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(Ordering::Equal));

        let hits = scored
            .into_iter()
            .take(request.top_k)
            .map(|(score, chunk)| RetrievedDoc {
                doc_id: chunk.doc_id.clone(),
                collection: chunk.collection.clone(),
                title: chunk.title.clone(),
                text: chunk.text.clone(),
                score,
                source_path: chunk.source_path.clone(),
                metadata: chunk.metadata.clone(),
            })
            .collect::<Vec<_>>();

        debug!(
            collection = %request.collection,
            query = %preview(&request.query, 40),
            filter = ?request.filter,
            hits = hits.len(),
            "knowledge base search"
        );
        hits
    }
}

#[async_trait]
impl DocumentRetriever for KnowledgeBase {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedDoc>> {
        Ok(self.search_blocking(request))
    }
}

fn load_docs(root: &Path) -> Result<Vec<KnowledgeDoc>> {
    let heading_regex = Regex::new(r"(?m)^#\s+(.+)$")?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            matches!(
                entry.path().extension().and_then(|ext| ext.to_str()),
                Some("md") | Some("json")
            )
        })
    {
        let path = entry.path();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading knowledge document: {}", path.display()))?;

        let rel_path = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| path.to_string_lossy().to_string());

        let collection = match rel_path.split_once('/') {
            Some((first, _)) => first.to_string(),
            None => DEFAULT_COLLECTION.to_string(),
        };

        let stem_title = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("untitled")
            .replace(['-', '_'], " ");

        let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
        if is_json {
            let value = serde_json::from_str::<serde_json::Value>(&raw)
                .with_context(|| format!("invalid json document: {}", path.display()))?;
            let records = match value {
                serde_json::Value::Array(items) => items,
                other => vec![other],
            };
            for (idx, record) in records.iter().enumerate() {
                let metadata = string_fields(record);
                let title = ["title", "name", "country_name_kor", "procedure_type"]
                    .iter()
                    .find_map(|key| metadata.get(*key).cloned())
                    .unwrap_or_else(|| stem_title.clone());
                docs.push(KnowledgeDoc {
                    id: format!("{}#{}", rel_path.replace('/', "::"), idx),
                    collection: collection.clone(),
                    title,
                    source_path: rel_path.clone(),
                    metadata,
                    body: json_to_search_text(record),
                });
            }
            continue;
        }

        let title = heading_regex
            .captures(&raw)
            .and_then(|captures| {
                captures
                    .get(1)
                    .map(|value| value.as_str().trim().to_string())
            })
            .unwrap_or(stem_title);

        docs.push(KnowledgeDoc {
            id: rel_path.replace('/', "::"),
            collection,
            title,
            source_path: rel_path,
            metadata: BTreeMap::new(),
            body: raw,
        });
    }

    Ok(docs)
}

fn string_fields(value: &serde_json::Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(key, value)| {
                    value
                        .as_str()
                        .map(|text| (key.clone(), text.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn json_to_search_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::Bool(v) => v.to_string(),
        serde_json::Value::Number(v) => v.to_string(),
        serde_json::Value::String(v) => v.clone(),
        serde_json::Value::Array(values) => values
            .iter()
            .map(json_to_search_text)
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, json_to_search_text(v)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Fraction of query tokens found in the chunk. Korean particles glue onto
/// nouns, so a prefix match in either direction counts for most of a hit.
fn keyword_score(query_tokens: &[String], doc_tokens: &HashSet<String>) -> f32 {
    if query_tokens.is_empty() || doc_tokens.is_empty() {
        return 0.0;
    }

    let matched = query_tokens
        .iter()
        .map(|token| {
            if doc_tokens.contains(token) {
                1.0
            } else if doc_tokens
                .iter()
                .any(|doc| doc.starts_with(token.as_str()) || token.starts_with(doc.as_str()))
            {
                0.7
            } else {
                0.0
            }
        })
        .sum::<f32>();

    matched / query_tokens.len() as f32
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
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

    fn doc(collection: &str, title: &str, body: &str, meta: &[(&str, &str)]) -> KnowledgeDoc {
        KnowledgeDoc {
            id: format!("{collection}::{title}"),
            collection: collection.to_string(),
            title: title.to_string(),
            source_path: format!("{collection}/{title}.md"),
            metadata: meta
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
        }
    }

    fn kb() -> KnowledgeBase {
        KnowledgeBase::from_docs(
            vec![
                doc("parking", "단기주차장 요금", "단기주차장 요금은 시간당 2400원입니다.", &[]),
                doc("parking", "장기주차장 요금", "장기주차장 요금은 하루 9000원입니다.", &[]),
                doc("AirportProcedure", "출국 심사", "출국 심사 절차 안내", &[("procedure_type", "출국")]),
                doc("AirportProcedure", "입국 심사", "입국 심사 절차 안내", &[("procedure_type", "입국")]),
            ],
            None,
        )
    }

    #[test]
    fn cosine_sanity() {
        let a = [1.0, 0.0, 1.0];
        let b = [1.0, 0.0, 1.0];
        assert!(cosine_similarity(&a, &b) > 0.99);
    }

    #[test]
    fn search_is_scoped_to_collection() {
        let hits = kb().search_blocking(&SearchRequest::new("장기주차장 요금", "parking", 5));
        assert_eq!(hits[0].title, "장기주차장 요금");
        assert!(hits.iter().all(|hit| hit.collection == "parking"));
    }

    #[test]
    fn particles_still_match_by_prefix() {
        let hits = kb().search_blocking(&SearchRequest::new("단기주차장의 요금이", "parking", 1));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "단기주차장 요금");
    }

    #[tokio::test]
    async fn metadata_filter_excludes_other_procedures() {
        let request = SearchRequest::new("심사 절차", "AirportProcedure", 5)
            .with_filter("procedure_type", "입국");
        let hits = kb().search(&request).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.get("procedure_type").map(String::as_str), Some("입국"));
    }
}
