mod centroid;
mod fallback;
mod rules;
mod tagger;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use concourse_core::{normalize_text, Classification, IntentScore, Message, Slot};
use concourse_retrieval::EmbeddingModel;
use tracing::{debug, warn};

pub use centroid::CentroidIntentRanker;
pub use fallback::HashEmbeddingModel;
pub use rules::RuleIntentRanker;
pub use tagger::KeywordSlotTagger;

/// Number of ranked intents handed to the router.
pub const DEFAULT_TOP_K: usize = 3;

/// Entry node of a turn: turns raw text (plus history) into intent ranking and slots.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, user_input: &str, messages: &[Message]) -> Result<Classification>;
}

pub trait IntentRanker: Send + Sync {
    fn model_name(&self) -> &'static str;
    fn rank(&self, text: &str, top_k: usize) -> Vec<IntentScore>;
}

pub trait SlotTagger: Send + Sync {
    fn tag(&self, text: &str) -> Vec<Slot>;
}

#[derive(Clone)]
pub struct NluPipeline {
    ranker: Arc<dyn IntentRanker>,
    tagger: Arc<dyn SlotTagger>,
    top_k: usize,
}

impl NluPipeline {
    pub fn new(ranker: Arc<dyn IntentRanker>, tagger: Arc<dyn SlotTagger>) -> Self {
        Self {
            ranker,
            tagger,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn model_name(&self) -> &'static str {
        self.ranker.model_name()
    }
}

#[async_trait]
impl IntentClassifier for NluPipeline {
    async fn classify(&self, user_input: &str, _messages: &[Message]) -> Result<Classification> {
        let text = normalize_text(user_input);
        let ranking = self.ranker.rank(&text, self.top_k);
        let slots = self.tagger.tag(&text);

        debug!(
            model = self.ranker.model_name(),
            ranking = ?ranking,
            slots = slots.len(),
            "utterance classified"
        );

        Ok(Classification::ranked(ranking, slots))
    }
}

#[derive(Clone)]
pub struct NluStack {
    pub embedder: Arc<dyn EmbeddingModel>,
    pub pipeline: Arc<NluPipeline>,
}

impl NluStack {
    /// Centroid ranker when a training dataset is available, keyword rules otherwise.
    pub fn load_default(dataset_path: Option<&Path>) -> Self {
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(HashEmbeddingModel::new(192));
        let tagger = Arc::new(KeywordSlotTagger);

        let ranker: Arc<dyn IntentRanker> = match dataset_path.filter(|path| path.exists()) {
            Some(path) => match CentroidIntentRanker::from_jsonl(path, embedder.clone()) {
                Ok(ranker) => Arc::new(ranker),
                Err(error) => {
                    warn!(error = %error, "centroid ranker unavailable, using keyword rules");
                    Arc::new(RuleIntentRanker)
                }
            },
            None => Arc::new(RuleIntentRanker),
        };

        Self {
            embedder,
            pipeline: Arc::new(NluPipeline::new(ranker, tagger)),
        }
    }
}
