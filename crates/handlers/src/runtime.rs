use std::sync::Arc;

use anyhow::{Context, Result};
use concourse_core::SlotGroupTable;
use concourse_engine::{IntentVerifier, LlmIntentVerifier, PassthroughVerifier, TurnGraph};
use concourse_llm::{build_http_client, ChatModel, OpenAiChatModel};
use concourse_nlu::NluStack;
use concourse_observability::AppMetrics;
use concourse_retrieval::{KnowledgeBase, RetrievalStats};
use tracing::{info, warn};

use crate::catalog::build_registry;
use crate::config::RuntimeConfig;
use crate::parking::{ParkingApiClient, ParkingStatusSource};
use crate::rag::RagContext;

/// Everything a front end needs to answer turns.
#[derive(Clone)]
pub struct Runtime {
    pub graph: TurnGraph,
    pub config: RuntimeConfig,
    pub classifier_model: &'static str,
    pub chat_model: Option<String>,
    pub retrieval: RetrievalStats,
}

pub fn build_runtime(config: RuntimeConfig, metrics: Arc<AppMetrics>) -> Result<Runtime> {
    let nlu = NluStack::load_default(config.intent_dataset.as_deref());

    let knowledge = KnowledgeBase::from_kb_dir(&config.kb_root, Some(nlu.embedder.clone()))
        .context("failed to initialize knowledge base")?;
    let retrieval = knowledge.stats();

    let http_client = build_http_client(config.http_timeout)?;
    let chat: Option<Arc<dyn ChatModel>> = config.openai.clone().map(|openai| {
        Arc::new(OpenAiChatModel::new(openai, http_client.clone())) as Arc<dyn ChatModel>
    });

    let parking: Option<Arc<dyn ParkingStatusSource>> = match &config.service_key {
        Some(service_key) => Some(Arc::new(ParkingApiClient::new(
            http_client.clone(),
            config.parking_api_url.clone(),
            service_key.clone(),
        ))),
        None => {
            warn!("CONCOURSE_SERVICE_KEY not set, real-time parking status disabled");
            None
        }
    };

    let slot_groups = match &config.slot_groups_path {
        Some(path) => SlotGroupTable::from_path(path)?,
        None => SlotGroupTable::default(),
    };

    let context = RagContext::new(Arc::new(knowledge), chat.clone());
    let registry = Arc::new(
        build_registry(&context, parking, slot_groups).context("invalid handler registry")?,
    );

    let verifier: Arc<dyn IntentVerifier> = match &chat {
        Some(chat) => Arc::new(LlmIntentVerifier::new(
            chat.clone(),
            registry.supported_intents(),
        )),
        None => Arc::new(PassthroughVerifier),
    };

    let classifier_model = nlu.pipeline.model_name();
    let chat_model = chat.as_ref().map(|chat| chat.model_name().to_string());
    let graph = TurnGraph::new(nlu.pipeline, verifier, registry, metrics);

    info!(
        kb_root = %config.kb_root.display(),
        docs = retrieval.docs_loaded,
        classifier = classifier_model,
        chat_model = chat_model.as_deref().unwrap_or("none"),
        handlers = graph.registry().len(),
        "runtime ready"
    );

    Ok(Runtime {
        graph,
        config,
        classifier_model,
        chat_model,
        retrieval,
    })
}
