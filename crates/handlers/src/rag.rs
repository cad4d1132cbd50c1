use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use concourse_core::{preview, ConversationState, Intent};
use concourse_engine::TurnHandler;
use concourse_llm::{ChatMessage, ChatModel, ChatRequest};
use concourse_retrieval::{DocumentRetriever, RetrievedDoc, SearchRequest};
use tracing::{debug, warn};

use crate::config::{search_config, SearchConfig};

pub const EMPTY_QUERY_APOLOGY: &str = "죄송합니다. 질문 내용을 파악할 수 없습니다. 다시 질문해주세요.";
pub const SEARCH_FAILED_APOLOGY: &str =
    "죄송합니다. 정보를 검색하는 중 오류가 발생했습니다. 잠시 후 다시 시도해주세요.";

/// Documents fetched per search query.
pub const SEARCH_TOP_K: usize = 5;

/// Collaborators shared by every retrieval-backed handler.
#[derive(Clone)]
pub struct RagContext {
    pub retriever: Arc<dyn DocumentRetriever>,
    pub chat: Option<Arc<dyn ChatModel>>,
}

impl RagContext {
    pub fn new(retriever: Arc<dyn DocumentRetriever>, chat: Option<Arc<dyn ChatModel>>) -> Self {
        Self { retriever, chat }
    }

    /// Runs every query against the configured collection and concatenates
    /// the hits in query order.
    pub async fn retrieve(
        &self,
        config: &SearchConfig,
        queries: &[String],
        top_k: usize,
    ) -> Result<Vec<RetrievedDoc>> {
        let mut docs = Vec::new();
        for query in queries {
            let mut request = SearchRequest::new(query.as_str(), config.collection, top_k);
            if let Some((key, value)) = config.filter {
                request = request.with_filter(key, value);
            }
            docs.extend(self.retriever.search(&request).await?);
        }
        debug!(
            collection = config.collection,
            index = config.vector_index,
            queries = queries.len(),
            hits = docs.len(),
            "documents retrieved"
        );
        Ok(docs)
    }

    /// Final answer for `query` from `docs`. Uses the chat model when one is
    /// configured and answers extractively otherwise or when the call fails.
    pub async fn answer(
        &self,
        intent: Intent,
        description: &str,
        query: &str,
        docs: &[RetrievedDoc],
    ) -> String {
        if let Some(chat) = &self.chat {
            let request = answer_request(description, query, docs);
            match chat.complete(&request).await {
                Ok(reply) => return reply.trim().to_string(),
                Err(error) => {
                    warn!(error = %error, intent = %intent, "answer generation failed, answering extractively");
                }
            }
        }
        extractive_answer(description, docs)
    }
}

fn answer_request(description: &str, query: &str, docs: &[RetrievedDoc]) -> ChatRequest {
    let context = docs
        .iter()
        .map(|doc| format!("[{}]\n{}", doc.title, doc.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "당신은 인천국제공항의 정보를 제공하는 친절하고 유용한 챗봇입니다.\n\
         다음은 '{description}'에 관한 검색된 정보입니다. 이 정보만을 근거로 사용자 질문에 답변하세요.\n\
         정보에 없는 내용은 추측하지 말고 확인할 수 없다고 안내하세요.\n\n\
         검색된 정보:\n{context}\n\n\
         사용자 질문: {query}"
    );

    ChatRequest::new(vec![ChatMessage::user(prompt)])
}

/// Up to three distinct documents, each trimmed to a short excerpt.
pub fn extractive_answer(description: &str, docs: &[RetrievedDoc]) -> String {
    let mut seen = Vec::new();
    let mut lines = vec![format!("{description} 관련 안내입니다.")];

    for doc in docs {
        if seen.contains(&doc.doc_id) {
            continue;
        }
        seen.push(doc.doc_id.clone());
        lines.push(format!("- **{}**: {}", doc.title, preview(doc.text.trim(), 200)));
        if seen.len() == 3 {
            break;
        }
    }

    lines.join("\n")
}

/// Tokens of `kinds` joined into one query, or the whole question.
pub fn slot_query(state: &ConversationState, kinds: &[&str]) -> String {
    let tokens = state.slot_tokens(kinds);
    if tokens.is_empty() {
        state.effective_query().to_string()
    } else {
        tokens.join(" ")
    }
}

/// Retrieval-augmented answer for a single intent, driven by its search config.
#[derive(Clone)]
pub struct RagHandler {
    intent: Intent,
    context: RagContext,
}

impl RagHandler {
    pub fn new(intent: Intent, context: RagContext) -> Self {
        Self { intent, context }
    }
}

#[async_trait]
impl TurnHandler for RagHandler {
    async fn handle(&self, state: &ConversationState) -> String {
        let query = state.effective_query().trim();
        if query.is_empty() {
            return EMPTY_QUERY_APOLOGY.to_string();
        }

        let Some(config) = search_config(self.intent) else {
            warn!(intent = %self.intent, "no search config");
            return missing_config_apology(self.intent);
        };

        let queries = vec![slot_query(state, config.query_slots)];
        answer_from_queries(&self.context, self.intent, config, query, &queries).await
    }
}

pub fn missing_config_apology(intent: Intent) -> String {
    format!("죄송합니다. '{intent}' 의도에 대한 정보 검색 설정을 찾을 수 없습니다.")
}

/// Shared tail of every retrieval handler: search, apologise on failure or
/// absence, otherwise answer.
pub(crate) async fn answer_from_queries(
    context: &RagContext,
    intent: Intent,
    config: &SearchConfig,
    query: &str,
    queries: &[String],
) -> String {
    debug!(intent = %intent, queries = ?queries, "searching");

    let docs = match context.retrieve(config, queries, SEARCH_TOP_K).await {
        Ok(docs) => docs,
        Err(error) => {
            warn!(error = %error, intent = %intent, "document search failed");
            return SEARCH_FAILED_APOLOGY.to_string();
        }
    };

    if docs.is_empty() {
        return config.not_found.to_string();
    }

    context.answer(intent, config.description, query, &docs).await
}
