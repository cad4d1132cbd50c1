use async_trait::async_trait;
use concourse_core::{ConversationState, Intent};
use concourse_engine::TurnHandler;
use concourse_retrieval::{RetrievedDoc, SearchRequest};
use tracing::{debug, warn};

use crate::config::search_config;
use crate::rag::{missing_config_apology, RagContext, EMPTY_QUERY_APOLOGY, SEARCH_FAILED_APOLOGY};

pub const COUNTRY_COLLECTION: &str = "Country";
const COUNTRY_TOP_K: usize = 2;
const PROCEDURE_CANDIDATES: usize = 5;
const PROCEDURE_KEEP: usize = 3;

/// Entry or exit procedures. Arrival questions also pull country entry
/// requirements ahead of the airport procedures.
#[derive(Clone)]
pub struct ProcedurePolicyHandler {
    intent: Intent,
    context: RagContext,
}

impl ProcedurePolicyHandler {
    pub fn arrival(context: RagContext) -> Self {
        Self {
            intent: Intent::ArrivalPolicy,
            context,
        }
    }

    pub fn departure(context: RagContext) -> Self {
        Self {
            intent: Intent::DeparturePolicy,
            context,
        }
    }

    async fn gather(&self, query: &str) -> anyhow::Result<Option<Vec<RetrievedDoc>>> {
        let Some(config) = search_config(self.intent) else {
            return Ok(None);
        };

        let mut docs = Vec::new();
        if self.intent == Intent::ArrivalPolicy {
            let request = SearchRequest::new(query, COUNTRY_COLLECTION, COUNTRY_TOP_K);
            docs.extend(self.context.retriever.search(&request).await?);
        }

        let request = SearchRequest::new(query, config.collection, PROCEDURE_CANDIDATES);
        let candidates = self.context.retriever.search(&request).await?;
        let total = candidates.len();
        let procedures = candidates
            .into_iter()
            .filter(|doc| match config.filter {
                Some((key, value)) => doc.metadata.get(key).map(String::as_str) == Some(value),
                None => true,
            })
            .take(PROCEDURE_KEEP)
            .collect::<Vec<_>>();

        debug!(
            intent = %self.intent,
            countries = docs.len(),
            candidates = total,
            kept = procedures.len(),
            "procedure documents filtered"
        );

        docs.extend(procedures);
        Ok(Some(docs))
    }
}

#[async_trait]
impl TurnHandler for ProcedurePolicyHandler {
    async fn handle(&self, state: &ConversationState) -> String {
        let query = state.effective_query().trim();
        if query.is_empty() {
            return EMPTY_QUERY_APOLOGY.to_string();
        }

        let docs = match self.gather(query).await {
            Ok(Some(docs)) => docs,
            Ok(None) => return missing_config_apology(self.intent),
            Err(error) => {
                warn!(error = %error, intent = %self.intent, "procedure search failed");
                return SEARCH_FAILED_APOLOGY.to_string();
            }
        };

        let Some(config) = search_config(self.intent) else {
            return missing_config_apology(self.intent);
        };
        if docs.is_empty() {
            return config.not_found.to_string();
        }

        self.context
            .answer(self.intent, config.description, query, &docs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use concourse_retrieval::{KnowledgeBase, KnowledgeDoc};

    use super::*;
    use crate::rag::tests::{doc, state};

    fn procedure(id: &str, kind: &str, body: &str) -> KnowledgeDoc {
        let mut doc = doc("AirportProcedure", id, &format!("{kind} 절차 {id}"), body);
        doc.metadata
            .insert("procedure_type".to_string(), kind.to_string());
        doc
    }

    fn context() -> RagContext {
        let docs = vec![
            doc("Country", "us", "미국", "미국 입국 시 ESTA 승인이 필요합니다. 입국 심사에서 여권을 제시합니다."),
            procedure("in1", "입국", "입국 심사 후 수하물을 찾고 세관 신고를 합니다."),
            procedure("in2", "입국", "입국 심사대에서 여권과 입국 신고서를 제출합니다."),
            procedure("out1", "출국", "출국 심사 전에 보안 검색을 받습니다."),
            procedure("out2", "출국", "출국 심사 후 면세 구역으로 이동합니다."),
        ];
        RagContext::new(Arc::new(KnowledgeBase::from_docs(docs, None)), None)
    }

    #[tokio::test]
    async fn departure_keeps_only_exit_procedures() {
        let handler = ProcedurePolicyHandler::departure(context());
        let reply = handler.handle(&state("출국 심사 절차", Vec::new())).await;

        assert!(reply.contains("출국 절차 out1") || reply.contains("출국 절차 out2"));
        assert!(!reply.contains("입국 절차"));
    }

    #[tokio::test]
    async fn arrival_puts_country_requirements_first() {
        let handler = ProcedurePolicyHandler::arrival(context());
        let docs = handler.gather("미국 입국 심사").await.unwrap().unwrap();

        assert_eq!(docs[0].collection, "Country");
        assert!(docs[1..]
            .iter()
            .all(|doc| doc.metadata.get("procedure_type").map(String::as_str) == Some("입국")));
    }

    #[tokio::test]
    async fn nothing_relevant_uses_not_found_message() {
        let handler = ProcedurePolicyHandler::departure(context());
        assert_eq!(
            handler.handle(&state("라운지", Vec::new())).await,
            "죄송합니다. 요청하신 출국 절차 정보를 찾을 수 없습니다."
        );
    }
}
