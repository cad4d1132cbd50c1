use std::sync::Arc;

use async_trait::async_trait;
use concourse_core::{ConversationState, Intent, EXCLUDED_GROUPS};
use tracing::{debug, warn};

use crate::registry::{HandlerRegistry, TurnHandler};

pub const NO_DOMAIN_APOLOGY: &str =
    "죄송합니다. 질문에 포함된 여러 주제를 처리할 수 있는 안내를 찾지 못했습니다. 궁금하신 내용을 하나씩 나누어 질문해 주세요.";

/// Answers a multi-domain turn by asking each domain's handler in turn and
/// joining the replies under per-domain headings.
#[derive(Debug, Clone)]
pub struct ComplexIntentHandler {
    registry: Arc<HandlerRegistry>,
}

impl ComplexIntentHandler {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Registered domains hit by `B-` slots, in order of first mention,
    /// narrowed to those the classifier also ranked when any of them were.
    /// When no slot domain is registered, the registered entries of the
    /// ranking.
    pub fn target_intents(&self, state: &ConversationState) -> Vec<Intent> {
        let mut mentioned = Vec::new();
        for slot in state.slots().iter().filter(|slot| slot.tag.is_begin()) {
            let tag = slot.tag.to_string();
            for (group, tags) in self.registry.slot_groups().groups() {
                if EXCLUDED_GROUPS.contains(&group) || !tags.contains(&tag) {
                    continue;
                }
                if let Some(intent) = Intent::parse(group).filter(|i| self.registry.contains(*i)) {
                    if !mentioned.contains(&intent) {
                        mentioned.push(intent);
                    }
                }
            }
        }

        let mut ranked = Vec::new();
        for score in state.top_k_intents_and_probs() {
            if let Some(intent) = score.label.domain().filter(|i| self.registry.contains(*i)) {
                if !ranked.contains(&intent) {
                    ranked.push(intent);
                }
            }
        }

        if mentioned.is_empty() {
            return ranked;
        }

        let confirmed = mentioned
            .iter()
            .copied()
            .filter(|intent| ranked.contains(intent))
            .collect::<Vec<_>>();
        if confirmed.is_empty() {
            mentioned
        } else {
            confirmed
        }
    }
}

#[async_trait]
impl TurnHandler for ComplexIntentHandler {
    async fn handle(&self, state: &ConversationState) -> String {
        let targets = self.target_intents(state);
        if targets.is_empty() {
            warn!(slots = state.slots().len(), "complex intent without a registered domain");
            return NO_DOMAIN_APOLOGY.to_string();
        }

        debug!(targets = ?targets, "answering complex intent");

        let mut sections = Vec::with_capacity(targets.len());
        for intent in targets {
            let Some(handler) = self.registry.handler(intent) else {
                continue;
            };
            let sub_state = state.clone().with_intent(intent.into());
            let reply = handler.handle(&sub_state).await;
            sections.push(format!("[{}]\n{}", intent.title(), reply.trim()));
        }

        sections.join("\n\n")
    }
}
