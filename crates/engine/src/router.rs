use std::fmt;

use concourse_core::{ConversationState, Intent, IntentLabel};
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::registry::HandlerRegistry;

/// Top-intent confidence at or above which classification is trusted without
/// a verification pass.
pub const CONFIDENCE_THRESHOLD: f32 = 0.9;

/// Graph node names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    ClassifyIntent,
    VerifyIntent,
    ComplexIntent,
    Handler(Intent),
    Fallback,
    End,
}

impl Node {
    pub fn is_terminal_handler(self) -> bool {
        matches!(self, Self::ComplexIntent | Self::Handler(_) | Self::Fallback)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClassifyIntent => f.write_str("classify_intent"),
            Self::VerifyIntent => f.write_str("llm_verify_intent"),
            Self::ComplexIntent => f.write_str("handle_complex_intent"),
            Self::Handler(intent) => f.write_str(&intent.handler_name()),
            Self::Fallback => f.write_str("fallback_handler"),
            Self::End => f.write_str("END"),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Decision made right after classification. History presence wins over
/// everything, then multi-domain slots, then the confidence threshold.
pub fn route_after_classification(state: &ConversationState, registry: &HandlerRegistry) -> Node {
    if state.messages().len() > 1 {
        debug!(
            history = state.messages().len(),
            "prior conversation detected, verifying intent"
        );
        return Node::VerifyIntent;
    }

    if registry.slot_groups().is_complex_intent(state.slots()) {
        debug!(
            domains = ?registry.slot_groups().specific_domains(state.slots()),
            "multiple slot domains detected"
        );
        return Node::ComplexIntent;
    }

    let (top_intent, confidence) = state.top_intent();
    if confidence >= CONFIDENCE_THRESHOLD {
        if let Some((intent, _)) = registry.handler_for(&top_intent) {
            debug!(intent = %intent, confidence, "confident single intent");
            return Node::Handler(intent);
        }
        debug!(
            intent = %top_intent,
            confidence,
            "confident intent has no handler, verifying"
        );
        return Node::VerifyIntent;
    }

    debug!(intent = %top_intent, confidence, "low confidence, verifying intent");
    Node::VerifyIntent
}

/// Decision made after verification. Always lands on a terminal handler.
pub fn route_after_verification(state: &ConversationState, registry: &HandlerRegistry) -> Node {
    let node = match state.intent() {
        Some(IntentLabel::Complex) => Node::ComplexIntent,
        Some(label) => registry
            .handler_for(label)
            .map(|(intent, _)| Node::Handler(intent))
            .unwrap_or(Node::Fallback),
        None => Node::Fallback,
    };

    debug!(
        intent = state.intent().map(IntentLabel::as_str).unwrap_or("none"),
        node = %node,
        "final routing"
    );
    node
}
