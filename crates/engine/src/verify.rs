use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use concourse_core::{
    ConversationState, Intent, IntentLabel, Role, Verification, COMPLEX_INTENT,
};
use concourse_llm::{strip_code_fence, ChatMessage, ChatModel, ChatRequest};
use serde::Deserialize;
use tracing::{debug, warn};

/// Prior messages shown to the verifier.
const HISTORY_WINDOW: usize = 6;

/// Second opinion on the classifier. It can replace the intent and supply a
/// standalone rephrasing, nothing else.
#[async_trait]
pub trait IntentVerifier: Send + Sync {
    async fn verify(&self, state: &ConversationState) -> Verification;
}

/// Used when no chat model is configured.
#[derive(Debug, Default, Clone)]
pub struct PassthroughVerifier;

#[async_trait]
impl IntentVerifier for PassthroughVerifier {
    async fn verify(&self, _state: &ConversationState) -> Verification {
        Verification::unchanged()
    }
}

#[derive(Clone)]
pub struct LlmIntentVerifier {
    chat: Arc<dyn ChatModel>,
    supported_intents: Vec<Intent>,
}

impl LlmIntentVerifier {
    pub fn new(chat: Arc<dyn ChatModel>, supported_intents: impl IntoIterator<Item = Intent>) -> Self {
        Self {
            chat,
            supported_intents: supported_intents.into_iter().collect(),
        }
    }

    fn build_request(&self, state: &ConversationState) -> ChatRequest {
        let intent_list = self
            .supported_intents
            .iter()
            .map(|intent| format!("- {} ({})", intent.as_str(), intent.title()))
            .collect::<Vec<_>>()
            .join("\n");

        let system = format!(
            "당신은 공항 챗봇의 의도 검증기입니다. 대화 맥락을 보고 사용자의 마지막 질문 의도를 아래 목록에서 하나 고르세요.\n\
             여러 주제를 동시에 묻는 경우 `{COMPLEX_INTENT}`를 고르세요.\n\
             이전 대화를 참조하는 질문이면 맥락 없이도 이해되는 완전한 문장으로 바꿔 `rephrased_query`에 넣으세요.\n\
             반드시 JSON 한 개만 출력하세요: {{\"intent\": \"...\", \"rephrased_query\": \"...\"}}\n\n\
             의도 목록:\n{intent_list}"
        );

        let mut messages = vec![ChatMessage::system(system)];
        let history = state.messages();
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        for message in &history[start..] {
            messages.push(match message.role {
                Role::User => ChatMessage::user(message.content.clone()),
                Role::Assistant => ChatMessage::assistant(message.content.clone()),
            });
        }

        let (top_intent, confidence) = state.top_intent();
        messages.push(ChatMessage::user(format!(
            "분류기 예측: {} ({confidence:.2})\n질문: {}",
            top_intent,
            state.user_input()
        )));

        ChatRequest::new(messages).temperature(0.0).max_tokens(200)
    }
}

#[async_trait]
impl IntentVerifier for LlmIntentVerifier {
    async fn verify(&self, state: &ConversationState) -> Verification {
        let request = self.build_request(state);
        let raw = match self.chat.complete(&request).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(error = %error, model = self.chat.model_name(), "intent verification call failed");
                return Verification::unchanged();
            }
        };

        match parse_verification(&raw) {
            Ok(verification) => {
                debug!(
                    intent = ?verification.intent,
                    rephrased = verification.rephrased_query.is_some(),
                    "intent verified"
                );
                verification
            }
            Err(error) => {
                warn!(error = %error, "intent verification reply unusable");
                Verification::unchanged()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifierReply {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    rephrased_query: Option<String>,
}

/// Accepts bare JSON, fenced JSON, or JSON embedded in prose. A blank intent
/// keeps the classifier's choice; an unknown one is carried as unrecognized.
pub fn parse_verification(raw: &str) -> Result<Verification> {
    let body = strip_code_fence(raw);
    let body = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    };

    let reply: VerifierReply =
        serde_json::from_str(body).context("verifier reply is not the expected JSON")?;

    Ok(Verification {
        intent: reply
            .intent
            .filter(|intent| !intent.trim().is_empty())
            .map(|intent| IntentLabel::parse(&intent)),
        rephrased_query: reply
            .rephrased_query
            .map(|query| query.trim().to_string())
            .filter(|query| !query.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use concourse_core::{Classification, IntentScore, Message};
    use std::sync::Mutex;

    use super::*;

    struct ScriptedChat {
        reply: Result<String, String>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedChat {
        fn new(reply: Result<&str, &str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string).map_err(str::to_string),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ChatRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone().map_err(anyhow::Error::msg)
        }
    }

    fn state() -> ConversationState {
        ConversationState::new(
            "거기 요금은 얼마야?",
            vec![
                Message::user("장기주차장 어디야?"),
                Message::assistant("제1터미널 장기주차장은 ..."),
            ],
        )
        .with_classification(Classification::ranked(
            vec![IntentScore::new(Intent::ParkingLocationRecommendation, 0.41)],
            Vec::new(),
        ))
    }

    #[test]
    fn parses_fenced_and_embedded_json() {
        let fenced = "```json\n{\"intent\": \"parking_fee_info\", \"rephrased_query\": \"장기주차장 요금\"}\n```";
        let parsed = parse_verification(fenced).unwrap();
        assert_eq!(parsed.intent, Some(Intent::ParkingFeeInfo.into()));
        assert_eq!(parsed.rephrased_query.as_deref(), Some("장기주차장 요금"));

        let prose = "결과: {\"intent\": \"complex_intent\"} 입니다";
        assert_eq!(parse_verification(prose).unwrap().intent, Some(IntentLabel::Complex));
    }

    #[test]
    fn blank_fields_are_dropped_and_unknown_intents_kept_as_unrecognized() {
        let parsed = parse_verification(r#"{"intent": " ", "rephrased_query": ""}"#).unwrap();
        assert_eq!(parsed, Verification::unchanged());

        let unknown = parse_verification(r#"{"intent": "lost_pet"}"#).unwrap();
        assert_eq!(unknown.intent, Some(IntentLabel::Unrecognized("lost_pet".to_string())));
        assert!(parse_verification("no json here").is_err());
    }

    #[tokio::test]
    async fn verifier_prompts_with_history_and_applies_reply() {
        let chat = ScriptedChat::new(Ok(
            r#"{"intent": "parking_fee_info", "rephrased_query": "장기주차장 요금은 얼마야?"}"#,
        ));
        let verifier = LlmIntentVerifier::new(
            chat.clone(),
            [Intent::ParkingFeeInfo, Intent::ParkingLocationRecommendation],
        );

        let verification = verifier.verify(&state()).await;
        assert_eq!(verification.intent, Some(Intent::ParkingFeeInfo.into()));

        let seen = chat.seen.lock().unwrap();
        let request = &seen[0];
        assert!(request.messages[0].content.contains("parking_fee_info"));
        assert_eq!(request.messages.len(), 4);
        assert!(request.messages[3].content.contains("거기 요금은 얼마야?"));
        assert_eq!(request.temperature, 0.0);
    }

    #[tokio::test]
    async fn failures_leave_state_unchanged() {
        let failing = LlmIntentVerifier::new(ScriptedChat::new(Err("timeout")), [Intent::FlightInfo]);
        assert_eq!(failing.verify(&state()).await, Verification::unchanged());

        let garbled = LlmIntentVerifier::new(ScriptedChat::new(Ok("음...")), [Intent::FlightInfo]);
        assert_eq!(garbled.verify(&state()).await, Verification::unchanged());

        assert_eq!(PassthroughVerifier.verify(&state()).await, Verification::unchanged());
    }
}
