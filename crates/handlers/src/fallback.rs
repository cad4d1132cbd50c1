use async_trait::async_trait;
use concourse_core::ConversationState;
use concourse_engine::TurnHandler;

pub const FALLBACK_REPLY: &str = "죄송합니다. 질문을 정확히 이해하지 못했습니다.\n\
     주차 요금·주차 가능 현황, 항공편 정보, 수하물 규정, 공항 시설, 출입국 절차, 환승 안내 등에 대해 질문해 주시면 도와드리겠습니다.";

#[derive(Debug, Default, Clone)]
pub struct FallbackHandler;

#[async_trait]
impl TurnHandler for FallbackHandler {
    async fn handle(&self, _state: &ConversationState) -> String {
        FALLBACK_REPLY.to_string()
    }
}
