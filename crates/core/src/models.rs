use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Wire name of the sentinel intent that selects the multi-domain aggregator.
pub const COMPLEX_INTENT: &str = "complex_intent";

/// Intent assumed when the classifier produced no ranking at all.
pub const DEFAULT_INTENT: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ParkingFeeInfo,
    ParkingAvailabilityQuery,
    ParkingLocationRecommendation,
    ParkingCongestionPrediction,
    ParkingWalkTimeInfo,
    FlightInfo,
    AirlineInfoQuery,
    BaggageClaimInfo,
    BaggageRuleQuery,
    FacilityGuide,
    AirportInfo,
    ImmigrationPolicy,
    ArrivalPolicy,
    DeparturePolicy,
    TransferInfo,
    TransferRouteGuide,
    AirportWeatherCurrent,
    AirportCongestionPrediction,
}

impl Intent {
    pub const ALL: [Intent; 18] = [
        Intent::ParkingFeeInfo,
        Intent::ParkingAvailabilityQuery,
        Intent::ParkingLocationRecommendation,
        Intent::ParkingCongestionPrediction,
        Intent::ParkingWalkTimeInfo,
        Intent::FlightInfo,
        Intent::AirlineInfoQuery,
        Intent::BaggageClaimInfo,
        Intent::BaggageRuleQuery,
        Intent::FacilityGuide,
        Intent::AirportInfo,
        Intent::ImmigrationPolicy,
        Intent::ArrivalPolicy,
        Intent::DeparturePolicy,
        Intent::TransferInfo,
        Intent::TransferRouteGuide,
        Intent::AirportWeatherCurrent,
        Intent::AirportCongestionPrediction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParkingFeeInfo => "parking_fee_info",
            Self::ParkingAvailabilityQuery => "parking_availability_query",
            Self::ParkingLocationRecommendation => "parking_location_recommendation",
            Self::ParkingCongestionPrediction => "parking_congestion_prediction",
            Self::ParkingWalkTimeInfo => "parking_walk_time_info",
            Self::FlightInfo => "flight_info",
            Self::AirlineInfoQuery => "airline_info_query",
            Self::BaggageClaimInfo => "baggage_claim_info",
            Self::BaggageRuleQuery => "baggage_rule_query",
            Self::FacilityGuide => "facility_guide",
            Self::AirportInfo => "airport_info",
            Self::ImmigrationPolicy => "immigration_policy",
            Self::ArrivalPolicy => "arrival_policy",
            Self::DeparturePolicy => "departure_policy",
            Self::TransferInfo => "transfer_info",
            Self::TransferRouteGuide => "transfer_route_guide",
            Self::AirportWeatherCurrent => "airport_weather_current",
            Self::AirportCongestionPrediction => "airport_congestion_prediction",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_str() == value)
    }

    /// Graph node name of the handler serving this intent.
    pub fn handler_name(self) -> String {
        format!("{}_handler", self.as_str())
    }

    /// Korean section heading used when several domains answer one turn.
    pub fn title(self) -> &'static str {
        match self {
            Self::ParkingFeeInfo => "주차 요금 안내",
            Self::ParkingAvailabilityQuery => "주차 가능 현황",
            Self::ParkingLocationRecommendation => "주차장 위치 추천",
            Self::ParkingCongestionPrediction => "주차장 혼잡도 예측",
            Self::ParkingWalkTimeInfo => "주차장 도보 소요 시간",
            Self::FlightInfo => "항공편 정보",
            Self::AirlineInfoQuery => "항공사 정보",
            Self::BaggageClaimInfo => "수하물 수취 안내",
            Self::BaggageRuleQuery => "수하물 규정",
            Self::FacilityGuide => "공항 시설 안내",
            Self::AirportInfo => "공항 정보",
            Self::ImmigrationPolicy => "출입국 정책",
            Self::ArrivalPolicy => "입국 절차",
            Self::DeparturePolicy => "출국 절차",
            Self::TransferInfo => "환승 정보",
            Self::TransferRouteGuide => "환승 경로 안내",
            Self::AirportWeatherCurrent => "공항 날씨",
            Self::AirportCongestionPrediction => "공항 혼잡도 예측",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intent as carried by the conversation state: a known domain, the complex
/// sentinel, or whatever unrecognized name an upstream component produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IntentLabel {
    Domain(Intent),
    Complex,
    Unrecognized(String),
}

impl IntentLabel {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed == COMPLEX_INTENT {
            return Self::Complex;
        }
        match Intent::parse(trimmed) {
            Some(intent) => Self::Domain(intent),
            None => Self::Unrecognized(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Domain(intent) => intent.as_str(),
            Self::Complex => COMPLEX_INTENT,
            Self::Unrecognized(raw) => raw.as_str(),
        }
    }

    pub fn domain(&self) -> Option<Intent> {
        match self {
            Self::Domain(intent) => Some(*intent),
            _ => None,
        }
    }
}

impl From<Intent> for IntentLabel {
    fn from(value: Intent) -> Self {
        Self::Domain(value)
    }
}

impl From<String> for IntentLabel {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for IntentLabel {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<IntentLabel> for String {
    fn from(value: IntentLabel) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BIO slot tag. Anything that is neither `B-<type>` nor `I-<type>` reads as outside.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SlotTag {
    Begin(String),
    Inside(String),
    Outside,
}

impl SlotTag {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if let Some(kind) = value.strip_prefix("B-").filter(|kind| !kind.is_empty()) {
            Self::Begin(kind.to_string())
        } else if let Some(kind) = value.strip_prefix("I-").filter(|kind| !kind.is_empty()) {
            Self::Inside(kind.to_string())
        } else {
            Self::Outside
        }
    }

    pub fn slot_type(&self) -> Option<&str> {
        match self {
            Self::Begin(kind) | Self::Inside(kind) => Some(kind.as_str()),
            Self::Outside => None,
        }
    }

    pub fn is_begin(&self) -> bool {
        matches!(self, Self::Begin(_))
    }
}

impl From<String> for SlotTag {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<SlotTag> for String {
    fn from(value: SlotTag) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SlotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin(kind) => write!(f, "B-{kind}"),
            Self::Inside(kind) => write!(f, "I-{kind}"),
            Self::Outside => f.write_str("O"),
        }
    }
}

/// One tagged token, serialized as a `[token, tag]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, SlotTag)", into = "(String, SlotTag)")]
pub struct Slot {
    pub token: String,
    pub tag: SlotTag,
}

impl Slot {
    pub fn new(token: impl Into<String>, tag: &str) -> Self {
        Self {
            token: token.into(),
            tag: SlotTag::parse(tag),
        }
    }
}

impl From<(String, SlotTag)> for Slot {
    fn from((token, tag): (String, SlotTag)) -> Self {
        Self { token, tag }
    }
}

impl From<Slot> for (String, SlotTag) {
    fn from(value: Slot) -> Self {
        (value.token, value.tag)
    }
}

/// One entry of the classifier ranking, serialized as `[intent, confidence]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(IntentLabel, f32)", into = "(IntentLabel, f32)")]
pub struct IntentScore {
    pub label: IntentLabel,
    pub confidence: f32,
}

impl IntentScore {
    pub fn new(label: impl Into<IntentLabel>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

impl From<(IntentLabel, f32)> for IntentScore {
    fn from((label, confidence): (IntentLabel, f32)) -> Self {
        Self::new(label, confidence)
    }
}

impl From<IntentScore> for (IntentLabel, f32) {
    fn from(value: IntentScore) -> Self {
        (value.label, value.confidence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Output of the NLU collaborator for one utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Option<IntentLabel>,
    pub top_k_intents_and_probs: Vec<IntentScore>,
    pub slots: Vec<Slot>,
}

impl Classification {
    /// Classification whose intent is the top-ranked entry.
    pub fn ranked(top_k_intents_and_probs: Vec<IntentScore>, slots: Vec<Slot>) -> Self {
        Self {
            intent: top_k_intents_and_probs
                .first()
                .map(|score| score.label.clone()),
            top_k_intents_and_probs,
            slots,
        }
    }
}

/// What the verification node is allowed to change. `intent: None` keeps the
/// classifier's intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub intent: Option<IntentLabel>,
    pub rephrased_query: Option<String>,
}

impl Verification {
    pub fn unchanged() -> Self {
        Self::default()
    }
}

/// The record threaded through one turn. Every update returns a new value;
/// slots, history and ranking are shared slices and never edited in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Arc<[Message]>,
    user_input: String,
    rephrased_query: Option<String>,
    intent: Option<IntentLabel>,
    top_k_intents_and_probs: Arc<[IntentScore]>,
    slots: Arc<[Slot]>,
    response: Option<String>,
}

impl ConversationState {
    pub fn new(user_input: impl Into<String>, messages: impl Into<Arc<[Message]>>) -> Self {
        Self {
            messages: messages.into(),
            user_input: user_input.into(),
            rephrased_query: None,
            intent: None,
            top_k_intents_and_probs: Arc::from(Vec::new()),
            slots: Arc::from(Vec::new()),
            response: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn user_input(&self) -> &str {
        &self.user_input
    }

    pub fn rephrased_query(&self) -> Option<&str> {
        self.rephrased_query.as_deref()
    }

    /// Text every downstream lookup should use: the rephrased query when the
    /// verification stage produced a non-empty one, else the raw input.
    pub fn effective_query(&self) -> &str {
        self.rephrased_query
            .as_deref()
            .filter(|query| !query.trim().is_empty())
            .unwrap_or(&self.user_input)
    }

    pub fn intent(&self) -> Option<&IntentLabel> {
        self.intent.as_ref()
    }

    pub fn top_k_intents_and_probs(&self) -> &[IntentScore] {
        &self.top_k_intents_and_probs
    }

    /// Highest ranked intent, or `("default", 0.0)` for an empty ranking.
    pub fn top_intent(&self) -> (IntentLabel, f32) {
        self.top_k_intents_and_probs
            .first()
            .map(|score| (score.label.clone(), score.confidence))
            .unwrap_or_else(|| (IntentLabel::parse(DEFAULT_INTENT), 0.0))
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Tokens tagged `B-<kind>` or `I-<kind>` for any of `kinds`, in utterance order.
    pub fn slot_tokens(&self, kinds: &[&str]) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|slot| {
                slot.tag
                    .slot_type()
                    .map(|kind| kinds.contains(&kind))
                    .unwrap_or(false)
            })
            .map(|slot| slot.token.as_str())
            .collect()
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn with_classification(self, classification: Classification) -> Self {
        Self {
            intent: classification.intent,
            top_k_intents_and_probs: classification.top_k_intents_and_probs.into(),
            slots: classification.slots.into(),
            ..self
        }
    }

    pub fn with_verification(self, verification: Verification) -> Self {
        let rephrased_query = verification
            .rephrased_query
            .filter(|query| !query.trim().is_empty())
            .or(self.rephrased_query);
        Self {
            intent: verification.intent.or(self.intent),
            rephrased_query,
            ..self
        }
    }

    pub fn with_intent(self, intent: IntentLabel) -> Self {
        Self {
            intent: Some(intent),
            ..self
        }
    }

    pub fn with_response(self, response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_labels_round_trip_wire_names() {
        assert_eq!(
            IntentLabel::parse("parking_fee_info"),
            IntentLabel::Domain(Intent::ParkingFeeInfo)
        );
        assert_eq!(IntentLabel::parse("complex_intent"), IntentLabel::Complex);
        assert_eq!(
            IntentLabel::parse("unknown_xyz"),
            IntentLabel::Unrecognized("unknown_xyz".to_string())
        );
        assert_eq!(Intent::FlightInfo.handler_name(), "flight_info_handler");
    }

    #[test]
    fn slots_serialize_as_pairs() {
        let slot = Slot::new("주차장", "B-parking_lot");
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(json, serde_json::json!(["주차장", "B-parking_lot"]));

        let parsed: Vec<Slot> =
            serde_json::from_str(r#"[["내일","B-date"],["오전","I-date"],["요금","O"]]"#).unwrap();
        assert_eq!(parsed[0].tag, SlotTag::Begin("date".to_string()));
        assert_eq!(parsed[1].tag, SlotTag::Inside("date".to_string()));
        assert_eq!(parsed[2].tag, SlotTag::Outside);
    }

    #[test]
    fn derived_states_share_slots_and_keep_order() {
        let state = ConversationState::new("장기주차장 요금", Vec::new()).with_classification(
            Classification::ranked(
                vec![IntentScore::new(Intent::ParkingFeeInfo, 0.93)],
                vec![
                    Slot::new("장기주차장", "B-parking_lot"),
                    Slot::new("요금", "B-fee_topic"),
                ],
            ),
        );
        let before = state.slots().as_ptr();
        let next = state.clone().with_response("ok");

        assert_eq!(next.slots().as_ptr(), before);
        assert_eq!(next.slots()[0].token, "장기주차장");
        assert_eq!(state.response(), None);
        assert_eq!(next.response(), Some("ok"));
    }

    #[test]
    fn verification_keeps_intent_when_silent_and_prefers_rephrase() {
        let state = ConversationState::new("거기 요금은?", vec![Message::user("a"), Message::assistant("b")])
            .with_classification(Classification::ranked(
                vec![IntentScore::new(Intent::ParkingFeeInfo, 0.4)],
                Vec::new(),
            ));

        let kept = state.clone().with_verification(Verification {
            intent: None,
            rephrased_query: Some("단기주차장 요금".to_string()),
        });
        assert_eq!(kept.intent(), Some(&IntentLabel::Domain(Intent::ParkingFeeInfo)));
        assert_eq!(kept.effective_query(), "단기주차장 요금");

        let blank = state.with_verification(Verification {
            intent: Some(IntentLabel::Complex),
            rephrased_query: Some("  ".to_string()),
        });
        assert_eq!(blank.intent(), Some(&IntentLabel::Complex));
        assert_eq!(blank.effective_query(), "거기 요금은?");
    }

    #[test]
    fn empty_ranking_defaults_to_zero_confidence() {
        let state = ConversationState::new("", Vec::new());
        let (label, confidence) = state.top_intent();
        assert_eq!(label.as_str(), "default");
        assert_eq!(confidence, 0.0);
    }
}
