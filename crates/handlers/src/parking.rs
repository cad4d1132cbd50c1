use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use concourse_core::{ConversationState, Intent};
use concourse_engine::TurnHandler;
use concourse_llm::{ChatMessage, ChatModel, ChatRequest};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::search_config;
use crate::rag::{answer_from_queries, missing_config_apology, RagContext, EMPTY_QUERY_APOLOGY};

pub const CONGESTION_COMING_SOON: &str =
    "추후 제공할 기능입니다! 현재는 실시간 주차장 현황에 대해서만 제공하고 있습니다.";
pub const AVAILABILITY_FETCH_FAILED: &str =
    "주차장 이용 가능 여부를 가져오는 중 문제가 발생했습니다. 잠시 후 다시 시도해주세요.";
pub const AVAILABILITY_EMPTY: &str =
    "주차장 현황 정보를 찾을 수 없습니다. 잠시 후 다시 시도해주세요.";
pub const AVAILABILITY_UNCONFIGURED: &str =
    "죄송합니다. 현재 실시간 주차장 현황 서비스를 이용할 수 없습니다.";

fn tokens(state: &ConversationState, kind: &str) -> Vec<String> {
    state
        .slot_tokens(&[kind])
        .into_iter()
        .map(ToString::to_string)
        .collect()
}

/// Several fee topics become one query each, carrying the vehicle and area
/// qualifiers; otherwise all fee-related tokens form a single query.
pub fn fee_queries(state: &ConversationState) -> Vec<String> {
    let fee_topics = tokens(state, "fee_topic");
    let vehicle_types = tokens(state, "vehicle_type");
    let parking_areas = tokens(state, "parking_area");
    let time_periods = tokens(state, "time_period");

    if fee_topics.len() > 1 {
        return fee_topics
            .iter()
            .map(|topic| {
                let mut query = format!("{topic} 주차 요금");
                for qualifier in [&vehicle_types, &parking_areas] {
                    if !qualifier.is_empty() {
                        query.push(' ');
                        query.push_str(&qualifier.join(" "));
                    }
                }
                query
            })
            .collect();
    }

    let keywords = fee_topics
        .into_iter()
        .chain(vehicle_types)
        .chain(parking_areas)
        .chain(time_periods)
        .collect::<Vec<_>>();
    if keywords.is_empty() {
        vec![state.effective_query().to_string()]
    } else {
        vec![keywords.join(" ")]
    }
}

/// Distinct lot, area and terminal tokens, one search each.
pub fn location_queries(state: &ConversationState) -> Vec<String> {
    let mut keywords = Vec::new();
    for token in state.slot_tokens(&["parking_lot", "parking_area", "terminal"]) {
        if !keywords.iter().any(|existing: &String| existing == token) {
            keywords.push(token.to_string());
        }
    }
    if keywords.is_empty() {
        keywords.push(state.effective_query().to_string());
    }
    keywords
}

/// Every lot paired with every destination.
pub fn walk_time_queries(state: &ConversationState) -> Vec<String> {
    let parking_lots = tokens(state, "parking_lot");
    let parking_areas = tokens(state, "parking_area");
    let destinations = state
        .slot_tokens(&["terminal", "location"])
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    if parking_lots.is_empty() && parking_areas.is_empty() && destinations.is_empty() {
        return vec![state.effective_query().to_string()];
    }

    let origins = if parking_lots.is_empty() {
        vec!["주차장".to_string()]
    } else {
        parking_lots
    };
    let destinations = if destinations.is_empty() {
        vec!["터미널".to_string()]
    } else {
        destinations
    };

    let mut queries = Vec::new();
    for origin in &origins {
        for destination in &destinations {
            let query = format!("{origin}에서 {destination}까지 도보 시간");
            if !queries.contains(&query) {
                queries.push(query);
            }
        }
    }
    queries
}

/// Retrieval handler whose search queries come from a parking-specific
/// planner rather than a single slot join.
#[derive(Clone)]
pub struct ParkingSearchHandler {
    intent: Intent,
    context: RagContext,
    plan: fn(&ConversationState) -> Vec<String>,
}

impl ParkingSearchHandler {
    pub fn fee(context: RagContext) -> Self {
        Self {
            intent: Intent::ParkingFeeInfo,
            context,
            plan: fee_queries,
        }
    }

    pub fn location(context: RagContext) -> Self {
        Self {
            intent: Intent::ParkingLocationRecommendation,
            context,
            plan: location_queries,
        }
    }

    pub fn walk_time(context: RagContext) -> Self {
        Self {
            intent: Intent::ParkingWalkTimeInfo,
            context,
            plan: walk_time_queries,
        }
    }
}

#[async_trait]
impl TurnHandler for ParkingSearchHandler {
    async fn handle(&self, state: &ConversationState) -> String {
        let query = state.effective_query().trim();
        if query.is_empty() {
            return EMPTY_QUERY_APOLOGY.to_string();
        }

        let Some(config) = search_config(self.intent) else {
            return missing_config_apology(self.intent);
        };

        let queries = (self.plan)(state);
        answer_from_queries(&self.context, self.intent, config, query, &queries).await
    }
}

#[derive(Debug, Default, Clone)]
pub struct ParkingCongestionHandler;

#[async_trait]
impl TurnHandler for ParkingCongestionHandler {
    async fn handle(&self, _state: &ConversationState) -> String {
        CONGESTION_COMING_SOON.to_string()
    }
}

/// One parking floor/lot as reported by the real-time status API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParkingStatus {
    pub name: String,
    pub capacity: i64,
    pub occupied: i64,
    pub checked_at: String,
}

impl ParkingStatus {
    pub fn available(&self) -> i64 {
        self.capacity.saturating_sub(self.occupied).max(0)
    }

    /// `T1`, `T2`, or `None` when the name carries no terminal prefix.
    pub fn terminal(&self) -> Option<&'static str> {
        let name = self.name.trim_start().to_uppercase();
        if name.starts_with("T1") {
            Some("T1")
        } else if name.starts_with("T2") {
            Some("T2")
        } else {
            None
        }
    }
}

#[async_trait]
pub trait ParkingStatusSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<ParkingStatus>>;
}

/// Client for the public Incheon airport parking status API.
#[derive(Debug, Clone)]
pub struct ParkingApiClient {
    http_client: Client,
    url: String,
    service_key: String,
}

impl ParkingApiClient {
    pub fn new(http_client: Client, url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            http_client,
            url: url.into(),
            service_key: service_key.into(),
        }
    }
}

#[async_trait]
impl ParkingStatusSource for ParkingApiClient {
    async fn fetch(&self) -> Result<Vec<ParkingStatus>> {
        let response = self
            .http_client
            .get(&self.url)
            .query(&[
                ("serviceKey", self.service_key.as_str()),
                ("type", "json"),
                ("numOfRows", "1000"),
                ("pageNo", "1"),
            ])
            .send()
            .await
            .context("parking status request failed")?
            .error_for_status()
            .context("parking status non-success status")?;

        let body: Value = response
            .json()
            .await
            .context("parking status parse failed")?;
        parse_parking_items(&body)
    }
}

/// Accepts `response.body.items` as a list, as `{ "item": [...] }`, or as a
/// single object. Numeric fields may arrive as strings.
pub fn parse_parking_items(body: &Value) -> Result<Vec<ParkingStatus>> {
    let items = body
        .pointer("/response/body/items")
        .context("parking status payload has no items")?;
    let items = items.get("item").unwrap_or(items);

    let list = match items {
        Value::Array(list) => list.clone(),
        Value::Object(_) => vec![items.clone()],
        Value::Null => Vec::new(),
        Value::String(raw) if raw.trim().is_empty() => Vec::new(),
        other => anyhow::bail!("unexpected parking items shape: {other}"),
    };

    list.iter()
        .map(|item| {
            Ok(ParkingStatus {
                name: text_field(item, "floor").context("parking item without floor")?,
                capacity: count_field(item, "parkingarea")?,
                occupied: count_field(item, "parking")?,
                checked_at: text_field(item, "datetm").unwrap_or_default(),
            })
        })
        .collect()
}

fn text_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(value) => Some(value.trim().to_string()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn number_field(item: &Value, key: &str) -> Option<i64> {
    match item.get(key)? {
        Value::Number(value) => value.as_i64(),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}

fn count_field(item: &Value, key: &str) -> Result<i64> {
    let value = number_field(item, key).with_context(|| format!("parking item without {key}"))?;
    anyhow::ensure!(value >= 0, "parking item has negative {key}: {value}");
    Ok(value)
}

/// Terminal-grouped listing; zero availability is shown as full.
pub fn render_availability(statuses: &[ParkingStatus]) -> String {
    let mut groups: BTreeMap<&str, Vec<&ParkingStatus>> = BTreeMap::new();
    for status in statuses {
        let heading = match status.terminal() {
            Some("T1") => "## T1 (제1여객터미널)",
            Some(_) => "## T2 (제2여객터미널)",
            None => "## 기타",
        };
        groups.entry(heading).or_default().push(status);
    }

    let checked_at = statuses
        .iter()
        .map(|status| status.checked_at.as_str())
        .filter(|value| !value.is_empty())
        .max()
        .unwrap_or("알 수 없음");

    let mut lines = vec![format!("확인 시간: {checked_at}")];
    for (heading, statuses) in groups {
        lines.push(String::new());
        lines.push(heading.to_string());
        for status in statuses {
            let available = status.available();
            if available == 0 {
                lines.push(format!("- **{}**: **만차**", status.name));
            } else {
                lines.push(format!("- **{}**: 주차 가능 대수 **{available}**대", status.name));
            }
        }
    }
    lines.join("\n")
}

pub struct ParkingAvailabilityHandler {
    source: Option<Arc<dyn ParkingStatusSource>>,
    chat: Option<Arc<dyn ChatModel>>,
}

impl ParkingAvailabilityHandler {
    pub fn new(
        source: Option<Arc<dyn ParkingStatusSource>>,
        chat: Option<Arc<dyn ChatModel>>,
    ) -> Self {
        Self { source, chat }
    }

    async fn narrate(&self, chat: &dyn ChatModel, query: &str, statuses: &[ParkingStatus]) -> Result<String> {
        let items = statuses
            .iter()
            .map(|status| {
                serde_json::json!({
                    "floor": status.name,
                    "parking": status.available(),
                    "datetm": status.checked_at,
                })
            })
            .collect::<Vec<_>>();
        let items = serde_json::to_string_pretty(&items)?;

        let prompt = format!(
            "당신은 인천국제공항의 정보를 제공하는 친절하고 유용한 챗봇입니다. 사용자 질문에 다음 정보를 바탕으로 답변해주세요.\n\
             사용자 질문: {query}\n\
             검색된 정보: {items}\n\
             T1은 인천국제공항 제1여객터미널, T2는 제2여객터미널입니다. \
             datetm은 주차장 상태를 마지막으로 확인한 시간입니다. 이 시간을 가장 먼저 언급하세요. \
             parking은 주차 가능 대수입니다. parking이 0이면 '만차'라고 표시해주세요.\n\n\
             **답변 형식:**\n\
             1. 먼저 확인 시간을 언급\n\
             2. ## T1 (제1여객터미널) 섹션으로 T1 주차장들을 모두 나열\n\
             3. ## T2 (제2여객터미널) 섹션으로 T2 주차장들을 모두 나열\n\
             4. 각 주차장은 '- **주차장명**: 주차 가능 대수 **N**대 (또는 **만차**)' 형식으로 출력"
        );

        let request = ChatRequest::new(vec![ChatMessage::user(prompt)]);
        chat.complete(&request).await
    }
}

#[async_trait]
impl TurnHandler for ParkingAvailabilityHandler {
    async fn handle(&self, state: &ConversationState) -> String {
        let query = state.effective_query().trim();
        if query.is_empty() {
            return EMPTY_QUERY_APOLOGY.to_string();
        }

        let Some(source) = &self.source else {
            return AVAILABILITY_UNCONFIGURED.to_string();
        };

        let statuses = match source.fetch().await {
            Ok(statuses) => statuses,
            Err(error) => {
                warn!(error = %error, "parking status fetch failed");
                return AVAILABILITY_FETCH_FAILED.to_string();
            }
        };
        if statuses.is_empty() {
            return AVAILABILITY_EMPTY.to_string();
        }
        debug!(lots = statuses.len(), "parking status fetched");

        if let Some(chat) = &self.chat {
            match self.narrate(chat.as_ref(), query, &statuses).await {
                Ok(reply) => return reply.trim().to_string(),
                Err(error) => warn!(error = %error, "parking status narration failed"),
            }
        }
        render_availability(&statuses)
    }
}
