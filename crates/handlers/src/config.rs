use std::env;
use std::path::PathBuf;
use std::time::Duration;

use concourse_core::Intent;
use concourse_llm::OpenAiConfig;
use concourse_storage::MAX_MESSAGES;

pub const DEFAULT_PARKING_API_URL: &str =
    "http://apis.data.go.kr/B551177/StatusOfParking/getTrackingParking";

/// Collaborator settings read once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub kb_root: PathBuf,
    pub openai: Option<OpenAiConfig>,
    pub service_key: Option<String>,
    pub parking_api_url: String,
    pub http_timeout: Duration,
    pub slot_groups_path: Option<PathBuf>,
    pub intent_dataset: Option<PathBuf>,
    pub history_turns: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kb_root: PathBuf::from("kb"),
            openai: None,
            service_key: None,
            parking_api_url: DEFAULT_PARKING_API_URL.to_string(),
            http_timeout: Duration::from_secs(20),
            slot_groups_path: None,
            intent_dataset: None,
            history_turns: MAX_MESSAGES,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            kb_root: env::var("CONCOURSE_KB_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.kb_root),
            openai: OpenAiConfig::from_env(),
            service_key: non_empty_var("CONCOURSE_SERVICE_KEY"),
            parking_api_url: env::var("CONCOURSE_PARKING_API_URL")
                .unwrap_or(defaults.parking_api_url),
            http_timeout: env::var("CONCOURSE_HTTP_TIMEOUT_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            slot_groups_path: non_empty_var("CONCOURSE_SLOT_GROUPS").map(PathBuf::from),
            intent_dataset: non_empty_var("CONCOURSE_INTENT_DATASET").map(PathBuf::from),
            history_turns: env::var("CONCOURSE_HISTORY_TURNS")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.history_turns),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Where an intent's documents live and how to describe them to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    pub collection: &'static str,
    pub vector_index: &'static str,
    pub description: &'static str,
    pub filter: Option<(&'static str, &'static str)>,
    /// Slot types whose tokens make up the search query.
    pub query_slots: &'static [&'static str],
    pub not_found: &'static str,
}

pub fn search_config(intent: Intent) -> Option<&'static SearchConfig> {
    SEARCH_CONFIGS
        .iter()
        .find(|(candidate, _)| *candidate == intent)
        .map(|(_, config)| config)
}

const SEARCH_CONFIGS: &[(Intent, SearchConfig)] = &[
    (
        Intent::ParkingFeeInfo,
        SearchConfig {
            collection: "parking_fee",
            vector_index: "parking_fee_vector_index",
            description: "주차 요금 및 할인 정책",
            filter: None,
            query_slots: &["fee_topic", "vehicle_type", "parking_area", "time_period"],
            not_found: "죄송합니다. 요청하신 주차 요금 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::ParkingLocationRecommendation,
        SearchConfig {
            collection: "parking_location",
            vector_index: "parking_location_vector_index",
            description: "주차장 위치 및 추천",
            filter: None,
            query_slots: &["parking_lot", "parking_area", "terminal"],
            not_found: "죄송합니다. 요청하신 주차장 위치 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::ParkingWalkTimeInfo,
        SearchConfig {
            collection: "parking_walk_time",
            vector_index: "parking_walk_time_vector_index",
            description: "주차장에서 터미널까지 도보 소요 시간",
            filter: None,
            query_slots: &["parking_lot", "parking_area", "terminal", "location"],
            not_found: "죄송합니다. 해당 주차장 도보 시간 정보를 찾을 수 없습니다. 혹시 이용하시는 항공사나 카운터 번호를 알고 계시면 더 정확한 정보를 찾아드릴 수 있습니다.",
        },
    ),
    (
        Intent::FlightInfo,
        SearchConfig {
            collection: "flight",
            vector_index: "flight_vector_index",
            description: "항공편 운항 정보",
            filter: None,
            query_slots: &[
                "airline_flight",
                "airline_name",
                "destination",
                "gate",
                "flight_status",
            ],
            not_found: "죄송합니다. 요청하신 항공편 정보를 찾을 수 없습니다. 편명을 함께 알려주시면 다시 찾아보겠습니다.",
        },
    ),
    (
        Intent::AirlineInfoQuery,
        SearchConfig {
            collection: "airline",
            vector_index: "airline_vector_index",
            description: "항공사 카운터 및 연락처 정보",
            filter: None,
            query_slots: &["airline_name", "airline_info"],
            not_found: "죄송합니다. 요청하신 항공사 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::BaggageClaimInfo,
        SearchConfig {
            collection: "baggage_claim",
            vector_index: "baggage_claim_vector_index",
            description: "수하물 수취 및 분실·파손 신고",
            filter: None,
            query_slots: &["luggage_term", "baggage_issue"],
            not_found: "죄송합니다. 요청하신 수하물 수취 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::BaggageRuleQuery,
        SearchConfig {
            collection: "baggage_rule",
            vector_index: "baggage_rule_vector_index",
            description: "기내·위탁 수하물 반입 규정",
            filter: None,
            query_slots: &["baggage_type", "rule_type", "item"],
            not_found: "죄송합니다. 요청하신 수하물 규정 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::FacilityGuide,
        SearchConfig {
            collection: "facility",
            vector_index: "facility_vector_index",
            description: "공항 편의시설 위치 및 운영 시간",
            filter: None,
            query_slots: &["facility_name", "location_keyword", "terminal"],
            not_found: "죄송합니다. 요청하신 시설 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::AirportInfo,
        SearchConfig {
            collection: "airport",
            vector_index: "airport_vector_index",
            description: "공항 일반 정보",
            filter: None,
            query_slots: &["airport_name", "airport_code"],
            not_found: "죄송합니다. 요청하신 공항 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::ImmigrationPolicy,
        SearchConfig {
            collection: "immigration",
            vector_index: "immigration_vector_index",
            description: "출입국 심사 및 서류 규정",
            filter: None,
            query_slots: &["organization", "person_type", "document", "rule_type"],
            not_found: "죄송합니다. 요청하신 출입국 규정 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::ArrivalPolicy,
        SearchConfig {
            collection: "AirportProcedure",
            vector_index: "airport_procedure_vector_index",
            description: "입국 절차 및 국가별 입국 요건",
            filter: Some(("procedure_type", "입국")),
            query_slots: &[],
            not_found: "죄송합니다. 요청하신 입국 절차 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::DeparturePolicy,
        SearchConfig {
            collection: "AirportProcedure",
            vector_index: "airport_procedure_vector_index",
            description: "출국 절차",
            filter: Some(("procedure_type", "출국")),
            query_slots: &[],
            not_found: "죄송합니다. 요청하신 출국 절차 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::TransferInfo,
        SearchConfig {
            collection: "transfer",
            vector_index: "transfer_vector_index",
            description: "환승 절차 및 환승 편의 정보",
            filter: None,
            query_slots: &["transfer_topic", "terminal"],
            not_found: "죄송합니다. 요청하신 환승 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::TransferRouteGuide,
        SearchConfig {
            collection: "transfer_route",
            vector_index: "transfer_route_vector_index",
            description: "터미널 간 환승 경로",
            filter: None,
            query_slots: &["transfer_topic", "terminal"],
            not_found: "죄송합니다. 요청하신 환승 경로 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::AirportWeatherCurrent,
        SearchConfig {
            collection: "weather",
            vector_index: "weather_vector_index",
            description: "공항 현재 날씨",
            filter: None,
            query_slots: &["weather_topic", "date", "time_period"],
            not_found: "죄송합니다. 현재 공항 날씨 정보를 찾을 수 없습니다.",
        },
    ),
    (
        Intent::AirportCongestionPrediction,
        SearchConfig {
            collection: "congestion",
            vector_index: "congestion_vector_index",
            description: "출국장·입국장 혼잡도 예측",
            filter: None,
            query_slots: &["congestion_topic", "terminal", "date", "time_period"],
            not_found: "죄송합니다. 요청하신 혼잡도 예측 정보를 찾을 수 없습니다.",
        },
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_backed_intents_have_search_configs() {
        for intent in Intent::ALL {
            let expects_config = !matches!(
                intent,
                Intent::ParkingAvailabilityQuery | Intent::ParkingCongestionPrediction
            );
            assert_eq!(
                search_config(intent).is_some(),
                expects_config,
                "search config for {intent}"
            );
        }
    }

    #[test]
    fn policy_configs_filter_by_procedure_type() {
        assert_eq!(
            search_config(Intent::DeparturePolicy).and_then(|config| config.filter),
            Some(("procedure_type", "출국"))
        );
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.http_timeout, Duration::from_secs(20));
        assert_eq!(config.history_turns, MAX_MESSAGES);
        assert!(config.openai.is_none());
    }
}
