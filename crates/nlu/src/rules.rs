use concourse_core::{Intent, IntentScore};

use crate::IntentRanker;

/// Keyword lexicon ranker. Each matched cue adds its length in characters to
/// the intent's score; scores are then shared out as pseudo-probabilities.
#[derive(Debug, Default, Clone)]
pub struct RuleIntentRanker;

/// Mass reserved for "none of the above" so a single short cue never reaches
/// full confidence.
const UNCERTAINTY_MASS: f32 = 0.5;

impl IntentRanker for RuleIntentRanker {
    fn model_name(&self) -> &'static str {
        "rules"
    }

    fn rank(&self, text: &str, top_k: usize) -> Vec<IntentScore> {
        let lower = text.to_lowercase();

        let mut scored = INTENT_CUES
            .iter()
            .map(|(intent, cues)| {
                let score = cues
                    .iter()
                    .filter(|cue| lower.contains(*cue))
                    .map(|cue| cue.chars().filter(|ch| !ch.is_whitespace()).count() as f32)
                    .sum::<f32>();
                (*intent, score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect::<Vec<_>>();

        let total = scored.iter().map(|(_, score)| score).sum::<f32>() + UNCERTAINTY_MASS;
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        scored
            .into_iter()
            .take(top_k)
            .map(|(intent, score)| IntentScore::new(intent, score / total))
            .collect()
    }
}

const INTENT_CUES: &[(Intent, &[&str])] = &[
    (
        Intent::ParkingFeeInfo,
        &["주차 요금", "주차요금", "주차비", "요금 할인", "할인", "정산", "parking fee"],
    ),
    (
        Intent::ParkingAvailabilityQuery,
        &["주차 가능", "빈자리", "빈 자리", "만차", "잔여", "주차 현황", "주차장 현황"],
    ),
    (
        Intent::ParkingLocationRecommendation,
        &["주차장 추천", "주차장 위치", "어디에 주차", "가까운 주차장"],
    ),
    (
        Intent::ParkingCongestionPrediction,
        &["주차장 혼잡", "주차 혼잡"],
    ),
    (
        Intent::ParkingWalkTimeInfo,
        &["걸어서", "도보", "걸리는 시간", "걷는"],
    ),
    (
        Intent::FlightInfo,
        &["항공편", "편명", "비행기 시간", "출발 시간", "도착 시간", "게이트", "탑승구", "지연", "결항", "flight"],
    ),
    (
        Intent::AirlineInfoQuery,
        &["항공사", "카운터", "고객센터", "airline"],
    ),
    (
        Intent::BaggageClaimInfo,
        &["수하물 찾", "짐 찾", "수취", "분실", "파손", "baggage claim"],
    ),
    (
        Intent::BaggageRuleQuery,
        &["반입", "액체", "보조배터리", "위탁 수하물", "기내 수하물", "무게 제한"],
    ),
    (
        Intent::FacilityGuide,
        &["편의점", "약국", "식당", "라운지", "화장실", "환전", "은행", "수유실"],
    ),
    (
        Intent::AirportInfo,
        &["공항 정보", "공항 코드", "인천공항", "공항 운영"],
    ),
    (
        Intent::ImmigrationPolicy,
        &["출입국", "비자", "여권", "자동출입국", "심사"],
    ),
    (Intent::ArrivalPolicy, &["입국 절차", "입국하", "입국 심사", "도착하면"]),
    (Intent::DeparturePolicy, &["출국 절차", "출국하", "출국 심사", "세관 신고"]),
    (Intent::TransferInfo, &["환승"]),
    (
        Intent::TransferRouteGuide,
        &["환승 경로", "환승 방법", "갈아타", "환승 동선"],
    ),
    (
        Intent::AirportWeatherCurrent,
        &["날씨", "기온", "weather"],
    ),
    (
        Intent::AirportCongestionPrediction,
        &["혼잡", "붐비", "대기 시간", "사람 많"],
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_single_cue_ranks_first() {
        let ranking = RuleIntentRanker.rank("장기 주차 요금 얼마야", 3);
        assert_eq!(ranking[0].label.domain(), Some(Intent::ParkingFeeInfo));
        assert!(ranking[0].confidence > 0.8);
    }

    #[test]
    fn confidences_are_ordered_and_bounded() {
        let ranking = RuleIntentRanker.rank("출국장 혼잡 상황이랑 환승 방법 알려줘", 3);
        assert!(ranking.len() >= 2);
        assert!(ranking
            .windows(2)
            .all(|pair| pair[0].confidence >= pair[1].confidence));
        let total = ranking.iter().map(|score| score.confidence).sum::<f32>();
        assert!(total < 1.0);
    }

    #[test]
    fn no_cue_means_empty_ranking() {
        assert!(RuleIntentRanker.rank("안녕하세요", 3).is_empty());
    }
}
