use concourse_core::Slot;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::SlotTagger;

static FLIGHT_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{2}\d{2,4}$").expect("valid flight number regex"));

/// Gazetteer tagger: each whitespace token takes the slot type of the longest
/// keyword it contains; runs of the same type continue as `I-` tags.
#[derive(Debug, Default, Clone)]
pub struct KeywordSlotTagger;

impl KeywordSlotTagger {
    fn slot_type(token: &str) -> Option<&'static str> {
        if FLIGHT_NUMBER.is_match(token) {
            return Some("airline_flight");
        }

        let lower = token.to_lowercase();
        GAZETTEER
            .iter()
            .filter(|(keyword, _)| lower.contains(*keyword))
            .max_by_key(|(keyword, _)| keyword.chars().count())
            .map(|(_, kind)| *kind)
    }
}

impl SlotTagger for KeywordSlotTagger {
    fn tag(&self, text: &str) -> Vec<Slot> {
        let mut previous: Option<&'static str> = None;

        text.split_whitespace()
            .map(|token| {
                let kind = Self::slot_type(token);
                let tag = match kind {
                    Some(kind) if previous == Some(kind) => format!("I-{kind}"),
                    Some(kind) => format!("B-{kind}"),
                    None => "O".to_string(),
                };
                previous = kind;
                Slot::new(token, &tag)
            })
            .collect()
    }
}

const GAZETTEER: &[(&str, &str)] = &[
    ("주차장", "parking_lot"),
    ("단기주차장", "parking_lot"),
    ("장기주차장", "parking_lot"),
    ("예약주차장", "parking_lot"),
    ("단기", "parking_type"),
    ("장기", "parking_type"),
    ("발렛", "parking_type"),
    ("요금", "fee_topic"),
    ("주차비", "fee_topic"),
    ("할인", "fee_topic"),
    ("정산", "fee_topic"),
    ("경차", "vehicle_type"),
    ("소형", "vehicle_type"),
    ("대형", "vehicle_type"),
    ("전기차", "vehicle_type"),
    ("카드", "payment_method"),
    ("현금", "payment_method"),
    ("하이패스", "payment_method"),
    ("빈자리", "availability_status"),
    ("만차", "availability_status"),
    ("근처", "location_keyword"),
    ("가까운", "location_keyword"),
    ("혼잡", "congestion_topic"),
    ("붐비", "congestion_topic"),
    ("대한항공", "airline_name"),
    ("아시아나", "airline_name"),
    ("제주항공", "airline_name"),
    ("진에어", "airline_name"),
    ("티웨이", "airline_name"),
    ("항공사", "airline_name"),
    ("인천공항", "airport_name"),
    ("김포공항", "airport_name"),
    ("icn", "airport_code"),
    ("gmp", "airport_code"),
    ("게이트", "gate"),
    ("탑승구", "gate"),
    ("지연", "flight_status"),
    ("결항", "flight_status"),
    ("수하물", "luggage_term"),
    ("캐리어", "luggage_term"),
    ("분실", "baggage_issue"),
    ("파손", "baggage_issue"),
    ("위탁", "baggage_type"),
    ("기내", "baggage_type"),
    ("반입", "rule_type"),
    ("규정", "rule_type"),
    ("보조배터리", "item"),
    ("액체", "item"),
    ("라이터", "item"),
    ("편의점", "facility_name"),
    ("약국", "facility_name"),
    ("식당", "facility_name"),
    ("라운지", "facility_name"),
    ("화장실", "facility_name"),
    ("환전소", "facility_name"),
    ("법무부", "organization"),
    ("세관", "organization"),
    ("외국인", "person_type"),
    ("내국인", "person_type"),
    ("여권", "document"),
    ("비자", "document"),
    ("환승", "transfer_topic"),
    ("날씨", "weather_topic"),
    ("기온", "weather_topic"),
    ("t1", "terminal"),
    ("t2", "terminal"),
    ("터미널", "terminal"),
    ("오늘", "date"),
    ("내일", "date"),
    ("모레", "date"),
    ("오전", "time_period"),
    ("오후", "time_period"),
    ("주말", "time_period"),
    ("정보", "topic"),
    ("안내", "topic"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use concourse_core::SlotTag;

    fn tags(text: &str) -> Vec<String> {
        KeywordSlotTagger
            .tag(text)
            .into_iter()
            .map(|slot| slot.tag.to_string())
            .collect()
    }

    #[test]
    fn longest_keyword_wins() {
        let slots = KeywordSlotTagger.tag("장기주차장 요금");
        assert_eq!(slots[0].tag, SlotTag::Begin("parking_lot".to_string()));
        assert_eq!(slots[1].tag, SlotTag::Begin("fee_topic".to_string()));
    }

    #[test]
    fn consecutive_tokens_of_one_type_continue_the_span() {
        assert_eq!(tags("요금 할인 알려줘"), vec!["B-fee_topic", "I-fee_topic", "O"]);
    }

    #[test]
    fn flight_numbers_and_airlines() {
        assert_eq!(
            tags("KE123 대한항공 게이트"),
            vec!["B-airline_flight", "B-airline_name", "B-gate"]
        );
    }

    #[test]
    fn preserves_token_order() {
        let slots = KeywordSlotTagger.tag("주차장 그리고 항공사");
        let tokens = slots.iter().map(|s| s.token.as_str()).collect::<Vec<_>>();
        assert_eq!(tokens, vec!["주차장", "그리고", "항공사"]);
    }
}
