use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Slot;

/// Slot group that co-occurs with every domain and never counts toward a
/// complex intent.
pub const GENERAL_TOPIC: &str = "general_topic";
pub const TIME_GENERAL: &str = "time_general";
pub const EXCLUDED_GROUPS: [&str; 2] = [GENERAL_TOPIC, TIME_GENERAL];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotTableError {
    #[error("slot group `{group}` lists `{tag}`, only B- tags are diagnostic")]
    NonBeginTag { group: String, tag: String },
    #[error("slot group table is empty")]
    Empty,
}

/// Domain label -> set of `B-` tags that are diagnostic of that domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotGroupTable {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl Default for SlotGroupTable {
    fn default() -> Self {
        let groups = DEFAULT_SLOT_GROUPS
            .iter()
            .map(|(group, tags)| {
                (
                    group.to_string(),
                    tags.iter().map(|tag| tag.to_string()).collect(),
                )
            })
            .collect();
        Self { groups }
    }
}

impl SlotGroupTable {
    pub fn new(groups: BTreeMap<String, BTreeSet<String>>) -> Result<Self, SlotTableError> {
        if groups.is_empty() {
            return Err(SlotTableError::Empty);
        }
        for (group, tags) in &groups {
            if let Some(tag) = tags.iter().find(|tag| !tag.starts_with("B-")) {
                return Err(SlotTableError::NonBeginTag {
                    group: group.clone(),
                    tag: tag.clone(),
                });
            }
        }
        Ok(Self { groups })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let groups: BTreeMap<String, BTreeSet<String>> =
            serde_json::from_str(raw).context("invalid slot group json")?;
        Ok(Self::new(groups)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "failed reading slot group table at {}",
                path.as_ref().display()
            )
        })?;
        Self::from_json_str(&raw)
    }

    pub fn contains_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.groups
            .iter()
            .map(|(group, tags)| (group.as_str(), tags))
    }

    /// Every group (excluded ones included) hit by a `B-` tag in `slots`.
    pub fn found_groups(&self, slots: &[Slot]) -> BTreeSet<&str> {
        let mut found = BTreeSet::new();
        for slot in slots.iter().filter(|slot| slot.tag.is_begin()) {
            let tag = slot.tag.to_string();
            for (group, tags) in &self.groups {
                if tags.contains(&tag) {
                    found.insert(group.as_str());
                }
            }
        }
        found
    }

    /// Found groups minus `general_topic` and `time_general`.
    pub fn specific_domains(&self, slots: &[Slot]) -> BTreeSet<&str> {
        let mut found = self.found_groups(slots);
        found.retain(|group| !EXCLUDED_GROUPS.contains(group));
        found
    }

    /// More than one specific domain means the turn needs the aggregator.
    pub fn is_complex_intent(&self, slots: &[Slot]) -> bool {
        self.specific_domains(slots).len() > 1
    }
}

const DEFAULT_SLOT_GROUPS: &[(&str, &[&str])] = &[
    (
        "parking_fee_info",
        &[
            "B-parking_type",
            "B-parking_lot",
            "B-fee_topic",
            "B-vehicle_type",
            "B-payment_method",
        ],
    ),
    (
        "parking_availability_query",
        &["B-parking_type", "B-parking_lot", "B-availability_status"],
    ),
    (
        "parking_location_recommendation",
        &["B-parking_lot", "B-location_keyword"],
    ),
    ("parking_congestion_prediction", &["B-congestion_topic"]),
    ("parking_walk_time_info", &[]),
    (
        "flight_info",
        &[
            "B-airline_flight",
            "B-airline_name",
            "B-airport_name",
            "B-airport_code",
            "B-destination",
            "B-departure_airport",
            "B-arrival_airport",
            "B-gate",
            "B-flight_status",
        ],
    ),
    ("airline_info_query", &["B-airline_name", "B-airline_info"]),
    ("baggage_claim_info", &["B-luggage_term", "B-baggage_issue"]),
    (
        "baggage_rule_query",
        &["B-baggage_type", "B-rule_type", "B-item"],
    ),
    ("facility_guide", &["B-facility_name", "B-location_keyword"]),
    ("airport_info", &["B-airport_name", "B-airport_code"]),
    (
        "immigration_policy",
        &[
            "B-organization",
            "B-person_type",
            "B-rule_type",
            "B-document",
        ],
    ),
    ("arrival_policy", &[]),
    ("departure_policy", &[]),
    ("transfer_info", &["B-transfer_topic"]),
    ("transfer_route_guide", &["B-transfer_topic"]),
    ("airport_weather_current", &["B-weather_topic"]),
    ("airport_congestion_prediction", &["B-congestion_topic"]),
    (
        TIME_GENERAL,
        &[
            "B-date",
            "B-time",
            "B-vague_time",
            "B-season",
            "B-day_of_week",
            "B-relative_time",
            "B-minute",
            "B-hour",
            "B-time_period",
        ],
    ),
    (GENERAL_TOPIC, &["B-topic"]),
];
