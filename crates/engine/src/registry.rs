use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use concourse_core::{ConversationState, Intent, IntentLabel, SlotGroupTable};
use thiserror::Error;

/// A terminal node. Handlers never fail outward: lookup or remote errors are
/// turned into an apology for the user.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn handle(&self, state: &ConversationState) -> String;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("intent `{0}` is registered twice")]
    DuplicateHandler(Intent),
    #[error("intent `{0}` has no entry in the slot group table")]
    MissingRoutingEntry(Intent),
    #[error("no fallback handler registered")]
    MissingFallback,
}

/// Startup table of intent handlers plus the fallback. Read-only once built.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<Intent, Arc<dyn TurnHandler>>,
    fallback: Arc<dyn TurnHandler>,
    slot_groups: Arc<SlotGroupTable>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn handler(&self, intent: Intent) -> Option<&Arc<dyn TurnHandler>> {
        self.handlers.get(&intent)
    }

    /// Handler for a state label; only registered domain intents resolve.
    pub fn handler_for(&self, label: &IntentLabel) -> Option<(Intent, &Arc<dyn TurnHandler>)> {
        let intent = label.domain()?;
        self.handler(intent).map(|handler| (intent, handler))
    }

    pub fn contains(&self, intent: Intent) -> bool {
        self.handlers.contains_key(&intent)
    }

    pub fn supported_intents(&self) -> impl Iterator<Item = Intent> + '_ {
        self.handlers.keys().copied()
    }

    pub fn fallback(&self) -> &Arc<dyn TurnHandler> {
        &self.fallback
    }

    pub fn slot_groups(&self) -> &SlotGroupTable {
        &self.slot_groups
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("intents", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    entries: Vec<(Intent, Arc<dyn TurnHandler>)>,
    fallback: Option<Arc<dyn TurnHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn register(mut self, intent: Intent, handler: Arc<dyn TurnHandler>) -> Self {
        self.entries.push((intent, handler));
        self
    }

    pub fn fallback(mut self, handler: Arc<dyn TurnHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Every registered intent must be known to `slot_groups`, so complex
    /// detection can always fan out to it.
    pub fn build(self, slot_groups: SlotGroupTable) -> Result<HandlerRegistry, RegistryError> {
        let fallback = self.fallback.ok_or(RegistryError::MissingFallback)?;

        let mut handlers = BTreeMap::new();
        for (intent, handler) in self.entries {
            if !slot_groups.contains_group(intent.as_str()) {
                return Err(RegistryError::MissingRoutingEntry(intent));
            }
            if handlers.insert(intent, handler).is_some() {
                return Err(RegistryError::DuplicateHandler(intent));
            }
        }

        Ok(HandlerRegistry {
            handlers,
            fallback,
            slot_groups: Arc::new(slot_groups),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;

    /// Replies with a fixed label so tests can see which node answered.
    pub(crate) struct Echo(pub &'static str);

    #[async_trait]
    impl TurnHandler for Echo {
        async fn handle(&self, state: &ConversationState) -> String {
            format!("{}:{}", self.0, state.effective_query())
        }
    }

    pub(crate) fn echo(label: &'static str) -> Arc<dyn TurnHandler> {
        Arc::new(Echo(label))
    }

    #[test]
    fn duplicate_registration_is_fatal() {
        let error = HandlerRegistry::builder()
            .register(Intent::FlightInfo, echo("a"))
            .register(Intent::FlightInfo, echo("b"))
            .fallback(echo("fallback"))
            .build(SlotGroupTable::default())
            .unwrap_err();
        assert_eq!(error, RegistryError::DuplicateHandler(Intent::FlightInfo));
    }

    #[test]
    fn missing_fallback_is_fatal() {
        let error = HandlerRegistry::builder()
            .register(Intent::FlightInfo, echo("a"))
            .build(SlotGroupTable::default())
            .unwrap_err();
        assert_eq!(error, RegistryError::MissingFallback);
    }

    #[test]
    fn intent_outside_routing_table_is_fatal() {
        let mut groups = BTreeMap::new();
        groups.insert(
            "flight_info".to_string(),
            BTreeSet::from(["B-gate".to_string()]),
        );
        let table = SlotGroupTable::new(groups).unwrap();

        let error = HandlerRegistry::builder()
            .register(Intent::FlightInfo, echo("a"))
            .register(Intent::ArrivalPolicy, echo("b"))
            .fallback(echo("fallback"))
            .build(table)
            .unwrap_err();
        assert_eq!(error, RegistryError::MissingRoutingEntry(Intent::ArrivalPolicy));
    }

    #[test]
    fn lookups_resolve_only_registered_domains() {
        let registry = HandlerRegistry::builder()
            .register(Intent::ParkingFeeInfo, echo("fee"))
            .fallback(echo("fallback"))
            .build(SlotGroupTable::default())
            .unwrap();

        assert!(registry.contains(Intent::ParkingFeeInfo));
        assert!(!registry.contains(Intent::FlightInfo));
        assert_eq!(
            registry.supported_intents().collect::<Vec<_>>(),
            vec![Intent::ParkingFeeInfo]
        );
        assert!(registry
            .handler_for(&IntentLabel::parse("parking_fee_info"))
            .is_some());
        assert!(registry.handler_for(&IntentLabel::Complex).is_none());
        assert!(registry
            .handler_for(&IntentLabel::parse("unknown_xyz"))
            .is_none());
    }
}
