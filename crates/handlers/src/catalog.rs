use std::sync::Arc;

use concourse_core::{Intent, SlotGroupTable};
use concourse_engine::{HandlerRegistry, RegistryError, TurnHandler};

use crate::fallback::FallbackHandler;
use crate::parking::{
    ParkingAvailabilityHandler, ParkingCongestionHandler, ParkingSearchHandler,
    ParkingStatusSource,
};
use crate::policy::ProcedurePolicyHandler;
use crate::rag::{RagContext, RagHandler};

/// Handler serving `intent`.
pub fn handler_for(
    intent: Intent,
    context: &RagContext,
    parking: Option<&Arc<dyn ParkingStatusSource>>,
) -> Arc<dyn TurnHandler> {
    match intent {
        Intent::ParkingFeeInfo => Arc::new(ParkingSearchHandler::fee(context.clone())),
        Intent::ParkingLocationRecommendation => {
            Arc::new(ParkingSearchHandler::location(context.clone()))
        }
        Intent::ParkingWalkTimeInfo => Arc::new(ParkingSearchHandler::walk_time(context.clone())),
        Intent::ParkingAvailabilityQuery => Arc::new(ParkingAvailabilityHandler::new(
            parking.cloned(),
            context.chat.clone(),
        )),
        Intent::ParkingCongestionPrediction => Arc::new(ParkingCongestionHandler),
        Intent::ArrivalPolicy => Arc::new(ProcedurePolicyHandler::arrival(context.clone())),
        Intent::DeparturePolicy => Arc::new(ProcedurePolicyHandler::departure(context.clone())),
        other => Arc::new(RagHandler::new(other, context.clone())),
    }
}

/// Registers a handler for every known intent plus the fallback.
pub fn build_registry(
    context: &RagContext,
    parking: Option<Arc<dyn ParkingStatusSource>>,
    slot_groups: SlotGroupTable,
) -> Result<HandlerRegistry, RegistryError> {
    Intent::ALL
        .into_iter()
        .fold(HandlerRegistry::builder(), |builder, intent| {
            builder.register(intent, handler_for(intent, context, parking.as_ref()))
        })
        .fallback(Arc::new(FallbackHandler))
        .build(slot_groups)
}

#[cfg(test)]
mod tests {
    use concourse_retrieval::KnowledgeBase;

    use super::*;

    fn context() -> RagContext {
        RagContext::new(Arc::new(KnowledgeBase::from_docs(Vec::new(), None)), None)
    }

    #[test]
    fn every_intent_is_registered_against_the_default_table() {
        let registry = build_registry(&context(), None, SlotGroupTable::default()).unwrap();
        assert_eq!(registry.len(), Intent::ALL.len());
    }

    #[test]
    fn a_table_missing_an_intent_is_rejected() {
        let table = SlotGroupTable::from_json_str(r#"{"flight_info": ["B-gate"]}"#).unwrap();
        let error = build_registry(&context(), None, table).unwrap_err();
        assert!(matches!(error, RegistryError::MissingRoutingEntry(_)));
    }
}
