mod complex;
mod graph;
mod registry;
mod router;
mod verify;

pub use complex::{ComplexIntentHandler, NO_DOMAIN_APOLOGY};
pub use graph::{Edge, TurnGraph, TurnOutcome};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder, RegistryError, TurnHandler};
pub use router::{
    route_after_classification, route_after_verification, Node, CONFIDENCE_THRESHOLD,
};
pub use verify::{parse_verification, IntentVerifier, LlmIntentVerifier, PassthroughVerifier};
