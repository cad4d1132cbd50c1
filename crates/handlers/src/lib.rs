mod catalog;
mod config;
mod fallback;
mod parking;
mod policy;
mod rag;
mod runtime;

pub use catalog::{build_registry, handler_for};
pub use config::{search_config, RuntimeConfig, SearchConfig, DEFAULT_PARKING_API_URL};
pub use fallback::{FallbackHandler, FALLBACK_REPLY};
pub use parking::{
    fee_queries, location_queries, parse_parking_items, render_availability, walk_time_queries,
    ParkingApiClient, ParkingAvailabilityHandler, ParkingCongestionHandler, ParkingSearchHandler,
    ParkingStatus, ParkingStatusSource, AVAILABILITY_EMPTY, AVAILABILITY_FETCH_FAILED,
    AVAILABILITY_UNCONFIGURED, CONGESTION_COMING_SOON,
};
pub use policy::{ProcedurePolicyHandler, COUNTRY_COLLECTION};
pub use rag::{
    extractive_answer, slot_query, RagContext, RagHandler, EMPTY_QUERY_APOLOGY,
    SEARCH_FAILED_APOLOGY, SEARCH_TOP_K,
};
pub use runtime::{build_runtime, Runtime};
