pub mod intent;
pub mod models;
pub mod text;

pub use intent::{SlotGroupTable, SlotTableError, EXCLUDED_GROUPS, GENERAL_TOPIC, TIME_GENERAL};
pub use models::*;
pub use text::{normalize_text, preview};
