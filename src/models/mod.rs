//! Domain models shared across the whole monitoring core.

pub mod position;
pub mod record;
pub mod tick;

pub use position::{Position, Side, Threshold, TriggerFlags, TriggerKind};
pub use record::PositionRecord;
pub use tick::Price;
