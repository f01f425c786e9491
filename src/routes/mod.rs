//! Axum handlers, grouped by concern.

pub mod feed;
pub mod monitor;
pub mod positions;
