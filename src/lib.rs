//! # stopguard
//!
//! Risk-monitoring core of a trading client: keeps a portfolio of open
//! positions, consumes live price ticks and closes a position through the
//! trade bridge when its stop-loss, take-profit or the portfolio margin call
//! fires.
//!
//! ```text
//!  feed ──▶ run_fan_out ──▶ Portfolio::update_price ──▶ monitor inbox
//!                                                         │
//!                                      evaluate triggers ◀┘──▶ TradeGateway::close_position
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod routes;
pub mod state;
