//! Monitoring engine: gateway seam, per-position monitors, the portfolio
//! that owns them, the feed fan-out and the open flow.

pub mod executor;
pub mod feed;
pub mod monitor;
pub mod opener;
pub mod portfolio;

#[cfg(test)]
pub(crate) mod testing;
