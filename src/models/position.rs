//! # models::position
//!
//! [`Position`] — one open exposure plus the algorithms that decide when it
//! must be closed.
//!
//! ## Thresholds
//! Stop-loss and take-profit are an explicit tri-state ([`Threshold`]):
//! never set, explicitly disabled, or an active price.  A `0.0` passed to
//! [`Position::set_stop_loss`] still means "disabled" because that is what
//! the venue API sends when the user switches the stop off.
//!
//! ## Side rules
//! ```text
//!              stop-loss            take-profit
//! LONG   must be below last     must be above last
//!        fires when last <= sl  fires when last >= tp
//! SHORT  must be above last     must be below last
//!        fires when last >= sl  fires when last <= tp
//! ```

use serde::{Deserialize, Serialize};

use crate::error::PositionError;
use crate::models::Price;

// ─── Side ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Profits when price rises.
    Long,
    /// Profits when price falls.
    Short,
}

impl Side {
    pub fn from_short(short: bool) -> Self {
        if short { Side::Short } else { Side::Long }
    }

    #[inline]
    pub fn is_short(self) -> bool {
        self == Side::Short
    }
}

// ─── Threshold ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Threshold {
    /// Never configured.
    #[default]
    Unset,
    /// Switched off by the user.
    Disabled,
    Active(f64),
}

impl Threshold {
    pub fn value(self) -> Option<f64> {
        match self {
            Threshold::Active(v) => Some(v),
            _ => None,
        }
    }
}

// ─── Trigger flags / kinds ────────────────────────────────────────────────────

/// Per-position switches for the optional close paths.
///
/// Stop-loss is always evaluated; disable it through [`Threshold::Disabled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerFlags {
    /// Close when the take-profit level is reached.
    #[serde(default)]
    pub take_profit: bool,
    /// Close when the portfolio hits a margin call.
    #[serde(default)]
    pub margin_call: bool,
}

/// Why a position was closed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    StopLoss,
    TakeProfit,
    MarginCall,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::StopLoss   => write!(f, "SL"),
            TriggerKind::TakeProfit => write!(f, "TP"),
            TriggerKind::MarginCall => write!(f, "MARGIN"),
        }
    }
}

// ─── Position ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    symbol:      String,
    side:        Side,
    pub open_price: f64,
    pub amount:     f64,
    last_price:  Option<f64>,
    /// Id of the quote `last_price` came from; sent back on close.
    last_price_id: Option<String>,
    stop_loss:   Threshold,
    take_profit: Threshold,
    pub triggers: TriggerFlags,
}

impl Position {
    pub fn new(symbol: impl Into<String>, side: Side, open_price: f64, amount: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            open_price,
            amount,
            last_price: None,
            last_price_id: None,
            stop_loss: Threshold::Unset,
            take_profit: Threshold::Unset,
            triggers: TriggerFlags::default(),
        }
    }

    /// Seed the position with a quote that is already known (e.g. the
    /// opening quote read from the last-price cache).
    pub fn with_quote(mut self, quote: &Price) -> Self {
        self.observe(quote);
        self
    }

    pub fn with_last_price(mut self, last_price: f64) -> Self {
        self.last_price = Some(last_price);
        self
    }

    pub fn with_triggers(mut self, triggers: TriggerFlags) -> Self {
        self.triggers = triggers;
        self
    }

    /// Install thresholds without side validation.  Only for restoring
    /// levels the venue already accepted.
    pub fn with_thresholds(mut self, stop_loss: Threshold, take_profit: Threshold) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    pub fn last_price_id(&self) -> Option<&str> {
        self.last_price_id.as_deref()
    }

    pub fn stop_loss(&self) -> Threshold {
        self.stop_loss
    }

    pub fn take_profit(&self) -> Threshold {
        self.take_profit
    }

    /// Copy the side-correct price of `tick` into `last_price`.
    pub fn observe(&mut self, tick: &Price) -> f64 {
        let price = tick.realizable_price(self.side);
        self.last_price = Some(price);
        self.last_price_id = Some(tick.id.clone());
        price
    }

    // ── Setters ───────────────────────────────────────────────────────────────

    /// Validate and install a stop-loss.  `0.0` disables it.
    pub fn set_stop_loss(&mut self, value: f64) -> Result<(), PositionError> {
        let last = self.last_price.ok_or(PositionError::MissingLastPrice)?;

        if value == 0.0 {
            self.stop_loss = Threshold::Disabled;
            return Ok(());
        }

        match self.side {
            Side::Short if value <= last => return Err(PositionError::InvalidStopLossShort),
            Side::Long if value >= last  => return Err(PositionError::InvalidStopLossLong),
            _ => {}
        }

        self.stop_loss = Threshold::Active(value);
        Ok(())
    }

    /// Validate and install a take-profit.
    pub fn set_take_profit(&mut self, value: f64) -> Result<(), PositionError> {
        let last = self.last_price.ok_or(PositionError::MissingLastPrice)?;

        match self.side {
            Side::Short if value >= last => return Err(PositionError::InvalidTakeProfitShort),
            Side::Long if value <= last  => return Err(PositionError::InvalidTakeProfitLong),
            _ => {}
        }

        self.take_profit = Threshold::Active(value);
        Ok(())
    }

    pub fn disable_stop_loss(&mut self) {
        self.stop_loss = Threshold::Disabled;
    }

    pub fn disable_take_profit(&mut self) {
        self.take_profit = Threshold::Disabled;
    }

    // ── Triggers ──────────────────────────────────────────────────────────────

    pub fn trigger_stop_loss(&self) -> Result<bool, PositionError> {
        let stop = match self.stop_loss {
            Threshold::Active(v) => v,
            Threshold::Unset | Threshold::Disabled => return Ok(false),
        };
        let last = self.last_price.ok_or(PositionError::MissingLastPrice)?;

        Ok(match self.side {
            Side::Short => last >= stop,
            Side::Long  => last <= stop,
        })
    }

    pub fn trigger_take_profit(&self) -> Result<bool, PositionError> {
        let last = self.last_price.ok_or(PositionError::MissingLastPrice)?;
        let target = match self.take_profit {
            Threshold::Active(v) => v,
            Threshold::Disabled => return Ok(false),
            Threshold::Unset => return Err(PositionError::MissingTakeProfit),
        };

        Ok(match self.side {
            Side::Short => last <= target,
            Side::Long  => last >= target,
        })
    }

    /// Run every enabled per-tick trigger, stop-loss first.
    pub fn evaluate(&self) -> Result<Option<TriggerKind>, PositionError> {
        if self.trigger_stop_loss()? {
            return Ok(Some(TriggerKind::StopLoss));
        }

        if self.triggers.take_profit
            && self.take_profit != Threshold::Unset
            && self.trigger_take_profit()?
        {
            return Ok(Some(TriggerKind::TakeProfit));
        }

        Ok(None)
    }

    /// Unrealised profit or loss at `last_price`.
    pub fn pnl(&self) -> Result<f64, PositionError> {
        let last = self.last_price.ok_or(PositionError::MissingLastPrice)?;
        Ok(match self.side {
            Side::Short => (self.open_price - last) * self.amount,
            Side::Long  => (last - self.open_price) * self.amount,
        })
    }
}
