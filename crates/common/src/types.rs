use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Chart timeframes supported by the broker terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    pub fn duration(self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
            Timeframe::W1 => Duration::weeks(1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            "W1" => Ok(Timeframe::W1),
            other => Err(Error::Config(format!("unknown timeframe '{other}'"))),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a closed or forming candle body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarDirection {
    Bullish,
    Bearish,
    Doji,
}

/// One OHLC bar. `open_time` is a naive datetime in the broker's zone, the
/// way the terminal reports it. The most recent bar of a history fetch is
/// the forming bar and mutates with each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn body_top(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_bottom(&self) -> f64 {
        self.open.min(self.close)
    }

    pub fn direction(&self) -> BarDirection {
        if self.close > self.open {
            BarDirection::Bullish
        } else if self.close < self.open {
            BarDirection::Bearish
        } else {
            BarDirection::Doji
        }
    }

    /// The half-open interval `[open_time, open_time + timeframe)` this bar
    /// covers, in broker-zone naive time.
    pub fn covers(&self, instant: NaiveDateTime) -> bool {
        self.open_time <= instant && instant < self.open_time + self.timeframe.duration()
    }
}

/// Direction a trade signal points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn side(self) -> OrderSide {
        match self {
            Direction::Bullish => OrderSide::Buy,
            Direction::Bearish => OrderSide::Sell,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Bullish => write!(f, "BULLISH"),
            Direction::Bearish => write!(f, "BEARISH"),
        }
    }
}

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Ledger status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Closed,
}

/// Why an order left the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    Tp,
    Sl,
    Manual,
    AutoClose,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Tp => write!(f, "TP"),
            CloseReason::Sl => write!(f, "SL"),
            CloseReason::Manual => write!(f, "MANUAL"),
            CloseReason::AutoClose => write!(f, "AUTO_CLOSE"),
        }
    }
}

/// Latest quote for a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
}

/// Terminal-side metadata for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    /// Quoted decimal digits (5 for most FX majors).
    pub digits: u32,
    /// Smallest quoted increment (10^-digits).
    pub point: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    /// Minimum SL/TP distance from the market, in points.
    pub stop_level_points: u32,
    /// Units of base currency per lot. Drives per-price-unit valuation.
    pub contract_size: f64,
    pub trade_enabled: bool,
}

impl SymbolInfo {
    pub fn normalize_price(&self, price: f64) -> f64 {
        let factor = 10f64.powi(self.digits as i32);
        (price * factor).round() / factor
    }

    /// One pip in price units. Fractional-digit quotes (5/3 digits) quote
    /// tenths of a pip, so a pip is ten points there.
    pub fn pip(&self) -> f64 {
        if self.digits == 5 || self.digits == 3 {
            self.point * 10.0
        } else {
            self.point
        }
    }

    /// Minimum stop distance from the market, in price units.
    pub fn stop_distance(&self) -> f64 {
        self.stop_level_points as f64 * self.point
    }

    /// Snap a volume to the step grid and clamp into the broker's range.
    pub fn snap_volume(&self, volume: f64) -> f64 {
        let mut v = if self.volume_step > 0.0 {
            (volume / self.volume_step).round() * self.volume_step
        } else {
            volume
        };
        if v < self.volume_min {
            v = self.volume_min;
        }
        if v > self.volume_max {
            v = self.volume_max;
        }
        v
    }

    /// Account-currency value of a one-unit price move for one lot.
    pub fn value_per_price_unit(&self) -> f64 {
        self.contract_size
    }
}

/// Account snapshot used for sizing and permission checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountInfo {
    pub equity: f64,
    pub trade_allowed: bool,
}

/// Market order to be submitted to the terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    /// `None` = at market.
    pub price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub comment: String,
}

/// Confirmation returned by the terminal after a fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub ticket: u64,
    pub fill_price: f64,
    pub volume: f64,
}

/// Result of closing a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedFill {
    pub ticket: u64,
    pub close_price: f64,
}

/// An open position as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub entry: f64,
    pub current_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub profit: f64,
    pub opened_at: DateTime<Utc>,
}

/// Historical deal for a position no longer open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    pub close_price: f64,
    pub close_time: DateTime<Utc>,
    pub profit: f64,
}

/// One row of the economic calendar after parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsEvent {
    pub time: DateTime<Utc>,
    pub currency: String,
    pub title: String,
    /// 0..=3 stars. High impact is 3.
    pub impact: u8,
    pub is_holiday: bool,
    pub actual: Option<String>,
    pub forecast: Option<String>,
    pub previous: Option<String>,
}

/// Base and quote currencies of a six-letter FX symbol.
pub fn currencies_for_symbol(symbol: &str) -> Option<(String, String)> {
    if symbol.len() == 6 && symbol.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((symbol[..3].to_uppercase(), symbol[3..].to_uppercase()))
    } else {
        None
    }
}
